//! Files of the application region

use semver::Version;
use serde::{Deserialize, Serialize};

use super::{payload_of, NvmFileCodec};
use crate::error::{NvmError, Result};
use crate::nvm3::NvmObject;

pub const APPLICATION_TYPE_KEY: u32 = 0x51002;
pub const APPLICATION_CCS_KEY: u32 = 0x51103;
pub const APPLICATION_RF_CONFIG_KEY: u32 = 0x51104;
pub const APPLICATION_DATA_KEY: u32 = 0x51200;

const MAX_CCS_PER_LIST: usize = 35;

/// Device type the application reports about itself
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApplicationTypeFile {
    pub is_listening: bool,
    pub optional_functionality: bool,
    pub generic_device_class: u8,
    pub specific_device_class: u8,
}

impl NvmFileCodec for ApplicationTypeFile {
    fn decode(object: &NvmObject, _version: &Version) -> Result<Self> {
        let payload = payload_of(object, 4)?;
        Ok(ApplicationTypeFile {
            is_listening: payload[0] != 0,
            optional_functionality: payload[1] != 0,
            generic_device_class: payload[2],
            specific_device_class: payload[3],
        })
    }

    fn encode(&self, _version: &Version) -> Result<NvmObject> {
        Ok(NvmObject::data(
            APPLICATION_TYPE_KEY,
            vec![
                u8::from(self.is_listening),
                u8::from(self.optional_functionality),
                self.generic_device_class,
                self.specific_device_class,
            ],
        ))
    }
}

/// Command classes the controller advertises, per inclusion mode
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandClasses {
    #[serde(rename = "includedInsecurely")]
    pub included_insecurely: Vec<u8>,
    #[serde(rename = "includedSecurelyInsecureCCs")]
    pub included_securely_insecure_ccs: Vec<u8>,
    #[serde(rename = "includedSecurelySecureCCs")]
    pub included_securely_secure_ccs: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplicationCcsFile(pub CommandClasses);

impl NvmFileCodec for ApplicationCcsFile {
    fn decode(object: &NvmObject, _version: &Version) -> Result<Self> {
        let payload = payload_of(object, 3 * (1 + MAX_CCS_PER_LIST))?;
        let mut lists = payload.chunks_exact(1 + MAX_CCS_PER_LIST).map(|chunk| {
            let count = (chunk[0] as usize).min(MAX_CCS_PER_LIST);
            chunk[1..1 + count].to_vec()
        });

        let mut next = || lists.next().unwrap_or_default();
        Ok(ApplicationCcsFile(CommandClasses {
            included_insecurely: next(),
            included_securely_insecure_ccs: next(),
            included_securely_secure_ccs: next(),
        }))
    }

    fn encode(&self, _version: &Version) -> Result<NvmObject> {
        let ccs = &self.0;
        let mut payload = Vec::with_capacity(3 * (1 + MAX_CCS_PER_LIST));
        for list in [
            &ccs.included_insecurely,
            &ccs.included_securely_insecure_ccs,
            &ccs.included_securely_secure_ccs,
        ] {
            if list.len() > MAX_CCS_PER_LIST {
                return Err(NvmError::InvalidJson(format!(
                    "At most {} command classes per inclusion mode are supported",
                    MAX_CCS_PER_LIST
                )));
            }
            let mut chunk = [0u8; 1 + MAX_CCS_PER_LIST];
            chunk[0] = list.len() as u8;
            chunk[1..1 + list.len()].copy_from_slice(list);
            payload.extend_from_slice(&chunk);
        }
        Ok(NvmObject::data(APPLICATION_CCS_KEY, payload))
    }
}

/// Radio settings; power values are in dBm
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RfConfig {
    pub rf_region: u8,
    pub tx_power: f64,
    #[serde(rename = "measured0dBm")]
    pub measured_0dbm: f64,
    #[serde(rename = "enablePTI")]
    pub enable_pti: Option<u8>,
    #[serde(rename = "maxTXPower")]
    pub max_tx_power: Option<f64>,
    pub node_id_type: Option<u8>,
}

pub const DEFAULT_MAX_TX_POWER: f64 = 14.0;
pub const DEFAULT_NODE_ID_TYPE: u8 = 1;

/// First version storing PTI enable and max TX power
pub fn has_extended_rf_config(version: &Version) -> bool {
    *version >= Version::new(7, 18, 1)
}

/// First version storing the node ID type
pub fn has_node_id_type(version: &Version) -> bool {
    *version >= Version::new(7, 21, 0)
}

fn to_tenths<T: TryFrom<i64>>(value: f64, field: &str) -> Result<T> {
    let tenths = (value * 10.0).round() as i64;
    T::try_from(tenths)
        .map_err(|_| NvmError::InvalidJson(format!("{} {} dBm is out of range", field, value)))
}

#[derive(Debug, Clone, PartialEq)]
pub struct ApplicationRfConfigFile(pub RfConfig);

impl NvmFileCodec for ApplicationRfConfigFile {
    fn decode(object: &NvmObject, _version: &Version) -> Result<Self> {
        let payload = payload_of(object, 3)?;
        let extended = payload.len() >= 6;

        Ok(ApplicationRfConfigFile(RfConfig {
            rf_region: payload[0],
            tx_power: f64::from(payload[1] as i8) / 10.0,
            measured_0dbm: f64::from(payload[2] as i8) / 10.0,
            enable_pti: extended.then(|| payload[3]),
            max_tx_power: extended
                .then(|| f64::from(i16::from_le_bytes([payload[4], payload[5]])) / 10.0),
            node_id_type: payload.get(6).copied(),
        }))
    }

    fn encode(&self, version: &Version) -> Result<NvmObject> {
        let config = &self.0;
        let mut payload = vec![
            config.rf_region,
            to_tenths::<i8>(config.tx_power, "TX power")? as u8,
            to_tenths::<i8>(config.measured_0dbm, "Measured output power")? as u8,
        ];
        if has_extended_rf_config(version) {
            payload.push(config.enable_pti.unwrap_or_default());
            let max_tx_power = config.max_tx_power.unwrap_or(DEFAULT_MAX_TX_POWER);
            payload.extend_from_slice(&to_tenths::<i16>(max_tx_power, "Max TX power")?.to_le_bytes());
        }
        if has_node_id_type(version) {
            payload.push(config.node_id_type.unwrap_or(DEFAULT_NODE_ID_TYPE));
        }
        Ok(NvmObject::data(APPLICATION_RF_CONFIG_KEY, payload))
    }
}

/// Free-form data owned by the host application
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplicationDataFile {
    pub data: Vec<u8>,
}

impl NvmFileCodec for ApplicationDataFile {
    fn decode(object: &NvmObject, _version: &Version) -> Result<Self> {
        Ok(ApplicationDataFile {
            data: object.payload()?.to_vec(),
        })
    }

    fn encode(&self, _version: &Version) -> Result<NvmObject> {
        Ok(NvmObject::data(APPLICATION_DATA_KEY, self.data.clone()))
    }
}
