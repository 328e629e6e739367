use semver::Version;

use super::{has_node_id_type, payload_of, NvmFileCodec};
use crate::error::{NvmError, Result};
use crate::nvm3::NvmObject;

pub const CONTROLLER_INFO_KEY: u32 = 0x50004;
const CONTROLLER_INFO_SIZE: usize = 13;

/// Network identity and SUC bookkeeping of the controller
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerInfoFile {
    pub home_id: [u8; 4],
    pub node_id: u8,
    pub last_node_id: u8,
    pub static_controller_node_id: u8,
    pub suc_last_index: u8,
    pub controller_configuration: u8,
    pub suc_awareness_push_needed: u8,
    pub max_node_id: u8,
    pub reserved_id: u8,
    pub system_state: u8,
}

impl NvmFileCodec for ControllerInfoFile {
    fn decode(object: &NvmObject, version: &Version) -> Result<Self> {
        // From 7.21 on, Long Range firmware widens node IDs and adds LR counters
        let length = object.payload()?.len();
        if has_node_id_type(version) && length != CONTROLLER_INFO_SIZE {
            return Err(NvmError::not_supported(format!(
                "Controller info of {} bytes written by protocol {} uses the Long Range layout",
                length, version
            )));
        }

        let payload = payload_of(object, CONTROLLER_INFO_SIZE)?;
        Ok(ControllerInfoFile {
            home_id: [payload[0], payload[1], payload[2], payload[3]],
            node_id: payload[4],
            last_node_id: payload[5],
            static_controller_node_id: payload[6],
            suc_last_index: payload[7],
            controller_configuration: payload[8],
            suc_awareness_push_needed: payload[9],
            max_node_id: payload[10],
            reserved_id: payload[11],
            system_state: payload[12],
        })
    }

    fn encode(&self, _version: &Version) -> Result<NvmObject> {
        let mut payload = Vec::with_capacity(CONTROLLER_INFO_SIZE);
        payload.extend_from_slice(&self.home_id);
        payload.extend_from_slice(&[
            self.node_id,
            self.last_node_id,
            self.static_controller_node_id,
            self.suc_last_index,
            self.controller_configuration,
            self.suc_awareness_push_needed,
            self.max_node_id,
            self.reserved_id,
            self.system_state,
        ]);
        Ok(NvmObject::data(CONTROLLER_INFO_KEY, payload))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_controller_info_roundtrip() -> Result<()> {
        let info = ControllerInfoFile {
            home_id: [0xc0, 0xff, 0xee, 0x01],
            node_id: 1,
            last_node_id: 12,
            static_controller_node_id: 1,
            suc_last_index: 3,
            controller_configuration: 0x28,
            suc_awareness_push_needed: 0,
            max_node_id: 12,
            reserved_id: 0,
            system_state: 0,
        };
        let version = Version::new(7, 18, 1);
        let object = info.encode(&version)?;
        assert_eq!(object.key, CONTROLLER_INFO_KEY);
        assert_eq!(object.payload()?.len(), CONTROLLER_INFO_SIZE);
        assert_eq!(&object.payload()?[..5], &[0xc0, 0xff, 0xee, 0x01, 1]);
        assert_eq!(ControllerInfoFile::decode(&object, &version)?, info);
        Ok(())
    }

    #[test]
    fn test_long_range_layout_is_not_supported() {
        let object = NvmObject::data(CONTROLLER_INFO_KEY, vec![0; 22]);
        match ControllerInfoFile::decode(&object, &Version::new(7, 21, 0)) {
            Err(NvmError::NotSupported { reason, .. }) => assert!(reason.contains("Long Range")),
            other => panic!("Expected NotSupported, got {:?}", other),
        }

        let short = NvmObject::data(CONTROLLER_INFO_KEY, vec![0; 9]);
        assert!(matches!(
            ControllerInfoFile::decode(&short, &Version::new(7, 18, 1)),
            Err(NvmError::InvalidFormat(_))
        ));
        assert!(matches!(
            ControllerInfoFile::decode(&short, &Version::new(7, 21, 0)),
            Err(NvmError::NotSupported { .. })
        ));
    }

    #[test]
    fn test_classic_layout_on_long_range_firmware() -> Result<()> {
        let object = NvmObject::data(CONTROLLER_INFO_KEY, vec![1; CONTROLLER_INFO_SIZE]);
        let info = ControllerInfoFile::decode(&object, &Version::new(7, 21, 3))?;
        assert_eq!(info.home_id, [1; 4]);
        assert_eq!(info.system_state, 1);
        Ok(())
    }
}
