//! Migration between controller NVMs of different firmware
//!
//! The contents of a source NVM are carried over into the format a target
//! NVM uses. The target contributes everything that describes the hardware
//! it was taken from: RF configuration, page parameters and the application
//! version.

use semver::Version;
use tracing::{debug, info, warn};

use crate::config::MigrateOptions;
use crate::error::{NvmError, Result};
use crate::files::{CommandClasses, RfConfig};
use crate::json::{json_to_nvm, nvm_to_json, ControllerJson, NvmJson};
use crate::nvm500::{
    json_to_nvm500, nvm500_to_json, Controller500Json, NvmJson500, Rf500Config, FORMAT_500,
};
use crate::nvm500::layout::POWER_LEVELS;
use crate::protocol::CONTROLLER_ON_OTHER_NETWORK;
use crate::version::{is_sentinel_application_version, parse_version, MAX_PROTOCOL_FILE_FORMAT};

/// Largest application data a 700-series controller stores
pub const MAX_APPLICATION_DATA_700: usize = 512;

/// A decoded NVM of either series
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedNvm {
    Nvm3(NvmJson),
    Nvm500(NvmJson500),
    /// An NVM3 image with a protocol file format newer than this crate knows
    Unknown { format: u8 },
}

impl ParsedNvm {
    /// NVM3 protocol file format, `None` for 500-series NVMs
    fn nvm3_format(&self) -> Option<u8> {
        match self {
            ParsedNvm::Nvm3(json) => Some(json.format),
            ParsedNvm::Unknown { format } => Some(*format),
            ParsedNvm::Nvm500(_) => None,
        }
    }

    fn is_unknown(&self) -> bool {
        matches!(self, ParsedNvm::Unknown { .. })
    }
}

/// Decodes an NVM of any supported series
///
/// NVM3 is tried first. Only an image that is not NVM3 at all is tried as
/// a 500-series table.
pub fn classify_nvm(buffer: &[u8]) -> Result<ParsedNvm> {
    match nvm_to_json(buffer) {
        Ok(json) => Ok(ParsedNvm::Nvm3(json)),
        Err(NvmError::NotSupported {
            protocol_file_format: Some(format),
            ..
        }) => Ok(ParsedNvm::Unknown { format }),
        Err(NvmError::InvalidFormat(reason)) => {
            debug!("Not an NVM3 image ({}), trying 500-series layouts", reason);
            match nvm500_to_json(buffer) {
                Ok(json) => Ok(ParsedNvm::Nvm500(json)),
                Err(NvmError::NotSupported { .. }) => Err(NvmError::InvalidFormat(
                    "Neither an NVM3 image nor a known 500-series NVM".to_string(),
                )),
                Err(e) => Err(e),
            }
        }
        Err(e) => Err(e),
    }
}

/// Migrates `source` into the format of `target` with default options
pub fn migrate_nvm(source: &[u8], target: &[u8]) -> Result<Vec<u8>> {
    migrate_nvm_with_options(source, target, &MigrateOptions::default())
}

/// Migrates the contents of `source` into the format of `target`
///
/// The source bytes are returned unchanged when both NVMs are already
/// compatible.
pub fn migrate_nvm_with_options(source: &[u8], target: &[u8], options: &MigrateOptions) -> Result<Vec<u8>> {
    let source_nvm = classify_nvm(source)?;
    let target_nvm = classify_nvm(target)?;

    if let (ParsedNvm::Unknown { format: target_format }, Some(source_format)) =
        (&target_nvm, source_nvm.nvm3_format())
    {
        if source_format <= *target_format {
            info!(
                "Target protocol file format {} is newer than supported, but compatible with the source",
                target_format
            );
            return Ok(source.to_vec());
        }
    }

    if let (ParsedNvm::Nvm3(source_json), ParsedNvm::Nvm3(target_json)) = (&source_nvm, &target_nvm) {
        if is_compatible(source_json, target_json)? {
            info!("Source and target NVM are compatible, no migration needed");
            return Ok(source.to_vec());
        }
    }

    match (source_nvm.is_unknown(), target_nvm.is_unknown()) {
        (true, true) => {
            info!("Source and target NVM use unknown formats, leaving the source unchanged");
            return Ok(source.to_vec());
        }
        (true, false) | (false, true) => {
            return Err(NvmError::not_supported(
                "Cannot migrate between an NVM of an unknown format and a known one",
            ));
        }
        (false, false) => {}
    }

    match (source_nvm, target_nvm) {
        (ParsedNvm::Nvm3(source_json), ParsedNvm::Nvm3(target_json)) => {
            info!("Migrating 700-series NVM to 700-series NVM");
            encode_700(source_json, target_json)
        }
        (ParsedNvm::Nvm500(source_json), ParsedNvm::Nvm3(target_json)) => {
            info!("Migrating 500-series NVM to 700-series NVM");
            let json = json500_to_700(&source_json, options.truncate_application_data)?;
            encode_700(json, target_json)
        }
        (ParsedNvm::Nvm3(source_json), ParsedNvm::Nvm500(target_json)) => {
            info!("Migrating 700-series NVM to 500-series NVM");
            let json = json700_to_500(&source_json)?;
            encode_500(json, target_json)
        }
        (ParsedNvm::Nvm500(source_json), ParsedNvm::Nvm500(target_json)) => {
            info!("Migrating 500-series NVM to 500-series NVM");
            encode_500(source_json, target_json)
        }
        _ => Err(NvmError::not_supported("Cannot migrate NVMs of unknown formats")),
    }
}

/// Whether `application_version` can belong to firmware built for
/// `protocol_version`
fn is_consistent(application_version: &str, protocol_version: &str) -> Result<bool> {
    if is_sentinel_application_version(application_version) {
        return Ok(false);
    }
    Ok(parse_version(application_version)?.major == parse_version(protocol_version)?.major)
}

fn is_compatible(source: &NvmJson, target: &NvmJson) -> Result<bool> {
    let source_protocol = parse_version(&source.controller.protocol_version)?;
    let target_protocol = parse_version(&target.controller.protocol_version)?;

    Ok(target_protocol >= Version::new(7, 16, 0)
        && target_protocol >= source_protocol
        && is_consistent(
            &source.controller.application_version,
            &source.controller.protocol_version,
        )?
        && is_consistent(
            &target.controller.application_version,
            &target.controller.protocol_version,
        )?)
}

/// Application version the migrated NVM gets
///
/// Some firmware writes "255.x.y" instead of a real version. Those NVMs get
/// their protocol version instead.
fn target_application_version(application_version: &str, protocol_version: &str) -> String {
    if is_sentinel_application_version(application_version) {
        warn!(
            "Target application version {} is invalid, using protocol version {} instead",
            application_version, protocol_version
        );
        protocol_version.to_string()
    } else {
        application_version.to_string()
    }
}

fn encode_700(mut json: NvmJson, target: NvmJson) -> Result<Vec<u8>> {
    let target_controller = target.controller;
    json.controller.application_version = target_application_version(
        &target_controller.application_version,
        &target_controller.protocol_version,
    );
    json.controller.rf_config = target_controller.rf_config;
    json.meta = target.meta;
    json_to_nvm(&json, &target_controller.protocol_version)
}

fn encode_500(mut json: NvmJson500, target: NvmJson500) -> Result<Vec<u8>> {
    let target_controller = target.controller;
    json.controller.application_version = target_application_version(
        &target_controller.application_version,
        &target_controller.protocol_version,
    );
    json.controller.rf_config = target_controller.rf_config;
    json.meta = target.meta;
    json_to_nvm500(&json, &target_controller.protocol_version)
}

fn is_on_other_network(controller_configuration: u8) -> bool {
    controller_configuration & CONTROLLER_ON_OTHER_NETWORK != 0
}

/// Strips the zero padding around 500-series application data and fits the
/// rest into what a 700-series controller can store
fn trim_application_data(data: &str, truncate: bool) -> Result<Option<String>> {
    let bytes = hex::decode(data)
        .map_err(|e| NvmError::InvalidJson(format!("Invalid application data: {}", e)))?;
    let start = bytes.iter().position(|&b| b != 0).unwrap_or(bytes.len());
    let end = bytes.iter().rposition(|&b| b != 0).map_or(start, |last| last + 1);
    let mut trimmed = &bytes[start..end];

    if trimmed.len() > MAX_APPLICATION_DATA_700 {
        if !truncate {
            return Err(NvmError::InvalidJson(format!(
                "Application data is {} bytes long, 700-series controllers store at most {}",
                trimmed.len(),
                MAX_APPLICATION_DATA_700
            )));
        }
        warn!(
            "Truncating {} bytes of application data to {}",
            trimmed.len(),
            MAX_APPLICATION_DATA_700
        );
        trimmed = &trimmed[..MAX_APPLICATION_DATA_700];
    }

    Ok((!trimmed.is_empty()).then(|| hex::encode(trimmed)))
}

/// Converts a 500-series document into a 700-series one
///
/// The RF configuration is a placeholder. Real values only come from a
/// target NVM.
pub fn json500_to_700(json: &NvmJson500, truncate_application_data: bool) -> Result<NvmJson> {
    let source = &json.controller;
    let joined = is_on_other_network(source.controller_configuration);

    let home_id = if joined {
        source.learned_home_id.clone().ok_or_else(|| {
            NvmError::InvalidJson(
                "The controller is part of another network, but has no learned home ID".to_string(),
            )
        })?
    } else {
        source.own_home_id.clone()
    };
    let node_id = if joined { source.node_id } else { 1 };

    let application_data = match &source.application_data {
        Some(data) => trim_application_data(data, truncate_application_data)?,
        None => None,
    };
    let own_info = json
        .nodes
        .get(&source.node_id)
        .and_then(|node| node.as_record())
        .map(|record| &record.info);

    let controller = ControllerJson {
        protocol_version: parse_version(&source.protocol_version)?.to_string(),
        application_version: parse_version(&source.application_version)?.to_string(),
        home_id,
        node_id,
        last_node_id: source.last_node_id,
        static_controller_node_id: source.static_controller_node_id,
        suc_last_index: source.suc_last_index,
        controller_configuration: source.controller_configuration,
        suc_update_entries: source.suc_update_entries.clone(),
        suc_awareness_push_needed: None,
        max_node_id: source.max_node_id,
        reserved_id: source.reserved_id,
        system_state: source.system_state,
        preferred_repeaters: Some(source.preferred_repeaters.clone()),
        is_listening: own_info.map(|info| info.is_listening),
        optional_functionality: own_info.map(|info| info.optional_functionality),
        generic_device_class: own_info.map(|info| info.generic_device_class),
        specific_device_class: own_info.and_then(|info| info.specific_device_class),
        rf_config: Some(RfConfig {
            rf_region: 0,
            tx_power: 0.0,
            measured_0dbm: 3.3,
            enable_pti: None,
            max_tx_power: None,
            node_id_type: None,
        }),
        command_classes: CommandClasses {
            included_insecurely: source.command_classes.clone(),
            ..CommandClasses::default()
        },
        application_data,
    };

    Ok(NvmJson {
        format: MAX_PROTOCOL_FILE_FORMAT,
        meta: None,
        controller,
        nodes: json.nodes.clone(),
    })
}

/// Formats a version the way 500-series descriptors store it
fn short_version(version: &str) -> Result<String> {
    let version = parse_version(version)?;
    Ok(format!("{}.{:02}", version.major, version.minor))
}

/// Converts a 700-series document into a 500-series one
///
/// The RF configuration is a placeholder. Real values only come from a
/// target NVM.
pub fn json700_to_500(json: &NvmJson) -> Result<NvmJson500> {
    let source = &json.controller;
    let joined = is_on_other_network(source.controller_configuration);

    let controller = Controller500Json {
        protocol_version: short_version(&source.protocol_version)?,
        application_version: short_version(&source.application_version)?,
        own_home_id: source.home_id.clone(),
        learned_home_id: joined.then(|| source.home_id.clone()),
        node_id: if joined { source.node_id } else { 0 },
        last_node_id: source.last_node_id,
        static_controller_node_id: source.static_controller_node_id,
        suc_last_index: source.suc_last_index,
        controller_configuration: source.controller_configuration,
        suc_update_entries: source.suc_update_entries.clone(),
        max_node_id: source.max_node_id,
        reserved_id: source.reserved_id,
        system_state: source.system_state,
        watchdog_started: 0,
        rf_config: Rf500Config {
            power_level_normal: vec![0; POWER_LEVELS],
            power_level_low: vec![0; POWER_LEVELS],
            power_mode: 0,
            power_mode_extint_enable: 0,
            power_mode_wut_timeout: 0,
        },
        preferred_repeaters: source.preferred_repeaters.clone().unwrap_or_default(),
        command_classes: source.command_classes.included_insecurely.clone(),
        application_data: source.application_data.clone(),
    };

    Ok(NvmJson500 {
        format: FORMAT_500,
        meta: None,
        controller,
        nodes: json.nodes.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn json500() -> NvmJson500 {
        NvmJson500 {
            format: FORMAT_500,
            meta: None,
            controller: Controller500Json {
                protocol_version: "6.07".to_string(),
                application_version: "6.07".to_string(),
                own_home_id: "0x11223344".to_string(),
                learned_home_id: None,
                node_id: 1,
                last_node_id: 1,
                static_controller_node_id: 1,
                suc_last_index: 0,
                controller_configuration: 0,
                suc_update_entries: Vec::new(),
                max_node_id: 1,
                reserved_id: 0,
                system_state: 0,
                watchdog_started: 0,
                rf_config: Rf500Config::default(),
                preferred_repeaters: Vec::new(),
                command_classes: vec![0x20, 0x86],
                application_data: None,
            },
            nodes: BTreeMap::new(),
        }
    }

    #[test]
    fn test_own_network_uses_own_home_id() -> Result<()> {
        let mut json = json500();
        json.controller.node_id = 7;
        let converted = json500_to_700(&json, false)?;
        assert_eq!(converted.controller.home_id, "0x11223344");
        assert_eq!(converted.controller.node_id, 1);
        assert_eq!(converted.controller.protocol_version, "6.7.0");
        assert_eq!(converted.controller.command_classes.included_insecurely, vec![0x20, 0x86]);
        assert_eq!(converted.format, MAX_PROTOCOL_FILE_FORMAT);
        Ok(())
    }

    #[test]
    fn test_other_network_uses_learned_home_id() -> Result<()> {
        let mut json = json500();
        json.controller.controller_configuration = CONTROLLER_ON_OTHER_NETWORK;
        json.controller.learned_home_id = Some("0xaabbccdd".to_string());
        json.controller.node_id = 5;

        let converted = json500_to_700(&json, false)?;
        assert_eq!(converted.controller.home_id, "0xaabbccdd");
        assert_eq!(converted.controller.node_id, 5);
        Ok(())
    }

    #[test]
    fn test_other_network_without_learned_home_id() {
        let mut json = json500();
        json.controller.controller_configuration = CONTROLLER_ON_OTHER_NETWORK;
        assert!(matches!(
            json500_to_700(&json, true),
            Err(NvmError::InvalidJson(_))
        ));
    }

    #[test]
    fn test_application_data_is_trimmed() -> Result<()> {
        let mut json = json500();
        json.controller.application_data = Some("000001020003000000".to_string());
        let converted = json500_to_700(&json, false)?;
        assert_eq!(converted.controller.application_data.as_deref(), Some("01020003"));

        json.controller.application_data = Some("0000".to_string());
        assert_eq!(json500_to_700(&json, false)?.controller.application_data, None);
        Ok(())
    }

    #[test]
    fn test_oversized_application_data() -> Result<()> {
        let mut json = json500();
        json.controller.application_data = Some("ab".repeat(MAX_APPLICATION_DATA_700 + 1));

        assert!(matches!(
            json500_to_700(&json, false),
            Err(NvmError::InvalidJson(_))
        ));
        let converted = json500_to_700(&json, true)?;
        assert_eq!(
            converted.controller.application_data,
            Some("ab".repeat(MAX_APPLICATION_DATA_700))
        );
        Ok(())
    }

    #[test]
    fn test_700_to_500_home_ids() -> Result<()> {
        let mut json = json500_to_700(&json500(), false)?;
        let converted = json700_to_500(&json)?;
        assert_eq!(converted.controller.own_home_id, "0x11223344");
        assert_eq!(converted.controller.learned_home_id, None);
        assert_eq!(converted.controller.node_id, 0);
        assert_eq!(converted.controller.protocol_version, "6.07");
        assert_eq!(converted.controller.rf_config.power_level_normal, vec![0; POWER_LEVELS]);

        json.controller.controller_configuration = CONTROLLER_ON_OTHER_NETWORK;
        json.controller.node_id = 9;
        let converted = json700_to_500(&json)?;
        assert_eq!(converted.controller.learned_home_id.as_deref(), Some("0x11223344"));
        assert_eq!(converted.controller.node_id, 9);
        Ok(())
    }

    #[test]
    fn test_application_version_consistency() -> Result<()> {
        assert!(is_consistent("7.18.1", "7.18.1")?);
        assert!(is_consistent("7.3.0", "7.18.1")?);
        assert!(!is_consistent("255.1.0", "7.18.1")?);
        assert!(!is_consistent("1.2.0", "7.18.1")?);
        Ok(())
    }

    #[test]
    fn test_sentinel_application_version_is_replaced() {
        assert_eq!(target_application_version("255.0.1", "7.18.1"), "7.18.1");
        assert_eq!(target_application_version("7.17.2", "7.18.1"), "7.17.2");
    }
}
