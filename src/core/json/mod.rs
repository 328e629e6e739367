//! Structured form of a 700-series (NVM3) controller NVM
//!
//! The document is stable across firmware variants: fields a given image
//! does not store are `null` instead of missing.

mod bridge;

use std::collections::BTreeMap;

use semver::Version;
use serde::{Deserialize, Serialize};

use crate::files::{has_extended_rf_config, has_node_id_type, CommandClasses, RfConfig};
use crate::files::{DEFAULT_MAX_TX_POWER, DEFAULT_NODE_ID_TYPE};
use crate::nvm3::consts::PageWriteSize;
use crate::protocol::{NodeJson, SucUpdateEntry};

pub use bridge::{json_to_nvm, json_to_nvm_with_options, nvm_to_json};

/// A complete NVM3 image in structured form
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NvmJson {
    /// Protocol file format, 0 to 5
    pub format: u8,
    pub meta: Option<NvmMeta>,
    pub controller: ControllerJson,
    pub nodes: BTreeMap<u8, NodeJson>,
}

/// Physical page parameters, only needed to re-encode an image
///
/// Taken from the protocol region. Application pages written with another
/// nominal page size record it in `application_page_size`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NvmMeta {
    pub page_size: usize,
    pub device_family: u16,
    pub write_size: PageWriteSize,
    pub memory_mapped: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub application_page_size: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ControllerJson {
    pub protocol_version: String,
    pub application_version: String,
    /// `0x` followed by 8 lowercase hex digits
    pub home_id: String,
    pub node_id: u8,
    pub last_node_id: u8,
    pub static_controller_node_id: u8,
    pub suc_last_index: u8,
    pub controller_configuration: u8,
    pub suc_update_entries: Vec<SucUpdateEntry>,
    pub suc_awareness_push_needed: Option<u8>,
    pub max_node_id: u8,
    pub reserved_id: u8,
    pub system_state: u8,
    pub preferred_repeaters: Option<Vec<u8>>,

    pub is_listening: Option<bool>,
    pub optional_functionality: Option<bool>,
    pub generic_device_class: Option<u8>,
    pub specific_device_class: Option<u8>,

    pub rf_config: Option<RfConfig>,
    pub command_classes: CommandClasses,
    /// Hex string
    pub application_data: Option<String>,
}

/// Fills in or strips the fields whose presence depends on the firmware
/// version the controller will be written for
pub fn apply_version_defaults(controller: &ControllerJson, target: &Version) -> ControllerJson {
    let mut controller = controller.clone();

    if let Some(rf_config) = controller.rf_config.as_mut() {
        if has_extended_rf_config(target) {
            rf_config.enable_pti.get_or_insert(0);
            rf_config.max_tx_power.get_or_insert(DEFAULT_MAX_TX_POWER);
        } else {
            rf_config.enable_pti = None;
            rf_config.max_tx_power = None;
        }

        if has_node_id_type(target) {
            rf_config.node_id_type.get_or_insert(DEFAULT_NODE_ID_TYPE);
        } else {
            rf_config.node_id_type = None;
        }
    }

    controller.suc_awareness_push_needed.get_or_insert(0);
    controller.is_listening.get_or_insert(true);
    controller.optional_functionality.get_or_insert(false);
    controller.generic_device_class.get_or_insert(0x02);
    controller.specific_device_class.get_or_insert(0x07);
    controller
}
