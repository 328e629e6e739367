//! Shared fixtures for the integration tests

#![allow(dead_code)]

use std::collections::BTreeMap;

use nvmedit_rs::core::files::{CommandClasses, RfConfig};
use nvmedit_rs::core::nvm3::consts::PageWriteSize;
use nvmedit_rs::core::nvm500::{Controller500Json, NvmJson500Meta, Rf500Config, FORMAT_500};
use nvmedit_rs::core::protocol::{Beam, NodeProtocolInfo, NodeType, Route, SucUpdateEntry};
use nvmedit_rs::{
    json_to_nvm, json_to_nvm500, ControllerJson, Library, NodeJson, NodeRecord, NvmJson, NvmJson500, NvmMeta,
};

/// A node of a small three node network, node 1 being the controller
pub fn node_record(node_id: u8) -> NodeRecord {
    NodeRecord {
        is_virtual: false,
        info: NodeProtocolInfo {
            is_listening: node_id != 3,
            is_frequent_listening: (node_id == 3).then_some(Beam::Ms250),
            is_routing: true,
            supported_data_rates: vec![9600, 40000],
            protocol_version: 3,
            optional_functionality: false,
            node_type: if node_id == 1 {
                NodeType::Controller
            } else {
                NodeType::EndNode
            },
            supports_security: node_id == 2,
            supports_beaming: true,
            generic_device_class: if node_id == 1 { 0x02 } else { 0x10 },
            specific_device_class: Some(0x01),
        },
        neighbors: (1..=3).filter(|&id| id != node_id).collect(),
        suc_update_index: node_id,
        app_route_lock: false,
        route_slave_suc: false,
        suc_pending_update: node_id == 3,
        pending_discovery: false,
        lwr: (node_id == 2).then(|| Route {
            beaming: Some(Beam::Ms1000),
            protocol_rate: 3,
            repeater_node_ids: vec![3],
        }),
        nlwr: None,
    }
}

pub fn nodes(with_virtual: bool) -> BTreeMap<u8, NodeJson> {
    let mut nodes: BTreeMap<u8, NodeJson> = (1..=3)
        .map(|id| (id, NodeJson::Full(Box::new(node_record(id)))))
        .collect();
    if with_virtual {
        nodes.insert(4, NodeJson::virtual_marker());
    }
    nodes
}

pub fn suc_update_entries() -> Vec<SucUpdateEntry> {
    vec![
        SucUpdateEntry {
            node_id: 2,
            change_type: 1,
            supported_ccs: vec![0x20, 0x25, 0x86],
            controlled_ccs: Vec::new(),
        },
        SucUpdateEntry {
            node_id: 3,
            change_type: 1,
            supported_ccs: vec![0x20],
            controlled_ccs: vec![0x26],
        },
    ]
}

/// A 700-series document as decoded from an image written for `version`
pub fn document_700(version: &str) -> NvmJson {
    NvmJson {
        format: 4,
        meta: Some(NvmMeta {
            page_size: 2048,
            device_family: 2047,
            write_size: PageWriteSize::Write16,
            memory_mapped: true,
            application_page_size: None,
        }),
        controller: ControllerJson {
            protocol_version: version.to_string(),
            application_version: version.to_string(),
            home_id: "0xc0ffee00".to_string(),
            node_id: 1,
            last_node_id: 3,
            static_controller_node_id: 1,
            suc_last_index: 2,
            controller_configuration: 0x28,
            suc_update_entries: suc_update_entries(),
            suc_awareness_push_needed: Some(0),
            max_node_id: 3,
            reserved_id: 0,
            system_state: 0,
            preferred_repeaters: Some(vec![2]),
            is_listening: Some(true),
            optional_functionality: Some(false),
            generic_device_class: Some(0x02),
            specific_device_class: Some(0x07),
            rf_config: Some(RfConfig {
                rf_region: 1,
                tx_power: 0.0,
                measured_0dbm: 3.3,
                enable_pti: Some(0),
                max_tx_power: Some(14.0),
                node_id_type: None,
            }),
            command_classes: CommandClasses {
                included_insecurely: vec![0x5e, 0x86, 0x72],
                included_securely_insecure_ccs: vec![0x5e],
                included_securely_secure_ccs: vec![0x9f],
            },
            application_data: Some("01020304".to_string()),
        },
        nodes: nodes(true),
    }
}

pub fn image_700(version: &str) -> Vec<u8> {
    json_to_nvm(&document_700(version), version).unwrap()
}

/// A 500-series document for `protocol_version` ("x.yy")
pub fn document_500(library: Library, protocol_version: &str) -> NvmJson500 {
    NvmJson500 {
        format: FORMAT_500,
        meta: Some(NvmJson500Meta {
            library,
            manufacturer_id: 0x0086,
            firmware_id: 0x0001,
            product_type: 0x0001,
            product_id: 0x005a,
        }),
        controller: Controller500Json {
            protocol_version: protocol_version.to_string(),
            application_version: "1.00".to_string(),
            own_home_id: "0x12345678".to_string(),
            learned_home_id: None,
            node_id: 1,
            last_node_id: 3,
            static_controller_node_id: 1,
            suc_last_index: 2,
            controller_configuration: 0x08,
            suc_update_entries: suc_update_entries(),
            max_node_id: 3,
            reserved_id: 0,
            system_state: 0,
            watchdog_started: 0,
            rf_config: Rf500Config {
                power_level_normal: vec![0x0a; 14],
                power_level_low: vec![0x05; 14],
                power_mode: 1,
                power_mode_extint_enable: 1,
                power_mode_wut_timeout: 0x1000,
            },
            preferred_repeaters: vec![2],
            command_classes: vec![0x20, 0x72, 0x86],
            application_data: Some("0000aabbcc00".to_string()),
        },
        nodes: nodes(library == Library::Bridge),
    }
}

pub fn image_500(library: Library, protocol_version: &str) -> Vec<u8> {
    json_to_nvm500(&document_500(library, protocol_version), protocol_version).unwrap()
}
