//! Protocol-level records shared by both storage formats
//!
//! Node protocol info, cached routes, SUC update entries and node bitmasks
//! are stored byte-for-byte the same way in NVM3 files and in the
//! 500-series table, only their placement differs.

use serde::{Deserialize, Serialize};

use crate::error::{NvmError, Result};

pub const MAX_NODES: u8 = 232;
pub const NUM_NODEMASK_BYTES: usize = MAX_NODES as usize / 8;

pub const ROUTE_SIZE: usize = 5;
pub const MAX_REPEATERS: usize = 4;

pub const SUC_MAX_UPDATES: usize = 64;
pub const SUC_UPDATE_ENTRY_SIZE: usize = 22;
pub const SUC_UPDATE_NODEPARM_MAX: usize = 20;
const COMMAND_CLASS_MARK: u8 = 0xef;

/// Controller capability flag: controller joined another network
pub const CONTROLLER_ON_OTHER_NETWORK: u8 = 0x02;

/// Wake-up interval of a frequently listening node or beam
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Beam {
    #[serde(rename = "250ms")]
    Ms250,
    #[serde(rename = "1000ms")]
    Ms1000,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeType {
    Controller,
    #[serde(rename = "End Node")]
    EndNode,
}

/// Node capabilities as stored in the node table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeProtocolInfo {
    pub is_listening: bool,
    pub is_frequent_listening: Option<Beam>,
    pub is_routing: bool,
    pub supported_data_rates: Vec<u32>,
    pub protocol_version: u8,
    pub optional_functionality: bool,
    pub node_type: NodeType,
    pub supports_security: bool,
    pub supports_beaming: bool,
    pub generic_device_class: u8,
    pub specific_device_class: Option<u8>,
}

impl NodeProtocolInfo {
    /// Decodes the capability/security/reserved bytes plus device classes
    pub fn parse(bytes: [u8; 3], generic: u8, specific: u8) -> Self {
        let [capability, security, reserved] = bytes;

        let mut supported_data_rates = Vec::new();
        if capability & 0b0000_1000 != 0 {
            supported_data_rates.push(9600);
        }
        if capability & 0b0001_0000 != 0 {
            supported_data_rates.push(40000);
        }
        if reserved & 0b1 != 0 {
            supported_data_rates.push(100000);
        }

        let is_frequent_listening = match security & 0b0110_0000 {
            0b0100_0000 => Some(Beam::Ms1000),
            0b0010_0000 => Some(Beam::Ms250),
            _ => None,
        };

        let node_type = if security & 0b0000_0010 != 0 {
            NodeType::Controller
        } else {
            NodeType::EndNode
        };

        NodeProtocolInfo {
            is_listening: capability & 0b1000_0000 != 0,
            is_frequent_listening,
            is_routing: capability & 0b0100_0000 != 0,
            supported_data_rates,
            protocol_version: capability & 0b111,
            optional_functionality: security & 0b1000_0000 != 0,
            node_type,
            supports_security: security & 0b1 != 0,
            supports_beaming: security & 0b0001_0000 != 0,
            generic_device_class: generic,
            specific_device_class: (security & 0b100 != 0).then_some(specific),
        }
    }

    /// Encodes capability, security and reserved bytes
    pub fn encode(&self) -> [u8; 3] {
        let mut capability = self.protocol_version & 0b111;
        if self.is_listening {
            capability |= 0b1000_0000;
        }
        if self.is_routing {
            capability |= 0b0100_0000;
        }
        if self.supported_data_rates.contains(&9600) {
            capability |= 0b0000_1000;
        }
        if self.supported_data_rates.contains(&40000) {
            capability |= 0b0001_0000;
        }

        let mut security = match self.node_type {
            NodeType::Controller => 0b0000_0010,
            NodeType::EndNode => 0b0000_1000,
        };
        if self.optional_functionality {
            security |= 0b1000_0000;
        }
        security |= match self.is_frequent_listening {
            Some(Beam::Ms1000) => 0b0100_0000,
            Some(Beam::Ms250) => 0b0010_0000,
            None => 0,
        };
        if self.supports_beaming {
            security |= 0b0001_0000;
        }
        if self.specific_device_class.is_some() {
            security |= 0b100;
        }
        if self.supports_security {
            security |= 0b1;
        }

        let reserved = u8::from(self.supported_data_rates.contains(&100000));
        [capability, security, reserved]
    }

    /// Basic device class the 500-series node table stores next to the info
    pub fn basic_device_class(&self) -> u8 {
        match self.node_type {
            NodeType::Controller => 0x02,
            NodeType::EndNode => 0x04,
        }
    }
}

/// A cached route to a node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Route {
    pub beaming: Option<Beam>,
    pub protocol_rate: u8,
    pub repeater_node_ids: Vec<u8>,
}

impl Route {
    /// Decodes 4 repeater bytes plus a config byte; all zeros means no route
    pub fn parse(bytes: &[u8]) -> Option<Self> {
        let bytes = bytes.get(..ROUTE_SIZE)?;
        if bytes.iter().all(|&b| b == 0) {
            return None;
        }

        let conf = bytes[MAX_REPEATERS];
        Some(Route {
            beaming: match conf & 0b0110_0000 {
                0b0100_0000 => Some(Beam::Ms1000),
                0b0010_0000 => Some(Beam::Ms250),
                _ => None,
            },
            protocol_rate: conf & 0b111,
            repeater_node_ids: bytes[..MAX_REPEATERS]
                .iter()
                .copied()
                .take_while(|&id| id != 0)
                .collect(),
        })
    }

    pub fn encode(route: Option<&Route>) -> Result<[u8; ROUTE_SIZE]> {
        let mut bytes = [0u8; ROUTE_SIZE];
        let Some(route) = route else {
            return Ok(bytes);
        };
        if route.repeater_node_ids.len() > MAX_REPEATERS {
            return Err(NvmError::InvalidJson(format!(
                "A route may have at most {} repeaters",
                MAX_REPEATERS
            )));
        }

        bytes[..route.repeater_node_ids.len()].copy_from_slice(&route.repeater_node_ids);
        bytes[MAX_REPEATERS] = (route.protocol_rate & 0b111)
            | match route.beaming {
                Some(Beam::Ms1000) => 0b0100_0000,
                Some(Beam::Ms250) => 0b0010_0000,
                None => 0,
            };
        Ok(bytes)
    }
}

/// Pending node information update the SUC hands out to other controllers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SucUpdateEntry {
    pub node_id: u8,
    pub change_type: u8,
    #[serde(rename = "supportedCCs")]
    pub supported_ccs: Vec<u8>,
    #[serde(rename = "controlledCCs")]
    pub controlled_ccs: Vec<u8>,
}

impl SucUpdateEntry {
    /// Decodes one 22-byte entry; unused slots (node 0) yield `None`
    pub fn parse(bytes: &[u8]) -> Result<Option<Self>> {
        let bytes = bytes.get(..SUC_UPDATE_ENTRY_SIZE).ok_or_else(|| {
            NvmError::InvalidFormat("Truncated SUC update entry".to_string())
        })?;
        if bytes[0] == 0 {
            return Ok(None);
        }

        let ccs: Vec<u8> = bytes[2..]
            .iter()
            .copied()
            .take_while(|&cc| cc != 0)
            .collect();
        let (supported_ccs, controlled_ccs) = match ccs.iter().position(|&cc| cc == COMMAND_CLASS_MARK) {
            Some(mark) => (ccs[..mark].to_vec(), ccs[mark + 1..].to_vec()),
            None => (ccs, Vec::new()),
        };

        Ok(Some(SucUpdateEntry {
            node_id: bytes[0],
            change_type: bytes[1],
            supported_ccs,
            controlled_ccs,
        }))
    }

    pub fn encode(entry: Option<&SucUpdateEntry>) -> Result<[u8; SUC_UPDATE_ENTRY_SIZE]> {
        let mut bytes = [0u8; SUC_UPDATE_ENTRY_SIZE];
        let Some(entry) = entry else {
            return Ok(bytes);
        };

        let mut ccs = entry.supported_ccs.clone();
        if !entry.controlled_ccs.is_empty() {
            ccs.push(COMMAND_CLASS_MARK);
            ccs.extend_from_slice(&entry.controlled_ccs);
        }
        if ccs.len() > SUC_UPDATE_NODEPARM_MAX {
            return Err(NvmError::InvalidJson(format!(
                "SUC update entry for node {} lists too many command classes",
                entry.node_id
            )));
        }

        bytes[0] = entry.node_id;
        bytes[1] = entry.change_type;
        bytes[2..2 + ccs.len()].copy_from_slice(&ccs);
        Ok(bytes)
    }
}

/// Decodes a node bitmask into ascending node IDs
pub fn parse_node_mask(mask: &[u8]) -> Vec<u8> {
    mask.iter()
        .take(NUM_NODEMASK_BYTES)
        .enumerate()
        .flat_map(|(byte, &bits)| {
            (0..8u8)
                .filter(move |bit| bits & (1 << bit) != 0)
                .map(move |bit| byte as u8 * 8 + bit + 1)
        })
        .collect()
}

pub fn encode_node_mask(node_ids: &[u8]) -> Result<[u8; NUM_NODEMASK_BYTES]> {
    let mut mask = [0u8; NUM_NODEMASK_BYTES];
    for &node_id in node_ids {
        if node_id == 0 || node_id > MAX_NODES {
            return Err(NvmError::InvalidJson(format!(
                "Node ID {} is out of range",
                node_id
            )));
        }
        let index = (node_id - 1) as usize;
        mask[index / 8] |= 1 << (index % 8);
    }
    Ok(mask)
}

/// Parses a home ID of the form "0x1234abcd"
pub fn parse_home_id(home_id: &str) -> Result<[u8; 4]> {
    let digits = home_id
        .strip_prefix("0x")
        .filter(|digits| digits.len() == 8)
        .ok_or_else(|| NvmError::InvalidJson(format!("Invalid home ID \"{}\"", home_id)))?;
    let mut bytes = [0u8; 4];
    hex::decode_to_slice(digits, &mut bytes)
        .map_err(|_| NvmError::InvalidJson(format!("Invalid home ID \"{}\"", home_id)))?;
    Ok(bytes)
}

pub fn format_home_id(bytes: [u8; 4]) -> String {
    format!("0x{}", hex::encode(bytes))
}

/// Everything the controller knows about one node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeRecord {
    pub is_virtual: bool,
    #[serde(flatten)]
    pub info: NodeProtocolInfo,
    pub neighbors: Vec<u8>,
    pub suc_update_index: u8,
    pub app_route_lock: bool,
    #[serde(rename = "routeSlaveSUC")]
    pub route_slave_suc: bool,
    #[serde(rename = "sucPendingUpdate")]
    pub suc_pending_update: bool,
    pub pending_discovery: bool,
    pub lwr: Option<Route>,
    pub nlwr: Option<Route>,
}

/// A node without protocol info that only exists as a virtual node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VirtualNodeMarker {
    pub is_virtual: bool,
}

/// Entry of the `nodes` map of a structured document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum NodeJson {
    Full(Box<NodeRecord>),
    Virtual(VirtualNodeMarker),
}

impl NodeJson {
    pub fn virtual_marker() -> Self {
        NodeJson::Virtual(VirtualNodeMarker { is_virtual: true })
    }

    pub fn is_virtual(&self) -> bool {
        match self {
            NodeJson::Full(record) => record.is_virtual,
            NodeJson::Virtual(marker) => marker.is_virtual,
        }
    }

    pub fn as_record(&self) -> Option<&NodeRecord> {
        match self {
            NodeJson::Full(record) => Some(record.as_ref()),
            NodeJson::Virtual(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_info() -> NodeProtocolInfo {
        NodeProtocolInfo {
            is_listening: false,
            is_frequent_listening: Some(Beam::Ms1000),
            is_routing: true,
            supported_data_rates: vec![9600, 40000, 100000],
            protocol_version: 3,
            optional_functionality: true,
            node_type: NodeType::EndNode,
            supports_security: true,
            supports_beaming: true,
            generic_device_class: 0x08,
            specific_device_class: Some(0x06),
        }
    }

    #[test]
    fn test_protocol_info_roundtrip() {
        let info = sample_info();
        let decoded = NodeProtocolInfo::parse(info.encode(), 0x08, 0x06);
        assert_eq!(decoded, info);
    }

    #[test]
    fn test_missing_specific_class() {
        let mut info = sample_info();
        info.specific_device_class = None;
        let decoded = NodeProtocolInfo::parse(info.encode(), 0x08, 0x99);
        assert_eq!(decoded.specific_device_class, None);
    }

    #[test]
    fn test_route_roundtrip() {
        let route = Route {
            beaming: Some(Beam::Ms250),
            protocol_rate: 3,
            repeater_node_ids: vec![4, 9],
        };
        let bytes = Route::encode(Some(&route)).unwrap();
        assert_eq!(bytes, [4, 9, 0, 0, 0b0010_0011]);
        assert_eq!(Route::parse(&bytes), Some(route));
        assert_eq!(Route::parse(&[0; 5]), None);
    }

    #[test]
    fn test_route_with_too_many_repeaters() {
        let route = Route {
            beaming: None,
            protocol_rate: 1,
            repeater_node_ids: vec![1, 2, 3, 4, 5],
        };
        assert!(matches!(Route::encode(Some(&route)), Err(NvmError::InvalidJson(_))));
    }

    #[test]
    fn test_suc_update_entry() -> Result<()> {
        let entry = SucUpdateEntry {
            node_id: 5,
            change_type: 1,
            supported_ccs: vec![0x20, 0x25, 0x86],
            controlled_ccs: vec![0x26],
        };
        let bytes = SucUpdateEntry::encode(Some(&entry))?;
        assert_eq!(&bytes[..7], &[5, 1, 0x20, 0x25, 0x86, 0xef, 0x26]);
        assert_eq!(SucUpdateEntry::parse(&bytes)?, Some(entry));
        assert_eq!(SucUpdateEntry::parse(&[0; 22])?, None);
        Ok(())
    }

    #[test]
    fn test_node_mask() -> Result<()> {
        let mask = encode_node_mask(&[1, 8, 9, 232])?;
        assert_eq!(mask[0], 0b1000_0001);
        assert_eq!(mask[1], 0b0000_0001);
        assert_eq!(mask[28], 0b1000_0000);
        assert_eq!(parse_node_mask(&mask), vec![1, 8, 9, 232]);
        assert!(encode_node_mask(&[0]).is_err());
        assert!(encode_node_mask(&[233]).is_err());
        Ok(())
    }

    #[test]
    fn test_home_id() -> Result<()> {
        let bytes = parse_home_id("0xc0ffee01")?;
        assert_eq!(bytes, [0xc0, 0xff, 0xee, 0x01]);
        assert_eq!(format_home_id(bytes), "0xc0ffee01");
        assert!(parse_home_id("c0ffee01").is_err());
        assert!(parse_home_id("0xc0ffee").is_err());
        assert!(parse_home_id("0xzzzzzzzz").is_err());
        Ok(())
    }

    #[test]
    fn test_node_json_shapes() {
        let virtual_node: NodeJson = serde_json::from_str(r#"{"isVirtual":true}"#).unwrap();
        assert_eq!(virtual_node, NodeJson::virtual_marker());

        let record = NodeRecord {
            is_virtual: false,
            info: sample_info(),
            neighbors: vec![1, 2],
            suc_update_index: 0,
            app_route_lock: false,
            route_slave_suc: true,
            suc_pending_update: false,
            pending_discovery: false,
            lwr: None,
            nlwr: None,
        };
        let full = NodeJson::Full(Box::new(record));
        let json = serde_json::to_value(&full).unwrap();
        assert_eq!(json["isFrequentListening"], "1000ms");
        assert_eq!(json["nodeType"], "End Node");
        let back: NodeJson = serde_json::from_value(json).unwrap();
        assert_eq!(back, full);
    }
}
