//! Node info files
//!
//! Format 0 stores one node per file, later formats pack four nodes into
//! each file. Unused slots are zero-filled.

use semver::Version;

use super::{payload_of, NvmFileCodec};
use crate::error::{NvmError, Result};
use crate::nvm3::NvmObject;
use crate::protocol::{encode_node_mask, parse_node_mask, NodeProtocolInfo, MAX_NODES, NUM_NODEMASK_BYTES};

pub const NODE_INFO_V0_BASE_KEY: u32 = 0x50100;
pub const NODE_INFO_V1_BASE_KEY: u32 = 0x50200;
pub const NODE_INFOS_PER_FILE_V1: usize = 4;
pub const NODE_INFO_SIZE: usize = 5 + NUM_NODEMASK_BYTES + 1;

const NODE_INFO_V1_FILES: u32 = MAX_NODES as u32 / NODE_INFOS_PER_FILE_V1 as u32;

pub fn node_info_v0_key(node_id: u8) -> u32 {
    NODE_INFO_V0_BASE_KEY + u32::from(node_id) - 1
}

pub fn node_info_v1_key(node_id: u8) -> u32 {
    NODE_INFO_V1_BASE_KEY + (u32::from(node_id) - 1) / NODE_INFOS_PER_FILE_V1 as u32
}

pub fn is_node_info_v0_key(key: u32) -> bool {
    (NODE_INFO_V0_BASE_KEY..NODE_INFO_V0_BASE_KEY + u32::from(MAX_NODES)).contains(&key)
}

pub fn is_node_info_v1_key(key: u32) -> bool {
    (NODE_INFO_V1_BASE_KEY..NODE_INFO_V1_BASE_KEY + NODE_INFO_V1_FILES).contains(&key)
}

/// One node table entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeInfo {
    pub node_id: u8,
    pub info: NodeProtocolInfo,
    pub neighbors: Vec<u8>,
    pub suc_update_index: u8,
}

impl NodeInfo {
    fn parse(node_id: u8, bytes: &[u8]) -> Self {
        let info = NodeProtocolInfo::parse([bytes[0], bytes[1], bytes[2]], bytes[3], bytes[4]);
        NodeInfo {
            node_id,
            info,
            neighbors: parse_node_mask(&bytes[5..5 + NUM_NODEMASK_BYTES]),
            suc_update_index: bytes[NODE_INFO_SIZE - 1],
        }
    }

    fn encode(&self) -> Result<[u8; NODE_INFO_SIZE]> {
        let mut bytes = [0u8; NODE_INFO_SIZE];
        bytes[..3].copy_from_slice(&self.info.encode());
        bytes[3] = self.info.generic_device_class;
        bytes[4] = self.info.specific_device_class.unwrap_or_default();
        bytes[5..5 + NUM_NODEMASK_BYTES].copy_from_slice(&encode_node_mask(&self.neighbors)?);
        bytes[NODE_INFO_SIZE - 1] = self.suc_update_index;
        Ok(bytes)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeInfoFileV0 {
    pub node_info: NodeInfo,
}

impl NvmFileCodec for NodeInfoFileV0 {
    fn decode(object: &NvmObject, _version: &Version) -> Result<Self> {
        if !is_node_info_v0_key(object.key) {
            return Err(NvmError::InvalidFormat(format!(
                "Object {:#07x} is not a node info file",
                object.key
            )));
        }
        let node_id = (object.key - NODE_INFO_V0_BASE_KEY + 1) as u8;
        let payload = payload_of(object, NODE_INFO_SIZE)?;
        Ok(NodeInfoFileV0 {
            node_info: NodeInfo::parse(node_id, payload),
        })
    }

    fn encode(&self, _version: &Version) -> Result<NvmObject> {
        let bytes = self.node_info.encode()?;
        Ok(NvmObject::data(node_info_v0_key(self.node_info.node_id), bytes.to_vec()))
    }
}

/// Up to four node table entries sharing one file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeInfoFileV1 {
    pub node_infos: Vec<NodeInfo>,
}

impl NvmFileCodec for NodeInfoFileV1 {
    fn decode(object: &NvmObject, _version: &Version) -> Result<Self> {
        if !is_node_info_v1_key(object.key) {
            return Err(NvmError::InvalidFormat(format!(
                "Object {:#07x} is not a node info file",
                object.key
            )));
        }
        let first_node_id = (object.key - NODE_INFO_V1_BASE_KEY) as usize * NODE_INFOS_PER_FILE_V1 + 1;
        let payload = payload_of(object, NODE_INFO_SIZE * NODE_INFOS_PER_FILE_V1)?;

        let node_infos = payload
            .chunks_exact(NODE_INFO_SIZE)
            .take(NODE_INFOS_PER_FILE_V1)
            .enumerate()
            .filter(|(_, slot)| slot.iter().any(|&b| b != 0))
            .map(|(i, slot)| NodeInfo::parse((first_node_id + i) as u8, slot))
            .collect();
        Ok(NodeInfoFileV1 { node_infos })
    }

    fn encode(&self, _version: &Version) -> Result<NvmObject> {
        let first = self.node_infos.first().ok_or_else(|| {
            NvmError::InvalidJson("Node info file without node infos".to_string())
        })?;
        let key = node_info_v1_key(first.node_id);
        let first_node_id = (key - NODE_INFO_V1_BASE_KEY) as usize * NODE_INFOS_PER_FILE_V1 + 1;

        let mut payload = vec![0u8; NODE_INFO_SIZE * NODE_INFOS_PER_FILE_V1];
        for node_info in &self.node_infos {
            if node_info_v1_key(node_info.node_id) != key {
                return Err(NvmError::InvalidJson(format!(
                    "Node {} does not belong in node info file {:#07x}",
                    node_info.node_id, key
                )));
            }
            let start = (node_info.node_id as usize - first_node_id) * NODE_INFO_SIZE;
            payload[start..start + NODE_INFO_SIZE].copy_from_slice(&node_info.encode()?);
        }
        Ok(NvmObject::data(key, payload))
    }
}
