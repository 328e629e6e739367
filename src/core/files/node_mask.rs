use semver::Version;

use super::{payload_of, NvmFileCodec};
use crate::error::{NvmError, Result};
use crate::nvm3::NvmObject;
use crate::protocol::{encode_node_mask, parse_node_mask, NUM_NODEMASK_BYTES};

pub const PREFERRED_REPEATERS_KEY: u32 = 0x50002;

/// The per-node flag bitmasks of the protocol region
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeMaskKind {
    NodeList,
    AppRouteLock,
    RouteSlaveSuc,
    SucPendingUpdate,
    VirtualNodes,
    PendingDiscovery,
    RouteCacheExists,
}

impl NodeMaskKind {
    pub const ALL: [NodeMaskKind; 7] = [
        NodeMaskKind::NodeList,
        NodeMaskKind::AppRouteLock,
        NodeMaskKind::RouteSlaveSuc,
        NodeMaskKind::SucPendingUpdate,
        NodeMaskKind::VirtualNodes,
        NodeMaskKind::PendingDiscovery,
        NodeMaskKind::RouteCacheExists,
    ];

    pub fn key(self) -> u32 {
        match self {
            NodeMaskKind::NodeList => 0x50005,
            NodeMaskKind::AppRouteLock => 0x50006,
            NodeMaskKind::RouteSlaveSuc => 0x50007,
            NodeMaskKind::SucPendingUpdate => 0x50008,
            NodeMaskKind::VirtualNodes => 0x50009,
            NodeMaskKind::PendingDiscovery => 0x5000a,
            NodeMaskKind::RouteCacheExists => 0x5000b,
        }
    }

    pub fn from_key(key: u32) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.key() == key)
    }
}

/// A set of node IDs stored as a 29-byte bitmask
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeMaskFile {
    pub kind: NodeMaskKind,
    pub node_ids: Vec<u8>,
}

impl NodeMaskFile {
    pub fn new(kind: NodeMaskKind, node_ids: Vec<u8>) -> Self {
        NodeMaskFile { kind, node_ids }
    }
}

impl NvmFileCodec for NodeMaskFile {
    fn decode(object: &NvmObject, _version: &Version) -> Result<Self> {
        let kind = NodeMaskKind::from_key(object.key).ok_or_else(|| {
            NvmError::InvalidFormat(format!("Object {:#07x} is not a node mask", object.key))
        })?;
        let payload = payload_of(object, NUM_NODEMASK_BYTES)?;
        Ok(NodeMaskFile::new(kind, parse_node_mask(payload)))
    }

    fn encode(&self, _version: &Version) -> Result<NvmObject> {
        let mask = encode_node_mask(&self.node_ids)?;
        Ok(NvmObject::data(self.kind.key(), mask.to_vec()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreferredRepeatersFile {
    pub node_ids: Vec<u8>,
}

impl NvmFileCodec for PreferredRepeatersFile {
    fn decode(object: &NvmObject, _version: &Version) -> Result<Self> {
        let payload = payload_of(object, NUM_NODEMASK_BYTES)?;
        Ok(PreferredRepeatersFile {
            node_ids: parse_node_mask(payload),
        })
    }

    fn encode(&self, _version: &Version) -> Result<NvmObject> {
        let mask = encode_node_mask(&self.node_ids)?;
        Ok(NvmObject::data(PREFERRED_REPEATERS_KEY, mask.to_vec()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mask_kind_keys() {
        for kind in NodeMaskKind::ALL {
            assert_eq!(NodeMaskKind::from_key(kind.key()), Some(kind));
        }
        assert_eq!(NodeMaskKind::from_key(0x50004), None);
    }

    #[test]
    fn test_node_mask_file() -> Result<()> {
        let version = Version::new(7, 16, 0);
        let file = NodeMaskFile::new(NodeMaskKind::VirtualNodes, vec![2, 5, 200]);
        let object = file.encode(&version)?;
        assert_eq!(object.key, 0x50009);
        assert_eq!(object.payload()?.len(), NUM_NODEMASK_BYTES);
        assert_eq!(NodeMaskFile::decode(&object, &version)?, file);
        Ok(())
    }

    #[test]
    fn test_wrong_key_is_rejected() {
        let object = NvmObject::data(0x50004, vec![0; NUM_NODEMASK_BYTES]);
        assert!(NodeMaskFile::decode(&object, &Version::new(7, 0, 0)).is_err());
    }
}
