//! # nvmedit - Z-Wave controller NVM editing
//!
//! `nvmedit-rs` reads, writes and migrates the non-volatile memory of Z-Wave
//! controllers:
//!
//! - **NVM3 images** (700/800 series): a wear-leveled object store in flash
//!   pages, decoded into a JSON document and encoded back for any supported
//!   protocol version
//! - **500-series NVMs**: fixed tables, detected by trying every known layout
//! - **Migration**: moving a network from one controller's NVM into the
//!   format another controller expects, across series if needed
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use nvmedit_rs::{NvmDocument, Result};
//!
//! # fn main() -> Result<()> {
//! let image = std::fs::read("backup.bin")?;
//!
//! // Decode either series
//! let document = NvmDocument::from_bytes(&image)?;
//! println!("{}", document.to_json_string()?);
//!
//! // Write it back for a newer firmware
//! let upgraded = document.to_bytes("7.21.0")?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Migration
//!
//! ```rust,no_run
//! use nvmedit_rs::{migrate_nvm_with_options, MigrateOptions, Result};
//!
//! # fn main() -> Result<()> {
//! let source = std::fs::read("old-controller.bin")?;
//! let target = std::fs::read("new-controller.bin")?;
//!
//! let options = MigrateOptions::default().with_truncate_application_data(false);
//! let migrated = migrate_nvm_with_options(&source, &target, &options)?;
//! std::fs::write("migrated.bin", migrated)?;
//! # Ok(())
//! # }
//! ```

pub mod core;

// Re-export core modules internally so crate:: paths in core still work
#[allow(unused_imports)]
pub(crate) use core::{config, error, files, json, migrate, nvm3, nvm500, protocol, version};

// Re-export core types that users need
pub use crate::core::{
    config::{EncodeOptions, MigrateOptions, NvmConfig},
    error::{NvmError, Result},
    json::{json_to_nvm, json_to_nvm_with_options, nvm_to_json, ControllerJson, NvmJson, NvmMeta},
    migrate::{classify_nvm, json500_to_700, json700_to_500, migrate_nvm, migrate_nvm_with_options, ParsedNvm},
    nvm3::{parse_nvm, NvmImage, NvmObject},
    nvm500::{json_to_nvm500, nvm500_to_json, Library, NvmJson500},
    protocol::{NodeJson, NodeRecord},
};

use serde::Serialize;
use tracing::debug;

use crate::nvm500::FORMAT_500;

/// A decoded NVM of either series
///
/// # Examples
///
/// ```rust,no_run
/// use nvmedit_rs::NvmDocument;
///
/// # fn main() -> nvmedit_rs::Result<()> {
/// let json = std::fs::read_to_string("backup.json")?;
/// let document = NvmDocument::from_json_str(&json)?;
///
/// for node_id in document.node_ids() {
///     println!("node {}", node_id);
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum NvmDocument {
    Nvm3(NvmJson),
    Nvm500(NvmJson500),
}

impl NvmDocument {
    /// Decodes a binary NVM of either series
    pub fn from_bytes(buffer: &[u8]) -> Result<Self> {
        match classify_nvm(buffer)? {
            ParsedNvm::Nvm3(json) => Ok(NvmDocument::Nvm3(json)),
            ParsedNvm::Nvm500(json) => Ok(NvmDocument::Nvm500(json)),
            ParsedNvm::Unknown { format } => Err(NvmError::NotSupported {
                reason: format!("Protocol file format {} cannot be decoded", format),
                protocol_file_format: Some(format),
            }),
        }
    }

    /// Parses a JSON document, telling the series apart by its `format`
    pub fn from_json_str(source: &str) -> Result<Self> {
        let value: serde_json::Value = serde_json::from_str(source)?;
        let format = value
            .get("format")
            .and_then(|format| format.as_u64())
            .ok_or_else(|| NvmError::InvalidJson("Missing numeric \"format\"".to_string()))?;
        debug!("Parsing NVM document with format {}", format);

        if format == u64::from(FORMAT_500) {
            Ok(NvmDocument::Nvm500(serde_json::from_value(value)?))
        } else {
            Ok(NvmDocument::Nvm3(serde_json::from_value(value)?))
        }
    }

    pub fn to_json_string(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Encodes the document for a controller running `protocol_version`
    pub fn to_bytes(&self, protocol_version: &str) -> Result<Vec<u8>> {
        match self {
            NvmDocument::Nvm3(json) => json_to_nvm(json, protocol_version),
            NvmDocument::Nvm500(json) => json_to_nvm500(json, protocol_version),
        }
    }

    pub fn protocol_version(&self) -> &str {
        match self {
            NvmDocument::Nvm3(json) => &json.controller.protocol_version,
            NvmDocument::Nvm500(json) => &json.controller.protocol_version,
        }
    }

    /// IDs of all nodes in the network, virtual ones included
    pub fn node_ids(&self) -> Vec<u8> {
        let nodes = match self {
            NvmDocument::Nvm3(json) => &json.nodes,
            NvmDocument::Nvm500(json) => &json.nodes,
        };
        nodes.keys().copied().collect()
    }
}

impl From<NvmJson> for NvmDocument {
    fn from(json: NvmJson) -> Self {
        NvmDocument::Nvm3(json)
    }
}

impl From<NvmJson500> for NvmDocument {
    fn from(json: NvmJson500) -> Self {
        NvmDocument::Nvm500(json)
    }
}
