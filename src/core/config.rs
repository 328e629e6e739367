//! Conversion settings
//!
//! Settings can be built in code or loaded from a TOML file:
//!
//! ```toml
//! [encode]
//! page_size = 2048
//! device_family = 2047
//! write_size = "write16"
//! memory_mapped = true
//! # Only when the application region uses a different nominal page size
//! application_page_size = 32768
//!
//! [migrate]
//! truncate_application_data = true
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::json::NvmMeta;
use crate::nvm3::consts::{PageWriteSize, FLASH_MAX_PAGE_SIZE};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NvmConfig {
    pub encode: EncodeOptions,
    pub migrate: MigrateOptions,
}

impl NvmConfig {
    pub fn from_toml_str(source: &str) -> Result<Self> {
        Ok(toml::from_str(source)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let source = std::fs::read_to_string(path)?;
        Self::from_toml_str(&source)
    }
}

/// Physical parameters used when formatting NVM3 pages
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EncodeOptions {
    pub page_size: usize,
    pub device_family: u16,
    pub write_size: PageWriteSize,
    pub memory_mapped: bool,
    /// Nominal page size of the application region, `page_size` when unset
    pub application_page_size: Option<usize>,
}

impl Default for EncodeOptions {
    fn default() -> Self {
        EncodeOptions {
            page_size: FLASH_MAX_PAGE_SIZE,
            device_family: 2047,
            write_size: PageWriteSize::Write16,
            memory_mapped: true,
            application_page_size: None,
        }
    }
}

impl EncodeOptions {
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    pub fn with_device_family(mut self, device_family: u16) -> Self {
        self.device_family = device_family;
        self
    }

    pub fn with_write_size(mut self, write_size: PageWriteSize) -> Self {
        self.write_size = write_size;
        self
    }

    pub fn with_memory_mapped(mut self, memory_mapped: bool) -> Self {
        self.memory_mapped = memory_mapped;
        self
    }

    pub fn with_application_page_size(mut self, page_size: Option<usize>) -> Self {
        self.application_page_size = page_size;
        self
    }
}

impl From<&NvmMeta> for EncodeOptions {
    fn from(meta: &NvmMeta) -> Self {
        EncodeOptions {
            page_size: meta.page_size,
            device_family: meta.device_family,
            write_size: meta.write_size,
            memory_mapped: meta.memory_mapped,
            application_page_size: meta.application_page_size,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MigrateOptions {
    /// Cut 500-series application data down to the 512 bytes a 700-series
    /// controller can hold instead of failing
    pub truncate_application_data: bool,
}

impl Default for MigrateOptions {
    fn default() -> Self {
        MigrateOptions {
            truncate_application_data: true,
        }
    }
}

impl MigrateOptions {
    pub fn with_truncate_application_data(mut self, truncate: bool) -> Self {
        self.truncate_application_data = truncate;
        self
    }
}
