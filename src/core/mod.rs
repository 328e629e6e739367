//! NVM engines: the NVM3 object store, the 500-series tables and the
//! migration between them

pub mod config;
pub mod error;
pub mod files;
pub mod json;
pub mod migrate;
pub mod nvm3;
pub mod nvm500;
pub mod protocol;
pub mod version;
