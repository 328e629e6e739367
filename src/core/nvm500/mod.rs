//! 500-series controller NVM
//!
//! The 500 series stores everything in a flat table. Which table it is can
//! only be told by parsing with every known layout and checking the magic
//! bytes afterwards.

pub mod encoder;
pub mod json;
pub mod layout;
pub mod parser;

pub use encoder::encode_nvm500;
pub use json::{
    json_to_nvm500, nvm500_to_json, Controller500Json, NvmJson500, NvmJson500Meta, Rf500Config, FORMAT_500,
};
pub use layout::{find_layout, layouts, Field, Library, Nvm500Layout};
pub use parser::{is_valid, parse_nvm500, EntryValue, Nvm500Values};
