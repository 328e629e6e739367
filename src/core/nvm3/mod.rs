//! NVM3 object store codec
//!
//! Layers, leaf first: Berger codes, objects, pages and whole images.

pub mod berger;
pub mod consts;
pub mod image;
pub mod object;
pub mod page;

pub use image::{encode_nvm, parse_nvm, read_pages, NvmImage};
pub use object::{
    compress_objects, fragment_large_object, read_object, read_objects, write_object, FragmentType,
    NvmObject, ObjectType,
};
pub use page::{NvmPage, PageHeader};
