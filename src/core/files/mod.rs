//! Typed files stored in NVM3 objects
//!
//! Every object of a valid image holds one "file": a structured record
//! with a fixed binary layout. [`FileRegistry`] maps object keys to the
//! interpreter for that layout. Exact keys are looked up first, then the
//! key-range predicates in the order they were registered.

mod application;
mod controller_info;
mod node_info;
mod node_mask;
mod route_cache;
mod suc_update;
mod version;

use std::collections::{BTreeMap, HashMap};
use std::sync::OnceLock;

use semver::Version;
use tracing::debug;

use crate::error::{NvmError, Result};
use crate::nvm3::NvmObject;

pub use application::*;
pub use controller_info::*;
pub use node_info::*;
pub use node_mask::*;
pub use route_cache::*;
pub use suc_update::*;
pub use version::*;

/// Decoding and encoding of one file layout
///
/// Both directions are pure. `encode` assigns the object key itself.
pub trait NvmFileCodec: Sized {
    fn decode(object: &NvmObject, version: &Version) -> Result<Self>;
    fn encode(&self, version: &Version) -> Result<NvmObject>;
}

/// Extraction of a concrete file type from [`NvmFile`]
pub trait FileRecord: Sized {
    fn from_file(file: NvmFile) -> Option<Self>;
}

macro_rules! nvm_files {
    ($($variant:ident($file:ty)),* $(,)?) => {
        /// Any decoded file
        #[derive(Debug, Clone, PartialEq)]
        pub enum NvmFile {
            $($variant($file)),*
        }

        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum FileKind {
            $($variant),*
        }

        impl NvmFile {
            pub fn kind(&self) -> FileKind {
                match self {
                    $(NvmFile::$variant(_) => FileKind::$variant),*
                }
            }

            pub fn encode(&self, version: &Version) -> Result<NvmObject> {
                match self {
                    $(NvmFile::$variant(file) => file.encode(version)),*
                }
            }
        }

        $(
            impl From<$file> for NvmFile {
                fn from(file: $file) -> Self {
                    NvmFile::$variant(file)
                }
            }

            impl FileRecord for $file {
                fn from_file(file: NvmFile) -> Option<Self> {
                    match file {
                        NvmFile::$variant(file) => Some(file),
                        _ => None,
                    }
                }
            }
        )*
    };
}

nvm_files! {
    ProtocolVersion(ProtocolVersionFile),
    ApplicationVersion(ApplicationVersionFile),
    ApplicationType(ApplicationTypeFile),
    ApplicationCcs(ApplicationCcsFile),
    ApplicationRfConfig(ApplicationRfConfigFile),
    ApplicationData(ApplicationDataFile),
    ControllerInfo(ControllerInfoFile),
    PreferredRepeaters(PreferredRepeatersFile),
    NodeMask(NodeMaskFile),
    SucUpdateEntriesV0(SucUpdateEntriesFileV0),
    SucUpdateEntriesV5(SucUpdateEntriesFileV5),
    NodeInfoV0(NodeInfoFileV0),
    NodeInfoV1(NodeInfoFileV1),
    RouteCacheV0(RouteCacheFileV0),
    RouteCacheV1(RouteCacheFileV1),
}

type DecodeFn = fn(&NvmObject, &Version) -> Result<NvmFile>;

#[derive(Clone, Copy)]
struct Registration {
    kind: FileKind,
    decode: DecodeFn,
}

fn decode_as<T: NvmFileCodec + Into<NvmFile>>(object: &NvmObject, version: &Version) -> Result<NvmFile> {
    Ok(T::decode(object, version)?.into())
}

/// Lookup table from object keys to file interpreters
pub struct FileRegistry {
    exact: HashMap<u32, Registration>,
    ranges: Vec<(fn(u32) -> bool, Registration)>,
}

impl FileRegistry {
    fn new() -> Self {
        let mut registry = FileRegistry {
            exact: HashMap::new(),
            ranges: Vec::new(),
        };

        registry.register_key(PROTOCOL_VERSION_KEY, FileKind::ProtocolVersion, decode_as::<ProtocolVersionFile>);
        registry.register_key(
            APPLICATION_VERSION_KEY,
            FileKind::ApplicationVersion,
            decode_as::<ApplicationVersionFile>,
        );
        registry.register_key(APPLICATION_TYPE_KEY, FileKind::ApplicationType, decode_as::<ApplicationTypeFile>);
        registry.register_key(APPLICATION_CCS_KEY, FileKind::ApplicationCcs, decode_as::<ApplicationCcsFile>);
        registry.register_key(
            APPLICATION_RF_CONFIG_KEY,
            FileKind::ApplicationRfConfig,
            decode_as::<ApplicationRfConfigFile>,
        );
        registry.register_key(APPLICATION_DATA_KEY, FileKind::ApplicationData, decode_as::<ApplicationDataFile>);
        registry.register_key(CONTROLLER_INFO_KEY, FileKind::ControllerInfo, decode_as::<ControllerInfoFile>);
        registry.register_key(
            PREFERRED_REPEATERS_KEY,
            FileKind::PreferredRepeaters,
            decode_as::<PreferredRepeatersFile>,
        );
        for kind in NodeMaskKind::ALL {
            registry.register_key(kind.key(), FileKind::NodeMask, decode_as::<NodeMaskFile>);
        }
        registry.register_key(
            SUC_UPDATE_ENTRIES_V0_KEY,
            FileKind::SucUpdateEntriesV0,
            decode_as::<SucUpdateEntriesFileV0>,
        );

        registry.register_range(
            is_suc_update_entries_v5_key,
            FileKind::SucUpdateEntriesV5,
            decode_as::<SucUpdateEntriesFileV5>,
        );
        registry.register_range(is_node_info_v0_key, FileKind::NodeInfoV0, decode_as::<NodeInfoFileV0>);
        registry.register_range(is_node_info_v1_key, FileKind::NodeInfoV1, decode_as::<NodeInfoFileV1>);
        registry.register_range(is_route_cache_v0_key, FileKind::RouteCacheV0, decode_as::<RouteCacheFileV0>);
        registry.register_range(is_route_cache_v1_key, FileKind::RouteCacheV1, decode_as::<RouteCacheFileV1>);

        debug!(
            "File registry ready: {} exact keys, {} key ranges",
            registry.exact.len(),
            registry.ranges.len()
        );
        registry
    }

    fn register_key(&mut self, key: u32, kind: FileKind, decode: DecodeFn) {
        self.exact.insert(key, Registration { kind, decode });
    }

    fn register_range(&mut self, matches: fn(u32) -> bool, kind: FileKind, decode: DecodeFn) {
        self.ranges.push((matches, Registration { kind, decode }));
    }

    /// The process-wide registry, built on first use and immutable afterwards
    pub fn global() -> &'static FileRegistry {
        static REGISTRY: OnceLock<FileRegistry> = OnceLock::new();
        REGISTRY.get_or_init(FileRegistry::new)
    }

    fn lookup(&self, key: u32) -> Option<&Registration> {
        self.exact.get(&key).or_else(|| {
            self.ranges
                .iter()
                .find(|(matches, _)| matches(key))
                .map(|(_, registration)| registration)
        })
    }

    pub fn kind_of(&self, key: u32) -> Option<FileKind> {
        self.lookup(key).map(|registration| registration.kind)
    }

    /// Interprets an object, or returns `None` for keys without a known layout
    pub fn parse(&self, object: &NvmObject, version: &Version) -> Result<Option<NvmFile>> {
        self.lookup(object.key)
            .map(|registration| (registration.decode)(object, version))
            .transpose()
    }
}

/// Checks that an object carries at least `min_len` payload bytes
pub(crate) fn payload_of(object: &NvmObject, min_len: usize) -> Result<&[u8]> {
    let payload = object.payload()?;
    if payload.len() < min_len {
        return Err(NvmError::InvalidFormat(format!(
            "Object {:#07x} is too short: {} bytes, expected at least {}",
            object.key,
            payload.len(),
            min_len
        )));
    }
    Ok(payload)
}

/// Reads the file stored under `key`, if the object exists
pub fn read_file<T: FileRecord>(
    objects: &BTreeMap<u32, NvmObject>,
    key: u32,
    version: &Version,
) -> Result<Option<T>> {
    let Some(object) = objects.get(&key) else {
        return Ok(None);
    };
    let file = FileRegistry::global().parse(object, version)?.ok_or_else(|| {
        NvmError::InvalidFormat(format!("No file layout known for object {:#07x}", key))
    })?;
    T::from_file(file).map(Some).ok_or_else(|| {
        NvmError::InvalidFormat(format!("Object {:#07x} holds an unexpected file type", key))
    })
}

/// Like [`read_file`], but a missing object is an error
pub fn require_file<T: FileRecord>(
    objects: &BTreeMap<u32, NvmObject>,
    key: u32,
    version: &Version,
) -> Result<T> {
    read_file(objects, key, version)?.ok_or(NvmError::ObjectNotFound(key))
}
