//! Fixed-offset table layouts of 500-series controller NVMs
//!
//! A layout is an ordered list of typed fields. Multi-byte values are
//! big-endian. The table is split into modules: each module starts with a
//! size marker and ends with a 5-byte descriptor located `size - 5` bytes
//! after the marker.

use std::sync::OnceLock;

use serde::{Deserialize, Serialize};

use crate::protocol::{MAX_NODES, NUM_NODEMASK_BYTES, ROUTE_SIZE, SUC_MAX_UPDATES, SUC_UPDATE_ENTRY_SIZE};

pub const NODE_INFO_500_SIZE: usize = 6;
pub const MODULE_DESCRIPTOR_SIZE: usize = 5;
pub const NVM_DESCRIPTOR_SIZE: usize = 12;

pub const APPLICATION_DATA_SIZE: usize = 2048;
pub const COMMAND_CLASSES_SIZE: usize = 35;
pub const POWER_LEVELS: usize = 14;

pub const CONFIGURATION_VALID_0: u8 = 0x54;
pub const CONFIGURATION_VALID_1: u8 = 0xa5;
pub const ROUTE_CACHE_MAGIC: u8 = 0x4e;
pub const EEOFFSET_MAGIC: u8 = 0x42;
pub const MODULE_END_MARKER: u16 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ModuleType {
    Undefined = 0x00,
    Protocol = 0x01,
    Application = 0x02,
    HostApplication = 0x04,
    Descriptor = 0x80,
}

impl ModuleType {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x00 => Some(ModuleType::Undefined),
            0x01 => Some(ModuleType::Protocol),
            0x02 => Some(ModuleType::Application),
            0x04 => Some(ModuleType::HostApplication),
            0x80 => Some(ModuleType::Descriptor),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryType {
    Byte,
    Word,
    DWord,
    Buffer(usize),
    /// capability, security, reserved, basic, generic, specific
    NodeInfo,
    NodeMask,
    SucUpdateEntry,
    Route,
    ModuleSize,
    ModuleDescriptor(ModuleType),
    NvmDescriptor,
}

impl EntryType {
    pub fn size(self) -> usize {
        match self {
            EntryType::Byte => 1,
            EntryType::Word | EntryType::ModuleSize => 2,
            EntryType::DWord => 4,
            EntryType::Buffer(len) => len,
            EntryType::NodeInfo => NODE_INFO_500_SIZE,
            EntryType::NodeMask => NUM_NODEMASK_BYTES,
            EntryType::SucUpdateEntry => SUC_UPDATE_ENTRY_SIZE,
            EntryType::Route => ROUTE_SIZE,
            EntryType::ModuleDescriptor(_) => MODULE_DESCRIPTOR_SIZE,
            EntryType::NvmDescriptor => NVM_DESCRIPTOR_SIZE,
        }
    }
}

/// Names of all fields any layout may contain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Field {
    NvmTotalEnd,
    NvmProtocolSize,
    OwnHomeId,
    LearnedHomeId,
    NodeId,
    ConfigurationValid0,
    ConfigurationValid1,
    ProtocolReserved,
    PreferredRepeaters,
    PendingDiscovery,
    NodeTable,
    RoutingTable,
    LastNodeId,
    StaticControllerNodeId,
    SucLastIndex,
    SucUpdateEntries,
    ControllerConfiguration,
    MaxNodeId,
    ReservedId,
    SystemState,
    RouteCacheLwr,
    RouteCacheNlwr,
    RouteCacheMagic,
    AppRouteLock,
    RouteSlaveSuc,
    SucUpdateIndex,
    SucPendingUpdate,
    VirtualNodes,
    EeoffsetMagic,
    ProtocolModuleDescriptor,

    NvmApplicationSize,
    WatchdogStarted,
    PowerLevelNormal,
    PowerLevelLow,
    PowerMode,
    PowerModeExtintEnable,
    PowerModeWutTimeout,
    CommandClassCount,
    CommandClasses,
    ApplicationData,
    ApplicationModuleDescriptor,

    NvmDescriptorSize,
    NvmDescriptor,
    NvmDescriptorModuleDescriptor,
    NvmModuleEndMarker,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NvmEntry {
    pub field: Field,
    pub entry_type: EntryType,
    pub count: usize,
    /// Expected absolute offset, checked while parsing and encoding
    pub offset: Option<usize>,
}

impl NvmEntry {
    const fn new(field: Field, entry_type: EntryType) -> Self {
        NvmEntry {
            field,
            entry_type,
            count: 1,
            offset: None,
        }
    }

    const fn at(self, offset: usize) -> Self {
        NvmEntry {
            offset: Some(offset),
            ..self
        }
    }

    const fn times(self, count: usize) -> Self {
        NvmEntry { count, ..self }
    }
}

/// Controller library a firmware was built with
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Library {
    #[default]
    Static,
    Bridge,
}

#[derive(Debug, Clone)]
pub struct Nvm500Layout {
    pub name: &'static str,
    pub library: Library,
    /// Protocol versions ("major.minor") this layout is known for
    pub protocol_versions: &'static [&'static str],
    pub entries: Vec<NvmEntry>,
}

impl Nvm500Layout {
    pub fn has_field(&self, field: Field) -> bool {
        self.entries.iter().any(|entry| entry.field == field)
    }

    pub fn supports_protocol_version(&self, version: &str) -> bool {
        self.protocol_versions.contains(&version)
    }
}

const PROTOCOL_VERSIONS_6_6X: &[&str] = &["4.33", "4.62"];
const PROTOCOL_VERSIONS_6_8X: &[&str] = &[
    "6.01", "6.02", "6.03", "6.04", "6.05", "6.06", "6.07", "6.08", "6.09", "6.10",
];

fn protocol_module(library: Library) -> Vec<NvmEntry> {
    use EntryType::*;
    use Field::*;

    let nodes = MAX_NODES as usize;
    let mut entries = vec![
        NvmEntry::new(NvmTotalEnd, Word).at(0),
        NvmEntry::new(NvmProtocolSize, ModuleSize).at(2),
        NvmEntry::new(OwnHomeId, DWord).at(4),
        NvmEntry::new(LearnedHomeId, DWord).at(8),
        NvmEntry::new(NodeId, Byte).at(12),
        NvmEntry::new(ConfigurationValid0, Byte).at(13),
        NvmEntry::new(ConfigurationValid1, Byte).at(14),
        NvmEntry::new(ProtocolReserved, Buffer(1)).at(15),
        NvmEntry::new(PreferredRepeaters, NodeMask).at(16),
        NvmEntry::new(PendingDiscovery, NodeMask).at(45),
        NvmEntry::new(NodeTable, NodeInfo).times(nodes).at(74),
        NvmEntry::new(RoutingTable, NodeMask).times(nodes).at(1466),
        NvmEntry::new(LastNodeId, Byte).at(8194),
        NvmEntry::new(StaticControllerNodeId, Byte),
        NvmEntry::new(SucLastIndex, Byte),
        NvmEntry::new(SucUpdateEntries, SucUpdateEntry).times(SUC_MAX_UPDATES),
        NvmEntry::new(ControllerConfiguration, Byte),
        NvmEntry::new(MaxNodeId, Byte),
        NvmEntry::new(ReservedId, Byte),
        NvmEntry::new(SystemState, Byte),
        NvmEntry::new(RouteCacheLwr, Route).times(nodes),
        NvmEntry::new(RouteCacheNlwr, Route).times(nodes),
        NvmEntry::new(RouteCacheMagic, Byte),
        NvmEntry::new(AppRouteLock, NodeMask),
        NvmEntry::new(RouteSlaveSuc, NodeMask),
        NvmEntry::new(SucUpdateIndex, Byte).times(nodes),
        NvmEntry::new(SucPendingUpdate, NodeMask),
    ];
    if library == Library::Bridge {
        entries.push(NvmEntry::new(VirtualNodes, NodeMask));
    }
    entries.push(NvmEntry::new(EeoffsetMagic, Byte));
    entries.push(NvmEntry::new(ProtocolModuleDescriptor, ModuleDescriptor(ModuleType::Protocol)));
    entries
}

fn application_module(with_watchdog: bool) -> Vec<NvmEntry> {
    use EntryType::*;
    use Field::*;

    let mut entries = vec![NvmEntry::new(NvmApplicationSize, ModuleSize)];
    if with_watchdog {
        entries.push(NvmEntry::new(WatchdogStarted, Byte));
    }
    entries.extend([
        NvmEntry::new(PowerLevelNormal, Buffer(POWER_LEVELS)),
        NvmEntry::new(PowerLevelLow, Buffer(POWER_LEVELS)),
        NvmEntry::new(PowerMode, Byte),
        NvmEntry::new(PowerModeExtintEnable, Byte),
        NvmEntry::new(PowerModeWutTimeout, DWord),
        NvmEntry::new(CommandClassCount, Byte),
        NvmEntry::new(CommandClasses, Buffer(COMMAND_CLASSES_SIZE)),
        NvmEntry::new(ApplicationData, Buffer(APPLICATION_DATA_SIZE)),
        NvmEntry::new(ApplicationModuleDescriptor, ModuleDescriptor(ModuleType::Application)),
    ]);
    entries
}

fn descriptor_module() -> Vec<NvmEntry> {
    use EntryType::*;
    use Field::*;

    vec![
        NvmEntry::new(NvmDescriptorSize, ModuleSize),
        NvmEntry::new(Field::NvmDescriptor, EntryType::NvmDescriptor),
        NvmEntry::new(NvmDescriptorModuleDescriptor, ModuleDescriptor(ModuleType::Descriptor)),
        NvmEntry::new(NvmModuleEndMarker, Word),
    ]
}

fn layout(
    name: &'static str,
    library: Library,
    protocol_versions: &'static [&'static str],
    with_watchdog: bool,
) -> Nvm500Layout {
    let mut entries = protocol_module(library);
    entries.extend(application_module(with_watchdog));
    entries.extend(descriptor_module());
    Nvm500Layout {
        name,
        library,
        protocol_versions,
        entries,
    }
}

/// All known layouts, in the order they are probed
pub fn layouts() -> &'static [Nvm500Layout] {
    static LAYOUTS: OnceLock<Vec<Nvm500Layout>> = OnceLock::new();
    LAYOUTS.get_or_init(|| {
        vec![
            layout("Bridge 6.8x", Library::Bridge, PROTOCOL_VERSIONS_6_8X, true),
            layout("Static 6.8x", Library::Static, PROTOCOL_VERSIONS_6_8X, true),
            layout("Bridge 6.6x", Library::Bridge, PROTOCOL_VERSIONS_6_6X, false),
            layout("Static 6.6x", Library::Static, PROTOCOL_VERSIONS_6_6X, false),
        ]
    })
}

/// The layout to encode a given library and protocol version with
pub fn find_layout(library: Library, protocol_version: &str) -> Option<&'static Nvm500Layout> {
    layouts()
        .iter()
        .find(|layout| layout.library == library && layout.supports_protocol_version(protocol_version))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn offsets(layout: &Nvm500Layout) -> Vec<(Field, usize)> {
        let mut offset = 0;
        layout
            .entries
            .iter()
            .map(|entry| {
                let start = offset;
                offset += entry.entry_type.size() * entry.count;
                (entry.field, start)
            })
            .collect()
    }

    #[test]
    fn test_fixed_offsets_are_consistent() {
        for layout in layouts() {
            let actual = offsets(layout);
            for (entry, (_, offset)) in layout.entries.iter().zip(&actual) {
                if let Some(expected) = entry.offset {
                    assert_eq!(*offset, expected, "{} {:?}", layout.name, entry.field);
                }
            }
        }
    }

    #[test]
    fn test_layout_variants() {
        let all = layouts();
        assert_eq!(all.len(), 4);
        assert!(all[0].has_field(Field::VirtualNodes));
        assert!(all[0].has_field(Field::WatchdogStarted));
        assert!(!all[1].has_field(Field::VirtualNodes));
        assert!(!all[3].has_field(Field::WatchdogStarted));
    }

    #[test]
    fn test_find_layout() {
        assert_eq!(find_layout(Library::Static, "6.07").map(|l| l.name), Some("Static 6.8x"));
        assert_eq!(find_layout(Library::Bridge, "4.62").map(|l| l.name), Some("Bridge 6.6x"));
        assert!(find_layout(Library::Static, "5.02").is_none());
    }

    #[test]
    fn test_module_type_values() {
        for module_type in [
            ModuleType::Undefined,
            ModuleType::Protocol,
            ModuleType::Application,
            ModuleType::HostApplication,
            ModuleType::Descriptor,
        ] {
            assert_eq!(ModuleType::from_u8(module_type as u8), Some(module_type));
        }
        assert_eq!(ModuleType::from_u8(0x03), None);
    }
}
