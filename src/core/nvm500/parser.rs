use std::collections::BTreeMap;

use tracing::debug;

use super::layout::*;
use crate::error::{NvmError, Result};
use crate::protocol::{parse_node_mask, NodeProtocolInfo, Route, SucUpdateEntry};

/// Trailing 5-byte record of a module
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModuleDescriptor {
    pub size: u16,
    pub module_type: ModuleType,
    pub version: u16,
}

/// Product identification and firmware versions
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NvmDescriptor {
    pub manufacturer_id: u16,
    pub firmware_id: u16,
    pub product_type: u16,
    pub product_id: u16,
    pub application_version: (u8, u8),
    pub protocol_version: (u8, u8),
}

/// Decoded value of one table entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryValue {
    Byte(u8),
    Word(u16),
    DWord(u32),
    Buffer(Vec<u8>),
    /// Protocol info and basic device class; `None` for unused slots
    NodeInfo(Option<(NodeProtocolInfo, u8)>),
    NodeMask(Vec<u8>),
    SucUpdateEntry(Option<SucUpdateEntry>),
    Route(Option<Route>),
    ModuleSize(u16),
    ModuleDescriptor(ModuleDescriptor),
    NvmDescriptor(NvmDescriptor),
}

/// All values of a table, keyed by field
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Nvm500Values {
    values: BTreeMap<Field, Vec<EntryValue>>,
}

impl Nvm500Values {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, field: Field, values: Vec<EntryValue>) {
        self.values.insert(field, values);
    }

    pub fn set_one(&mut self, field: Field, value: EntryValue) {
        self.values.insert(field, vec![value]);
    }

    pub fn get(&self, field: Field) -> Option<&[EntryValue]> {
        self.values.get(&field).map(Vec::as_slice)
    }

    fn all(&self, field: Field) -> Result<&[EntryValue]> {
        self.get(field)
            .ok_or_else(|| NvmError::InvalidFormat(format!("Field {:?} is missing", field)))
    }

    fn one(&self, field: Field) -> Result<&EntryValue> {
        self.all(field)?
            .first()
            .ok_or_else(|| NvmError::InvalidFormat(format!("Field {:?} is empty", field)))
    }

    pub fn byte(&self, field: Field) -> Result<u8> {
        match self.one(field)? {
            EntryValue::Byte(value) => Ok(*value),
            other => Err(type_mismatch(field, other)),
        }
    }

    pub fn bytes(&self, field: Field) -> Result<Vec<u8>> {
        self.all(field)?
            .iter()
            .map(|value| match value {
                EntryValue::Byte(value) => Ok(*value),
                other => Err(type_mismatch(field, other)),
            })
            .collect()
    }

    pub fn word(&self, field: Field) -> Result<u16> {
        match self.one(field)? {
            EntryValue::Word(value) | EntryValue::ModuleSize(value) => Ok(*value),
            other => Err(type_mismatch(field, other)),
        }
    }

    pub fn dword(&self, field: Field) -> Result<u32> {
        match self.one(field)? {
            EntryValue::DWord(value) => Ok(*value),
            other => Err(type_mismatch(field, other)),
        }
    }

    pub fn buffer(&self, field: Field) -> Result<&[u8]> {
        match self.one(field)? {
            EntryValue::Buffer(value) => Ok(value),
            other => Err(type_mismatch(field, other)),
        }
    }

    pub fn node_mask(&self, field: Field) -> Result<&[u8]> {
        match self.one(field)? {
            EntryValue::NodeMask(value) => Ok(value),
            other => Err(type_mismatch(field, other)),
        }
    }

    pub fn node_masks(&self, field: Field) -> Result<Vec<&[u8]>> {
        self.all(field)?
            .iter()
            .map(|value| match value {
                EntryValue::NodeMask(value) => Ok(value.as_slice()),
                other => Err(type_mismatch(field, other)),
            })
            .collect()
    }

    pub fn node_infos(&self, field: Field) -> Result<Vec<Option<&(NodeProtocolInfo, u8)>>> {
        self.all(field)?
            .iter()
            .map(|value| match value {
                EntryValue::NodeInfo(value) => Ok(value.as_ref()),
                other => Err(type_mismatch(field, other)),
            })
            .collect()
    }

    pub fn routes(&self, field: Field) -> Result<Vec<Option<&Route>>> {
        self.all(field)?
            .iter()
            .map(|value| match value {
                EntryValue::Route(value) => Ok(value.as_ref()),
                other => Err(type_mismatch(field, other)),
            })
            .collect()
    }

    pub fn suc_update_entries(&self, field: Field) -> Result<Vec<&SucUpdateEntry>> {
        self.all(field)?
            .iter()
            .filter_map(|value| match value {
                EntryValue::SucUpdateEntry(value) => value.as_ref().map(Ok),
                other => Some(Err(type_mismatch(field, other))),
            })
            .collect()
    }

    pub fn nvm_descriptor(&self, field: Field) -> Result<NvmDescriptor> {
        match self.one(field)? {
            EntryValue::NvmDescriptor(value) => Ok(*value),
            other => Err(type_mismatch(field, other)),
        }
    }
}

fn type_mismatch(field: Field, value: &EntryValue) -> NvmError {
    NvmError::InvalidFormat(format!("Field {:?} holds an unexpected value {:?}", field, value))
}

fn read_u16(bytes: &[u8]) -> u16 {
    u16::from_be_bytes([bytes[0], bytes[1]])
}

fn read_value(entry_type: EntryType, bytes: &[u8]) -> Result<EntryValue> {
    let value = match entry_type {
        EntryType::Byte => EntryValue::Byte(bytes[0]),
        EntryType::Word => EntryValue::Word(read_u16(bytes)),
        EntryType::ModuleSize => EntryValue::ModuleSize(read_u16(bytes)),
        EntryType::DWord => EntryValue::DWord(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])),
        EntryType::Buffer(_) => EntryValue::Buffer(bytes.to_vec()),
        EntryType::NodeInfo => EntryValue::NodeInfo(if bytes.iter().all(|&b| b == 0) {
            None
        } else {
            Some((NodeProtocolInfo::parse([bytes[0], bytes[1], bytes[2]], bytes[4], bytes[5]), bytes[3]))
        }),
        EntryType::NodeMask => EntryValue::NodeMask(parse_node_mask(bytes)),
        EntryType::SucUpdateEntry => EntryValue::SucUpdateEntry(SucUpdateEntry::parse(bytes)?),
        EntryType::Route => EntryValue::Route(Route::parse(bytes)),
        EntryType::ModuleDescriptor(_) => {
            let module_type = ModuleType::from_u8(bytes[2]).ok_or_else(|| {
                NvmError::InvalidFormat(format!("Unknown module type {:#04x}", bytes[2]))
            })?;
            EntryValue::ModuleDescriptor(ModuleDescriptor {
                size: read_u16(bytes),
                module_type,
                version: read_u16(&bytes[3..]),
            })
        }
        EntryType::NvmDescriptor => EntryValue::NvmDescriptor(NvmDescriptor {
            manufacturer_id: read_u16(&bytes[0..]),
            firmware_id: read_u16(&bytes[2..]),
            product_type: read_u16(&bytes[4..]),
            product_id: read_u16(&bytes[6..]),
            application_version: (bytes[8], bytes[9]),
            protocol_version: (bytes[10], bytes[11]),
        }),
    };
    Ok(value)
}

/// Walks `buffer` with the given layout
///
/// Structural problems (fields overrunning their module, mismatching
/// module sizes, reads past the buffer) are `InvalidFormat` errors. Magic
/// bytes are not checked here, see [`is_valid`].
pub fn parse_nvm500(buffer: &[u8], layout: &Nvm500Layout) -> Result<Nvm500Values> {
    let mut values = Nvm500Values::new();
    let mut offset = 0usize;
    let mut total_end: Option<usize> = None;
    // (start, size) of the module being read
    let mut module: Option<(usize, usize)> = None;

    for entry in &layout.entries {
        if total_end.is_some_and(|end| offset >= end) {
            break;
        }

        match entry.entry_type {
            EntryType::ModuleSize => {
                if let Some((start, size)) = module {
                    offset = start + size;
                }
            }
            EntryType::ModuleDescriptor(_) => {
                let (start, size) = module.ok_or_else(|| {
                    NvmError::InvalidFormat(format!("{:?} outside of a module", entry.field))
                })?;
                let position = (start + size).checked_sub(MODULE_DESCRIPTOR_SIZE).ok_or_else(|| {
                    NvmError::InvalidFormat(format!("Module at offset {} is too small", start))
                })?;
                if offset > position {
                    return Err(NvmError::InvalidFormat(format!(
                        "Fields of the module at offset {} overrun its descriptor",
                        start
                    )));
                }
                offset = position;
            }
            _ => {}
        }

        if let Some(expected) = entry.offset {
            if offset != expected {
                return Err(NvmError::InvalidFormat(format!(
                    "{:?} expected at offset {}, found at {}",
                    entry.field, expected, offset
                )));
            }
        }

        let size = entry.entry_type.size();
        let end = offset + size * entry.count;
        let bytes = buffer.get(offset..end).ok_or_else(|| {
            NvmError::InvalidFormat(format!(
                "{:?} at offset {} exceeds the buffer of {} bytes",
                entry.field,
                offset,
                buffer.len()
            ))
        })?;

        let entry_values = bytes
            .chunks_exact(size)
            .map(|chunk| read_value(entry.entry_type, chunk))
            .collect::<Result<Vec<_>>>()?;

        match (entry.field, entry_values.first()) {
            (Field::NvmTotalEnd, Some(EntryValue::Word(value))) => total_end = Some(*value as usize),
            (_, Some(EntryValue::ModuleSize(value))) => module = Some((offset, *value as usize)),
            (_, Some(EntryValue::ModuleDescriptor(descriptor))) => {
                if let Some((start, size)) = module {
                    if descriptor.size as usize != size {
                        return Err(NvmError::InvalidFormat(format!(
                            "Module at offset {} has size {}, but its descriptor says {}",
                            start, size, descriptor.size
                        )));
                    }
                }
            }
            _ => {}
        }

        values.set(entry.field, entry_values);
        offset = end;
    }

    Ok(values)
}

/// Whether a parsed table carries all magic bytes and a protocol version
/// the layout is known for
pub fn is_valid(values: &Nvm500Values, layout: &Nvm500Layout) -> bool {
    let check = || -> Result<bool> {
        let descriptor = values.nvm_descriptor(Field::NvmDescriptor)?;
        let (major, minor) = descriptor.protocol_version;
        let protocol_version = crate::version::format_version_500(major, minor);

        Ok(values.byte(Field::ConfigurationValid0)? == CONFIGURATION_VALID_0
            && values.byte(Field::ConfigurationValid1)? == CONFIGURATION_VALID_1
            && values.byte(Field::RouteCacheMagic)? == ROUTE_CACHE_MAGIC
            && values.byte(Field::EeoffsetMagic)? == EEOFFSET_MAGIC
            && values.word(Field::NvmModuleEndMarker)? == MODULE_END_MARKER
            && layout.supports_protocol_version(&protocol_version))
    };

    match check() {
        Ok(valid) => valid,
        Err(e) => {
            debug!("{} layout is incomplete: {}", layout.name, e);
            false
        }
    }
}
