use tracing::debug;

use super::layout::*;
use super::parser::{EntryValue, Nvm500Values};
use crate::error::{NvmError, Result};
use crate::protocol::{encode_node_mask, Route, SucUpdateEntry};

fn write_value(buffer: &mut Vec<u8>, field: Field, entry_type: EntryType, value: &EntryValue) -> Result<()> {
    match (entry_type, value) {
        (EntryType::Byte, EntryValue::Byte(value)) => buffer.push(*value),
        (EntryType::Word, EntryValue::Word(value))
        | (EntryType::ModuleSize, EntryValue::ModuleSize(value)) => {
            buffer.extend_from_slice(&value.to_be_bytes())
        }
        (EntryType::DWord, EntryValue::DWord(value)) => buffer.extend_from_slice(&value.to_be_bytes()),
        (EntryType::Buffer(len), EntryValue::Buffer(bytes)) => {
            if bytes.len() != len {
                return Err(NvmError::InvalidJson(format!(
                    "{:?} must be exactly {} bytes long, got {}",
                    field,
                    len,
                    bytes.len()
                )));
            }
            buffer.extend_from_slice(bytes);
        }
        (EntryType::NodeInfo, EntryValue::NodeInfo(node_info)) => match node_info {
            Some((info, basic)) => {
                buffer.extend_from_slice(&info.encode());
                buffer.extend_from_slice(&[
                    *basic,
                    info.generic_device_class,
                    info.specific_device_class.unwrap_or_default(),
                ]);
            }
            None => buffer.extend_from_slice(&[0; NODE_INFO_500_SIZE]),
        },
        (EntryType::NodeMask, EntryValue::NodeMask(node_ids)) => {
            buffer.extend_from_slice(&encode_node_mask(node_ids)?)
        }
        (EntryType::SucUpdateEntry, EntryValue::SucUpdateEntry(entry)) => {
            buffer.extend_from_slice(&SucUpdateEntry::encode(entry.as_ref())?)
        }
        (EntryType::Route, EntryValue::Route(route)) => {
            buffer.extend_from_slice(&Route::encode(route.as_ref())?)
        }
        (EntryType::ModuleDescriptor(module_type), EntryValue::ModuleDescriptor(descriptor)) => {
            buffer.extend_from_slice(&descriptor.size.to_be_bytes());
            buffer.push(module_type as u8);
            buffer.extend_from_slice(&descriptor.version.to_be_bytes());
        }
        (EntryType::NvmDescriptor, EntryValue::NvmDescriptor(descriptor)) => {
            for word in [
                descriptor.manufacturer_id,
                descriptor.firmware_id,
                descriptor.product_type,
                descriptor.product_id,
            ] {
                buffer.extend_from_slice(&word.to_be_bytes());
            }
            buffer.extend_from_slice(&[
                descriptor.application_version.0,
                descriptor.application_version.1,
                descriptor.protocol_version.0,
                descriptor.protocol_version.1,
            ]);
        }
        (entry_type, value) => {
            return Err(NvmError::InvalidJson(format!(
                "{:?} expects a {:?} value, got {:?}",
                field, entry_type, value
            )))
        }
    }
    Ok(())
}

fn patch_u16(buffer: &mut [u8], offset: usize, value: usize) -> Result<()> {
    let value = u16::try_from(value)
        .map_err(|_| NvmError::InvalidJson(format!("Value {} does not fit the table", value)))?;
    buffer[offset..offset + 2].copy_from_slice(&value.to_be_bytes());
    Ok(())
}

/// Writes a complete table
///
/// Every field of the layout needs a value. Module sizes, the sizes in
/// the module descriptors and the total end offset are computed here and
/// override whatever `values` holds for them.
pub fn encode_nvm500(values: &Nvm500Values, layout: &Nvm500Layout) -> Result<Vec<u8>> {
    let mut buffer = Vec::new();
    let mut module_start: Option<usize> = None;
    // (start, descriptor offset) of every finished module
    let mut modules = Vec::new();

    for entry in &layout.entries {
        if let Some(expected) = entry.offset {
            if buffer.len() != expected {
                return Err(NvmError::InvalidFormat(format!(
                    "{:?} would be written at offset {} instead of {}",
                    entry.field,
                    buffer.len(),
                    expected
                )));
            }
        }

        let entry_values = values
            .get(entry.field)
            .ok_or_else(|| NvmError::InvalidJson(format!("Field {:?} is required", entry.field)))?;
        if entry_values.len() != entry.count {
            return Err(NvmError::InvalidJson(format!(
                "Field {:?} needs {} values, got {}",
                entry.field,
                entry.count,
                entry_values.len()
            )));
        }

        match entry.entry_type {
            EntryType::ModuleSize => module_start = Some(buffer.len()),
            EntryType::ModuleDescriptor(_) => {
                let start = module_start.take().ok_or_else(|| {
                    NvmError::InvalidFormat(format!("{:?} outside of a module", entry.field))
                })?;
                modules.push((start, buffer.len()));
            }
            _ => {}
        }

        for value in entry_values {
            write_value(&mut buffer, entry.field, entry.entry_type, value)?;
        }
    }

    for (start, descriptor) in modules {
        let size = descriptor + MODULE_DESCRIPTOR_SIZE - start;
        patch_u16(&mut buffer, start, size)?;
        patch_u16(&mut buffer, descriptor, size)?;
    }
    if layout.entries.first().map(|entry| entry.field) == Some(Field::NvmTotalEnd) {
        let total_end = buffer.len().saturating_sub(1);
        patch_u16(&mut buffer, 0, total_end)?;
    }

    debug!("Encoded {} table: {} bytes", layout.name, buffer.len());
    Ok(buffer)
}
