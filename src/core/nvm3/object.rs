//! NVM3 objects: header codec, large-object fragmentation and compaction

use std::collections::BTreeMap;

use tracing::debug;

use super::berger::{
    compute_berger_code, compute_berger_code_multi, validate_berger_code,
    validate_berger_code_multi,
};
use super::consts::*;
use crate::error::{NvmError, Result};

/// Object kinds as encoded in the low 7 header bits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ObjectType {
    DataLarge = 0,
    CounterLarge = 1,
    CounterSmall = 2,
    Deleted = 3,
    /// Small data objects fold their length into the type: `7 + len`
    DataSmall = 7,
}

impl ObjectType {
    pub fn is_large(self) -> bool {
        matches!(self, ObjectType::DataLarge | ObjectType::CounterLarge)
    }
}

/// Position of an object in a chain of fragments
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FragmentType {
    None = 0,
    First = 1,
    Next = 2,
    Last = 3,
}

impl FragmentType {
    pub fn from_bits(bits: u32) -> Self {
        match bits & NVM3_OBJ_FRAGTYPE_MASK {
            1 => FragmentType::First,
            2 => FragmentType::Next,
            3 => FragmentType::Last,
            _ => FragmentType::None,
        }
    }
}

/// A single record of the NVM3 object store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NvmObject {
    pub key: u32,
    pub object_type: ObjectType,
    pub fragment_type: FragmentType,
    /// Always `Some` for data and counter objects, `None` for deletions
    pub data: Option<Vec<u8>>,
}

impl NvmObject {
    /// Creates a data object, choosing the small or large encoding by size
    pub fn data(key: u32, data: Vec<u8>) -> Self {
        let object_type = if data.len() > NVM3_MAX_OBJ_SIZE_SMALL {
            ObjectType::DataLarge
        } else {
            ObjectType::DataSmall
        };
        NvmObject {
            key,
            object_type,
            fragment_type: FragmentType::None,
            data: Some(data),
        }
    }

    pub fn deleted(key: u32) -> Self {
        NvmObject {
            key,
            object_type: ObjectType::Deleted,
            fragment_type: FragmentType::None,
            data: None,
        }
    }

    pub fn header_size(&self) -> usize {
        if self.object_type.is_large() {
            NVM3_OBJ_HEADER_SIZE_LARGE
        } else {
            NVM3_OBJ_HEADER_SIZE_SMALL
        }
    }

    /// Unaligned number of bytes this object occupies in a page
    pub fn required_space(&self) -> usize {
        self.header_size() + self.data.as_ref().map_or(0, Vec::len)
    }

    /// The payload, or an error for objects that carry none
    pub fn payload(&self) -> Result<&[u8]> {
        self.data.as_deref().ok_or_else(|| {
            NvmError::InvalidFormat(format!("Object {:#07x} has no payload", self.key))
        })
    }
}

/// Reads one object at `offset`
///
/// Returns `None` when the remaining bytes are erased flash or too short to
/// hold the object, which marks the end of the used space in a page.
pub fn read_object(buffer: &[u8], offset: usize) -> Result<Option<(NvmObject, usize)>> {
    let Some(hdr1) = read_u32_le(buffer, offset) else {
        return Ok(None);
    };
    if hdr1 == 0xffff_ffff {
        return Ok(None);
    }

    let key = (hdr1 >> NVM3_OBJ_KEY_SHIFT) & NVM3_OBJ_KEY_MASK;
    let raw_type = hdr1 & NVM3_OBJ_TYPE_MASK;

    let (object_type, header_size, length, fragment_type) = match raw_type {
        0 | 1 => {
            let Some(hdr2) = read_u32_le(buffer, offset + NVM3_OBJ_HEADER_SIZE_SMALL) else {
                return Ok(None);
            };
            validate_berger_code_multi(&[hdr1, hdr2], 32 + NVM3_CODE_LARGE_SHIFT)?;
            let object_type = if raw_type == 0 {
                ObjectType::DataLarge
            } else {
                ObjectType::CounterLarge
            };
            (
                object_type,
                NVM3_OBJ_HEADER_SIZE_LARGE,
                (hdr2 & NVM3_OBJ_LARGE_LEN_MASK) as usize,
                FragmentType::from_bits(hdr1 >> NVM3_OBJ_FRAGTYPE_SHIFT),
            )
        }
        2 => {
            validate_small_header(hdr1)?;
            (
                ObjectType::CounterSmall,
                NVM3_OBJ_HEADER_SIZE_SMALL,
                NVM3_COUNTER_SIZE,
                FragmentType::None,
            )
        }
        3 => {
            validate_small_header(hdr1)?;
            (
                ObjectType::Deleted,
                NVM3_OBJ_HEADER_SIZE_SMALL,
                0,
                FragmentType::None,
            )
        }
        t if t >= ObjectType::DataSmall as u32 => {
            validate_small_header(hdr1)?;
            (
                ObjectType::DataSmall,
                NVM3_OBJ_HEADER_SIZE_SMALL,
                (t - ObjectType::DataSmall as u32) as usize,
                FragmentType::None,
            )
        }
        t => {
            return Err(NvmError::InvalidFormat(format!(
                "Unknown object type {} at offset {}",
                t, offset
            )))
        }
    };

    let end = offset + header_size + length;
    if end > buffer.len() {
        debug!(
            "Object {:#07x} at offset {} exceeds the page, treating as end of data",
            key, offset
        );
        return Ok(None);
    }

    let data = if object_type == ObjectType::Deleted {
        None
    } else {
        Some(buffer[offset + header_size..end].to_vec())
    };

    Ok(Some((
        NvmObject {
            key,
            object_type,
            fragment_type,
            data,
        },
        header_size + length,
    )))
}

fn validate_small_header(hdr1: u32) -> Result<()> {
    let code = hdr1 >> NVM3_CODE_SMALL_SHIFT;
    validate_berger_code(hdr1, code, NVM3_CODE_SMALL_SHIFT)
}

/// Reads objects until erased flash or the end of `data`
pub fn read_objects(data: &[u8]) -> Result<Vec<NvmObject>> {
    let mut objects = Vec::new();
    let mut offset = 0;
    while offset < data.len() {
        match read_object(data, offset)? {
            Some((object, bytes_read)) => {
                objects.push(object);
                offset += align_to_word(bytes_read);
            }
            None => break,
        }
    }
    Ok(objects)
}

/// Serializes an object (header and payload, without alignment padding)
pub fn write_object(object: &NvmObject) -> Vec<u8> {
    let data = object.data.as_deref().unwrap_or_default();
    let key = (object.key & NVM3_OBJ_KEY_MASK) << NVM3_OBJ_KEY_SHIFT;
    let mut bytes = Vec::with_capacity(object.required_space());

    if object.object_type.is_large() {
        let hdr1 = (object.object_type as u32 & NVM3_OBJ_TYPE_MASK)
            | key
            | ((object.fragment_type as u32 & NVM3_OBJ_FRAGTYPE_MASK) << NVM3_OBJ_FRAGTYPE_SHIFT);
        let mut hdr2 = data.len() as u32 & NVM3_OBJ_LARGE_LEN_MASK;
        let code = compute_berger_code_multi(&[hdr1, hdr2], 32 + NVM3_CODE_LARGE_SHIFT);
        hdr2 |= code << NVM3_CODE_LARGE_SHIFT;
        bytes.extend_from_slice(&hdr1.to_le_bytes());
        bytes.extend_from_slice(&hdr2.to_le_bytes());
    } else {
        let mut type_and_len = object.object_type as u32;
        if object.object_type == ObjectType::DataSmall {
            type_and_len += data.len() as u32;
        }
        let mut hdr1 = (type_and_len & NVM3_OBJ_TYPE_MASK) | key;
        hdr1 |= compute_berger_code(hdr1, NVM3_CODE_SMALL_SHIFT) << NVM3_CODE_SMALL_SHIFT;
        bytes.extend_from_slice(&hdr1.to_le_bytes());
    }

    bytes.extend_from_slice(data);
    bytes
}

/// Splits a large object into fragments that fit the available page space
///
/// `first_page_space` is what remains in the current page, `other_page_space`
/// the usable size of an empty page. Both include the fragment header.
/// Objects that fit the first page are returned unchanged. Fails with
/// [`NvmError::NoSpace`] when a page cannot hold a fragment header plus at
/// least one payload byte.
pub fn fragment_large_object(
    object: &NvmObject,
    first_page_space: usize,
    other_page_space: usize,
) -> Result<Vec<NvmObject>> {
    let data = object.data.as_deref().unwrap_or_default();
    if data.is_empty() || data.len() + NVM3_OBJ_HEADER_SIZE_LARGE <= first_page_space {
        return Ok(vec![object.clone()]);
    }
    if first_page_space <= NVM3_OBJ_HEADER_SIZE_LARGE || other_page_space <= NVM3_OBJ_HEADER_SIZE_LARGE {
        return Err(NvmError::NoSpace);
    }

    let mut fragments = Vec::new();
    let mut offset = 0;
    while offset < data.len() {
        let space = if fragments.is_empty() {
            first_page_space
        } else {
            other_page_space
        };
        let chunk = space - NVM3_OBJ_HEADER_SIZE_LARGE;
        let end = (offset + chunk).min(data.len());
        fragments.push(NvmObject {
            key: object.key,
            object_type: object.object_type,
            fragment_type: if fragments.is_empty() {
                FragmentType::First
            } else {
                FragmentType::Next
            },
            data: Some(data[offset..end].to_vec()),
        });
        offset = end;
    }

    let count = fragments.len();
    if let Some(last) = fragments.last_mut() {
        if count > 1 {
            last.fragment_type = FragmentType::Last;
        }
    }
    Ok(fragments)
}

/// Reduces a logically ordered object stream to the current value per key
///
/// Deletions remove their key, whole objects overwrite it and complete
/// First/Next*/Last chains are joined into one object. Broken chains are the
/// residue of an interrupted write and are dropped.
pub fn compress_objects(objects: &[NvmObject]) -> BTreeMap<u32, NvmObject> {
    let mut ret = BTreeMap::new();
    let mut i = 0;

    while i < objects.len() {
        let object = &objects[i];
        i += 1;

        if object.object_type == ObjectType::Deleted {
            ret.remove(&object.key);
            continue;
        }

        match object.fragment_type {
            FragmentType::None => {
                ret.insert(object.key, object.clone());
            }
            FragmentType::First => {
                let Some(first) = &object.data else {
                    debug!("Dropping fragment chain {:#07x} without payload", object.key);
                    continue;
                };

                let mut payload = first.clone();
                let mut complete = false;
                while let Some(next) = objects.get(i) {
                    let Some(next_data) = next.data.as_deref().filter(|_| next.key == object.key)
                    else {
                        break;
                    };
                    match next.fragment_type {
                        FragmentType::Next => {
                            payload.extend_from_slice(next_data);
                            i += 1;
                        }
                        FragmentType::Last => {
                            payload.extend_from_slice(next_data);
                            i += 1;
                            complete = true;
                            break;
                        }
                        _ => break,
                    }
                }

                if complete {
                    ret.insert(
                        object.key,
                        NvmObject {
                            key: object.key,
                            object_type: object.object_type,
                            fragment_type: FragmentType::None,
                            data: Some(payload),
                        },
                    );
                } else {
                    debug!("Dropping incomplete fragment chain {:#07x}", object.key);
                }
            }
            FragmentType::Next | FragmentType::Last => {
                debug!("Dropping orphaned fragment {:#07x}", object.key);
            }
        }
    }

    ret
}

fn read_u32_le(buffer: &[u8], offset: usize) -> Option<u32> {
    let bytes = buffer.get(offset..offset + 4)?;
    Some(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}
