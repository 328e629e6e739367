use semver::Version;

use super::{payload_of, NvmFileCodec};
use crate::error::{NvmError, Result};
use crate::nvm3::NvmObject;
use crate::protocol::{SucUpdateEntry, SUC_MAX_UPDATES, SUC_UPDATE_ENTRY_SIZE};

pub const SUC_UPDATE_ENTRIES_V0_KEY: u32 = 0x50003;
pub const SUC_UPDATE_ENTRIES_V5_BASE_KEY: u32 = 0x54000;
pub const SUC_UPDATES_PER_FILE_V5: usize = 8;
pub const SUC_UPDATE_FILES_V5: usize = SUC_MAX_UPDATES / SUC_UPDATES_PER_FILE_V5;

pub fn suc_update_entries_v5_key(file_index: u8) -> u32 {
    SUC_UPDATE_ENTRIES_V5_BASE_KEY + u32::from(file_index)
}

pub fn is_suc_update_entries_v5_key(key: u32) -> bool {
    (SUC_UPDATE_ENTRIES_V5_BASE_KEY..SUC_UPDATE_ENTRIES_V5_BASE_KEY + SUC_UPDATE_FILES_V5 as u32)
        .contains(&key)
}

fn parse_entries(payload: &[u8], count: usize) -> Result<Vec<SucUpdateEntry>> {
    let mut entries = Vec::new();
    for slot in payload.chunks_exact(SUC_UPDATE_ENTRY_SIZE).take(count) {
        if let Some(entry) = SucUpdateEntry::parse(slot)? {
            entries.push(entry);
        }
    }
    Ok(entries)
}

fn encode_entries(entries: &[SucUpdateEntry], count: usize) -> Result<Vec<u8>> {
    if entries.len() > count {
        return Err(NvmError::InvalidJson(format!(
            "At most {} SUC update entries fit into one file",
            count
        )));
    }
    let mut payload = Vec::with_capacity(count * SUC_UPDATE_ENTRY_SIZE);
    for i in 0..count {
        payload.extend_from_slice(&SucUpdateEntry::encode(entries.get(i))?);
    }
    Ok(payload)
}

/// All 64 SUC update entries in a single file (formats 0 to 4)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SucUpdateEntriesFileV0 {
    pub entries: Vec<SucUpdateEntry>,
}

impl NvmFileCodec for SucUpdateEntriesFileV0 {
    fn decode(object: &NvmObject, _version: &Version) -> Result<Self> {
        let payload = payload_of(object, SUC_MAX_UPDATES * SUC_UPDATE_ENTRY_SIZE)?;
        Ok(SucUpdateEntriesFileV0 {
            entries: parse_entries(payload, SUC_MAX_UPDATES)?,
        })
    }

    fn encode(&self, _version: &Version) -> Result<NvmObject> {
        let payload = encode_entries(&self.entries, SUC_MAX_UPDATES)?;
        Ok(NvmObject::data(SUC_UPDATE_ENTRIES_V0_KEY, payload))
    }
}

/// Eight SUC update entries per file (format 5)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SucUpdateEntriesFileV5 {
    pub file_index: u8,
    pub entries: Vec<SucUpdateEntry>,
}

impl SucUpdateEntriesFileV5 {
    /// Splits a full entry list over the files it needs
    pub fn split(entries: &[SucUpdateEntry]) -> Result<Vec<Self>> {
        if entries.len() > SUC_MAX_UPDATES {
            return Err(NvmError::InvalidJson(format!(
                "At most {} SUC update entries are supported",
                SUC_MAX_UPDATES
            )));
        }
        Ok(entries
            .chunks(SUC_UPDATES_PER_FILE_V5)
            .enumerate()
            .map(|(i, chunk)| SucUpdateEntriesFileV5 {
                file_index: i as u8,
                entries: chunk.to_vec(),
            })
            .collect())
    }
}

impl NvmFileCodec for SucUpdateEntriesFileV5 {
    fn decode(object: &NvmObject, _version: &Version) -> Result<Self> {
        if !is_suc_update_entries_v5_key(object.key) {
            return Err(NvmError::InvalidFormat(format!(
                "Object {:#07x} is not a SUC update entries file",
                object.key
            )));
        }
        let payload = payload_of(object, SUC_UPDATES_PER_FILE_V5 * SUC_UPDATE_ENTRY_SIZE)?;
        Ok(SucUpdateEntriesFileV5 {
            file_index: (object.key - SUC_UPDATE_ENTRIES_V5_BASE_KEY) as u8,
            entries: parse_entries(payload, SUC_UPDATES_PER_FILE_V5)?,
        })
    }

    fn encode(&self, _version: &Version) -> Result<NvmObject> {
        if self.file_index as usize >= SUC_UPDATE_FILES_V5 {
            return Err(NvmError::InvalidJson(format!(
                "SUC update entries file index {} is out of range",
                self.file_index
            )));
        }
        let payload = encode_entries(&self.entries, SUC_UPDATES_PER_FILE_V5)?;
        Ok(NvmObject::data(suc_update_entries_v5_key(self.file_index), payload))
    }
}
