//! Physical constants of the NVM3 flash format

use serde::{Deserialize, Serialize};

use crate::error::{NvmError, Result};

pub const NVM3_WORD_SIZE: usize = 4;
pub const NVM3_MIN_PAGE_SIZE: usize = 512;
pub const NVM3_PAGE_HEADER_SIZE: usize = 20;
pub const NVM3_PAGE_MAGIC: u16 = 0xb26e;
pub const NVM3_PAGE_VERSION: u16 = 0x01;

/// Erase counter width; the remaining 5 bits of the word hold its Berger code
pub const NVM3_PAGE_COUNTER_SIZE: u32 = 27;
pub const NVM3_PAGE_COUNTER_MASK: u32 = (1 << NVM3_PAGE_COUNTER_SIZE) - 1;

pub const NVM3_OBJ_HEADER_SIZE_SMALL: usize = 4;
pub const NVM3_OBJ_HEADER_SIZE_LARGE: usize = 8;
pub const NVM3_OBJ_TYPE_MASK: u32 = 0b111_1111;
pub const NVM3_OBJ_KEY_MASK: u32 = 0xf_ffff;
pub const NVM3_OBJ_KEY_SHIFT: u32 = 7;
pub const NVM3_OBJ_FRAGTYPE_MASK: u32 = 0b11;
pub const NVM3_OBJ_FRAGTYPE_SHIFT: u32 = 27;
pub const NVM3_OBJ_LARGE_LEN_MASK: u32 = (1 << NVM3_CODE_LARGE_SHIFT) - 1;
pub const NVM3_CODE_SMALL_SHIFT: u32 = 27;
pub const NVM3_CODE_LARGE_SHIFT: u32 = 26;

pub const NVM3_MAX_OBJ_SIZE_SMALL: usize = 120;
pub const NVM3_COUNTER_SIZE: usize = 204;

/// Byte size of the application region at the start of a 700-series image
pub const ZWAVE_APPLICATION_NVM_SIZE: usize = 0x3000;
/// Byte size of the protocol region that follows the application region
pub const ZWAVE_PROTOCOL_NVM_SIZE: usize = 0xc000 - ZWAVE_APPLICATION_NVM_SIZE;

pub const FLASH_MAX_PAGE_SIZE: usize = 2048;
/// Largest page size the 3-bit header field can express
pub const NVM3_MAX_NOMINAL_PAGE_SIZE: usize = NVM3_MIN_PAGE_SIZE << 7;

/// Page status word
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum PageStatus {
    Ok = 0xffff_ffff,
    OkErasePending = 0xffff_a5a5,
    Bad = 0x0000_ffff,
    BadErasePending = 0x0000_a5a5,
}

impl PageStatus {
    pub fn from_u32(value: u32) -> Result<Self> {
        match value {
            0xffff_ffff => Ok(PageStatus::Ok),
            0xffff_a5a5 => Ok(PageStatus::OkErasePending),
            0x0000_ffff => Ok(PageStatus::Bad),
            0x0000_a5a5 => Ok(PageStatus::BadErasePending),
            _ => Err(NvmError::InvalidFormat(format!(
                "Invalid page status {:#010x}",
                value
            ))),
        }
    }
}

/// Flash write granularity recorded in the page header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PageWriteSize {
    /// Only single writes per word are allowed
    Write32,
    /// Two writes per word are allowed
    Write16,
}

impl PageWriteSize {
    pub fn from_bit(bit: u16) -> Self {
        if bit & 0b1 == 0 {
            PageWriteSize::Write32
        } else {
            PageWriteSize::Write16
        }
    }

    pub fn to_bit(self) -> u16 {
        match self {
            PageWriteSize::Write32 => 0,
            PageWriteSize::Write16 => 1,
        }
    }
}

/// Rounds `len` up to the next multiple of the NVM3 word size
pub const fn align_to_word(len: usize) -> usize {
    (len + NVM3_WORD_SIZE - 1) & !(NVM3_WORD_SIZE - 1)
}
