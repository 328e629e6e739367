use tracing::debug;

use super::berger::{compute_berger_code, validate_berger_code};
use super::consts::*;
use super::object::{read_objects, write_object, NvmObject};
use crate::error::{NvmError, Result};

/// Page header (20 bytes)
///
/// ```text
/// 0  version          u16
/// 2  magic            u16  (0xB26E)
/// 4  erase count      u32  (27 bits + 5-bit Berger code)
/// 8  inverted count   u32  (27 bits + 5-bit Berger code)
/// 12 status           u32
/// 16 device info      u16  [family:11, write size:1, memory mapped:1, page size:3]
/// 18 format info      u16  (bit 0 clear = encrypted)
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageHeader {
    /// Absolute byte offset of this page in the image
    pub offset: usize,
    pub version: u16,
    pub erase_count: u32,
    pub status: PageStatus,
    pub encrypted: bool,
    /// Nominal page size as written in the header
    pub page_size: usize,
    pub device_family: u16,
    pub write_size: PageWriteSize,
    pub memory_mapped: bool,
}

impl PageHeader {
    /// Header of a freshly erased page
    pub fn new(page_size: usize, device_family: u16, write_size: PageWriteSize, memory_mapped: bool) -> Self {
        PageHeader {
            offset: 0,
            version: NVM3_PAGE_VERSION,
            erase_count: 0,
            status: PageStatus::Ok,
            encrypted: false,
            page_size,
            device_family,
            write_size,
            memory_mapped,
        }
    }

    pub const fn size() -> usize {
        NVM3_PAGE_HEADER_SIZE
    }

    /// Number of bytes the page really occupies on flash
    ///
    /// Application pages are written with an oversized nominal size, so the
    /// nominal value is clamped to the largest page the platform supports.
    pub fn actual_page_size(&self) -> usize {
        self.page_size.min(FLASH_MAX_PAGE_SIZE)
    }

    pub fn to_bytes(&self) -> [u8; NVM3_PAGE_HEADER_SIZE] {
        let mut bytes = [0u8; NVM3_PAGE_HEADER_SIZE];
        bytes[0..2].copy_from_slice(&self.version.to_le_bytes());
        bytes[2..4].copy_from_slice(&NVM3_PAGE_MAGIC.to_le_bytes());

        let erase_count = self.erase_count & NVM3_PAGE_COUNTER_MASK;
        bytes[4..8].copy_from_slice(&with_counter_code(erase_count).to_le_bytes());
        let erase_count_inv = !self.erase_count & NVM3_PAGE_COUNTER_MASK;
        bytes[8..12].copy_from_slice(&with_counter_code(erase_count_inv).to_le_bytes());

        bytes[12..16].copy_from_slice(&(self.status as u32).to_le_bytes());

        let dev_info = (self.device_family & 0x7ff)
            | (self.write_size.to_bit() << 11)
            | (u16::from(self.memory_mapped) << 12)
            | (page_size_to_bits(self.page_size) << 13);
        bytes[16..18].copy_from_slice(&dev_info.to_le_bytes());

        let format_info: u16 = if self.encrypted { 0xfffe } else { 0xffff };
        bytes[18..20].copy_from_slice(&format_info.to_le_bytes());
        bytes
    }

    pub fn from_bytes(bytes: &[u8], offset: usize) -> Result<Self> {
        if bytes.len() < Self::size() {
            return Err(NvmError::InvalidFormat(format!(
                "Insufficient bytes for page header at offset {}",
                offset
            )));
        }

        let version = u16::from_le_bytes([bytes[0], bytes[1]]);
        let magic = u16::from_le_bytes([bytes[2], bytes[3]]);
        if magic != NVM3_PAGE_MAGIC {
            return Err(NvmError::InvalidFormat(format!(
                "Not a valid NVM3 page at offset {} (magic {:#06x})",
                offset, magic
            )));
        }
        if version != NVM3_PAGE_VERSION {
            return Err(NvmError::not_supported(format!(
                "Unsupported NVM3 page version {}",
                version
            )));
        }

        let erase_count = read_counter(&bytes[4..8])?;
        let erase_count_inv = read_counter(&bytes[8..12])?;
        if erase_count != (!erase_count_inv & NVM3_PAGE_COUNTER_MASK) {
            return Err(NvmError::InvalidFormat(format!(
                "Erase count mismatch in page at offset {}",
                offset
            )));
        }

        let status = PageStatus::from_u32(u32::from_le_bytes([
            bytes[12], bytes[13], bytes[14], bytes[15],
        ]))?;

        let dev_info = u16::from_le_bytes([bytes[16], bytes[17]]);
        let format_info = u16::from_le_bytes([bytes[18], bytes[19]]);

        Ok(PageHeader {
            offset,
            version,
            erase_count,
            status,
            encrypted: format_info & 0b1 == 0,
            page_size: page_size_from_bits(dev_info >> 13),
            device_family: dev_info & 0x7ff,
            write_size: PageWriteSize::from_bit(dev_info >> 11),
            memory_mapped: (dev_info >> 12) & 0b1 == 1,
        })
    }
}

fn with_counter_code(counter: u32) -> u32 {
    counter | (compute_berger_code(counter, NVM3_PAGE_COUNTER_SIZE) << NVM3_PAGE_COUNTER_SIZE)
}

fn read_counter(bytes: &[u8]) -> Result<u32> {
    let word = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
    let counter = word & NVM3_PAGE_COUNTER_MASK;
    validate_berger_code(counter, word >> NVM3_PAGE_COUNTER_SIZE, NVM3_PAGE_COUNTER_SIZE)?;
    Ok(counter)
}

fn page_size_from_bits(bits: u16) -> usize {
    NVM3_MIN_PAGE_SIZE << (bits & 0b111)
}

fn page_size_to_bits(size: usize) -> u16 {
    let mut bits = 0u16;
    while bits < 0b111 && (NVM3_MIN_PAGE_SIZE << bits) < size {
        bits += 1;
    }
    bits
}

/// A single flash page: header plus the objects stored in it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NvmPage {
    pub header: PageHeader,
    pub objects: Vec<NvmObject>,
}

impl NvmPage {
    /// Decodes the page starting at `offset` in `buffer`
    ///
    /// Returns the page and the number of bytes it occupies.
    pub fn read(buffer: &[u8], offset: usize) -> Result<(Self, usize)> {
        let header_bytes = buffer.get(offset..).unwrap_or_default();
        let header = PageHeader::from_bytes(header_bytes, offset)?;

        let actual_size = header.actual_page_size();
        if buffer.len() < offset + actual_size {
            return Err(NvmError::InvalidFormat(format!(
                "Incomplete page at offset {} (need {} bytes)",
                offset, actual_size
            )));
        }

        let objects = read_objects(&buffer[offset + NVM3_PAGE_HEADER_SIZE..offset + actual_size])?;
        debug!(
            "Read page at offset {}: erase count {}, {} objects",
            offset,
            header.erase_count,
            objects.len()
        );

        Ok((NvmPage { header, objects }, actual_size))
    }

    /// Serializes the page to its full on-flash size, erased space set to 0xFF
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let size = self.header.actual_page_size();
        let mut bytes = vec![0xff; size];
        bytes[..NVM3_PAGE_HEADER_SIZE].copy_from_slice(&self.header.to_bytes());

        let mut offset = NVM3_PAGE_HEADER_SIZE;
        for object in &self.objects {
            let encoded = write_object(object);
            if offset + encoded.len() > size {
                return Err(NvmError::NoSpace);
            }
            bytes[offset..offset + encoded.len()].copy_from_slice(&encoded);
            offset += align_to_word(encoded.len());
        }
        Ok(bytes)
    }
}
