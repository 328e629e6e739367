//! Whole-image NVM3 codec
//!
//! An image is an application region followed by a protocol region. Each
//! region is an independent ring buffer of pages; decoding restores the
//! logical page order and compacts the object stream of each region into
//! one key→object map.

use std::collections::BTreeMap;

use tracing::{debug, info};

use super::consts::*;
use super::object::{compress_objects, fragment_large_object, write_object, NvmObject, ObjectType};
use super::page::{NvmPage, PageHeader};
use crate::config::EncodeOptions;
use crate::error::{NvmError, Result};

/// A decoded NVM3 image
#[derive(Debug, Clone)]
pub struct NvmImage {
    /// Application pages in logical (oldest first) order
    pub application_pages: Vec<NvmPage>,
    /// Protocol pages in logical (oldest first) order
    pub protocol_pages: Vec<NvmPage>,
    pub application_objects: BTreeMap<u32, NvmObject>,
    pub protocol_objects: BTreeMap<u32, NvmObject>,
}

/// Reads all pages of one region and sorts them into logical write order
///
/// The page with the lowest erase count is the oldest; ties go to the lower
/// physical offset. `base_offset` is the region's offset within the image.
pub fn read_pages(region: &[u8], base_offset: usize) -> Result<Vec<NvmPage>> {
    let mut pages = Vec::new();
    let mut offset = 0;
    while offset < region.len() {
        let (mut page, bytes_read) = NvmPage::read(region, offset)?;
        page.header.offset += base_offset;
        pages.push(page);
        offset += bytes_read;
    }

    pages.sort_by_key(|page| (page.header.erase_count, page.header.offset));
    Ok(pages)
}

/// Decodes a binary NVM3 image
pub fn parse_nvm(buffer: &[u8]) -> Result<NvmImage> {
    if buffer.len() < ZWAVE_APPLICATION_NVM_SIZE {
        return Err(NvmError::InvalidFormat(format!(
            "Buffer of {} bytes is too small for an NVM3 image",
            buffer.len()
        )));
    }

    let (application, protocol) = buffer.split_at(ZWAVE_APPLICATION_NVM_SIZE);
    let application_pages = read_pages(application, 0)?;
    let protocol_pages = read_pages(protocol, ZWAVE_APPLICATION_NVM_SIZE)?;

    let application_objects = compress_objects(&collect_objects(&application_pages));
    let protocol_objects = compress_objects(&collect_objects(&protocol_pages));

    debug!(
        "Parsed NVM3 image: {} application pages ({} objects), {} protocol pages ({} objects)",
        application_pages.len(),
        application_objects.len(),
        protocol_pages.len(),
        protocol_objects.len()
    );

    Ok(NvmImage {
        application_pages,
        protocol_pages,
        application_objects,
        protocol_objects,
    })
}

fn collect_objects(pages: &[NvmPage]) -> Vec<NvmObject> {
    pages
        .iter()
        .flat_map(|page| page.objects.iter().cloned())
        .collect()
}

/// Lays out both object maps in freshly formatted pages
///
/// The application region uses `options.application_page_size` as its
/// nominal page size when set, the protocol region always uses
/// `options.page_size`. Nominal sizes above the flash page size are kept in
/// the page headers; the pages themselves are clamped.
pub fn encode_nvm(
    application_objects: &BTreeMap<u32, NvmObject>,
    protocol_objects: &BTreeMap<u32, NvmObject>,
    options: &EncodeOptions,
) -> Result<Vec<u8>> {
    let protocol_header = region_header(options.page_size, options)?;
    let application_header = region_header(
        options.application_page_size.unwrap_or(options.page_size),
        options,
    )?;

    let mut application = RegionWriter::new(
        &application_header,
        ZWAVE_APPLICATION_NVM_SIZE / application_header.actual_page_size(),
    );
    application.write_objects(application_objects)?;
    let mut protocol = RegionWriter::new(
        &protocol_header,
        ZWAVE_PROTOCOL_NVM_SIZE / protocol_header.actual_page_size(),
    );
    protocol.write_objects(protocol_objects)?;

    info!(
        "Encoded NVM3 image: {} application objects, {} protocol objects, page size {}",
        application_objects.len(),
        protocol_objects.len(),
        protocol_header.actual_page_size()
    );

    let mut image = Vec::with_capacity(ZWAVE_APPLICATION_NVM_SIZE + ZWAVE_PROTOCOL_NVM_SIZE);
    image.extend(application.pages.into_iter().flatten());
    image.extend(protocol.pages.into_iter().flatten());
    Ok(image)
}

fn region_header(nominal_page_size: usize, options: &EncodeOptions) -> Result<PageHeader> {
    if nominal_page_size < NVM3_MIN_PAGE_SIZE
        || nominal_page_size > NVM3_MAX_NOMINAL_PAGE_SIZE
        || !nominal_page_size.is_power_of_two()
    {
        return Err(NvmError::InvalidFormat(format!(
            "Invalid NVM3 page size {}",
            nominal_page_size
        )));
    }

    Ok(PageHeader::new(
        nominal_page_size,
        options.device_family,
        options.write_size,
        options.memory_mapped,
    ))
}

/// Sequential writer over the blank pages of one region
struct RegionWriter {
    pages: Vec<Vec<u8>>,
    page_size: usize,
    /// Index of the page being written; `None` before the first page
    page_index: Option<usize>,
    offset_in_page: usize,
}

impl RegionWriter {
    fn new(header: &PageHeader, page_count: usize) -> Self {
        let page_size = header.actual_page_size();
        let header_bytes = header.to_bytes();
        let pages = (0..page_count)
            .map(|_| {
                let mut page = vec![0xff; page_size];
                page[..NVM3_PAGE_HEADER_SIZE].copy_from_slice(&header_bytes);
                page
            })
            .collect();

        RegionWriter {
            pages,
            page_size,
            page_index: None,
            offset_in_page: page_size,
        }
    }

    fn remaining_space(&self) -> usize {
        self.page_size - self.offset_in_page
    }

    fn next_page(&mut self) -> Result<()> {
        let next = self.page_index.map_or(0, |index| index + 1);
        if next >= self.pages.len() {
            return Err(NvmError::NoSpace);
        }
        self.page_index = Some(next);
        self.offset_in_page = NVM3_PAGE_HEADER_SIZE;
        Ok(())
    }

    fn write(&mut self, object: &NvmObject) {
        let encoded = write_object(object);
        if let Some(index) = self.page_index {
            let start = self.offset_in_page;
            self.pages[index][start..start + encoded.len()].copy_from_slice(&encoded);
        }
        self.offset_in_page += align_to_word(encoded.len());
    }

    fn write_objects(&mut self, objects: &BTreeMap<u32, NvmObject>) -> Result<()> {
        self.next_page()?;

        for object in objects.values() {
            if object.object_type == ObjectType::Deleted {
                continue;
            }

            let required = object.required_space();
            if !object.object_type.is_large() {
                // Small objects cannot be fragmented
                if self.remaining_space() < required {
                    self.next_page()?;
                }
                self.write(object);
                continue;
            }

            let fragments = if self.remaining_space() < required {
                if self.remaining_space() <= NVM3_OBJ_HEADER_SIZE_LARGE {
                    self.next_page()?;
                }
                fragment_large_object(
                    object,
                    self.remaining_space(),
                    self.page_size - NVM3_PAGE_HEADER_SIZE,
                )?
            } else {
                vec![object.clone()]
            };

            for (i, fragment) in fragments.iter().enumerate() {
                if i > 0 {
                    self.next_page()?;
                }
                if fragment.required_space() > self.remaining_space() {
                    return Err(NvmError::NoSpace);
                }
                self.write(fragment);
            }
        }
        Ok(())
    }
}
