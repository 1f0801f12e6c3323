//! Database header (page 1), spec.md §3.

use crate::consts::*;
use crate::error::{Error, Result};

#[derive(Debug, Clone)]
pub struct DatabaseHeader {
    pub version: u32,
    pub page_size: u32,
    pub schema_cookie: u32,
    pub root_catalog_page: u32,
    pub root_freelist_page: u32,
    pub freelist_head_page: u32,
    pub freelist_count: u32,
    pub last_checkpoint_lsn: u64,
}

impl DatabaseHeader {
    pub fn new(page_size: u32) -> Self {
        Self {
            version: FORMAT_VERSION,
            page_size,
            schema_cookie: 0,
            root_catalog_page: 0,
            root_freelist_page: 0,
            freelist_head_page: 0,
            freelist_count: 0,
            last_checkpoint_lsn: 0,
        }
    }

    /// Encodes the header into a fresh `HEADER_SIZE`-byte page-1 image,
    /// computing and writing the CRC-32C checksum over everything except
    /// the checksum field itself.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = vec![0u8; HEADER_SIZE];
        buf[HDR_OFF_MAGIC..HDR_OFF_MAGIC + 16].copy_from_slice(MAGIC);
        buf[HDR_OFF_VERSION..HDR_OFF_VERSION + 4].copy_from_slice(&self.version.to_le_bytes());
        buf[HDR_OFF_PAGE_SIZE..HDR_OFF_PAGE_SIZE + 4]
            .copy_from_slice(&self.page_size.to_le_bytes());
        // checksum field left zeroed for now
        buf[HDR_OFF_SCHEMA_COOKIE..HDR_OFF_SCHEMA_COOKIE + 4]
            .copy_from_slice(&self.schema_cookie.to_le_bytes());
        buf[HDR_OFF_ROOT_CATALOG..HDR_OFF_ROOT_CATALOG + 4]
            .copy_from_slice(&self.root_catalog_page.to_le_bytes());
        buf[HDR_OFF_ROOT_FREELIST..HDR_OFF_ROOT_FREELIST + 4]
            .copy_from_slice(&self.root_freelist_page.to_le_bytes());
        buf[HDR_OFF_FREELIST_HEAD..HDR_OFF_FREELIST_HEAD + 4]
            .copy_from_slice(&self.freelist_head_page.to_le_bytes());
        buf[HDR_OFF_FREELIST_COUNT..HDR_OFF_FREELIST_COUNT + 4]
            .copy_from_slice(&self.freelist_count.to_le_bytes());
        buf[HDR_OFF_LAST_CHECKPOINT_LSN..HDR_OFF_LAST_CHECKPOINT_LSN + 8]
            .copy_from_slice(&self.last_checkpoint_lsn.to_le_bytes());

        let checksum = checksum_excluding_field(&buf);
        buf[HDR_OFF_CHECKSUM..HDR_OFF_CHECKSUM + 4].copy_from_slice(&checksum.to_le_bytes());
        buf
    }

    /// Decodes and verifies a page-1 image. Fails with `Error::Corruption`
    /// on bad magic, checksum mismatch, or an unsupported format version.
    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < HEADER_SIZE {
            return Err(Error::corruption("header page shorter than HEADER_SIZE"));
        }
        if &buf[HDR_OFF_MAGIC..HDR_OFF_MAGIC + 16] != MAGIC {
            return Err(Error::corruption("bad database magic"));
        }
        let stored_checksum = u32::from_le_bytes(
            buf[HDR_OFF_CHECKSUM..HDR_OFF_CHECKSUM + 4].try_into().unwrap(),
        );
        let computed = checksum_excluding_field(buf);
        if stored_checksum != computed {
            return Err(Error::corruption(format!(
                "header checksum mismatch: stored {stored_checksum:#x}, computed {computed:#x}"
            )));
        }

        let version = u32::from_le_bytes(buf[HDR_OFF_VERSION..HDR_OFF_VERSION + 4].try_into().unwrap());
        if version != FORMAT_VERSION {
            return Err(Error::corruption(format!(
                "unsupported format version {version} (expected {FORMAT_VERSION})"
            )));
        }
        let page_size =
            u32::from_le_bytes(buf[HDR_OFF_PAGE_SIZE..HDR_OFF_PAGE_SIZE + 4].try_into().unwrap());
        validate_page_size(page_size)?;

        Ok(Self {
            version,
            page_size,
            schema_cookie: read_u32(buf, HDR_OFF_SCHEMA_COOKIE),
            root_catalog_page: read_u32(buf, HDR_OFF_ROOT_CATALOG),
            root_freelist_page: read_u32(buf, HDR_OFF_ROOT_FREELIST),
            freelist_head_page: read_u32(buf, HDR_OFF_FREELIST_HEAD),
            freelist_count: read_u32(buf, HDR_OFF_FREELIST_COUNT),
            last_checkpoint_lsn: read_u64(buf, HDR_OFF_LAST_CHECKPOINT_LSN),
        })
    }
}

fn read_u32(buf: &[u8], off: usize) -> u32 {
    u32::from_le_bytes(buf[off..off + 4].try_into().unwrap())
}
fn read_u64(buf: &[u8], off: usize) -> u64 {
    u64::from_le_bytes(buf[off..off + 8].try_into().unwrap())
}

fn checksum_excluding_field(buf: &[u8]) -> u32 {
    let mut hasher_input = buf.to_vec();
    hasher_input[HDR_OFF_CHECKSUM..HDR_OFF_CHECKSUM + 4].fill(0);
    crc32c::crc32c(&hasher_input)
}

/// Validates page size is a power of two in `[MIN_PAGE_SIZE, MAX_PAGE_SIZE]`.
pub fn validate_page_size(page_size: u32) -> Result<()> {
    if page_size < MIN_PAGE_SIZE
        || page_size > MAX_PAGE_SIZE
        || (page_size & (page_size - 1)) != 0
    {
        return Err(Error::corruption(format!(
            "page_size must be a power of two in [{MIN_PAGE_SIZE}..{MAX_PAGE_SIZE}], got {page_size}"
        )));
    }
    Ok(())
}
