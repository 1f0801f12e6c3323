//! Overflow chain — linked pages for values too large to fit inline
//! (spec.md §4.4).
//!
//! Record-value overflow is length-prefixed by the record pointer itself
//! (spec.md §3), so [`read_overflow_chain`] takes the total logical length
//! and stops there; B+Tree value overflow carries no external length and is
//! walked to a `NO_PAGE` sentinel via [`read_overflow_chain_all`].

use crate::consts::{NO_PAGE, OVERFLOW_HDR_SIZE};
use crate::error::{Error, Result};
use crate::pager::Pager;

/// Writes `data` as a chain of overflow pages, each holding up to
/// `page_size - 8` bytes, and returns the first page id.
pub fn write_overflow_chain(pager: &Pager, data: &[u8]) -> Result<u32> {
    let page_size = pager.page_size() as usize;
    let chunk_cap = page_size - OVERFLOW_HDR_SIZE;
    if data.is_empty() {
        // Degenerate case: still needs a page so readers have something to
        // point at and free.
        let page_id = pager.allocate()?;
        let mut buf = vec![0u8; page_size];
        write_chunk_header(&mut buf, NO_PAGE as u32, 0);
        pager.write_page(page_id, &buf)?;
        return Ok(page_id as u32);
    }

    let mut page_ids = Vec::new();
    let mut offset = 0;
    while offset < data.len() {
        let page_id = pager.allocate()?;
        page_ids.push(page_id as u32);
        offset += chunk_cap.min(data.len() - offset);
    }

    let mut offset = 0;
    for (i, &page_id) in page_ids.iter().enumerate() {
        let take = chunk_cap.min(data.len() - offset);
        let next = if i + 1 < page_ids.len() {
            page_ids[i + 1]
        } else {
            NO_PAGE as u32
        };
        let mut buf = vec![0u8; page_size];
        write_chunk_header(&mut buf, next, take as u32);
        buf[OVERFLOW_HDR_SIZE..OVERFLOW_HDR_SIZE + take]
            .copy_from_slice(&data[offset..offset + take]);
        pager.write_page(page_id as u64, &buf)?;
        offset += take;
    }

    Ok(page_ids[0])
}

fn write_chunk_header(buf: &mut [u8], next_page: u32, chunk_len: u32) {
    buf[0..4].copy_from_slice(&next_page.to_le_bytes());
    buf[4..8].copy_from_slice(&chunk_len.to_le_bytes());
}

fn read_chunk_header(buf: &[u8]) -> Result<(u32, u32)> {
    if buf.len() < OVERFLOW_HDR_SIZE {
        return Err(Error::corruption("overflow page too small for header"));
    }
    let mut next = [0u8; 4];
    next.copy_from_slice(&buf[0..4]);
    let mut len = [0u8; 4];
    len.copy_from_slice(&buf[4..8]);
    Ok((u32::from_le_bytes(next), u32::from_le_bytes(len)))
}

/// Reads `total_len` bytes starting from `start` page, for record-value
/// overflow (length known up front).
pub fn read_overflow_chain(pager: &Pager, start: u32, total_len: usize) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(total_len);
    let mut page_id = start as u64;
    while out.len() < total_len {
        if page_id == NO_PAGE {
            return Err(Error::corruption(
                "overflow chain ended before total_len reached",
            ));
        }
        let page = pager.read_page(page_id)?;
        let (next, chunk_len) = read_chunk_header(&page)?;
        let chunk_len = chunk_len as usize;
        let take = chunk_len.min(total_len - out.len());
        if OVERFLOW_HDR_SIZE + take > page.len() {
            return Err(Error::corruption("overflow chunk_len out of range"));
        }
        out.extend_from_slice(&page[OVERFLOW_HDR_SIZE..OVERFLOW_HDR_SIZE + take]);
        page_id = next as u64;
    }
    Ok(out)
}

/// Walks a chain to its `NO_PAGE` terminator, for B+Tree value overflow
/// (no externally-stored length).
pub fn read_overflow_chain_all(pager: &Pager, start: u32) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    let mut page_id = start as u64;
    while page_id != NO_PAGE {
        let page = pager.read_page(page_id)?;
        let (next, chunk_len) = read_chunk_header(&page)?;
        let chunk_len = chunk_len as usize;
        if OVERFLOW_HDR_SIZE + chunk_len > page.len() {
            return Err(Error::corruption("overflow chunk_len out of range"));
        }
        out.extend_from_slice(&page[OVERFLOW_HDR_SIZE..OVERFLOW_HDR_SIZE + chunk_len]);
        page_id = next as u64;
    }
    Ok(out)
}

/// Returns every page in the chain to the freelist (spec.md §4.4 invariant:
/// a non-zero next-page id always points to a valid page of the same
/// database, so this walk never needs external bookkeeping).
pub fn free_overflow_chain(pager: &Pager, start: u32) -> Result<()> {
    let mut page_id = start as u64;
    while page_id != NO_PAGE {
        let page = pager.read_page(page_id)?;
        let (next, _) = read_chunk_header(&page)?;
        pager.free(page_id)?;
        page_id = next as u64;
    }
    Ok(())
}
