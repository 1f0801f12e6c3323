//! Freelist trunk pages (spec.md §4.2 "page allocation").
//!
//! Free pages are chained through trunk pages: `[next_trunk:u32][count:u32]
//! [entries: u32 * N]`. `Pager::allocate` pops an entry off the head trunk
//! (freeing the trunk itself once empty), `Pager::free` pushes one on,
//! allocating a fresh trunk page when the current head is full.

use crate::consts::{FREELIST_ENTRIES_START, FREELIST_OFF_COUNT, FREELIST_OFF_NEXT_TRUNK, NO_PAGE};
use crate::error::{Error, Result};

pub(crate) struct TrunkPage {
    pub next_trunk: u32,
    pub entries: Vec<u32>,
}

impl TrunkPage {
    pub(crate) fn empty() -> Self {
        Self {
            next_trunk: NO_PAGE as u32,
            entries: Vec::new(),
        }
    }

    pub(crate) fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < FREELIST_ENTRIES_START {
            return Err(Error::corruption("freelist trunk page too small"));
        }
        let next_trunk = u32::from_le_bytes(
            buf[FREELIST_OFF_NEXT_TRUNK..FREELIST_OFF_NEXT_TRUNK + 4]
                .try_into()
                .unwrap(),
        );
        let count = u32::from_le_bytes(
            buf[FREELIST_OFF_COUNT..FREELIST_OFF_COUNT + 4]
                .try_into()
                .unwrap(),
        ) as usize;
        let max_entries = (buf.len() - FREELIST_ENTRIES_START) / 4;
        if count > max_entries {
            return Err(Error::corruption("freelist trunk entry count out of range"));
        }
        let mut entries = Vec::with_capacity(count);
        for i in 0..count {
            let off = FREELIST_ENTRIES_START + i * 4;
            entries.push(u32::from_le_bytes(buf[off..off + 4].try_into().unwrap()));
        }
        Ok(Self { next_trunk, entries })
    }

    pub(crate) fn encode(&self, page_size: usize) -> Vec<u8> {
        let mut buf = vec![0u8; page_size];
        buf[FREELIST_OFF_NEXT_TRUNK..FREELIST_OFF_NEXT_TRUNK + 4]
            .copy_from_slice(&self.next_trunk.to_le_bytes());
        buf[FREELIST_OFF_COUNT..FREELIST_OFF_COUNT + 4]
            .copy_from_slice(&(self.entries.len() as u32).to_le_bytes());
        for (i, &e) in self.entries.iter().enumerate() {
            let off = FREELIST_ENTRIES_START + i * 4;
            buf[off..off + 4].copy_from_slice(&e.to_le_bytes());
        }
        buf
    }

    pub(crate) fn capacity(page_size: usize) -> usize {
        (page_size - FREELIST_ENTRIES_START) / 4
    }
}
