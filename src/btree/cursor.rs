//! Forward B+Tree cursor (spec.md §4.5, §9 "cursor resumption").
//!
//! A cursor captures a snapshot of the current leaf's cells at advance
//! time rather than holding a pin across calls, so it never blocks cache
//! eviction and never aliases a page buffer across call sites.

use crate::codec::overflow;
use crate::error::Result;
use crate::pager::Pager;

use super::page::{CellValue, LeafPage};

pub struct Cursor<'a> {
    pager: &'a Pager,
    snapshot_lsn: Option<u64>,
    leaf: LeafPage,
    index: usize,
}

impl<'a> Cursor<'a> {
    pub(super) fn new(pager: &'a Pager, leaf_id: u64, snapshot_lsn: Option<u64>) -> Result<Self> {
        let buf = Self::read(pager, snapshot_lsn, leaf_id)?;
        let leaf = LeafPage::decode(&buf)?;
        Ok(Self {
            pager,
            snapshot_lsn,
            leaf,
            index: 0,
        })
    }

    fn read(pager: &'a Pager, snapshot_lsn: Option<u64>, page_id: u64) -> Result<Vec<u8>> {
        match snapshot_lsn {
            Some(lsn) => pager.read_page_snapshot(page_id, lsn),
            None => pager.read_page(page_id),
        }
    }

    /// Advances within the current leaf snapshot to the first cell whose
    /// key is `>= start`, loading later leaves if `start` is past this one.
    pub(super) fn seek(&mut self, start: &[u8]) -> Result<()> {
        loop {
            self.index = self.leaf.insertion_point(start);
            if self.index < self.leaf.cells.len() {
                return Ok(());
            }
            if !self.advance_to_next_leaf()? {
                return Ok(());
            }
        }
    }

    fn advance_to_next_leaf(&mut self) -> Result<bool> {
        if self.leaf.next_leaf == 0 {
            return Ok(false);
        }
        let buf = Self::read(self.pager, self.snapshot_lsn, self.leaf.next_leaf as u64)?;
        self.leaf = LeafPage::decode(&buf)?;
        self.index = 0;
        Ok(true)
    }

    /// Returns the next `(key, value)` pair in ascending order. An emptied
    /// leaf is unlinked and freed by `delete` rather than left in the
    /// chain, except for the root leaf, which stays in place with zero
    /// cells and is simply skipped over here.
    pub fn next(&mut self) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
        loop {
            if self.index < self.leaf.cells.len() {
                let cell = &self.leaf.cells[self.index];
                let key = cell.key.clone();
                let value = match &cell.value {
                    CellValue::Inline(bytes) => bytes.clone(),
                    CellValue::Overflow(page_id) => {
                        overflow::read_overflow_chain_all(self.pager, *page_id)?
                    }
                };
                self.index += 1;
                return Ok(Some((key, value)));
            }
            if !self.advance_to_next_leaf()? {
                return Ok(None);
            }
        }
    }
}
