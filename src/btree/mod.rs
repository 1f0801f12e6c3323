//! B+Tree: ordered key/value storage over pager pages (spec.md §4.5).
//!
//! A single page format serves both table trees (keyed by [`page::rowid_key`])
//! and index trees (keyed by encoded column bytes with the owning rowid
//! appended). No rebalancing on delete — a leaf with a thin cell count is
//! never merged with a sibling — but a leaf that empties out entirely is
//! unlinked from its parent and the leaf chain and returned to the
//! freelist rather than left as a dangling, permanently-empty page
//! (spec.md §9 open question).

pub mod cursor;
pub mod page;

use crate::codec::overflow;
use crate::consts::{overflow_threshold, BTREE_PAGE_TYPE_INTERNAL, BTREE_PAGE_TYPE_LEAF};
use crate::error::{Error, Result};
use crate::pager::Pager;

use page::{CellValue, InternalCell, InternalPage, LeafCell, LeafPage};

pub use cursor::Cursor;
pub use page::{index_key, index_key_parts, key_to_rowid, rowid_key};

/// A handle to one B+Tree rooted at `root`. `root` may change across an
/// insert that splits the root; callers persist the new value (e.g. into
/// the catalog) via [`BTree::root`].
pub struct BTree<'a> {
    pager: &'a Pager,
    root: u64,
    snapshot_lsn: Option<u64>,
}

enum Node {
    Leaf(LeafPage),
    Internal(InternalPage),
}

fn decode_node(buf: &[u8]) -> Result<Node> {
    if buf.is_empty() {
        return Err(Error::corruption("empty page buffer"));
    }
    match buf[0] {
        BTREE_PAGE_TYPE_LEAF => Ok(Node::Leaf(LeafPage::decode(buf)?)),
        BTREE_PAGE_TYPE_INTERNAL => Ok(Node::Internal(InternalPage::decode(buf)?)),
        other => Err(Error::corruption(format!("unknown btree page type {other}"))),
    }
}

impl<'a> BTree<'a> {
    pub fn new(pager: &'a Pager, root: u64) -> Self {
        Self {
            pager,
            root,
            snapshot_lsn: None,
        }
    }

    /// A read-only handle pinned to `snapshot_lsn`, for scanning a table or
    /// index through a [`crate::txn::ReadTxn`]'s snapshot rather than the
    /// latest committed state (spec.md §5.3).
    pub fn at_snapshot(pager: &'a Pager, root: u64, snapshot_lsn: u64) -> Self {
        Self {
            pager,
            root,
            snapshot_lsn: Some(snapshot_lsn),
        }
    }

    pub fn root(&self) -> u64 {
        self.root
    }

    /// Creates a fresh empty tree (a single empty leaf root) and returns a
    /// handle to it.
    pub fn create(pager: &'a Pager) -> Result<Self> {
        let root = pager.allocate()?;
        let leaf = LeafPage::new();
        let buf = leaf.encode(pager.page_size() as usize)?;
        pager.write_page(root, &buf)?;
        Ok(Self {
            pager,
            root,
            snapshot_lsn: None,
        })
    }

    fn read_page(&self, page_id: u64) -> Result<Vec<u8>> {
        match self.snapshot_lsn {
            Some(lsn) => self.pager.read_page_snapshot(page_id, lsn),
            None => self.pager.read_page(page_id),
        }
    }

    fn path_to_leaf(&self, key: &[u8]) -> Result<(u64, Vec<(u64, InternalPage)>)> {
        let mut path = Vec::new();
        let mut page_id = self.root;
        loop {
            let buf = self.read_page(page_id)?;
            match decode_node(&buf)? {
                Node::Leaf(_) => return Ok((page_id, path)),
                Node::Internal(internal) => {
                    let child = internal.child_for(key);
                    path.push((page_id, internal));
                    page_id = child as u64;
                }
            }
        }
    }

    fn resolve_value(&self, value: &CellValue) -> Result<Vec<u8>> {
        match value {
            CellValue::Inline(bytes) => Ok(bytes.clone()),
            CellValue::Overflow(page_id) => overflow::read_overflow_chain_all(self.pager, *page_id),
        }
    }

    /// Exact key lookup, resolving any B+Tree-level value overflow.
    pub fn find(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let (leaf_id, _) = self.path_to_leaf(key)?;
        let buf = self.read_page(leaf_id)?;
        let leaf = LeafPage::decode(&buf)?;
        match leaf.find(key) {
            None => Ok(None),
            Some(idx) => Ok(Some(self.resolve_value(&leaf.cells[idx].value)?)),
        }
    }

    fn make_cell_value(&self, value: &[u8]) -> Result<CellValue> {
        let threshold = overflow_threshold(self.pager.page_size());
        if value.len() > threshold {
            let page = overflow::write_overflow_chain(self.pager, value)?;
            Ok(CellValue::Overflow(page))
        } else {
            Ok(CellValue::Inline(value.to_vec()))
        }
    }

    /// Inserts or replaces the cell for `key`. Frees any overflow chain of
    /// a replaced value before installing the new one.
    pub fn insert(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        let (leaf_id, path) = self.path_to_leaf(key)?;
        let page_size = self.pager.page_size() as usize;
        let buf = self.pager.read_page(leaf_id)?;
        let mut leaf = LeafPage::decode(&buf)?;

        let new_value = self.make_cell_value(value)?;
        match leaf.find(key) {
            Some(idx) => {
                if let CellValue::Overflow(page) = leaf.cells[idx].value {
                    overflow::free_overflow_chain(self.pager, page)?;
                }
                leaf.cells[idx].value = new_value;
            }
            None => {
                let at = leaf.insertion_point(key);
                leaf.cells.insert(
                    at,
                    LeafCell {
                        key: key.to_vec(),
                        value: new_value,
                    },
                );
            }
        }

        if leaf.fits(page_size) {
            let buf = leaf.encode(page_size)?;
            self.pager.write_page(leaf_id, &buf)?;
            return Ok(());
        }

        self.split_leaf(leaf_id, leaf, path)
    }

    fn split_leaf(
        &mut self,
        leaf_id: u64,
        leaf: LeafPage,
        path: Vec<(u64, InternalPage)>,
    ) -> Result<()> {
        let page_size = self.pager.page_size() as usize;
        let mid = leaf.cells.len() / 2;
        let right_cells = leaf.cells[mid..].to_vec();
        let left_cells = leaf.cells[..mid].to_vec();
        let separator = right_cells[0].key.clone();

        let right_id = self.pager.allocate()?;
        let right_page = LeafPage {
            next_leaf: leaf.next_leaf,
            cells: right_cells,
        };
        let left_page = LeafPage {
            next_leaf: right_id as u32,
            cells: left_cells,
        };

        self.pager
            .write_page(leaf_id, &left_page.encode(page_size)?)?;
        self.pager
            .write_page(right_id, &right_page.encode(page_size)?)?;

        self.propagate_split(separator, right_id as u32, path)
    }

    /// Inserts `(separator, new_child)` into the parent chain, splitting
    /// internal pages upward as needed and creating a new root if the split
    /// reaches the top (spec.md §4.5).
    fn propagate_split(
        &mut self,
        mut separator: Vec<u8>,
        mut new_child: u32,
        mut path: Vec<(u64, InternalPage)>,
    ) -> Result<()> {
        let page_size = self.pager.page_size() as usize;
        loop {
            let Some((page_id, mut internal)) = path.pop() else {
                // Split reached the root: create a new internal root.
                let new_root_id = self.pager.allocate()?;
                let mut root = InternalPage::new(new_child);
                root.cells.push(InternalCell {
                    key: separator,
                    child_page: self.root as u32,
                });
                // Keep separator/child ordering consistent: the old root
                // covers keys < separator, new_child covers the rest.
                self.pager
                    .write_page(new_root_id, &root.encode(page_size)?)?;
                self.root = new_root_id;
                return Ok(());
            };

            let at = internal
                .cells
                .iter()
                .position(|c| separator.as_slice() < c.key.as_slice())
                .unwrap_or(internal.cells.len());
            internal.cells.insert(
                at,
                InternalCell {
                    key: separator.clone(),
                    child_page: new_child,
                },
            );

            if internal.fits(page_size) {
                self.pager
                    .write_page(page_id, &internal.encode(page_size)?)?;
                return Ok(());
            }

            let mid = internal.cells.len() / 2;
            let right_cells = internal.cells[mid + 1..].to_vec();
            let left_cells = internal.cells[..mid].to_vec();
            let up_separator = internal.cells[mid].key.clone();

            let right_id = self.pager.allocate()?;
            let right_page = InternalPage {
                right_child: internal.right_child,
                cells: right_cells,
            };
            let left_page = InternalPage {
                right_child: internal.cells[mid].child_page,
                cells: left_cells,
            };
            self.pager
                .write_page(page_id, &left_page.encode(page_size)?)?;
            self.pager
                .write_page(right_id, &right_page.encode(page_size)?)?;

            separator = up_separator;
            new_child = right_id as u32;
        }
    }

    /// Removes the cell for `key`, if present. No rebalancing: a leaf that
    /// stays non-empty is simply rewritten in place, even if thin. A leaf
    /// that empties out entirely is unlinked from its parent separator and
    /// the previous leaf's `next_leaf` pointer, then freed — the root leaf
    /// is the one exception, since it has no parent to unlink from and
    /// must stay in place as the tree's empty state (spec.md §9).
    pub fn delete(&mut self, key: &[u8]) -> Result<bool> {
        let (leaf_id, path) = self.path_to_leaf(key)?;
        let page_size = self.pager.page_size() as usize;
        let buf = self.pager.read_page(leaf_id)?;
        let mut leaf = LeafPage::decode(&buf)?;
        let Some(idx) = leaf.find(key) else {
            return Ok(false);
        };
        if let CellValue::Overflow(page) = leaf.cells[idx].value {
            overflow::free_overflow_chain(self.pager, page)?;
        }
        leaf.cells.remove(idx);

        if leaf.cells.is_empty() && !path.is_empty() {
            self.unlink_empty_leaf(leaf_id, leaf.next_leaf, path)?;
        } else {
            self.pager.write_page(leaf_id, &leaf.encode(page_size)?)?;
        }
        Ok(true)
    }

    /// Removes `leaf_id` from its parent's separator/child list and from
    /// the previous leaf's `next_leaf` pointer, then returns it to the
    /// freelist. `path` is the root-to-parent chain `path_to_leaf` already
    /// walked to find `leaf_id`, so its last entry is the immediate parent.
    fn unlink_empty_leaf(
        &mut self,
        leaf_id: u64,
        next_leaf: u32,
        mut path: Vec<(u64, InternalPage)>,
    ) -> Result<()> {
        let page_size = self.pager.page_size() as usize;
        let (parent_id, mut parent) = path.pop().expect("caller checked path is non-empty");

        if let Some(i) = parent
            .cells
            .iter()
            .position(|c| c.child_page == leaf_id as u32)
        {
            parent.cells.remove(i);
        } else if parent.right_child == leaf_id as u32 {
            if let Some(last) = parent.cells.pop() {
                parent.right_child = last.child_page;
            }
        }
        self.pager
            .write_page(parent_id, &parent.encode(page_size)?)?;

        if let Some(prev_id) = self.find_leaf_pointing_to(leaf_id)? {
            let prev_buf = self.pager.read_page(prev_id)?;
            let mut prev = LeafPage::decode(&prev_buf)?;
            prev.next_leaf = next_leaf;
            self.pager.write_page(prev_id, &prev.encode(page_size)?)?;
        }

        self.pager.free(leaf_id)
    }

    /// Walks the leaf chain from the leftmost leaf looking for whichever
    /// leaf's `next_leaf` currently points at `target`. Returns `None` when
    /// `target` was the leftmost leaf (nothing points to it).
    fn find_leaf_pointing_to(&self, target: u64) -> Result<Option<u64>> {
        let mut page_id = self.leftmost_leaf_id()?;
        if page_id == target {
            return Ok(None);
        }
        loop {
            let leaf = LeafPage::decode(&self.pager.read_page(page_id)?)?;
            if leaf.next_leaf as u64 == target {
                return Ok(Some(page_id));
            }
            if leaf.next_leaf == 0 {
                return Ok(None);
            }
            page_id = leaf.next_leaf as u64;
        }
    }

    /// Removes the cell for `key` only if its current value equals
    /// `expected` (spec.md §4.7 `delete_key_value`).
    pub fn delete_key_value(&mut self, key: &[u8], expected: &[u8]) -> Result<bool> {
        match self.find(key)? {
            Some(current) if current == expected => self.delete(key),
            _ => Ok(false),
        }
    }

    fn leftmost_leaf_id(&self) -> Result<u64> {
        let mut page_id = self.root;
        loop {
            let buf = self.read_page(page_id)?;
            match decode_node(&buf)? {
                Node::Leaf(_) => return Ok(page_id),
                Node::Internal(internal) => {
                    page_id = internal
                        .cells
                        .first()
                        .map(|c| c.child_page as u64)
                        .unwrap_or(internal.right_child as u64);
                }
            }
        }
    }

    /// Opens a forward cursor starting at the leftmost leaf.
    pub fn open_cursor(&self) -> Result<Cursor<'a>> {
        let page_id = self.leftmost_leaf_id()?;
        Cursor::new(self.pager, page_id, self.snapshot_lsn)
    }

    /// Opens a forward cursor positioned at the first key `>= start`.
    pub fn open_cursor_from(&self, start: &[u8]) -> Result<Cursor<'a>> {
        let (leaf_id, _) = self.path_to_leaf(start)?;
        let mut cursor = Cursor::new(self.pager, leaf_id, self.snapshot_lsn)?;
        cursor.seek(start)?;
        Ok(cursor)
    }
}
