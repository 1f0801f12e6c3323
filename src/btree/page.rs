//! B+Tree page layout (spec.md §3).
//!
//! Keys are stored as length-prefixed byte strings rather than a bare
//! integer varint: table trees key on a rowid encoded as 8-byte big-endian
//! (`rowid_key`, preserving numeric order lexicographically), while index
//! trees key on the indexed column's encoded bytes with the owning rowid
//! appended, per spec.md §4.7's "rowid is decoded from the tail of the
//! variable-length key". A single cell format serves both.

use crate::codec::varint::{read_uvarint, uvarint_len, write_uvarint};
use crate::consts::{
    BTREE_CELLS_START, BTREE_OFF_CELL_COUNT, BTREE_OFF_SIDE_PTR, BTREE_OFF_TYPE,
    BTREE_PAGE_TYPE_INTERNAL, BTREE_PAGE_TYPE_LEAF, NO_PAGE,
};
use crate::error::{Error, Result};

/// Encodes a rowid as a big-endian byte key so byte-lexicographic order
/// matches numeric order.
pub fn rowid_key(rowid: u64) -> Vec<u8> {
    rowid.to_be_bytes().to_vec()
}

pub fn key_to_rowid(key: &[u8]) -> Result<u64> {
    if key.len() != 8 {
        return Err(Error::corruption("rowid key must be 8 bytes"));
    }
    let mut b = [0u8; 8];
    b.copy_from_slice(key);
    Ok(u64::from_be_bytes(b))
}

/// Builds an index-tree key: the indexed column's encoded bytes with the
/// owning rowid appended as a fixed 8-byte big-endian tail, so it decodes
/// from the tail rather than a fixed front offset (spec.md §4.7).
pub fn index_key(value_bytes: &[u8], rowid: u64) -> Vec<u8> {
    let mut key = Vec::with_capacity(value_bytes.len() + 8);
    key.extend_from_slice(value_bytes);
    key.extend_from_slice(&rowid.to_be_bytes());
    key
}

/// Splits an index key back into its value-bytes prefix and rowid tail.
pub fn index_key_parts(key: &[u8]) -> Result<(&[u8], u64)> {
    if key.len() < 8 {
        return Err(Error::corruption("index key shorter than rowid tail"));
    }
    let split = key.len() - 8;
    let mut b = [0u8; 8];
    b.copy_from_slice(&key[split..]);
    Ok((&key[..split], u64::from_be_bytes(b)))
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum CellValue {
    Inline(Vec<u8>),
    Overflow(u32),
}

#[derive(Debug, Clone)]
pub(crate) struct LeafCell {
    pub key: Vec<u8>,
    pub value: CellValue,
}

#[derive(Debug, Clone)]
pub(crate) struct LeafPage {
    pub next_leaf: u32,
    pub cells: Vec<LeafCell>,
}

fn cell_control_len(value: &CellValue) -> usize {
    match value {
        CellValue::Inline(payload) => uvarint_len((payload.len() as u64) << 1) + payload.len(),
        CellValue::Overflow(page_id) => uvarint_len(((*page_id as u64) << 1) | 1),
    }
}

fn write_cell_control(body: &mut Vec<u8>, value: &CellValue) {
    match value {
        CellValue::Inline(payload) => {
            write_uvarint(body, (payload.len() as u64) << 1);
            body.extend_from_slice(payload);
        }
        CellValue::Overflow(page_id) => {
            write_uvarint(body, ((*page_id as u64) << 1) | 1);
        }
    }
}

impl LeafPage {
    pub fn new() -> Self {
        Self {
            next_leaf: NO_PAGE as u32,
            cells: Vec::new(),
        }
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() <= BTREE_CELLS_START || buf[BTREE_OFF_TYPE] != BTREE_PAGE_TYPE_LEAF {
            return Err(Error::corruption("expected leaf page"));
        }
        let cell_count = u16::from_le_bytes(
            buf[BTREE_OFF_CELL_COUNT..BTREE_OFF_CELL_COUNT + 2]
                .try_into()
                .unwrap(),
        ) as usize;
        let next_leaf = u32::from_le_bytes(
            buf[BTREE_OFF_SIDE_PTR..BTREE_OFF_SIDE_PTR + 4]
                .try_into()
                .unwrap(),
        );
        let mut offset = BTREE_CELLS_START;
        let mut cells = Vec::with_capacity(cell_count);
        for _ in 0..cell_count {
            let key_len = read_uvarint(buf, &mut offset)? as usize;
            if offset + key_len > buf.len() {
                return Err(Error::corruption("leaf cell key out of range"));
            }
            let key = buf[offset..offset + key_len].to_vec();
            offset += key_len;

            let control = read_uvarint(buf, &mut offset)?;
            let is_overflow = control & 1 == 1;
            let field = control >> 1;
            let value = if is_overflow {
                CellValue::Overflow(field as u32)
            } else {
                let len = field as usize;
                if offset + len > buf.len() {
                    return Err(Error::corruption("leaf cell payload out of range"));
                }
                let payload = buf[offset..offset + len].to_vec();
                offset += len;
                CellValue::Inline(payload)
            };
            cells.push(LeafCell { key, value });
        }
        Ok(Self { next_leaf, cells })
    }

    pub fn body_len(&self) -> usize {
        self.cells
            .iter()
            .map(|c| uvarint_len(c.key.len() as u64) + c.key.len() + cell_control_len(&c.value))
            .sum()
    }

    pub fn fits(&self, page_size: usize) -> bool {
        BTREE_CELLS_START + self.body_len() <= page_size
    }

    pub fn encode(&self, page_size: usize) -> Result<Vec<u8>> {
        if !self.fits(page_size) {
            return Err(Error::internal("leaf page does not fit page_size"));
        }
        let mut buf = vec![0u8; page_size];
        buf[BTREE_OFF_TYPE] = BTREE_PAGE_TYPE_LEAF;
        buf[BTREE_OFF_CELL_COUNT..BTREE_OFF_CELL_COUNT + 2]
            .copy_from_slice(&(self.cells.len() as u16).to_le_bytes());
        buf[BTREE_OFF_SIDE_PTR..BTREE_OFF_SIDE_PTR + 4]
            .copy_from_slice(&self.next_leaf.to_le_bytes());
        let mut body = Vec::with_capacity(self.body_len());
        for cell in &self.cells {
            write_uvarint(&mut body, cell.key.len() as u64);
            body.extend_from_slice(&cell.key);
            write_cell_control(&mut body, &cell.value);
        }
        buf[BTREE_CELLS_START..BTREE_CELLS_START + body.len()].copy_from_slice(&body);
        Ok(buf)
    }

    /// Binary search for an exact key match; cells are kept sorted.
    pub fn find(&self, key: &[u8]) -> Option<usize> {
        self.cells.binary_search_by(|c| c.key.as_slice().cmp(key)).ok()
    }

    /// Insertion point maintaining sort order (may equal `cells.len()`).
    pub fn insertion_point(&self, key: &[u8]) -> usize {
        match self.cells.binary_search_by(|c| c.key.as_slice().cmp(key)) {
            Ok(i) | Err(i) => i,
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct InternalCell {
    pub key: Vec<u8>,
    pub child_page: u32,
}

#[derive(Debug, Clone)]
pub(crate) struct InternalPage {
    pub right_child: u32,
    pub cells: Vec<InternalCell>,
}

impl InternalPage {
    pub fn new(right_child: u32) -> Self {
        Self {
            right_child,
            cells: Vec::new(),
        }
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() <= BTREE_CELLS_START || buf[BTREE_OFF_TYPE] != BTREE_PAGE_TYPE_INTERNAL {
            return Err(Error::corruption("expected internal page"));
        }
        let cell_count = u16::from_le_bytes(
            buf[BTREE_OFF_CELL_COUNT..BTREE_OFF_CELL_COUNT + 2]
                .try_into()
                .unwrap(),
        ) as usize;
        let right_child = u32::from_le_bytes(
            buf[BTREE_OFF_SIDE_PTR..BTREE_OFF_SIDE_PTR + 4]
                .try_into()
                .unwrap(),
        );
        let mut offset = BTREE_CELLS_START;
        let mut cells = Vec::with_capacity(cell_count);
        for _ in 0..cell_count {
            let key_len = read_uvarint(buf, &mut offset)? as usize;
            if offset + key_len > buf.len() {
                return Err(Error::corruption("internal cell key out of range"));
            }
            let key = buf[offset..offset + key_len].to_vec();
            offset += key_len;
            let child_page = read_uvarint(buf, &mut offset)? as u32;
            cells.push(InternalCell { key, child_page });
        }
        Ok(Self { right_child, cells })
    }

    pub fn body_len(&self) -> usize {
        self.cells
            .iter()
            .map(|c| {
                uvarint_len(c.key.len() as u64) + c.key.len() + uvarint_len(c.child_page as u64)
            })
            .sum()
    }

    pub fn fits(&self, page_size: usize) -> bool {
        BTREE_CELLS_START + self.body_len() <= page_size
    }

    pub fn encode(&self, page_size: usize) -> Result<Vec<u8>> {
        if !self.fits(page_size) {
            return Err(Error::internal("internal page does not fit page_size"));
        }
        let mut buf = vec![0u8; page_size];
        buf[BTREE_OFF_TYPE] = BTREE_PAGE_TYPE_INTERNAL;
        buf[BTREE_OFF_CELL_COUNT..BTREE_OFF_CELL_COUNT + 2]
            .copy_from_slice(&(self.cells.len() as u16).to_le_bytes());
        buf[BTREE_OFF_SIDE_PTR..BTREE_OFF_SIDE_PTR + 4]
            .copy_from_slice(&self.right_child.to_le_bytes());
        let mut body = Vec::with_capacity(self.body_len());
        for cell in &self.cells {
            write_uvarint(&mut body, cell.key.len() as u64);
            body.extend_from_slice(&cell.key);
            write_uvarint(&mut body, cell.child_page as u64);
        }
        buf[BTREE_CELLS_START..BTREE_CELLS_START + body.len()].copy_from_slice(&body);
        Ok(buf)
    }

    /// Finds the child to descend into for `key`: the first separator
    /// strictly greater than `key` names the child to its left; falling
    /// off the end follows the right-child pointer (spec.md §4.5).
    pub fn child_for(&self, key: &[u8]) -> u32 {
        for cell in &self.cells {
            if key < cell.key.as_slice() {
                return cell.child_page;
            }
        }
        self.right_child
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn leaf_roundtrip_inline_and_overflow_cells() {
        let mut page = LeafPage::new();
        page.next_leaf = 7;
        page.cells.push(LeafCell {
            key: rowid_key(1),
            value: CellValue::Inline(vec![1, 2, 3]),
        });
        page.cells.push(LeafCell {
            key: rowid_key(2),
            value: CellValue::Overflow(42),
        });
        let buf = page.encode(512).unwrap();
        let decoded = LeafPage::decode(&buf).unwrap();
        assert_eq!(decoded.next_leaf, 7);
        assert_eq!(decoded.cells.len(), 2);
        assert_eq!(decoded.cells[0].value, CellValue::Inline(vec![1, 2, 3]));
        assert_eq!(decoded.cells[1].value, CellValue::Overflow(42));
    }

    #[test]
    fn internal_roundtrip_and_child_lookup() {
        let mut page = InternalPage::new(99);
        page.cells.push(InternalCell {
            key: rowid_key(10),
            child_page: 1,
        });
        page.cells.push(InternalCell {
            key: rowid_key(20),
            child_page: 2,
        });
        let buf = page.encode(512).unwrap();
        let decoded = InternalPage::decode(&buf).unwrap();
        assert_eq!(decoded.child_for(&rowid_key(5)), 1);
        assert_eq!(decoded.child_for(&rowid_key(15)), 2);
        assert_eq!(decoded.child_for(&rowid_key(25)), 99);
    }

    #[test]
    fn oversized_page_refuses_to_encode() {
        let mut page = LeafPage::new();
        page.cells.push(LeafCell {
            key: rowid_key(1),
            value: CellValue::Inline(vec![0u8; 100]),
        });
        assert!(page.encode(16).is_err());
    }

    #[test]
    fn rowid_key_preserves_numeric_order() {
        assert!(rowid_key(1) < rowid_key(2));
        assert!(rowid_key(255) < rowid_key(256));
        assert_eq!(key_to_rowid(&rowid_key(123456)).unwrap(), 123456);
    }

    #[test]
    fn index_key_roundtrips_value_and_rowid() {
        let key = index_key(b"alice", 42);
        let (value, rowid) = index_key_parts(&key).unwrap();
        assert_eq!(value, b"alice");
        assert_eq!(rowid, 42);
    }
}
