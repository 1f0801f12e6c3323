//! WAL recovery scan (spec.md §4.6, §5.4).
//!
//! Scan frames sequentially, stop at the first checksum failure or short
//! tail (a torn write in progress, not corruption), and apply only the
//! page versions
//! that belong to a transaction whose `COMMIT` frame was itself read
//! intact. An uncommitted tail — page frames with no following commit — is
//! discarded entirely, matching the durability contract in spec.md §5.4.

use std::collections::HashMap;

use crate::error::Result;
use crate::pager::Pager;

use super::frame::{Frame, FRAME_TYPE_CHECKPOINT, FRAME_TYPE_COMMIT, FRAME_TYPE_PAGE};

pub struct RecoveredState {
    pub pages: HashMap<u64, (Vec<u8>, u64)>,
    pub max_committed_lsn: u64,
}

/// Scans a raw WAL byte buffer and returns the set of page images to
/// replay, keyed by page id, each tagged with the lsn of the commit that
/// covers it. Frames after the last intact commit are discarded.
pub fn scan(buf: &[u8]) -> Result<RecoveredState> {
    let mut committed: HashMap<u64, (Vec<u8>, u64)> = HashMap::new();
    let mut pending: Vec<(u64, Vec<u8>, u64)> = Vec::new();
    let mut max_committed_lsn = 0u64;
    let mut pos = 0usize;

    loop {
        let decoded = match Frame::decode(&buf[pos..]) {
            Ok(Some(pair)) => pair,
            Ok(None) => break,
            Err(_) => {
                log::warn!("WAL recovery: discarding torn tail at byte offset {pos}");
                break;
            }
        };
        let (frame, consumed) = decoded;
        pos += consumed;

        match frame.frame_type {
            FRAME_TYPE_PAGE => {
                pending.push((frame.page_id as u64, frame.payload, frame.lsn));
            }
            FRAME_TYPE_COMMIT => {
                // Only frames tagged with this exact commit's lsn belong to
                // it. A page frame written by a transaction that was later
                // rolled back (evicted to the WAL under cache pressure
                // before the rollback, spec.md §4.2) carries an lsn that no
                // commit frame will ever match, and must stay in `pending`
                // rather than be swept up by some later, unrelated commit.
                let commit_lsn = frame.lsn;
                let (matching, rest): (Vec<_>, Vec<_>) = pending
                    .drain(..)
                    .partition(|(_, _, lsn)| *lsn == commit_lsn);
                pending = rest;
                for (page_id, payload, lsn) in matching {
                    committed
                        .entry(page_id)
                        .and_modify(|(existing_payload, existing_lsn)| {
                            if lsn >= *existing_lsn {
                                *existing_payload = payload.clone();
                                *existing_lsn = lsn;
                            }
                        })
                        .or_insert((payload, lsn));
                }
                max_committed_lsn = max_committed_lsn.max(commit_lsn);
            }
            FRAME_TYPE_CHECKPOINT => {
                // A checkpoint frame implies everything before it is already
                // durable in the main file; committed page images collected
                // so far remain valid (later frames may still override them).
                max_committed_lsn = max_committed_lsn.max(frame.lsn);
            }
            _ => {
                log::warn!("WAL recovery: ignoring unknown frame type {}", frame.frame_type);
            }
        }
    }

    if !pending.is_empty() {
        log::warn!(
            "WAL recovery: discarding {} uncommitted page frame(s) with no trailing commit",
            pending.len()
        );
    }

    Ok(RecoveredState {
        pages: committed,
        max_committed_lsn,
    })
}

/// Applies recovered page images directly to the pager and records the
/// checkpoint lsn.
pub fn apply(pager: &Pager, state: &RecoveredState) -> Result<()> {
    for (&page_id, (payload, _lsn)) in &state.pages {
        pager.write_page(page_id, payload)?;
    }
    if !state.pages.is_empty() {
        pager.flush_all(state.max_committed_lsn)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vfs::OsVfs;
    use tempfile::tempdir;

    fn open_pager(page_size: u32) -> Pager {
        let dir = tempdir().unwrap();
        let path = dir.path().join("t.ddb");
        std::mem::forget(dir);
        Pager::create(Box::new(OsVfs), &path, page_size).unwrap()
    }

    #[test]
    fn committed_frames_are_recovered() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&Frame::page(1, vec![1u8; 2048], 1).encode());
        buf.extend_from_slice(&Frame::commit(1).encode());
        let state = scan(&buf).unwrap();
        assert_eq!(state.pages.len(), 1);
        assert_eq!(state.max_committed_lsn, 1);
    }

    #[test]
    fn uncommitted_tail_is_discarded() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&Frame::page(1, vec![1u8; 2048], 1).encode());
        buf.extend_from_slice(&Frame::commit(1).encode());
        buf.extend_from_slice(&Frame::page(2, vec![2u8; 2048], 2).encode());
        // no commit for lsn 2
        let state = scan(&buf).unwrap();
        assert_eq!(state.pages.len(), 1);
        assert!(!state.pages.contains_key(&2));
    }

    #[test]
    fn torn_trailing_bytes_are_ignored_not_fatal() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&Frame::page(1, vec![1u8; 2048], 1).encode());
        buf.extend_from_slice(&Frame::commit(1).encode());
        buf.extend_from_slice(&[0xAAu8; 5]); // partial next frame header
        let state = scan(&buf).unwrap();
        assert_eq!(state.pages.len(), 1);
    }

    #[test]
    fn apply_writes_pages_and_checkpoints() {
        let pager = open_pager(2048);
        let page_id = pager.allocate().unwrap();
        let mut buf = Vec::new();
        let payload = vec![5u8; 2048];
        buf.extend_from_slice(&Frame::page(page_id as u32, payload.clone(), 9).encode());
        buf.extend_from_slice(&Frame::commit(9).encode());
        let state = scan(&buf).unwrap();
        apply(&pager, &state).unwrap();
        assert_eq!(pager.read_page(page_id).unwrap(), payload);
        assert_eq!(pager.header_snapshot().last_checkpoint_lsn, 9);
    }
}
