//! Snapshot-filtered overlay over committed-but-not-yet-checkpointed WAL
//! frames (spec.md §4.6, §5.3).
//!
//! A reader pinned at `snapshot_lsn` must see every committed write with
//! `lsn <= snapshot_lsn` and none with a later `lsn`, even while the WAL
//! still holds page versions the main file hasn't been checkpointed to
//! yet. This map is the one piece of state the pager's [`Overlay`] trait
//! consults before falling back to the on-disk page image.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::pager::Overlay;

#[derive(Debug, Clone)]
struct Version {
    lsn: u64,
    payload: Vec<u8>,
}

#[derive(Default)]
pub struct WalOverlay {
    // page_id -> versions sorted ascending by lsn.
    versions: Mutex<HashMap<u64, Vec<Version>>>,
}

impl WalOverlay {
    pub fn new() -> Self {
        Self {
            versions: Mutex::new(HashMap::new()),
        }
    }

    /// Records a committed page version, keeping per-page versions sorted.
    pub fn record(&self, page_id: u64, lsn: u64, payload: Vec<u8>) {
        let mut map = self.versions.lock().unwrap();
        let entries = map.entry(page_id).or_default();
        entries.push(Version { lsn, payload });
        entries.sort_by_key(|v| v.lsn);
    }

    /// Drops every version at or below `checkpoint_lsn`: the main file now
    /// holds that data, so the overlay no longer needs to carry it.
    pub fn retire_up_to(&self, checkpoint_lsn: u64) {
        let mut map = self.versions.lock().unwrap();
        map.retain(|_, entries| {
            entries.retain(|v| v.lsn > checkpoint_lsn);
            !entries.is_empty()
        });
    }

    pub fn clear(&self) {
        self.versions.lock().unwrap().clear();
    }

    /// The latest version at or below `checkpoint_lsn` for every page that
    /// has one, i.e. everything committed since the last checkpoint that
    /// still needs to reach the main file before this checkpoint truncates
    /// the WAL and retires these versions (spec.md §4.6).
    pub fn versions_up_to(&self, checkpoint_lsn: u64) -> Vec<(u64, u64, Vec<u8>)> {
        let map = self.versions.lock().unwrap();
        let mut out = Vec::new();
        for (&page_id, entries) in map.iter() {
            if let Some(v) = entries.iter().rev().find(|v| v.lsn <= checkpoint_lsn) {
                out.push((page_id, v.lsn, v.payload.clone()));
            }
        }
        out
    }
}

impl Overlay for WalOverlay {
    fn lookup(&self, page_id: u64, snapshot_lsn: u64) -> Option<Vec<u8>> {
        let map = self.versions.lock().unwrap();
        let entries = map.get(&page_id)?;
        entries
            .iter()
            .rev()
            .find(|v| v.lsn <= snapshot_lsn)
            .map(|v| v.payload.clone())
    }
}
