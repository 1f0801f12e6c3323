//! Sharded page cache with clock eviction (spec.md §4.2).
//!
//! 16 shards by default, page ids hashed to a shard with splitmix64. Each
//! shard holds its own
//! insertion-ordered clock array plus a page-id -> slot index map, so
//! writers/readers on different shards never contend.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::error::{Error, Result};

#[derive(Clone)]
pub(crate) struct Entry {
    pub data: Vec<u8>,
    pub pinned: u32,
    pub dirty: bool,
    pub referenced: bool,
    pub lsn: u64,
}

enum Slot {
    Occupied { page_id: u64, entry: Entry },
    Tombstone,
}

struct Shard {
    capacity: usize,
    clock: Vec<Slot>,
    index: HashMap<u64, usize>,
    hand: usize,
    tombstones: usize,
}

impl Shard {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            clock: Vec::with_capacity(capacity),
            index: HashMap::new(),
            hand: 0,
            tombstones: 0,
        }
    }

    fn get(&mut self, page_id: u64) -> Option<&mut Entry> {
        let idx = *self.index.get(&page_id)?;
        match &mut self.clock[idx] {
            Slot::Occupied { entry, .. } => {
                entry.referenced = true;
                Some(entry)
            }
            Slot::Tombstone => None,
        }
    }

    fn compact_if_needed(&mut self) {
        if self.clock.is_empty() || self.tombstones * 4 < self.clock.len() {
            return;
        }
        let mut fresh = Vec::with_capacity(self.clock.len());
        for slot in self.clock.drain(..) {
            if let Slot::Occupied { page_id, entry } = slot {
                let new_idx = fresh.len();
                fresh.push(Slot::Occupied { page_id, entry });
                self.index.insert(page_id, new_idx);
            }
        }
        self.clock = fresh;
        self.tombstones = 0;
        self.hand = 0;
    }

    /// Admits a new entry, evicting via clock sweep if at capacity. The
    /// `write_back` callback is invoked on a dirty victim before it is
    /// dropped, so no dirty page is ever silently discarded.
    fn admit(
        &mut self,
        page_id: u64,
        entry: Entry,
        write_back: &mut dyn FnMut(u64, &Entry) -> Result<()>,
    ) -> Result<()> {
        if let Some(&idx) = self.index.get(&page_id) {
            self.clock[idx] = Slot::Occupied { page_id, entry };
            return Ok(());
        }

        let live = self.clock.len() - self.tombstones;
        if live >= self.capacity {
            self.evict_one(write_back)?;
        }

        let idx = self.clock.len();
        self.clock.push(Slot::Occupied { page_id, entry });
        self.index.insert(page_id, idx);
        Ok(())
    }

    fn evict_one(&mut self, write_back: &mut dyn FnMut(u64, &Entry) -> Result<()>) -> Result<()> {
        if self.clock.is_empty() {
            return Err(Error::internal("cache capacity error: no entries to evict"));
        }
        let limit = 2 * (self.clock.len() - self.tombstones).max(1);
        for _ in 0..limit {
            if self.hand >= self.clock.len() {
                self.hand = 0;
            }
            let idx = self.hand;
            self.hand += 1;

            let evict_now = match &mut self.clock[idx] {
                Slot::Tombstone => None,
                Slot::Occupied { entry, .. } => {
                    if entry.pinned > 0 {
                        None
                    } else if entry.referenced {
                        entry.referenced = false;
                        None
                    } else {
                        Some(())
                    }
                }
            };

            if evict_now.is_some() {
                if let Slot::Occupied { page_id, entry } = &self.clock[idx] {
                    if entry.dirty {
                        write_back(*page_id, entry)?;
                    }
                    self.index.remove(page_id);
                }
                self.clock[idx] = Slot::Tombstone;
                self.tombstones += 1;
                self.compact_if_needed();
                return Ok(());
            }
        }
        Err(Error::internal(
            "cache capacity error: all entries pinned, cannot evict",
        ))
    }

    /// Refreshes a page's cached image with a clean copy, e.g. after a
    /// direct checkpoint write. If the slot is already occupied and dirty
    /// again (a concurrent writer re-dirtied it since this copy was taken),
    /// the newer dirty data wins and the refresh is skipped.
    fn insert_clean(
        &mut self,
        page_id: u64,
        data: Vec<u8>,
        lsn: u64,
        write_back: &mut dyn FnMut(u64, &Entry) -> Result<()>,
    ) -> Result<()> {
        if let Some(&idx) = self.index.get(&page_id) {
            if let Slot::Occupied { entry, .. } = &self.clock[idx] {
                if entry.dirty {
                    return Ok(());
                }
            }
        }
        let entry = Entry {
            data,
            pinned: 0,
            dirty: false,
            referenced: true,
            lsn,
        };
        self.admit(page_id, entry, write_back)
    }
}

pub(crate) struct Cache {
    shards: Vec<Mutex<Shard>>,
}

#[inline]
fn splitmix64(mut x: u64) -> u64 {
    x = x.wrapping_add(0x9E3779B97F4A7C15);
    let mut z = x;
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58476D1CE4E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D049BB133111EB);
    z ^ (z >> 31)
}

impl Cache {
    pub(crate) fn new(shard_count: usize, capacity_pages: usize) -> Self {
        let per_shard = (capacity_pages / shard_count.max(1)).max(1);
        let shards = (0..shard_count.max(1))
            .map(|_| Mutex::new(Shard::new(per_shard)))
            .collect();
        Self { shards }
    }

    fn shard_for(&self, page_id: u64) -> &Mutex<Shard> {
        let idx = (splitmix64(page_id) as usize) % self.shards.len();
        &self.shards[idx]
    }

    /// Returns a clone of the cached page's bytes plus its dirty/lsn state,
    /// incrementing the pin count, or `None` on a cache miss.
    pub(crate) fn pin(&self, page_id: u64) -> Option<(Vec<u8>, bool, u64)> {
        let mut shard = self.shard_for(page_id).lock().unwrap();
        let entry = shard.get(page_id)?;
        entry.pinned += 1;
        Some((entry.data.clone(), entry.dirty, entry.lsn))
    }

    pub(crate) fn unpin(&self, page_id: u64, dirty: bool) {
        let mut shard = self.shard_for(page_id).lock().unwrap();
        if let Some(entry) = shard.get(page_id) {
            if entry.pinned > 0 {
                entry.pinned -= 1;
            }
            if dirty {
                entry.dirty = true;
            }
        }
    }

    /// Loads `data` into the cache as a clean (or dirty, if `mark_dirty`)
    /// entry, evicting per clock policy if the shard is full.
    pub(crate) fn load(
        &self,
        page_id: u64,
        data: Vec<u8>,
        mark_dirty: bool,
        write_back: &mut dyn FnMut(u64, &[u8]) -> Result<()>,
    ) -> Result<()> {
        let mut shard = self.shard_for(page_id).lock().unwrap();
        let entry = Entry {
            data,
            pinned: 0,
            dirty: mark_dirty,
            referenced: true,
            lsn: 0,
        };
        shard.admit(page_id, entry, &mut |pid, e| write_back(pid, &e.data))
    }

    pub(crate) fn write(
        &self,
        page_id: u64,
        data: Vec<u8>,
        write_back: &mut dyn FnMut(u64, &[u8]) -> Result<()>,
    ) -> Result<()> {
        let mut shard = self.shard_for(page_id).lock().unwrap();
        if let Some(entry) = shard.get(page_id) {
            entry.data = data;
            entry.dirty = true;
            return Ok(());
        }
        let entry = Entry {
            data,
            pinned: 0,
            dirty: true,
            referenced: true,
            lsn: 0,
        };
        shard.admit(page_id, entry, &mut |pid, e| write_back(pid, &e.data))
    }

    /// Collects every dirty page currently cached, for WAL commit snapshot.
    pub(crate) fn snapshot_dirty(&self) -> Vec<(u64, Vec<u8>)> {
        let mut out = Vec::new();
        for shard_mutex in &self.shards {
            let shard = shard_mutex.lock().unwrap();
            for slot in &shard.clock {
                if let Slot::Occupied { page_id, entry } = slot {
                    if entry.dirty {
                        out.push((*page_id, entry.data.clone()));
                    }
                }
            }
        }
        out
    }

    pub(crate) fn mark_committed(&self, page_ids: &[u64], lsn: u64) {
        for &page_id in page_ids {
            let mut shard = self.shard_for(page_id).lock().unwrap();
            if let Some(entry) = shard.get(page_id) {
                entry.dirty = false;
                entry.lsn = lsn;
            }
        }
    }

    /// Evicts every dirty entry without writing it back (rollback). Returns
    /// the evicted page ids.
    pub(crate) fn evict_dirty(&self) -> Vec<u64> {
        let mut evicted = Vec::new();
        for shard_mutex in &self.shards {
            let mut shard = shard_mutex.lock().unwrap();
            let mut to_remove = Vec::new();
            for (idx, slot) in shard.clock.iter().enumerate() {
                if let Slot::Occupied { page_id, entry } = slot {
                    if entry.dirty {
                        to_remove.push((idx, *page_id));
                    }
                }
            }
            for (idx, page_id) in to_remove {
                shard.clock[idx] = Slot::Tombstone;
                shard.index.remove(&page_id);
                shard.tombstones += 1;
                evicted.push(page_id);
            }
            shard.compact_if_needed();
        }
        evicted
    }

    /// True if the cached entry for `page_id` is dirty or was committed
    /// after `snapshot_lsn` — the pager falls back to a direct file read in
    /// that case so readers never see uncommitted state (spec.md §4.2).
    pub(crate) fn is_unsafe_for_snapshot(&self, page_id: u64, snapshot_lsn: u64) -> Option<bool> {
        let mut shard = self.shard_for(page_id).lock().unwrap();
        let entry = shard.get(page_id)?;
        Some(entry.dirty || entry.lsn > snapshot_lsn)
    }

    pub(crate) fn insert_clean(
        &self,
        page_id: u64,
        data: Vec<u8>,
        lsn: u64,
        write_back: &mut dyn FnMut(u64, &[u8]) -> Result<()>,
    ) -> Result<()> {
        let mut shard = self.shard_for(page_id).lock().unwrap();
        shard.insert_clean(page_id, data, lsn, &mut |pid, e| write_back(pid, &e.data))
    }

    /// Drops a cached entry without writing it back. Used when a page is
    /// repurposed by the freelist, so a stale cached copy is never served.
    pub(crate) fn invalidate(&self, page_id: u64) {
        let mut shard = self.shard_for(page_id).lock().unwrap();
        if let Some(&idx) = shard.index.get(&page_id) {
            shard.clock[idx] = Slot::Tombstone;
            shard.index.remove(&page_id);
            shard.tombstones += 1;
            shard.compact_if_needed();
        }
    }
}
