//! Pager: page cache, freelist, and rollback barrier over the single
//! database file (spec.md §4.2).

mod cache;
mod freelist;
mod header;
mod rollback;

use std::path::Path;
use std::sync::{Arc, Mutex, RwLock};

pub use header::{validate_page_size, DatabaseHeader};

use crate::error::{Error, Result};
use crate::vfs::{read_exact_at, write_exact_at, Vfs, VfsFile};
use cache::Cache;
use freelist::TrunkPage;
use rollback::RollbackBarrier;

const DEFAULT_CACHE_PAGES: usize = 2000;

/// Lets the pager consult a snapshot-aware overlay (the WAL) before
/// falling back to the on-disk page image, so readers on an older snapshot
/// never see a writer's uncommitted or not-yet-checkpointed changes.
pub trait Overlay: Send + Sync {
    fn lookup(&self, page_id: u64, snapshot_lsn: u64) -> Option<Vec<u8>>;
}

/// Lets the pager hand a dirty page being evicted under cache pressure to
/// the WAL instead of the main file, when that page's transaction hasn't
/// committed yet (spec.md §4.2: "dirty entries may only be evicted after
/// their containing transaction commits").
pub trait WalSink: Send + Sync {
    fn append_uncommitted(&self, page_id: u64, data: Vec<u8>, lsn: u64) -> Result<()>;
}

pub struct Pager {
    vfs: Box<dyn Vfs>,
    file: Mutex<VfsFile>,
    header: RwLock<DatabaseHeader>,
    cache: Cache,
    rollback: RollbackBarrier,
    overlay: RwLock<Option<Arc<dyn Overlay>>>,
    wal_sink: RwLock<Option<Arc<dyn WalSink>>>,
    current_txn_lsn: Mutex<Option<u64>>,
    page_size: u32,
    page_count: Mutex<u64>,
    txn_allocations: Mutex<Vec<u64>>,
    read_only: bool,
}

impl Pager {
    /// Creates a brand new database file with just the header page.
    pub fn create(vfs: Box<dyn Vfs>, path: &Path, page_size: u32) -> Result<Self> {
        validate_page_size(page_size)?;
        let mut file = vfs.open(path, true)?;
        vfs.truncate(&mut file, page_size as u64)?;

        let header = DatabaseHeader::new(page_size);
        let mut page_buf = vec![0u8; page_size as usize];
        let encoded = header.encode();
        page_buf[..encoded.len()].copy_from_slice(&encoded);
        write_exact_at(vfs.as_ref(), &mut file, 0, &page_buf)?;
        vfs.fsync(&mut file)?;

        Ok(Self {
            vfs,
            file: Mutex::new(file),
            header: RwLock::new(header),
            cache: Cache::new(crate::consts::CACHE_SHARD_COUNT, DEFAULT_CACHE_PAGES),
            rollback: RollbackBarrier::new(),
            overlay: RwLock::new(None),
            wal_sink: RwLock::new(None),
            current_txn_lsn: Mutex::new(None),
            page_size,
            page_count: Mutex::new(1),
            txn_allocations: Mutex::new(Vec::new()),
            read_only: false,
        })
    }

    /// Opens an existing database file, validating its header.
    pub fn open(vfs: Box<dyn Vfs>, path: &Path, read_only: bool) -> Result<Self> {
        let mut file = vfs.open(path, false)?;
        let mut hdr_buf = vec![0u8; crate::consts::HEADER_SIZE];
        read_exact_at(vfs.as_ref(), &mut file, 0, &mut hdr_buf)?;
        let header = DatabaseHeader::decode(&hdr_buf)?;
        let page_size = header.page_size;
        let file_size = vfs.size(&file)?;
        let page_count = file_size / page_size as u64;

        Ok(Self {
            vfs,
            file: Mutex::new(file),
            header: RwLock::new(header),
            cache: Cache::new(crate::consts::CACHE_SHARD_COUNT, DEFAULT_CACHE_PAGES),
            rollback: RollbackBarrier::new(),
            overlay: RwLock::new(None),
            wal_sink: RwLock::new(None),
            current_txn_lsn: Mutex::new(None),
            page_size,
            page_count: Mutex::new(page_count.max(1)),
            txn_allocations: Mutex::new(Vec::new()),
            read_only,
        })
    }

    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    pub fn page_count(&self) -> u64 {
        *self.page_count.lock().unwrap()
    }

    pub fn header_snapshot(&self) -> DatabaseHeader {
        self.header.read().unwrap().clone()
    }

    /// Applies `f` to the in-memory header and persists the result to page 1.
    pub fn update_header<F: FnOnce(&mut DatabaseHeader)>(&self, f: F) -> Result<()> {
        if self.read_only {
            return Err(Error::Readonly);
        }
        let mut h = self.header.write().unwrap();
        f(&mut h);
        self.persist_header(&h)
    }

    pub fn attach_overlay(&self, overlay: Arc<dyn Overlay>) {
        *self.overlay.write().unwrap() = Some(overlay);
    }

    /// Routes dirty-page eviction through `sink` instead of writing the
    /// main file directly, whenever a transaction is open (spec.md §4.2).
    pub fn attach_wal_sink(&self, sink: Arc<dyn WalSink>) {
        *self.wal_sink.write().unwrap() = Some(sink);
    }

    /// Marks `lsn` as the currently open write transaction, so a dirty page
    /// evicted before that transaction commits is appended to the WAL
    /// under the same lsn rather than written straight to the main file.
    pub fn begin_txn(&self, lsn: u64) {
        *self.current_txn_lsn.lock().unwrap() = Some(lsn);
    }

    /// Clears the in-flight transaction marker after commit or rollback.
    pub fn end_txn(&self) {
        *self.current_txn_lsn.lock().unwrap() = None;
    }

    /// A write-back closure for cache eviction: routes a dirty victim
    /// through the attached WAL sink (tagged with the open transaction's
    /// lsn) if one is attached and a transaction is open, otherwise writes
    /// it straight to the main file — the only safe choice once a page is
    /// already committed (no WAL sink/transaction in scope) or when no WAL
    /// is attached at all (plain pager unit tests).
    fn write_back_fn(&self) -> impl FnMut(u64, &[u8]) -> Result<()> + '_ {
        let sink = self.wal_sink.read().unwrap().clone();
        let lsn = *self.current_txn_lsn.lock().unwrap();
        let vfs = self.vfs.as_ref();
        let file = &self.file;
        let page_size = self.page_size;
        move |page_id: u64, data: &[u8]| -> Result<()> {
            match (&sink, lsn) {
                (Some(sink), Some(lsn)) => sink.append_uncommitted(page_id, data.to_vec(), lsn),
                _ => disk_write_raw(vfs, file, page_size, page_id, data),
            }
        }
    }

    fn disk_read(&self, page_id: u64) -> Result<Vec<u8>> {
        let mut file = self.file.lock().unwrap();
        let offset = (page_id - 1) * self.page_size as u64;
        let mut buf = vec![0u8; self.page_size as usize];
        read_exact_at(self.vfs.as_ref(), &mut file, offset, &mut buf)?;
        Ok(buf)
    }

    fn disk_write(&self, page_id: u64, data: &[u8]) -> Result<()> {
        let mut file = self.file.lock().unwrap();
        let offset = (page_id - 1) * self.page_size as u64;
        write_exact_at(self.vfs.as_ref(), &mut file, offset, data)
    }

    fn persist_header(&self, header: &DatabaseHeader) -> Result<()> {
        let mut page_buf = vec![0u8; self.page_size as usize];
        let encoded = header.encode();
        page_buf[..encoded.len()].copy_from_slice(&encoded);
        self.disk_write(1, &page_buf)
    }

    /// Reads a page, preferring the cache, falling back to disk.
    pub fn read_page(&self, page_id: u64) -> Result<Vec<u8>> {
        let _r = self.rollback.read();
        if let Some((data, _dirty, _lsn)) = self.cache.pin(page_id) {
            self.cache.unpin(page_id, false);
            return Ok(data);
        }
        let data = self.disk_read(page_id)?;
        self.cache
            .load(page_id, data.clone(), false, &mut self.write_back_fn())?;
        Ok(data)
    }

    /// Reads a page for a read transaction pinned at `snapshot_lsn`,
    /// consulting the overlay first (spec.md §5.3 snapshot isolation).
    pub fn read_page_snapshot(&self, page_id: u64, snapshot_lsn: u64) -> Result<Vec<u8>> {
        let _r = self.rollback.read();
        if let Some(overlay) = self.overlay.read().unwrap().as_ref() {
            if let Some(data) = overlay.lookup(page_id, snapshot_lsn) {
                return Ok(data);
            }
        }
        if let Some(unsafe_for_snapshot) = self.cache.is_unsafe_for_snapshot(page_id, snapshot_lsn)
        {
            if unsafe_for_snapshot {
                return self.disk_read(page_id);
            }
        }
        self.read_page(page_id)
    }

    /// Writes a page into the cache, marking it dirty. Not durable until a
    /// transaction commit writes it through the WAL.
    pub fn write_page(&self, page_id: u64, data: &[u8]) -> Result<()> {
        if self.read_only {
            return Err(Error::Readonly);
        }
        if data.len() != self.page_size as usize {
            return Err(Error::internal(format!(
                "write_page: buffer length {} does not match page_size {}",
                data.len(),
                self.page_size
            )));
        }
        self.cache
            .write(page_id, data.to_vec(), &mut self.write_back_fn())
    }

    /// Pins a page in the cache, loading it from disk on a miss. Callers
    /// must balance with `unpin`.
    pub fn pin(&self, page_id: u64) -> Result<Vec<u8>> {
        let _r = self.rollback.read();
        if let Some((data, _, _)) = self.cache.pin(page_id) {
            return Ok(data);
        }
        let data = self.disk_read(page_id)?;
        self.cache
            .insert_clean(page_id, data.clone(), 0, &mut self.write_back_fn())?;
        self.cache.pin(page_id);
        Ok(data)
    }

    pub fn unpin(&self, page_id: u64, dirty: bool) {
        self.cache.unpin(page_id, dirty);
    }

    /// Allocates a page, preferring a freelist entry over growing the file.
    pub fn allocate(&self) -> Result<u64> {
        if self.read_only {
            return Err(Error::Readonly);
        }
        let mut header = self.header.write().unwrap();
        if header.freelist_head_page != 0 {
            let trunk_id = header.freelist_head_page as u64;
            let trunk_buf = self.disk_read(trunk_id)?;
            let mut trunk = TrunkPage::decode(&trunk_buf)?;
            if let Some(page_id) = trunk.entries.pop() {
                header.freelist_count = header.freelist_count.saturating_sub(1);
                let buf = trunk.encode(self.page_size as usize);
                self.disk_write(trunk_id, &buf)?;
                self.persist_header(&header)?;
                self.cache.invalidate(page_id as u64);
                self.record_alloc(page_id as u64);
                return Ok(page_id as u64);
            }
            // Trunk exhausted: its own page becomes the allocation.
            let next = trunk.next_trunk;
            header.freelist_head_page = next;
            self.persist_header(&header)?;
            self.cache.invalidate(trunk_id);
            self.record_alloc(trunk_id);
            return Ok(trunk_id);
        }
        drop(header);

        let mut count = self.page_count.lock().unwrap();
        *count += 1;
        let new_id = *count;
        drop(count);
        self.record_alloc(new_id);
        Ok(new_id)
    }

    /// Returns `page_id` to the freelist.
    pub fn free(&self, page_id: u64) -> Result<()> {
        if self.read_only {
            return Err(Error::Readonly);
        }
        let mut header = self.header.write().unwrap();
        let capacity = TrunkPage::capacity(self.page_size as usize);

        if header.freelist_head_page == 0 {
            let trunk = TrunkPage::empty();
            let buf = trunk.encode(self.page_size as usize);
            self.disk_write(page_id, &buf)?;
            header.freelist_head_page = page_id as u32;
            header.freelist_count = 0;
            self.persist_header(&header)?;
            self.cache.invalidate(page_id);
            return Ok(());
        }

        let head_id = header.freelist_head_page as u64;
        let head_buf = self.disk_read(head_id)?;
        let mut head = TrunkPage::decode(&head_buf)?;
        if head.entries.len() < capacity {
            head.entries.push(page_id as u32);
            let buf = head.encode(self.page_size as usize);
            self.disk_write(head_id, &buf)?;
            header.freelist_count += 1;
        } else {
            let new_trunk = TrunkPage {
                next_trunk: head_id as u32,
                entries: Vec::new(),
            };
            let buf = new_trunk.encode(self.page_size as usize);
            self.disk_write(page_id, &buf)?;
            header.freelist_head_page = page_id as u32;
        }
        self.persist_header(&header)?;
        self.cache.invalidate(page_id);
        Ok(())
    }

    fn record_alloc(&self, page_id: u64) {
        self.txn_allocations.lock().unwrap().push(page_id);
    }

    /// Collects every dirty cached page, for the WAL commit path.
    pub fn snapshot_dirty_pages(&self) -> Vec<(u64, Vec<u8>)> {
        self.cache.snapshot_dirty()
    }

    /// Marks pages clean at `lsn` after they have been durably appended to
    /// the WAL, and clears the transaction's allocation list (a committed
    /// transaction's allocations are never rolled back).
    pub fn mark_committed(&self, page_ids: &[u64], lsn: u64) {
        self.cache.mark_committed(page_ids, lsn);
        self.txn_allocations.lock().unwrap().clear();
    }

    /// Rolls back the in-progress write transaction: evicts dirty cache
    /// entries without writing them back and returns pages allocated during
    /// the transaction to the freelist, all under the rollback barrier so
    /// no reader observes the intermediate state (spec.md §5.4).
    pub fn rollback(&self) -> Result<()> {
        let _guard = self.rollback.exclusive();
        self.cache.evict_dirty();
        let allocs = std::mem::take(&mut *self.txn_allocations.lock().unwrap());
        for page_id in allocs {
            self.free(page_id)?;
        }
        Ok(())
    }

    /// Writes every dirty cached page back to the main file, fsyncs, marks
    /// them clean at `checkpoint_lsn`, and records the checkpoint in the
    /// header (spec.md §4.6 checkpoint).
    pub fn flush_all(&self, checkpoint_lsn: u64) -> Result<()> {
        let dirty = self.cache.snapshot_dirty();
        for (page_id, data) in &dirty {
            self.disk_write(*page_id, data)?;
        }
        {
            let mut file = self.file.lock().unwrap();
            self.vfs.fsync(&mut file)?;
        }
        let page_ids: Vec<u64> = dirty.iter().map(|(p, _)| *p).collect();
        self.cache.mark_committed(&page_ids, checkpoint_lsn);
        self.update_header(|h| h.last_checkpoint_lsn = checkpoint_lsn)
    }

    /// Writes already-committed page images (read out of the WAL overlay by
    /// the caller) straight to the main file, independent of cache dirty
    /// state, then fsyncs once and records the checkpoint in the header
    /// (spec.md §4.6 checkpoint). Used by `Wal::checkpoint`, which is the
    /// only source of truth for "what survived a commit but never reached
    /// the main file" once pages have already been marked clean in cache.
    pub fn write_checkpoint_pages(
        &self,
        pages: &[(u64, Vec<u8>)],
        checkpoint_lsn: u64,
    ) -> Result<()> {
        for (page_id, data) in pages {
            self.disk_write(*page_id, data)?;
            self.cache
                .insert_clean(*page_id, data.clone(), checkpoint_lsn, &mut |pid, d| {
                    disk_write_raw(self.vfs.as_ref(), &self.file, self.page_size, pid, d)
                })?;
        }
        {
            let mut file = self.file.lock().unwrap();
            self.vfs.fsync(&mut file)?;
        }
        self.update_header(|h| h.last_checkpoint_lsn = checkpoint_lsn)
    }
}

fn disk_write_raw(
    vfs: &dyn Vfs,
    file: &Mutex<VfsFile>,
    page_size: u32,
    page_id: u64,
    data: &[u8],
) -> Result<()> {
    let mut guard = file.lock().unwrap();
    let offset = (page_id - 1) * page_size as u64;
    write_exact_at(vfs, &mut guard, offset, data)
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
    fn allocate_grows_file_then_reuses_freed_pages() {
        let pager = open_pager(2048);
        let a = pager.allocate().unwrap();
        let b = pager.allocate().unwrap();
        assert_ne!(a, b);
        pager.free(a).unwrap();
        let c = pager.allocate().unwrap();
        assert_eq!(c, a);
    }

    #[test]
    fn write_then_read_roundtrips_through_cache() {
        let pager = open_pager(2048);
        let page_id = pager.allocate().unwrap();
        let mut data = vec![0u8; 2048];
        data[0] = 42;
        pager.write_page(page_id, &data).unwrap();
        let read_back = pager.read_page(page_id).unwrap();
        assert_eq!(read_back, data);
    }

    #[test]
    fn write_then_read_roundtrips_after_eviction() {
        let pager = open_pager(2048);
        let page_id = pager.allocate().unwrap();
        let mut data = vec![0u8; 2048];
        data[10] = 7;
        pager.write_page(page_id, &data).unwrap();
        pager.flush_all(1).unwrap();
        // Force the page out of cache path entirely by reading straight
        // from disk semantics: flush_all already wrote it back, so a fresh
        // read still matches.
        let read_back = pager.read_page(page_id).unwrap();
        assert_eq!(read_back, data);
    }

    #[test]
    fn rollback_discards_dirty_pages_and_frees_allocations() {
        let pager = open_pager(2048);
        let before = pager.page_count();
        let page_id = pager.allocate().unwrap();
        pager.write_page(page_id, &vec![9u8; 2048]).unwrap();
        pager.rollback().unwrap();
        // The allocated page was returned to the freelist; next allocate
        // reuses it rather than growing the file further.
        let reused = pager.allocate().unwrap();
        assert_eq!(reused, page_id);
        assert_eq!(pager.page_count(), before + 1);
    }

    #[test]
    fn readonly_pager_rejects_writes() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("t.ddb");
        {
            let pager = Pager::create(Box::new(OsVfs), &path, 2048).unwrap();
            pager.flush_all(0).unwrap();
        }
        let ro = Pager::open(Box::new(OsVfs), &path, true).unwrap();
        assert!(ro.allocate().is_err());
        std::mem::forget(dir);
    }
}
