//! Transaction bookkeeping: a single-writer mutex, reader snapshot
//! registration, and the min-active-reader bound a checkpoint must respect
//! (spec.md §5).
//!
//! `Wal` itself only knows about lsns and frames, never about how many
//! readers are pinned where; that coordination lives here, one layer up.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

use crate::error::{Error, Result};
use crate::pager::Pager;
use crate::wal::Wal;

/// Tracks the single writer slot, the last committed lsn, and every live
/// reader's pinned snapshot lsn.
pub struct TxnManager {
    writer_lock: Mutex<()>,
    last_committed_lsn: AtomicU64,
    next_reader_id: AtomicU64,
    readers: Mutex<HashMap<u64, u64>>,
}

impl TxnManager {
    pub fn new(last_committed_lsn: u64) -> Self {
        Self {
            writer_lock: Mutex::new(()),
            last_committed_lsn: AtomicU64::new(last_committed_lsn),
            next_reader_id: AtomicU64::new(1),
            readers: Mutex::new(HashMap::new()),
        }
    }

    pub fn last_committed_lsn(&self) -> u64 {
        self.last_committed_lsn.load(Ordering::SeqCst)
    }

    fn register_reader(&self, snapshot_lsn: u64) -> u64 {
        let id = self.next_reader_id.fetch_add(1, Ordering::SeqCst);
        self.readers.lock().unwrap().insert(id, snapshot_lsn);
        id
    }

    fn unregister_reader(&self, id: u64) {
        self.readers.lock().unwrap().remove(&id);
    }

    /// The oldest snapshot any live reader still depends on, or `None` if
    /// there are no live readers. A checkpoint must never retire WAL
    /// overlay versions above this bound (spec.md §5.2).
    pub fn min_active_reader_snapshot(&self) -> Option<u64> {
        self.readers.lock().unwrap().values().copied().min()
    }
}

/// A write transaction: holds the single writer slot for its lifetime and
/// tags every page it touches with one lsn, assigned up front so the WAL
/// commit frame and every buffered page frame agree on it.
pub struct WriteTxn<'a> {
    manager: &'a TxnManager,
    pager: &'a Pager,
    wal: &'a Wal,
    lsn: u64,
    _guard: MutexGuard<'a, ()>,
    finished: bool,
}

impl<'a> WriteTxn<'a> {
    pub fn begin(manager: &'a TxnManager, pager: &'a Pager, wal: &'a Wal) -> Self {
        let guard = manager.writer_lock.lock().unwrap();
        Self::new(manager, pager, wal, guard)
    }

    /// Like `begin`, but returns `Error::Busy` instead of blocking if the
    /// writer slot is already held (spec.md §7 BUSY: "used by non-blocking
    /// callers").
    pub fn try_begin(manager: &'a TxnManager, pager: &'a Pager, wal: &'a Wal) -> Result<Self> {
        let guard = manager
            .writer_lock
            .try_lock()
            .map_err(|_| Error::Busy)?;
        Ok(Self::new(manager, pager, wal, guard))
    }

    fn new(manager: &'a TxnManager, pager: &'a Pager, wal: &'a Wal, guard: MutexGuard<'a, ()>) -> Self {
        let lsn = wal.next_lsn();
        pager.begin_txn(lsn);
        Self {
            manager,
            pager,
            wal,
            lsn,
            _guard: guard,
            finished: false,
        }
    }

    pub fn lsn(&self) -> u64 {
        self.lsn
    }

    pub fn pager(&self) -> &'a Pager {
        self.pager
    }

    /// Writes a page through the pager's cache, tagged for this
    /// transaction's lsn; not durable or overlay-visible until `commit`.
    pub fn write_page(&self, page_id: u64, data: &[u8]) -> Result<()> {
        self.pager.write_page(page_id, data)
    }

    /// Appends every page dirtied by this transaction to the WAL, writes
    /// the commit frame, and marks those pages committed in the cache.
    pub fn commit(mut self) -> Result<u64> {
        let dirty = self.pager.snapshot_dirty_pages();
        for (page_id, data) in &dirty {
            self.wal.append_page_frame(*page_id, data.clone(), self.lsn)?;
        }
        self.wal.commit(self.lsn)?;
        let page_ids: Vec<u64> = dirty.iter().map(|(p, _)| *p).collect();
        self.pager.mark_committed(&page_ids, self.lsn);
        self.manager
            .last_committed_lsn
            .fetch_max(self.lsn, Ordering::SeqCst);
        self.finished = true;
        self.pager.end_txn();
        Ok(self.lsn)
    }

    /// Discards buffered WAL frames and rolls the pager back to its
    /// pre-transaction state (spec.md §5.4 rollback barrier).
    pub fn rollback(mut self) -> Result<()> {
        self.wal.discard_pending();
        self.pager.rollback()?;
        self.finished = true;
        self.pager.end_txn();
        Ok(())
    }
}

impl Drop for WriteTxn<'_> {
    fn drop(&mut self) {
        if !self.finished {
            self.wal.discard_pending();
            let _ = self.pager.rollback();
            self.pager.end_txn();
        }
    }
}

/// A read transaction: pins a snapshot lsn at `begin` and sees that and
/// only that snapshot for its whole lifetime, via `Pager::read_page_snapshot`.
pub struct ReadTxn<'a> {
    manager: &'a TxnManager,
    pager: &'a Pager,
    reader_id: u64,
    snapshot_lsn: u64,
}

impl<'a> ReadTxn<'a> {
    pub fn begin(manager: &'a TxnManager, pager: &'a Pager) -> Self {
        let snapshot_lsn = manager.last_committed_lsn();
        let reader_id = manager.register_reader(snapshot_lsn);
        Self {
            manager,
            pager,
            reader_id,
            snapshot_lsn,
        }
    }

    pub fn snapshot_lsn(&self) -> u64 {
        self.snapshot_lsn
    }

    pub fn read_page(&self, page_id: u64) -> Result<Vec<u8>> {
        self.pager.read_page_snapshot(page_id, self.snapshot_lsn)
    }
}

impl Drop for ReadTxn<'_> {
    fn drop(&mut self) {
        self.manager.unregister_reader(self.reader_id);
    }
}
