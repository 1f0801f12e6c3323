//! Write-ahead log: durability for committed writes and the snapshot
//! overlay readers consult before the main file (spec.md §4.6).
//!
//! Writer, recovery scan and overlay live in separate modules; the WAL
//! itself is one file alongside the main database, `<path>-wal`, rather
//! than a directory of numbered segment files.

pub mod frame;
pub mod overlay;
pub mod recovery;

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::config::SyncMode;
use crate::error::Result;
use crate::pager::{Overlay as OverlayTrait, Pager, WalSink};
use crate::vfs::{read_exact_at, write_exact_at, Vfs, VfsFile};

use frame::Frame;
pub use overlay::WalOverlay;

/// Derives `path.ddb-wal` from `path.ddb` (spec.md §6).
pub fn wal_path_for(db_path: &Path) -> PathBuf {
    let mut name = db_path.as_os_str().to_owned();
    name.push("-wal");
    PathBuf::from(name)
}

pub struct Wal {
    vfs: Box<dyn Vfs>,
    file: Mutex<VfsFile>,
    overlay: Arc<WalOverlay>,
    next_lsn: AtomicU64,
    sync_mode: SyncMode,
    bytes_since_checkpoint: AtomicU64,
    // Page frames written since the last commit, held in memory so a
    // transaction's writes only become overlay-visible (and durable) once
    // its commit frame lands, never before.
    pending: Mutex<Vec<(u64, u64, Vec<u8>)>>,
}

impl Wal {
    /// Opens (creating if missing) the WAL file alongside `db_path`, without
    /// scanning it; call [`Wal::recover`] once to replay and reset it.
    pub fn open(vfs: Box<dyn Vfs>, db_path: &Path, sync_mode: SyncMode) -> Result<Self> {
        let path = wal_path_for(db_path);
        let file = vfs.open(&path, true)?;
        Ok(Self {
            vfs,
            file: Mutex::new(file),
            overlay: Arc::new(WalOverlay::new()),
            next_lsn: AtomicU64::new(1),
            sync_mode,
            bytes_since_checkpoint: AtomicU64::new(0),
            pending: Mutex::new(Vec::new()),
        })
    }

    /// The overlay to attach to the pager via `Pager::attach_overlay`.
    pub fn overlay(&self) -> Arc<dyn OverlayTrait> {
        self.overlay.clone()
    }

    /// Allocates the next log sequence number for a write transaction.
    pub fn next_lsn(&self) -> u64 {
        self.next_lsn.fetch_add(1, Ordering::SeqCst)
    }

    /// Reads, verifies and applies every committed frame already on disk,
    /// then truncates the WAL back to empty (spec.md §5.4 crash recovery).
    /// Returns the highest committed lsn found, so the caller can resume
    /// the lsn counter past it.
    pub fn recover(&self, pager: &Pager) -> Result<u64> {
        let len = {
            let file = self.file.lock().unwrap();
            self.vfs.size(&file)?
        };
        let mut buf = vec![0u8; len as usize];
        if len > 0 {
            let mut file = self.file.lock().unwrap();
            read_exact_at(self.vfs.as_ref(), &mut file, 0, &mut buf)?;
        }
        let state = recovery::scan(&buf)?;
        let max_lsn = state.max_committed_lsn;
        recovery::apply(pager, &state)?;
        self.truncate_locked()?;
        let resume_from = max_lsn.max(pager.header_snapshot().last_checkpoint_lsn);
        self.next_lsn.store(resume_from + 1, Ordering::SeqCst);
        Ok(max_lsn)
    }

    fn truncate_locked(&self) -> Result<()> {
        let mut file = self.file.lock().unwrap();
        self.vfs.truncate(&mut file, 0)?;
        self.vfs.fsync(&mut file)
    }

    /// Buffers a page frame for the in-progress transaction. Not durable or
    /// overlay-visible until `commit` is called.
    pub fn append_page_frame(&self, page_id: u64, payload: Vec<u8>, lsn: u64) -> Result<()> {
        let frame = Frame::page(page_id as u32, payload.clone(), lsn);
        {
            let mut file = self.file.lock().unwrap();
            let offset = self.vfs.size(&file)?;
            write_exact_at(self.vfs.as_ref(), &mut file, offset, &frame.encode())?;
        }
        self.bytes_since_checkpoint
            .fetch_add(frame.encoded_len() as u64, Ordering::Relaxed);
        self.pending.lock().unwrap().push((page_id, lsn, payload));
        Ok(())
    }

    /// Appends the commit frame, makes buffered pages overlay-visible, and
    /// fsyncs according to `sync_mode` (spec.md §4.6: `Full`/`Normal` sync
    /// every commit, `Deferred` batches and accepts losing the last batch).
    pub fn commit(&self, lsn: u64) -> Result<()> {
        let frame = Frame::commit(lsn);
        {
            let mut file = self.file.lock().unwrap();
            let offset = self.vfs.size(&file)?;
            write_exact_at(self.vfs.as_ref(), &mut file, offset, &frame.encode())?;
            if self.sync_mode != SyncMode::Deferred {
                self.vfs.fsync(&mut file)?;
            }
        }
        self.bytes_since_checkpoint
            .fetch_add(frame.encoded_len() as u64, Ordering::Relaxed);

        let pending = std::mem::take(&mut *self.pending.lock().unwrap());
        for (page_id, page_lsn, payload) in pending {
            self.overlay.record(page_id, page_lsn, payload);
        }
        log::debug!("wal: committed lsn {lsn}");
        Ok(())
    }

    /// Discards buffered page frames for a transaction that rolled back
    /// instead of committing; they were never fsynced or overlay-visible.
    pub fn discard_pending(&self) {
        self.pending.lock().unwrap().clear();
    }

    pub fn bytes_since_checkpoint(&self) -> u64 {
        self.bytes_since_checkpoint.load(Ordering::Relaxed)
    }

    /// Copies every committed-but-not-yet-checkpointed page version the
    /// overlay still holds (lsn in `(last checkpoint, checkpoint_lsn]`)
    /// straight to the main file. This is the only way committed data
    /// reaches the main file: by commit time the cache has already marked
    /// those pages clean (`mark_committed`), so `snapshot_dirty` sees
    /// nothing left to flush and a checkpoint driven off cache dirty state
    /// alone would truncate the WAL without ever copying the data it just
    /// discarded (spec.md §4.6, invariant 8.2).
    pub fn copy_committed_to_main(&self, pager: &Pager, checkpoint_lsn: u64) -> Result<()> {
        let pages = self.overlay.versions_up_to(checkpoint_lsn);
        let pages: Vec<(u64, Vec<u8>)> = pages
            .into_iter()
            .map(|(page_id, _lsn, payload)| (page_id, payload))
            .collect();
        pager.write_checkpoint_pages(&pages, checkpoint_lsn)
    }

    /// Copies committed pages to the main file, appends a checkpoint frame,
    /// truncates the WAL, and retires overlay versions the main file now
    /// carries (spec.md §4.6 checkpoint; §9's `checkpoint_timeout` is
    /// enforced by the caller around the reader-snapshot wait, not here).
    pub fn checkpoint(&self, pager: &Pager, checkpoint_lsn: u64) -> Result<()> {
        self.copy_committed_to_main(pager, checkpoint_lsn)?;
        let frame = Frame::checkpoint(checkpoint_lsn);
        {
            let mut file = self.file.lock().unwrap();
            let offset = self.vfs.size(&file)?;
            write_exact_at(self.vfs.as_ref(), &mut file, offset, &frame.encode())?;
            self.vfs.fsync(&mut file)?;
        }
        self.truncate_locked()?;
        self.overlay.retire_up_to(checkpoint_lsn);
        self.bytes_since_checkpoint.store(0, Ordering::Relaxed);
        log::debug!("wal: checkpoint at lsn {checkpoint_lsn}");
        Ok(())
    }
}

impl WalSink for Wal {
    /// Lets a dirty page evicted under cache pressure, before its owning
    /// transaction has committed, land in the WAL instead of the main file
    /// (spec.md §4.2). It joins the same `pending` buffer an explicit
    /// `append_page_frame` call would, so it becomes overlay-visible (and
    /// durable) exactly when that transaction's commit frame lands, not
    /// before — and is discarded along with the rest of `pending` on
    /// rollback.
    fn append_uncommitted(&self, page_id: u64, data: Vec<u8>, lsn: u64) -> Result<()> {
        self.append_page_frame(page_id, data, lsn)
    }
}
