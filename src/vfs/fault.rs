//! Fault-injecting VFS wrapper for crash-recovery tests (spec.md §4.1).
//!
//! Named fail-points are armed before an operation and fire once, rather
//! than building out a full mocking framework.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

use crate::error::{Error, Result};
use crate::vfs::{Vfs, VfsFile};

#[derive(Debug, Clone, Copy)]
pub enum Fault {
    /// Fail the next matching call with an I/O error.
    IoError,
    /// Truncate a write to `n` bytes, simulating a short write.
    ShortWrite(usize),
    /// Simulate a torn write: only bytes before `offset` (absolute file
    /// offset) are actually written.
    TornWrite { at_offset: u64 },
}

#[derive(Default)]
struct FailPoints {
    points: HashMap<&'static str, Fault>,
}

/// Wraps an inner [`Vfs`] and injects faults armed via [`FaultVfs::arm`].
pub struct FaultVfs<V: Vfs> {
    inner: V,
    points: Mutex<FailPoints>,
}

impl<V: Vfs> FaultVfs<V> {
    pub fn new(inner: V) -> Self {
        Self {
            inner,
            points: Mutex::new(FailPoints::default()),
        }
    }

    /// Arms a named fail-point to fire on its next matching call.
    pub fn arm(&self, name: &'static str, fault: Fault) {
        self.points.lock().unwrap().points.insert(name, fault);
    }

    pub fn disarm(&self, name: &'static str) {
        self.points.lock().unwrap().points.remove(name);
    }

    fn take(&self, name: &'static str) -> Option<Fault> {
        self.points.lock().unwrap().points.remove(name)
    }
}

/// Lets a test keep an `Arc<FaultVfs<V>>` handle to arm fail-points after
/// handing a clone to `Pager`/`Wal`, which otherwise take ownership of their
/// `Box<dyn Vfs>`.
impl<V: Vfs> Vfs for std::sync::Arc<FaultVfs<V>> {
    fn open(&self, path: &Path, create_if_missing: bool) -> Result<VfsFile> {
        (**self).open(path, create_if_missing)
    }
    fn read_at(&self, file: &mut VfsFile, offset: u64, buf: &mut [u8]) -> Result<usize> {
        (**self).read_at(file, offset, buf)
    }
    fn write_at(&self, file: &mut VfsFile, offset: u64, buf: &[u8]) -> Result<usize> {
        (**self).write_at(file, offset, buf)
    }
    fn fsync(&self, file: &mut VfsFile) -> Result<()> {
        (**self).fsync(file)
    }
    fn truncate(&self, file: &mut VfsFile, len: u64) -> Result<()> {
        (**self).truncate(file, len)
    }
    fn size(&self, file: &VfsFile) -> Result<u64> {
        (**self).size(file)
    }
}

/// Write path is the only one faults are commonly injected on; fail-point
/// names match call sites (`"write_at"`, `"fsync"`), letting a test target
/// a specific operation without knowing internal call order.
impl<V: Vfs> Vfs for FaultVfs<V> {
    fn open(&self, path: &Path, create_if_missing: bool) -> Result<VfsFile> {
        if let Some(Fault::IoError) = self.take("open") {
            return Err(Error::Io(std::io::Error::other("injected fault: open")));
        }
        self.inner.open(path, create_if_missing)
    }

    fn read_at(&self, file: &mut VfsFile, offset: u64, buf: &mut [u8]) -> Result<usize> {
        if let Some(Fault::IoError) = self.take("read_at") {
            return Err(Error::Io(std::io::Error::other("injected fault: read_at")));
        }
        self.inner.read_at(file, offset, buf)
    }

    fn write_at(&self, file: &mut VfsFile, offset: u64, buf: &[u8]) -> Result<usize> {
        match self.take("write_at") {
            Some(Fault::IoError) => {
                return Err(Error::Io(std::io::Error::other("injected fault: write_at")))
            }
            Some(Fault::ShortWrite(n)) => {
                let n = n.min(buf.len());
                let written = self.inner.write_at(file, offset, &buf[..n])?;
                return Ok(written);
            }
            Some(Fault::TornWrite { at_offset }) => {
                if offset >= at_offset {
                    return Ok(0);
                }
                let allowed = (at_offset - offset).min(buf.len() as u64) as usize;
                let written = self.inner.write_at(file, offset, &buf[..allowed])?;
                return Ok(written);
            }
            None => {}
        }
        self.inner.write_at(file, offset, buf)
    }

    fn fsync(&self, file: &mut VfsFile) -> Result<()> {
        if let Some(Fault::IoError) = self.take("fsync") {
            return Err(Error::Io(std::io::Error::other("injected fault: fsync")));
        }
        self.inner.fsync(file)
    }

    fn truncate(&self, file: &mut VfsFile, len: u64) -> Result<()> {
        if let Some(Fault::IoError) = self.take("truncate") {
            return Err(Error::Io(std::io::Error::other("injected fault: truncate")));
        }
        self.inner.truncate(file, len)
    }

    fn size(&self, file: &VfsFile) -> Result<u64> {
        self.inner.size(file)
    }
}
