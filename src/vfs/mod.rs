//! VFS — abstract file I/O (spec.md §4.1).
//!
//! Everything above this layer (cache, WAL, B+Tree) operates on fully
//! materialized byte buffers; all blocking I/O is pushed to this boundary
//! (spec.md §9), kept behind a small trait rather than sprinkling
//! `std::fs` calls through the pager.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

pub mod fault;

/// A single open file handle, opaque to callers above the VFS.
pub struct VfsFile {
    pub(crate) file: File,
    pub(crate) path: PathBuf,
}

/// Abstract file I/O. The default implementation (`OsVfs`) talks to the
/// real filesystem; `fault::FaultVfs` wraps it to inject failures for crash
/// recovery tests.
pub trait Vfs: Send + Sync {
    fn open(&self, path: &Path, create_if_missing: bool) -> Result<VfsFile>;
    fn read_at(&self, file: &mut VfsFile, offset: u64, buf: &mut [u8]) -> Result<usize>;
    fn write_at(&self, file: &mut VfsFile, offset: u64, buf: &[u8]) -> Result<usize>;
    fn fsync(&self, file: &mut VfsFile) -> Result<()>;
    fn truncate(&self, file: &mut VfsFile, len: u64) -> Result<()>;
    fn size(&self, file: &VfsFile) -> Result<u64>;
}

/// Real filesystem implementation.
#[derive(Debug, Default, Clone, Copy)]
pub struct OsVfs;

impl Vfs for OsVfs {
    fn open(&self, path: &Path, create_if_missing: bool) -> Result<VfsFile> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(create_if_missing)
            .open(path)
            .map_err(|e| Error::Io(e).context(format!("open {}", path.display())))?;
        Ok(VfsFile {
            file,
            path: path.to_path_buf(),
        })
    }

    fn read_at(&self, file: &mut VfsFile, offset: u64, buf: &mut [u8]) -> Result<usize> {
        file.file
            .seek(SeekFrom::Start(offset))
            .map_err(Error::Io)?;
        let n = file.file.read(buf).map_err(Error::Io)?;
        Ok(n)
    }

    fn write_at(&self, file: &mut VfsFile, offset: u64, buf: &[u8]) -> Result<usize> {
        file.file
            .seek(SeekFrom::Start(offset))
            .map_err(Error::Io)?;
        file.file.write_all(buf).map_err(Error::Io)?;
        Ok(buf.len())
    }

    fn fsync(&self, file: &mut VfsFile) -> Result<()> {
        file.file.sync_all().map_err(Error::Io)
    }

    fn truncate(&self, file: &mut VfsFile, len: u64) -> Result<()> {
        file.file.set_len(len).map_err(Error::Io)
    }

    fn size(&self, file: &VfsFile) -> Result<u64> {
        Ok(file.file.metadata().map_err(Error::Io)?.len())
    }
}

/// Reads exactly `buf.len()` bytes at `offset`, translating a short read
/// into `Error::Corruption` as spec.md §4.1 requires.
pub fn read_exact_at(vfs: &dyn Vfs, file: &mut VfsFile, offset: u64, buf: &mut [u8]) -> Result<()> {
    let n = vfs.read_at(file, offset, buf)?;
    if n != buf.len() {
        return Err(Error::corruption(format!(
            "short read at offset {}: expected {} bytes, got {}",
            offset,
            buf.len(),
            n
        )));
    }
    Ok(())
}

/// Writes exactly `buf.len()` bytes at `offset`, translating a short write
/// into `Error::Io` as spec.md §4.1 requires.
pub fn write_exact_at(vfs: &dyn Vfs, file: &mut VfsFile, offset: u64, buf: &[u8]) -> Result<()> {
    let n = vfs.write_at(file, offset, buf)?;
    if n != buf.len() {
        return Err(Error::Io(std::io::Error::new(
            std::io::ErrorKind::WriteZero,
            format!(
                "short write at offset {}: expected {} bytes, wrote {}",
                offset,
                buf.len(),
                n
            ),
        )));
    }
    Ok(())
}
