//! The plain-file segment backing, used when memory mapping is disabled.

use crate::error::{Error, Result};
use std::{
    fs::{File, OpenOptions},
    io::ErrorKind,
    os::unix::fs::FileExt,
    path::Path,
    sync::atomic::{AtomicBool, Ordering},
};

/// A segment accessed through positional reads and writes on its file handle.
pub struct FileSegment {
    file: File,
    size: u64,
    closed: AtomicBool,
}

impl FileSegment {
    /// Opens the segment file at `path`, with the same length validation as
    /// the mapped backing.
    pub fn open(path: &Path, size: u64, writable: bool) -> Result<Self> {
        super::ensure_not_dir(path)?;

        let file = OpenOptions::new().read(true).write(writable).open(path)?;
        let len = file.metadata()?.len();
        if len != size {
            if len == 0 && writable {
                file.set_len(size)?;
            } else {
                return Err(Error::SegmentSizeMismatch {
                    expected: size,
                    found: len,
                });
            }
        }

        Ok(FileSegment {
            file,
            size,
            closed: AtomicBool::new(false),
        })
    }

    pub fn read_at(&self, buf: &mut [u8], off: u64) -> Result<()> {
        debug_assert!(off + buf.len() as u64 <= self.size);
        self.file.read_exact_at(buf, off).map_err(|err| {
            if err.kind() == ErrorKind::UnexpectedEof {
                Error::ShortIo
            } else {
                Error::Io(err)
            }
        })
    }

    pub fn write_at(&self, buf: &[u8], off: u64) -> Result<()> {
        debug_assert!(off + buf.len() as u64 <= self.size);
        self.file.write_all_at(buf, off).map_err(|err| {
            if err.kind() == ErrorKind::WriteZero {
                Error::ShortIo
            } else {
                Error::Io(err)
            }
        })
    }

    /// Flushes file buffers to stable storage (fdatasync semantics).
    pub fn sync(&self) -> Result<()> {
        self.file.sync_data()?;
        Ok(())
    }

    /// Marks the segment closed; the descriptor is released when the last
    /// handle drops.
    pub fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Err(Error::Closed);
        }
        Ok(())
    }
}
