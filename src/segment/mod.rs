//! Segment backings.
//!
//! A segment is one fixed-size file of the striped store. It can be backed
//! either by a shared memory map or by plain positional file I/O; both expose
//! the same positional read/write, sync and close operations.

use crate::error::{Error, Result};
use std::path::Path;

pub mod file;
pub mod mmap;
pub mod set;

use file::FileSegment;
use mmap::MappedSegment;

/// One segment of the store, behind either of the two backings.
pub enum Segment {
    Mapped(MappedSegment),
    Plain(FileSegment),
}

impl Segment {
    /// Copies `buf.len()` bytes out of the segment starting at `off`.
    ///
    /// The caller guarantees that `off + buf.len()` does not exceed the
    /// segment size.
    pub fn read_at(&self, buf: &mut [u8], off: u64) -> Result<()> {
        match self {
            Segment::Mapped(seg) => seg.read_at(buf, off),
            Segment::Plain(seg) => seg.read_at(buf, off),
        }
    }

    /// Copies `buf` into the segment starting at `off`. Bounds as `read_at`.
    pub fn write_at(&self, buf: &[u8], off: u64) -> Result<()> {
        match self {
            Segment::Mapped(seg) => seg.write_at(buf, off),
            Segment::Plain(seg) => seg.write_at(buf, off),
        }
    }

    /// Flushes the segment contents to stable storage.
    pub fn sync(&self) -> Result<()> {
        match self {
            Segment::Mapped(seg) => seg.sync(),
            Segment::Plain(seg) => seg.sync(),
        }
    }

    /// Flushes and marks the segment closed. A second close fails `Closed`.
    /// File handles and mappings are released when the last holder drops.
    pub fn close(&self) -> Result<()> {
        match self {
            Segment::Mapped(seg) => seg.close(),
            Segment::Plain(seg) => seg.close(),
        }
    }
}

/// Fails with [`Error::IsDirectory`] if a directory sits where a segment or
/// metadata file is expected. A path that does not exist yet is fine; any
/// other stat failure propagates.
pub(crate) fn ensure_not_dir(path: &Path) -> Result<()> {
    match std::fs::metadata(path) {
        Ok(md) if md.is_dir() => Err(Error::IsDirectory(path.to_path_buf())),
        Ok(_) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(Error::Io(err)),
    }
}
