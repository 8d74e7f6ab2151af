//! The memory-mapped segment backing.

use crate::error::{Error, Result};
use std::{
    fs::{File, OpenOptions},
    os::fd::AsRawFd,
    path::Path,
    ptr,
    sync::atomic::{AtomicBool, Ordering},
};

/// A shared, file-backed memory mapping.
///
/// The region is unmapped on drop. Sync and residency control are explicit.
pub(crate) struct Mapping {
    ptr: *mut u8,
    len: usize,
}

impl Mapping {
    /// Maps `len` bytes of `file` shared, writable when `write` is set.
    pub fn map(file: &File, len: usize, write: bool) -> std::io::Result<Self> {
        assert!(len > 0);
        let mut prot = libc::PROT_READ;
        if write {
            prot |= libc::PROT_WRITE;
        }
        let ptr = unsafe {
            libc::mmap(
                ptr::null_mut(),
                len,
                prot,
                libc::MAP_SHARED,
                file.as_raw_fd(),
                0,
            )
        };
        if ptr == libc::MAP_FAILED {
            return Err(std::io::Error::last_os_error());
        }
        Ok(Mapping {
            ptr: ptr as *mut u8,
            len,
        })
    }

    pub fn len(&self) -> usize {
        self.len
    }

    /// Synchronously flushes the mapped range to the backing file.
    pub fn sync(&self) -> std::io::Result<()> {
        let res = unsafe { libc::msync(self.ptr as *mut libc::c_void, self.len, libc::MS_SYNC) };
        if res != 0 {
            return Err(std::io::Error::last_os_error());
        }
        Ok(())
    }

    /// Pins the mapped pages in physical memory.
    pub fn lock_resident(&self) -> std::io::Result<()> {
        let res = unsafe { libc::mlock(self.ptr as *const libc::c_void, self.len) };
        if res != 0 {
            return Err(std::io::Error::last_os_error());
        }
        Ok(())
    }

    /// Releases pages pinned by [`Self::lock_resident`].
    pub fn unlock_resident(&self) -> std::io::Result<()> {
        let res = unsafe { libc::munlock(self.ptr as *const libc::c_void, self.len) };
        if res != 0 {
            return Err(std::io::Error::last_os_error());
        }
        Ok(())
    }

    /// # Safety
    ///
    /// The caller must ensure no concurrent writer mutates the range being
    /// read for the lifetime of the slice.
    pub unsafe fn slice(&self) -> &[u8] {
        std::slice::from_raw_parts(self.ptr, self.len)
    }

    /// # Safety
    ///
    /// The caller must ensure exclusive access to the range being written for
    /// the lifetime of the slice.
    #[allow(clippy::mut_from_ref)]
    pub unsafe fn slice_mut(&self) -> &mut [u8] {
        std::slice::from_raw_parts_mut(self.ptr, self.len)
    }

    fn base(&self) -> *mut u8 {
        self.ptr
    }
}

impl Drop for Mapping {
    fn drop(&mut self) {
        unsafe {
            let _ = libc::munmap(self.ptr as *mut libc::c_void, self.len);
        }
    }
}

// SAFETY: the mapping is a raw region of shared memory; all mutation goes
// through the accessors above, whose callers uphold the exclusion contract.
unsafe impl Send for Mapping {}
unsafe impl Sync for Mapping {}

/// A segment whose file is accessed through a shared memory map.
pub struct MappedSegment {
    map: Mapping,
    // Keeps the descriptor alive for the lifetime of the mapping.
    #[allow(unused)]
    file: File,
    locked: bool,
    writable: bool,
    closed: AtomicBool,
}

impl std::fmt::Debug for MappedSegment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MappedSegment").finish_non_exhaustive()
    }
}

impl MappedSegment {
    /// Opens and maps the segment file at `path`.
    ///
    /// An empty file is truncated up to `size` bytes first (read-write mode
    /// only); any other length mismatch fails `SegmentSizeMismatch`. The
    /// mapping is pinned with mlock on a best-effort basis: a failure to pin
    /// is logged and the segment stays usable.
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

        let map = Mapping::map(&file, size as usize, writable)?;
        let locked = match map.lock_resident() {
            Ok(()) => true,
            Err(err) => {
                tracing::warn!(
                    "failed to pin segment mapping {}: {err}",
                    path.display()
                );
                false
            }
        };

        Ok(MappedSegment {
            map,
            file,
            locked,
            writable,
            closed: AtomicBool::new(false),
        })
    }

    pub fn read_at(&self, buf: &mut [u8], off: u64) -> Result<()> {
        let off = off as usize;
        debug_assert!(off + buf.len() <= self.map.len());
        // SAFETY: bounds are guaranteed by the caller, and callers writing to
        // an overlapping range coordinate externally.
        unsafe {
            ptr::copy_nonoverlapping(self.map.base().add(off), buf.as_mut_ptr(), buf.len());
        }
        Ok(())
    }

    pub fn write_at(&self, buf: &[u8], off: u64) -> Result<()> {
        debug_assert!(self.writable);
        let off = off as usize;
        debug_assert!(off + buf.len() <= self.map.len());
        // SAFETY: as in `read_at`; disjoint concurrent writes are allowed.
        unsafe {
            ptr::copy_nonoverlapping(buf.as_ptr(), self.map.base().add(off), buf.len());
        }
        Ok(())
    }

    pub fn sync(&self) -> Result<()> {
        self.map.sync()?;
        Ok(())
    }

    /// Flushes the mapping and marks the segment closed. The unmap and the
    /// file close happen when the last handle drops, so an in-flight reader
    /// can never touch unmapped memory.
    pub fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Err(Error::Closed);
        }
        if self.writable {
            self.map.sync()?;
        }
        if self.locked {
            if let Err(err) = self.map.unlock_resident() {
                tracing::warn!("failed to unpin segment mapping: {err}");
            }
        }
        Ok(())
    }
}
