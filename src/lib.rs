#![warn(missing_docs)]

//! Low-level building blocks for a memory-mapped, segmented storage engine.
//!
//! The central abstraction is [`SegFile`]: a pseudo-file whose logical byte
//! stream is transparently striped across many fixed-size on-disk segments,
//! each optionally backed by a shared memory map. A store directory holds the
//! segments (`<prefix>0`, `<prefix>1`, ...) and a small metadata record
//! (`<prefix>mdata`) persisting the segment count, the segment size and the
//! number of used bytes. Writes grow the store by whole segments, a background
//! task pre-allocates one segment ahead of the write frontier, and metadata
//! flushes are coalesced so that concurrent sync requests share a single
//! msync.

#[cfg(not(target_family = "unix"))]
std::compile_error!("segfile only supports Unix-based OSs");

use parking_lot::Mutex;
use std::{
    io::SeekFrom,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use crate::{meta::Meta, segment::set::SegmentSet};

pub use error::{Error, Result};
pub use options::{Options, DEFAULT_PREFIX, DEFAULT_SEGMENT_SIZE};

pub mod codec;
mod error;
mod flush_group;
mod meta;
mod options;
mod segment;

/// The suffix of the metadata file, appended to the configured prefix.
const METADATA_FILE: &str = "mdata";

/// A virtual file striped across fixed-size segment files.
///
/// This is a lightweight handle and can be cloned cheaply; clones share the
/// same store. Positional reads and writes may run concurrently from any
/// number of threads. Sequential [`read`](Self::read), [`write`](Self::write)
/// and [`seek`](Self::seek) share one cursor and are serialized against each
/// other. Writes to overlapping byte ranges are not coordinated; callers that
/// need that coordination must layer their own locks.
#[derive(Clone)]
pub struct SegFile {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for SegFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SegFile").finish_non_exhaustive()
    }
}

struct Shared {
    segment_size: u64,
    /// Once free space past `used_bytes` drops below this many bytes, the
    /// next write hands a segment allocation to the background task.
    prealloc_threshold: u64,
    read_only: bool,
    meta: Meta,
    set: SegmentSet,
    /// Serializes all mutations of the segment list and `segment_count`.
    alloc: Mutex<()>,
    /// The cursor shared by sequential read/write/seek.
    stream: Mutex<u64>,
    closed: AtomicBool,
    preallocating: AtomicBool,
}

impl SegFile {
    /// Opens the store described by `options`.
    ///
    /// In read-write mode the directory and the metadata file are created if
    /// absent. In read-only mode they must already exist. The persisted
    /// segment size always wins over the requested one.
    pub fn open(options: &Options) -> Result<SegFile> {
        if options.path.as_os_str().is_empty() || options.segment_size == 0 {
            return Err(Error::InvalidOptions);
        }

        if !options.read_only {
            std::fs::create_dir_all(&options.path)?;
        }

        let meta_path = options
            .path
            .join(format!("{}{METADATA_FILE}", options.prefix));
        let meta = Meta::open(&meta_path, options.segment_size, options.read_only)?;

        let segment_size = meta.segment_size();
        let set = SegmentSet::load(
            &options.path,
            &options.prefix,
            meta.segment_count(),
            segment_size,
            options.memory_map,
            !options.read_only,
        )?;

        let file = SegFile {
            shared: Arc::new(Shared {
                segment_size,
                prealloc_threshold: segment_size / 2,
                read_only: options.read_only,
                meta,
                set,
                alloc: Mutex::new(()),
                stream: Mutex::new(0),
                closed: AtomicBool::new(false),
                preallocating: AtomicBool::new(false),
            }),
        };

        maybe_spawn_prealloc(&file.shared);

        Ok(file)
    }

    /// Reads into `buf` at the cursor and advances it by the bytes read.
    pub fn read(&self, buf: &mut [u8]) -> Result<usize> {
        self.check_open()?;
        let mut stream = self.shared.stream.lock();
        let n = self.read_at(buf, *stream)?;
        *stream += n as u64;
        Ok(n)
    }

    /// Writes `buf` at the cursor and advances it by the bytes written.
    pub fn write(&self, buf: &[u8]) -> Result<usize> {
        self.check_open()?;
        let mut stream = self.shared.stream.lock();
        let n = self.write_at(buf, *stream)?;
        *stream += n as u64;
        Ok(n)
    }

    /// Moves the cursor. `SeekFrom::End` is relative to [`size`](Self::size);
    /// a resolved position before the start of the file fails
    /// [`Error::InvalidParams`]. Returns the new position.
    pub fn seek(&self, pos: SeekFrom) -> Result<u64> {
        self.check_open()?;
        let mut stream = self.shared.stream.lock();
        let new = match pos {
            SeekFrom::Start(n) => i128::from(n),
            SeekFrom::Current(delta) => i128::from(*stream) + i128::from(delta),
            SeekFrom::End(delta) => {
                i128::from(self.shared.meta.used_bytes()) + i128::from(delta)
            }
        };
        if new < 0 || new > i128::from(u64::MAX) {
            return Err(Error::InvalidParams);
        }
        *stream = new as u64;
        Ok(*stream)
    }

    /// Reads `buf.len()` bytes starting at `off`.
    ///
    /// A read past the last allocated byte is clamped: the available bytes are
    /// returned as a short read without error, and a read with nothing
    /// available at all fails [`Error::EndOfStream`].
    pub fn read_at(&self, buf: &mut [u8], off: u64) -> Result<usize> {
        self.check_open()?;
        if buf.is_empty() {
            return Ok(0);
        }

        let size = self.shared.segment_size;
        let end = off
            .checked_add(buf.len() as u64)
            .ok_or(Error::InvalidParams)?;
        let count = self.shared.meta.segment_count();

        let (start_seg, mut end_seg, start_off, mut end_off) = bounds(size, off, end);
        if start_seg >= count {
            return Err(Error::EndOfStream);
        }

        let mut n = buf.len();
        if end_seg >= count {
            end_seg = count - 1;
            end_off = size;
            n = (count * size - off) as usize;
        }

        let segments = self.shared.set.snapshot(start_seg, end_seg);
        for (i, segment) in segments.iter().enumerate() {
            let index = start_seg + i as u64;
            let seg_start = if index == start_seg { start_off } else { 0 };
            let seg_end = if index == end_seg { end_off } else { size };
            let dst_start = (index * size + seg_start - off) as usize;
            let dst_end = (index * size + seg_end - off) as usize;
            segment.read_at(&mut buf[dst_start..dst_end], seg_start)?;
        }

        Ok(n)
    }

    /// Writes all of `buf` starting at `off`, allocating segments as needed.
    ///
    /// On success `size()` is at least `off + buf.len()`. Segments allocated
    /// before a failure remain allocated; `used_bytes` only advances on full
    /// success.
    pub fn write_at(&self, buf: &[u8], off: u64) -> Result<usize> {
        self.check_open()?;
        if self.shared.read_only {
            return Err(Error::ReadOnly);
        }
        if buf.is_empty() {
            return Ok(0);
        }

        let size = self.shared.segment_size;
        let end = off
            .checked_add(buf.len() as u64)
            .ok_or(Error::InvalidParams)?;
        self.shared.ensure_segments((end + size - 1) / size)?;

        let (start_seg, end_seg, start_off, end_off) = bounds(size, off, end);
        let segments = self.shared.set.snapshot(start_seg, end_seg);
        for (i, segment) in segments.iter().enumerate() {
            let index = start_seg + i as u64;
            let seg_start = if index == start_seg { start_off } else { 0 };
            let seg_end = if index == end_seg { end_off } else { size };
            let src_start = (index * size + seg_start - off) as usize;
            let src_end = (index * size + seg_end - off) as usize;
            segment.write_at(&buf[src_start..src_end], seg_start)?;
        }

        self.shared.meta.advance_used_bytes(end)?;
        maybe_spawn_prealloc(&self.shared);

        Ok(buf.len())
    }

    /// Returns the number of used bytes in the store.
    pub fn size(&self) -> Result<u64> {
        self.check_open()?;
        Ok(self.shared.meta.used_bytes())
    }

    /// Returns the fixed size of one segment file in bytes.
    pub fn segment_size(&self) -> u64 {
        self.shared.segment_size
    }

    /// Increases the used size by `n` bytes, allocating segments as needed.
    pub fn grow(&self, n: u64) -> Result<()> {
        self.check_open()?;
        if self.shared.read_only {
            return Err(Error::ReadOnly);
        }

        let _guard = self.shared.alloc.lock();
        let used = self.shared.meta.used_bytes();
        let new_used = used.checked_add(n).ok_or(Error::InvalidParams)?;
        let size = self.shared.segment_size;
        self.shared
            .ensure_segments_locked((new_used + size - 1) / size)?;
        self.shared.meta.set_used_bytes(new_used)
    }

    /// Rewinds the cursor to zero. The used size is unchanged.
    pub fn reset(&self) -> Result<()> {
        self.check_open()?;
        *self.shared.stream.lock() = 0;
        Ok(())
    }

    /// Sets the used size and the cursor to zero. Disk space is not
    /// reclaimed.
    pub fn clear(&self) -> Result<()> {
        self.check_open()?;
        if self.shared.read_only {
            return Err(Error::ReadOnly);
        }
        let mut stream = self.shared.stream.lock();
        self.shared.meta.set_used_bytes(0)?;
        *stream = 0;
        Ok(())
    }

    /// Flushes every segment and then the metadata record to stable storage.
    ///
    /// Metadata flushes are coalesced: concurrent callers share a single
    /// msync per flush cadence.
    pub fn sync(&self) -> Result<()> {
        self.check_open()?;
        if !self.shared.read_only {
            self.shared.set.sync()?;
        }
        self.shared.meta.sync()
    }

    /// Syncs and releases the store. Any further operation, including a
    /// second close, fails [`Error::Closed`]. A close error does not reopen
    /// the store.
    pub fn close(&self) -> Result<()> {
        if self.shared.closed.swap(true, Ordering::AcqRel) {
            return Err(Error::Closed);
        }

        // Drain in-flight sequential I/O and allocations before tearing down.
        let _stream = self.shared.stream.lock();
        let _alloc = self.shared.alloc.lock();

        let mut first_err = None;
        if !self.shared.read_only {
            if let Err(err) = self.shared.set.sync() {
                first_err.get_or_insert(err);
            }
        }
        if let Err(err) = self.shared.meta.close() {
            first_err.get_or_insert(err);
        }
        if let Err(err) = self.shared.set.close() {
            first_err.get_or_insert(err);
        }

        match first_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn check_open(&self) -> Result<()> {
        if self.shared.closed.load(Ordering::Acquire) {
            return Err(Error::Closed);
        }
        Ok(())
    }
}

impl Shared {
    fn ensure_segments(&self, required: u64) -> Result<()> {
        let _guard = self.alloc.lock();
        self.ensure_segments_locked(required)
    }

    /// Grows the segment list to `required` entries. The caller holds the
    /// allocation lock. The new list is published before the new count, so a
    /// reader never observes a count without its segments.
    fn ensure_segments_locked(&self, required: u64) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::Closed);
        }
        if required <= self.meta.segment_count() {
            return Ok(());
        }
        self.set.extend(required)?;
        self.meta.set_segment_count(required)
    }
}

/// The segment count the background pre-allocation drives towards: one
/// segment past the threshold-padded write frontier.
fn prealloc_target(shared: &Shared) -> u64 {
    (shared.meta.used_bytes() + shared.prealloc_threshold) / shared.segment_size + 1
}

/// Hands a segment allocation to a background thread if free space has run
/// below the threshold and no pre-allocation is already running. At most one
/// task runs at a time, gated by a compare-and-swap on the flag.
fn maybe_spawn_prealloc(shared: &Arc<Shared>) {
    if shared.read_only || shared.closed.load(Ordering::Acquire) {
        return;
    }
    if prealloc_target(shared) <= shared.meta.segment_count() {
        return;
    }
    if shared
        .preallocating
        .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
        .is_err()
    {
        return;
    }

    let task_shared = shared.clone();
    let spawned = std::thread::Builder::new()
        .name("segfile-prealloc".to_string())
        .spawn(move || {
            match task_shared.ensure_segments(prealloc_target(&task_shared)) {
                Ok(()) => {}
                Err(Error::Closed) => tracing::debug!("pre-allocation skipped: store closed"),
                Err(err) => tracing::warn!("pre-allocation failed: {err}"),
            }
            task_shared.preallocating.store(false, Ordering::Release);
        });

    if let Err(err) = spawned {
        shared.preallocating.store(false, Ordering::Release);
        tracing::warn!("failed to spawn pre-allocation thread: {err}");
    }
}

/// Decomposes `[off, end)` into per-segment sub-ranges.
///
/// Returns `(start_seg, end_seg, start_off, end_off)`: the operation covers
/// `[start_off, size)` of the first segment, `[0, size)` of the middle ones
/// and `[0, end_off)` of the last. `end` must be greater than `off`.
fn bounds(size: u64, off: u64, end: u64) -> (u64, u64, u64, u64) {
    debug_assert!(end > off);
    let start_seg = off / size;
    let start_off = off % size;
    let mut end_seg = end / size;
    let mut end_off = end % size;

    // An end landing exactly on a boundary has no bytes in the next segment.
    if end_off == 0 {
        end_seg -= 1;
        end_off = size;
    }

    (start_seg, end_seg, start_off, end_off)
}
