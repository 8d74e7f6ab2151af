//! The durable metadata record of a store.
//!
//! Three little-endian i64 fields (segment count, segment size, used bytes)
//! live at fixed offsets of the `<prefix>mdata` file, mutated in place through
//! a memory map. Durability is coalesced: `sync` enqueues on a [`FlushGroup`]
//! whose payload msyncs the mapping, and a background thread flushes the
//! group every 10 ms while the record is live.

use crate::{
    codec,
    error::{Error, Result},
    flush_group::FlushGroup,
    segment::{ensure_not_dir, mmap::Mapping},
};
use parking_lot::{Condvar, Mutex, RwLock};
use std::{
    fs::{File, OpenOptions},
    path::Path,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

const COUNT_OFFSET: usize = 0;
const SIZE_OFFSET: usize = 8;
const USED_OFFSET: usize = 16;
const HEADER_LEN: usize = 24;

/// Freshly created metadata files are padded to one page. The file never
/// shrinks afterwards.
const META_FILE_LEN: u64 = 4096;

const FLUSH_INTERVAL: Duration = Duration::from_millis(10);

enum Backing {
    /// Read-write mode: the mapped metadata file.
    Mapped {
        map: Mapping,
        // Keeps the descriptor alive for the lifetime of the mapping.
        #[allow(unused)]
        file: File,
    },
    /// Read-only mode: a one-shot copy of the file contents.
    Owned(Box<[u8]>),
}

impl Backing {
    fn bytes(&self) -> &[u8] {
        match self {
            // SAFETY: mutation happens only under the enclosing write lock,
            // which this shared borrow excludes.
            Backing::Mapped { map, .. } => unsafe { map.slice() },
            Backing::Owned(bytes) => bytes,
        }
    }

    fn bytes_mut(&mut self) -> &mut [u8] {
        match self {
            // SAFETY: reached only through the enclosing write lock.
            Backing::Mapped { map, .. } => unsafe { map.slice_mut() },
            Backing::Owned(bytes) => bytes,
        }
    }

    fn sync(&self) -> std::io::Result<()> {
        match self {
            Backing::Mapped { map, .. } => map.sync(),
            Backing::Owned(_) => Ok(()),
        }
    }
}

struct Inner {
    values: RwLock<Backing>,
    flush: FlushGroup,
    closed: AtomicBool,
    read_only: bool,
    stop: Mutex<bool>,
    stop_cv: Condvar,
}

/// The persisted `{segment_count, segment_size, used_bytes}` record.
pub struct Meta {
    inner: Arc<Inner>,
    flusher: Mutex<Option<std::thread::JoinHandle<()>>>,
}

impl Meta {
    /// Opens or creates the metadata file at `path`.
    ///
    /// A fresh file is created with `segment_size = requested_size` and zeroed
    /// counters. For an existing file the persisted segment size wins and the
    /// requested one is ignored. In read-only mode the file must exist and no
    /// background flusher is started.
    pub fn open(path: &Path, requested_size: u64, read_only: bool) -> Result<Meta> {
        ensure_not_dir(path)?;

        let backing = if read_only {
            let bytes = std::fs::read(path)?;
            if bytes.len() < HEADER_LEN {
                return Err(Error::InvalidMeta(format!(
                    "metadata file is {} bytes, expected at least {HEADER_LEN}",
                    bytes.len()
                )));
            }
            Backing::Owned(bytes.into_boxed_slice())
        } else {
            let file = OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .open(path)?;
            let len = file.metadata()?.len();
            let fresh = len == 0;
            if fresh {
                file.set_len(META_FILE_LEN)?;
            } else if len < HEADER_LEN as u64 {
                return Err(Error::InvalidMeta(format!(
                    "metadata file is {len} bytes, expected at least {HEADER_LEN}"
                )));
            }

            let map_len = if fresh { META_FILE_LEN } else { len };
            let map = Mapping::map(&file, map_len as usize, true)?;
            if fresh {
                // SAFETY: the mapping is private to this function until the
                // record is published.
                let bytes = unsafe { map.slice_mut() };
                codec::put_i64(bytes, COUNT_OFFSET, 0);
                codec::put_i64(bytes, SIZE_OFFSET, requested_size as i64);
                codec::put_i64(bytes, USED_OFFSET, 0);
                map.sync()?;
            }
            Backing::Mapped { map, file }
        };

        let meta = Meta {
            inner: Arc::new(Inner {
                values: RwLock::new(backing),
                flush: FlushGroup::new(),
                closed: AtomicBool::new(false),
                read_only,
                stop: Mutex::new(false),
                stop_cv: Condvar::new(),
            }),
            flusher: Mutex::new(None),
        };
        meta.validate()?;

        if !read_only {
            let inner = meta.inner.clone();
            let handle = std::thread::Builder::new()
                .name("segfile-meta-flusher".to_string())
                .spawn(move || flusher(inner))
                .expect("failed to spawn metadata flusher thread");
            *meta.flusher.lock() = Some(handle);
        }

        Ok(meta)
    }

    fn validate(&self) -> Result<()> {
        let values = self.inner.values.read();
        let bytes = values.bytes();
        let count = codec::get_i64(bytes, COUNT_OFFSET);
        let size = codec::get_i64(bytes, SIZE_OFFSET);
        let used = codec::get_i64(bytes, USED_OFFSET);

        if count < 0 {
            return Err(Error::InvalidMeta(format!("negative segment count {count}")));
        }
        if size <= 0 {
            return Err(Error::InvalidMeta(format!(
                "non-positive segment size {size}"
            )));
        }
        let total = count
            .checked_mul(size)
            .ok_or_else(|| Error::InvalidMeta("segment count overflows total size".to_string()))?;
        if used < 0 || used > total {
            return Err(Error::InvalidMeta(format!(
                "used bytes {used} out of range 0..={total}"
            )));
        }
        Ok(())
    }

    pub fn segment_count(&self) -> u64 {
        self.get(COUNT_OFFSET)
    }

    pub fn segment_size(&self) -> u64 {
        self.get(SIZE_OFFSET)
    }

    pub fn used_bytes(&self) -> u64 {
        self.get(USED_OFFSET)
    }

    pub fn set_segment_count(&self, count: u64) -> Result<()> {
        self.put(COUNT_OFFSET, count)
    }

    pub fn set_used_bytes(&self, used: u64) -> Result<()> {
        self.put(USED_OFFSET, used)
    }

    /// Advances `used_bytes` to `end` if it is not already past it.
    pub fn advance_used_bytes(&self, end: u64) -> Result<()> {
        self.check_writable()?;
        let mut values = self.inner.values.write();
        let bytes = values.bytes_mut();
        if end as i64 > codec::get_i64(bytes, USED_OFFSET) {
            codec::put_i64(bytes, USED_OFFSET, end as i64);
        }
        Ok(())
    }

    /// Requests a durable flush of the record and blocks until one happens.
    ///
    /// Requests are coalesced: any number of concurrent callers share a
    /// single msync per flush cadence. In read-only mode there is nothing to
    /// flush and this returns immediately.
    pub fn sync(&self) -> Result<()> {
        if self.inner.read_only {
            return Ok(());
        }
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(Error::Closed);
        }
        if self.inner.flush.run() {
            Ok(())
        } else {
            Err(Error::Closed)
        }
    }

    /// Stops the background flusher, performs a final sync and marks the
    /// record closed. The mapping is released when the record drops.
    pub fn close(&self) -> Result<()> {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return Err(Error::Closed);
        }

        if let Some(handle) = self.flusher.lock().take() {
            *self.inner.stop.lock() = true;
            self.inner.stop_cv.notify_all();
            let _ = handle.join();
        }
        // Wake any request that slipped in between the final flush and here.
        self.inner.flush.shutdown();

        self.inner.values.read().sync()?;
        Ok(())
    }

    fn get(&self, offset: usize) -> u64 {
        let values = self.inner.values.read();
        codec::get_i64(values.bytes(), offset) as u64
    }

    fn put(&self, offset: usize, value: u64) -> Result<()> {
        self.check_writable()?;
        let mut values = self.inner.values.write();
        codec::put_i64(values.bytes_mut(), offset, value as i64);
        Ok(())
    }

    fn check_writable(&self) -> Result<()> {
        if self.inner.read_only {
            return Err(Error::ReadOnly);
        }
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(Error::Closed);
        }
        Ok(())
    }
}

impl Drop for Meta {
    fn drop(&mut self) {
        if !self.inner.closed.load(Ordering::Acquire) {
            let _ = self.close();
        }
    }
}

/// The background flush loop: one coalesced msync per cadence window, and one
/// final drain when the record closes.
fn flusher(inner: Arc<Inner>) {
    loop {
        let stopping = {
            let mut stop = inner.stop.lock();
            if !*stop {
                let _ = inner.stop_cv.wait_for(&mut stop, FLUSH_INTERVAL);
            }
            *stop
        };

        inner.flush.flush(|| {
            let values = inner.values.read();
            if let Err(err) = values.sync() {
                tracing::error!("metadata flush failed: {err}");
            }
        });

        if stopping {
            break;
        }
    }
}
