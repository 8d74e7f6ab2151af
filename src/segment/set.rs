//! The ordered collection of segments backing one store.

use super::{file::FileSegment, mmap::MappedSegment, Segment};
use crate::error::{Error, Result};
use parking_lot::RwLock;
use std::{
    fs::OpenOptions,
    os::unix::fs::FileExt,
    path::{Path, PathBuf},
    sync::Arc,
};

/// New segment files are zero-filled in chunks of at most this many bytes, so
/// that allocating a segment never issues one huge write.
const ZERO_CHUNK_SIZE: usize = 10 * 1024 * 1024;

/// The segments of a store, contiguous in index and uniform in size.
///
/// Index `i` backs logical offsets `[i * size, (i + 1) * size)`. The list only
/// grows, and only under the store's allocation lock; the inner lock makes
/// the publication of new entries visible to readers.
pub struct SegmentSet {
    dir: PathBuf,
    prefix: String,
    segment_size: u64,
    memory_map: bool,
    writable: bool,
    segments: RwLock<Vec<Arc<Segment>>>,
}

impl std::fmt::Debug for SegmentSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SegmentSet").finish_non_exhaustive()
    }
}

impl SegmentSet {
    /// Opens segments `0..count` and validates each one.
    ///
    /// A segment file missing from disk means the directory does not match the
    /// metadata record and fails `Corrupt`.
    pub fn load(
        dir: &Path,
        prefix: &str,
        count: u64,
        segment_size: u64,
        memory_map: bool,
        writable: bool,
    ) -> Result<Self> {
        let set = SegmentSet {
            dir: dir.to_path_buf(),
            prefix: prefix.to_string(),
            segment_size,
            memory_map,
            writable,
            segments: RwLock::new(Vec::with_capacity(count as usize)),
        };

        let mut segments = Vec::with_capacity(count as usize);
        for index in 0..count {
            let path = set.segment_path(index);
            if !path.exists() {
                return Err(Error::Corrupt(format!(
                    "segment {index} missing from {}",
                    dir.display()
                )));
            }
            segments.push(Arc::new(set.open_segment(&path)?));
        }
        *set.segments.write() = segments;

        Ok(set)
    }

    /// The number of segments currently open.
    pub fn len(&self) -> u64 {
        self.segments.read().len() as u64
    }

    /// Arc clones of segments `start..=end`, taken under the read lock and
    /// held by value so copies never run under any lock.
    pub fn snapshot(&self, start: u64, end: u64) -> Vec<Arc<Segment>> {
        let segments = self.segments.read();
        segments[start as usize..=end as usize].to_vec()
    }

    /// Creates and opens segments up to `to_count`, zero-filled and dense.
    ///
    /// Must be called under the store's allocation lock; there is no other
    /// mutator of the segment list.
    pub fn extend(&self, to_count: u64) -> Result<()> {
        let current = self.len();
        for index in current..to_count {
            let path = self.segment_path(index);
            create_segment_file(&path, self.segment_size)?;
            let segment = Arc::new(self.open_segment(&path)?);
            self.segments.write().push(segment);
        }
        Ok(())
    }

    /// Syncs every segment, stopping at the first failure.
    pub fn sync(&self) -> Result<()> {
        let segments = self.segments.read().clone();
        for segment in &segments {
            segment.sync()?;
        }
        Ok(())
    }

    /// Closes every segment, continuing through individual failures and
    /// returning the first error.
    pub fn close(&self) -> Result<()> {
        let segments = self.segments.read().clone();
        let mut first_err = None;
        for segment in &segments {
            if let Err(err) = segment.close() {
                tracing::warn!("failed to close segment: {err}");
                first_err.get_or_insert(err);
            }
        }
        match first_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn open_segment(&self, path: &Path) -> Result<Segment> {
        if self.memory_map {
            Ok(Segment::Mapped(MappedSegment::open(
                path,
                self.segment_size,
                self.writable,
            )?))
        } else {
            Ok(Segment::Plain(FileSegment::open(
                path,
                self.segment_size,
                self.writable,
            )?))
        }
    }

    fn segment_path(&self, index: u64) -> PathBuf {
        self.dir.join(format!("{}{index}", self.prefix))
    }
}

/// Creates a dense, zero-filled file of exactly `size` bytes at `path`.
fn create_segment_file(path: &Path, size: u64) -> Result<()> {
    let file = OpenOptions::new().write(true).create(true).open(path)?;

    let chunk = vec![0u8; ZERO_CHUNK_SIZE.min(size as usize)];
    let mut off = 0;
    while off < size {
        let n = chunk.len().min((size - off) as usize);
        file.write_all_at(&chunk[..n], off)?;
        off += n as u64;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extend_creates_dense_zeroed_files() {
        let dir = tempfile::TempDir::new().unwrap();
        let set = SegmentSet::load(dir.path(), "seg_", 0, 4096, false, true).unwrap();

        set.extend(3).unwrap();
        assert_eq!(set.len(), 3);

        for index in 0..3 {
            let path = dir.path().join(format!("seg_{index}"));
            let contents = std::fs::read(&path).unwrap();
            assert_eq!(contents.len(), 4096);
            assert!(contents.iter().all(|b| *b == 0));
        }
    }

    #[test]
    fn extend_is_incremental() {
        let dir = tempfile::TempDir::new().unwrap();
        let set = SegmentSet::load(dir.path(), "seg_", 0, 512, false, true).unwrap();

        set.extend(1).unwrap();
        set.snapshot(0, 0)[0].write_at(b"keep", 0).unwrap();
        set.extend(2).unwrap();

        // Extending must not recreate segment 0.
        let mut buf = [0u8; 4];
        set.snapshot(0, 0)[0].read_at(&mut buf, 0).unwrap();
        assert_eq!(&buf, b"keep");
    }

    #[test]
    fn load_missing_segment_is_corrupt() {
        let dir = tempfile::TempDir::new().unwrap();
        let set = SegmentSet::load(dir.path(), "seg_", 0, 512, false, true).unwrap();
        set.extend(2).unwrap();

        std::fs::remove_file(dir.path().join("seg_1")).unwrap();
        let err = SegmentSet::load(dir.path(), "seg_", 2, 512, false, true).unwrap_err();
        assert!(matches!(err, Error::Corrupt(_)));
    }

    #[test]
    fn load_validates_sizes() {
        let dir = tempfile::TempDir::new().unwrap();
        let set = SegmentSet::load(dir.path(), "seg_", 0, 512, false, true).unwrap();
        set.extend(1).unwrap();

        let err = SegmentSet::load(dir.path(), "seg_", 1, 1024, false, true).unwrap_err();
        assert!(matches!(err, Error::SegmentSizeMismatch { .. }));
    }

    #[test]
    fn close_reports_first_error_but_visits_all() {
        let dir = tempfile::TempDir::new().unwrap();
        let set = SegmentSet::load(dir.path(), "seg_", 0, 512, false, true).unwrap();
        set.extend(2).unwrap();

        // Close one segment out-of-band so the set-wide close sees a failure
        // for it but still closes the other.
        set.snapshot(0, 0)[0].close().unwrap();
        assert!(matches!(set.close(), Err(Error::Closed)));
        assert!(matches!(set.snapshot(1, 1)[0].close(), Err(Error::Closed)));
    }
}
