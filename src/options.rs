use std::path::PathBuf;

/// The default prefix for segment files: `seg_0`, `seg_1`, ... and
/// `seg_mdata` for the metadata record.
pub const DEFAULT_PREFIX: &str = "seg_";

/// The default segment size: 20 MiB.
pub const DEFAULT_SEGMENT_SIZE: u64 = 20 * 1024 * 1024;

/// Options when opening a [`crate::SegFile`].
pub struct Options {
    pub(crate) path: PathBuf,
    pub(crate) prefix: String,
    pub(crate) segment_size: u64,
    pub(crate) memory_map: bool,
    pub(crate) read_only: bool,
}

impl Options {
    /// Create a new `Options` instance with the default values.
    ///
    /// The path is required and must be set before opening.
    pub fn new() -> Self {
        Self {
            path: PathBuf::new(),
            prefix: DEFAULT_PREFIX.to_string(),
            segment_size: DEFAULT_SEGMENT_SIZE,
            memory_map: false,
            read_only: false,
        }
    }

    /// Set the path to the directory where the segments are stored.
    pub fn path(&mut self, path: impl Into<PathBuf>) {
        self.path = path.into();
    }

    /// Set the filename prefix shared by the segment and metadata files.
    ///
    /// Default: `seg_`.
    pub fn prefix(&mut self, prefix: impl Into<String>) {
        self.prefix = prefix.into();
    }

    /// Set the size of a segment file in bytes.
    ///
    /// Zero means "use the default" (20 MiB). The size is fixed when the
    /// store is first created; reopening an existing store ignores this value
    /// and uses the persisted one.
    pub fn segment_size(&mut self, segment_size: u64) {
        self.segment_size = if segment_size == 0 {
            DEFAULT_SEGMENT_SIZE
        } else {
            segment_size
        };
    }

    /// Back segments with shared memory maps instead of positional file I/O.
    ///
    /// Default: off.
    pub fn memory_map(&mut self, memory_map: bool) {
        self.memory_map = memory_map;
    }

    /// Open the store read-only. The directory and its files must already
    /// exist, and every mutating operation fails with
    /// [`crate::Error::ReadOnly`].
    ///
    /// Default: off.
    pub fn read_only(&mut self, read_only: bool) {
        self.read_only = read_only;
    }
}

impl Default for Options {
    fn default() -> Self {
        Self::new()
    }
}
