//! Error types shared by every layer of the crate.

use std::path::PathBuf;
use thiserror::Error;

/// Result type used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors returned by segmented file operations.
///
/// Logical errors (`InvalidOptions`, `InvalidMeta`, `Corrupt`,
/// `SegmentSizeMismatch`, `IsDirectory`) are returned by [`crate::SegFile::open`]
/// and are fatal for that store. OS errors propagate unchanged through the
/// transparent `Io` variant.
#[derive(Debug, Error)]
pub enum Error {
    /// The options are missing a required field or hold an invalid value.
    #[error("invalid or missing options")]
    InvalidOptions,

    /// The store, a segment, or the metadata record has been closed.
    #[error("store is closed")]
    Closed,

    /// A mutating operation was attempted on a read-only store.
    #[error("store is read-only")]
    ReadOnly,

    /// The persisted metadata fields violate their invariants.
    #[error("invalid metadata: {0}")]
    InvalidMeta(String),

    /// The segment files on disk are inconsistent with the metadata record.
    #[error("store corrupted: {0}")]
    Corrupt(String),

    /// A segment file's length does not match the configured segment size.
    #[error("segment size mismatch: expected {expected} bytes, found {found}")]
    SegmentSizeMismatch {
        /// The segment size recorded in the metadata.
        expected: u64,
        /// The length of the file found on disk.
        found: u64,
    },

    /// Expected a regular file but found a directory.
    #[error("expected a file, found a directory: {}", .0.display())]
    IsDirectory(PathBuf),

    /// A read started at or beyond the end of the allocated space.
    #[error("read past the end of the stream")]
    EndOfStream,

    /// An underlying read or write transferred fewer bytes than requested.
    #[error("short read or write")]
    ShortIo,

    /// A parameter is out of range, e.g. a seek to a negative position.
    #[error("invalid parameters")]
    InvalidParams,

    /// An operating system error.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
