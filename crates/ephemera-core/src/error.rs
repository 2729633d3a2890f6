//! Error taxonomy for the degrading-audio store
//!
//! Lock and I/O failures abort the current request and are surfaced to the
//! caller; the store never retries internally. A metadata failure after a
//! successful audio write surfaces as `Io` and leaves the audio mutation in
//! place (documented drift, see DESIGN.md).

use thiserror::Error;

/// Errors produced by the store and its components.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Unknown track filename.
    #[error("track not found: {0}")]
    TrackNotFound(String),

    /// Segment index beyond the track's segment count.
    #[error("segment {index} out of range for '{track}' ({segments} segments)")]
    SegmentOutOfRange {
        track: String,
        index: usize,
        segments: usize,
    },

    /// Unreadable or unsupported audio header, or a frame-count mismatch on
    /// a segment write.
    #[error("format error: {0}")]
    Format(String),

    /// A requested byte range does not overlap the file at all.
    #[error("unsatisfiable range {start}-{end} for '{track}' ({len} bytes)")]
    RangeNotSatisfiable {
        track: String,
        start: u64,
        end: u64,
        len: u64,
    },

    /// A segment lock could not be acquired within the configured timeout.
    /// Retryable by the caller; never silently dropped or retried here.
    #[error("lock on '{track}' segment {index} not acquired within {timeout_ms} ms")]
    LockTimeout {
        track: String,
        index: usize,
        timeout_ms: u64,
    },

    /// Disk read, write, or fsync failure.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// The on-disk track format disagrees with the stored metadata record
    /// (e.g. the file was replaced out-of-band). Never auto-repaired.
    #[error("metadata for '{track}' inconsistent with audio file: {reason}")]
    InconsistentMetadata { track: String, reason: String },
}

impl From<hound::Error> for StoreError {
    fn from(e: hound::Error) -> Self {
        match e {
            hound::Error::IoError(io) => StoreError::Io(io),
            other => StoreError::Format(other.to_string()),
        }
    }
}

/// Convenience result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, StoreError>;
