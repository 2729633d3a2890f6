//! Degrade coordinator
//!
//! Orchestrates one full degrade transaction:
//! exclusive lock → read → dropout → write (fsynced) → metadata → release.
//!
//! The lock guard is a plain RAII value, so release happens on every exit
//! path. A metadata failure after the audio write has already been fsynced
//! surfaces as an error but does NOT roll the audio back: play-count/audio
//! drift is an accepted, documented failure mode, not patched over with a
//! cross-store transaction.

use std::sync::Arc;

use crate::degrade::{apply_dropout, dropout_probability};
use crate::error::Result;
use crate::frame_store::FrameStore;
use crate::locks::{LockMode, SegmentLockRegistry};
use crate::metadata::MetadataStore;

/// Result of one completed degrade transaction.
#[derive(Debug, Clone)]
pub struct DegradeOutcome {
    pub segment_index: usize,
    /// Play count after this pass.
    pub play_count: u64,
    /// Dropout percentage (0-100) now baked into the segment.
    pub degradation_level: f64,
}

/// Coordinates concurrent degrade requests over the shared stores.
pub struct DegradeCoordinator {
    frame_store: Arc<FrameStore>,
    metadata: Arc<MetadataStore>,
    locks: Arc<SegmentLockRegistry>,
    rate: f64,
}

impl DegradeCoordinator {
    pub fn new(
        frame_store: Arc<FrameStore>,
        metadata: Arc<MetadataStore>,
        locks: Arc<SegmentLockRegistry>,
        rate: f64,
    ) -> Self {
        Self {
            frame_store,
            metadata,
            locks,
            rate,
        }
    }

    /// Degrade one segment of one track.
    ///
    /// Degrade requests are not deduplicated: a caller retrying after a
    /// timeout may degrade the segment twice. That is accepted behavior.
    pub fn degrade(&self, track: &str, index: usize) -> Result<DegradeOutcome> {
        // Validates track existence, record consistency, and index bounds
        // before any lock is taken.
        let record = self.metadata.get(track)?;
        if index >= record.segment_count() {
            return Err(crate::error::StoreError::SegmentOutOfRange {
                track: track.to_string(),
                index,
                segments: record.segment_count(),
            });
        }

        let _guard = self.locks.acquire(track, index, LockMode::Exclusive)?;

        // Re-read under the exclusive lock: the play count seen here is the
        // one this pass degrades against, and no other writer can interleave.
        let play_count = self.metadata.get(track)?.segments[index].play_count;

        let mut frames = self.frame_store.read_segment(track, index)?;
        apply_dropout(&mut frames, track, index, play_count, self.rate);
        // write_segment returns only after fsync, so the metadata update
        // below is ordered strictly after the audio bytes are durable.
        self.frame_store.write_segment(track, index, &frames)?;

        let updated = self.metadata.increment_play_count(track, index)?;
        let play_count = updated.segments[index].play_count;

        log::debug!(
            "degraded '{}' segment {} to play_count {}",
            track,
            index,
            play_count
        );

        Ok(DegradeOutcome {
            segment_index: index,
            play_count,
            degradation_level: dropout_probability(play_count, self.rate) * 100.0,
        })
    }
}
