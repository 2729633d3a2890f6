//! Streaming service
//!
//! Serves byte-range reads against the frame store while respecting segment
//! locks. Shared locks are acquired only on the segments a range actually
//! overlaps, held just for the duration of the byte copy, and released
//! before the bytes leave this module. They are never held for the lifetime
//! of a client connection, so long-lived streams cannot starve writers.

use std::io::Cursor;
use std::sync::Arc;

use crate::error::{Result, StoreError};
use crate::frame_store::{FrameStore, WavInfo};
use crate::locks::{LockMode, SegmentGuard, SegmentLockRegistry};
use crate::types::BYTES_PER_FRAME;

/// One satisfied range read.
#[derive(Debug)]
pub struct RangeRead {
    /// Exactly the requested byte span.
    pub bytes: Vec<u8>,
    /// First byte offset served (after clamping).
    pub start: u64,
    /// Last byte offset served, inclusive.
    pub end: u64,
    /// The track's exact current byte length.
    pub total_len: u64,
}

pub struct StreamingService {
    frame_store: Arc<FrameStore>,
    locks: Arc<SegmentLockRegistry>,
}

impl StreamingService {
    pub fn new(frame_store: Arc<FrameStore>, locks: Arc<SegmentLockRegistry>) -> Self {
        Self { frame_store, locks }
    }

    /// Exact current byte length of a track, regardless of in-progress
    /// degradation elsewhere in the file.
    pub fn file_len(&self, track: &str) -> Result<u64> {
        self.frame_store.file_len(track)
    }

    /// Copy the byte span `[start, end]` out of a track's current file.
    ///
    /// `end = None` means "to end of file"; an explicit end is clamped to
    /// the file length. A start at or past EOF is unsatisfiable.
    pub fn read_range(&self, track: &str, start: u64, end: Option<u64>) -> Result<RangeRead> {
        let info = self.frame_store.info(track)?;
        let total_len = info.file_len;
        let end = end.unwrap_or(u64::MAX).min(total_len.saturating_sub(1));
        if start >= total_len || start > end {
            return Err(StoreError::RangeNotSatisfiable {
                track: track.to_string(),
                start,
                end,
                len: total_len,
            });
        }

        let guards = self.lock_byte_span(track, &info, start, end)?;
        let bytes = self
            .frame_store
            .read_bytes(track, start, (end - start + 1) as usize)?;
        // Locks were held only for the copy itself
        drop(guards);

        Ok(RangeRead {
            bytes,
            start,
            end,
            total_len,
        })
    }

    /// Full-content read (no range header): the whole file, all overlapping
    /// segments briefly locked shared.
    pub fn read_full(&self, track: &str) -> Result<RangeRead> {
        self.read_range(track, 0, None)
    }

    /// Render one fixed-duration chunk of a track as a standalone WAV file,
    /// reflecting the current degraded state of the samples.
    pub fn read_chunk_wav(
        &self,
        track: &str,
        chunk_index: usize,
        chunk_duration: f64,
    ) -> Result<Vec<u8>> {
        let info = self.frame_store.info(track)?;
        let frames_per_chunk = ((f64::from(info.sample_rate) * chunk_duration) as u64).max(1);
        let total = info.total_frames();
        let chunk_count = total.div_ceil(frames_per_chunk) as usize;
        if chunk_index >= chunk_count {
            return Err(StoreError::SegmentOutOfRange {
                track: track.to_string(),
                index: chunk_index,
                segments: chunk_count,
            });
        }
        let start_frame = chunk_index as u64 * frames_per_chunk;
        let count = (total - start_frame).min(frames_per_chunk) as usize;

        let byte_lo = info.data_offset + start_frame * BYTES_PER_FRAME;
        let byte_hi = byte_lo + count as u64 * BYTES_PER_FRAME - 1;
        let guards = self.lock_byte_span(track, &info, byte_lo, byte_hi)?;
        let frames = self.frame_store.read_frames(track, start_frame, count)?;
        drop(guards);

        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: info.sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut out = Vec::new();
        let mut writer = hound::WavWriter::new(Cursor::new(&mut out), spec)?;
        for &sample in frames.iter() {
            writer.write_sample(sample)?;
        }
        writer.finalize()?;
        Ok(out)
    }

    /// Acquire shared locks, in ascending order, on every segment whose
    /// bytes overlap `[byte_lo, byte_hi]`. Header bytes outside the data
    /// chunk are immutable and need no lock.
    fn lock_byte_span(
        &self,
        track: &str,
        info: &WavInfo,
        byte_lo: u64,
        byte_hi: u64,
    ) -> Result<Vec<SegmentGuard>> {
        let data_end = info.data_offset + info.data_len;
        let lo = byte_lo.max(info.data_offset);
        let hi = byte_hi.min(data_end.saturating_sub(1));
        if info.data_len == 0 || lo > hi {
            return Ok(Vec::new());
        }
        let segment_bytes = self.frame_store.frames_per_segment(info) as u64 * BYTES_PER_FRAME;
        let first = ((lo - info.data_offset) / segment_bytes) as usize;
        let last = ((hi - info.data_offset) / segment_bytes) as usize;

        let mut guards = Vec::with_capacity(last - first + 1);
        for index in first..=last {
            guards.push(self.locks.acquire(track, index, LockMode::Shared)?);
        }
        Ok(guards)
    }
}
