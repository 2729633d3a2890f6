//! Waveform extraction for visualization
//!
//! Produces a fixed number of min/max points over the peak-normalized mono
//! signal, cached as JSON next to the track's metadata record. The cache is
//! advisory: it reflects the track as it sounded when generated, and the
//! player re-fetches it rather than the store invalidating it per degrade.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Result, StoreError};
use crate::frame_store::FrameStore;

/// Number of points generated per track.
pub const DEFAULT_POINTS: usize = 1_000;

/// One bucket of the waveform envelope, normalized to [-1.0, 1.0].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WaveformPoint {
    pub min: f32,
    pub max: f32,
}

/// Cache path for a track's waveform JSON.
pub fn cache_path(metadata_dir: &Path, track: &str) -> PathBuf {
    metadata_dir.join(format!("{}.waveform.json", track))
}

/// Sample a track's current signal down to `points` min/max buckets.
pub fn generate(frame_store: &FrameStore, track: &str, points: usize) -> Result<Vec<WaveformPoint>> {
    let info = frame_store.info(track)?;
    if !info.is_store_format() {
        return Err(StoreError::Format(format!(
            "'{}' must be ingested before waveform generation",
            track
        )));
    }
    let total = info.total_frames();
    if total == 0 || points == 0 {
        return Ok(Vec::new());
    }
    let frames = frame_store.read_frames(track, 0, total as usize)?;

    // Peak-normalize so quiet masters still render a visible envelope
    let peak = frames
        .iter()
        .map(|&s| f32::from(s).abs())
        .fold(0.0f32, f32::max)
        .max(1.0);

    let per_point = (frames.len() / points).max(1);
    let mut waveform = Vec::with_capacity(points);
    for bucket in frames.as_slice().chunks(per_point).take(points) {
        let mut min = f32::MAX;
        let mut max = f32::MIN;
        for &sample in bucket {
            let value = f32::from(sample) / peak;
            min = min.min(value);
            max = max.max(value);
        }
        waveform.push(WaveformPoint { min, max });
    }
    Ok(waveform)
}

/// Return the cached waveform for a track, generating and caching it on a
/// miss. The cache write is plain (not atomic): a torn cache file is
/// regenerated on the next read, unlike metadata records.
pub fn load_or_generate(
    frame_store: &FrameStore,
    metadata_dir: &Path,
    track: &str,
) -> Result<Vec<WaveformPoint>> {
    let path = cache_path(metadata_dir, track);
    if path.exists() {
        if let Ok(contents) = fs::read_to_string(&path) {
            if let Ok(cached) = serde_json::from_str(&contents) {
                return Ok(cached);
            }
        }
        log::warn!("waveform cache {} unreadable, regenerating", path.display());
    }
    let waveform = generate(frame_store, track, DEFAULT_POINTS)?;
    fs::create_dir_all(metadata_dir)?;
    let json = serde_json::to_string(&waveform).map_err(|e| StoreError::Io(e.into()))?;
    fs::write(&path, json)?;
    Ok(waveform)
}
