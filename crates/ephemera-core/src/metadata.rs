//! Durable per-track metadata records
//!
//! One JSON record per track at `METADATA_DIR/<track>.json` holds the
//! ordered segment states (play counts, last-played timestamps) plus the
//! track format the counts were derived from. `update` is the only durable
//! mutation entry point: records are committed by writing a sibling temp
//! file, fsyncing it, and atomically renaming over the target, so a reader
//! never observes a partially written record.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::degrade::dropout_probability;
use crate::error::{Result, StoreError};
use crate::frame_store::{FrameStore, WavInfo};

/// Version tag written into every record.
pub const FORMAT_VERSION: u32 = 1;

/// Durable state of one segment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegmentState {
    pub index: usize,
    /// Monotonically non-decreasing number of degradation passes.
    pub play_count: u64,
    pub last_played: Option<DateTime<Utc>>,
}

/// Durable per-track record.
///
/// The declared format fields (`sample_rate`, `total_frames`,
/// `frames_per_segment`) pin the layout the segment states were computed
/// against; if the on-disk file stops matching them the record is flagged
/// inconsistent rather than silently corrected.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackRecord {
    pub format_version: u32,
    pub filename: String,
    pub title: String,
    pub duration_seconds: f64,
    pub sample_rate: u32,
    pub total_frames: u64,
    pub frames_per_segment: usize,
    #[serde(default)]
    pub total_streams: u64,
    pub created_at: DateTime<Utc>,
    pub segments: Vec<SegmentState>,
}

impl TrackRecord {
    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    /// Sum of play counts across all segments.
    pub fn total_plays(&self) -> u64 {
        self.segments.iter().map(|s| s.play_count).sum()
    }

    /// Mean dropout probability across segments, as a percentage (0-100).
    pub fn average_degradation(&self, rate: f64) -> f64 {
        if self.segments.is_empty() {
            return 0.0;
        }
        let sum: f64 = self
            .segments
            .iter()
            .map(|s| dropout_probability(s.play_count, rate))
            .sum();
        sum / self.segments.len() as f64 * 100.0
    }
}

/// Durable store of per-track records. Exclusively owns play-count
/// persistence; nothing else writes into the metadata directory's records.
pub struct MetadataStore {
    frame_store: Arc<FrameStore>,
    metadata_dir: PathBuf,
    /// Per-track serialization of read-modify-write cycles. Segment locks
    /// serialize same-segment degrades, but two segments of one track may
    /// commit concurrently and must not lose each other's counts.
    update_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl MetadataStore {
    pub fn new<P: Into<PathBuf>>(frame_store: Arc<FrameStore>, metadata_dir: P) -> Self {
        Self {
            frame_store,
            metadata_dir: metadata_dir.into(),
            update_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn metadata_dir(&self) -> &Path {
        &self.metadata_dir
    }

    /// Path of a track's durable record.
    pub fn record_path(&self, track: &str) -> PathBuf {
        self.metadata_dir.join(format!("{}.json", track))
    }

    /// Read a track's record, creating it (all play counts zero) on first
    /// access. Fails with `InconsistentMetadata` if the stored layout no
    /// longer matches the on-disk file.
    pub fn get(&self, track: &str) -> Result<TrackRecord> {
        let path = self.record_path(track);
        if !path.exists() {
            // First sighting of this track: ingest it, then record it
            self.frame_store.ensure_mono(track)?;
            let info = self.frame_store.info(track)?;
            return self.initialize(track, &info);
        }
        let info = self.frame_store.info(track)?;
        let record = load_record(&path)?;
        self.check_consistency(track, &record, &info)?;
        Ok(record)
    }

    /// Apply a mutation to a track's record and commit it atomically.
    ///
    /// This is the only durable-mutation entry point. The mutation runs
    /// under a per-track mutex so concurrent updates to different segments
    /// of the same track cannot lose each other's writes.
    pub fn update<F>(&self, track: &str, mutate: F) -> Result<TrackRecord>
    where
        F: FnOnce(&mut TrackRecord) -> Result<()>,
    {
        let cell = {
            let mut map = self.update_locks.lock().expect("metadata update registry poisoned");
            map.entry(track.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        let _guard = cell.lock().expect("metadata update lock poisoned");

        let mut record = self.get(track)?;
        mutate(&mut record)?;
        self.commit(track, &record)?;
        Ok(record)
    }

    /// Enumerate all known track records, sorted by filename.
    pub fn list_tracks(&self) -> Result<Vec<TrackRecord>> {
        let mut records = Vec::new();
        for entry in fs::read_dir(&self.metadata_dir)? {
            let path = entry?.path();
            let name = match path.file_name().and_then(|n| n.to_str()) {
                Some(name) => name,
                None => continue,
            };
            if !name.ends_with(".json") || name.ends_with(".waveform.json") {
                continue;
            }
            match load_record(&path) {
                Ok(record) => records.push(record),
                Err(e) => log::warn!("skipping unreadable record {}: {}", name, e),
            }
        }
        records.sort_by(|a, b| a.filename.cmp(&b.filename));
        Ok(records)
    }

    /// Scan the audio directory, ingest new WAV files (mono rewrite), and
    /// create records for tracks that don't have one yet. Returns the
    /// filenames initialized by this pass.
    pub fn scan_and_initialize(&self) -> Result<Vec<String>> {
        fs::create_dir_all(&self.metadata_dir)?;
        let mut initialized = Vec::new();
        for entry in fs::read_dir(self.frame_store.audio_dir())? {
            let path = entry?.path();
            let name = match path.file_name().and_then(|n| n.to_str()) {
                Some(name) => name.to_string(),
                None => continue,
            };
            if !name.to_ascii_lowercase().ends_with(".wav") || !path.is_file() {
                continue;
            }
            let fresh = !self.record_path(&name).exists();
            // A failed track stays unavailable but must not abort the scan
            match self.get(&name) {
                Ok(_) if fresh => initialized.push(name),
                Ok(_) => {}
                Err(e) => log::warn!("could not initialize '{}': {}", name, e),
            }
        }
        initialized.sort();
        Ok(initialized)
    }

    /// Count one full-track stream (non-range request).
    pub fn increment_total_streams(&self, track: &str) -> Result<TrackRecord> {
        self.update(track, |record| {
            record.total_streams += 1;
            Ok(())
        })
    }

    /// Record one degradation pass: bump the segment's play count and stamp
    /// the time. Play counts only ever grow.
    pub fn increment_play_count(&self, track: &str, index: usize) -> Result<TrackRecord> {
        self.update(track, |record| {
            let segments = record.segments.len();
            let segment = record.segments.get_mut(index).ok_or_else(|| {
                StoreError::SegmentOutOfRange {
                    track: track.to_string(),
                    index,
                    segments,
                }
            })?;
            segment.play_count += 1;
            segment.last_played = Some(Utc::now());
            Ok(())
        })
    }

    fn initialize(&self, track: &str, info: &WavInfo) -> Result<TrackRecord> {
        if !info.is_store_format() {
            return Err(StoreError::Format(format!(
                "'{}' must be ingested before metadata can be created",
                track
            )));
        }
        let frames_per_segment = self.frame_store.frames_per_segment(info);
        let segment_count = self.frame_store.segment_count(info);
        let record = TrackRecord {
            format_version: FORMAT_VERSION,
            filename: track.to_string(),
            title: track.trim_end_matches(".wav").replace('_', " "),
            duration_seconds: info.duration_seconds(),
            sample_rate: info.sample_rate,
            total_frames: info.total_frames(),
            frames_per_segment,
            total_streams: 0,
            created_at: Utc::now(),
            segments: (0..segment_count)
                .map(|index| SegmentState {
                    index,
                    play_count: 0,
                    last_played: None,
                })
                .collect(),
        };
        fs::create_dir_all(&self.metadata_dir)?;
        self.commit(track, &record)?;
        log::info!(
            "initialized metadata for '{}' ({} segments)",
            track,
            segment_count
        );
        Ok(record)
    }

    /// Temp file in the record's own directory, fsync, atomic rename.
    fn commit(&self, track: &str, record: &TrackRecord) -> Result<()> {
        let tmp = tempfile::NamedTempFile::new_in(&self.metadata_dir)?;
        serde_json::to_writer_pretty(tmp.as_file(), record)
            .map_err(|e| StoreError::Io(e.into()))?;
        tmp.as_file().sync_all()?;
        tmp.persist(self.record_path(track))
            .map_err(|e| StoreError::Io(e.error))?;
        Ok(())
    }

    fn check_consistency(&self, track: &str, record: &TrackRecord, info: &WavInfo) -> Result<()> {
        let mismatch = |reason: String| {
            Err(StoreError::InconsistentMetadata {
                track: track.to_string(),
                reason,
            })
        };
        if record.sample_rate != info.sample_rate {
            return mismatch(format!(
                "record sample rate {} vs file {}",
                record.sample_rate, info.sample_rate
            ));
        }
        if record.total_frames != info.total_frames() {
            return mismatch(format!(
                "record frame count {} vs file {}",
                record.total_frames,
                info.total_frames()
            ));
        }
        let derived = self.frame_store.segment_count(info);
        if record.segments.len() != derived {
            return mismatch(format!(
                "record has {} segments, file layout implies {}",
                record.segments.len(),
                derived
            ));
        }
        Ok(())
    }
}

fn load_record(path: &Path) -> Result<TrackRecord> {
    let contents = fs::read_to_string(path)?;
    serde_json::from_str(&contents).map_err(|e| {
        StoreError::Format(format!("unreadable record {}: {}", path.display(), e))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Sample;
    use tempfile::TempDir;

    fn setup(frames: usize) -> (TempDir, Arc<FrameStore>, MetadataStore) {
        let dir = TempDir::new().unwrap();
        let audio_dir = dir.path().join("audio");
        let metadata_dir = dir.path().join("metadata");
        fs::create_dir_all(&audio_dir).unwrap();

        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 8_000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(audio_dir.join("song.wav"), spec).unwrap();
        for i in 0..frames {
            writer.write_sample((i % 500) as Sample).unwrap();
        }
        writer.finalize().unwrap();

        let frame_store = Arc::new(FrameStore::new(audio_dir, 0.5));
        let store = MetadataStore::new(Arc::clone(&frame_store), metadata_dir);
        (dir, frame_store, store)
    }

    #[test]
    fn test_get_creates_record_lazily() {
        let (_dir, _fs, store) = setup(10_000);
        assert!(!store.record_path("song.wav").exists());

        let record = store.get("song.wav").unwrap();
        assert_eq!(record.format_version, FORMAT_VERSION);
        assert_eq!(record.segment_count(), 3); // 10_000 / 4_000, ceiling
        assert!(record.segments.iter().all(|s| s.play_count == 0));
        assert!(store.record_path("song.wav").exists());
    }

    #[test]
    fn test_unknown_track_is_not_found() {
        let (_dir, _fs, store) = setup(10_000);
        assert!(matches!(
            store.get("nope.wav"),
            Err(StoreError::TrackNotFound(_))
        ));
    }

    #[test]
    fn test_update_persists_across_reads() {
        let (_dir, _fs, store) = setup(10_000);
        store.get("song.wav").unwrap();

        let updated = store.increment_play_count("song.wav", 1).unwrap();
        assert_eq!(updated.segments[1].play_count, 1);
        assert!(updated.segments[1].last_played.is_some());

        let reread = store.get("song.wav").unwrap();
        assert_eq!(reread.segments[1].play_count, 1);
        assert_eq!(reread.total_plays(), 1);
    }

    #[test]
    fn test_out_of_range_update_rejected() {
        let (_dir, _fs, store) = setup(10_000);
        assert!(matches!(
            store.increment_play_count("song.wav", 99),
            Err(StoreError::SegmentOutOfRange { index: 99, .. })
        ));
    }

    #[test]
    fn test_stale_temp_file_does_not_corrupt_record() {
        // Simulates a crash between temp-file write and rename: the
        // committed record must read back fully intact.
        let (_dir, _fs, store) = setup(10_000);
        store.increment_play_count("song.wav", 0).unwrap();

        fs::write(
            store.metadata_dir().join(".tmpXYZ"),
            b"{ truncated garbage",
        )
        .unwrap();

        let record = store.get("song.wav").unwrap();
        assert_eq!(record.segments[0].play_count, 1);
    }

    #[test]
    fn test_out_of_band_replacement_is_inconsistent() {
        let (dir, _fs, store) = setup(10_000);
        store.get("song.wav").unwrap();

        // Replace the track with a shorter file behind the store's back
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 8_000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let path = dir.path().join("audio/song.wav");
        let mut writer = hound::WavWriter::create(&path, spec).unwrap();
        for _ in 0..2_000 {
            writer.write_sample(7 as Sample).unwrap();
        }
        writer.finalize().unwrap();

        assert!(matches!(
            store.get("song.wav"),
            Err(StoreError::InconsistentMetadata { .. })
        ));
    }

    #[test]
    fn test_scan_initializes_new_tracks_once() {
        let (_dir, _fs, store) = setup(10_000);
        let first = store.scan_and_initialize().unwrap();
        assert_eq!(first, vec!["song.wav".to_string()]);
        let second = store.scan_and_initialize().unwrap();
        assert!(second.is_empty());

        let tracks = store.list_tracks().unwrap();
        assert_eq!(tracks.len(), 1);
        assert_eq!(tracks[0].filename, "song.wav");
    }

    #[test]
    fn test_average_degradation() {
        let (_dir, _fs, store) = setup(10_000);
        store.get("song.wav").unwrap();
        for _ in 0..10 {
            store.increment_play_count("song.wav", 0).unwrap();
        }
        let record = store.get("song.wav").unwrap();
        // Segment 0 at p=0.1, two untouched segments: mean 0.0333... -> %
        let expected = 0.1 / 3.0 * 100.0;
        assert!((record.average_degradation(1.0) - expected).abs() < 1e-9);
    }
}
