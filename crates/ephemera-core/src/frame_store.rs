//! Positional frame I/O over WAV track files
//!
//! The frame store exclusively owns the on-disk byte layout of tracks. It
//! parses the RIFF header once per operation, reads and overwrites raw PCM
//! frames in place, and downmixes multi-channel input to mono at ingestion.
//! Callers are responsible for holding the appropriate segment locks; the
//! frame store itself does no coordination.

use std::fs::{File, OpenOptions};
use std::io::{BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::error::{Result, StoreError};
use crate::types::{MonoBuffer, Sample, BYTES_PER_FRAME};

/// WAVE format tag for uncompressed PCM
const PCM_FORMAT_TAG: u16 = 1;

/// Parsed layout of a WAV file
#[derive(Debug, Clone)]
pub struct WavInfo {
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Number of channels (1 after ingestion)
    pub channels: u16,
    /// Bits per sample (16 is the only supported depth)
    pub bits_per_sample: u16,
    /// Audio format tag (1 = PCM)
    pub format_tag: u16,
    /// Byte offset of the first sample frame
    pub data_offset: u64,
    /// Size of the data chunk in bytes
    pub data_len: u64,
    /// Total size of the file in bytes
    pub file_len: u64,
}

impl WavInfo {
    /// Bytes per sample frame (all channels)
    pub fn bytes_per_frame(&self) -> u64 {
        u64::from(self.channels) * u64::from(self.bits_per_sample / 8)
    }

    /// Number of sample frames in the data chunk
    pub fn total_frames(&self) -> u64 {
        self.data_len / self.bytes_per_frame()
    }

    /// Duration in seconds
    pub fn duration_seconds(&self) -> f64 {
        self.total_frames() as f64 / f64::from(self.sample_rate)
    }

    /// True if the file is already in the store's working format
    /// (mono 16-bit uncompressed PCM).
    pub fn is_store_format(&self) -> bool {
        self.channels == 1 && self.bits_per_sample == 16 && self.format_tag == PCM_FORMAT_TAG
    }
}

/// Parse the RIFF/fmt/data layout of a WAV file without reading audio data.
pub fn read_info(path: &Path) -> Result<WavInfo> {
    let file = File::open(path)?;
    let file_len = file.metadata()?.len();
    let mut reader = BufReader::new(file);

    let mut header = [0u8; 12];
    reader.read_exact(&mut header)?;
    if &header[0..4] != b"RIFF" {
        return Err(StoreError::Format(format!(
            "{}: not a RIFF file",
            path.display()
        )));
    }
    if &header[8..12] != b"WAVE" {
        return Err(StoreError::Format(format!(
            "{}: not a WAVE file",
            path.display()
        )));
    }

    let mut fmt: Option<(u16, u16, u32, u16)> = None;
    let mut data: Option<(u64, u64)> = None;

    loop {
        let mut chunk_id = [0u8; 4];
        if reader.read_exact(&mut chunk_id).is_err() {
            break;
        }
        let mut chunk_size_bytes = [0u8; 4];
        reader.read_exact(&mut chunk_size_bytes)?;
        let chunk_size = u32::from_le_bytes(chunk_size_bytes);

        match &chunk_id {
            b"fmt " => {
                if chunk_size < 16 {
                    return Err(StoreError::Format(format!(
                        "{}: fmt chunk too small",
                        path.display()
                    )));
                }
                let mut fmt_data = vec![0u8; chunk_size as usize];
                reader.read_exact(&mut fmt_data)?;
                let format_tag = u16::from_le_bytes([fmt_data[0], fmt_data[1]]);
                let channels = u16::from_le_bytes([fmt_data[2], fmt_data[3]]);
                let sample_rate =
                    u32::from_le_bytes([fmt_data[4], fmt_data[5], fmt_data[6], fmt_data[7]]);
                let bits_per_sample = u16::from_le_bytes([fmt_data[14], fmt_data[15]]);
                fmt = Some((format_tag, channels, sample_rate, bits_per_sample));
            }
            b"data" => {
                let offset = reader.stream_position()?;
                data = Some((offset, u64::from(chunk_size)));
                reader.seek(SeekFrom::Current(i64::from(chunk_size)))?;
            }
            _ => {
                // Skip unknown chunks
                reader.seek(SeekFrom::Current(i64::from(chunk_size)))?;
            }
        }

        // Pad to word boundary
        if chunk_size % 2 != 0 {
            reader.seek(SeekFrom::Current(1))?;
        }
    }

    let (format_tag, channels, sample_rate, bits_per_sample) = fmt.ok_or_else(|| {
        StoreError::Format(format!("{}: missing fmt chunk", path.display()))
    })?;
    let (data_offset, data_len) = data.ok_or_else(|| {
        StoreError::Format(format!("{}: missing data chunk", path.display()))
    })?;

    if channels == 0 || bits_per_sample == 0 {
        return Err(StoreError::Format(format!(
            "{}: degenerate fmt chunk",
            path.display()
        )));
    }

    // A truncated data chunk would let segment math run past EOF
    let data_len = data_len.min(file_len.saturating_sub(data_offset));

    Ok(WavInfo {
        sample_rate,
        channels,
        bits_per_sample,
        format_tag,
        data_offset,
        data_len,
        file_len,
    })
}

/// Raw positional read/write of PCM frames within the audio directory.
pub struct FrameStore {
    audio_dir: PathBuf,
    segment_duration: f64,
}

impl FrameStore {
    pub fn new<P: Into<PathBuf>>(audio_dir: P, segment_duration: f64) -> Self {
        Self {
            audio_dir: audio_dir.into(),
            segment_duration,
        }
    }

    pub fn audio_dir(&self) -> &Path {
        &self.audio_dir
    }

    /// Resolve a track filename to its path, rejecting anything that would
    /// escape the audio directory.
    pub fn track_path(&self, track: &str) -> Result<PathBuf> {
        if track.is_empty()
            || track.contains('/')
            || track.contains('\\')
            || track.starts_with('.')
        {
            return Err(StoreError::TrackNotFound(track.to_string()));
        }
        let path = self.audio_dir.join(track);
        if !path.is_file() {
            return Err(StoreError::TrackNotFound(track.to_string()));
        }
        Ok(path)
    }

    /// Parse the header of a track.
    pub fn info(&self, track: &str) -> Result<WavInfo> {
        read_info(&self.track_path(track)?)
    }

    /// Header info for a track that must already be in store format.
    fn store_info(&self, track: &str) -> Result<(PathBuf, WavInfo)> {
        let path = self.track_path(track)?;
        let info = read_info(&path)?;
        if !info.is_store_format() {
            return Err(StoreError::Format(format!(
                "'{}' is not ingested mono 16-bit PCM ({} ch, {} bit, tag {})",
                track, info.channels, info.bits_per_sample, info.format_tag
            )));
        }
        Ok((path, info))
    }

    /// Frames per segment for a track's sample rate (always at least 1).
    pub fn frames_per_segment(&self, info: &WavInfo) -> usize {
        ((f64::from(info.sample_rate) * self.segment_duration) as usize).max(1)
    }

    /// Number of segments in a track (ceiling division; the final segment
    /// may be partial).
    pub fn segment_count(&self, info: &WavInfo) -> usize {
        let fps = self.frames_per_segment(info) as u64;
        info.total_frames().div_ceil(fps) as usize
    }

    /// Exact frame count of one segment (clamped at EOF for the final one).
    pub fn segment_frames(&self, track: &str, info: &WavInfo, index: usize) -> Result<usize> {
        let fps = self.frames_per_segment(info) as u64;
        let total = info.total_frames();
        let start = index as u64 * fps;
        if start >= total {
            return Err(StoreError::SegmentOutOfRange {
                track: track.to_string(),
                index,
                segments: self.segment_count(info),
            });
        }
        Ok((total - start).min(fps) as usize)
    }

    /// Read exactly `count` frames starting at `start_frame`.
    ///
    /// The range must lie entirely within the data chunk.
    pub fn read_frames(&self, track: &str, start_frame: u64, count: usize) -> Result<MonoBuffer> {
        let (path, info) = self.store_info(track)?;
        if start_frame + count as u64 > info.total_frames() {
            return Err(StoreError::Format(format!(
                "read of {} frames at {} past end of '{}' ({} frames)",
                count,
                start_frame,
                track,
                info.total_frames()
            )));
        }
        let mut file = File::open(path)?;
        file.seek(SeekFrom::Start(
            info.data_offset + start_frame * BYTES_PER_FRAME,
        ))?;
        let mut bytes = vec![0u8; count * BYTES_PER_FRAME as usize];
        file.read_exact(&mut bytes)?;
        Ok(MonoBuffer::from_le_bytes(&bytes))
    }

    /// Read one segment; returns exactly the frame count implied by the
    /// segment's offset range (shorter only for the final partial segment).
    pub fn read_segment(&self, track: &str, index: usize) -> Result<MonoBuffer> {
        let (_, info) = self.store_info(track)?;
        let expected = self.segment_frames(track, &info, index)?;
        let start = index as u64 * self.frames_per_segment(&info) as u64;
        self.read_frames(track, start, expected)
    }

    /// Overwrite one segment in place.
    ///
    /// `frames.len()` must exactly match the segment's expected frame count;
    /// a mismatch is a hard precondition failure, never truncated or padded.
    /// The write is flushed and fsynced before this returns, so a successful
    /// return is a durability point the coordinator can order against.
    pub fn write_segment(&self, track: &str, index: usize, frames: &MonoBuffer) -> Result<()> {
        let (path, info) = self.store_info(track)?;
        let expected = self.segment_frames(track, &info, index)?;
        if frames.len() != expected {
            return Err(StoreError::Format(format!(
                "segment {} of '{}' expects {} frames, got {}",
                index,
                track,
                expected,
                frames.len()
            )));
        }
        let start = index as u64 * self.frames_per_segment(&info) as u64;

        let mut file = OpenOptions::new().write(true).open(path)?;
        file.seek(SeekFrom::Start(info.data_offset + start * BYTES_PER_FRAME))?;
        file.write_all(&frames.to_le_bytes())?;
        file.flush()?;
        file.sync_data()?;
        Ok(())
    }

    /// Current total byte length of the track file.
    pub fn file_len(&self, track: &str) -> Result<u64> {
        Ok(self.track_path(track)?.metadata()?.len())
    }

    /// Read raw bytes at an absolute file offset (header or data).
    ///
    /// Used by the streaming service so range responses flow through the
    /// frame store rather than touching files directly. The caller holds
    /// whatever segment locks the range requires.
    pub fn read_bytes(&self, track: &str, offset: u64, len: usize) -> Result<Vec<u8>> {
        let path = self.track_path(track)?;
        let mut file = File::open(path)?;
        file.seek(SeekFrom::Start(offset))?;
        let mut bytes = vec![0u8; len];
        file.read_exact(&mut bytes)?;
        Ok(bytes)
    }

    /// Downmix a track to the store's working format, once, at ingestion.
    ///
    /// Multi-channel frames are averaged into a single mono channel and the
    /// file is rewritten through a sibling temp file plus atomic rename.
    /// Returns `true` if the file was rewritten, `false` if it was already
    /// mono 16-bit PCM.
    pub fn ensure_mono(&self, track: &str) -> Result<bool> {
        let path = self.track_path(track)?;
        let info = read_info(&path)?;
        if info.is_store_format() {
            return Ok(false);
        }
        if info.format_tag != PCM_FORMAT_TAG || info.bits_per_sample != 16 {
            return Err(StoreError::Format(format!(
                "'{}': only 16-bit PCM input is supported (tag {}, {} bit)",
                track, info.format_tag, info.bits_per_sample
            )));
        }

        log::info!(
            "downmixing '{}' ({} channels) to mono at ingestion",
            track,
            info.channels
        );

        let channels = usize::from(info.channels);
        let mut file = File::open(&path)?;
        file.seek(SeekFrom::Start(info.data_offset))?;
        let mut bytes = vec![0u8; info.data_len as usize];
        file.read_exact(&mut bytes)?;

        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: info.sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let tmp = tempfile::NamedTempFile::new_in(&self.audio_dir)?;
        let mut writer = hound::WavWriter::new(tmp.as_file(), spec)?;
        for frame in bytes.chunks_exact(channels * 2) {
            let sum: i32 = frame
                .chunks_exact(2)
                .map(|b| i32::from(Sample::from_le_bytes([b[0], b[1]])))
                .sum();
            writer.write_sample((sum / channels as i32) as Sample)?;
        }
        writer.finalize()?;

        tmp.as_file().sync_all()?;
        tmp.persist(&path).map_err(|e| StoreError::Io(e.error))?;
        Ok(true)
    }
}
