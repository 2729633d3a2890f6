//! Store configuration
//!
//! All options come from the environment, matching the deployment surface:
//! `AUDIO_DIR`, `METADATA_DIR`, `SEGMENT_DURATION`, `DEGRADATION_RATE`,
//! `LOCK_TIMEOUT_SECS`. Unset or unparsable values fall back to defaults
//! with a logged warning rather than refusing to start.

use std::path::PathBuf;
use std::time::Duration;

/// Runtime configuration for the degrading-audio store.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Directory holding the WAV track files.
    pub audio_dir: PathBuf,
    /// Directory holding per-track metadata records and waveform caches.
    pub metadata_dir: PathBuf,
    /// Seconds of audio per segment (the unit of degradation and locking).
    pub segment_duration: f64,
    /// Multiplier on the dropout probability.
    pub degradation_rate: f64,
    /// How long lock acquisition may block before failing.
    pub lock_timeout: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            audio_dir: PathBuf::from("./audio"),
            metadata_dir: PathBuf::from("./metadata"),
            segment_duration: 0.5,
            degradation_rate: 1.0,
            lock_timeout: Duration::from_secs(5),
        }
    }
}

impl StoreConfig {
    /// Build a config from the process environment.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            audio_dir: std::env::var_os("AUDIO_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.audio_dir),
            metadata_dir: std::env::var_os("METADATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.metadata_dir),
            segment_duration: parse_env("SEGMENT_DURATION", defaults.segment_duration),
            degradation_rate: parse_env("DEGRADATION_RATE", defaults.degradation_rate),
            lock_timeout: Duration::from_secs_f64(parse_env(
                "LOCK_TIMEOUT_SECS",
                defaults.lock_timeout.as_secs_f64(),
            )),
        }
    }

    /// Frames per segment at the given sample rate (always at least 1).
    pub fn frames_per_segment(&self, sample_rate: u32) -> usize {
        ((f64::from(sample_rate) * self.segment_duration) as usize).max(1)
    }
}

fn parse_env(name: &str, default: f64) -> f64 {
    match std::env::var(name) {
        Ok(raw) => match raw.parse() {
            Ok(value) => value,
            Err(_) => {
                log::warn!("{}: could not parse '{}', using {}", name, raw, default);
                default
            }
        },
        Err(_) => default,
    }
}
