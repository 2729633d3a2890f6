//! Common types for Ephemera
//!
//! The store operates on a single explicit buffer type: a fixed-width mono
//! sample buffer. Multi-channel input is downmixed once at ingestion, so by
//! the time frames reach any other component they are always mono 16-bit PCM.

use std::ops::{Index, IndexMut};

/// Audio sample type (16-bit PCM, the on-disk representation)
pub type Sample = i16;

/// Bytes occupied by one mono frame on disk
pub const BYTES_PER_FRAME: u64 = std::mem::size_of::<Sample>() as u64;

/// A buffer of mono samples
///
/// This is the only buffer type the store reads or writes. It deliberately
/// avoids any implicit broadcasting: length changes and sample mutation are
/// explicit operations.
#[derive(Debug, Clone, PartialEq)]
pub struct MonoBuffer {
    samples: Vec<Sample>,
}

impl MonoBuffer {
    /// Create a buffer filled with silence
    pub fn silence(len: usize) -> Self {
        Self {
            samples: vec![0; len],
        }
    }

    /// Create a buffer from an existing Vec of samples
    pub fn from_vec(samples: Vec<Sample>) -> Self {
        Self { samples }
    }

    /// Decode a buffer from little-endian PCM bytes
    ///
    /// Panics if `bytes` is not a whole number of samples; callers read
    /// exact segment lengths so a ragged tail is a logic error.
    pub fn from_le_bytes(bytes: &[u8]) -> Self {
        assert!(
            bytes.len() % 2 == 0,
            "PCM byte buffer must have even length"
        );
        let samples = bytes
            .chunks_exact(2)
            .map(|b| Sample::from_le_bytes([b[0], b[1]]))
            .collect();
        Self { samples }
    }

    /// Encode the buffer as little-endian PCM bytes
    pub fn to_le_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.samples.len() * 2);
        for sample in &self.samples {
            out.extend_from_slice(&sample.to_le_bytes());
        }
        out
    }

    /// Get the number of samples in the buffer
    #[inline]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Check if the buffer is empty
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Get a slice of the samples
    #[inline]
    pub fn as_slice(&self) -> &[Sample] {
        &self.samples
    }

    /// Get a mutable slice of the samples
    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [Sample] {
        &mut self.samples
    }

    /// Get an iterator over the samples
    pub fn iter(&self) -> impl Iterator<Item = &Sample> {
        self.samples.iter()
    }

    /// Mean squared amplitude of the buffer, normalized to [0.0, 1.0]
    ///
    /// Dropout only ever zeroes samples, so this is the quantity that must
    /// shrink monotonically (in expectation) as play count grows.
    pub fn energy(&self) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        let sum: f64 = self
            .samples
            .iter()
            .map(|&s| {
                let norm = f64::from(s) / f64::from(Sample::MAX);
                norm * norm
            })
            .sum();
        sum / self.samples.len() as f64
    }
}

impl Index<usize> for MonoBuffer {
    type Output = Sample;

    #[inline]
    fn index(&self, index: usize) -> &Self::Output {
        &self.samples[index]
    }
}

impl IndexMut<usize> for MonoBuffer {
    #[inline]
    fn index_mut(&mut self, index: usize) -> &mut Self::Output {
        &mut self.samples[index]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_le_bytes_round_trip() {
        let buffer = MonoBuffer::from_vec(vec![0, 1, -1, i16::MAX, i16::MIN]);
        let bytes = buffer.to_le_bytes();
        assert_eq!(bytes.len(), 10);
        assert_eq!(MonoBuffer::from_le_bytes(&bytes), buffer);
    }

    #[test]
    fn test_energy_of_silence_is_zero() {
        assert_eq!(MonoBuffer::silence(128).energy(), 0.0);
        assert_eq!(MonoBuffer::from_vec(Vec::new()).energy(), 0.0);
    }

    #[test]
    fn test_energy_decreases_when_samples_zeroed() {
        let mut buffer = MonoBuffer::from_vec(vec![1000; 64]);
        let before = buffer.energy();
        buffer.as_mut_slice()[..32].fill(0);
        let after = buffer.energy();
        assert!(after < before);
        assert!((after - before / 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_full_scale_energy_near_one() {
        let buffer = MonoBuffer::from_vec(vec![i16::MAX; 8]);
        assert!((buffer.energy() - 1.0).abs() < 1e-9);
    }
}
