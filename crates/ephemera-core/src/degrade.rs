//! Degradation engine
//!
//! `apply_dropout` is a pure function of (frames, track, segment,
//! play_count, rate): all randomness derives from a seed hashed out of the
//! segment's identity and play count, never from a global generator, so a
//! degradation pass can be replayed bit-for-bit in tests and audits.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::types::MonoBuffer;

/// Probability that any one sample is zeroed at the given play count.
///
/// `p = clamp(rate * 0.01 * play_count, 0, 1)`. Saturates at 1.0 (full
/// silence) and never errors or overflows however large `play_count` grows.
pub fn dropout_probability(play_count: u64, rate: f64) -> f64 {
    (rate * 0.01 * play_count as f64).clamp(0.0, 1.0)
}

/// Deterministic RNG seed for one degradation pass.
pub fn segment_seed(track: &str, index: usize, play_count: u64) -> u64 {
    let mut hasher = DefaultHasher::new();
    track.hash(&mut hasher);
    index.hash(&mut hasher);
    play_count.hash(&mut hasher);
    hasher.finish()
}

/// Zero each sample independently with probability `dropout_probability`.
///
/// Energy of the result is non-increasing in `play_count` in expectation,
/// bounded below by all-zero silence once the probability saturates.
pub fn apply_dropout(frames: &mut MonoBuffer, track: &str, index: usize, play_count: u64, rate: f64) {
    let p = dropout_probability(play_count, rate);
    if p <= 0.0 {
        return;
    }
    if p >= 1.0 {
        frames.as_mut_slice().fill(0);
        return;
    }
    let mut rng = StdRng::seed_from_u64(segment_seed(track, index, play_count));
    for sample in frames.as_mut_slice() {
        if rng.gen::<f64>() < p {
            *sample = 0;
        }
    }
}
