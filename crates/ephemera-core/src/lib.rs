//! Ephemera Core - the concurrent degrading-audio store
//!
//! Audio served by Ephemera is permanently altered by the act of listening:
//! every time a fixed-length segment of a track is played, it degrades a
//! little more, and the damage is written back to disk for all future
//! listeners. This crate owns the hard part of that system:
//!
//! - positional frame I/O over WAV files ([`frame_store`])
//! - per-segment reader/writer locking ([`locks`])
//! - the deterministic dropout function ([`degrade`])
//! - crash-consistent play-count records ([`metadata`])
//! - range reads that never observe torn writes ([`streaming`])
//! - the degrade transaction tying it all together ([`coordinator`])
//!
//! The lock registry is process-scoped: correctness requires exactly one
//! coordinating process per audio/metadata directory pair (see DESIGN.md).

pub mod config;
pub mod coordinator;
pub mod degrade;
pub mod error;
pub mod frame_store;
pub mod locks;
pub mod metadata;
pub mod streaming;
pub mod types;
pub mod waveform;

pub use config::StoreConfig;
pub use coordinator::{DegradeCoordinator, DegradeOutcome};
pub use error::{Result, StoreError};
pub use frame_store::FrameStore;
pub use locks::{LockMode, SegmentLockRegistry};
pub use metadata::{MetadataStore, TrackRecord};
pub use streaming::StreamingService;
pub use types::{MonoBuffer, Sample};
