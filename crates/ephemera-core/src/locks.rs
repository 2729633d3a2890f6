//! Per-segment reader/writer locks
//!
//! The registry maps (track, segment) to a lock handle, created lazily on
//! first use and retained for the life of the process (arena+index pattern;
//! bounded by the number of segments actually touched). The registry's own
//! mutex guards only map insert/lookup; it is never held while a caller
//! performs segment I/O, so unrelated segments stay fully concurrent.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use parking_lot::{ArcRwLockReadGuard, ArcRwLockWriteGuard, RawRwLock, RwLock};

use crate::error::{Result, StoreError};

/// Lock acquisition mode: standard reader/writer semantics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    /// Any number of concurrent holders; excluded by Exclusive.
    Shared,
    /// At most one holder; excludes all Shared.
    Exclusive,
}

/// RAII guard for one held segment lock.
///
/// The guard owns an `Arc` of the underlying lock, so it can outlive the
/// registry borrow and is released on every exit path when dropped.
#[must_use = "the segment lock is released as soon as the guard is dropped"]
pub enum SegmentGuard {
    Shared(ArcRwLockReadGuard<RawRwLock, ()>),
    Exclusive(ArcRwLockWriteGuard<RawRwLock, ()>),
}

/// Process-scoped registry of per-(track, segment) locks.
pub struct SegmentLockRegistry {
    locks: Mutex<HashMap<(String, usize), Arc<RwLock<()>>>>,
    timeout: Duration,
}

impl SegmentLockRegistry {
    pub fn new(timeout: Duration) -> Self {
        Self {
            locks: Mutex::new(HashMap::new()),
            timeout,
        }
    }

    /// Look up (or lazily create) the lock for one segment.
    ///
    /// The registry mutex is held only for this map operation.
    fn entry(&self, track: &str, index: usize) -> Arc<RwLock<()>> {
        let mut map = self.locks.lock().expect("segment lock registry poisoned");
        map.entry((track.to_string(), index))
            .or_insert_with(|| Arc::new(RwLock::new(())))
            .clone()
    }

    /// Acquire a lock on one segment, blocking up to the configured timeout.
    ///
    /// On timeout this fails with [`StoreError::LockTimeout`] rather than
    /// blocking indefinitely; the caller decides whether to retry.
    pub fn acquire(&self, track: &str, index: usize, mode: LockMode) -> Result<SegmentGuard> {
        let cell = self.entry(track, index);
        let guard = match mode {
            LockMode::Shared => cell
                .try_read_arc_for(self.timeout)
                .map(SegmentGuard::Shared),
            LockMode::Exclusive => cell
                .try_write_arc_for(self.timeout)
                .map(SegmentGuard::Exclusive),
        };
        guard.ok_or_else(|| StoreError::LockTimeout {
            track: track.to_string(),
            index,
            timeout_ms: self.timeout.as_millis() as u64,
        })
    }

    /// Number of lock keys created so far (diagnostics and tests).
    pub fn len(&self) -> usize {
        self.locks.lock().expect("segment lock registry poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
