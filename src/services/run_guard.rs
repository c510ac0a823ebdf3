//! Single-flight guard for batch runs
//!
//! Two runs over the same window would write the same sessions twice, so a
//! window (keyed by its cursor) can be held by at most one queued or running
//! job. The permit is released when it is dropped.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rustc_hash::FxHashSet;
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Clone, Default)]
pub struct RunGuard {
    active: Arc<Mutex<FxHashSet<DateTime<Utc>>>>,
}

impl RunGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the window starting at `since`, or `None` if it is already held
    pub fn try_acquire(&self, since: DateTime<Utc>) -> Option<RunPermit> {
        let mut active = self.active.lock();
        if !active.insert(since) {
            debug!(since = %since, "run_window_busy");
            return None;
        }
        Some(RunPermit { active: self.active.clone(), since })
    }

    #[cfg(test)]
    pub fn is_held(&self, since: DateTime<Utc>) -> bool {
        self.active.lock().contains(&since)
    }

    /// Number of windows currently held
    pub fn held(&self) -> usize {
        self.active.lock().len()
    }
}

/// Exclusive claim on one run window
#[derive(Debug)]
pub struct RunPermit {
    active: Arc<Mutex<FxHashSet<DateTime<Utc>>>>,
    since: DateTime<Utc>,
}

impl RunPermit {
    pub fn since(&self) -> DateTime<Utc> {
        self.since
    }
}

impl Drop for RunPermit {
    fn drop(&mut self) {
        self.active.lock().remove(&self.since);
    }
}
