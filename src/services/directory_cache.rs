//! Run-scoped memoization of directory lookups
//!
//! One cache per directory per run. A miss triggers a single fetch whose batch
//! response populates every beacon it covers, so later beacons of the same
//! facility never hit the network. Entries are written once and dropped with
//! the run; failed lookups are remembered too, so a dead directory is asked
//! once per beacon rather than once per record.

use crate::domain::error::PositioningError;
use crate::domain::types::{BeaconId, DirectoryBatch};
use rustc_hash::FxHashMap;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Debug)]
enum Entry<T> {
    Ready(Arc<T>),
    Unavailable(String),
}

/// Lazy-fill map keyed by beacon id
#[derive(Debug)]
pub struct DirectoryCache<T> {
    name: &'static str,
    entries: FxHashMap<BeaconId, Entry<T>>,
    fetches: usize,
}

impl<T> DirectoryCache<T> {
    pub fn new(name: &'static str) -> Self {
        Self { name, entries: FxHashMap::default(), fetches: 0 }
    }

    /// Cached payload for a beacon, if a successful fetch covered it
    pub fn get(&self, beacon: &BeaconId) -> Option<Arc<T>> {
        match self.entries.get(beacon) {
            Some(Entry::Ready(payload)) => Some(payload.clone()),
            _ => None,
        }
    }

    /// Number of fetches issued so far
    pub fn fetches(&self) -> usize {
        self.fetches
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Return the cached entry for `beacon`, fetching on a miss
    pub async fn get_or_fetch<F, Fut>(
        &mut self,
        beacon: &BeaconId,
        fetch: F,
    ) -> Result<Arc<T>, PositioningError>
    where
        F: FnOnce(BeaconId) -> Fut,
        Fut: Future<Output = anyhow::Result<DirectoryBatch<T>>>,
    {
        match self.entries.get(beacon) {
            Some(Entry::Ready(payload)) => return Ok(payload.clone()),
            Some(Entry::Unavailable(reason)) => {
                return Err(PositioningError::DirectoryUnavailable(reason.clone()))
            }
            None => {}
        }

        self.fetches += 1;
        match fetch(beacon.clone()).await {
            Ok(batch) => Ok(self.insert_batch(beacon, batch)),
            Err(e) => {
                let reason = format!("{:#}", e);
                warn!(
                    directory = %self.name,
                    beacon = %beacon,
                    error = %reason,
                    "directory_fetch_failed"
                );
                self.entries.insert(beacon.clone(), Entry::Unavailable(reason.clone()));
                Err(PositioningError::DirectoryUnavailable(reason))
            }
        }
    }

    /// Store a batch under every beacon it covers, plus the one that asked for it
    fn insert_batch(&mut self, requested: &BeaconId, batch: DirectoryBatch<T>) -> Arc<T> {
        let payload = Arc::new(batch.payload);
        let covered = batch.beacons.len();

        for beacon in batch.beacons {
            self.entries.entry(beacon).or_insert_with(|| Entry::Ready(payload.clone()));
        }
        self.entries.insert(requested.clone(), Entry::Ready(payload.clone()));

        debug!(
            directory = %self.name,
            beacon = %requested,
            covered = %covered,
            "directory_batch_cached"
        );
        payload
    }
}
