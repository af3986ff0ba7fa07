//! Bounded, time-decaying index of the latest known state per resource.
//!
//! One logical mapping per update-bearing category (workflow, document, case,
//! batch, entity) from resource id to the most recent update payload plus a
//! locally assigned receipt timestamp. Replacement is last-write-wins; there
//! is no merging. A periodic sweep evicts records older than the retention
//! window, so the index stays bounded even when the UI never reads it.
//!
//! The dispatcher writes, the host UI reads. Reads return detached snapshots;
//! the maps themselves sit behind an `RwLock` because readers and the
//! connection task live on different threads.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;
use tokio::task::JoinHandle;

use crate::protocol::{Category, UpdatePayload};

/// Latest known update for a single resource.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResourceUpdateRecord {
    /// Id of the resource
    pub resource_id: String,
    /// Payload of the most recent update
    pub payload: UpdatePayload,
    /// When *we* received the update. Assigned locally; the server's own
    /// timestamp field is never used for eviction.
    pub received_at: DateTime<Utc>,
}

/// In-memory index of latest updates, keyed by (category, resource id).
#[derive(Debug)]
pub struct UpdateIndex {
    entries: RwLock<HashMap<Category, HashMap<String, ResourceUpdateRecord>>>,
    retention: TimeDelta,
}

impl UpdateIndex {
    /// Create an index that evicts records older than `retention`.
    pub fn new(retention: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            retention: TimeDelta::from_std(retention).unwrap_or(TimeDelta::MAX),
        }
    }

    /// Insert or fully replace the record for `resource_id`, stamped with the
    /// current local time.
    pub fn upsert(&self, category: Category, resource_id: &str, payload: UpdatePayload) {
        self.upsert_at(category, resource_id, payload, Utc::now());
    }

    /// Insert or replace with an explicit receipt timestamp.
    pub fn upsert_at(
        &self,
        category: Category,
        resource_id: &str,
        payload: UpdatePayload,
        received_at: DateTime<Utc>,
    ) {
        let record = ResourceUpdateRecord {
            resource_id: resource_id.to_string(),
            payload,
            received_at,
        };
        let mut entries = self.entries.write().unwrap();
        entries
            .entry(category)
            .or_default()
            .insert(resource_id.to_string(), record);
    }

    /// Latest record for a single resource, if any.
    pub fn get(&self, category: Category, resource_id: &str) -> Option<ResourceUpdateRecord> {
        self.entries
            .read()
            .unwrap()
            .get(&category)
            .and_then(|map| map.get(resource_id))
            .cloned()
    }

    /// Snapshot of every live record in a category, in no particular order.
    ///
    /// The returned records are detached: later upserts and sweeps do not
    /// affect them.
    pub fn get_all(&self, category: Category) -> Vec<ResourceUpdateRecord> {
        self.entries
            .read()
            .unwrap()
            .get(&category)
            .map(|map| map.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Number of live records in a category.
    pub fn len(&self, category: Category) -> usize {
        self.entries
            .read()
            .unwrap()
            .get(&category)
            .map(|map| map.len())
            .unwrap_or(0)
    }

    /// Whether the whole index holds no records.
    pub fn is_empty(&self) -> bool {
        self.entries
            .read()
            .unwrap()
            .values()
            .all(|map| map.is_empty())
    }

    /// Drop every record (e.g. on identity change).
    pub fn clear(&self) {
        self.entries.write().unwrap().clear();
    }

    /// Evict records older than the retention window. Returns the number of
    /// evicted records.
    pub fn sweep(&self) -> usize {
        self.sweep_at(Utc::now())
    }

    /// Evict as of an explicit `now`.
    ///
    /// A record whose receipt stamp lies in the future has no usable age
    /// (clock adjustment); it is left in place rather than treated as
    /// expired.
    pub fn sweep_at(&self, now: DateTime<Utc>) -> usize {
        let mut evicted = 0;
        let mut entries = self.entries.write().unwrap();
        for map in entries.values_mut() {
            let before = map.len();
            map.retain(|_, record| {
                let age = now.signed_duration_since(record.received_at);
                age < TimeDelta::zero() || age <= self.retention
            });
            evicted += before - map.len();
        }
        if evicted > 0 {
            log::debug!("[UpdateIndex] Sweep evicted {} stale records", evicted);
        }
        evicted
    }
}

/// Scoped handle for the periodic eviction sweep.
///
/// The sweep task is tied to this handle: dropping it (or calling [`stop`])
/// aborts the task, so no sweep can fire against an index after its channel
/// has been torn down.
///
/// [`stop`]: IndexSweeper::stop
#[derive(Debug)]
pub struct IndexSweeper {
    handle: JoinHandle<()>,
}

impl IndexSweeper {
    /// Spawn a task that sweeps `index` every `period`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(index: Arc<UpdateIndex>, period: Duration) -> Self {
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            // The first tick fires immediately; skip it so sweeps start one
            // full period after spawn.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                index.sweep();
            }
        });
        Self { handle }
    }

    /// Stop the sweep task. Idempotent.
    pub fn stop(&self) {
        self.handle.abort();
    }

    /// Whether the sweep task has ended.
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl Drop for IndexSweeper {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
