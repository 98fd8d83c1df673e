//! Short-lived record of locally published event ids

use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::Instant;
use tracing::trace;

/// How long a published id counts as "recently local"
pub const DEFAULT_DEDUP_TTL: Duration = Duration::from_secs(5);

/// Inserts between two full sweeps of expired entries
const SWEEP_EVERY: u64 = 256;

/// Event ids this process published recently.
///
/// The broker subscriber consults it to drop copies of its own events that
/// come back through a wildcard subscription. Entries older than the TTL are
/// treated as unknown and evicted lazily on lookup and periodically on insert.
pub struct DedupCache {
    entries: DashMap<String, Instant>,
    ttl: Duration,
    inserts: AtomicU64,
}

impl DedupCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
            inserts: AtomicU64::new(0),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn record(&self, event_id: impl Into<String>) {
        self.entries.insert(event_id.into(), Instant::now());

        let inserts = self.inserts.fetch_add(1, Ordering::Relaxed) + 1;
        if inserts % SWEEP_EVERY == 0 {
            self.evict_expired();
        }
    }

    /// True iff `event_id` was recorded no longer than the TTL ago.
    pub fn was_recent(&self, event_id: &str) -> bool {
        let recorded = match self.entries.get(event_id) {
            Some(entry) => *entry.value(),
            None => return false,
        };

        if recorded.elapsed() <= self.ttl {
            true
        } else {
            self.entries
                .remove_if(event_id, |_, at| at.elapsed() > self.ttl);
            false
        }
    }

    /// Drop every expired entry. Returns how many were removed.
    pub fn evict_expired(&self) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, at| at.elapsed() <= self.ttl);
        let removed = before.saturating_sub(self.entries.len());
        if removed > 0 {
            trace!(removed, remaining = self.entries.len(), "Evicted expired event ids");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for DedupCache {
    fn default() -> Self {
        Self::new(DEFAULT_DEDUP_TTL)
    }
}
