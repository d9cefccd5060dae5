//! Per-client limiter registry.

use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

use super::bucket::TokenBucket;
use super::identity::ClientKey;

/// A client's token bucket together with the time it was last used.
pub struct LimiterEntry {
    /// The client's bucket; locked only for the duration of a consume
    bucket: Mutex<TokenBucket>,
    /// Reference point for `last_accessed_nanos`
    epoch: Instant,
    /// Nanoseconds from `epoch` to the last access, only ever raised
    last_accessed_nanos: AtomicU64,
}

impl LimiterEntry {
    fn new(capacity: u32, refill_rate: f64, now: Instant) -> Self {
        Self {
            bucket: Mutex::new(TokenBucket::new(capacity, refill_rate, now)),
            epoch: now,
            last_accessed_nanos: AtomicU64::new(0),
        }
    }

    /// Record a use of this entry at `now`.
    ///
    /// An older `now` than the recorded one leaves the timestamp unchanged.
    pub fn touch(&self, now: Instant) {
        let nanos = now.saturating_duration_since(self.epoch).as_nanos();
        let nanos = u64::try_from(nanos).unwrap_or(u64::MAX);
        self.last_accessed_nanos.fetch_max(nanos, Ordering::Relaxed);
    }

    /// When this entry was last used.
    pub fn last_accessed(&self) -> Instant {
        self.epoch + Duration::from_nanos(self.last_accessed_nanos.load(Ordering::Relaxed))
    }

    /// Try to take one permit from the bucket.
    pub fn try_consume(&self, now: Instant) -> bool {
        self.bucket.lock().try_consume(now)
    }

    /// Permits currently available in the bucket.
    pub fn available(&self) -> f64 {
        self.bucket.lock().available()
    }
}

impl std::fmt::Debug for LimiterEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LimiterEntry")
            .field("bucket", &*self.bucket.lock())
            .field("last_accessed", &self.last_accessed())
            .finish()
    }
}

/// Registry of limiter entries indexed by client key.
///
/// This struct is thread-safe and is meant to be shared through an `Arc`
/// between the admission filter and the idle reaper.
#[derive(Default)]
pub struct LimiterRegistry {
    entries: DashMap<ClientKey, Arc<LimiterEntry>>,
}

impl LimiterRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the entry for `key`, creating it with a full bucket stamped at
    /// `now` if absent.
    ///
    /// Concurrent first requests for the same key all receive the same
    /// entry.
    pub fn get_or_create(
        &self,
        key: &ClientKey,
        capacity: u32,
        refill_rate: f64,
        now: Instant,
    ) -> Arc<LimiterEntry> {
        if let Some(entry) = self.entries.get(key) {
            return Arc::clone(entry.value());
        }

        let entry = self.entries.entry(key.clone()).or_insert_with(|| {
            debug!(
                client = %key,
                capacity = capacity,
                refill_rate = refill_rate,
                "Creating new limiter entry"
            );
            Arc::new(LimiterEntry::new(capacity, refill_rate, now))
        });
        Arc::clone(entry.value())
    }

    /// Remove every entry not accessed since `now - window`.
    ///
    /// Returns the number of entries removed. Entries inserted while the
    /// scan is running may or may not be visited.
    pub fn evict_idle_since(&self, now: Instant, window: Duration) -> usize {
        let Some(threshold) = now.checked_sub(window) else {
            return 0;
        };

        let before = self.entries.len();
        self.entries
            .retain(|_, entry| entry.last_accessed() >= threshold);
        before.saturating_sub(self.entries.len())
    }

    /// Get the entry for `key` without creating one.
    pub fn get(&self, key: &str) -> Option<Arc<LimiterEntry>> {
        self.entries.get(key).map(|entry| Arc::clone(entry.value()))
    }

    /// Whether an entry exists for `key`.
    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Get the number of tracked clients.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no clients are tracked.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Remove all entries.
    pub fn clear(&self) {
        self.entries.clear();
    }
}

impl std::fmt::Debug for LimiterRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LimiterRegistry")
            .field("entries", &self.entries.len())
            .finish()
    }
}
