//! Token bucket implementation.

use tokio::time::Instant;

/// A continuously refilling token bucket.
///
/// The bucket holds up to `capacity` permits and gains `refill_rate`
/// permits per second. Refill is computed lazily on each consume attempt,
/// so an idle bucket costs nothing. A new bucket starts full.
#[derive(Debug, Clone)]
pub struct TokenBucket {
    /// Maximum number of permits (the burst size)
    capacity: u32,
    /// Permits added per second
    refill_rate: f64,
    /// Permits currently available, never above `capacity`
    available: f64,
    /// When `available` was last brought up to date
    last_refill: Instant,
}

impl TokenBucket {
    /// Create a full bucket.
    pub fn new(capacity: u32, refill_rate: f64, now: Instant) -> Self {
        Self {
            capacity,
            refill_rate,
            available: capacity as f64,
            last_refill: now,
        }
    }

    /// Refill for the time elapsed since the last call, then take one
    /// permit if at least one is available.
    ///
    /// Returns `true` if the permit was taken.
    pub fn try_consume(&mut self, now: Instant) -> bool {
        self.refill(now);

        if self.available >= 1.0 {
            self.available -= 1.0;
            true
        } else {
            false
        }
    }

    /// Permits currently available, as of the last refill.
    pub fn available(&self) -> f64 {
        self.available
    }

    /// Get the capacity of this bucket.
    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Get the refill rate of this bucket in permits per second.
    pub fn refill_rate(&self) -> f64 {
        self.refill_rate
    }

    fn refill(&mut self, now: Instant) {
        // An earlier `now` refills nothing
        let elapsed = now.saturating_duration_since(self.last_refill);
        let refilled = self.available + elapsed.as_secs_f64() * self.refill_rate;
        self.available = refilled.min(self.capacity as f64);
        if now > self.last_refill {
            self.last_refill = now;
        }
    }
}
