//! Request admission decisions.

use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{trace, warn};

use super::identity::{ClientKey, RequestInfo};
use super::registry::LimiterRegistry;
use super::rules::EndpointClassifier;
use crate::config::RateLimitingConfig;
use crate::error::Result;

/// Wait suggested to denied clients.
///
/// This is a fixed hint and is not derived from the bucket's actual refill
/// time.
pub const RETRY_AFTER: Duration = Duration::from_secs(60);

/// Outcome of an admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// The request is not subject to rate limiting
    Pass,
    /// A permit was taken from the client's bucket
    Allow,
    /// The client's bucket is empty
    Deny {
        /// Suggested wait before retrying
        retry_after: Duration,
    },
}

impl Decision {
    /// Whether the request may proceed.
    pub fn is_admitted(&self) -> bool {
        !matches!(self, Decision::Deny { .. })
    }
}

/// Decides whether each incoming request is admitted.
///
/// Cheap to share: the registry is held by `Arc` and everything else is
/// immutable after construction.
#[derive(Debug, Clone)]
pub struct AdmissionFilter {
    registry: Arc<LimiterRegistry>,
    classifier: EndpointClassifier,
    enabled: bool,
    capacity: u32,
    refill_rate: f64,
}

impl AdmissionFilter {
    /// Create a filter over `registry` from a validated configuration.
    pub fn new(config: &RateLimitingConfig, registry: Arc<LimiterRegistry>) -> Result<Self> {
        config.validate()?;

        Ok(Self {
            registry,
            classifier: EndpointClassifier::from_config(config),
            enabled: config.enabled,
            capacity: config.burst_size,
            refill_rate: config.requests_per_second,
        })
    }

    /// Check a request at the current time.
    pub fn check(&self, request: &RequestInfo) -> Decision {
        self.check_at(request, Instant::now())
    }

    /// Check a request at `now`.
    pub fn check_at(&self, request: &RequestInfo, now: Instant) -> Decision {
        if !self.enabled || !self.classifier.is_limited(&request.path) {
            return Decision::Pass;
        }

        let client = ClientKey::resolve(request);
        let entry = self
            .registry
            .get_or_create(&client, self.capacity, self.refill_rate, now);
        entry.touch(now);

        if entry.try_consume(now) {
            trace!(client = %client, path = %request.path, "Request admitted");
            Decision::Allow
        } else {
            warn!(client = %client, path = %request.path, "Rate limit exceeded");
            Decision::Deny {
                retry_after: RETRY_AFTER,
            }
        }
    }

    /// Whether admission control is enabled.
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Get the shared registry.
    pub fn registry(&self) -> &Arc<LimiterRegistry> {
        &self.registry
    }

    /// Get the bucket capacity used for new clients.
    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Get the refill rate used for new clients.
    pub fn refill_rate(&self) -> f64 {
        self.refill_rate
    }
}
