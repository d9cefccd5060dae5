//! Endpoint classification rules.
//!
//! Decides which request paths are subject to admission control. Paths are
//! matched against configured prefixes; an exclusion always beats an
//! inclusion so that frequently polled endpoints under a limited prefix
//! (token verification, health checks) are never throttled.

use crate::config::RateLimitingConfig;

/// Prefix-based policy deciding whether a path is rate limited.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EndpointClassifier {
    /// Prefixes that make a path limited
    limited: Vec<String>,
    /// Prefixes that exempt a path, checked first
    excluded: Vec<String>,
}

impl EndpointClassifier {
    /// Create a classifier from explicit prefix lists.
    pub fn new<L, E>(limited: L, excluded: E) -> Self
    where
        L: IntoIterator,
        L::Item: Into<String>,
        E: IntoIterator,
        E::Item: Into<String>,
    {
        Self {
            limited: limited.into_iter().map(Into::into).collect(),
            excluded: excluded.into_iter().map(Into::into).collect(),
        }
    }

    /// Build the classifier described by the rate limiting configuration.
    pub fn from_config(config: &RateLimitingConfig) -> Self {
        Self::new(
            config.limited_prefixes.iter().cloned(),
            config.excluded_prefixes.iter().cloned(),
        )
    }

    /// Whether requests to `path` are subject to rate limiting.
    pub fn is_limited(&self, path: &str) -> bool {
        if self.excluded.iter().any(|prefix| path.starts_with(prefix.as_str())) {
            return false;
        }
        self.limited.iter().any(|prefix| path.starts_with(prefix.as_str()))
    }
}
