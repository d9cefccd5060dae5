//! Rate limiting logic and state management.

mod admission;
mod bucket;
mod identity;
mod reaper;
mod registry;
mod rules;

pub use admission::{AdmissionFilter, Decision, RETRY_AFTER};
pub use bucket::TokenBucket;
pub use identity::{ClientKey, RequestInfo};
pub use reaper::{IdleReaper, ReaperHandle};
pub use registry::{LimiterEntry, LimiterRegistry};
pub use rules::EndpointClassifier;
