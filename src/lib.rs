//! Tollgate - Per-Client Request Admission Control
//!
//! This crate implements token bucket rate limiting keyed by client
//! identity. Buckets are created lazily on a client's first limited
//! request, live in a concurrent registry, and are evicted by a background
//! reaper once idle. A tower layer applies admission control to HTTP
//! services and turns denials into `429 Too Many Requests`.

pub mod config;
pub mod error;
pub mod http;
pub mod ratelimit;
