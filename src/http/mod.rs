//! HTTP surface: admission middleware and the server hosting it.

mod admin;
mod layer;
mod server;

pub use admin::StatsResponse;
pub use layer::{request_info, too_many_requests, AdmissionLayer, AdmissionService, TOO_MANY_REQUESTS_BODY};
pub use server::HttpServer;
