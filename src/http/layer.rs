//! Tower middleware applying admission control to HTTP requests.

use axum::extract::ConnectInfo;
use axum::http::{header, HeaderMap, Request, StatusCode};
use axum::response::{IntoResponse, Response};
use futures::future::BoxFuture;
use std::net::SocketAddr;
use std::task::{Context, Poll};
use std::time::Duration;
use tower::{Layer, Service};

use crate::ratelimit::{AdmissionFilter, Decision, RequestInfo};

/// Body of every rejection.
pub const TOO_MANY_REQUESTS_BODY: &str = "Too many requests. Please try again later.";

const X_FORWARDED_FOR: &str = "x-forwarded-for";

/// Layer wrapping services in [`AdmissionService`].
#[derive(Debug, Clone)]
pub struct AdmissionLayer {
    filter: AdmissionFilter,
}

impl AdmissionLayer {
    /// Create a new admission layer.
    pub fn new(filter: AdmissionFilter) -> Self {
        Self { filter }
    }
}

impl<S> Layer<S> for AdmissionLayer {
    type Service = AdmissionService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        AdmissionService {
            inner,
            filter: self.filter.clone(),
        }
    }
}

/// Service that forwards admitted requests to `inner` and answers the rest
/// with `429 Too Many Requests`.
#[derive(Debug, Clone)]
pub struct AdmissionService<S> {
    inner: S,
    filter: AdmissionFilter,
}

impl<S, B> Service<Request<B>> for AdmissionService<S>
where
    S: Service<Request<B>, Response = Response> + Send + 'static,
    S::Future: Send + 'static,
    B: Send + 'static,
{
    type Response = Response;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: Request<B>) -> Self::Future {
        if let Decision::Deny { retry_after } = self.filter.check(&request_info(&request)) {
            return Box::pin(async move { Ok(too_many_requests(retry_after)) });
        }

        Box::pin(self.inner.call(request))
    }
}

/// Extract what admission control needs from an HTTP request.
pub fn request_info<B>(request: &Request<B>) -> RequestInfo {
    RequestInfo {
        path: request.uri().path().to_string(),
        forwarded_for: forwarded_for(request.headers()),
        remote_addr: request
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip()),
    }
}

fn forwarded_for(headers: &HeaderMap) -> Option<String> {
    headers
        .get(X_FORWARDED_FOR)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
}

/// Build the rejection response for a denied request.
pub fn too_many_requests(retry_after: Duration) -> Response {
    (
        StatusCode::TOO_MANY_REQUESTS,
        [(header::RETRY_AFTER, retry_after.as_secs().to_string())],
        TOO_MANY_REQUESTS_BODY,
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RateLimitingConfig;
    use crate::ratelimit::LimiterRegistry;
    use axum::body::Body;
    use std::convert::Infallible;
    use std::net::{IpAddr, Ipv4Addr};
    use std::sync::Arc;
    use tower::{service_fn, ServiceExt};

    fn service(
        config: RateLimitingConfig,
    ) -> impl Service<Request<Body>, Response = Response, Error = Infallible> + Clone {
        let filter = AdmissionFilter::new(&config, Arc::new(LimiterRegistry::new())).unwrap();
        AdmissionLayer::new(filter).layer(service_fn(|_request: Request<Body>| async {
            Ok::<_, Infallible>(StatusCode::OK.into_response())
        }))
    }

    fn request(path: &str, client: &str) -> Request<Body> {
        Request::builder()
            .uri(path)
            .header(X_FORWARDED_FOR, client)
            .body(Body::empty())
            .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_allows_until_exhausted_then_rejects() {
        let svc = service(RateLimitingConfig {
            burst_size: 3,
            ..Default::default()
        });

        for _ in 0..3 {
            let response = svc.clone().oneshot(request("/api/auth/signin", "1.2.3.4")).await.unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }

        let response = svc.clone().oneshot(request("/api/auth/signin", "1.2.3.4")).await.unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()[header::RETRY_AFTER], "60");
        assert!(response.headers()[header::CONTENT_TYPE]
            .to_str()
            .unwrap()
            .starts_with("text/plain"));

        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], TOO_MANY_REQUESTS_BODY.as_bytes());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unlimited_path_reaches_inner_service() {
        let svc = service(RateLimitingConfig {
            burst_size: 1,
            ..Default::default()
        });

        for _ in 0..20 {
            let response = svc.clone().oneshot(request("/api/tasks/1", "1.2.3.4")).await.unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejection_is_per_client() {
        let svc = service(RateLimitingConfig {
            burst_size: 1,
            ..Default::default()
        });

        let first = svc.clone().oneshot(request("/api/admin/x", "7.7.7.7")).await.unwrap();
        let second = svc.clone().oneshot(request("/api/admin/x", "7.7.7.7")).await.unwrap();
        let other = svc.clone().oneshot(request("/api/admin/x", "8.8.8.8")).await.unwrap();

        assert_eq!(first.status(), StatusCode::OK);
        assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(other.status(), StatusCode::OK);
    }

    #[test]
    fn test_request_info_from_connect_info() {
        let mut request = Request::builder()
            .uri("/api/auth/signin?next=/home")
            .body(Body::empty())
            .unwrap();
        let addr = SocketAddr::from(([192, 168, 1, 20], 50123));
        request.extensions_mut().insert(ConnectInfo(addr));

        let info = request_info(&request);
        assert_eq!(info.path, "/api/auth/signin");
        assert_eq!(info.forwarded_for, None);
        assert_eq!(info.remote_addr, Some(IpAddr::V4(Ipv4Addr::new(192, 168, 1, 20))));
    }

    #[test]
    fn test_request_info_reads_forwarded_header() {
        let info = request_info(&request("/", "1.2.3.4, 10.0.0.1"));
        assert_eq!(info.forwarded_for.as_deref(), Some("1.2.3.4, 10.0.0.1"));
        assert_eq!(info.remote_addr, None);
    }
}
