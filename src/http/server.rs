//! HTTP server implementation.

use axum::http::StatusCode;
use axum::Router;
use std::future::{Future, IntoFuture};
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info, instrument};

use super::admin;
use super::layer::AdmissionLayer;
use crate::config::ServerConfig;
use crate::error::{Result, TollgateError};
use crate::ratelimit::AdmissionFilter;

/// HTTP server exposing the admission check and admin endpoints.
///
/// Every request to the check endpoint is run through admission control
/// and answered `200 OK` when admitted or `429 Too Many Requests` when
/// not, so a proxy can consult it before forwarding the original request.
pub struct HttpServer {
    /// Address of the admission check endpoint
    http_addr: SocketAddr,
    /// Address of the admin endpoint
    admin_addr: SocketAddr,
    /// The admission filter instance
    filter: AdmissionFilter,
}

impl HttpServer {
    /// Create a new HTTP server.
    pub fn new(config: &ServerConfig, filter: AdmissionFilter) -> Self {
        Self {
            http_addr: config.http_addr,
            admin_addr: config.admin_addr,
            filter,
        }
    }

    /// Router answering every path, behind the admission layer.
    pub fn check_router(&self) -> Router {
        Router::new()
            .fallback(admitted)
            .layer(AdmissionLayer::new(self.filter.clone()))
    }

    /// Router for health and statistics.
    pub fn admin_router(&self) -> Router {
        admin::router(self.filter.clone())
    }

    /// Start the HTTP server.
    ///
    /// This method will block until the server is shut down.
    pub async fn serve(self) -> Result<()> {
        self.serve_with_shutdown(std::future::pending()).await
    }

    /// Start the HTTP server with graceful shutdown.
    ///
    /// Both listeners shut down when the provided signal resolves.
    #[instrument(skip_all, fields(http_addr = %self.http_addr, admin_addr = %self.admin_addr))]
    pub async fn serve_with_shutdown<F>(self, signal: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let check_listener = bind(self.http_addr).await?;
        let admin_listener = bind(self.admin_addr).await?;

        info!(
            addr = %check_listener.local_addr()?,
            admin_addr = %admin_listener.local_addr()?,
            "Starting HTTP server for admission checks"
        );

        let (shutdown_tx, shutdown_rx) = watch::channel(());
        tokio::spawn(async move {
            signal.await;
            // Receivers may already be gone if a server failed
            let _ = shutdown_tx.send(());
        });

        let check = axum::serve(
            check_listener,
            self.check_router()
                .into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(wait_for(shutdown_rx.clone()))
        .into_future();

        let admin = axum::serve(admin_listener, self.admin_router())
            .with_graceful_shutdown(wait_for(shutdown_rx))
            .into_future();

        tokio::try_join!(check, admin).map_err(|e| {
            error!(error = %e, "HTTP server failed");
            TollgateError::Io(e)
        })?;

        info!("HTTP server stopped");
        Ok(())
    }
}

async fn admitted() -> StatusCode {
    StatusCode::OK
}

async fn bind(addr: SocketAddr) -> Result<TcpListener> {
    TcpListener::bind(addr)
        .await
        .map_err(|e| TollgateError::Server(format!("failed to bind {}: {}", addr, e)))
}

async fn wait_for(mut shutdown: watch::Receiver<()>) {
    // An error means the sender is gone, which is also a reason to stop
    let _ = shutdown.changed().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RateLimitingConfig;
    use crate::ratelimit::LimiterRegistry;
    use axum::body::Body;
    use axum::http::Request;
    use std::sync::Arc;
    use tower::ServiceExt;

    fn test_server() -> HttpServer {
        let config = ServerConfig {
            http_addr: "127.0.0.1:0".parse().unwrap(),
            admin_addr: "127.0.0.1:0".parse().unwrap(),
        };
        let filter = AdmissionFilter::new(
            &RateLimitingConfig {
                burst_size: 2,
                ..Default::default()
            },
            Arc::new(LimiterRegistry::new()),
        )
        .unwrap();
        HttpServer::new(&config, filter)
    }

    fn check(path: &str) -> Request<Body> {
        Request::builder()
            .uri(path)
            .header("x-forwarded-for", "1.2.3.4")
            .body(Body::empty())
            .unwrap()
    }

    #[tokio::test]
    async fn test_check_router_admits_then_rejects() {
        let server = test_server();

        for _ in 0..2 {
            let response = server.check_router().oneshot(check("/api/auth/signin")).await.unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }

        let response = server.check_router().oneshot(check("/api/auth/signin")).await.unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);

        // Unlimited paths are still admitted
        let response = server.check_router().oneshot(check("/api/projects")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_serve_with_shutdown_stops() {
        let server = test_server();
        let result = server.serve_with_shutdown(async {}).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_bind_failure_reported() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let taken = listener.local_addr().unwrap();

        let result = bind(taken).await;
        assert!(matches!(result, Err(TollgateError::Server(_))));
    }
}
