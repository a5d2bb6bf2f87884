//! HTTP server for the Prometheus metrics endpoint.

use std::net::SocketAddr;

use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tower_http::cors::CorsLayer;
use tracing::info;

use crate::registry::SharedRegistry;
use crate::worker::shutdown_requested;

/// Content type of the text exposition format.
pub const CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

/// Application state shared across handlers.
#[derive(Clone)]
struct AppState {
    registry: SharedRegistry,
}

/// Create the HTTP router.
pub fn create_router(registry: SharedRegistry, metrics_path: &str) -> Router {
    let state = AppState { registry };

    Router::new()
        .route(metrics_path, get(metrics_handler))
        .route("/health", get(health_handler))
        .route("/ready", get(ready_handler))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Handler for the metrics endpoint.
async fn metrics_handler(State(state): State<AppState>) -> Response {
    let body = state.registry.render();

    (StatusCode::OK, [("content-type", CONTENT_TYPE)], body).into_response()
}

/// Handler for the /health endpoint.
async fn health_handler() -> Response {
    (StatusCode::OK, "healthy\n").into_response()
}

/// Handler for the /ready endpoint.
async fn ready_handler(State(state): State<AppState>) -> Response {
    if state.registry.registered_streams() > 0 {
        (StatusCode::OK, "ready\n").into_response()
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            "not ready - no stream registered yet\n",
        )
            .into_response()
    }
}

/// HTTP server bound to its listen address.
pub struct HttpServer {
    registry: SharedRegistry,
    listener: TcpListener,
    listen_addr: SocketAddr,
    metrics_path: String,
}

impl HttpServer {
    /// Bind the listen address. Fails if the address is unavailable.
    pub async fn bind(
        registry: SharedRegistry,
        listen_addr: SocketAddr,
        metrics_path: String,
    ) -> anyhow::Result<Self> {
        let listener = TcpListener::bind(listen_addr)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to bind to {}: {}", listen_addr, e))?;
        let listen_addr = listener.local_addr()?;

        Ok(Self {
            registry,
            listener,
            listen_addr,
            metrics_path,
        })
    }

    /// The bound address, with the actual port when port 0 was requested.
    pub fn local_addr(&self) -> SocketAddr {
        self.listen_addr
    }

    /// Run the HTTP server until the shutdown signal is received.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> anyhow::Result<()> {
        let router = create_router(self.registry, &self.metrics_path);

        info!(
            addr = %self.listen_addr,
            path = %self.metrics_path,
            "HTTP server listening"
        );

        axum::serve(self.listener, router)
            .with_graceful_shutdown(async move {
                shutdown_requested(&mut shutdown).await;
                info!("HTTP server shutting down");
            })
            .await
            .map_err(|e| anyhow::anyhow!("HTTP server error: {}", e))?;

        info!("HTTP server stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::test_entity;
    use crate::registry::MetricRegistry;
    use axum::body::Body;
    use axum::http::Request;
    use std::sync::Arc;
    use tower::ServiceExt;

    fn make_registry() -> SharedRegistry {
        Arc::new(MetricRegistry::new("youtube"))
    }

    async fn body_text(response: Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_metrics_endpoint() {
        let registry = make_registry();
        registry.register_stream(&test_entity("main")).unwrap();
        let router = create_router(registry, "/metrics");

        let response = router
            .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let content_type = response.headers().get("content-type").unwrap();
        assert_eq!(content_type.to_str().unwrap(), CONTENT_TYPE);

        let body = body_text(response).await;
        assert!(body.contains("# TYPE youtube_stream_status gauge"));
        assert!(body.contains("youtube_stream_check_count{"));
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let router = create_router(make_registry(), "/metrics");

        let response = router
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_ready_endpoint_not_ready() {
        let router = create_router(make_registry(), "/metrics");

        let response = router
            .oneshot(Request::get("/ready").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_ready_endpoint_ready() {
        let registry = make_registry();
        registry.register_stream(&test_entity("main")).unwrap();
        let router = create_router(registry, "/metrics");

        let response = router
            .oneshot(Request::get("/ready").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_custom_metrics_path() {
        let router = create_router(make_registry(), "/prometheus/metrics");

        let response = router
            .clone()
            .oneshot(
                Request::get("/prometheus/metrics")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        // Default path should 404
        let response = router
            .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_server_stops_on_shutdown() {
        let server = HttpServer::bind(
            make_registry(),
            "127.0.0.1:0".parse().unwrap(),
            "/metrics".to_string(),
        )
        .await
        .unwrap();
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(server.run(rx));

        tx.send(true).unwrap();
        let result = tokio::time::timeout(std::time::Duration::from_secs(5), handle)
            .await
            .expect("server did not stop")
            .unwrap();
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_bind_fails_when_address_in_use() {
        let taken = HttpServer::bind(
            make_registry(),
            "127.0.0.1:0".parse().unwrap(),
            "/metrics".to_string(),
        )
        .await
        .unwrap();

        let result =
            HttpServer::bind(make_registry(), taken.local_addr(), "/metrics".to_string()).await;
        let err = match result {
            Ok(_) => panic!("second bind on the same address succeeded"),
            Err(e) => e.to_string(),
        };
        assert!(err.contains("Failed to bind"));
    }
}
