// Server ingest/serve engine (C7). Router assembly grounded on the
// teacher's `bin/storage_node.rs::create_router` (`Extension`/`State`
// layering, `TraceLayer`, `CorsLayer::permissive()`), with a
// `RequestBodyLimitLayer` added for the 5 MiB cap and the rate-limit/auth
// layers wired as `axum::middleware::from_fn_with_state`.

pub mod handlers;
pub mod middleware;
pub mod storage;

use crate::config::ServerConfig;
use crate::server::middleware::{AttestationVerifier, RateLimiter, StubAttestationVerifier};
use crate::server::storage::ServerStore;
use axum::routing::{get, post};
use axum::Router;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

const MAX_REQUEST_BODY_BYTES: usize = 5 * 1024 * 1024;

pub struct AppState {
    pub config: ServerConfig,
    pub store: ServerStore,
    pub rate_limiter: RateLimiter,
    pub attestation: Box<dyn AttestationVerifier>,
}

impl AppState {
    pub fn new(config: ServerConfig) -> crate::error::Result<Self> {
        let store = ServerStore::open(&config.database_url, config.retention_days)?;
        let rate_limiter = RateLimiter::new(config.rate_limit.max, config.rate_limit.window_ms);
        Ok(Self {
            config,
            store,
            rate_limiter,
            attestation: Box::new(StubAttestationVerifier),
        })
    }
}

/// Builds the router. `/health` is wired outside the authenticated
/// surface, per §4.7; every other route carries the rate-limit and auth
/// layers. The `TraceLayer` here is the default `tower_http` span/event
/// set, which logs method/path/status/latency only — it never sees
/// `ConnectInfo`, so no IP address can reach the logs through it.
pub fn build_router(state: Arc<AppState>) -> Router {
    let authenticated = Router::new()
        .route("/v1/report", post(handlers::report))
        .route("/v1/download", get(handlers::download))
        .layer(
            ServiceBuilder::new()
                .layer(axum::middleware::from_fn_with_state(
                    state.clone(),
                    middleware::rate_limiting,
                ))
                .layer(axum::middleware::from_fn_with_state(
                    state.clone(),
                    middleware::authenticate,
                )),
        );

    Router::new()
        .route("/health", get(handlers::health))
        .merge(authenticated)
        .layer(RequestBodyLimitLayer::new(MAX_REQUEST_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Periodic sweep emulating the source's TTL index: deletes rows whose
/// retention window has elapsed. Runs independently of request traffic.
pub fn spawn_ttl_sweep(state: Arc<AppState>, interval: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            match state.store.sweep_expired() {
                Ok(deleted) if deleted > 0 => info!(deleted, "ttl sweep removed expired rows"),
                Ok(_) => {}
                Err(e) => tracing::warn!(error = %e, "ttl sweep failed"),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RateLimitConfig;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tempfile::tempdir;
    use tower::ServiceExt;

    fn test_config(db_path: &std::path::Path) -> ServerConfig {
        ServerConfig {
            database_url: db_path.to_str().unwrap().to_string(),
            secret: "topsecret".to_string(),
            retention_days: 14,
            rate_limit: RateLimitConfig { max: 300, window_ms: 60_000 },
            host: "127.0.0.1".to_string(),
            port: 0,
            attest_provider: None,
        }
    }

    #[tokio::test]
    async fn health_bypasses_auth() {
        let dir = tempdir().unwrap();
        let state = Arc::new(AppState::new(test_config(&dir.path().join("s.db"))).unwrap());
        let router = build_router(state);
        let response = router
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn missing_secret_is_rejected_s6() {
        let dir = tempdir().unwrap();
        let state = Arc::new(AppState::new(test_config(&dir.path().join("s.db"))).unwrap());
        let router = build_router(state);
        let response = router
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/v1/report")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"reports":[]}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn wrong_secret_is_rejected() {
        let dir = tempdir().unwrap();
        let state = Arc::new(AppState::new(test_config(&dir.path().join("s.db"))).unwrap());
        let router = build_router(state);
        let response = router
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/v1/report")
                    .header("content-type", "application/json")
                    .header("x-vailix-secret", "wrong")
                    .body(Body::from(r#"{"reports":[]}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn valid_report_then_download_round_trip() {
        let dir = tempdir().unwrap();
        let state = Arc::new(AppState::new(test_config(&dir.path().join("s.db"))).unwrap());
        let router = build_router(state);

        let rpi = "a".repeat(32);
        let body = serde_json::json!({ "reports": [{ "rpi": rpi, "encryptedMetadata": "" }] });
        let response = router
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/v1/report")
                    .header("content-type", "application/json")
                    .header("x-vailix-secret", "topsecret")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);

        let response = router
            .oneshot(
                Request::builder()
                    .uri("/v1/download?since=0&format=json")
                    .header("x-vailix-secret", "topsecret")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
