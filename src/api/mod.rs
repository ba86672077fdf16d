//! Read-only HTTP status endpoint
//!
//! Serves the latest [`StatusDocument`](crate::selfheal::StatusDocument) kept
//! by the self-healer. Nothing here mutates state.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::selfheal::SharedStatus;

/// Build the router over the shared status handle.
pub fn router(status: SharedStatus) -> Router {
    Router::new()
        .route("/health", get(liveness))
        .route("/api/v1/status", get(latest_status))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(status)
}

async fn liveness() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok", "version": env!("CARGO_PKG_VERSION") }))
}

async fn latest_status(State(status): State<SharedStatus>) -> Response {
    match status.read().await.as_ref() {
        Some(doc) => Json(doc).into_response(),
        None => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "error": "no monitoring cycle has completed yet" })),
        )
            .into_response(),
    }
}

/// Bind `addr` and serve until `cancel` fires.
pub async fn serve(addr: &str, status: SharedStatus, cancel: CancellationToken) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(addr = %listener.local_addr()?, "Status API listening");

    axum::serve(listener, router(status))
        .with_graceful_shutdown(async move {
            cancel.cancelled().await;
            info!("Status API received shutdown signal");
        })
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::health::{HealthReport, ProbeResult, ServiceId};
    use crate::selfheal::{HealStatus, SelfHealState, StatusDocument};
    use axum::body::Body;
    use axum::http::Request;
    use chrono::Utc;
    use std::sync::Arc;
    use tokio::sync::RwLock;
    use tower::ServiceExt;

    async fn get_json(app: Router, uri: &str) -> (StatusCode, serde_json::Value) {
        let resp = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = resp.status();
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_status_unavailable_before_first_cycle() {
        let shared: SharedStatus = Arc::new(RwLock::new(None));
        let (code, body) = get_json(router(shared), "/api/v1/status").await;
        assert_eq!(code, StatusCode::SERVICE_UNAVAILABLE);
        assert!(body["error"].is_string());
    }

    #[tokio::test]
    async fn test_status_serves_latest_document() {
        let now = Utc::now();
        let report = HealthReport::from_results([ProbeResult::healthy(ServiceId::Gateway, "listening")], now);
        let doc = StatusDocument::new(report, SelfHealState::default(), HealStatus::Idle, now);
        let shared: SharedStatus = Arc::new(RwLock::new(Some(doc)));

        let (code, body) = get_json(router(shared), "/api/v1/status").await;
        assert_eq!(code, StatusCode::OK);
        assert_eq!(body["selfHeal"]["status"], "idle");
    }

    #[tokio::test]
    async fn test_liveness() {
        let shared: SharedStatus = Arc::new(RwLock::new(None));
        let (code, body) = get_json(router(shared), "/health").await;
        assert_eq!(code, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }
}
