//! axum router for the metrics & explorer surface (spec §4.H, §6).
//!
//! `GET /health` is unauthenticated; everything else requires a bearer token when
//! `metrics_jwt_secret` is configured (see [`crate::auth`]).

use std::net::SocketAddr;

use axum::extract::State;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use chrono::Utc;
use serde::Serialize;
use spiral_core::store::MemoryStore;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::auth::Authenticated;
use crate::{dashboard, AppState};

#[derive(Serialize)]
struct HealthBody {
    status: &'static str,
    timestamp: String,
}

async fn health() -> impl IntoResponse {
    axum::Json(HealthBody { status: "ok", timestamp: Utc::now().to_rfc3339() })
}

async fn metrics(_auth: Authenticated, State(state): State<AppState>) -> impl IntoResponse {
    let body = state.metrics.render(&state.store).await;
    ([(axum::http::header::CONTENT_TYPE, "text/plain; version=0.0.4")], body)
}

#[derive(Serialize)]
struct SpiralNode {
    id: String,
    x: f64,
    y: f64,
    z: f64,
    #[serde(rename = "type")]
    memory_type: String,
    depth: String,
    resonance: f64,
    last_accessed_at: String,
}

#[derive(Serialize)]
pub(crate) struct SpiralSnapshot {
    nodes: Vec<SpiralNode>,
}

/// Project every live node onto spec §4.H's `/api/spiral` shape. `z` is not part of
/// the core `Position` (spec §4.C only defines `x`/`y`): derived from the node's turn
/// count as the natural third axis for a 3-D explorer view (see DESIGN.md).
pub(crate) async fn spiral_snapshot(store: &MemoryStore) -> SpiralSnapshot {
    let nodes = store
        .all_nodes()
        .await
        .into_iter()
        .map(|node| SpiralNode {
            id: node.id,
            x: node.position.x,
            y: node.position.y,
            z: node.position.turn as f64,
            memory_type: node.memory_type.as_str().to_string(),
            depth: node.depth.as_str().to_string(),
            resonance: node.sigil.resonance_hz,
            last_accessed_at: node.last_accessed_at.to_rfc3339(),
        })
        .collect();
    SpiralSnapshot { nodes }
}

async fn api_spiral(_auth: Authenticated, State(state): State<AppState>) -> Response {
    axum::Json(spiral_snapshot(&state.store).await).into_response()
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .route("/api/spiral", get(api_spiral))
        .merge(dashboard::routes())
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub async fn serve(state: AppState, port: u16) -> std::io::Result<()> {
    let app = build_router(state);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "spiral-server listening");
    axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to listen for ctrl+c");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to listen for SIGTERM")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received Ctrl+C, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    use super::*;

    async fn body_string(response: Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn health_is_unauthenticated() {
        let state = crate::test_state_with_secret(Some("secret".to_string()));
        let app = build_router(state);
        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(body_string(response).await.contains("\"status\":\"ok\""));
    }

    #[tokio::test]
    async fn metrics_requires_bearer_when_secret_configured() {
        let state = crate::test_state_with_secret(Some("secret".to_string()));
        let app = build_router(state);
        let response = app
            .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn metrics_exposes_required_series_without_auth_configured() {
        let state = crate::test_state_with_secret(None);
        state
            .store
            .store_memory(
                b"hello".to_vec(),
                spiral_core::types::MemoryType::Memory,
                spiral_core::types::MemoryDepth::Shallow,
                vec![],
            )
            .await
            .unwrap();
        let app = build_router(state);
        let response = app
            .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_string(response).await;
        assert!(body.contains("store_allowed_total 1"));
        assert!(body.contains("active_spirals 1"));
        assert!(body.contains("memory_coherence"));
        assert!(body.contains("spiral_stability"));
        assert!(body.contains("gc_budget_ms"));
    }

    #[tokio::test]
    async fn api_spiral_projects_z_from_turn() {
        let state = crate::test_state_with_secret(None);
        state
            .store
            .store_memory(
                b"hello".to_vec(),
                spiral_core::types::MemoryType::Memory,
                spiral_core::types::MemoryDepth::Shallow,
                vec![],
            )
            .await
            .unwrap();
        let app = build_router(state);
        let response = app
            .oneshot(Request::builder().uri("/api/spiral").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_string(response).await;
        let parsed: serde_json::Value = serde_json::from_str(&body).unwrap();
        let nodes = parsed["nodes"].as_array().unwrap();
        assert_eq!(nodes.len(), 1);
        assert!(nodes[0].get("z").is_some());
    }
}
