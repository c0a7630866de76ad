//! Live explorer surface: a bearer-gated WebSocket pushing spiral snapshots and bus
//! events as they happen (spec §4.H).

pub mod websocket;

use axum::routing::get;
use axum::Router;

use crate::AppState;

pub fn routes() -> Router<AppState> {
    Router::new().route("/ws", get(websocket::ws_handler))
}
