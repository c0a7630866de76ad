//! WebSocket handler for `/explorer/ws` — bearer-gated, pushes an initial spiral
//! snapshot then forwards bus events as they happen, with a 5s heartbeat.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::auth::verify_bearer;
use crate::http::spiral_snapshot;
use crate::AppState;

pub async fn ws_handler(State(state): State<AppState>, headers: HeaderMap, ws: WebSocketUpgrade) -> Response {
    if verify_bearer(&headers, &state).is_err() {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut sender, mut receiver) = socket.split();
    let mut event_rx: broadcast::Receiver<spiral_core::bus::Event> = state.subscribe_dashboard();

    debug!("explorer WebSocket client connected");

    let snapshot = spiral_snapshot(&state.store).await;
    if sender.send(Message::Text(serde_json::to_string(&snapshot).unwrap_or_default().into())).await.is_err() {
        return;
    }

    let (heartbeat_tx, mut heartbeat_rx) = tokio::sync::mpsc::channel::<String>(16);
    let heartbeat_state = state.clone();
    let heartbeat_handle = tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(5));
        loop {
            interval.tick().await;
            let heartbeat = serde_json::json!({
                "type": "heartbeat",
                "uptime_secs": heartbeat_state.start_time.elapsed().as_secs(),
                "timestamp": Utc::now().to_rfc3339(),
            });
            if heartbeat_tx.send(heartbeat.to_string()).await.is_err() {
                break;
            }
        }
    });

    loop {
        tokio::select! {
            Ok(event) = event_rx.recv() => {
                let json = serde_json::to_string(&event).unwrap_or_default();
                if sender.send(Message::Text(json.into())).await.is_err() {
                    break;
                }
            }
            Some(hb) = heartbeat_rx.recv() => {
                if sender.send(Message::Text(hb.into())).await.is_err() {
                    break;
                }
            }
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(Message::Ping(data))) => {
                        if sender.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Err(e)) => {
                        warn!(error = %e, "explorer WebSocket error");
                        break;
                    }
                    _ => {}
                }
            }
        }
    }

    heartbeat_handle.abort();
    debug!("explorer WebSocket client disconnected");
}
