//! Black-box HTTP/WebSocket tests against a real `spiral-server` listener.

use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use jsonwebtoken::{encode, EncodingKey, Header};
use serde::Serialize;
use spiral_core::bus::EventBus;
use spiral_core::sigil::SigilConfig;
use spiral_core::spiral::SelectionWeights;
use spiral_core::storage::InMemoryBackend;
use spiral_core::store::{GcPolicy, MemoryStore};
use spiral_core::types::{MemoryDepth, MemoryType};
use spiral_server::AppState;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::Message;

#[derive(Serialize)]
struct Claims {
    sub: &'static str,
    exp: usize,
}

async fn spawn_server(secret: Option<String>) -> (u16, Arc<MemoryStore>) {
    let backend = Arc::new(InMemoryBackend::new());
    let bus = Arc::new(EventBus::new(100, None));
    let store = Arc::new(MemoryStore::new(
        backend,
        bus.clone(),
        SigilConfig::default(),
        SelectionWeights::default(),
        16,
        GcPolicy::default(),
    ));
    let state = AppState::new(store.clone(), bus, secret);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let app = spiral_server::http::build_router(state);
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    (port, store)
}

fn bearer_token(secret: &str) -> String {
    let claims = Claims { sub: "e2e", exp: (chrono::Utc::now().timestamp() + 3600) as usize };
    encode(&Header::default(), &claims, &EncodingKey::from_secret(secret.as_bytes())).unwrap()
}

#[tokio::test]
async fn health_metrics_and_api_spiral_round_trip() {
    let (port, store) = spawn_server(Some("topsecret".to_string())).await;
    store
        .store_memory(b"alpha".to_vec(), MemoryType::Memory, MemoryDepth::Shallow, vec![])
        .await
        .unwrap();

    let client = reqwest::Client::new();
    let base = format!("http://127.0.0.1:{port}");

    let health = client.get(format!("{base}/health")).send().await.unwrap();
    assert_eq!(health.status(), 200);

    let unauth = client.get(format!("{base}/metrics")).send().await.unwrap();
    assert_eq!(unauth.status(), 401);

    let token = bearer_token("topsecret");
    let metrics = client.get(format!("{base}/metrics")).bearer_auth(&token).send().await.unwrap();
    assert_eq!(metrics.status(), 200);
    let metrics_body = metrics.text().await.unwrap();
    assert!(metrics_body.contains("store_allowed_total 1"));

    let spiral = client.get(format!("{base}/api/spiral")).bearer_auth(&token).send().await.unwrap();
    assert_eq!(spiral.status(), 200);
    let spiral_body: serde_json::Value = spiral.json().await.unwrap();
    assert_eq!(spiral_body["nodes"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn websocket_requires_bearer_and_pushes_snapshot() {
    let (port, store) = spawn_server(Some("wssecret".to_string())).await;
    store
        .store_memory(b"beta".to_vec(), MemoryType::Memory, MemoryDepth::Shallow, vec![])
        .await
        .unwrap();

    let rejected = tokio_tungstenite::connect_async(format!("ws://127.0.0.1:{port}/ws")).await;
    assert!(rejected.is_err());

    let token = bearer_token("wssecret");
    let mut request = format!("ws://127.0.0.1:{port}/ws").into_client_request().unwrap();
    request
        .headers_mut()
        .insert("Authorization", format!("Bearer {token}").parse().unwrap());
    let (mut ws, _) = tokio_tungstenite::connect_async(request).await.unwrap();

    let snapshot = ws.next().await.unwrap().unwrap();
    let Message::Text(text) = snapshot else { panic!("expected text snapshot frame") };
    let parsed: serde_json::Value = serde_json::from_str(&text).unwrap();
    assert_eq!(parsed["nodes"].as_array().unwrap().len(), 1);

    ws.send(Message::Ping(vec![1, 2, 3].into())).await.unwrap();
    let pong = ws.next().await.unwrap().unwrap();
    assert!(matches!(pong, Message::Pong(_)));
}
