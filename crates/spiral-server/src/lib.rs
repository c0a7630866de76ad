//! HTTP/WebSocket metrics & explorer surface for a running spiral store.
//!
//! Wraps a [`MemoryStore`] behind a small axum router: an unauthenticated health
//! check, and a JWT-gated metrics/explorer surface (spec §4.H, §6).

pub mod auth;
pub mod dashboard;
pub mod http;
pub mod metrics;

use std::sync::Arc;
use std::time::Instant;

use spiral_core::bus::{Event, EventBus, Topic};
use spiral_core::store::MemoryStore;
use spiral_core::{gc, stats};
use tokio::sync::broadcast;

use metrics::MetricsRegistry;

/// Bus topics forwarded live to explorer WebSocket clients.
const DASHBOARD_TOPICS: [Topic; 5] =
    [Topic::MemoryStored, Topic::MemoryRetrieved, Topic::MemoriesSearched, Topic::GcTick, Topic::RebuildStats];

/// Explorer WebSocket broadcast buffer (spec §4.H) — bounded so a slow/disconnected
/// client never backs up the bus.
const DASHBOARD_CHANNEL_CAPACITY: usize = 256;

/// Shared state handed to every axum route.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<MemoryStore>,
    pub bus: Arc<EventBus>,
    pub metrics: Arc<MetricsRegistry>,
    pub jwt_secret: Option<String>,
    pub start_time: Instant,
    pub dashboard_tx: broadcast::Sender<Event>,
}

impl AppState {
    pub fn new(store: Arc<MemoryStore>, bus: Arc<EventBus>, jwt_secret: Option<String>) -> Self {
        let metrics = Arc::new(MetricsRegistry::new());
        metrics.subscribe(&bus);

        let (dashboard_tx, _) = broadcast::channel(DASHBOARD_CHANNEL_CAPACITY);
        for topic in DASHBOARD_TOPICS {
            let tx = dashboard_tx.clone();
            bus.subscribe(topic, "dashboard", false, move |event| {
                let _ = tx.send(event.clone());
            });
        }

        // Drive the GC scheduler, deferred-association flush, and stats rebuilder off
        // `system_tick` (spec §2/§4.E) — the emitting side lives in main.rs so that
        // tests constructing an `AppState` directly don't also spin up a background
        // ticker. Captures a `Weak` back-reference: the store owns this same bus, so a
        // strong reference here would cycle and keep the store's backend from closing.
        let tick_store = Arc::downgrade(&store);
        bus.subscribe(Topic::SystemTick, "scheduler", false, move |_event| {
            let Some(tick_store) = tick_store.upgrade() else { return };
            tokio::spawn(async move {
                gc::run_gc_tick(&tick_store).await;
                tick_store.process_deferred_associations().await;
                stats::rebuild_stats(&tick_store).await;
            });
        });

        Self { store, bus, metrics, jwt_secret, start_time: Instant::now(), dashboard_tx }
    }

    pub fn subscribe_dashboard(&self) -> broadcast::Receiver<Event> {
        self.dashboard_tx.subscribe()
    }
}

#[cfg(test)]
pub(crate) fn test_state_with_secret(jwt_secret: Option<String>) -> AppState {
    use spiral_core::sigil::SigilConfig;
    use spiral_core::spiral::SelectionWeights;
    use spiral_core::storage::InMemoryBackend;
    use spiral_core::store::GcPolicy;

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
    AppState::new(store, bus, jwt_secret)
}
