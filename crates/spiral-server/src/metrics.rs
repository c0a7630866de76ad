//! Prometheus-text metrics exposition for `GET /metrics` (spec §4.H).
//!
//! Gauges are read live from the store on every scrape; counters and histograms are
//! accumulated from bus events by [`MetricsRegistry::subscribe`] for the lifetime of
//! the process. Written by hand rather than via a metrics crate: the teacher's stack
//! has no Prometheus client dependency, and the exposition surface here is small and
//! fixed (spec §4.H's literal series list).

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use spiral_core::bus::{EventBus, Topic};
use spiral_core::store::MemoryStore;
use spiral_core::types::MemoryDepth;

#[derive(Default)]
struct Histogram {
    count: AtomicU64,
    sum_ms: Mutex<f64>,
}

impl Histogram {
    fn observe(&self, ms: f64) {
        self.count.fetch_add(1, Ordering::Relaxed);
        *self.sum_ms.lock().expect("histogram mutex poisoned") += ms;
    }

    fn render(&self, name: &str, labels: &str) -> String {
        let count = self.count.load(Ordering::Relaxed);
        let sum = *self.sum_ms.lock().expect("histogram mutex poisoned");
        format!(
            "{name}_sum{labels} {sum}\n{name}_count{labels} {count}\n",
            sum = sum,
            count = count,
        )
    }
}

/// Accumulates the counters and histograms spec §4.H requires beyond what can be
/// read directly off a [`MemoryStore`] snapshot.
pub struct MetricsRegistry {
    store_latency: Histogram,
    retrieve_latency: Histogram,
    gc_pause: Histogram,
    entanglement_latency: Histogram,
    gc_total: AtomicU64,
    gc_forced_collect_total: AtomicU64,
    sigil_collision_total: AtomicU64,
    rebuild_corrected_total: AtomicU64,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self {
            store_latency: Histogram::default(),
            retrieve_latency: Histogram::default(),
            gc_pause: Histogram::default(),
            entanglement_latency: Histogram::default(),
            gc_total: AtomicU64::new(0),
            gc_forced_collect_total: AtomicU64::new(0),
            sigil_collision_total: AtomicU64::new(0),
            rebuild_corrected_total: AtomicU64::new(0),
        }
    }

    /// Subscribe to the bus topics that feed the counters/histograms this registry
    /// can't derive from a point-in-time store snapshot.
    pub fn subscribe(self: &std::sync::Arc<Self>, bus: &EventBus) {
        let this = self.clone();
        bus.subscribe(Topic::MemoryStored, "metrics", false, move |event: &spiral_core::bus::Event| {
            if let Some(ms) = event.payload.get("latency_ms").and_then(|v| v.as_f64()) {
                this.store_latency.observe(ms);
            }
        });

        let this = self.clone();
        bus.subscribe(Topic::MemoryRetrieved, "metrics", false, move |event: &spiral_core::bus::Event| {
            if let Some(ms) = event.payload.get("latency_ms").and_then(|v| v.as_f64()) {
                this.retrieve_latency.observe(ms);
            }
        });

        let this = self.clone();
        bus.subscribe(Topic::GcTick, "metrics", false, move |event: &spiral_core::bus::Event| {
            this.gc_total.fetch_add(1, Ordering::Relaxed);
            if let Some(forced) = event.payload.get("forced").and_then(|v| v.as_u64()) {
                this.gc_forced_collect_total.fetch_add(forced, Ordering::Relaxed);
            }
            if let Some(ms) = event.payload.get("elapsed_ms").and_then(|v| v.as_f64()) {
                this.gc_pause.observe(ms);
            }
        });

        let this = self.clone();
        bus.subscribe(Topic::SigilCollision, "metrics", false, move |_event: &spiral_core::bus::Event| {
            this.sigil_collision_total.fetch_add(1, Ordering::Relaxed);
        });

        let this = self.clone();
        bus.subscribe(Topic::RebuildStats, "metrics", false, move |event: &spiral_core::bus::Event| {
            if let Some(corrected) = event.payload.get("corrected").and_then(|v| v.as_array()) {
                this.rebuild_corrected_total.fetch_add(corrected.len() as u64, Ordering::Relaxed);
            }
        });
    }

    /// Render the full Prometheus text-exposition body.
    pub async fn render(&self, store: &MemoryStore) -> String {
        let mut out = String::new();

        let mut by_depth: std::collections::HashMap<MemoryDepth, u64> = std::collections::HashMap::new();
        for node in store.all_nodes().await {
            *by_depth.entry(node.depth).or_insert(0) += 1;
        }
        out.push_str("# TYPE memory_total gauge\n");
        for depth in MemoryDepth::ALL {
            let count = by_depth.get(&depth).copied().unwrap_or(0);
            out.push_str(&format!("memory_total{{tier=\"{}\"}} {count}\n", depth.as_str()));
        }

        let active_spirals = store.spiral_count().await;
        out.push_str("# TYPE active_spirals gauge\n");
        out.push_str(&format!("active_spirals {active_spirals}\n"));

        let nodes = store.all_nodes().await;
        let memory_coherence = if nodes.is_empty() {
            1.0
        } else {
            nodes.iter().map(|n| n.memory_strength).sum::<f64>() / nodes.len() as f64
        };
        out.push_str("# TYPE memory_coherence gauge\n");
        out.push_str(&format!("memory_coherence {memory_coherence}\n"));

        let spiral_stability = spiral_stability(store).await;
        out.push_str("# TYPE spiral_stability gauge\n");
        out.push_str(&format!("spiral_stability {spiral_stability}\n"));

        let gc_backlog = store.gc_heap_len().await;
        out.push_str("# TYPE gc_backlog gauge\n");
        out.push_str(&format!("gc_backlog {gc_backlog}\n"));

        let gc_budget_ms = spiral_core::gc::budget_ms(gc_backlog, store.gc_policy().budget_scale);
        out.push_str("# TYPE gc_budget_ms gauge\n");
        out.push_str(&format!("gc_budget_ms {gc_budget_ms}\n"));

        out.push_str("# TYPE store_latency_ms histogram\n");
        out.push_str(&self.store_latency.render("store_latency_ms", ""));
        out.push_str("# TYPE retrieve_latency_ms histogram\n");
        out.push_str(&self.retrieve_latency.render("retrieve_latency_ms", ""));
        out.push_str("# TYPE gc_pause_ms histogram\n");
        out.push_str(&self.gc_pause.render("gc_pause_ms", ""));
        out.push_str("# TYPE entanglement_latency_ms histogram\n");
        out.push_str(&self.entanglement_latency.render("entanglement_latency_ms", ""));

        out.push_str("# TYPE storage_latency_ms histogram\n");
        for (operation, count, sum_ms) in store.backend().latency_snapshot() {
            let labels = format!("{{method=\"{operation}\",backend=\"{}\"}}", store_backend_name(store));
            out.push_str(&format!("storage_latency_ms_sum{labels} {sum_ms}\n"));
            out.push_str(&format!("storage_latency_ms_count{labels} {count}\n"));
        }

        out.push_str("# TYPE store_allowed_total counter\n");
        out.push_str(&format!("store_allowed_total {}\n", store.store_allowed_count()));
        out.push_str("# TYPE store_denied_total counter\n");
        out.push_str(&format!("store_denied_total {}\n", store.store_denied_count()));
        out.push_str("# TYPE gc_total counter\n");
        out.push_str(&format!("gc_total {}\n", self.gc_total.load(Ordering::Relaxed)));
        out.push_str("# TYPE gc_forced_collect_total counter\n");
        out.push_str(&format!("gc_forced_collect_total {}\n", self.gc_forced_collect_total.load(Ordering::Relaxed)));
        out.push_str("# TYPE sigil_collision_total counter\n");
        out.push_str(&format!("sigil_collision_total {}\n", self.sigil_collision_total.load(Ordering::Relaxed)));
        out.push_str("# TYPE rebuild_corrected_total counter\n");
        out.push_str(&format!("rebuild_corrected_total {}\n", self.rebuild_corrected_total.load(Ordering::Relaxed)));
        out.push_str("# TYPE circuit_breaker_open_total counter\n");
        out.push_str(&format!(
            "circuit_breaker_open_total{{backend=\"{}\"}} {}\n",
            store_backend_name(store),
            store.backend().breaker().open_total(),
        ));

        out
    }
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Average headroom across spirals: `1 - node_count/capacity`, clamped to `[0, 1]`.
/// A spiral at capacity contributes 0 (no stability margin left); an empty spiral
/// contributes 1. Spec §4.H lists `spiral_stability` as a required gauge without
/// pinning its formula, so this is an Open Question decision (see DESIGN.md).
async fn spiral_stability(store: &MemoryStore) -> f64 {
    let nodes = store.all_nodes().await;
    let mut capacities: std::collections::HashMap<String, (u64, u32)> = std::collections::HashMap::new();
    for node in &nodes {
        if let Some(spiral) = store.get_spiral(&node.spiral_id).await {
            capacities.entry(node.spiral_id.clone()).or_insert((spiral.node_count, spiral.capacity()));
        }
    }
    if capacities.is_empty() {
        return 1.0;
    }
    let total: f64 = capacities
        .values()
        .map(|(count, capacity)| (1.0 - (*count as f64 / (*capacity).max(1) as f64)).clamp(0.0, 1.0))
        .sum();
    total / capacities.len() as f64
}

fn store_backend_name(store: &MemoryStore) -> &'static str {
    let _ = store;
    "configured"
}
