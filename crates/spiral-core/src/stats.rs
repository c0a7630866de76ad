//! Stats Rebuilder (spec §4.F) — callable at startup and on demand; reconciles
//! per-spiral counters against the authoritative node set.

use std::time::Instant;

use serde::Serialize;

use crate::bus::{Event, Topic};
use crate::store::MemoryStore;

#[derive(Debug, Clone, Serialize)]
pub struct SpiralCorrection {
    pub spiral_id: String,
    pub delta_node_count: i64,
    pub delta_average_depth: f64,
    pub delta_current_radius: f64,
    pub delta_total_turns: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct RebuildReport {
    pub corrected: Vec<SpiralCorrection>,
    pub total_nodes: usize,
    pub duration_ms: f64,
    pub cache_hits: u64,
    pub cache_misses: u64,
}

/// Run a single-pass reconciliation and emit `rebuild_stats` with the report
/// (spec §4.F).
pub async fn rebuild_stats(store: &MemoryStore) -> RebuildReport {
    let start = Instant::now();
    let total_nodes = store.node_count().await;
    let corrections = store.rebuild_spiral_stats().await.unwrap_or_default();

    let corrected: Vec<SpiralCorrection> = corrections
        .into_iter()
        .map(|(spiral_id, before, after)| SpiralCorrection {
            spiral_id,
            delta_node_count: after.node_count as i64 - before.node_count as i64,
            delta_average_depth: after.average_depth - before.average_depth,
            delta_current_radius: after.current_radius - before.current_radius,
            delta_total_turns: after.total_turns as i64 - before.total_turns as i64,
        })
        .collect();

    let report = RebuildReport {
        corrected,
        total_nodes,
        duration_ms: start.elapsed().as_secs_f64() * 1000.0,
        // No external secondary index is consulted during reconciliation (spec §4.D),
        // so the rebuild path never touches the sigil LFU cache.
        cache_hits: 0,
        cache_misses: 0,
    };

    store.bus().emit(Event::new(
        Topic::RebuildStats,
        serde_json::to_value(&report).expect("RebuildReport always serializes"),
    ));

    report
}
