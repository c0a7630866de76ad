//! GC Scheduler (spec §4.E) — a time-budgeted, priority-driven eviction loop driven by
//! the `system_tick` event, never by internal timers.

use std::time::Instant;

use chrono::Utc;
use serde::Serialize;

use crate::bus::{Event, Topic};
use crate::store::MemoryStore;
use crate::types::MemoryDepth;

/// Report emitted as `gc_tick` (spec §4.E).
#[derive(Debug, Clone, Serialize)]
pub struct GcTickReport {
    pub collected: u32,
    pub forced: u32,
    pub remaining: usize,
    pub budget_ms: u64,
    pub elapsed_ms: f64,
}

/// Dynamic time budget for one tick: `min(250, ceil(queue_size / scale))` ms
/// (spec §4.E).
pub fn budget_ms(queue_size: usize, scale: u64) -> u64 {
    let scale = scale.max(1);
    let scaled = (queue_size as u64).div_ceil(scale);
    scaled.min(250)
}

/// Run one GC tick against `store`. Pops the heap, decides collect/skip/force-collect
/// per node, and stops once the dynamic budget is exhausted or the heap drains.
pub async fn run_gc_tick(store: &MemoryStore) -> GcTickReport {
    let start = Instant::now();
    let policy = store.gc_policy();
    let queue_size = store.gc_heap_len().await;
    let budget = budget_ms(queue_size, policy.budget_scale);

    let mut collected = 0u32;
    let mut forced = 0u32;
    let mut deferred = Vec::new();

    loop {
        if start.elapsed().as_millis() as u64 >= budget {
            break;
        }
        let Some((id, score)) = store.gc_pop_candidate().await else {
            break;
        };

        let Some(node) = store.gc_node_snapshot(&id).await else {
            // Node already gone (e.g. explicit collect_memory); drop the stale heap entry.
            continue;
        };

        let age_ms = (Utc::now() - node.last_accessed_at).num_milliseconds().max(0) as u64;
        let naturally_collectible = age_ms > policy.age_threshold_ms
            && node.access_count < policy.access_threshold
            && node.memory_strength < policy.min_strength
            && !matches!(
                node.depth,
                MemoryDepth::Core | MemoryDepth::Transcendent | MemoryDepth::Universal | MemoryDepth::Infinite
            )
            && node.associations.len() <= policy.max_associations;

        if naturally_collectible {
            store.gc_reset_skip(&id).await;
            if store.evict_node(&id).await.unwrap_or(false) {
                collected += 1;
            }
            continue;
        }

        // Skips before this node are checked before incrementing: a node must be
        // *skipped* `forced_skip_limit` times (reported as ordinary skips) before the
        // tick that follows force-collects it (spec §4.E, scenario 4).
        let prior_skips = store.gc_skip_count(&id).await;
        if prior_skips >= policy.forced_skip_limit {
            store.gc_reset_skip(&id).await;
            if store.evict_node(&id).await.unwrap_or(false) {
                forced += 1;
            }
        } else {
            store.gc_bump_skip(&id).await;
            deferred.push((id, score));
        }
    }

    for (id, score) in deferred {
        store.gc_requeue(id, score).await;
    }

    let report = GcTickReport {
        collected,
        forced,
        remaining: store.gc_heap_len().await,
        budget_ms: budget,
        elapsed_ms: start.elapsed().as_secs_f64() * 1000.0,
    };

    store.bus().emit(Event::new(
        Topic::GcTick,
        serde_json::to_value(&report).expect("GcTickReport always serializes"),
    ));

    report
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn budget_is_capped_at_250ms() {
        assert_eq!(budget_ms(10_000, 10), 250);
        assert_eq!(budget_ms(5, 10), 1);
        assert_eq!(budget_ms(0, 10), 0);
    }
}
