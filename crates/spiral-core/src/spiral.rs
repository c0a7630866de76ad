//! Spiral topology & node placement (spec §4.C) and per-spiral statistics (spec §3).

use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::node::Position;
use crate::types::{MemoryDepth, MemoryType, SpiralType, SpiralTypeParams};

/// An insertion channel (spec §3). Owns a set of node ids; `node_count` is kept in sync
/// with `nodes.len()` by every mutator (invariant I2).
///
/// `nodes` is never part of the durable `spiral:<id>` record (spec §6): it's
/// reconstructed from the `mem:*` scan on reload, so two independent copies of the same
/// membership set can't drift out of sync on disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Spiral {
    pub id: String,
    pub spiral_type: SpiralType,
    pub template: SpiralTypeParams,
    #[serde(skip)]
    pub nodes: BTreeSet<String>,
    pub node_count: u64,
    pub average_depth: f64,
    pub current_radius: f64,
    pub total_turns: u64,
    pub created_at: DateTime<Utc>,
    pub last_updated_at: DateTime<Utc>,
}

impl Spiral {
    pub fn new(id: String, spiral_type: SpiralType, now: DateTime<Utc>) -> Self {
        Self {
            id,
            spiral_type,
            template: spiral_type.params(),
            nodes: BTreeSet::new(),
            node_count: 0,
            average_depth: 0.0,
            current_radius: 0.0,
            total_turns: 0,
            created_at: now,
            last_updated_at: now,
        }
    }

    pub fn capacity(&self) -> u32 {
        self.template.capacity
    }

    pub fn is_at_capacity(&self) -> bool {
        self.node_count >= self.template.capacity as u64
    }

    /// Nodes per turn of the spiral (Open Question resolution, see DESIGN.md):
    /// `max(1, capacity / 10)`.
    pub fn nodes_per_turn(&self) -> u64 {
        (self.template.capacity / 10).max(1) as u64
    }
}

/// Compute the position of the `k`-th (0-based) node inserted into a spiral of `spiral_type`
/// with growth rate `g`. Bit-stable per spec §4.C / scenario 2.
pub fn compute_position(spiral_type: SpiralType, g: f64, nodes_per_turn: u64, k: u64) -> Position {
    use crate::types::GOLDEN_ANGLE_DEG;

    let angle_deg = (k as f64 * GOLDEN_ANGLE_DEG) % 360.0;
    let radius = match spiral_type {
        SpiralType::Fibonacci => (k as f64 * g).sqrt(),
        SpiralType::Golden => g.powf(k as f64 / 10.0),
        SpiralType::Logarithmic => (0.1 * k as f64 * g).exp(),
        SpiralType::Archimedean => 1.0 + 0.1 * k as f64 * g,
        // Spec §4.C only gives explicit formulas for 5 spiral types; the remaining
        // consciousness-adjacent types reuse the `consciousness` formula (Open Question,
        // see DESIGN.md) since they share the same growth rate and are all routed to by
        // `SpiralType::for_memory` at the protected depth tiers.
        SpiralType::Consciousness
        | SpiralType::EmotionalDepth
        | SpiralType::EmpathyResonance
        | SpiralType::ContextualAwareness
        | SpiralType::InsightSynthesis
        | SpiralType::CreativePotential => g.powf(k as f64 / 13.0),
    };

    let angle_rad = angle_deg.to_radians();
    Position {
        angle_deg,
        radius,
        x: radius * angle_rad.cos(),
        y: radius * angle_rad.sin(),
        turn: k / nodes_per_turn.max(1),
        node_index: k,
    }
}

/// Weights for the spiral selection score (spec §4.C).
#[derive(Debug, Clone, Copy)]
pub struct SelectionWeights {
    pub distance: f64,
    pub load: f64,
    pub age: f64,
    /// Normalizer for `age_seconds` so its term stays commensurate with the other two,
    /// which are both in `[0, ~few]` (Open Question resolution, see DESIGN.md).
    pub age_norm_secs: f64,
}

impl Default for SelectionWeights {
    fn default() -> Self {
        Self { distance: 0.5, load: 0.3, age: 0.2, age_norm_secs: 86_400.0 }
    }
}

/// Routing-table vector for a spiral type, derived once from its immutable parameters
/// (spec §4.C: "Euclidean distance of their routing-table vectors").
fn routing_vector(spiral_type: SpiralType) -> [f64; 4] {
    let p = spiral_type.params();
    [
        p.growth_rate,
        p.turn_angle_deg / 360.0,
        p.capacity as f64 / 1000.0,
        p.resonance_hz / 100.0,
    ]
}

/// Euclidean distance between the routing vectors of two spiral types.
pub fn harmonic_distance(a: SpiralType, b: SpiralType) -> f64 {
    let va = routing_vector(a);
    let vb = routing_vector(b);
    va.iter()
        .zip(vb.iter())
        .map(|(x, y)| (x - y).powi(2))
        .sum::<f64>()
        .sqrt()
}

/// Outcome of spiral selection (spec §4.C).
pub enum Selection {
    Existing(String),
    New(SpiralType),
}

/// Select (or decide to create) a spiral for a new node (spec §4.C).
///
/// `existing` is `(id, spiral_type, node_count, capacity, created_at)` for every spiral
/// currently in the store.
pub fn select_spiral(
    memory_type: MemoryType,
    depth: MemoryDepth,
    last_spiral_id: Option<&str>,
    existing: &HashMap<String, (SpiralType, u64, u32, DateTime<Utc>)>,
    weights: SelectionWeights,
    now: DateTime<Utc>,
    max_spirals: usize,
) -> Selection {
    let last_type = last_spiral_id.and_then(|id| existing.get(id)).map(|(t, ..)| *t);

    let mut best: Option<(String, f64, bool)> = None; // (id, score, at_capacity)
    for (id, (spiral_type, node_count, capacity, created_at)) in existing {
        let distance = match last_type {
            Some(lt) => harmonic_distance(lt, *spiral_type),
            None => 0.0,
        };
        let load = *node_count as f64 / (*capacity).max(1) as f64;
        let age_seconds = (now - *created_at).num_seconds().max(0) as f64;
        let score = weights.distance * distance
            + weights.load * load
            + weights.age * (age_seconds / weights.age_norm_secs.max(1.0));

        let at_capacity = *node_count >= *capacity as u64;
        let better = match &best {
            None => true,
            Some((_, best_score, _)) => score < *best_score,
        };
        if better {
            best = Some((id.clone(), score, at_capacity));
        }
    }

    match best {
        Some((id, score, at_capacity)) if score <= 1.0 && !at_capacity => Selection::Existing(id),
        Some((id, _, at_capacity)) if existing.len() >= max_spirals && !at_capacity => Selection::Existing(id),
        _ => Selection::New(SpiralType::for_memory(memory_type, depth)),
    }
}
