//! The memory node — the unit of storage (spec §3).

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::sigil::Sigil;
use crate::types::{MemoryDepth, MemoryType};

/// A node's position within its spiral (spec §4.C).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub angle_deg: f64,
    pub radius: f64,
    pub x: f64,
    pub y: f64,
    pub turn: u64,
    pub node_index: u64,
}

/// A memory node, exclusively owned by the [`crate::store::MemoryStore`]. External callers
/// only ever see cloned snapshots.
#[non_exhaustive]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryNode {
    pub id: String,
    pub content: Vec<u8>,
    pub memory_type: MemoryType,
    pub depth: MemoryDepth,
    pub sigil: Sigil,
    pub spiral_id: String,
    pub position: Position,
    pub associations: BTreeSet<String>,
    pub created_at: DateTime<Utc>,
    pub last_accessed_at: DateTime<Utc>,
    pub access_count: u64,
    pub memory_strength: f64,
}

impl MemoryNode {
    /// Content interpreted as UTF-8 (lossy) for search/serialization purposes.
    pub fn content_as_str(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.content)
    }

    /// Relevance score used by `search_memories` (spec §4.D).
    pub fn relevance(&self, match_count: usize) -> f64 {
        0.5 * match_count as f64
            + 0.3 * self.memory_strength
            + 0.2 * (self.access_count as f64 / 10.0).min(1.0)
    }
}
