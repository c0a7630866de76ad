//! Memory Store (spec §4.D) — the exclusive owner of `nodes`, `sigil_registry`,
//! `spirals`, `gc_heap`, and `sigil_cache`. Single-writer, shared-reader (spec §5).

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::bus::{Event, EventBus, Topic};
use crate::error::{Error, Result};
use crate::heap::GcHeap;
use crate::lfu::LfuCache;
use crate::node::MemoryNode;
use crate::sigil::{self, SigilConfig};
use crate::spiral::{self, Selection, SelectionWeights, Spiral};
use crate::storage::{mem_key, sigil_key, spiral_count_key, spiral_key, StorageBackend};
use crate::types::{MemoryDepth, MemoryType};

/// Tunables that govern GC eligibility, kept alongside the store since eviction
/// decisions read node state the store exclusively owns (spec §4.E).
#[derive(Debug, Clone, Copy)]
pub struct GcPolicy {
    pub age_threshold_ms: u64,
    pub access_threshold: u64,
    pub min_strength: f64,
    pub forced_skip_limit: u32,
    pub max_associations: usize,
    pub budget_scale: u64,
}

impl Default for GcPolicy {
    fn default() -> Self {
        Self {
            age_threshold_ms: 24 * 60 * 60 * 1000,
            access_threshold: 2,
            min_strength: 0.5,
            forced_skip_limit: 3,
            max_associations: 3,
            budget_scale: 10,
        }
    }
}

struct Inner {
    nodes: HashMap<String, MemoryNode>,
    sigil_registry: HashMap<String, String>,
    spirals: HashMap<String, Spiral>,
    gc_heap: GcHeap,
    sigil_cache: LfuCache,
    skip_counts: HashMap<String, u32>,
    last_spiral_id: Option<String>,
    pending_associations: VecDeque<(String, Vec<String>)>,
}

pub struct MemoryStore {
    inner: RwLock<Inner>,
    backend: Arc<dyn StorageBackend>,
    bus: Arc<EventBus>,
    sigil_config: SigilConfig,
    selection_weights: SelectionWeights,
    max_spirals: usize,
    gc_policy: GcPolicy,
    store_allowed: AtomicU64,
    store_denied: AtomicU64,
}

impl MemoryStore {
    pub fn new(
        backend: Arc<dyn StorageBackend>,
        bus: Arc<EventBus>,
        sigil_config: SigilConfig,
        selection_weights: SelectionWeights,
        max_spirals: usize,
        gc_policy: GcPolicy,
    ) -> Self {
        Self {
            inner: RwLock::new(Inner {
                nodes: HashMap::new(),
                sigil_registry: HashMap::new(),
                spirals: HashMap::new(),
                gc_heap: GcHeap::new(),
                sigil_cache: LfuCache::new(5000),
                skip_counts: HashMap::new(),
                last_spiral_id: None,
                pending_associations: VecDeque::new(),
            }),
            backend,
            bus,
            sigil_config,
            selection_weights,
            max_spirals,
            gc_policy,
            store_allowed: AtomicU64::new(0),
            store_denied: AtomicU64::new(0),
        }
    }

    /// Count of `store_memory` calls that succeeded, for the `store_allowed_total`
    /// counter (spec §4.H).
    pub fn store_allowed_count(&self) -> u64 {
        self.store_allowed.load(Ordering::Relaxed)
    }

    /// Count of `store_memory` calls that were rejected (capacity or backend faults),
    /// for the `store_denied_total` counter (spec §4.H).
    pub fn store_denied_count(&self) -> u64 {
        self.store_denied.load(Ordering::Relaxed)
    }

    pub fn with_sigil_cache_capacity(mut self, capacity: usize) -> Self {
        self.inner.get_mut().sigil_cache = LfuCache::new(capacity);
        self
    }

    /// Subscribe the request-topic handlers (spec §4.G table): callers publish
    /// `store_memory_request` / `retrieve_memory_request` / `search_memories_request`
    /// on the bus, and the store replies on the matching response topic carrying the
    /// same `request_id`. Each handler spawns a task since bus dispatch is synchronous.
    ///
    /// Handlers capture a `Weak` back-reference, not an `Arc`: the store owns its bus,
    /// so a strong reference here would form a cycle that outlives the store's own
    /// `Arc` and keeps its backend (e.g. an open `redb` file) from ever closing.
    pub fn wire_bus_handlers(self: &Arc<Self>) {
        let weak = Arc::downgrade(self);
        self.bus.subscribe(Topic::StoreMemoryRequest, "store", false, move |event| {
            let Some(store) = weak.upgrade() else { return };
            let request_id = event.request_id.clone();
            let payload = event.payload.clone();
            tokio::spawn(async move {
                let content = payload.get("content").and_then(|v| v.as_str()).unwrap_or_default().as_bytes().to_vec();
                let memory_type = payload
                    .get("type")
                    .and_then(|v| serde_json::from_value::<MemoryType>(v.clone()).ok())
                    .unwrap_or(MemoryType::General);
                let depth = payload
                    .get("depth")
                    .and_then(|v| serde_json::from_value::<MemoryDepth>(v.clone()).ok())
                    .unwrap_or(MemoryDepth::Shallow);
                let associations = payload
                    .get("associations")
                    .and_then(|v| serde_json::from_value::<Vec<String>>(v.clone()).ok())
                    .unwrap_or_default();
                let _ = store.store_memory_correlated(content, memory_type, depth, associations, request_id).await;
            });
        });

        let weak = Arc::downgrade(self);
        self.bus.subscribe(Topic::RetrieveMemoryRequest, "store", false, move |event| {
            let Some(store) = weak.upgrade() else { return };
            let request_id = event.request_id.clone();
            let Some(memory_id) = event.payload.get("memory_id").and_then(|v| v.as_str()).map(str::to_string) else {
                return;
            };
            tokio::spawn(async move {
                store.retrieve_memory_correlated(&memory_id, request_id).await;
            });
        });

        let weak = Arc::downgrade(self);
        self.bus.subscribe(Topic::SearchMemoriesRequest, "store", false, move |event| {
            let Some(store) = weak.upgrade() else { return };
            let request_id = event.request_id.clone();
            let payload = event.payload.clone();
            let Some(query) = payload.get("query").and_then(|v| v.as_str()).map(str::to_string) else {
                return;
            };
            tokio::spawn(async move {
                let memory_type =
                    payload.get("type").and_then(|v| serde_json::from_value::<MemoryType>(v.clone()).ok());
                let depth = payload.get("depth").and_then(|v| serde_json::from_value::<MemoryDepth>(v.clone()).ok());
                let limit = payload.get("limit").and_then(|v| v.as_u64()).unwrap_or(10) as usize;
                let _ = store.search_memories_correlated(&query, memory_type, depth, limit, request_id).await;
            });
        });
    }

    /// Store a new memory node (spec §4.D `store_memory`).
    pub async fn store_memory(
        &self,
        content: Vec<u8>,
        memory_type: MemoryType,
        depth: MemoryDepth,
        associations: Vec<String>,
    ) -> Result<MemoryNode> {
        self.store_memory_correlated(content, memory_type, depth, associations, None).await
    }

    async fn store_memory_correlated(
        &self,
        content: Vec<u8>,
        memory_type: MemoryType,
        depth: MemoryDepth,
        associations: Vec<String>,
        request_id: Option<String>,
    ) -> Result<MemoryNode> {
        let start = Instant::now();
        let mut inner = self.inner.write().await;
        let now = Utc::now();

        let sigil = sigil::encode(&content, memory_type, depth, &self.sigil_config);

        let existing: HashMap<String, (crate::types::SpiralType, u64, u32, DateTime<Utc>)> = inner
            .spirals
            .iter()
            .map(|(id, s)| (id.clone(), (s.spiral_type, s.node_count, s.capacity(), s.created_at)))
            .collect();

        let selection = spiral::select_spiral(
            memory_type,
            depth,
            inner.last_spiral_id.as_deref(),
            &existing,
            self.selection_weights,
            now,
            self.max_spirals,
        );

        let (spiral_id, is_new_spiral, spiral_type) = match selection {
            Selection::Existing(id) => {
                let spiral_type = inner.spirals[&id].spiral_type;
                (id, false, spiral_type)
            }
            Selection::New(spiral_type) => {
                if inner.spirals.len() >= self.max_spirals {
                    self.store_denied.fetch_add(1, Ordering::Relaxed);
                    return Err(Error::CapacityExceeded);
                }
                (Uuid::new_v4().to_string(), true, spiral_type)
            }
        };

        let id = Uuid::new_v4().to_string();
        let node_index = if is_new_spiral { 0 } else { inner.spirals[&spiral_id].node_count };
        let nodes_per_turn = if is_new_spiral {
            (spiral_type.params().capacity / 10).max(1) as u64
        } else {
            inner.spirals[&spiral_id].nodes_per_turn()
        };
        let position = spiral::compute_position(spiral_type, spiral_type.params().growth_rate, nodes_per_turn, node_index);

        let node = MemoryNode {
            id: id.clone(),
            content,
            memory_type,
            depth,
            sigil: sigil.clone(),
            spiral_id: spiral_id.clone(),
            position,
            associations: Default::default(),
            created_at: now,
            last_accessed_at: now,
            access_count: 0,
            memory_strength: depth.weight(),
        };

        let spiral_snapshot = if is_new_spiral {
            let mut s = Spiral::new(spiral_id.clone(), spiral_type, now);
            s.nodes.insert(id.clone());
            s.node_count = 1;
            s.current_radius = position.radius;
            s.total_turns = position.turn;
            s.average_depth = depth.weight();
            s.last_updated_at = now;
            s
        } else {
            let s = inner.spirals.get(&spiral_id).expect("selected spiral must exist");
            let mut s = s.clone();
            s.nodes.insert(id.clone());
            s.node_count += 1;
            s.current_radius = position.radius;
            s.total_turns = s.total_turns.max(position.turn);
            let total_weight = s.average_depth * (s.node_count - 1) as f64 + depth.weight();
            s.average_depth = total_weight / s.node_count as f64;
            s.last_updated_at = now;
            s
        };

        let displaced_signature = inner.sigil_registry.get(&sigil.signature).cloned();

        // Persist before mutating in-memory caches (BackendUnavailable must not corrupt state).
        let persisted: Result<()> = async {
            self.backend.atomic_incr(&spiral_count_key(&spiral_id), 1).await?;
            self.backend
                .set(&spiral_key(&spiral_id), serde_json::to_vec(&spiral_snapshot).map_err(|e| Error::InvalidInput(e.to_string()))?)
                .await?;
            self.backend
                .set(&mem_key(&id), serde_json::to_vec(&node).map_err(|e| Error::InvalidInput(e.to_string()))?)
                .await?;
            self.backend
                .set(&sigil_key(&sigil.signature), serde_json::to_vec(&serde_json::json!({
                    "signature": sigil.signature,
                    "memory_id": id,
                })).map_err(|e| Error::InvalidInput(e.to_string()))?)
                .await?;
            Ok(())
        }
        .await;
        if let Err(e) = persisted {
            self.store_denied.fetch_add(1, Ordering::Relaxed);
            return Err(e);
        }

        inner.spirals.insert(spiral_id.clone(), spiral_snapshot);
        inner.last_spiral_id = Some(spiral_id.clone());
        inner.sigil_registry.insert(sigil.signature.clone(), id.clone());
        inner.gc_heap.push(id.clone(), now);
        inner.nodes.insert(id.clone(), node.clone());

        if let Some(displaced) = displaced_signature {
            if displaced != id {
                self.bus.emit(Event::new(
                    Topic::SigilCollision,
                    serde_json::json!({ "signature": sigil.signature }),
                ));
            }
        }

        if associations.len() > self.gc_policy.max_associations + 2 {
            inner.pending_associations.push_back((id.clone(), associations));
        } else {
            Self::add_associations_locked(&mut inner, &id, &associations);
        }

        let latency_ms = start.elapsed().as_secs_f64() * 1000.0;
        self.backend.record_latency("store_memory", latency_ms);
        self.store_allowed.fetch_add(1, Ordering::Relaxed);
        let mut event = Event::new(Topic::MemoryStored, serde_json::json!({ "node": node, "latency_ms": latency_ms }));
        if let Some(request_id) = request_id {
            event = event.with_request_id(request_id);
        }
        self.bus.emit(event);

        Ok(node)
    }

    fn add_associations_locked(inner: &mut Inner, id: &str, associations: &[String]) {
        for peer in associations {
            if peer == id {
                continue;
            }
            if !inner.nodes.contains_key(peer) {
                continue; // silent no-op: target may have been GC'd
            }
            if let Some(node) = inner.nodes.get_mut(id) {
                node.associations.insert(peer.clone());
            }
            if let Some(peer_node) = inner.nodes.get_mut(peer) {
                peer_node.associations.insert(id.to_string());
            }
        }
    }

    /// Process associations deferred at store time (spec §4.D step 7). Intended to be
    /// driven by `system_tick`.
    pub async fn process_deferred_associations(&self) {
        let mut inner = self.inner.write().await;
        if let Some((id, associations)) = inner.pending_associations.pop_front() {
            Self::add_associations_locked(&mut inner, &id, &associations);
        }
    }

    /// Retrieve a node by id (spec §4.D `retrieve_memory`).
    pub async fn retrieve_memory(&self, id: &str) -> Option<MemoryNode> {
        self.retrieve_memory_correlated(id, None).await
    }

    async fn retrieve_memory_correlated(&self, id: &str, request_id: Option<String>) -> Option<MemoryNode> {
        let start = std::time::Instant::now();
        let mut inner = self.inner.write().await;
        let now = Utc::now();
        let node = inner.nodes.get_mut(id)?;
        node.last_accessed_at = node.last_accessed_at.max(now);
        node.access_count += 1;
        let snapshot = node.clone();
        inner.gc_heap.push(id.to_string(), snapshot.last_accessed_at);
        let latency_ms = start.elapsed().as_secs_f64() * 1000.0;
        let mut event = Event::new(Topic::MemoryRetrieved, serde_json::json!({ "memory_id": id, "latency_ms": latency_ms }));
        if let Some(request_id) = request_id {
            event = event.with_request_id(request_id);
        }
        self.bus.emit(event);
        Some(snapshot)
    }

    /// Retrieve a node by sigil signature (spec §4.D `retrieve_by_sigil`).
    pub async fn retrieve_by_sigil(&self, signature: &str) -> Option<MemoryNode> {
        let cached_id = {
            let mut inner = self.inner.write().await;
            inner.sigil_cache.get(signature)
        };
        let id = match cached_id {
            Some(id) => id,
            None => {
                let id = {
                    let inner = self.inner.read().await;
                    inner.sigil_registry.get(signature).cloned()?
                };
                let mut inner = self.inner.write().await;
                inner.sigil_cache.put(signature.to_string(), id.clone());
                id
            }
        };
        self.retrieve_memory(&id).await
    }

    /// Search stored nodes by substring match (spec §4.D `search_memories`).
    pub async fn search_memories(
        &self,
        query: &str,
        memory_type: Option<MemoryType>,
        depth: Option<MemoryDepth>,
        limit: usize,
    ) -> Result<Vec<MemoryNode>> {
        self.search_memories_correlated(query, memory_type, depth, limit, None).await
    }

    async fn search_memories_correlated(
        &self,
        query: &str,
        memory_type: Option<MemoryType>,
        depth: Option<MemoryDepth>,
        limit: usize,
        request_id: Option<String>,
    ) -> Result<Vec<MemoryNode>> {
        if query.is_empty() {
            return Err(Error::InvalidInput("query must not be empty".to_string()));
        }
        let needle = query.to_lowercase();
        let inner = self.inner.read().await;

        let mut scored: Vec<(f64, MemoryNode)> = inner
            .nodes
            .values()
            .filter(|n| memory_type.map(|t| t == n.memory_type).unwrap_or(true))
            .filter(|n| depth.map(|d| d == n.depth).unwrap_or(true))
            .filter_map(|n| {
                let haystack = n.content_as_str().to_lowercase();
                let match_count = haystack.matches(&needle).count();
                if match_count == 0 {
                    return None;
                }
                Some((n.relevance(match_count), n.clone()))
            })
            .collect();

        scored.sort_by(|a, b| {
            b.0.partial_cmp(&a.0)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.1.id.cmp(&b.1.id))
        });
        scored.truncate(limit);

        let mut event =
            Event::new(Topic::MemoriesSearched, serde_json::json!({ "query": query, "result_count": scored.len() }));
        if let Some(request_id) = request_id {
            event = event.with_request_id(request_id);
        }
        self.bus.emit(event);

        Ok(scored.into_iter().map(|(_, n)| n).collect())
    }

    // -- GC-facing API (spec §4.E). GC scheduling logic lives in `crate::gc`. --

    pub async fn gc_pop_candidate(&self) -> Option<(String, DateTime<Utc>)> {
        self.inner.write().await.gc_heap.pop()
    }

    pub async fn gc_requeue(&self, id: String, score: DateTime<Utc>) {
        self.inner.write().await.gc_heap.push(id, score);
    }

    pub async fn gc_heap_len(&self) -> usize {
        self.inner.read().await.gc_heap.len()
    }

    pub async fn gc_skip_count(&self, id: &str) -> u32 {
        self.inner.read().await.skip_counts.get(id).copied().unwrap_or(0)
    }

    pub async fn gc_bump_skip(&self, id: &str) -> u32 {
        let mut inner = self.inner.write().await;
        let counter = inner.skip_counts.entry(id.to_string()).or_insert(0);
        *counter += 1;
        *counter
    }

    pub async fn gc_reset_skip(&self, id: &str) {
        self.inner.write().await.skip_counts.remove(id);
    }

    pub async fn gc_node_snapshot(&self, id: &str) -> Option<MemoryNode> {
        self.inner.read().await.nodes.get(id).cloned()
    }

    pub fn gc_policy(&self) -> GcPolicy {
        self.gc_policy
    }

    /// Evict `id` (spec §4.E eviction steps 1-5).
    pub async fn evict_node(&self, id: &str) -> Result<bool> {
        let mut inner = self.inner.write().await;
        let Some(node) = inner.nodes.remove(id) else {
            return Ok(false);
        };

        if let Some(spiral) = inner.spirals.get_mut(&node.spiral_id) {
            spiral.nodes.remove(id);
            spiral.node_count = spiral.node_count.saturating_sub(1);
        }
        self.backend.atomic_incr(&spiral_count_key(&node.spiral_id), -1).await?;
        if let Some(spiral) = inner.spirals.get(&node.spiral_id) {
            self.backend
                .set(&spiral_key(&node.spiral_id), serde_json::to_vec(spiral).map_err(|e| Error::InvalidInput(e.to_string()))?)
                .await?;
        }

        let peers: Vec<String> = node.associations.iter().cloned().collect();
        for peer in peers {
            if let Some(peer_node) = inner.nodes.get_mut(&peer) {
                peer_node.associations.remove(id);
            }
        }

        if inner.sigil_registry.get(&node.sigil.signature) == Some(&node.id) {
            inner.sigil_registry.remove(&node.sigil.signature);
            self.backend.del(&sigil_key(&node.sigil.signature)).await?;
        }
        self.backend.del(&mem_key(id)).await?;
        inner.sigil_cache.remove(&node.sigil.signature);
        inner.skip_counts.remove(id);

        Ok(true)
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    pub fn backend(&self) -> &Arc<dyn StorageBackend> {
        &self.backend
    }

    pub async fn node_count(&self) -> usize {
        self.inner.read().await.nodes.len()
    }

    pub async fn spiral_count(&self) -> usize {
        self.inner.read().await.spirals.len()
    }

    pub async fn all_nodes(&self) -> Vec<MemoryNode> {
        self.inner.read().await.nodes.values().cloned().collect()
    }

    pub async fn get_spiral(&self, id: &str) -> Option<Spiral> {
        self.inner.read().await.spirals.get(id).cloned()
    }

    pub async fn insert_spiral_for_reload(&self, spiral: Spiral) {
        self.inner.write().await.spirals.insert(spiral.id.clone(), spiral);
    }

    pub async fn insert_node_for_reload(&self, node: MemoryNode) {
        let mut inner = self.inner.write().await;
        inner.sigil_registry.insert(node.sigil.signature.clone(), node.id.clone());
        inner.gc_heap.push(node.id.clone(), node.last_accessed_at);
        inner.last_spiral_id = Some(node.spiral_id.clone());
        if let Some(spiral) = inner.spirals.get_mut(&node.spiral_id) {
            spiral.nodes.insert(node.id.clone());
        }
        inner.nodes.insert(node.id.clone(), node);
    }

    /// Reconcile per-spiral counters against the authoritative node set
    /// (spec §4.F). Returns `(spiral_id, before, after)` for every corrected spiral.
    pub async fn rebuild_spiral_stats(&self) -> Result<Vec<(String, Spiral, Spiral)>> {
        let mut inner = self.inner.write().await;
        let mut grouped: HashMap<String, Vec<(String, f64, f64, u64)>> = HashMap::new();
        for node in inner.nodes.values() {
            grouped.entry(node.spiral_id.clone()).or_default().push((
                node.id.clone(),
                node.depth.weight(),
                node.position.radius,
                node.position.turn,
            ));
        }

        let mut corrections = Vec::new();
        let spiral_ids: Vec<String> = inner.spirals.keys().cloned().collect();
        for (processed, spiral_id) in spiral_ids.into_iter().enumerate() {
            if processed > 0 && processed % 1000 == 0 {
                tokio::task::yield_now().await;
            }
            let members = grouped.get(&spiral_id).cloned().unwrap_or_default();
            let node_count = members.len() as u64;
            let average_depth = if members.is_empty() {
                0.0
            } else {
                members.iter().map(|(_, weight, _, _)| weight).sum::<f64>() / members.len() as f64
            };
            let max_radius = members.iter().map(|(_, _, radius, _)| *radius).fold(0.0_f64, f64::max);
            let max_turn = members.iter().map(|(_, _, _, turn)| *turn).max().unwrap_or(0);

            let before = inner.spirals.get(&spiral_id).expect("spiral id from its own key set").clone();
            let differs = (before.node_count as i64 - node_count as i64).abs() > 0
                || (before.average_depth - average_depth).abs() > 1e-3
                || (before.current_radius - max_radius).abs() > 1e-3
                || before.total_turns != max_turn;

            if differs {
                let mut after = before.clone();
                after.node_count = node_count;
                after.average_depth = average_depth;
                after.current_radius = max_radius;
                after.total_turns = max_turn;
                after.nodes = members.iter().map(|(id, ..)| id.clone()).collect();
                after.last_updated_at = Utc::now();

                self.backend
                    .set(&spiral_key(&spiral_id), serde_json::to_vec(&after).map_err(|e| Error::InvalidInput(e.to_string()))?)
                    .await?;
                inner.spirals.insert(spiral_id.clone(), after.clone());
                corrections.push((spiral_id, before, after));
            }
        }

        Ok(corrections)
    }
}
