//! Key-addressable min-heap for the GC scheduler (spec §3, GLOSSARY: "GC heap").
//!
//! Re-inserting a key updates its score (invariant I4). `BinaryHeap` has no native
//! decrease-key, so entries are pushed lazily and stale ones are discarded on pop by
//! comparing against the authoritative score held in `current`.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};

use chrono::{DateTime, Utc};

#[derive(Debug, Clone, Eq, PartialEq)]
struct Entry {
    score: DateTime<Utc>,
    id: String,
}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.score.cmp(&other.score).then_with(|| self.id.cmp(&other.id))
    }
}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// A key-addressable min-heap of node ids keyed by `last_accessed_at`.
pub struct GcHeap {
    heap: BinaryHeap<Reverse<Entry>>,
    current: HashMap<String, DateTime<Utc>>,
}

impl GcHeap {
    pub fn new() -> Self {
        Self { heap: BinaryHeap::new(), current: HashMap::new() }
    }

    /// Push or update `id`'s score. The smaller (oldest) score wins on pop ordering.
    pub fn push(&mut self, id: String, score: DateTime<Utc>) {
        self.current.insert(id.clone(), score);
        self.heap.push(Reverse(Entry { score, id }));
    }

    /// Remove `id` from the key-addressable index without touching the heap; its stale
    /// entries are discarded lazily on pop.
    pub fn remove(&mut self, id: &str) {
        self.current.remove(id);
    }

    /// Pop the entry with the smallest (oldest) score, discarding stale entries whose
    /// score no longer matches the authoritative one.
    pub fn pop(&mut self) -> Option<(String, DateTime<Utc>)> {
        while let Some(Reverse(entry)) = self.heap.pop() {
            match self.current.get(&entry.id) {
                Some(&score) if score == entry.score => {
                    self.current.remove(&entry.id);
                    return Some((entry.id, entry.score));
                }
                _ => continue,
            }
        }
        None
    }

    pub fn len(&self) -> usize {
        self.current.len()
    }

    pub fn is_empty(&self) -> bool {
        self.current.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.current.contains_key(id)
    }
}

impl Default for GcHeap {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    #[test]
    fn pops_in_score_order() {
        let mut heap = GcHeap::new();
        let base = Utc::now();
        heap.push("a".into(), base + ChronoDuration::seconds(2));
        heap.push("b".into(), base);
        heap.push("c".into(), base + ChronoDuration::seconds(1));

        assert_eq!(heap.pop().unwrap().0, "b");
        assert_eq!(heap.pop().unwrap().0, "c");
        assert_eq!(heap.pop().unwrap().0, "a");
        assert!(heap.pop().is_none());
    }

    #[test]
    fn re_push_updates_score() {
        let mut heap = GcHeap::new();
        let base = Utc::now();
        heap.push("a".into(), base);
        heap.push("b".into(), base + ChronoDuration::seconds(5));
        heap.push("a".into(), base + ChronoDuration::seconds(10));

        assert_eq!(heap.pop().unwrap().0, "b");
        assert_eq!(heap.pop().unwrap().0, "a");
    }

    #[test]
    fn remove_drops_entry() {
        let mut heap = GcHeap::new();
        let base = Utc::now();
        heap.push("a".into(), base);
        heap.push("b".into(), base + ChronoDuration::seconds(1));
        heap.remove("a");
        assert_eq!(heap.len(), 1);
        assert_eq!(heap.pop().unwrap().0, "b");
        assert!(heap.pop().is_none());
    }
}
