//! Bounded LFU cache for the sigil registry (spec §4.D: "consult LFU cache first...on
//! cache admit, evict the least-frequently-used entry when full").

use std::collections::HashMap;

/// Least-frequently-used cache mapping sigil signature to node id.
pub struct LfuCache {
    capacity: usize,
    entries: HashMap<String, (String, u64)>,
}

impl LfuCache {
    pub fn new(capacity: usize) -> Self {
        Self { capacity: capacity.max(1), entries: HashMap::new() }
    }

    /// Look up `signature`, bumping its use count on hit.
    pub fn get(&mut self, signature: &str) -> Option<String> {
        if let Some((id, freq)) = self.entries.get_mut(signature) {
            *freq += 1;
            Some(id.clone())
        } else {
            None
        }
    }

    /// Insert or overwrite `signature -> id`, evicting the least-frequently-used entry
    /// when the cache is at capacity and `signature` is not already present.
    pub fn put(&mut self, signature: String, id: String) {
        if let Some(entry) = self.entries.get_mut(&signature) {
            entry.0 = id;
            return;
        }
        if self.entries.len() >= self.capacity {
            if let Some(victim) = self
                .entries
                .iter()
                .min_by_key(|(_, (_, freq))| *freq)
                .map(|(sig, _)| sig.clone())
            {
                self.entries.remove(&victim);
            }
        }
        self.entries.insert(signature, (id, 1));
    }

    pub fn remove(&mut self, signature: &str) {
        self.entries.remove(signature);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evicts_least_frequently_used() {
        let mut cache = LfuCache::new(2);
        cache.put("a".into(), "1".into());
        cache.put("b".into(), "2".into());
        cache.get("a"); // bump a's frequency above b's
        cache.put("c".into(), "3".into());
        assert!(cache.get("a").is_some());
        assert!(cache.get("b").is_none());
        assert!(cache.get("c").is_some());
    }

    #[test]
    fn put_existing_key_overwrites_without_eviction() {
        let mut cache = LfuCache::new(1);
        cache.put("a".into(), "1".into());
        cache.put("a".into(), "2".into());
        assert_eq!(cache.get("a"), Some("2".to_string()));
        assert_eq!(cache.len(), 1);
    }
}
