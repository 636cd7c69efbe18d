//! Bounded set of completed lookup ids with TTL and max-size eviction.
//!
//! The submission engine consults this before building a transaction so a
//! message completed earlier in the run is never broadcast again, without
//! letting the set grow for the lifetime of the process.
//!
//! Each entry is ~100 bytes (64-char hex key + Instant + map overhead), so the
//! default 100k entries is roughly 10 MB.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::config::PipelineConfig;

pub struct BoundedIdCache {
    map: HashMap<String, Instant>,
    max_size: usize,
    ttl: Duration,
}

impl BoundedIdCache {
    pub fn new(max_size: usize, ttl_secs: u64) -> Self {
        Self {
            map: HashMap::new(),
            max_size: max_size.max(1),
            ttl: Duration::from_secs(ttl_secs),
        }
    }

    pub fn from_config(config: &PipelineConfig) -> Self {
        Self::new(config.completed_cache_size, config.completed_cache_ttl_secs)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.map.get(id).is_some_and(|&t| t.elapsed() < self.ttl)
    }

    pub fn insert(&mut self, id: String) {
        let now = Instant::now();
        self.map.retain(|_, &mut t| now.duration_since(t) < self.ttl);
        while self.map.len() >= self.max_size {
            let oldest = self
                .map
                .iter()
                .min_by_key(|(_, t)| **t)
                .map(|(id, _)| id.clone());
            match oldest {
                Some(id) => {
                    self.map.remove(&id);
                }
                None => break,
            }
        }
        self.map.insert(id, now);
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_and_contains() {
        let mut cache = BoundedIdCache::new(10, 3600);
        assert!(!cache.contains("aa"));
        cache.insert("aa".to_string());
        assert!(cache.contains("aa"));
        assert!(!cache.contains("bb"));
    }

    #[test]
    fn test_evicts_oldest_when_full() {
        let mut cache = BoundedIdCache::new(3, 3600);
        for id in ["a", "b", "c", "d"] {
            cache.insert(id.to_string());
            std::thread::sleep(Duration::from_millis(2));
        }
        assert!(!cache.contains("a"));
        assert!(cache.contains("d"));
        assert_eq!(cache.len(), 3);
    }

    #[test]
    fn test_expired_entries_are_not_reported() {
        let mut cache = BoundedIdCache::new(10, 0);
        cache.insert("a".to_string());
        assert!(!cache.contains("a"));
    }

    #[test]
    fn test_zero_capacity_still_holds_one() {
        let mut cache = BoundedIdCache::new(0, 3600);
        cache.insert("a".to_string());
        assert!(cache.contains("a"));
        assert_eq!(cache.len(), 1);
    }
}
