//! Bounded insertion-ordered dedup cache (§4.3), one per `Range Scanner` instance.

use crate::byte_array::Hash32;
use std::collections::VecDeque;
use std::collections::hash_set::HashSet;

/// `txHash ∥ blockHash ∥ logIndex`, 68 bytes (§3 `DedupKey`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DedupKey(pub [u8; 68]);

impl DedupKey {
    pub fn new(tx_hash: Hash32, block_hash: Hash32, log_index: u32) -> Self {
        let mut bytes = [0u8; 68];
        bytes[0..32].copy_from_slice(&tx_hash.0);
        bytes[32..64].copy_from_slice(&block_hash.0);
        bytes[64..68].copy_from_slice(&log_index.to_be_bytes());
        Self(bytes)
    }
}

/// Oldest-insertion-evicted bounded set, the in-process counterpart to Store-level uniqueness.
/// Correctness never rests on this cache alone — it is a best-effort filter (§4.3 rationale).
pub struct DedupCache {
    order: VecDeque<DedupKey>,
    members: HashSet<DedupKey>,
    capacity: usize,
}

impl DedupCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            order: VecDeque::with_capacity(capacity.min(1 << 20)),
            members: HashSet::with_capacity(capacity.min(1 << 20)),
            capacity: capacity.max(1),
        }
    }

    pub fn contains(&self, key: &DedupKey) -> bool {
        self.members.contains(key)
    }

    /// Inserts `key`, evicting the oldest-inserted entry if this pushes the cache over
    /// capacity. Re-inserting an existing key is a no-op for ordering purposes.
    pub fn insert(&mut self, key: DedupKey) {
        if self.members.contains(&key) {
            return;
        }
        if self.order.len() >= self.capacity
            && let Some(oldest) = self.order.pop_front()
        {
            self.members.remove(&oldest);
        }
        self.order.push_back(key);
        self.members.insert(key);
    }

    pub fn clear(&mut self) {
        self.order.clear();
        self.members.clear();
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(n: u8) -> DedupKey {
        let tx_hash = Hash32([n; 32]);
        let block_hash = Hash32([n.wrapping_add(1); 32]);
        DedupKey::new(tx_hash, block_hash, n as u32)
    }

    #[test]
    fn contains_reflects_inserted_keys() {
        let mut cache = DedupCache::new(10);
        let k = key(1);
        assert!(!cache.contains(&k));
        cache.insert(k);
        assert!(cache.contains(&k));
    }

    #[test]
    fn evicts_oldest_insertion_once_over_capacity() {
        let mut cache = DedupCache::new(2);
        let (a, b, c) = (key(1), key(2), key(3));
        cache.insert(a);
        cache.insert(b);
        assert_eq!(cache.len(), 2);
        cache.insert(c);
        assert_eq!(cache.len(), 2);
        assert!(!cache.contains(&a), "oldest insertion should be evicted");
        assert!(cache.contains(&b));
        assert!(cache.contains(&c));
    }

    #[test]
    fn never_exceeds_capacity_bound() {
        let mut cache = DedupCache::new(40_000);
        for i in 0..100_000u32 {
            let tx_hash = Hash32::default();
            let block_hash = Hash32::default();
            cache.insert(DedupKey::new(tx_hash, block_hash, i));
        }
        assert!(cache.len() <= 40_000);
    }

    #[test]
    fn clear_empties_cache() {
        let mut cache = DedupCache::new(10);
        cache.insert(key(1));
        cache.clear();
        assert!(cache.is_empty());
    }

    #[test]
    fn same_tx_and_log_index_on_different_block_hash_is_a_distinct_key() {
        let tx_hash = Hash32([9; 32]);
        let k1 = DedupKey::new(tx_hash, Hash32([1; 32]), 0);
        let k2 = DedupKey::new(tx_hash, Hash32([2; 32]), 0);
        assert_ne!(k1, k2);
    }
}
