//! Shard-by-key-hash map for independent concurrent writers.
//!
//! The merge path is insert-or-report-existing under continuous write
//! load from many sessions; contention must stay bounded to one shard
//! per insertion. Routing is part of the contract: the shard index is a
//! pure function of the key's canonical bytes, identical across
//! processes and runs — which rules out the standard library's
//! per-process-seeded hashers for the routing step. (Inside a shard,
//! where stability doesn't matter, the default hasher is fine.)

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Mutex, MutexGuard};

/// Keys that can be routed stably. `stable_hash` must depend only on the
/// key's canonical byte content.
pub trait ShardKey: Eq + Hash + Clone {
    fn stable_hash(&self) -> u64;
}

impl ShardKey for [u8; 32] {
    fn stable_hash(&self) -> u64 {
        let digest = blake3::hash(self);
        let mut word = [0u8; 8];
        word.copy_from_slice(&digest.as_bytes()[0..8]);
        u64::from_le_bytes(word)
    }
}

/// A fixed number of independently locked hash maps. Insert-only by
/// design: no removal, no in-place mutation — exactly what a merge table
/// needs, and what keeps the per-shard critical sections trivial.
pub struct ShardedMap<K, V> {
    shards: Vec<Mutex<HashMap<K, V>>>,
}

impl<K: ShardKey, V: Clone> ShardedMap<K, V> {
    pub fn new(shard_count: usize) -> Self {
        assert!(shard_count > 0, "need at least one shard");
        let shards = (0..shard_count)
            .map(|_| Mutex::new(HashMap::new()))
            .collect();
        ShardedMap { shards }
    }

    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    /// Deterministic routing — the same key lands in the same shard in
    /// every process that configured the same shard count.
    pub fn shard_index(&self, key: &K) -> usize {
        (key.stable_hash() % self.shards.len() as u64) as usize
    }

    /// Insert if absent. Returns the already-present value otherwise,
    /// leaving it untouched — first write wins, forever.
    pub fn insert_or_get(&self, key: K, value: V) -> Option<V> {
        let mut shard = self.lock_shard(self.shard_index(&key));
        match shard.entry(key) {
            Entry::Occupied(entry) => Some(entry.get().clone()),
            Entry::Vacant(entry) => {
                entry.insert(value);
                None
            }
        }
    }

    pub fn get(&self, key: &K) -> Option<V> {
        self.lock_shard(self.shard_index(key)).get(key).cloned()
    }

    pub fn len(&self) -> usize {
        (0..self.shards.len())
            .map(|i| self.lock_shard(i).len())
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Clone out every entry, shard by shard. No global lock — entries
    /// committed while the snapshot runs may or may not appear, which is
    /// fine for checkpointing an insert-only table.
    pub fn snapshot(&self) -> Vec<(K, V)> {
        let mut out = Vec::with_capacity(self.len());
        for i in 0..self.shards.len() {
            let shard = self.lock_shard(i);
            out.extend(shard.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
        out
    }

    fn lock_shard(&self, index: usize) -> MutexGuard<'_, HashMap<K, V>> {
        // A poisoned shard still holds valid committed entries.
        self.shards[index].lock().unwrap_or_else(|p| p.into_inner())
    }
}
