// src/core/storage/dict.rs

//! A sharded concurrent hash map keyed by binary-safe strings.
//!
//! Each shard owns a plain `HashMap` behind a `parking_lot::RwLock`; the
//! total entry count is maintained in an atomic so `len` is O(1). Random key
//! sampling uses rejection sampling bounded by the map size so it terminates
//! even when most shards are empty.

use bytes::Bytes;
use parking_lot::RwLock;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

const MIN_SHARDS: usize = 16;

const FNV_OFFSET_BASIS: u32 = 2_166_136_261;
const FNV_PRIME: u32 = 16_777_619;

fn fnv32(key: &[u8]) -> u32 {
    let mut hash = FNV_OFFSET_BASIS;
    for &b in key {
        hash = hash.wrapping_mul(FNV_PRIME);
        hash ^= b as u32;
    }
    hash
}

/// A thread-safe map from `Bytes` to `V`, sharded by key hash.
#[derive(Debug)]
pub struct ConcurrentDict<V> {
    shards: Vec<RwLock<HashMap<Bytes, V>>>,
    size: AtomicUsize,
}

impl<V: Clone> ConcurrentDict<V> {
    /// Creates a dict with at least `shard_count` shards (rounded up to a
    /// power of two, minimum 16).
    pub fn new(shard_count: usize) -> Self {
        let n = shard_count.max(MIN_SHARDS).next_power_of_two();
        Self {
            shards: (0..n).map(|_| RwLock::new(HashMap::new())).collect(),
            size: AtomicUsize::new(0),
        }
    }

    fn shard_for(&self, key: &[u8]) -> &RwLock<HashMap<Bytes, V>> {
        let index = (fnv32(key) as usize) & (self.shards.len() - 1);
        &self.shards[index]
    }

    /// O(1) entry count. Equals the sum of shard sizes after any quiescent
    /// period.
    pub fn len(&self) -> usize {
        self.size.load(Ordering::Relaxed)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Inserts the value, returning the previous one if the key existed.
    pub fn insert(&self, key: Bytes, value: V) -> Option<V> {
        let mut shard = self.shard_for(&key).write();
        let old = shard.insert(key, value);
        if old.is_none() {
            self.size.fetch_add(1, Ordering::Relaxed);
        }
        old
    }

    /// Inserts only when the key is absent. Returns whether it inserted.
    pub fn insert_if_absent(&self, key: Bytes, value: V) -> bool {
        let mut shard = self.shard_for(&key).write();
        if shard.contains_key(&key) {
            return false;
        }
        shard.insert(key, value);
        self.size.fetch_add(1, Ordering::Relaxed);
        true
    }

    /// Replaces the value only when the key is present. Returns whether it
    /// replaced.
    pub fn insert_if_exists(&self, key: Bytes, value: V) -> bool {
        let mut shard = self.shard_for(&key).write();
        match shard.get_mut(&key) {
            Some(slot) => {
                *slot = value;
                true
            }
            None => false,
        }
    }

    pub fn get(&self, key: &[u8]) -> Option<V> {
        self.shard_for(key).read().get(key).cloned()
    }

    pub fn contains_key(&self, key: &[u8]) -> bool {
        self.shard_for(key).read().contains_key(key)
    }

    /// Applies `f` to the value under the shard's read lock.
    pub fn get_with<R>(&self, key: &[u8], f: impl FnOnce(&V) -> R) -> Option<R> {
        self.shard_for(key).read().get(key).map(f)
    }

    /// Applies `f` to the value in place under the shard's write lock.
    pub fn update<R>(&self, key: &[u8], f: impl FnOnce(&mut V) -> R) -> Option<R> {
        self.shard_for(key).write().get_mut(key).map(f)
    }

    /// Applies `f` to the value for `key`, inserting `default()` first when
    /// the key is absent.
    pub fn upsert<R>(&self, key: Bytes, default: impl FnOnce() -> V, f: impl FnOnce(&mut V) -> R) -> R {
        let mut shard = self.shard_for(&key).write();
        if !shard.contains_key(&key) {
            shard.insert(key.clone(), default());
            self.size.fetch_add(1, Ordering::Relaxed);
        }
        f(shard.get_mut(&key).expect("entry just ensured"))
    }

    pub fn remove(&self, key: &[u8]) -> Option<V> {
        let mut shard = self.shard_for(key).write();
        let removed = shard.remove(key);
        if removed.is_some() {
            self.size.fetch_sub(1, Ordering::Relaxed);
        }
        removed
    }

    /// Visits every entry. Returning `false` from the callback stops the
    /// walk within the current shard and skips the remaining shards.
    pub fn for_each(&self, mut f: impl FnMut(&Bytes, &V) -> bool) {
        for shard in &self.shards {
            let guard = shard.read();
            for (key, value) in guard.iter() {
                if !f(key, value) {
                    return;
                }
            }
        }
    }

    pub fn keys(&self) -> Vec<Bytes> {
        let mut keys = Vec::with_capacity(self.len());
        self.for_each(|key, _| {
            keys.push(key.clone());
            true
        });
        keys
    }

    /// Samples `count` keys with replacement. May return fewer only when the
    /// map is empty.
    pub fn random_keys(&self, count: usize) -> Vec<Bytes> {
        if self.len() == 0 {
            return Vec::new();
        }
        let mut rng = SmallRng::from_entropy();
        let mut keys = Vec::with_capacity(count);
        let max_attempts = count.saturating_mul(8) + self.shards.len();
        let mut attempts = 0;
        while keys.len() < count && attempts < max_attempts {
            attempts += 1;
            if let Some(key) = self.random_key_once(&mut rng) {
                keys.push(key);
            }
        }
        keys
    }

    /// Samples up to `count` distinct keys without replacement. The rejection
    /// loop is bounded; any shortfall is filled from a full key walk so the
    /// call terminates regardless of shard distribution.
    pub fn random_distinct_keys(&self, count: usize) -> Vec<Bytes> {
        if count >= self.len() {
            return self.keys();
        }
        let mut rng = SmallRng::from_entropy();
        let mut seen: HashMap<Bytes, ()> = HashMap::with_capacity(count);
        let max_attempts = self.len().saturating_mul(4).max(count);
        let mut attempts = 0;
        while seen.len() < count && attempts < max_attempts {
            attempts += 1;
            if let Some(key) = self.random_key_once(&mut rng) {
                seen.insert(key, ());
            }
        }
        if seen.len() < count {
            self.for_each(|key, _| {
                if seen.len() >= count {
                    return false;
                }
                seen.insert(key.clone(), ());
                true
            });
        }
        seen.into_keys().collect()
    }

    fn random_key_once(&self, rng: &mut SmallRng) -> Option<Bytes> {
        let shard = &self.shards[rng.gen_range(0..self.shards.len())];
        let guard = shard.read();
        if guard.is_empty() {
            return None;
        }
        let nth = rng.gen_range(0..guard.len());
        guard.keys().nth(nth).cloned()
    }

    pub fn clear(&self) {
        for shard in &self.shards {
            shard.write().clear();
        }
        self.size.store(0, Ordering::Relaxed);
    }
}
