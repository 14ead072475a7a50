// src/core/locking/stripe.rs

//! A striped read/write lock over string keys.
//!
//! Instead of storing a mutex per entry, keys hash onto a fixed, power-of-two
//! array of `RwLock`s. Batch acquisition always walks the deduplicated stripe
//! indices in ascending order, so any two holders contending for overlapping
//! key sets acquire in the same global order and cannot deadlock. The
//! composite guard releases stripes in the reverse order on drop.

use bytes::Bytes;
use std::collections::BTreeSet;
use tokio::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

const FNV_OFFSET_BASIS: u32 = 2_166_136_261;
const FNV_PRIME: u32 = 16_777_619;

/// 32-bit FNV-1a. Operates on raw bytes so binary-safe keys hash correctly.
fn fnv32(key: &[u8]) -> u32 {
    let mut hash = FNV_OFFSET_BASIS;
    for &b in key {
        hash = hash.wrapping_mul(FNV_PRIME);
        hash ^= b as u32;
    }
    hash
}

enum StripeGuard<'a> {
    Read(#[allow(dead_code)] RwLockReadGuard<'a, ()>),
    Write(#[allow(dead_code)] RwLockWriteGuard<'a, ()>),
}

/// Holds every stripe guard acquired by a batch operation. Dropping it
/// releases the stripes in reverse acquisition order.
pub struct BatchGuard<'a> {
    guards: Vec<StripeGuard<'a>>,
}

impl Drop for BatchGuard<'_> {
    fn drop(&mut self) {
        while self.guards.pop().is_some() {}
    }
}

/// A fixed array of read/write mutexes keyed by string hash.
#[derive(Debug)]
pub struct StripeLock {
    stripes: Vec<RwLock<()>>,
}

impl StripeLock {
    /// Creates a stripe lock with at least `capacity` stripes, rounded up to
    /// the next power of two so the hash can be masked instead of taken
    /// modulo.
    pub fn new(capacity: usize) -> Self {
        let n = capacity.max(1).next_power_of_two();
        Self {
            stripes: (0..n).map(|_| RwLock::new(())).collect(),
        }
    }

    fn index_of(&self, key: &[u8]) -> usize {
        (fnv32(key) as usize) & (self.stripes.len() - 1)
    }

    /// Acquires the exclusive lock covering a single key.
    pub async fn lock_key(&self, key: &[u8]) -> BatchGuard<'_> {
        let guard = self.stripes[self.index_of(key)].write().await;
        BatchGuard {
            guards: vec![StripeGuard::Write(guard)],
        }
    }

    /// Acquires the shared lock covering a single key.
    pub async fn rlock_key(&self, key: &[u8]) -> BatchGuard<'_> {
        let guard = self.stripes[self.index_of(key)].read().await;
        BatchGuard {
            guards: vec![StripeGuard::Read(guard)],
        }
    }

    /// Acquires exclusive locks for a set of keys, in ascending stripe order.
    pub async fn lock_keys(&self, keys: &[Bytes]) -> BatchGuard<'_> {
        self.lock_read_write(&[], keys).await
    }

    /// Acquires shared locks for a set of keys, in ascending stripe order.
    pub async fn rlock_keys(&self, keys: &[Bytes]) -> BatchGuard<'_> {
        self.lock_read_write(keys, &[]).await
    }

    /// Acquires the combined lock set for disjoint read and write key sets.
    /// A stripe appearing in the write set is acquired exclusively even if a
    /// read key also maps onto it.
    pub async fn lock_read_write(&self, read_keys: &[Bytes], write_keys: &[Bytes]) -> BatchGuard<'_> {
        let write_indices: BTreeSet<usize> =
            write_keys.iter().map(|k| self.index_of(k)).collect();
        let mut all_indices: BTreeSet<usize> =
            read_keys.iter().map(|k| self.index_of(k)).collect();
        all_indices.extend(write_indices.iter().copied());

        let mut guards = Vec::with_capacity(all_indices.len());
        for index in all_indices {
            if write_indices.contains(&index) {
                guards.push(StripeGuard::Write(self.stripes[index].write().await));
            } else {
                guards.push(StripeGuard::Read(self.stripes[index].read().await));
            }
        }
        BatchGuard { guards }
    }
}
