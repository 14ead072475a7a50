// src/core/storage/zset.rs

//! A sorted set pairing a member→score map with an ordered score index.
//!
//! Lookups by member are O(1); ordered traversal and score-range queries go
//! through the `BTreeSet` index keyed by `(score, member)`, which also gives
//! the canonical tie-break ordering (score first, then member bytes).

use bytes::Bytes;
use indexmap::IndexMap;
use ordered_float::OrderedFloat;
use std::collections::BTreeSet;

#[derive(Debug, Clone, PartialEq, Default)]
pub struct SortedSet {
    members: IndexMap<Bytes, f64>,
    index: BTreeSet<(OrderedFloat<f64>, Bytes)>,
}

impl SortedSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Inserts or updates a member. Returns `true` when the member is new.
    pub fn insert(&mut self, member: Bytes, score: f64) -> bool {
        match self.members.insert(member.clone(), score) {
            Some(old) => {
                self.index.remove(&(OrderedFloat(old), member.clone()));
                self.index.insert((OrderedFloat(score), member));
                false
            }
            None => {
                self.index.insert((OrderedFloat(score), member));
                true
            }
        }
    }

    pub fn score(&self, member: &[u8]) -> Option<f64> {
        self.members.get(member).copied()
    }

    pub fn remove(&mut self, member: &[u8]) -> bool {
        match self.members.shift_remove(member) {
            Some(score) => {
                self.index
                    .remove(&(OrderedFloat(score), Bytes::copy_from_slice(member)));
                true
            }
            None => false,
        }
    }

    /// Members within the inclusive rank range `[start, stop]`, supporting
    /// negative indices counted from the tail.
    pub fn range(&self, start: i64, stop: i64) -> Vec<(Bytes, f64)> {
        let n = self.len() as i64;
        let clamp = |i: i64| -> i64 {
            if i < 0 { (n + i).max(0) } else { i.min(n - 1) }
        };
        if n == 0 {
            return Vec::new();
        }
        let (start, stop) = (clamp(start), clamp(stop));
        if start > stop {
            return Vec::new();
        }
        self.index
            .iter()
            .skip(start as usize)
            .take((stop - start + 1) as usize)
            .map(|(score, member)| (member.clone(), score.0))
            .collect()
    }

    /// Number of members with score in the inclusive `[min, max]` interval.
    pub fn count_in_score_range(&self, min: f64, max: f64) -> usize {
        self.index
            .iter()
            .filter(|(score, _)| score.0 >= min && score.0 <= max)
            .count()
    }

    /// Iterates `(member, score)` in score order.
    pub fn iter_ordered(&self) -> impl Iterator<Item = (&Bytes, f64)> {
        self.index.iter().map(|(score, member)| (member, score.0))
    }
}
