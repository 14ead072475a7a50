// src/core/storage/value.rs

//! Defines `DataValue`, the tagged union every key in the keyspace maps to.

use super::zset::SortedSet;
use bytes::Bytes;
use indexmap::IndexMap;
use std::collections::{HashSet, VecDeque};

/// The five value shapes an entry can hold. Persistence, replication and
/// rewrite all switch on this tag.
#[derive(Debug, Clone, PartialEq)]
pub enum DataValue {
    String(Bytes),
    List(VecDeque<Bytes>),
    Hash(IndexMap<Bytes, Bytes>),
    Set(HashSet<Bytes>),
    SortedSet(SortedSet),
}

impl DataValue {
    /// The type name reported by the TYPE command.
    pub fn type_name(&self) -> &'static str {
        match self {
            DataValue::String(_) => "string",
            DataValue::List(_) => "list",
            DataValue::Hash(_) => "hash",
            DataValue::Set(_) => "set",
            DataValue::SortedSet(_) => "zset",
        }
    }
}
