// src/core/storage/mod.rs

pub mod dict;
pub mod value;
pub mod zset;

pub use dict::ConcurrentDict;
pub use value::DataValue;
pub use zset::SortedSet;
