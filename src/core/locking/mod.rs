// src/core/locking/mod.rs

pub mod stripe;
pub use stripe::{BatchGuard, StripeLock};
