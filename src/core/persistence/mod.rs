// src/core/persistence/mod.rs

//! The persistence pipeline: the append-only file and its rewrite protocol,
//! plus the binary OPDB snapshot format.

pub mod aof;
pub mod marshal;
pub mod rewrite;
pub mod snapshot;

use crate::core::CmdLine;

/// One propagated mutation: the command line and the logical database it ran
/// against. Flows from command dispatch into the AOF worker and on to any
/// connected replicas.
#[derive(Debug, Clone)]
pub struct WorkUnit {
    pub db_index: usize,
    pub line: CmdLine,
}

/// Capacity of the propagation queue. Enqueueing awaits when the queue is
/// full, backpressuring the command path instead of dropping payloads.
pub const PROPAGATION_QUEUE_SIZE: usize = 1 << 16;

pub use aof::AofHandler;
