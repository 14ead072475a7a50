// src/core/replication/mod.rs

//! Asynchronous master→replica replication.
//!
//! The master half answers the REPLCONF/PSYNC handshake, ships a snapshot
//! for full sync and then streams every propagated write. The replica half
//! dials the master, performs the handshake, installs the snapshot and
//! applies the command stream, with a 1 Hz cron acknowledging progress and
//! reconnecting on silence.

pub mod master;
pub mod replica;

pub use master::ReplicaRegistry;
pub use replica::ReplicationState;
