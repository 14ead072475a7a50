// src/core/mod.rs

//! The central module containing the core logic and data structures of OpalDB.

pub mod cluster;
pub mod commands;
pub mod database;
pub mod errors;
pub mod locking;
pub mod persistence;
pub mod protocol;
pub mod pubsub;
pub mod replication;
pub mod storage;
pub mod tasks;

use crate::connection::Session;
use async_trait::async_trait;
use bytes::Bytes;

pub use errors::OpalDBError;
pub use protocol::RespFrame;

/// A parsed command line: the command name followed by its arguments, each a
/// binary-safe string.
pub type CmdLine = Vec<Bytes>;

/// Builds a command line from string literals.
pub fn cmd_line(parts: &[&str]) -> CmdLine {
    parts
        .iter()
        .map(|p| Bytes::copy_from_slice(p.as_bytes()))
        .collect()
}

/// Prefixes `args` with a command name, rebuilding the full line that a
/// handler received without its name.
pub fn with_name(name: &str, args: &[Bytes]) -> CmdLine {
    let mut line = Vec::with_capacity(args.len() + 1);
    line.push(Bytes::copy_from_slice(name.as_bytes()));
    line.extend_from_slice(args);
    line
}

/// The dispatch surface a connection talks to: either the standalone
/// multi-database engine or the cluster coordinator wrapping one.
///
/// `execute` returns `None` when the handler has already written its reply
/// (or must not reply at all, as for `REPLCONF ACK`).
#[async_trait]
pub trait DataEngine: Send + Sync {
    async fn execute(&self, session: &mut Session, line: CmdLine) -> Option<RespFrame>;
    async fn after_client_close(&self, session: &mut Session);
    async fn close(&self);
}
