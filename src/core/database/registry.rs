// src/core/database/registry.rs

//! The command table: each entry carries the executor, the key-preparation
//! function (declared read and write key sets), an optional undo generator,
//! the arity and the behavior flags.

use super::single::SingleDb;
use crate::core::{CmdLine, OpalDBError, RespFrame, commands};
use bitflags::bitflags;
use bytes::Bytes;
use once_cell::sync::Lazy;
use std::collections::HashMap;

bitflags! {
    /// Flags describing a command's behavior.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct CommandFlags: u32 {
        /// The command modifies the dataset.
        const WRITE    = 1 << 0;
        /// The command only reads data; replicas accept it from any client.
        const READONLY = 1 << 1;
    }
}

/// The outcome of one executor call: the client reply plus the command lines
/// to propagate into the persistence queue and the replication stream.
pub struct ExecResult {
    pub reply: RespFrame,
    pub mutations: Vec<CmdLine>,
}

impl ExecResult {
    /// A pure read or a write that ended up not changing anything.
    pub fn reply(reply: RespFrame) -> Self {
        Self {
            reply,
            mutations: Vec::new(),
        }
    }

    /// A reply accompanied by one propagated command line.
    pub fn with_mutation(reply: RespFrame, line: CmdLine) -> Self {
        Self {
            reply,
            mutations: vec![line],
        }
    }
}

/// Executes the command. `args` excludes the command name.
pub type ExecFn = fn(&SingleDb, &[Bytes]) -> Result<ExecResult, OpalDBError>;

/// Declares the `(read_keys, write_keys)` a command line will touch.
pub type PrepareFn = fn(&[Bytes]) -> (Vec<Bytes>, Vec<Bytes>);

/// Produces command lines that, replayed in reverse order, undo the effect of
/// the command about to run. Pure: inspects state, mutates nothing.
pub type UndoFn = fn(&SingleDb, &[Bytes]) -> Vec<CmdLine>;

pub struct CommandSpec {
    pub name: &'static str,
    pub executor: ExecFn,
    pub prepare: Option<PrepareFn>,
    pub undo: Option<UndoFn>,
    /// Positive: exact argument count including the command name.
    /// Negative: at least `|arity|` arguments including the command name.
    pub arity: i32,
    pub flags: CommandFlags,
}

impl CommandSpec {
    pub fn arity_matches(&self, line_len: usize) -> bool {
        if self.arity >= 0 {
            line_len == self.arity as usize
        } else {
            line_len >= (-self.arity) as usize
        }
    }
}

pub type Registry = HashMap<&'static str, CommandSpec>;

static REGISTRY: Lazy<Registry> = Lazy::new(|| {
    let mut table = Registry::new();
    commands::strings::register(&mut table);
    commands::lists::register(&mut table);
    commands::hashes::register(&mut table);
    commands::sets::register(&mut table);
    commands::zsets::register(&mut table);
    commands::keys::register(&mut table);
    commands::sys::register(&mut table);
    table
});

pub fn lookup(name: &str) -> Option<&'static CommandSpec> {
    REGISTRY.get(name)
}

/// Whether the named command is registered and flagged read-only. Unknown
/// commands count as writes, so the replica gate rejects them.
pub fn is_read_only(name: &str) -> bool {
    REGISTRY
        .get(name)
        .is_some_and(|spec| spec.flags.contains(CommandFlags::READONLY))
}

/// The declared `(read_keys, write_keys)` for a full command line, or empty
/// sets when the command is unknown or declares no prepare.
pub fn related_keys(line: &CmdLine) -> (Vec<Bytes>, Vec<Bytes>) {
    if line.is_empty() {
        return (Vec::new(), Vec::new());
    }
    let name = String::from_utf8_lossy(&line[0]).to_lowercase();
    match REGISTRY.get(name.as_str()).and_then(|spec| spec.prepare) {
        Some(prepare) => prepare(&line[1..]),
        None => (Vec::new(), Vec::new()),
    }
}
