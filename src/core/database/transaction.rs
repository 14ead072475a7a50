// src/core/database/transaction.rs

//! Optimistic MULTI/EXEC/WATCH transactions.
//!
//! Commands queued between MULTI and EXEC run back-to-back while holding the
//! batch lock over every declared key; the version check against the watch
//! map decides whether the batch runs at all, and per-command undo logs roll
//! back a partially executed batch.

use super::registry;
use super::single::SingleDb;
use crate::connection::Session;
use crate::core::{CmdLine, OpalDBError, RespFrame};
use bytes::Bytes;
use std::collections::HashMap;

pub fn start_multi(session: &mut Session) -> RespFrame {
    if session.multi {
        return RespFrame::Error("ERR MULTI calls cannot be nested".into());
    }
    session.multi = true;
    RespFrame::ok()
}

pub fn discard_multi(session: &mut Session) -> RespFrame {
    if !session.multi {
        return RespFrame::Error("ERR DISCARD without MULTI".into());
    }
    session.reset_multi();
    RespFrame::ok()
}

/// Samples the current version of each key into the session's watch map.
pub fn watch(db: &SingleDb, session: &mut Session, keys: &[Bytes]) -> RespFrame {
    if session.multi {
        return RespFrame::Error("ERR WATCH inside MULTI is not allowed".into());
    }
    for key in keys {
        session.watching.insert(key.clone(), db.version_of(key));
    }
    RespFrame::ok()
}

/// Validates and queues one command while the session is in MULTI. Queueing
/// failures are recorded; the session stays in MULTI and EXEC will abort.
pub fn enqueue(session: &mut Session, line: CmdLine) -> RespFrame {
    let name = String::from_utf8_lossy(&line[0]).to_lowercase();
    let error = match registry::lookup(&name) {
        None => Some(OpalDBError::UnknownCommand(name)),
        Some(spec) if spec.prepare.is_none() => Some(OpalDBError::NotAllowedInMulti(name)),
        Some(spec) if !spec.arity_matches(line.len()) => {
            Some(OpalDBError::WrongArgumentCount(name))
        }
        Some(_) => None,
    };
    if let Some(e) = error {
        session.tx_errors.push(e.to_resp_string());
        return e.into();
    }
    session.queue.push(line);
    RespFrame::queued()
}

/// EXEC as issued on a connection: drains the session's transaction state and
/// runs the queued batch.
pub async fn exec_in_session(db: &SingleDb, session: &mut Session) -> RespFrame {
    if !session.multi {
        return RespFrame::Error("ERR EXEC without MULTI".into());
    }
    let had_errors = !session.tx_errors.is_empty();
    let watching = std::mem::take(&mut session.watching);
    let lines = std::mem::take(&mut session.queue);
    session.reset_multi();
    if had_errors {
        return OpalDBError::ExecAborted.into();
    }
    exec_multi(db, &watching, &lines).await
}

/// Runs a queued batch under the union of its declared key sets.
///
/// Watched keys join the read set so no other writer can slip between the
/// optimistic check and the batch body. On a version mismatch the empty
/// array reply signals the conflict; on a mid-batch error the accumulated
/// undo logs replay in reverse.
pub async fn exec_multi(
    db: &SingleDb,
    watching: &HashMap<Bytes, u32>,
    lines: &[CmdLine],
) -> RespFrame {
    let mut read_keys: Vec<Bytes> = Vec::new();
    let mut write_keys: Vec<Bytes> = Vec::new();
    for line in lines {
        let (reads, writes) = registry::related_keys(line);
        read_keys.extend(reads);
        write_keys.extend(writes);
    }
    read_keys.extend(watching.keys().cloned());

    let _guard = db.locker.lock_read_write(&read_keys, &write_keys).await;

    if watching_updated(db, watching) {
        return RespFrame::empty_array();
    }

    let mut replies = Vec::with_capacity(lines.len());
    let mut undo_logs: Vec<Vec<CmdLine>> = Vec::with_capacity(lines.len());
    let mut aborted = false;
    for line in lines {
        undo_logs.push(db.undo_logs(line));
        let reply = db.execute_with_lock(line).await;
        if reply.is_error() {
            aborted = true;
            undo_logs.pop();
            break;
        }
        replies.push(reply);
    }

    if !aborted {
        db.incr_versions(&write_keys);
        return RespFrame::Array(replies);
    }

    for undo in undo_logs.iter().rev() {
        for line in undo {
            db.execute_with_lock(line).await;
        }
    }
    OpalDBError::ExecAborted.into()
}

fn watching_updated(db: &SingleDb, watching: &HashMap<Bytes, u32>) -> bool {
    watching
        .iter()
        .any(|(key, version)| db.version_of(key) != *version)
}
