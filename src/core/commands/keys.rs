// src/core/commands/keys.rs

//! Key-space commands: existence, deletion, renaming, TTL management and the
//! version probe used by cluster WATCH.

use super::helpers::*;
use crate::core::database::SingleDb;
use crate::core::database::registry::{CommandFlags, CommandSpec, ExecResult, Registry};
use crate::core::persistence::marshal;
use crate::core::{OpalDBError, RespFrame, with_name};
use bytes::Bytes;
use std::time::{Duration, SystemTime};

pub fn register(table: &mut Registry) {
    let entries = [
        CommandSpec {
            name: "del",
            executor: exec_del,
            prepare: Some(write_all_keys),
            undo: Some(undo_all_keys),
            arity: -2,
            flags: CommandFlags::WRITE,
        },
        CommandSpec {
            name: "exists",
            executor: exec_exists,
            prepare: Some(read_all_keys),
            undo: None,
            arity: -2,
            flags: CommandFlags::READONLY,
        },
        CommandSpec {
            name: "type",
            executor: exec_type,
            prepare: Some(read_first_key),
            undo: None,
            arity: 2,
            flags: CommandFlags::READONLY,
        },
        CommandSpec {
            name: "keys",
            executor: exec_keys,
            prepare: Some(no_keys),
            undo: None,
            arity: 2,
            flags: CommandFlags::READONLY,
        },
        CommandSpec {
            name: "randomkey",
            executor: exec_randomkey,
            prepare: Some(no_keys),
            undo: None,
            arity: 1,
            flags: CommandFlags::READONLY,
        },
        CommandSpec {
            name: "rename",
            executor: exec_rename,
            prepare: Some(write_first_two_keys),
            undo: Some(undo_first_two_keys),
            arity: 3,
            flags: CommandFlags::WRITE,
        },
        CommandSpec {
            name: "expire",
            executor: exec_expire,
            prepare: Some(write_first_key),
            undo: Some(undo_ttl),
            arity: 3,
            flags: CommandFlags::WRITE,
        },
        CommandSpec {
            name: "pexpire",
            executor: exec_pexpire,
            prepare: Some(write_first_key),
            undo: Some(undo_ttl),
            arity: 3,
            flags: CommandFlags::WRITE,
        },
        CommandSpec {
            name: "expireat",
            executor: exec_expireat,
            prepare: Some(write_first_key),
            undo: Some(undo_ttl),
            arity: 3,
            flags: CommandFlags::WRITE,
        },
        CommandSpec {
            name: "pexpireat",
            executor: exec_pexpireat,
            prepare: Some(write_first_key),
            undo: Some(undo_ttl),
            arity: 3,
            flags: CommandFlags::WRITE,
        },
        CommandSpec {
            name: "ttl",
            executor: exec_ttl,
            prepare: Some(read_first_key),
            undo: None,
            arity: 2,
            flags: CommandFlags::READONLY,
        },
        CommandSpec {
            name: "pttl",
            executor: exec_pttl,
            prepare: Some(read_first_key),
            undo: None,
            arity: 2,
            flags: CommandFlags::READONLY,
        },
        CommandSpec {
            name: "persist",
            executor: exec_persist,
            prepare: Some(write_first_key),
            undo: Some(undo_ttl),
            arity: 2,
            flags: CommandFlags::WRITE,
        },
        CommandSpec {
            name: "getver",
            executor: exec_getver,
            prepare: Some(read_first_key),
            undo: None,
            arity: 2,
            flags: CommandFlags::READONLY,
        },
    ];
    for spec in entries {
        table.insert(spec.name, spec);
    }
}

fn exec_del(db: &SingleDb, args: &[Bytes]) -> Result<ExecResult, OpalDBError> {
    let removed = db.remove_keys(args);
    if removed > 0 {
        Ok(ExecResult::with_mutation(
            RespFrame::Integer(removed as i64),
            with_name("DEL", args),
        ))
    } else {
        Ok(ExecResult::reply(RespFrame::Integer(0)))
    }
}

fn exec_exists(db: &SingleDb, args: &[Bytes]) -> Result<ExecResult, OpalDBError> {
    let count = args.iter().filter(|key| db.contains_key(key)).count();
    Ok(ExecResult::reply(RespFrame::Integer(count as i64)))
}

fn exec_type(db: &SingleDb, args: &[Bytes]) -> Result<ExecResult, OpalDBError> {
    let name = db
        .get_entry(&args[0])
        .map_or("none", |value| value.type_name());
    Ok(ExecResult::reply(RespFrame::SimpleString(name.into())))
}

fn exec_keys(db: &SingleDb, args: &[Bytes]) -> Result<ExecResult, OpalDBError> {
    let pattern = args[0].clone();
    let mut matches = Vec::new();
    for key in db.keys() {
        if db.contains_key(&key) && glob_match(&pattern, &key) {
            matches.push(RespFrame::BulkString(key));
        }
    }
    Ok(ExecResult::reply(RespFrame::Array(matches)))
}

fn exec_randomkey(db: &SingleDb, _args: &[Bytes]) -> Result<ExecResult, OpalDBError> {
    let reply = match db.random_keys(1).into_iter().next() {
        Some(key) => RespFrame::BulkString(key),
        None => RespFrame::Null,
    };
    Ok(ExecResult::reply(reply))
}

fn exec_rename(db: &SingleDb, args: &[Bytes]) -> Result<ExecResult, OpalDBError> {
    let Some(value) = db.get_entry(&args[0]) else {
        return Ok(ExecResult::reply(RespFrame::Error(
            "ERR no such key".into(),
        )));
    };
    let ttl = db.ttl_of(&args[0]);
    db.remove(&args[0]);
    db.put(args[1].clone(), value);
    match ttl {
        Some(at) => db.expire_at(args[1].clone(), at),
        None => {
            db.persist(&args[1]);
        }
    }
    Ok(ExecResult::with_mutation(
        RespFrame::ok(),
        with_name("RENAME", args),
    ))
}

fn apply_expiry(db: &SingleDb, args: &[Bytes], at: SystemTime) -> Result<ExecResult, OpalDBError> {
    if !db.contains_key(&args[0]) {
        return Ok(ExecResult::reply(RespFrame::Integer(0)));
    }
    db.expire_at(args[0].clone(), at);
    // All four expire variants propagate as an absolute PEXPIREAT so replay
    // after a restart preserves the remaining TTL.
    Ok(ExecResult::with_mutation(
        RespFrame::Integer(1),
        marshal::pexpire_at_cmd(&args[0], at),
    ))
}

fn exec_expire(db: &SingleDb, args: &[Bytes]) -> Result<ExecResult, OpalDBError> {
    let secs = parse_i64(&args[1])?;
    apply_expiry(db, args, SystemTime::now() + Duration::from_secs(secs.max(0) as u64))
}

fn exec_pexpire(db: &SingleDb, args: &[Bytes]) -> Result<ExecResult, OpalDBError> {
    let ms = parse_i64(&args[1])?;
    apply_expiry(db, args, SystemTime::now() + Duration::from_millis(ms.max(0) as u64))
}

fn exec_expireat(db: &SingleDb, args: &[Bytes]) -> Result<ExecResult, OpalDBError> {
    let secs = parse_i64(&args[1])?;
    apply_expiry(db, args, marshal::system_time_from_ms(secs.saturating_mul(1000)))
}

fn exec_pexpireat(db: &SingleDb, args: &[Bytes]) -> Result<ExecResult, OpalDBError> {
    let ms = parse_i64(&args[1])?;
    apply_expiry(db, args, marshal::system_time_from_ms(ms))
}

fn remaining(db: &SingleDb, key: &[u8]) -> Option<Option<Duration>> {
    if !db.contains_key(key) {
        return None;
    }
    Some(
        db.ttl_of(key)
            .and_then(|at| at.duration_since(SystemTime::now()).ok()),
    )
}

fn exec_ttl(db: &SingleDb, args: &[Bytes]) -> Result<ExecResult, OpalDBError> {
    let reply = match remaining(db, &args[0]) {
        None => RespFrame::Integer(-2),
        Some(None) => RespFrame::Integer(-1),
        Some(Some(left)) => RespFrame::Integer(left.as_secs() as i64),
    };
    Ok(ExecResult::reply(reply))
}

fn exec_pttl(db: &SingleDb, args: &[Bytes]) -> Result<ExecResult, OpalDBError> {
    let reply = match remaining(db, &args[0]) {
        None => RespFrame::Integer(-2),
        Some(None) => RespFrame::Integer(-1),
        Some(Some(left)) => RespFrame::Integer(left.as_millis() as i64),
    };
    Ok(ExecResult::reply(reply))
}

fn exec_persist(db: &SingleDb, args: &[Bytes]) -> Result<ExecResult, OpalDBError> {
    if db.contains_key(&args[0]) && db.persist(&args[0]) {
        Ok(ExecResult::with_mutation(
            RespFrame::Integer(1),
            with_name("PERSIST", args),
        ))
    } else {
        Ok(ExecResult::reply(RespFrame::Integer(0)))
    }
}

/// The per-key version counter, relayed by cluster WATCH to the key's owner.
fn exec_getver(db: &SingleDb, args: &[Bytes]) -> Result<ExecResult, OpalDBError> {
    Ok(ExecResult::reply(RespFrame::Integer(
        db.version_of(&args[0]) as i64,
    )))
}

/// Glob matching over raw bytes, supporting `*` and `?`.
pub fn glob_match(pattern: &[u8], text: &[u8]) -> bool {
    match (pattern.first(), text.first()) {
        (None, None) => true,
        (Some(b'*'), _) => {
            glob_match(&pattern[1..], text)
                || (!text.is_empty() && glob_match(pattern, &text[1..]))
        }
        (Some(b'?'), Some(_)) => glob_match(&pattern[1..], &text[1..]),
        (Some(p), Some(t)) if p == t => glob_match(&pattern[1..], &text[1..]),
        _ => false,
    }
}
