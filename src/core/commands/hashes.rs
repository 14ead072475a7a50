// src/core/commands/hashes.rs

//! Hash commands.

use super::helpers::*;
use crate::core::database::SingleDb;
use crate::core::database::registry::{CommandFlags, CommandSpec, ExecResult, Registry};
use crate::core::{OpalDBError, RespFrame, with_name};
use bytes::Bytes;

pub fn register(table: &mut Registry) {
    let entries = [
        CommandSpec {
            name: "hset",
            executor: exec_hset,
            prepare: Some(write_first_key),
            undo: Some(undo_first_key),
            arity: -4,
            flags: CommandFlags::WRITE,
        },
        CommandSpec {
            name: "hmset",
            executor: exec_hmset,
            prepare: Some(write_first_key),
            undo: Some(undo_first_key),
            arity: -4,
            flags: CommandFlags::WRITE,
        },
        CommandSpec {
            name: "hget",
            executor: exec_hget,
            prepare: Some(read_first_key),
            undo: None,
            arity: 3,
            flags: CommandFlags::READONLY,
        },
        CommandSpec {
            name: "hdel",
            executor: exec_hdel,
            prepare: Some(write_first_key),
            undo: Some(undo_first_key),
            arity: -3,
            flags: CommandFlags::WRITE,
        },
        CommandSpec {
            name: "hexists",
            executor: exec_hexists,
            prepare: Some(read_first_key),
            undo: None,
            arity: 3,
            flags: CommandFlags::READONLY,
        },
        CommandSpec {
            name: "hlen",
            executor: exec_hlen,
            prepare: Some(read_first_key),
            undo: None,
            arity: 2,
            flags: CommandFlags::READONLY,
        },
        CommandSpec {
            name: "hgetall",
            executor: exec_hgetall,
            prepare: Some(read_first_key),
            undo: None,
            arity: 2,
            flags: CommandFlags::READONLY,
        },
        CommandSpec {
            name: "hkeys",
            executor: exec_hkeys,
            prepare: Some(read_first_key),
            undo: None,
            arity: 2,
            flags: CommandFlags::READONLY,
        },
        CommandSpec {
            name: "hvals",
            executor: exec_hvals,
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

fn set_fields(db: &SingleDb, args: &[Bytes]) -> Result<usize, OpalDBError> {
    if args.len() % 2 != 1 {
        return Err(OpalDBError::SyntaxError);
    }
    let added = update_hash(db, &args[0], true, |hash| {
        let mut added = 0;
        for pair in args[1..].chunks(2) {
            if hash.insert(pair[0].clone(), pair[1].clone()).is_none() {
                added += 1;
            }
        }
        added
    })?
    .unwrap_or(0);
    Ok(added)
}

fn exec_hset(db: &SingleDb, args: &[Bytes]) -> Result<ExecResult, OpalDBError> {
    let added = set_fields(db, args)?;
    Ok(ExecResult::with_mutation(
        RespFrame::Integer(added as i64),
        with_name("HSET", args),
    ))
}

fn exec_hmset(db: &SingleDb, args: &[Bytes]) -> Result<ExecResult, OpalDBError> {
    set_fields(db, args)?;
    Ok(ExecResult::with_mutation(
        RespFrame::ok(),
        with_name("HMSET", args),
    ))
}

fn exec_hget(db: &SingleDb, args: &[Bytes]) -> Result<ExecResult, OpalDBError> {
    let value = with_hash(db, &args[0], |hash| hash.get(&args[1]).cloned())?.flatten();
    Ok(ExecResult::reply(match value {
        Some(v) => RespFrame::BulkString(v),
        None => RespFrame::Null,
    }))
}

fn exec_hdel(db: &SingleDb, args: &[Bytes]) -> Result<ExecResult, OpalDBError> {
    let removed = update_hash(db, &args[0], false, |hash| {
        args[1..]
            .iter()
            .filter(|field| hash.shift_remove(*field).is_some())
            .count()
    })?
    .unwrap_or(0);
    cleanup_if_empty(db, &args[0]);
    if removed > 0 {
        Ok(ExecResult::with_mutation(
            RespFrame::Integer(removed as i64),
            with_name("HDEL", args),
        ))
    } else {
        Ok(ExecResult::reply(RespFrame::Integer(0)))
    }
}

fn exec_hexists(db: &SingleDb, args: &[Bytes]) -> Result<ExecResult, OpalDBError> {
    let exists = with_hash(db, &args[0], |hash| hash.contains_key(&args[1]))?.unwrap_or(false);
    Ok(ExecResult::reply(RespFrame::Integer(exists as i64)))
}

fn exec_hlen(db: &SingleDb, args: &[Bytes]) -> Result<ExecResult, OpalDBError> {
    let len = with_hash(db, &args[0], |hash| hash.len())?.unwrap_or(0);
    Ok(ExecResult::reply(RespFrame::Integer(len as i64)))
}

fn exec_hgetall(db: &SingleDb, args: &[Bytes]) -> Result<ExecResult, OpalDBError> {
    let pairs = with_hash(db, &args[0], |hash| {
        let mut flat = Vec::with_capacity(hash.len() * 2);
        for (field, value) in hash {
            flat.push(RespFrame::BulkString(field.clone()));
            flat.push(RespFrame::BulkString(value.clone()));
        }
        flat
    })?
    .unwrap_or_default();
    Ok(ExecResult::reply(RespFrame::Array(pairs)))
}

fn exec_hkeys(db: &SingleDb, args: &[Bytes]) -> Result<ExecResult, OpalDBError> {
    let fields = with_hash(db, &args[0], |hash| {
        hash.keys().cloned().map(RespFrame::BulkString).collect()
    })?
    .unwrap_or_default();
    Ok(ExecResult::reply(RespFrame::Array(fields)))
}

fn exec_hvals(db: &SingleDb, args: &[Bytes]) -> Result<ExecResult, OpalDBError> {
    let values = with_hash(db, &args[0], |hash| {
        hash.values().cloned().map(RespFrame::BulkString).collect()
    })?
    .unwrap_or_default();
    Ok(ExecResult::reply(RespFrame::Array(values)))
}
