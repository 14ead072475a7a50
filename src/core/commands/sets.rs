// src/core/commands/sets.rs

//! Set commands.

use super::helpers::*;
use crate::core::database::SingleDb;
use crate::core::database::registry::{CommandFlags, CommandSpec, ExecResult, Registry};
use crate::core::{OpalDBError, RespFrame, with_name};
use bytes::Bytes;

pub fn register(table: &mut Registry) {
    let entries = [
        CommandSpec {
            name: "sadd",
            executor: exec_sadd,
            prepare: Some(write_first_key),
            undo: Some(undo_first_key),
            arity: -3,
            flags: CommandFlags::WRITE,
        },
        CommandSpec {
            name: "srem",
            executor: exec_srem,
            prepare: Some(write_first_key),
            undo: Some(undo_first_key),
            arity: -3,
            flags: CommandFlags::WRITE,
        },
        CommandSpec {
            name: "sismember",
            executor: exec_sismember,
            prepare: Some(read_first_key),
            undo: None,
            arity: 3,
            flags: CommandFlags::READONLY,
        },
        CommandSpec {
            name: "smembers",
            executor: exec_smembers,
            prepare: Some(read_first_key),
            undo: None,
            arity: 2,
            flags: CommandFlags::READONLY,
        },
        CommandSpec {
            name: "scard",
            executor: exec_scard,
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

fn exec_sadd(db: &SingleDb, args: &[Bytes]) -> Result<ExecResult, OpalDBError> {
    let added = update_set(db, &args[0], true, |set| {
        args[1..]
            .iter()
            .filter(|member| set.insert((*member).clone()))
            .count()
    })?
    .unwrap_or(0);
    Ok(ExecResult::with_mutation(
        RespFrame::Integer(added as i64),
        with_name("SADD", args),
    ))
}

fn exec_srem(db: &SingleDb, args: &[Bytes]) -> Result<ExecResult, OpalDBError> {
    let removed = update_set(db, &args[0], false, |set| {
        args[1..].iter().filter(|member| set.remove(*member)).count()
    })?
    .unwrap_or(0);
    cleanup_if_empty(db, &args[0]);
    if removed > 0 {
        Ok(ExecResult::with_mutation(
            RespFrame::Integer(removed as i64),
            with_name("SREM", args),
        ))
    } else {
        Ok(ExecResult::reply(RespFrame::Integer(0)))
    }
}

fn exec_sismember(db: &SingleDb, args: &[Bytes]) -> Result<ExecResult, OpalDBError> {
    let member = with_set(db, &args[0], |set| set.contains(&args[1]))?.unwrap_or(false);
    Ok(ExecResult::reply(RespFrame::Integer(member as i64)))
}

fn exec_smembers(db: &SingleDb, args: &[Bytes]) -> Result<ExecResult, OpalDBError> {
    let members = with_set(db, &args[0], |set| {
        set.iter().cloned().map(RespFrame::BulkString).collect()
    })?
    .unwrap_or_default();
    Ok(ExecResult::reply(RespFrame::Array(members)))
}

fn exec_scard(db: &SingleDb, args: &[Bytes]) -> Result<ExecResult, OpalDBError> {
    let len = with_set(db, &args[0], |set| set.len())?.unwrap_or(0);
    Ok(ExecResult::reply(RespFrame::Integer(len as i64)))
}
