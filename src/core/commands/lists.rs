// src/core/commands/lists.rs

//! List commands.

use super::helpers::*;
use crate::core::database::SingleDb;
use crate::core::database::registry::{CommandFlags, CommandSpec, ExecResult, Registry};
use crate::core::{OpalDBError, RespFrame, with_name};
use bytes::Bytes;

pub fn register(table: &mut Registry) {
    let entries = [
        CommandSpec {
            name: "lpush",
            executor: exec_lpush,
            prepare: Some(write_first_key),
            undo: Some(undo_first_key),
            arity: -3,
            flags: CommandFlags::WRITE,
        },
        CommandSpec {
            name: "rpush",
            executor: exec_rpush,
            prepare: Some(write_first_key),
            undo: Some(undo_first_key),
            arity: -3,
            flags: CommandFlags::WRITE,
        },
        CommandSpec {
            name: "lpop",
            executor: exec_lpop,
            prepare: Some(write_first_key),
            undo: Some(undo_first_key),
            arity: 2,
            flags: CommandFlags::WRITE,
        },
        CommandSpec {
            name: "rpop",
            executor: exec_rpop,
            prepare: Some(write_first_key),
            undo: Some(undo_first_key),
            arity: 2,
            flags: CommandFlags::WRITE,
        },
        CommandSpec {
            name: "llen",
            executor: exec_llen,
            prepare: Some(read_first_key),
            undo: None,
            arity: 2,
            flags: CommandFlags::READONLY,
        },
        CommandSpec {
            name: "lindex",
            executor: exec_lindex,
            prepare: Some(read_first_key),
            undo: None,
            arity: 3,
            flags: CommandFlags::READONLY,
        },
        CommandSpec {
            name: "lrange",
            executor: exec_lrange,
            prepare: Some(read_first_key),
            undo: None,
            arity: 4,
            flags: CommandFlags::READONLY,
        },
    ];
    for spec in entries {
        table.insert(spec.name, spec);
    }
}

fn exec_lpush(db: &SingleDb, args: &[Bytes]) -> Result<ExecResult, OpalDBError> {
    let len = update_list(db, &args[0], true, |list| {
        for value in &args[1..] {
            list.push_front(value.clone());
        }
        list.len()
    })?
    .unwrap_or(0);
    Ok(ExecResult::with_mutation(
        RespFrame::Integer(len as i64),
        with_name("LPUSH", args),
    ))
}

fn exec_rpush(db: &SingleDb, args: &[Bytes]) -> Result<ExecResult, OpalDBError> {
    let len = update_list(db, &args[0], true, |list| {
        for value in &args[1..] {
            list.push_back(value.clone());
        }
        list.len()
    })?
    .unwrap_or(0);
    Ok(ExecResult::with_mutation(
        RespFrame::Integer(len as i64),
        with_name("RPUSH", args),
    ))
}

fn exec_lpop(db: &SingleDb, args: &[Bytes]) -> Result<ExecResult, OpalDBError> {
    let popped = update_list(db, &args[0], false, |list| list.pop_front())?.flatten();
    cleanup_if_empty(db, &args[0]);
    match popped {
        Some(value) => Ok(ExecResult::with_mutation(
            RespFrame::BulkString(value),
            with_name("LPOP", args),
        )),
        None => Ok(ExecResult::reply(RespFrame::Null)),
    }
}

fn exec_rpop(db: &SingleDb, args: &[Bytes]) -> Result<ExecResult, OpalDBError> {
    let popped = update_list(db, &args[0], false, |list| list.pop_back())?.flatten();
    cleanup_if_empty(db, &args[0]);
    match popped {
        Some(value) => Ok(ExecResult::with_mutation(
            RespFrame::BulkString(value),
            with_name("RPOP", args),
        )),
        None => Ok(ExecResult::reply(RespFrame::Null)),
    }
}

fn exec_llen(db: &SingleDb, args: &[Bytes]) -> Result<ExecResult, OpalDBError> {
    let len = with_list(db, &args[0], |list| list.len())?.unwrap_or(0);
    Ok(ExecResult::reply(RespFrame::Integer(len as i64)))
}

fn exec_lindex(db: &SingleDb, args: &[Bytes]) -> Result<ExecResult, OpalDBError> {
    let index = parse_i64(&args[1])?;
    let value = with_list(db, &args[0], |list| {
        let n = list.len() as i64;
        let index = if index < 0 { n + index } else { index };
        if index < 0 || index >= n {
            None
        } else {
            list.get(index as usize).cloned()
        }
    })?
    .flatten();
    Ok(ExecResult::reply(match value {
        Some(v) => RespFrame::BulkString(v),
        None => RespFrame::Null,
    }))
}

fn exec_lrange(db: &SingleDb, args: &[Bytes]) -> Result<ExecResult, OpalDBError> {
    let start = parse_i64(&args[1])?;
    let stop = parse_i64(&args[2])?;
    let items = with_list(db, &args[0], |list| {
        let n = list.len() as i64;
        if n == 0 {
            return Vec::new();
        }
        let clamp = |i: i64| if i < 0 { (n + i).max(0) } else { i.min(n - 1) };
        let (start, stop) = (clamp(start), clamp(stop));
        if start > stop {
            return Vec::new();
        }
        list.iter()
            .skip(start as usize)
            .take((stop - start + 1) as usize)
            .cloned()
            .collect::<Vec<_>>()
    })?
    .unwrap_or_default();
    Ok(ExecResult::reply(RespFrame::Array(
        items.into_iter().map(RespFrame::BulkString).collect(),
    )))
}
