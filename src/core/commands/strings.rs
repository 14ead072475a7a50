// src/core/commands/strings.rs

//! String commands.

use super::helpers::*;
use crate::core::database::registry::{CommandFlags, CommandSpec, ExecResult, Registry};
use crate::core::database::SingleDb;
use crate::core::storage::DataValue;
use crate::core::{OpalDBError, RespFrame, with_name};
use bytes::Bytes;
use std::time::{Duration, SystemTime};

pub fn register(table: &mut Registry) {
    let entries = [
        CommandSpec {
            name: "get",
            executor: exec_get,
            prepare: Some(read_first_key),
            undo: None,
            arity: 2,
            flags: CommandFlags::READONLY,
        },
        CommandSpec {
            name: "set",
            executor: exec_set,
            prepare: Some(write_first_key),
            undo: Some(undo_first_key),
            arity: -3,
            flags: CommandFlags::WRITE,
        },
        CommandSpec {
            name: "setnx",
            executor: exec_setnx,
            prepare: Some(write_first_key),
            undo: Some(undo_first_key),
            arity: 3,
            flags: CommandFlags::WRITE,
        },
        CommandSpec {
            name: "getset",
            executor: exec_getset,
            prepare: Some(write_first_key),
            undo: Some(undo_first_key),
            arity: 3,
            flags: CommandFlags::WRITE,
        },
        CommandSpec {
            name: "strlen",
            executor: exec_strlen,
            prepare: Some(read_first_key),
            undo: None,
            arity: 2,
            flags: CommandFlags::READONLY,
        },
        CommandSpec {
            name: "append",
            executor: exec_append,
            prepare: Some(write_first_key),
            undo: Some(undo_first_key),
            arity: 3,
            flags: CommandFlags::WRITE,
        },
        CommandSpec {
            name: "incr",
            executor: exec_incr,
            prepare: Some(write_first_key),
            undo: Some(undo_first_key),
            arity: 2,
            flags: CommandFlags::WRITE,
        },
        CommandSpec {
            name: "decr",
            executor: exec_decr,
            prepare: Some(write_first_key),
            undo: Some(undo_first_key),
            arity: 2,
            flags: CommandFlags::WRITE,
        },
        CommandSpec {
            name: "incrby",
            executor: exec_incrby,
            prepare: Some(write_first_key),
            undo: Some(undo_first_key),
            arity: 3,
            flags: CommandFlags::WRITE,
        },
        CommandSpec {
            name: "decrby",
            executor: exec_decrby,
            prepare: Some(write_first_key),
            undo: Some(undo_first_key),
            arity: 3,
            flags: CommandFlags::WRITE,
        },
        CommandSpec {
            name: "mget",
            executor: exec_mget,
            prepare: Some(read_all_keys),
            undo: None,
            arity: -2,
            flags: CommandFlags::READONLY,
        },
        CommandSpec {
            name: "mset",
            executor: exec_mset,
            prepare: Some(write_alternate_keys),
            undo: Some(undo_alternate_keys),
            arity: -3,
            flags: CommandFlags::WRITE,
        },
    ];
    for spec in entries {
        table.insert(spec.name, spec);
    }
}

fn exec_get(db: &SingleDb, args: &[Bytes]) -> Result<ExecResult, OpalDBError> {
    let reply = match get_string(db, &args[0])? {
        Some(s) => RespFrame::BulkString(s),
        None => RespFrame::Null,
    };
    Ok(ExecResult::reply(reply))
}

enum SetCondition {
    Any,
    IfAbsent,
    IfExists,
}

fn exec_set(db: &SingleDb, args: &[Bytes]) -> Result<ExecResult, OpalDBError> {
    let key = args[0].clone();
    let value = args[1].clone();
    let mut condition = SetCondition::Any;
    let mut expire_in: Option<Duration> = None;

    let mut i = 2;
    while i < args.len() {
        let opt = String::from_utf8_lossy(&args[i]).to_uppercase();
        match opt.as_str() {
            "NX" => condition = SetCondition::IfAbsent,
            "XX" => condition = SetCondition::IfExists,
            "EX" | "PX" => {
                let Some(raw) = args.get(i + 1) else {
                    return Err(OpalDBError::SyntaxError);
                };
                let amount = parse_i64(raw)?;
                if amount <= 0 {
                    return Err(OpalDBError::SyntaxError);
                }
                expire_in = Some(if opt == "EX" {
                    Duration::from_secs(amount as u64)
                } else {
                    Duration::from_millis(amount as u64)
                });
                i += 1;
            }
            _ => return Err(OpalDBError::SyntaxError),
        }
        i += 1;
    }

    let stored = match condition {
        SetCondition::Any => {
            db.put(key.clone(), DataValue::String(value));
            true
        }
        SetCondition::IfAbsent => db.put_if_absent(key.clone(), DataValue::String(value)),
        SetCondition::IfExists => db.put_if_exists(key.clone(), DataValue::String(value)),
    };
    if !stored {
        return Ok(ExecResult::reply(RespFrame::Null));
    }

    match expire_in {
        Some(d) => db.expire_at(key, SystemTime::now() + d),
        // A plain SET discards any previous TTL.
        None => {
            db.persist(&key);
        }
    }
    Ok(ExecResult::with_mutation(
        RespFrame::ok(),
        with_name("SET", args),
    ))
}

fn exec_setnx(db: &SingleDb, args: &[Bytes]) -> Result<ExecResult, OpalDBError> {
    let stored = db.put_if_absent(args[0].clone(), DataValue::String(args[1].clone()));
    if stored {
        Ok(ExecResult::with_mutation(
            RespFrame::Integer(1),
            with_name("SETNX", args),
        ))
    } else {
        Ok(ExecResult::reply(RespFrame::Integer(0)))
    }
}

fn exec_getset(db: &SingleDb, args: &[Bytes]) -> Result<ExecResult, OpalDBError> {
    let old = get_string(db, &args[0])?;
    db.put(args[0].clone(), DataValue::String(args[1].clone()));
    db.persist(&args[0]);
    let reply = match old {
        Some(s) => RespFrame::BulkString(s),
        None => RespFrame::Null,
    };
    Ok(ExecResult::with_mutation(reply, with_name("GETSET", args)))
}

fn exec_strlen(db: &SingleDb, args: &[Bytes]) -> Result<ExecResult, OpalDBError> {
    let len = get_string(db, &args[0])?.map_or(0, |s| s.len());
    Ok(ExecResult::reply(RespFrame::Integer(len as i64)))
}

fn exec_append(db: &SingleDb, args: &[Bytes]) -> Result<ExecResult, OpalDBError> {
    let mut value = get_string(db, &args[0])?.map_or_else(Vec::new, |s| s.to_vec());
    value.extend_from_slice(&args[1]);
    let len = value.len();
    db.put(args[0].clone(), DataValue::String(Bytes::from(value)));
    Ok(ExecResult::with_mutation(
        RespFrame::Integer(len as i64),
        with_name("APPEND", args),
    ))
}

fn incr_by(db: &SingleDb, args: &[Bytes], delta: i64, name: &str) -> Result<ExecResult, OpalDBError> {
    let current = match get_string(db, &args[0])? {
        Some(s) => parse_i64(&s)?,
        None => 0,
    };
    let next = current.checked_add(delta).ok_or(OpalDBError::Overflow)?;
    db.put(
        args[0].clone(),
        DataValue::String(Bytes::from(next.to_string().into_bytes())),
    );
    Ok(ExecResult::with_mutation(
        RespFrame::Integer(next),
        with_name(name, args),
    ))
}

fn exec_incr(db: &SingleDb, args: &[Bytes]) -> Result<ExecResult, OpalDBError> {
    incr_by(db, args, 1, "INCR")
}

fn exec_decr(db: &SingleDb, args: &[Bytes]) -> Result<ExecResult, OpalDBError> {
    incr_by(db, args, -1, "DECR")
}

fn exec_incrby(db: &SingleDb, args: &[Bytes]) -> Result<ExecResult, OpalDBError> {
    let delta = parse_i64(&args[1])?;
    incr_by(db, args, delta, "INCRBY")
}

fn exec_decrby(db: &SingleDb, args: &[Bytes]) -> Result<ExecResult, OpalDBError> {
    let delta = parse_i64(&args[1])?;
    incr_by(db, args, delta.checked_neg().ok_or(OpalDBError::Overflow)?, "DECRBY")
}

fn exec_mget(db: &SingleDb, args: &[Bytes]) -> Result<ExecResult, OpalDBError> {
    let mut replies = Vec::with_capacity(args.len());
    for key in args {
        // A wrong-typed key yields nil rather than failing the whole MGET.
        let value = match db.get_entry(key) {
            Some(DataValue::String(s)) => RespFrame::BulkString(s),
            _ => RespFrame::Null,
        };
        replies.push(value);
    }
    Ok(ExecResult::reply(RespFrame::Array(replies)))
}

fn exec_mset(db: &SingleDb, args: &[Bytes]) -> Result<ExecResult, OpalDBError> {
    if args.len() % 2 != 0 {
        return Err(OpalDBError::SyntaxError);
    }
    for pair in args.chunks(2) {
        db.put(pair[0].clone(), DataValue::String(pair[1].clone()));
        db.persist(&pair[0]);
    }
    Ok(ExecResult::with_mutation(
        RespFrame::ok(),
        with_name("MSET", args),
    ))
}
