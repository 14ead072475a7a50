// src/core/commands/zsets.rs

//! Sorted-set commands.

use super::helpers::*;
use crate::core::database::SingleDb;
use crate::core::database::registry::{CommandFlags, CommandSpec, ExecResult, Registry};
use crate::core::persistence::marshal::format_score;
use crate::core::{OpalDBError, RespFrame, with_name};
use bytes::Bytes;

pub fn register(table: &mut Registry) {
    let entries = [
        CommandSpec {
            name: "zadd",
            executor: exec_zadd,
            prepare: Some(write_first_key),
            undo: Some(undo_first_key),
            arity: -4,
            flags: CommandFlags::WRITE,
        },
        CommandSpec {
            name: "zscore",
            executor: exec_zscore,
            prepare: Some(read_first_key),
            undo: None,
            arity: 3,
            flags: CommandFlags::READONLY,
        },
        CommandSpec {
            name: "zrem",
            executor: exec_zrem,
            prepare: Some(write_first_key),
            undo: Some(undo_first_key),
            arity: -3,
            flags: CommandFlags::WRITE,
        },
        CommandSpec {
            name: "zcard",
            executor: exec_zcard,
            prepare: Some(read_first_key),
            undo: None,
            arity: 2,
            flags: CommandFlags::READONLY,
        },
        CommandSpec {
            name: "zcount",
            executor: exec_zcount,
            prepare: Some(read_first_key),
            undo: None,
            arity: 4,
            flags: CommandFlags::READONLY,
        },
        CommandSpec {
            name: "zrange",
            executor: exec_zrange,
            prepare: Some(read_first_key),
            undo: None,
            arity: -4,
            flags: CommandFlags::READONLY,
        },
    ];
    for spec in entries {
        table.insert(spec.name, spec);
    }
}

fn exec_zadd(db: &SingleDb, args: &[Bytes]) -> Result<ExecResult, OpalDBError> {
    if args.len() % 2 != 1 {
        return Err(OpalDBError::SyntaxError);
    }
    let mut pairs = Vec::with_capacity((args.len() - 1) / 2);
    for pair in args[1..].chunks(2) {
        pairs.push((parse_f64(&pair[0])?, pair[1].clone()));
    }
    let added = update_zset(db, &args[0], true, |zset| {
        pairs
            .into_iter()
            .filter(|(score, member)| zset.insert(member.clone(), *score))
            .count()
    })?
    .unwrap_or(0);
    Ok(ExecResult::with_mutation(
        RespFrame::Integer(added as i64),
        with_name("ZADD", args),
    ))
}

fn exec_zscore(db: &SingleDb, args: &[Bytes]) -> Result<ExecResult, OpalDBError> {
    let score = with_zset(db, &args[0], |zset| zset.score(&args[1]))?.flatten();
    Ok(ExecResult::reply(match score {
        Some(s) => RespFrame::BulkString(format_score(s)),
        None => RespFrame::Null,
    }))
}

fn exec_zrem(db: &SingleDb, args: &[Bytes]) -> Result<ExecResult, OpalDBError> {
    let removed = update_zset(db, &args[0], false, |zset| {
        args[1..].iter().filter(|member| zset.remove(member)).count()
    })?
    .unwrap_or(0);
    cleanup_if_empty(db, &args[0]);
    if removed > 0 {
        Ok(ExecResult::with_mutation(
            RespFrame::Integer(removed as i64),
            with_name("ZREM", args),
        ))
    } else {
        Ok(ExecResult::reply(RespFrame::Integer(0)))
    }
}

fn exec_zcard(db: &SingleDb, args: &[Bytes]) -> Result<ExecResult, OpalDBError> {
    let len = with_zset(db, &args[0], |zset| zset.len())?.unwrap_or(0);
    Ok(ExecResult::reply(RespFrame::Integer(len as i64)))
}

fn exec_zcount(db: &SingleDb, args: &[Bytes]) -> Result<ExecResult, OpalDBError> {
    let min = parse_f64(&args[1])?;
    let max = parse_f64(&args[2])?;
    let count = with_zset(db, &args[0], |zset| zset.count_in_score_range(min, max))?.unwrap_or(0);
    Ok(ExecResult::reply(RespFrame::Integer(count as i64)))
}

fn exec_zrange(db: &SingleDb, args: &[Bytes]) -> Result<ExecResult, OpalDBError> {
    let start = parse_i64(&args[1])?;
    let stop = parse_i64(&args[2])?;
    let with_scores = match args.get(3) {
        None => false,
        Some(opt) if opt.eq_ignore_ascii_case(b"WITHSCORES") => true,
        Some(_) => return Err(OpalDBError::SyntaxError),
    };
    let entries = with_zset(db, &args[0], |zset| zset.range(start, stop))?.unwrap_or_default();
    let mut replies = Vec::with_capacity(entries.len() * if with_scores { 2 } else { 1 });
    for (member, score) in entries {
        replies.push(RespFrame::BulkString(member));
        if with_scores {
            replies.push(RespFrame::BulkString(format_score(score)));
        }
    }
    Ok(ExecResult::reply(RespFrame::Array(replies)))
}
