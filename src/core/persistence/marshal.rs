// src/core/persistence/marshal.rs

//! Turns live entries back into the command lines that reconstruct them.
//! Shared by the AOF rewriter, the undo-log generators and the COPY path.

use crate::core::database::SingleDb;
use crate::core::storage::DataValue;
use crate::core::{CmdLine, cmd_line};
use bytes::Bytes;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// One command that rebuilds `key` with its current value: SET / RPUSH /
/// HMSET / SADD / ZADD depending on the entry kind. Empty containers yield
/// no command.
pub fn entry_to_cmd_line(key: &Bytes, value: &DataValue) -> Option<CmdLine> {
    let mut line: CmdLine;
    match value {
        DataValue::String(s) => {
            line = cmd_line(&["SET"]);
            line.push(key.clone());
            line.push(s.clone());
        }
        DataValue::List(items) => {
            if items.is_empty() {
                return None;
            }
            line = cmd_line(&["RPUSH"]);
            line.push(key.clone());
            line.extend(items.iter().cloned());
        }
        DataValue::Hash(fields) => {
            if fields.is_empty() {
                return None;
            }
            line = cmd_line(&["HMSET"]);
            line.push(key.clone());
            for (field, value) in fields {
                line.push(field.clone());
                line.push(value.clone());
            }
        }
        DataValue::Set(members) => {
            if members.is_empty() {
                return None;
            }
            line = cmd_line(&["SADD"]);
            line.push(key.clone());
            line.extend(members.iter().cloned());
        }
        DataValue::SortedSet(zset) => {
            if zset.is_empty() {
                return None;
            }
            line = cmd_line(&["ZADD"]);
            line.push(key.clone());
            for (member, score) in zset.iter_ordered() {
                line.push(format_score(score));
                line.push(member.clone());
            }
        }
    }
    Some(line)
}

/// `PEXPIREAT <key> <ms>` for an absolute expiration instant.
pub fn pexpire_at_cmd(key: &Bytes, at: SystemTime) -> CmdLine {
    let mut line = cmd_line(&["PEXPIREAT"]);
    line.push(key.clone());
    line.push(Bytes::from(unix_ms(at).to_string().into_bytes()));
    line
}

/// The command restoring the key's current TTL state: `PEXPIREAT` when a TTL
/// is set, `PERSIST` otherwise.
pub fn ttl_to_cmd_line(db: &SingleDb, key: &Bytes) -> CmdLine {
    match db.ttl_of(key) {
        Some(at) => pexpire_at_cmd(key, at),
        None => {
            let mut line = cmd_line(&["PERSIST"]);
            line.push(key.clone());
            line
        }
    }
}

pub fn format_score(score: f64) -> Bytes {
    let mut buf = ryu::Buffer::new();
    Bytes::copy_from_slice(buf.format(score).as_bytes())
}

pub fn unix_ms(at: SystemTime) -> i64 {
    match at.duration_since(UNIX_EPOCH) {
        Ok(d) => d.as_millis() as i64,
        Err(e) => -(e.duration().as_millis() as i64),
    }
}

pub fn system_time_from_ms(ms: i64) -> SystemTime {
    if ms >= 0 {
        UNIX_EPOCH + Duration::from_millis(ms as u64)
    } else {
        UNIX_EPOCH - Duration::from_millis(ms.unsigned_abs())
    }
}
