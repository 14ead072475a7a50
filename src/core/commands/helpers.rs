// src/core/commands/helpers.rs

//! Shared plumbing for command handlers: typed keyspace accessors, argument
//! parsing, prepare functions and undo-log generators.

use crate::core::database::SingleDb;
use crate::core::persistence::marshal;
use crate::core::storage::{DataValue, SortedSet};
use crate::core::{CmdLine, OpalDBError, cmd_line};
use bytes::Bytes;
use indexmap::IndexMap;
use std::collections::{HashSet, VecDeque};

// --- Typed accessors ---

pub fn get_string(db: &SingleDb, key: &[u8]) -> Result<Option<Bytes>, OpalDBError> {
    match db.get_entry(key) {
        None => Ok(None),
        Some(DataValue::String(s)) => Ok(Some(s)),
        Some(_) => Err(OpalDBError::WrongType),
    }
}

pub fn with_list<R>(
    db: &SingleDb,
    key: &[u8],
    f: impl FnOnce(&VecDeque<Bytes>) -> R,
) -> Result<Option<R>, OpalDBError> {
    match db.get_entry(key) {
        None => Ok(None),
        Some(DataValue::List(list)) => Ok(Some(f(&list))),
        Some(_) => Err(OpalDBError::WrongType),
    }
}

pub fn update_list<R>(
    db: &SingleDb,
    key: &Bytes,
    create: bool,
    f: impl FnOnce(&mut VecDeque<Bytes>) -> R,
) -> Result<Option<R>, OpalDBError> {
    if create {
        db.upsert_entry(
            key.clone(),
            || DataValue::List(VecDeque::new()),
            |value| match value {
                DataValue::List(list) => Ok(f(list)),
                _ => Err(OpalDBError::WrongType),
            },
        )
        .map(Some)
    } else {
        db.update_entry(key, |value| match value {
            DataValue::List(list) => Ok(f(list)),
            _ => Err(OpalDBError::WrongType),
        })
        .transpose()
    }
}

pub fn with_hash<R>(
    db: &SingleDb,
    key: &[u8],
    f: impl FnOnce(&IndexMap<Bytes, Bytes>) -> R,
) -> Result<Option<R>, OpalDBError> {
    match db.get_entry(key) {
        None => Ok(None),
        Some(DataValue::Hash(hash)) => Ok(Some(f(&hash))),
        Some(_) => Err(OpalDBError::WrongType),
    }
}

pub fn update_hash<R>(
    db: &SingleDb,
    key: &Bytes,
    create: bool,
    f: impl FnOnce(&mut IndexMap<Bytes, Bytes>) -> R,
) -> Result<Option<R>, OpalDBError> {
    if create {
        db.upsert_entry(
            key.clone(),
            || DataValue::Hash(IndexMap::new()),
            |value| match value {
                DataValue::Hash(hash) => Ok(f(hash)),
                _ => Err(OpalDBError::WrongType),
            },
        )
        .map(Some)
    } else {
        db.update_entry(key, |value| match value {
            DataValue::Hash(hash) => Ok(f(hash)),
            _ => Err(OpalDBError::WrongType),
        })
        .transpose()
    }
}

pub fn with_set<R>(
    db: &SingleDb,
    key: &[u8],
    f: impl FnOnce(&HashSet<Bytes>) -> R,
) -> Result<Option<R>, OpalDBError> {
    match db.get_entry(key) {
        None => Ok(None),
        Some(DataValue::Set(set)) => Ok(Some(f(&set))),
        Some(_) => Err(OpalDBError::WrongType),
    }
}

pub fn update_set<R>(
    db: &SingleDb,
    key: &Bytes,
    create: bool,
    f: impl FnOnce(&mut HashSet<Bytes>) -> R,
) -> Result<Option<R>, OpalDBError> {
    if create {
        db.upsert_entry(
            key.clone(),
            || DataValue::Set(HashSet::new()),
            |value| match value {
                DataValue::Set(set) => Ok(f(set)),
                _ => Err(OpalDBError::WrongType),
            },
        )
        .map(Some)
    } else {
        db.update_entry(key, |value| match value {
            DataValue::Set(set) => Ok(f(set)),
            _ => Err(OpalDBError::WrongType),
        })
        .transpose()
    }
}

pub fn with_zset<R>(
    db: &SingleDb,
    key: &[u8],
    f: impl FnOnce(&SortedSet) -> R,
) -> Result<Option<R>, OpalDBError> {
    match db.get_entry(key) {
        None => Ok(None),
        Some(DataValue::SortedSet(zset)) => Ok(Some(f(&zset))),
        Some(_) => Err(OpalDBError::WrongType),
    }
}

pub fn update_zset<R>(
    db: &SingleDb,
    key: &Bytes,
    create: bool,
    f: impl FnOnce(&mut SortedSet) -> R,
) -> Result<Option<R>, OpalDBError> {
    if create {
        db.upsert_entry(
            key.clone(),
            || DataValue::SortedSet(SortedSet::new()),
            |value| match value {
                DataValue::SortedSet(zset) => Ok(f(zset)),
                _ => Err(OpalDBError::WrongType),
            },
        )
        .map(Some)
    } else {
        db.update_entry(key, |value| match value {
            DataValue::SortedSet(zset) => Ok(f(zset)),
            _ => Err(OpalDBError::WrongType),
        })
        .transpose()
    }
}

/// Removes the key when its container just became empty, so an emptied list
/// or set does not linger in the keyspace.
pub fn cleanup_if_empty(db: &SingleDb, key: &[u8]) {
    let now_empty = db
        .get_entry(key)
        .map(|value| match value {
            DataValue::String(_) => false,
            DataValue::List(l) => l.is_empty(),
            DataValue::Hash(h) => h.is_empty(),
            DataValue::Set(s) => s.is_empty(),
            DataValue::SortedSet(z) => z.is_empty(),
        })
        .unwrap_or(false);
    if now_empty {
        db.remove(key);
    }
}

// --- Argument parsing ---

pub fn parse_i64(arg: &Bytes) -> Result<i64, OpalDBError> {
    std::str::from_utf8(arg)
        .map_err(|_| OpalDBError::NotAnInteger)?
        .parse::<i64>()
        .map_err(|_| OpalDBError::NotAnInteger)
}

pub fn parse_f64(arg: &Bytes) -> Result<f64, OpalDBError> {
    std::str::from_utf8(arg)
        .map_err(|_| OpalDBError::NotAFloat)?
        .parse::<f64>()
        .map_err(|_| OpalDBError::NotAFloat)
}

// --- Prepare functions ---

pub fn no_keys(_args: &[Bytes]) -> (Vec<Bytes>, Vec<Bytes>) {
    (Vec::new(), Vec::new())
}

pub fn read_first_key(args: &[Bytes]) -> (Vec<Bytes>, Vec<Bytes>) {
    (vec![args[0].clone()], Vec::new())
}

pub fn write_first_key(args: &[Bytes]) -> (Vec<Bytes>, Vec<Bytes>) {
    (Vec::new(), vec![args[0].clone()])
}

pub fn read_all_keys(args: &[Bytes]) -> (Vec<Bytes>, Vec<Bytes>) {
    (args.to_vec(), Vec::new())
}

pub fn write_all_keys(args: &[Bytes]) -> (Vec<Bytes>, Vec<Bytes>) {
    (Vec::new(), args.to_vec())
}

/// MSET-style lines: keys sit at the even argument positions.
pub fn write_alternate_keys(args: &[Bytes]) -> (Vec<Bytes>, Vec<Bytes>) {
    (Vec::new(), args.iter().step_by(2).cloned().collect())
}

/// RENAME-style lines: both the source and destination are written.
pub fn write_first_two_keys(args: &[Bytes]) -> (Vec<Bytes>, Vec<Bytes>) {
    (Vec::new(), vec![args[0].clone(), args[1].clone()])
}

// --- Undo generators ---

/// The compensating lines restoring the given keys to their current state:
/// `DEL` for a key that does not exist yet, otherwise `DEL` + a typed
/// reconstruction command + the TTL-restoring command.
pub fn rollback_given_keys(db: &SingleDb, keys: &[Bytes]) -> Vec<CmdLine> {
    let mut undo = Vec::new();
    for key in keys {
        match db.get_entry(key) {
            None => {
                let mut del = cmd_line(&["DEL"]);
                del.push(key.clone());
                undo.push(del);
            }
            Some(value) => {
                let mut del = cmd_line(&["DEL"]);
                del.push(key.clone());
                undo.push(del);
                if let Some(rebuild) = marshal::entry_to_cmd_line(key, &value) {
                    undo.push(rebuild);
                }
                undo.push(marshal::ttl_to_cmd_line(db, key));
            }
        }
    }
    undo
}

pub fn undo_first_key(db: &SingleDb, args: &[Bytes]) -> Vec<CmdLine> {
    rollback_given_keys(db, &args[..1])
}

pub fn undo_all_keys(db: &SingleDb, args: &[Bytes]) -> Vec<CmdLine> {
    rollback_given_keys(db, args)
}

pub fn undo_alternate_keys(db: &SingleDb, args: &[Bytes]) -> Vec<CmdLine> {
    let keys: Vec<Bytes> = args.iter().step_by(2).cloned().collect();
    rollback_given_keys(db, &keys)
}

pub fn undo_first_two_keys(db: &SingleDb, args: &[Bytes]) -> Vec<CmdLine> {
    rollback_given_keys(db, &args[..2])
}

/// Restores only the TTL state of the first key (used by the expire family).
pub fn undo_ttl(db: &SingleDb, args: &[Bytes]) -> Vec<CmdLine> {
    vec![marshal::ttl_to_cmd_line(db, &args[0])]
}
