// src/core/persistence/snapshot.rs

//! The OPDB binary snapshot format.
//!
//! Layout: magic + version, auxiliary metadata fields, then per database a
//! SELECTDB opcode with a RESIZEDB header (data and TTL counts) followed by
//! typed key objects, each optionally preceded by an EXPIRETIME_MS opcode.
//! An EOF opcode and a CRC-64 trailer close the file.

use super::marshal;
use crate::core::OpalDBError;
use crate::core::database::MultiDb;
use crate::core::storage::{DataValue, SortedSet};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use crc::{CRC_64_REDIS, Crc};
use indexmap::IndexMap;
use std::collections::{HashSet, VecDeque};
use std::io::ErrorKind;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::fs;
use tracing::info;

const OPDB_MAGIC: &[u8] = b"OPALDB";
const OPDB_VERSION: &[u8] = b"0001";

const OPDB_OPCODE_AUX: u8 = 0xFA;
const OPDB_OPCODE_RESIZEDB: u8 = 0xFB;
const OPDB_OPCODE_EXPIRETIME_MS: u8 = 0xFC;
const OPDB_OPCODE_SELECTDB: u8 = 0xFE;
const OPDB_OPCODE_EOF: u8 = 0xFF;

const OPDB_TYPE_STRING: u8 = 0;
const OPDB_TYPE_LIST: u8 = 1;
const OPDB_TYPE_SET: u8 = 2;
const OPDB_TYPE_ZSET: u8 = 3;
const OPDB_TYPE_HASH: u8 = 4;

const CHECKSUM_ALGO: Crc<u64> = Crc::<u64>::new(&CRC_64_REDIS);

// --- Saving ---

/// Encodes the full keyspace into OPDB bytes. Also used by the master to
/// hand a full-sync payload to a connecting replica.
pub fn save_to_bytes(db: &MultiDb) -> Result<Bytes, OpalDBError> {
    let mut buf = BytesMut::new();
    buf.put_slice(OPDB_MAGIC);
    buf.put_slice(OPDB_VERSION);

    write_aux(&mut buf, b"redis-ver", env!("CARGO_PKG_VERSION").as_bytes());
    write_aux(&mut buf, b"redis-bits", b"64");
    write_aux(&mut buf, b"aof-preamble", b"0");
    let ctime = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    write_aux(&mut buf, b"ctime", ctime.to_string().as_bytes());

    for index in 0..db.database_count() {
        let single = db.db_at_arc(index)?;
        buf.put_u8(OPDB_OPCODE_SELECTDB);
        write_length(&mut buf, index as u64);
        buf.put_u8(OPDB_OPCODE_RESIZEDB);
        write_length(&mut buf, single.data_len() as u64);
        write_length(&mut buf, single.ttl_len() as u64);

        single.for_each_entry(|key, value, expiry| {
            if let Some(at) = expiry {
                buf.put_u8(OPDB_OPCODE_EXPIRETIME_MS);
                buf.put_u64_le(marshal::unix_ms(at).max(0) as u64);
            }
            write_value(&mut buf, key, value);
            true
        });
    }

    buf.put_u8(OPDB_OPCODE_EOF);
    let checksum = CHECKSUM_ALGO.checksum(&buf);
    buf.put_u64_le(checksum);
    Ok(buf.freeze())
}

/// Writes the snapshot to a temporary file and atomically renames it into
/// place.
pub async fn save(db: &MultiDb, path: &str) -> Result<(), OpalDBError> {
    let bytes = save_to_bytes(db)?;
    let temp_path = format!("{}.tmp.{}", path, std::process::id());
    fs::write(&temp_path, &bytes).await?;
    fs::rename(&temp_path, path).await?;
    info!("snapshot saved to {path} ({} bytes)", bytes.len());
    Ok(())
}

fn write_aux(buf: &mut BytesMut, key: &[u8], value: &[u8]) {
    buf.put_u8(OPDB_OPCODE_AUX);
    write_string(buf, key);
    write_string(buf, value);
}

fn write_value(buf: &mut BytesMut, key: &Bytes, value: &DataValue) {
    match value {
        DataValue::String(s) => {
            buf.put_u8(OPDB_TYPE_STRING);
            write_string(buf, key);
            write_string(buf, s);
        }
        DataValue::List(items) => {
            buf.put_u8(OPDB_TYPE_LIST);
            write_string(buf, key);
            write_length(buf, items.len() as u64);
            for item in items {
                write_string(buf, item);
            }
        }
        DataValue::Set(members) => {
            buf.put_u8(OPDB_TYPE_SET);
            write_string(buf, key);
            write_length(buf, members.len() as u64);
            for member in members {
                write_string(buf, member);
            }
        }
        DataValue::SortedSet(zset) => {
            buf.put_u8(OPDB_TYPE_ZSET);
            write_string(buf, key);
            write_length(buf, zset.len() as u64);
            for (member, score) in zset.iter_ordered() {
                write_string(buf, member);
                write_string(buf, &marshal::format_score(score));
            }
        }
        DataValue::Hash(fields) => {
            buf.put_u8(OPDB_TYPE_HASH);
            write_string(buf, key);
            write_length(buf, fields.len() as u64);
            for (field, value) in fields {
                write_string(buf, field);
                write_string(buf, value);
            }
        }
    }
}

// --- Loading ---

/// Decodes OPDB bytes into the given engine, verifying the checksum first.
/// Keys whose recorded expiration already passed are skipped.
pub fn load_from_bytes(data: &[u8], db: &MultiDb) -> Result<(), OpalDBError> {
    if data.len() < OPDB_MAGIC.len() + OPDB_VERSION.len() + 9 {
        return Err(OpalDBError::Internal("snapshot too short".into()));
    }
    let (body, trailer) = data.split_at(data.len() - 8);
    let expected = CHECKSUM_ALGO.checksum(body);
    let recorded = (&trailer[..]).get_u64_le();
    if expected != recorded {
        return Err(OpalDBError::Internal("snapshot checksum mismatch".into()));
    }

    let mut cursor = Bytes::copy_from_slice(body);
    if cursor.split_to(OPDB_MAGIC.len()) != OPDB_MAGIC {
        return Err(OpalDBError::Internal("bad snapshot magic".into()));
    }
    cursor.advance(OPDB_VERSION.len());

    let mut current_index = 0usize;
    let mut pending_expiry: Option<SystemTime> = None;
    loop {
        if !cursor.has_remaining() {
            return Err(OpalDBError::Internal(
                "snapshot ended without EOF opcode".into(),
            ));
        }
        let opcode = cursor.get_u8();
        match opcode {
            OPDB_OPCODE_EOF => return Ok(()),
            OPDB_OPCODE_AUX => {
                read_string(&mut cursor)?;
                read_string(&mut cursor)?;
            }
            OPDB_OPCODE_SELECTDB => {
                current_index = read_length(&mut cursor)? as usize;
            }
            OPDB_OPCODE_RESIZEDB => {
                read_length(&mut cursor)?;
                read_length(&mut cursor)?;
            }
            OPDB_OPCODE_EXPIRETIME_MS => {
                let ms = cursor.get_u64_le();
                pending_expiry = Some(marshal::system_time_from_ms(ms as i64));
            }
            value_type => {
                let key = read_string(&mut cursor)?;
                let value = read_value(&mut cursor, value_type)?;
                let expiry = pending_expiry.take();
                if expiry.is_some_and(|at| at <= SystemTime::now()) {
                    continue;
                }
                let single = db.db_at_arc(current_index)?;
                single.put(key.clone(), value);
                if let Some(at) = expiry {
                    single.expire_at(key, at);
                }
            }
        }
    }
}

/// Loads the snapshot file at `path`, if present.
pub async fn load_file(path: &str, db: &Arc<MultiDb>) -> Result<(), OpalDBError> {
    let data = match fs::read(path).await {
        Ok(data) => data,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            info!("snapshot file {path} not found, starting empty");
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    };
    load_from_bytes(&data, db)?;
    info!("loaded snapshot from {path} ({} bytes)", data.len());
    Ok(())
}

fn read_value(cursor: &mut Bytes, value_type: u8) -> Result<DataValue, OpalDBError> {
    match value_type {
        OPDB_TYPE_STRING => Ok(DataValue::String(read_string(cursor)?)),
        OPDB_TYPE_LIST => {
            let len = read_length(cursor)? as usize;
            let mut list = VecDeque::with_capacity(len);
            for _ in 0..len {
                list.push_back(read_string(cursor)?);
            }
            Ok(DataValue::List(list))
        }
        OPDB_TYPE_SET => {
            let len = read_length(cursor)? as usize;
            let mut set = HashSet::with_capacity(len);
            for _ in 0..len {
                set.insert(read_string(cursor)?);
            }
            Ok(DataValue::Set(set))
        }
        OPDB_TYPE_ZSET => {
            let len = read_length(cursor)? as usize;
            let mut zset = SortedSet::new();
            for _ in 0..len {
                let member = read_string(cursor)?;
                let score_bytes = read_string(cursor)?;
                let score: f64 = std::str::from_utf8(&score_bytes)?
                    .parse()
                    .map_err(|_| OpalDBError::Internal("bad zset score".into()))?;
                zset.insert(member, score);
            }
            Ok(DataValue::SortedSet(zset))
        }
        OPDB_TYPE_HASH => {
            let len = read_length(cursor)? as usize;
            let mut hash = IndexMap::with_capacity(len);
            for _ in 0..len {
                let field = read_string(cursor)?;
                let value = read_string(cursor)?;
                hash.insert(field, value);
            }
            Ok(DataValue::Hash(hash))
        }
        other => Err(OpalDBError::Internal(format!(
            "unknown snapshot value type {other}"
        ))),
    }
}

// --- Length and string encoding ---

fn write_length(buf: &mut BytesMut, len: u64) {
    if len < (1 << 6) {
        buf.put_u8(len as u8);
    } else if len < (1 << 14) {
        buf.put_u16((len | (1 << 14)) as u16);
    } else if len < (1 << 32) {
        buf.put_u8(0x80);
        buf.put_u32(len as u32);
    } else {
        buf.put_u8(0x81);
        buf.put_u64(len);
    }
}

fn read_length(cursor: &mut Bytes) -> Result<u64, OpalDBError> {
    if !cursor.has_remaining() {
        return Err(OpalDBError::Internal("truncated length".into()));
    }
    let first = cursor.get_u8();
    match (first & 0xC0) >> 6 {
        0b00 => Ok(u64::from(first & 0x3F)),
        0b01 => {
            if !cursor.has_remaining() {
                return Err(OpalDBError::Internal("truncated 14-bit length".into()));
            }
            let next = cursor.get_u8();
            Ok(u64::from(((first as u16 & 0x3F) << 8) | next as u16))
        }
        0b10 => match first & 0x3F {
            0 => {
                if cursor.remaining() < 4 {
                    return Err(OpalDBError::Internal("truncated 32-bit length".into()));
                }
                Ok(u64::from(cursor.get_u32()))
            }
            1 => {
                if cursor.remaining() < 8 {
                    return Err(OpalDBError::Internal("truncated 64-bit length".into()));
                }
                Ok(cursor.get_u64())
            }
            _ => Err(OpalDBError::Internal("bad length encoding".into())),
        },
        _ => Err(OpalDBError::Internal("bad length encoding".into())),
    }
}

fn write_string(buf: &mut BytesMut, s: &[u8]) {
    write_length(buf, s.len() as u64);
    buf.put_slice(s);
}

fn read_string(cursor: &mut Bytes) -> Result<Bytes, OpalDBError> {
    let len = read_length(cursor)? as usize;
    if cursor.remaining() < len {
        return Err(OpalDBError::Internal("truncated string".into()));
    }
    Ok(cursor.split_to(len))
}
