// src/core/cluster/tx.rs

//! Cross-node transactions.
//!
//! WATCH relays a version probe to each key's owner. EXEC proves every
//! touched key maps to one owner; when that owner is a peer, the whole
//! batch travels as a single `_multi` command whose arguments are
//! base64-encoded RESP serializations of an inner `_watch` line followed by
//! every queued command. The owner decodes, runs its local transaction
//! executor and returns base64-encoded replies in order.

use super::Cluster;
use crate::connection::Session;
use crate::core::database::{registry, transaction};
use crate::core::protocol::decode_one;
use crate::core::{CmdLine, OpalDBError, RespFrame, cmd_line};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use bytes::Bytes;
use std::collections::HashMap;

/// The encapsulated transaction carrier.
pub const RELAY_COMMAND: &str = "_multi";
/// The inner pseudo-line carrying the caller's watch map.
const WATCH_COMMAND: &str = "_watch";

/// Cluster WATCH: ask each key's owner for its current version and store it
/// locally.
pub async fn exec_watch(cluster: &Cluster, session: &mut Session, keys: &[Bytes]) -> RespFrame {
    if session.multi {
        return RespFrame::Error("ERR WATCH inside MULTI is not allowed".into());
    }
    for key in keys {
        let owner = cluster.owner_of(key);
        let mut probe = cmd_line(&["GetVer"]);
        probe.push(key.clone());
        let reply = cluster.relay(&owner, session, &probe).await;
        match reply {
            RespFrame::Integer(version) => {
                session.watching.insert(key.clone(), version as u32);
            }
            RespFrame::Error(message) => return RespFrame::Error(message),
            _ => return RespFrame::Error("ERR get version failed".into()),
        }
    }
    RespFrame::ok()
}

/// Cluster EXEC: single-owner check, then local execution or encapsulated
/// relay.
pub async fn exec_multi(cluster: &Cluster, session: &mut Session) -> RespFrame {
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

    let mut keys: Vec<Bytes> = Vec::new();
    for line in &lines {
        let (read_keys, write_keys) = registry::related_keys(line);
        keys.extend(write_keys);
        keys.extend(read_keys);
    }
    keys.extend(watching.keys().cloned());

    if keys.is_empty() {
        return exec_locally(cluster, session, &watching, &lines).await;
    }
    let groups = cluster.group_by_owner(&keys);
    if groups.len() > 1 {
        return OpalDBError::CrossSlotTransaction.into();
    }
    let owner = groups.into_keys().next().expect("one owner group");
    if owner == cluster.self_addr() {
        return exec_locally(cluster, session, &watching, &lines).await;
    }
    exec_multi_on_peer(cluster, session, &owner, &watching, &lines).await
}

async fn exec_locally(
    cluster: &Cluster,
    session: &Session,
    watching: &HashMap<Bytes, u32>,
    lines: &[CmdLine],
) -> RespFrame {
    let db = match cluster.db.db_at(session.db_index) {
        Ok(db) => db,
        Err(e) => return e.into(),
    };
    transaction::exec_multi(&db, watching, lines).await
}

/// Ships the batch to its owner as one `_multi` command and unpacks the
/// enveloped replies.
async fn exec_multi_on_peer(
    cluster: &Cluster,
    session: &mut Session,
    owner: &str,
    watching: &HashMap<Bytes, u32>,
    lines: &[CmdLine],
) -> RespFrame {
    let mut watch_line = cmd_line(&[WATCH_COMMAND]);
    for (key, version) in watching {
        watch_line.push(key.clone());
        watch_line.push(Bytes::from(version.to_string().into_bytes()));
    }

    let mut relay_line = cmd_line(&[RELAY_COMMAND]);
    relay_line.push(encode_line(&watch_line));
    for line in lines {
        relay_line.push(encode_line(line));
    }

    let reply = cluster.relay(owner, session, &relay_line).await;
    // Errors and the conflict marker (empty array) pass through verbatim.
    match &reply {
        RespFrame::Error(_) => return reply,
        RespFrame::Array(items) if items.is_empty() => return reply,
        _ => {}
    }
    let RespFrame::Array(items) = reply else {
        return RespFrame::Error("ERR execute failed".into());
    };
    let mut replies = Vec::with_capacity(items.len());
    for item in items {
        let RespFrame::BulkString(encoded) = item else {
            return RespFrame::Error("ERR execute failed".into());
        };
        match decode_reply(&encoded) {
            Ok(frame) => replies.push(frame),
            Err(e) => return e.into(),
        }
    }
    RespFrame::Array(replies)
}

/// The owner side of `_multi`: reconstruct the watch map and the queued
/// commands, run them through the local transaction executor, envelope each
/// reply.
pub async fn exec_relayed_multi(
    cluster: &Cluster,
    session: &mut Session,
    line: &CmdLine,
) -> RespFrame {
    if line.len() < 2 {
        return OpalDBError::WrongArgumentCount(RELAY_COMMAND.into()).into();
    }
    let mut decoded: Vec<CmdLine> = Vec::with_capacity(line.len() - 1);
    for arg in &line[1..] {
        match decode_cmd_line(arg) {
            Ok(inner) => decoded.push(inner),
            Err(e) => return e.into(),
        }
    }

    let watch_line = &decoded[0];
    if watch_line.first().map(|name| name.as_ref()) != Some(WATCH_COMMAND.as_bytes()) {
        return RespFrame::Error("ERR watching command line failed".into());
    }
    let mut watching: HashMap<Bytes, u32> = HashMap::new();
    let mut i = 1;
    while i + 1 < watch_line.len() {
        let key = watch_line[i].clone();
        let Ok(version) = String::from_utf8_lossy(&watch_line[i + 1]).parse::<u32>() else {
            return RespFrame::Error("ERR watching command line failed".into());
        };
        watching.insert(key, version);
        i += 2;
    }

    let reply = exec_locally(cluster, session, &watching, &decoded[1..]).await;
    match reply {
        // The caller treats errors and the conflict marker verbatim.
        RespFrame::Error(_) => reply,
        RespFrame::Array(items) if items.is_empty() => RespFrame::empty_array(),
        RespFrame::Array(items) => RespFrame::Array(
            items
                .into_iter()
                .map(|frame| {
                    RespFrame::BulkString(Bytes::from(
                        BASE64.encode(frame.encode_to_vec()).into_bytes(),
                    ))
                })
                .collect(),
        ),
        other => RespFrame::Error(format!("ERR unexpected transaction reply: {other:?}")),
    }
}

fn encode_line(line: &CmdLine) -> Bytes {
    let raw = RespFrame::from_cmd_line(line).encode_to_vec();
    Bytes::from(BASE64.encode(raw).into_bytes())
}

fn decode_cmd_line(arg: &Bytes) -> Result<CmdLine, OpalDBError> {
    let frame = decode_reply(arg)?;
    frame
        .as_cmd_line()
        .ok_or_else(|| OpalDBError::ClusterError("relayed line is not a command array".into()))
}

fn decode_reply(arg: &Bytes) -> Result<RespFrame, OpalDBError> {
    let raw = BASE64
        .decode(arg)
        .map_err(|_| OpalDBError::ClusterError("bad base64 payload".into()))?;
    match decode_one(&raw)? {
        Some((frame, _)) => Ok(frame),
        None => Err(OpalDBError::ClusterError(
            "truncated relayed payload".into(),
        )),
    }
}
