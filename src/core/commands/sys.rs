// src/core/commands/sys.rs

//! Registry-level system commands. AUTH, SELECT and friends are intercepted
//! by the multi-database layer before dispatch reaches the registry; only
//! PING lives down here so it can also be queued inside MULTI.

use super::helpers::no_keys;
use crate::core::database::SingleDb;
use crate::core::database::registry::{CommandFlags, CommandSpec, ExecResult, Registry};
use crate::core::{OpalDBError, RespFrame};
use bytes::Bytes;

pub fn register(table: &mut Registry) {
    table.insert(
        "ping",
        CommandSpec {
            name: "ping",
            executor: exec_ping,
            prepare: Some(no_keys),
            undo: None,
            arity: -1,
            flags: CommandFlags::READONLY,
        },
    );
}

fn exec_ping(_db: &SingleDb, args: &[Bytes]) -> Result<ExecResult, OpalDBError> {
    match args.len() {
        0 => Ok(ExecResult::reply(RespFrame::pong())),
        1 => Ok(ExecResult::reply(RespFrame::BulkString(args[0].clone()))),
        _ => Err(OpalDBError::WrongArgumentCount("ping".into())),
    }
}
