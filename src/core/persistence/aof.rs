// src/core/persistence/aof.rs

//! The append-only file: a replayable stream of RESP command arrays with
//! `SELECT <index>` records marking database switches.

use super::WorkUnit;
use crate::connection::Session;
use crate::core::database::MultiDb;
use crate::core::{OpalDBError, RespFrame, cmd_line};
use std::future::Future;
use std::io::ErrorKind;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

pub(crate) struct AofFileState {
    pub file: File,
    /// The database index the most recent record belongs to; a payload for a
    /// different database is preceded by a SELECT record.
    pub current_index: usize,
}

/// Owns the live AOF file. The worker task appends through `append`; the
/// rewrite protocol briefly takes the same state lock to snapshot the file
/// size and to splice in the rewritten file.
pub struct AofHandler {
    path: String,
    pub(crate) state: Mutex<AofFileState>,
    /// Serializes rewrites; REWRITEAOF while one is running waits its turn.
    pub(crate) rewrite_lock: Mutex<()>,
}

impl AofHandler {
    pub async fn new(path: &str) -> Result<Self, OpalDBError> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await?;
        info!("AOF enabled, appending to {path}");
        Ok(Self {
            path: path.to_string(),
            state: Mutex::new(AofFileState {
                file,
                current_index: 0,
            }),
            rewrite_lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Appends one propagated mutation, writing a SELECT record first when
    /// the payload belongs to a different database than the previous one.
    pub async fn append(&self, unit: &WorkUnit) {
        let mut state = self.state.lock().await;
        if unit.db_index != state.current_index {
            let select = cmd_line(&["SELECT", &unit.db_index.to_string()]);
            if let Err(e) = state
                .file
                .write_all(&RespFrame::from_cmd_line(&select).encode_to_vec())
                .await
            {
                warn!("failed to write AOF SELECT record: {e}");
                return;
            }
            state.current_index = unit.db_index;
        }
        let record = RespFrame::from_cmd_line(&unit.line).encode_to_vec();
        if let Err(e) = state.file.write_all(&record).await {
            warn!("failed to write AOF record: {e}");
        }
    }

    /// Flushes the file to disk.
    pub async fn sync(&self) {
        let state = self.state.lock().await;
        if let Err(e) = state.file.sync_all().await {
            error!("failed to sync AOF file: {e}");
        }
    }
}

/// Wraps a future and asserts it's `Send`, breaking the auto-trait cycle the
/// compiler would otherwise have to chase through `execute -> rewriteaof ->
/// load_aof -> execute`: every value captured along that path (`Arc`,
/// owned buffers, a reply-discarding `Session`) is genuinely `Send`, so the
/// assertion holds; it only sidesteps the solver's inability to resolve the
/// recursive opaque future type.
struct AssertSendFuture<F>(F);

unsafe impl<F> Send for AssertSendFuture<F> {}

impl<F: Future> Future for AssertSendFuture<F> {
    type Output = F::Output;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        unsafe { self.map_unchecked_mut(|s| &mut s.0) }.poll(cx)
    }
}

/// Replays the AOF at `path` against `db` through a reply-discarding session.
/// `max_bytes` limits how much of the file prefix is replayed (0 = all of
/// it); the rewrite protocol uses the limit to reconstruct the state as of
/// its starting snapshot.
///
/// Callers must ensure mutation propagation is detached while replaying so
/// reconstruction commands are not queued back into the pipeline.
pub async fn load_aof(path: &str, db: &Arc<MultiDb>, max_bytes: u64) {
    let data = match tokio::fs::read(path).await {
        Ok(data) => data,
        Err(e) if e.kind() == ErrorKind::NotFound => return,
        Err(e) => {
            warn!("could not open AOF file {path}: {e}");
            return;
        }
    };
    let data = if max_bytes > 0 && (max_bytes as usize) < data.len() {
        &data[..max_bytes as usize]
    } else {
        &data[..]
    };

    let mut session = Session::fake();
    let mut cursor = 0usize;
    while cursor < data.len() {
        let (frame, consumed) = match crate::core::protocol::decode_one(&data[cursor..]) {
            Ok(Some(pair)) => pair,
            // A truncated trailing record is tolerated.
            Ok(None) => break,
            Err(e) => {
                error!("AOF parse error at byte {cursor}: {e}");
                break;
            }
        };
        cursor += consumed;
        let Some(line) = frame.as_cmd_line() else {
            error!("AOF record is not a command array, skipping");
            continue;
        };
        if line.is_empty() {
            continue;
        }
        let fut: Pin<Box<dyn Future<Output = Option<RespFrame>> + Send + '_>> =
            Box::pin(AssertSendFuture(db.execute(&mut session, line)));
        if let Some(reply) = fut.await {
            if let RespFrame::Error(message) = reply {
                error!("AOF replay error: {message}");
            }
        }
    }
    info!("AOF replay finished ({cursor} bytes)");
}
