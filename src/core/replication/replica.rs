// src/core/replication/replica.rs

//! The replica side of replication: handshake, full sync via snapshot,
//! continuous stream application and the 1 Hz cron.
//!
//! Cancellation uses a generation counter plus a cooperative token: every
//! phase that re-acquires the replication state and finds the generation
//! changed returns without touching shared state, so a reconnect or SLAVEOF
//! can never interleave with a stale session.

use crate::connection::Session;
use crate::core::database::{MultiDb, Role};
use crate::core::persistence::snapshot;
use crate::core::protocol::decode_one;
use crate::core::{CmdLine, OpalDBError, RespFrame, cmd_line};
use bytes::BytesMut;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// PING replies carrying these prefixes mean the master will never accept us
/// as-is; the connect attempt is aborted instead of retried.
const FATAL_PING_PREFIXES: [&str; 3] = ["NOAUTH", "NOPERM", "ERR operation not permitted"];

const DEFAULT_REPL_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Default)]
struct ReplicaInner {
    master: Option<(String, u16)>,
    repl_id: String,
    offset: i64,
    last_receive: Option<Instant>,
    writer: Option<Arc<Mutex<OwnedWriteHalf>>>,
    cancel: Option<CancellationToken>,
    task: Option<JoinHandle<()>>,
}

/// Node-wide replica-side replication state. Reinitialized on every
/// reconnect.
pub struct ReplicationState {
    inner: Mutex<ReplicaInner>,
    generation: AtomicU32,
}

impl ReplicationState {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(ReplicaInner::default()),
            generation: AtomicU32::new(0),
        }
    }

    pub async fn set_master(&self, host: String, port: u16) {
        self.inner.lock().await.master = Some((host, port));
    }

    pub async fn master(&self) -> Option<(String, u16)> {
        self.inner.lock().await.master.clone()
    }

    pub async fn offset(&self) -> i64 {
        self.inner.lock().await.offset
    }

    pub async fn repl_id(&self) -> String {
        self.inner.lock().await.repl_id.clone()
    }

    /// Spawns a new sync session for the configured master.
    pub async fn spawn_sync(self: &Arc<Self>, db: Arc<MultiDb>) {
        let token = CancellationToken::new();
        let generation = self.generation.load(Ordering::SeqCst);
        self.inner.lock().await.cancel = Some(token.clone());
        let state = Arc::clone(self);
        let handle = tokio::spawn(sync_session_task(state, db, generation, token));
        self.inner.lock().await.task = Some(handle);
    }

    /// Stops the running session: bumps the generation so stale phases bail
    /// out, cancels the token, and blocks until the session task drains.
    pub async fn stop(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        let (cancel, task) = {
            let mut inner = self.inner.lock().await;
            inner.writer = None;
            inner.last_receive = None;
            (inner.cancel.take(), inner.task.take())
        };
        if let Some(token) = cancel {
            token.cancel();
        }
        if let Some(handle) = task {
            let _ = handle.await;
        }
    }

    /// Tears replication down entirely (SLAVEOF NO ONE or shutdown).
    pub async fn close(&self) {
        self.stop().await;
        let mut inner = self.inner.lock().await;
        inner.master = None;
        inner.repl_id.clear();
        inner.offset = -1;
    }

    /// Clears the master address after an unrecoverable handshake reply.
    async fn abort_connect(&self) {
        let mut inner = self.inner.lock().await;
        inner.master = None;
        inner.repl_id.clear();
        inner.offset = -1;
        inner.writer = None;
    }

    fn generation_matches(&self, generation: u32) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
    }
}

impl Default for ReplicationState {
    fn default() -> Self {
        Self::new()
    }
}

/// Reads RESP frames off the master link, reporting the encoded byte length
/// of each so the offset counter can advance by exactly that much.
struct FrameReader {
    half: OwnedReadHalf,
    buf: BytesMut,
}

impl FrameReader {
    fn new(half: OwnedReadHalf) -> Self {
        Self {
            half,
            buf: BytesMut::with_capacity(16 * 1024),
        }
    }

    async fn read_frame(&mut self) -> Result<(RespFrame, usize), OpalDBError> {
        use tokio::io::AsyncReadExt;
        loop {
            if let Some((frame, len)) = decode_one(&self.buf)? {
                let _ = self.buf.split_to(len);
                return Ok((frame, len));
            }
            if self.half.read_buf(&mut self.buf).await? == 0 {
                return Err(OpalDBError::ReplicationError(
                    "master connection closed".into(),
                ));
            }
        }
    }
}

async fn send_line(writer: &Arc<Mutex<OwnedWriteHalf>>, line: &CmdLine) -> Result<(), OpalDBError> {
    let bytes = RespFrame::from_cmd_line(line).encode_to_vec();
    writer.lock().await.write_all(&bytes).await?;
    Ok(())
}

async fn expect_ok(reader: &mut FrameReader, phase: &str) -> Result<(), OpalDBError> {
    let (reply, _) = reader.read_frame().await?;
    match reply {
        RespFrame::SimpleString(s) if s.eq_ignore_ascii_case("OK") => Ok(()),
        other => Err(OpalDBError::ReplicationError(format!(
            "unexpected {phase} reply: {other:?}"
        ))),
    }
}

/// Boxes the sync session future so its type doesn't recursively embed the
/// opaque future type of `MultiDb::execute` (reachable again via a streamed
/// `SLAVEOF` command), which `tokio::spawn` cannot otherwise resolve.
fn sync_session_task(
    state: Arc<ReplicationState>,
    db: Arc<MultiDb>,
    generation: u32,
    token: CancellationToken,
) -> std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send>> {
    Box::pin(async move {
        if let Err(e) = sync_with_master(state, db, generation, token).await {
            error!("replication sync failed: {e}");
        }
    })
}

/// One full replica session: connect, handshake, full sync, stream apply.
async fn sync_with_master(
    state: Arc<ReplicationState>,
    db: Arc<MultiDb>,
    generation: u32,
    token: CancellationToken,
) -> Result<(), OpalDBError> {
    let Some((host, port)) = state.master().await else {
        return Ok(());
    };
    let addr = format!("{host}:{port}");
    info!("connecting to master at {addr}");
    let stream = TcpStream::connect(&addr).await?;
    let (read_half, write_half) = stream.into_split();
    let mut reader = FrameReader::new(read_half);
    let writer = Arc::new(Mutex::new(write_half));

    // Handshake: PING, optional AUTH, REPLCONF announcements.
    send_line(&writer, &cmd_line(&["PING"])).await?;
    let (ping_reply, _) = reader.read_frame().await?;
    if let RespFrame::Error(message) = &ping_reply {
        if FATAL_PING_PREFIXES.iter().any(|p| message.starts_with(p)) {
            state.abort_connect().await;
            return Err(OpalDBError::ReplicationError(format!(
                "master rejected PING: {message}"
            )));
        }
        warn!("master replied to PING with: {message}");
    }

    let config = db.config().clone();
    if !config.master_auth.is_empty() {
        let mut auth = cmd_line(&["AUTH"]);
        auth.push(bytes::Bytes::from(config.master_auth.clone().into_bytes()));
        send_line(&writer, &auth).await?;
        expect_ok(&mut reader, "AUTH").await?;
    }

    let announce_port = if config.slave_announce_port != 0 {
        config.slave_announce_port
    } else {
        config.port
    };
    send_line(
        &writer,
        &cmd_line(&["REPLCONF", "listening-port", &announce_port.to_string()]),
    )
    .await?;
    expect_ok(&mut reader, "REPLCONF listening-port").await?;
    send_line(&writer, &cmd_line(&["REPLCONF", "capa", "psync2"])).await?;
    expect_ok(&mut reader, "REPLCONF capa").await?;

    {
        let mut inner = state.inner.lock().await;
        if !state.generation_matches(generation) {
            return Ok(());
        }
        inner.writer = Some(Arc::clone(&writer));
    }

    // Full sync: PSYNC ? -1, FULLRESYNC header, snapshot payload.
    send_line(&writer, &cmd_line(&["PSYNC", "?", "-1"])).await?;
    let (header, _) = reader.read_frame().await?;
    let RespFrame::SimpleString(header) = header else {
        return Err(OpalDBError::ReplicationError(format!(
            "illegal PSYNC header: {header:?}"
        )));
    };
    let tokens: Vec<&str> = header.split(' ').collect();
    if tokens.len() != 3 || tokens[0] != "FULLRESYNC" {
        return Err(OpalDBError::ReplicationError(format!(
            "illegal PSYNC header: {header}"
        )));
    }
    let repl_id = tokens[1].to_string();
    let offset: i64 = tokens[2]
        .parse()
        .map_err(|_| OpalDBError::ReplicationError(format!("illegal offset: {}", tokens[2])))?;

    let (body, _) = reader.read_frame().await?;
    let RespFrame::BulkString(body) = body else {
        return Err(OpalDBError::ReplicationError(
            "illegal PSYNC payload body".into(),
        ));
    };
    info!("received {} snapshot bytes from master", body.len());

    let scratch = MultiDb::new_basic(config.clone());
    snapshot::load_from_bytes(&body, &scratch)?;

    {
        let mut inner = state.inner.lock().await;
        if !state.generation_matches(generation) {
            return Ok(());
        }
        for index in 0..db.database_count() {
            db.install_db(index, scratch.db_at(index)?)?;
        }
        inner.repl_id = repl_id;
        inner.offset = offset;
        inner.last_receive = Some(Instant::now());
        info!("full resync complete, offset {offset}");
    }
    scratch.abort_timers();

    // Stream phase: apply commands in receive order, advancing the offset by
    // exactly the byte length of each applied payload.
    let mut session = Session::fake_replication();
    loop {
        tokio::select! {
            _ = token.cancelled() => return Ok(()),
            frame = reader.read_frame() => {
                let (frame, len) = frame?;
                let Some(line) = frame.as_cmd_line() else { continue };
                if line.is_empty() {
                    continue;
                }
                if !state.generation_matches(generation) {
                    return Ok(());
                }
                db.execute(&mut session, line).await;
                let mut inner = state.inner.lock().await;
                inner.offset += len as i64;
                inner.last_receive = Some(Instant::now());
            }
        }
    }
}

/// The 1 Hz replication cron: reconnects after a silent period, otherwise
/// acknowledges the current offset.
pub fn start_cron(db: std::sync::Weak<MultiDb>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(1));
        loop {
            ticker.tick().await;
            let Some(db) = db.upgrade() else { return };
            if db.role() != Role::Replica {
                continue;
            }
            let state = db.replication();
            let timeout = if db.config().repl_timeout_secs > 0 {
                Duration::from_secs(db.config().repl_timeout_secs)
            } else {
                DEFAULT_REPL_TIMEOUT
            };
            let (writer, offset, stale) = {
                let inner = state.inner.lock().await;
                if inner.master.is_none() || inner.writer.is_none() {
                    continue;
                }
                let stale = inner
                    .last_receive
                    .is_some_and(|at| at.elapsed() > timeout);
                (inner.writer.clone(), inner.offset, stale)
            };
            if stale {
                info!("replication link silent past timeout, reconnecting to master");
                state.stop().await;
                state.spawn_sync(Arc::clone(&db)).await;
                continue;
            }
            if let Some(writer) = writer {
                let ack = cmd_line(&["REPLCONF", "ACK", &offset.to_string()]);
                if let Err(e) = send_line(&writer, &ack).await {
                    error!("failed to send replication ACK: {e}");
                }
            }
        }
    })
}
