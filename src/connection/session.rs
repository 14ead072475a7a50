// src/connection/session.rs

//! Per-connection state.
//!
//! A `Session` bundles everything the dispatch path needs to know about one
//! client: the selected database, authentication, pub/sub membership, the
//! MULTI queue with its watch map and queueing errors, and the role tag that
//! distinguishes a normal client from a replication stream. Replies go out
//! through an unbounded channel drained by the connection's single writer
//! task, which keeps socket writes serialized even when the pub/sub hub
//! delivers messages from another task.

use crate::core::{CmdLine, RespFrame};
use bytes::Bytes;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionRole {
    /// An ordinary client connection.
    Normal,
    /// The connection carries a replication stream; the replica write gate
    /// does not apply to it.
    ReplicationLink,
}

#[derive(Debug)]
pub struct Session {
    pub id: u64,
    /// Outbound frames, drained by the connection's writer task.
    out: mpsc::UnboundedSender<RespFrame>,
    pub db_index: usize,
    pub password: Option<String>,
    pub multi: bool,
    pub queue: Vec<CmdLine>,
    pub watching: HashMap<Bytes, u32>,
    pub tx_errors: Vec<String>,
    pub channels: HashSet<Bytes>,
    pub role: SessionRole,
}

impl Session {
    pub fn new(out: mpsc::UnboundedSender<RespFrame>) -> Self {
        Self {
            id: NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed),
            out,
            db_index: 0,
            password: None,
            multi: false,
            queue: Vec::new(),
            watching: HashMap::new(),
            tx_errors: Vec::new(),
            channels: HashSet::new(),
            role: SessionRole::Normal,
        }
    }

    /// A session whose replies are discarded. Used by the AOF replayer and
    /// the snapshot loader.
    pub fn fake() -> Self {
        let (tx, _rx) = mpsc::unbounded_channel();
        Self::new(tx)
    }

    /// A reply-discarding session tagged as a replication stream, used to
    /// apply the master's command stream on a replica.
    pub fn fake_replication() -> Self {
        let mut session = Self::fake();
        session.role = SessionRole::ReplicationLink;
        session
    }

    /// Queues a frame for the writer task. Errors (the connection is gone)
    /// are ignored; the read loop notices the closed socket on its own.
    pub fn write_frame(&self, frame: RespFrame) {
        let _ = self.out.send(frame);
    }

    /// A clone of the outbound sender, for subsystems that deliver frames to
    /// this connection from other tasks (pub/sub, replication stream).
    pub fn out_sender(&self) -> mpsc::UnboundedSender<RespFrame> {
        self.out.clone()
    }

    /// Leaves MULTI state, dropping the queue, watch map and queueing errors.
    pub fn reset_multi(&mut self) {
        self.multi = false;
        self.queue.clear();
        self.watching.clear();
        self.tx_errors.clear();
    }
}
