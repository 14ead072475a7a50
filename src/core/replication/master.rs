// src/core/replication/master.rs

//! The master side of replication: the set of connected replica links and
//! the forwarding of the propagated command stream to each of them.

use crate::core::RespFrame;
use crate::core::persistence::WorkUnit;
use crate::core::cmd_line;
use parking_lot::Mutex;
use rand::RngCore;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;
use tracing::debug;

struct ReplicaHandle {
    session_id: u64,
    out: mpsc::UnboundedSender<RespFrame>,
    /// Database index of the last record streamed to this replica; a payload
    /// for a different database is preceded by a SELECT record.
    last_db_index: usize,
}

/// Connected replica links plus the master's replication identity.
pub struct ReplicaRegistry {
    replicas: Mutex<Vec<ReplicaHandle>>,
    /// Stream position in bytes, advertised in FULLRESYNC and advanced by
    /// every propagated payload.
    offset: AtomicU64,
    repl_id: String,
}

impl ReplicaRegistry {
    pub fn new() -> Self {
        let mut id_bytes = [0u8; 20];
        rand::thread_rng().fill_bytes(&mut id_bytes);
        Self {
            replicas: Mutex::new(Vec::new()),
            offset: AtomicU64::new(0),
            repl_id: hex::encode(id_bytes),
        }
    }

    pub fn repl_id(&self) -> &str {
        &self.repl_id
    }

    pub fn offset(&self) -> u64 {
        self.offset.load(Ordering::Relaxed)
    }

    /// Attaches a connection as a replica link after a completed full sync.
    /// The snapshot covered every database, so streaming starts at index 0.
    pub fn register(&self, session_id: u64, out: mpsc::UnboundedSender<RespFrame>) {
        debug!("replica link registered (session {session_id})");
        self.replicas.lock().push(ReplicaHandle {
            session_id,
            out,
            last_db_index: 0,
        });
    }

    pub fn unregister(&self, session_id: u64) {
        self.replicas.lock().retain(|r| r.session_id != session_id);
    }

    pub fn replica_count(&self) -> usize {
        self.replicas.lock().len()
    }

    /// Streams one propagated payload to every connected replica, advancing
    /// the master offset by the payload's encoded byte length. Links whose
    /// connection is gone are dropped.
    pub fn forward(&self, unit: &WorkUnit) {
        let frame = RespFrame::from_cmd_line(&unit.line);
        let payload_len = frame.encode_to_vec().len() as u64;
        self.offset.fetch_add(payload_len, Ordering::Relaxed);

        let mut replicas = self.replicas.lock();
        replicas.retain_mut(|replica| {
            if replica.last_db_index != unit.db_index {
                let select = cmd_line(&["SELECT", &unit.db_index.to_string()]);
                if replica.out.send(RespFrame::from_cmd_line(&select)).is_err() {
                    return false;
                }
                replica.last_db_index = unit.db_index;
            }
            replica.out.send(frame.clone()).is_ok()
        });
    }
}

impl Default for ReplicaRegistry {
    fn default() -> Self {
        Self::new()
    }
}
