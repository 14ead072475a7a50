// src/core/database/single.rs

//! One logical database: the keyspace, its TTL and version indexes, the
//! stripe lock serializing key access, and command dispatch.

use super::registry;
use super::transaction;
use crate::connection::Session;
use crate::core::locking::StripeLock;
use crate::core::persistence::WorkUnit;
use crate::core::storage::{ConcurrentDict, DataValue};
use crate::core::tasks::TimeWheel;
use crate::core::{CmdLine, OpalDBError, RespFrame};
use bytes::Bytes;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::SystemTime;
use tokio::sync::mpsc;
use tracing::debug;

const DATA_SHARDS: usize = 1 << 8;
const TTL_SHARDS: usize = 1 << 4;
const LOCKER_CAPACITY: usize = 1 << 10;

pub struct SingleDb {
    index: AtomicUsize,
    data: ConcurrentDict<DataValue>,
    ttl: ConcurrentDict<SystemTime>,
    versions: ConcurrentDict<u32>,
    pub(crate) locker: StripeLock,
    wheel: Arc<TimeWheel>,
    /// Sink for mutation command lines (AOF queue + replication stream).
    /// Detached during replay so reconstruction commands are not re-queued.
    propagate: parking_lot::RwLock<Option<mpsc::Sender<WorkUnit>>>,
    weak_self: Weak<SingleDb>,
}

impl SingleDb {
    pub fn new(index: usize, wheel: Arc<TimeWheel>) -> Arc<Self> {
        Arc::new_cyclic(|weak| Self {
            index: AtomicUsize::new(index),
            data: ConcurrentDict::new(DATA_SHARDS),
            ttl: ConcurrentDict::new(TTL_SHARDS),
            versions: ConcurrentDict::new(DATA_SHARDS),
            locker: StripeLock::new(LOCKER_CAPACITY),
            wheel,
            propagate: parking_lot::RwLock::new(None),
            weak_self: weak.clone(),
        })
    }

    pub fn index(&self) -> usize {
        self.index.load(Ordering::Relaxed)
    }

    pub fn set_index(&self, index: usize) {
        self.index.store(index, Ordering::Relaxed);
    }

    pub fn attach_propagator(&self, tx: mpsc::Sender<WorkUnit>) {
        *self.propagate.write() = Some(tx);
    }

    pub fn detach_propagator(&self) {
        *self.propagate.write() = None;
    }

    /// Dispatches one command line against this database. Transaction
    /// control commands are handled here; while the session is in MULTI all
    /// other commands are queued instead of executed.
    pub async fn execute(&self, session: &mut Session, line: CmdLine) -> RespFrame {
        if line.is_empty() {
            return OpalDBError::ProtocolError("empty command".into()).into();
        }
        let name = String::from_utf8_lossy(&line[0]).to_lowercase();
        match name.as_str() {
            "multi" => {
                if line.len() != 1 {
                    return OpalDBError::WrongArgumentCount(name).into();
                }
                return transaction::start_multi(session);
            }
            "discard" => {
                if line.len() != 1 {
                    return OpalDBError::WrongArgumentCount(name).into();
                }
                return transaction::discard_multi(session);
            }
            "watch" => {
                if line.len() < 2 {
                    return OpalDBError::WrongArgumentCount(name).into();
                }
                return transaction::watch(self, session, &line[1..]);
            }
            "exec" => {
                if line.len() != 1 {
                    return OpalDBError::WrongArgumentCount(name).into();
                }
                return transaction::exec_in_session(self, session).await;
            }
            _ => {}
        }
        if session.multi {
            return transaction::enqueue(session, line);
        }
        self.execute_generic(&line).await
    }

    /// The generic execution path: prepare declared key sets, bump write-key
    /// versions, take the batch lock, run the executor, propagate mutations.
    pub async fn execute_generic(&self, line: &CmdLine) -> RespFrame {
        let name = String::from_utf8_lossy(&line[0]).to_lowercase();
        let Some(spec) = registry::lookup(&name) else {
            return OpalDBError::UnknownCommand(name).into();
        };
        if !spec.arity_matches(line.len()) {
            return OpalDBError::WrongArgumentCount(name).into();
        }
        let (read_keys, write_keys) = spec
            .prepare
            .map(|prepare| prepare(&line[1..]))
            .unwrap_or_default();
        self.incr_versions(&write_keys);
        let _guard = self.locker.lock_read_write(&read_keys, &write_keys).await;
        match (spec.executor)(self, &line[1..]) {
            Ok(result) => {
                self.propagate_all(result.mutations).await;
                result.reply
            }
            Err(e) => e.into(),
        }
    }

    /// Runs the executor assuming the caller already holds the required
    /// stripe locks. Used by the transaction executor for both forward
    /// execution and undo replay.
    pub async fn execute_with_lock(&self, line: &CmdLine) -> RespFrame {
        if line.is_empty() {
            return OpalDBError::ProtocolError("empty command".into()).into();
        }
        let name = String::from_utf8_lossy(&line[0]).to_lowercase();
        let Some(spec) = registry::lookup(&name) else {
            return OpalDBError::UnknownCommand(name).into();
        };
        if !spec.arity_matches(line.len()) {
            return OpalDBError::WrongArgumentCount(name).into();
        }
        match (spec.executor)(self, &line[1..]) {
            Ok(result) => {
                self.propagate_all(result.mutations).await;
                result.reply
            }
            Err(e) => e.into(),
        }
    }

    /// The compensating command lines for `line`, produced by the command's
    /// undo generator. Empty for commands without one.
    pub fn undo_logs(&self, line: &CmdLine) -> Vec<CmdLine> {
        if line.is_empty() {
            return Vec::new();
        }
        let name = String::from_utf8_lossy(&line[0]).to_lowercase();
        registry::lookup(&name)
            .and_then(|spec| spec.undo)
            .map(|undo| undo(self, &line[1..]))
            .unwrap_or_default()
    }

    async fn propagate_all(&self, mutations: Vec<CmdLine>) {
        if mutations.is_empty() {
            return;
        }
        let tx = self.propagate.read().clone();
        if let Some(tx) = tx {
            let index = self.index();
            for line in mutations {
                // A full queue blocks the command path instead of dropping
                // the payload.
                let _ = tx.send(WorkUnit { db_index: index, line }).await;
            }
        }
    }

    // --- Version index ---

    pub fn version_of(&self, key: &[u8]) -> u32 {
        self.versions.get(key).unwrap_or(0)
    }

    pub fn incr_versions(&self, keys: &[Bytes]) {
        for key in keys {
            let version = self.version_of(key);
            self.versions.insert(key.clone(), version.wrapping_add(1));
        }
    }

    // --- Keyspace access (expiry-aware) ---

    /// Clones the live value for `key`, removing it first if its TTL has
    /// elapsed.
    pub fn get_entry(&self, key: &[u8]) -> Option<DataValue> {
        if self.check_expired(key) {
            return None;
        }
        self.data.get(key)
    }

    /// Applies `f` to the live value in place.
    pub fn update_entry<R>(&self, key: &[u8], f: impl FnOnce(&mut DataValue) -> R) -> Option<R> {
        if self.check_expired(key) {
            return None;
        }
        self.data.update(key, f)
    }

    /// Applies `f` to the value for `key`, inserting `default()` when absent.
    pub fn upsert_entry<R>(
        &self,
        key: Bytes,
        default: impl FnOnce() -> DataValue,
        f: impl FnOnce(&mut DataValue) -> R,
    ) -> R {
        self.check_expired(&key);
        self.data.upsert(key, default, f)
    }

    pub fn put(&self, key: Bytes, value: DataValue) {
        self.data.insert(key, value);
    }

    pub fn put_if_absent(&self, key: Bytes, value: DataValue) -> bool {
        self.check_expired(&key);
        self.data.insert_if_absent(key, value)
    }

    pub fn put_if_exists(&self, key: Bytes, value: DataValue) -> bool {
        if self.check_expired(&key) {
            return false;
        }
        self.data.insert_if_exists(key, value)
    }

    pub fn contains_key(&self, key: &[u8]) -> bool {
        !self.check_expired(key) && self.data.contains_key(key)
    }

    /// Removes the key from the keyspace, its TTL index and the expiry
    /// schedule.
    pub fn remove(&self, key: &[u8]) -> bool {
        let removed = self.data.remove(key).is_some();
        self.ttl.remove(key);
        self.wheel.remove_job(&expire_task_key(key));
        removed
    }

    pub fn remove_keys(&self, keys: &[Bytes]) -> usize {
        keys.iter().filter(|key| self.remove(key)).count()
    }

    /// Sets an absolute expiration instant and schedules the expiry job.
    /// The job holds a weak reference: it re-acquires the stripe lock and
    /// re-checks the deadline, because the key may have been deleted or
    /// re-created with a different TTL in the meantime.
    pub fn expire_at(&self, key: Bytes, at: SystemTime) {
        self.ttl.insert(key.clone(), at);
        let task_key = expire_task_key(&key);
        let weak = self.weak_self.clone();
        self.wheel.add_job_at(
            task_key.clone(),
            at,
            Box::pin(async move {
                let Some(db) = weak.upgrade() else { return };
                debug!("expiry job fired for {task_key}");
                let _guard = db.locker.lock_key(&key).await;
                db.check_expired(&key);
            }),
        );
    }

    /// Drops the TTL, keeping the value.
    pub fn persist(&self, key: &[u8]) -> bool {
        let had_ttl = self.ttl.remove(key).is_some();
        self.wheel.remove_job(&expire_task_key(key));
        had_ttl
    }

    pub fn ttl_of(&self, key: &[u8]) -> Option<SystemTime> {
        self.ttl.get(key)
    }

    /// Removes the key when its TTL has elapsed. Returns whether it was
    /// expired.
    pub fn check_expired(&self, key: &[u8]) -> bool {
        let Some(at) = self.ttl.get(key) else {
            return false;
        };
        let expired = SystemTime::now() > at;
        if expired {
            self.remove(key);
        }
        expired
    }

    /// Visits every live entry with its optional expiration instant.
    pub fn for_each_entry(&self, mut f: impl FnMut(&Bytes, &DataValue, Option<SystemTime>) -> bool) {
        self.data.for_each(|key, value| {
            let expiry = self.ttl.get(key);
            if expiry.is_some_and(|at| SystemTime::now() > at) {
                return true;
            }
            f(key, value, expiry)
        });
    }

    pub fn data_len(&self) -> usize {
        self.data.len()
    }

    pub fn ttl_len(&self) -> usize {
        self.ttl.len()
    }

    pub fn keys(&self) -> Vec<Bytes> {
        self.data.keys()
    }

    pub fn random_keys(&self, count: usize) -> Vec<Bytes> {
        self.data.random_keys(count)
    }

    pub fn random_distinct_keys(&self, count: usize) -> Vec<Bytes> {
        self.data.random_distinct_keys(count)
    }
}

fn expire_task_key(key: &[u8]) -> String {
    format!("expire:{}", String::from_utf8_lossy(key))
}
