// src/core/database/multi.rs

//! The multi-database engine: N logical databases behind atomic pointer
//! cells, the reserved-command interception layer, the replica write gate,
//! and the wiring between command dispatch, persistence and replication.

use super::registry;
use super::single::SingleDb;
use crate::config::Config;
use crate::connection::{Session, SessionRole};
use crate::core::persistence::{AofHandler, PROPAGATION_QUEUE_SIZE, WorkUnit, aof, snapshot};
use crate::core::pubsub::Hub;
use crate::core::replication::{ReplicaRegistry, ReplicationState, replica};
use crate::core::tasks::TimeWheel;
use crate::core::{CmdLine, DataEngine, OpalDBError, RespFrame, cmd_line};
use async_trait::async_trait;
use bytes::Bytes;
use futures::FutureExt;
use parking_lot::RwLock;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tracing::{error, warn};

const TIME_WHEEL_SLOTS: usize = 3600;
const TIME_WHEEL_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Master,
    Replica,
}

pub struct MultiDb {
    config: Arc<Config>,
    /// Pointer cells: FLUSH swaps a cell atomically, readers load the Arc
    /// once per operation and never observe a partial database.
    dbs: Vec<RwLock<Arc<SingleDb>>>,
    hub: Hub,
    wheel: Arc<TimeWheel>,
    aof: Option<Arc<AofHandler>>,
    propagate_tx: parking_lot::Mutex<Option<mpsc::Sender<WorkUnit>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    cron: parking_lot::Mutex<Option<JoinHandle<()>>>,
    role: AtomicU8,
    replication: Arc<ReplicationState>,
    replicas: Arc<ReplicaRegistry>,
    weak_self: Weak<MultiDb>,
}

impl MultiDb {
    /// Builds the standalone server engine: loads persisted state, attaches
    /// the propagation pipeline and starts the background tasks.
    pub async fn new_standalone(config: Arc<Config>) -> Result<Arc<Self>, OpalDBError> {
        let aof = if config.append_only {
            Some(Arc::new(AofHandler::new(&config.append_filename).await?))
        } else {
            None
        };
        let (tx, rx) = mpsc::channel(PROPAGATION_QUEUE_SIZE);
        let db =
            Arc::new_cyclic(|weak| Self::build(config.clone(), aof.clone(), weak.clone()));

        // Replay persisted state before the propagators attach, so the
        // reconstruction commands are not queued back into the pipeline.
        if aof.is_some() {
            aof::load_aof(&config.append_filename, &db, 0).await;
        } else if !config.db_filename.is_empty() {
            if let Err(e) = snapshot::load_file(&config.db_filename, &db).await {
                warn!("could not load snapshot: {e}");
            }
        }

        for cell in &db.dbs {
            cell.read().attach_propagator(tx.clone());
        }
        *db.propagate_tx.lock() = Some(tx);

        let worker_aof = aof.clone();
        let worker_replicas = Arc::clone(&db.replicas);
        *db.worker.lock().await = Some(tokio::spawn(async move {
            propagation_worker(rx, worker_aof, worker_replicas).await;
        }));

        *db.cron.lock() = Some(replica::start_cron(Arc::downgrade(&db)));
        Ok(db)
    }

    /// A bare engine with no persistence or replication wiring, used as the
    /// scratch target for AOF rewrite and replica full sync.
    pub fn new_basic(config: Arc<Config>) -> Arc<Self> {
        Arc::new_cyclic(|weak| Self::build(config, None, weak.clone()))
    }

    fn build(config: Arc<Config>, aof: Option<Arc<AofHandler>>, weak_self: Weak<MultiDb>) -> Self {
        let wheel = Arc::new(TimeWheel::start(TIME_WHEEL_INTERVAL, TIME_WHEEL_SLOTS));
        let dbs = (0..config.database_count)
            .map(|index| RwLock::new(SingleDb::new(index, Arc::clone(&wheel))))
            .collect();
        Self {
            config,
            dbs,
            hub: Hub::new(),
            wheel,
            aof,
            propagate_tx: parking_lot::Mutex::new(None),
            worker: Mutex::new(None),
            cron: parking_lot::Mutex::new(None),
            role: AtomicU8::new(0),
            replication: Arc::new(ReplicationState::new()),
            replicas: Arc::new(ReplicaRegistry::new()),
            weak_self,
        }
    }

    pub fn config(&self) -> &Arc<Config> {
        &self.config
    }

    pub fn database_count(&self) -> usize {
        self.dbs.len()
    }

    pub fn role(&self) -> Role {
        if self.role.load(Ordering::SeqCst) == 0 {
            Role::Master
        } else {
            Role::Replica
        }
    }

    pub fn set_role(&self, role: Role) {
        let value = if role == Role::Master { 0 } else { 1 };
        self.role.store(value, Ordering::SeqCst);
    }

    pub fn replication(&self) -> Arc<ReplicationState> {
        Arc::clone(&self.replication)
    }

    pub fn replicas(&self) -> Arc<ReplicaRegistry> {
        Arc::clone(&self.replicas)
    }

    pub fn db_at(&self, index: usize) -> Result<Arc<SingleDb>, OpalDBError> {
        self.dbs
            .get(index)
            .map(|cell| cell.read().clone())
            .ok_or(OpalDBError::DbIndexOutOfBounds)
    }

    /// Alias kept for call sites that read better with the explicit name.
    pub fn db_at_arc(&self, index: usize) -> Result<Arc<SingleDb>, OpalDBError> {
        self.db_at(index)
    }

    /// Swaps a logical database wholesale. Used by FLUSH and by replica full
    /// sync; the incoming database inherits the index and the propagation
    /// sink of the slot it lands in.
    pub fn install_db(&self, index: usize, single: Arc<SingleDb>) -> Result<(), OpalDBError> {
        let cell = self
            .dbs
            .get(index)
            .ok_or(OpalDBError::DbIndexOutOfBounds)?;
        single.set_index(index);
        match self.propagate_tx.lock().as_ref() {
            Some(tx) => single.attach_propagator(tx.clone()),
            None => single.detach_propagator(),
        }
        *cell.write() = single;
        Ok(())
    }

    /// Stops the scratch engine's timer loop. Only meaningful for engines
    /// produced by `new_basic`.
    pub fn abort_timers(&self) {
        self.wheel.abort();
    }

    async fn propagate(&self, db_index: usize, line: CmdLine) {
        let tx = self.propagate_tx.lock().clone();
        if let Some(tx) = tx {
            let _ = tx.send(WorkUnit { db_index, line }).await;
        }
    }

    /// Dispatches one command. Handler panics are caught here and reported
    /// as a generic error so a broken handler cannot take the server down.
    pub async fn execute(&self, session: &mut Session, line: CmdLine) -> Option<RespFrame> {
        match AssertUnwindSafe(self.do_execute(session, line))
            .catch_unwind()
            .await
        {
            Ok(reply) => reply,
            Err(_) => {
                error!("command handler panicked");
                Some(RespFrame::Error("ERR unknown error".into()))
            }
        }
    }

    async fn do_execute(&self, session: &mut Session, line: CmdLine) -> Option<RespFrame> {
        if line.is_empty() {
            return Some(OpalDBError::ProtocolError("empty command".into()).into());
        }
        let name = String::from_utf8_lossy(&line[0]).to_lowercase();
        let args = &line[1..];

        if name == "auth" {
            return Some(self.auth(session, args));
        }
        if !self.authenticated(session) {
            return Some(OpalDBError::AuthRequired.into());
        }
        if name == "slaveof" {
            if session.multi {
                return Some(OpalDBError::NotAllowedInMulti("slaveof".into()).into());
            }
            return Some(self.exec_slave_of(args).await);
        }

        // Replica write gate: normal clients may only run read-only-flagged
        // commands while this node follows a master.
        if self.role() == Role::Replica
            && session.role != SessionRole::ReplicationLink
            && !registry::is_read_only(&name)
        {
            return Some(OpalDBError::ReadOnlyReplica.into());
        }

        match name.as_str() {
            "subscribe" => {
                if line.len() < 2 {
                    return Some(OpalDBError::WrongArgumentCount(name).into());
                }
                self.hub.subscribe(session, args).await;
                None
            }
            "unsubscribe" => {
                self.hub.unsubscribe(session, args).await;
                None
            }
            "publish" => Some(self.hub.publish(args).await),
            "replconf" => self.exec_replconf(args),
            "psync" => self.exec_psync(session).await,
            "rewriteaof" => Some(self.rewrite_aof().await),
            "bgrewriteaof" => Some(self.bg_rewrite_aof()),
            "save" => Some(self.save_snapshot().await),
            "bgsave" => Some(self.bg_save_snapshot()),
            "flushdb" => {
                if line.len() != 1 {
                    return Some(OpalDBError::WrongArgumentCount(name).into());
                }
                if session.multi {
                    return Some(OpalDBError::NotAllowedInMulti("FLUSHDB".into()).into());
                }
                Some(self.flush_at(session.db_index).await)
            }
            "flushall" => Some(self.flush_all().await),
            "select" => {
                if line.len() != 2 {
                    return Some(OpalDBError::WrongArgumentCount(name).into());
                }
                if session.multi {
                    return Some(RespFrame::Error(
                        "ERR cannot select database within MULTI".into(),
                    ));
                }
                Some(self.exec_select(session, args))
            }
            "copy" => {
                if line.len() < 3 {
                    return Some(OpalDBError::WrongArgumentCount(name).into());
                }
                Some(self.exec_copy(session, args).await)
            }
            "dbsize" => {
                let db = match self.db_at(session.db_index) {
                    Ok(db) => db,
                    Err(e) => return Some(e.into()),
                };
                Some(RespFrame::Integer(db.data_len() as i64))
            }
            _ => {
                let db = match self.db_at(session.db_index) {
                    Ok(db) => db,
                    Err(e) => return Some(e.into()),
                };
                Some(db.execute(session, line).await)
            }
        }
    }

    // --- Authentication ---

    fn auth(&self, session: &mut Session, args: &[Bytes]) -> RespFrame {
        if args.len() != 1 {
            return OpalDBError::WrongArgumentCount("auth".into()).into();
        }
        if self.config.require_pass.is_empty() {
            return RespFrame::Error("ERR Client sent AUTH, but no password is set".into());
        }
        let password = String::from_utf8_lossy(&args[0]).to_string();
        session.password = Some(password.clone());
        if password != self.config.require_pass {
            return OpalDBError::InvalidPassword.into();
        }
        RespFrame::ok()
    }

    pub(crate) fn authenticated(&self, session: &Session) -> bool {
        self.config.require_pass.is_empty()
            || session.password.as_deref() == Some(self.config.require_pass.as_str())
    }

    // --- Replication verbs ---

    async fn exec_slave_of(&self, args: &[Bytes]) -> RespFrame {
        if args.len() != 2 {
            return OpalDBError::WrongArgumentCount("slaveof".into()).into();
        }
        if args[0].eq_ignore_ascii_case(b"no") && args[1].eq_ignore_ascii_case(b"one") {
            self.replication.close().await;
            self.set_role(Role::Master);
            return RespFrame::ok();
        }
        let host = String::from_utf8_lossy(&args[0]).to_string();
        let Ok(port) = String::from_utf8_lossy(&args[1]).parse::<u16>() else {
            return RespFrame::Error("ERR invalid master port".into());
        };
        self.replication.stop().await;
        self.replication.set_master(host, port).await;
        self.set_role(Role::Replica);
        // The sync session needs the Arc, which the propagation sender's
        // existence guarantees only for fully wired engines.
        if let Some(me) = self.self_arc() {
            self.replication.spawn_sync(me).await;
        }
        RespFrame::ok()
    }

    fn exec_replconf(&self, args: &[Bytes]) -> Option<RespFrame> {
        // REPLCONF ACK carries the replica's offset and takes no reply; the
        // announcement variants are acknowledged with OK.
        if args
            .first()
            .is_some_and(|sub| sub.eq_ignore_ascii_case(b"ack"))
        {
            return None;
        }
        Some(RespFrame::ok())
    }

    /// Master side of PSYNC: advertise FULLRESYNC, ship the snapshot and
    /// attach the connection as a replica link fed by the command stream.
    async fn exec_psync(&self, session: &mut Session) -> Option<RespFrame> {
        let snapshot_bytes = match snapshot::save_to_bytes(self) {
            Ok(bytes) => bytes,
            Err(e) => return Some(RespFrame::from(e)),
        };
        let header = format!(
            "FULLRESYNC {} {}",
            self.replicas.repl_id(),
            self.replicas.offset()
        );
        session.write_frame(RespFrame::SimpleString(header));
        session.write_frame(RespFrame::BulkString(snapshot_bytes));
        session.role = SessionRole::ReplicationLink;
        self.replicas.register(session.id, session.out_sender());
        None
    }

    // --- Persistence verbs ---

    async fn rewrite_aof(&self) -> RespFrame {
        let Some(aof) = self.aof.clone() else {
            return RespFrame::Error("ERR please enable aof before using rewrite".into());
        };
        let Some(me) = self.self_arc() else {
            return RespFrame::Error("ERR rewrite unavailable".into());
        };
        match aof.rewrite(&me).await {
            Ok(()) => RespFrame::ok(),
            Err(e) => RespFrame::Error(e.to_resp_string()),
        }
    }

    fn bg_rewrite_aof(&self) -> RespFrame {
        let Some(aof) = self.aof.clone() else {
            return RespFrame::Error("ERR please enable aof before using rewrite".into());
        };
        let Some(me) = self.self_arc() else {
            return RespFrame::Error("ERR rewrite unavailable".into());
        };
        tokio::spawn(async move {
            if let Err(e) = aof.rewrite(&me).await {
                error!("background AOF rewrite failed: {e}");
            }
        });
        RespFrame::SimpleString("Background append only file rewriting started".into())
    }

    async fn save_snapshot(&self) -> RespFrame {
        let path = self.snapshot_path();
        match snapshot::save(self, &path).await {
            Ok(()) => RespFrame::ok(),
            Err(e) => RespFrame::Error(e.to_resp_string()),
        }
    }

    fn bg_save_snapshot(&self) -> RespFrame {
        let Some(me) = self.self_arc() else {
            return RespFrame::Error("ERR save unavailable".into());
        };
        let path = self.snapshot_path();
        tokio::spawn(async move {
            if let Err(e) = snapshot::save(&me, &path).await {
                error!("background save failed: {e}");
            }
        });
        RespFrame::SimpleString("Background saving started".into())
    }

    fn snapshot_path(&self) -> String {
        if self.config.db_filename.is_empty() {
            "dump.opdb".to_string()
        } else {
            self.config.db_filename.clone()
        }
    }

    // --- Database management ---

    async fn flush_at(&self, index: usize) -> RespFrame {
        let fresh = SingleDb::new(index, Arc::clone(&self.wheel));
        if let Err(e) = self.install_db(index, fresh) {
            return e.into();
        }
        self.propagate(index, cmd_line(&["FLUSHDB"])).await;
        RespFrame::ok()
    }

    async fn flush_all(&self) -> RespFrame {
        for index in 0..self.dbs.len() {
            let fresh = SingleDb::new(index, Arc::clone(&self.wheel));
            if let Err(e) = self.install_db(index, fresh) {
                return e.into();
            }
        }
        self.propagate(0, cmd_line(&["FLUSHALL"])).await;
        RespFrame::ok()
    }

    fn exec_select(&self, session: &mut Session, args: &[Bytes]) -> RespFrame {
        let Ok(index) = String::from_utf8_lossy(&args[0]).parse::<usize>() else {
            return OpalDBError::InvalidDbIndex.into();
        };
        if index >= self.dbs.len() {
            return OpalDBError::DbIndexOutOfBounds.into();
        }
        session.db_index = index;
        RespFrame::ok()
    }

    /// COPY src dst [DB n] [REPLACE]: cross-database copy honoring the
    /// source TTL.
    async fn exec_copy(&self, session: &mut Session, args: &[Bytes]) -> RespFrame {
        let src_index = session.db_index;
        let mut dst_index = src_index;
        let mut replace = false;
        let mut i = 2;
        while i < args.len() {
            let opt = String::from_utf8_lossy(&args[i]).to_lowercase();
            match opt.as_str() {
                "db" => {
                    let Some(raw) = args.get(i + 1) else {
                        return OpalDBError::SyntaxError.into();
                    };
                    let Ok(index) = String::from_utf8_lossy(raw).parse::<usize>() else {
                        return OpalDBError::SyntaxError.into();
                    };
                    if index >= self.dbs.len() {
                        return OpalDBError::DbIndexOutOfBounds.into();
                    }
                    dst_index = index;
                    i += 1;
                }
                "replace" => replace = true,
                _ => return OpalDBError::SyntaxError.into(),
            }
            i += 1;
        }

        let (src_key, dst_key) = (&args[0], &args[1]);
        if src_key == dst_key && dst_index == src_index {
            return RespFrame::Error("ERR source and destination objects are the same".into());
        }
        let src = match self.db_at(src_index) {
            Ok(db) => db,
            Err(e) => return e.into(),
        };
        let dst = match self.db_at(dst_index) {
            Ok(db) => db,
            Err(e) => return e.into(),
        };
        let Some(value) = src.get_entry(src_key) else {
            return RespFrame::Integer(0);
        };
        if dst.contains_key(dst_key) && !replace {
            return RespFrame::Integer(0);
        }
        dst.put(dst_key.clone(), value);
        match src.ttl_of(src_key) {
            Some(at) => dst.expire_at(dst_key.clone(), at),
            None => {
                dst.persist(dst_key);
            }
        }
        let mut line = cmd_line(&["COPY"]);
        line.extend_from_slice(args);
        self.propagate(src_index, line).await;
        RespFrame::Integer(1)
    }

    /// Upgrades the weak self reference to an owning handle.
    fn self_arc(&self) -> Option<Arc<Self>> {
        self.weak_self.upgrade()
    }
}

#[async_trait]
impl DataEngine for MultiDb {
    async fn execute(&self, session: &mut Session, line: CmdLine) -> Option<RespFrame> {
        MultiDb::execute(self, session, line).await
    }

    async fn after_client_close(&self, session: &mut Session) {
        self.hub.unsubscribe_all(session).await;
        self.replicas.unregister(session.id);
    }

    async fn close(&self) {
        if let Some(cron) = self.cron.lock().take() {
            cron.abort();
        }
        self.replication.close().await;
        for cell in &self.dbs {
            cell.read().detach_propagator();
        }
        *self.propagate_tx.lock() = None;
        if let Some(worker) = self.worker.lock().await.take() {
            let _ = worker.await;
        }
        self.wheel.abort();
    }
}

async fn propagation_worker(
    mut rx: mpsc::Receiver<WorkUnit>,
    aof: Option<Arc<AofHandler>>,
    replicas: Arc<ReplicaRegistry>,
) {
    while let Some(unit) = rx.recv().await {
        if let Some(aof) = &aof {
            aof.append(&unit).await;
        }
        replicas.forward(&unit);
    }
    if let Some(aof) = &aof {
        aof.sync().await;
    }
}
