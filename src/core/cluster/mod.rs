// src/core/cluster/mod.rs

//! The cluster coordinator. A node owns its address, the full peer list, a
//! consistent-hash picker, one connection pool per peer and the embedded
//! standalone engine; commands either execute locally or are relayed to the
//! key's owner.

pub mod client;
pub mod picker;
pub mod tx;

use crate::config::Config;
use crate::connection::Session;
use crate::core::database::{MultiDb, transaction};
use crate::core::database::registry;
use crate::core::{CmdLine, DataEngine, OpalDBError, RespFrame, cmd_line};
use async_trait::async_trait;
use bytes::Bytes;
use client::ConnectionPool;
use futures::FutureExt;
use picker::{ConsistentPicker, PeerPicker};
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::error;

/// The relay seam: how a command line reaches another node. Pluggable so
/// tests can intercept cross-node traffic.
#[async_trait]
pub trait Relay: Send + Sync {
    async fn relay(
        &self,
        cluster: &Cluster,
        node: &str,
        session: &mut Session,
        line: &CmdLine,
    ) -> RespFrame;
}

/// Production relay: local execution for self, pooled client exchange
/// (SELECT-prefixed) for peers.
pub struct DefaultRelay;

#[async_trait]
impl Relay for DefaultRelay {
    async fn relay(
        &self,
        cluster: &Cluster,
        node: &str,
        session: &mut Session,
        line: &CmdLine,
    ) -> RespFrame {
        if node == cluster.self_addr {
            return cluster
                .db
                .execute(session, line.clone())
                .await
                .unwrap_or_else(RespFrame::ok);
        }
        let Some(pool) = cluster.pools.get(node) else {
            return RespFrame::Error("ERR connection pool not found".into());
        };
        let mut client = match pool.borrow().await {
            Ok(client) => client,
            Err(e) => return e.into(),
        };
        let select = cmd_line(&["SELECT", &session.db_index.to_string()]);
        let exchange = async {
            client.send_line(&select).await?;
            client.send_line(line).await
        }
        .await;
        match exchange {
            Ok(reply) => {
                pool.give_back(client);
                reply
            }
            // A broken connection is dropped instead of returned to the pool.
            Err(e) => e.into(),
        }
    }
}

pub struct Cluster {
    self_addr: String,
    nodes: Vec<String>,
    picker: Box<dyn PeerPicker>,
    pools: HashMap<String, ConnectionPool>,
    pub(crate) db: Arc<MultiDb>,
    relay: Arc<dyn Relay>,
    config: Arc<Config>,
}

impl Cluster {
    /// Builds the coordinator around a fully wired standalone engine.
    pub async fn new(config: Arc<Config>) -> Result<Arc<Self>, OpalDBError> {
        let db = MultiDb::new_standalone(config.clone()).await?;
        Ok(Arc::new(Self::with_engine(config, db, Arc::new(DefaultRelay))))
    }

    /// Assembles a coordinator over an existing engine with a caller-chosen
    /// relay. Used by `new` and by tests.
    pub fn with_engine(config: Arc<Config>, db: Arc<MultiDb>, relay: Arc<dyn Relay>) -> Self {
        let self_addr = config.self_addr.clone();
        let mut nodes: Vec<String> = Vec::new();
        for peer in &config.peers {
            if !peer.is_empty() && !nodes.contains(peer) {
                nodes.push(peer.clone());
            }
        }
        if !nodes.contains(&self_addr) {
            nodes.push(self_addr.clone());
        }
        let mut picker = ConsistentPicker::new(picker::DEFAULT_VIRTUAL_NODES);
        picker.add_nodes(&nodes);

        let auth = if config.require_pass.is_empty() {
            None
        } else {
            Some(config.require_pass.clone())
        };
        let pools = config
            .peers
            .iter()
            .filter(|peer| !peer.is_empty() && **peer != self_addr)
            .map(|peer| (peer.clone(), ConnectionPool::new(peer.clone(), auth.clone())))
            .collect();

        Self {
            self_addr,
            nodes,
            picker: Box::new(picker),
            pools,
            db,
            relay,
            config,
        }
    }

    pub fn self_addr(&self) -> &str {
        &self.self_addr
    }

    /// The embedded standalone engine this node stores its own slice in.
    pub fn engine(&self) -> &Arc<MultiDb> {
        &self.db
    }

    pub fn nodes(&self) -> &[String] {
        &self.nodes
    }

    /// The node owning `key` under the picker. Falls back to self when the
    /// ring is empty.
    pub fn owner_of(&self, key: &[u8]) -> String {
        self.picker
            .pick_node(key)
            .unwrap_or_else(|| self.self_addr.clone())
    }

    pub async fn relay(&self, node: &str, session: &mut Session, line: &CmdLine) -> RespFrame {
        self.relay.relay(self, node, session, line).await
    }

    async fn do_execute(&self, session: &mut Session, line: CmdLine) -> Option<RespFrame> {
        if line.is_empty() {
            return Some(OpalDBError::ProtocolError("empty command".into()).into());
        }
        let name = String::from_utf8_lossy(&line[0]).to_lowercase();
        let args = &line[1..];

        // Transaction control and connection-local verbs never leave the
        // node the client is talking to.
        match name.as_str() {
            "auth" => return self.db.execute(session, line).await,
            _ => {}
        }
        if !self.db.authenticated(session) {
            return Some(OpalDBError::AuthRequired.into());
        }
        match name.as_str() {
            "multi" => {
                if line.len() != 1 {
                    return Some(OpalDBError::WrongArgumentCount(name).into());
                }
                return Some(transaction::start_multi(session));
            }
            "discard" => {
                if line.len() != 1 {
                    return Some(OpalDBError::WrongArgumentCount(name).into());
                }
                return Some(transaction::discard_multi(session));
            }
            "exec" => {
                if line.len() != 1 {
                    return Some(OpalDBError::WrongArgumentCount(name).into());
                }
                return Some(tx::exec_multi(self, session).await);
            }
            "select" => {
                if line.len() != 2 {
                    return Some(OpalDBError::WrongArgumentCount(name).into());
                }
                return self.db.execute(session, line).await;
            }
            _ => {}
        }
        if session.multi {
            return Some(transaction::enqueue(session, line));
        }
        match name.as_str() {
            "watch" => {
                if line.len() < 2 {
                    return Some(OpalDBError::WrongArgumentCount(name).into());
                }
                Some(tx::exec_watch(self, session, args).await)
            }
            tx::RELAY_COMMAND => Some(tx::exec_relayed_multi(self, session, &line).await),
            "keys" => {
                if line.len() != 2 {
                    return Some(OpalDBError::WrongArgumentCount(name).into());
                }
                Some(self.fan_out_keys(session, &line).await)
            }
            "flushall" | "flushdb" => Some(self.broadcast(session, &line).await),
            // Node-local concerns: pub/sub membership, replication role,
            // persistence controls and diagnostics.
            "subscribe" | "unsubscribe" | "publish" | "ping" | "slaveof" | "replconf"
            | "psync" | "rewriteaof" | "bgrewriteaof" | "save" | "bgsave" | "dbsize"
            | "copy" => self.db.execute(session, line).await,
            _ => Some(self.route_by_keys(session, &name, &line).await),
        }
    }

    /// Default routing: the declared key set decides the owner; key-less
    /// commands run locally.
    async fn route_by_keys(&self, session: &mut Session, name: &str, line: &CmdLine) -> RespFrame {
        if registry::lookup(name).is_none() {
            return OpalDBError::UnknownClusterCommand(name.to_string()).into();
        }
        let (read_keys, write_keys) = registry::related_keys(line);
        let mut keys = read_keys;
        keys.extend(write_keys);
        if keys.is_empty() {
            return self
                .db
                .execute(session, line.clone())
                .await
                .unwrap_or_else(RespFrame::ok);
        }
        let groups = self.group_by_owner(&keys);
        if groups.len() > 1 {
            return RespFrame::Error("ERR keys in request don't map to the same node".into());
        }
        let owner = groups.into_keys().next().expect("one owner group");
        self.relay(&owner, session, line).await
    }

    /// KEYS fans out to every node and merges the per-node matches.
    async fn fan_out_keys(&self, session: &mut Session, line: &CmdLine) -> RespFrame {
        let mut merged = Vec::new();
        for node in self.nodes.clone() {
            match self.relay(&node, session, line).await {
                RespFrame::Array(items) => merged.extend(items),
                RespFrame::Error(message) => return RespFrame::Error(message),
                other => {
                    return RespFrame::Error(format!(
                        "ERR unexpected KEYS reply from {node}: {other:?}"
                    ));
                }
            }
        }
        RespFrame::Array(merged)
    }

    /// FLUSH commands run on every node.
    async fn broadcast(&self, session: &mut Session, line: &CmdLine) -> RespFrame {
        for node in self.nodes.clone() {
            let reply = self.relay(&node, session, line).await;
            if reply.is_error() {
                return reply;
            }
        }
        RespFrame::ok()
    }

    pub(crate) fn group_by_owner(&self, keys: &[Bytes]) -> HashMap<String, Vec<Bytes>> {
        let mut groups: HashMap<String, Vec<Bytes>> = HashMap::new();
        for key in keys {
            groups
                .entry(self.owner_of(key))
                .or_default()
                .push(key.clone());
        }
        groups
    }
}

#[async_trait]
impl DataEngine for Cluster {
    async fn execute(&self, session: &mut Session, line: CmdLine) -> Option<RespFrame> {
        match AssertUnwindSafe(self.do_execute(session, line))
            .catch_unwind()
            .await
        {
            Ok(reply) => reply,
            Err(_) => {
                error!("cluster command handler panicked");
                Some(RespFrame::Error("ERR unknown error".into()))
            }
        }
    }

    async fn after_client_close(&self, session: &mut Session) {
        self.db.after_client_close(session).await;
    }

    async fn close(&self) {
        self.db.close().await;
    }
}
