// src/core/cluster/client.rs

//! The RESP client a node uses to talk to its peers, and the per-peer pool
//! those clients are borrowed from.

use crate::core::protocol::RespFrameCodec;
use crate::core::{CmdLine, OpalDBError, RespFrame, cmd_line};
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::net::TcpStream;
use tokio_util::codec::Framed;
use tracing::debug;

/// One framed request/response connection to a peer node.
pub struct PeerClient {
    framed: Framed<TcpStream, RespFrameCodec>,
}

impl PeerClient {
    pub async fn connect(addr: &str) -> Result<Self, OpalDBError> {
        let stream = TcpStream::connect(addr).await?;
        Ok(Self {
            framed: Framed::new(stream, RespFrameCodec),
        })
    }

    /// Sends one command line and waits for its reply.
    pub async fn send_line(&mut self, line: &CmdLine) -> Result<RespFrame, OpalDBError> {
        self.framed.send(RespFrame::from_cmd_line(line)).await?;
        match self.framed.next().await {
            Some(Ok(frame)) => Ok(frame),
            Some(Err(e)) => Err(e),
            None => Err(OpalDBError::ClusterError(
                "peer connection closed".into(),
            )),
        }
    }
}

/// A small checkout/check-in pool of `PeerClient`s for one peer. Borrowers
/// return healthy connections; broken ones are simply dropped.
pub struct ConnectionPool {
    peer: String,
    auth: Option<String>,
    idle: Mutex<Vec<PeerClient>>,
}

impl ConnectionPool {
    pub fn new(peer: String, auth: Option<String>) -> Self {
        Self {
            peer,
            auth,
            idle: Mutex::new(Vec::new()),
        }
    }

    /// Pops an idle connection or dials a new one, authenticating when the
    /// cluster requires a password.
    pub async fn borrow(&self) -> Result<PeerClient, OpalDBError> {
        if let Some(client) = self.idle.lock().pop() {
            return Ok(client);
        }
        debug!("dialing cluster peer {}", self.peer);
        let mut client = PeerClient::connect(&self.peer).await?;
        if let Some(password) = &self.auth {
            let mut line = cmd_line(&["AUTH"]);
            line.push(Bytes::from(password.clone().into_bytes()));
            let reply = client.send_line(&line).await?;
            if reply.is_error() {
                return Err(OpalDBError::ClusterError(format!(
                    "peer {} rejected AUTH",
                    self.peer
                )));
            }
        }
        Ok(client)
    }

    pub fn give_back(&self, client: PeerClient) {
        self.idle.lock().push(client);
    }
}
