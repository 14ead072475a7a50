// src/server/mod.rs

//! The TCP front door: bind, accept, gate on `maxclients`, spawn one
//! connection task per socket.

use crate::config::Config;
use crate::connection::handler::handle_connection;
use crate::core::{DataEngine, OpalDBError};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::{Semaphore, broadcast};
use tracing::{info, warn};

pub async fn run(
    engine: Arc<dyn DataEngine>,
    config: Arc<Config>,
    shutdown: broadcast::Sender<()>,
) -> Result<(), OpalDBError> {
    let addr = format!("{}:{}", config.bind, config.port);
    let listener = TcpListener::bind(&addr).await?;
    info!("listening on {addr}");

    let limiter = if config.max_clients > 0 {
        Some(Arc::new(Semaphore::new(config.max_clients)))
    } else {
        None
    };

    let mut shutdown_rx = shutdown.subscribe();
    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => {
                info!("accept loop stopping");
                return Ok(());
            }
            accepted = listener.accept() => {
                let (socket, peer) = match accepted {
                    Ok(pair) => pair,
                    Err(e) => {
                        warn!("accept failed: {e}");
                        continue;
                    }
                };
                let permit = match &limiter {
                    Some(limiter) => match Arc::clone(limiter).try_acquire_owned() {
                        Ok(permit) => Some(permit),
                        Err(_) => {
                            warn!("rejecting {peer}: maxclients reached");
                            continue;
                        }
                    },
                    None => None,
                };
                let engine = Arc::clone(&engine);
                let per_conn_shutdown = shutdown.subscribe();
                tokio::spawn(async move {
                    let _permit = permit;
                    handle_connection(socket, engine, per_conn_shutdown).await;
                });
            }
        }
    }
}
