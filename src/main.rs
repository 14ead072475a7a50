// src/main.rs

//! The main entry point for the OpalDB server.

use anyhow::Result;
use opaldb::config::Config;
use opaldb::core::DataEngine;
use opaldb::core::cluster::Cluster;
use opaldb::core::database::MultiDb;
use opaldb::server;
use std::env;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{error, info};
use tracing_subscriber::filter::EnvFilter;

const VERSION: &str = env!("CARGO_PKG_VERSION");
const DEFAULT_CONFIG_PATH: &str = "opaldb.conf";

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = env::args().collect();
    if args.contains(&"--version".to_string()) {
        println!("OpalDB version {VERSION}");
        return Ok(());
    }

    let log_level = env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(log_level))
        .compact()
        .with_ansi(true)
        .init();

    // The config path may be given with --config; a missing default file
    // just means built-in defaults, but an explicit path must exist.
    let explicit = args
        .iter()
        .position(|arg| arg == "--config")
        .and_then(|i| args.get(i + 1))
        .map(|s| s.as_str());
    let config = match explicit {
        Some(path) => match Config::from_file(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Failed to load configuration: {e}");
                std::process::exit(1);
            }
        },
        None if Path::new(DEFAULT_CONFIG_PATH).exists() => {
            Config::from_file(DEFAULT_CONFIG_PATH)?
        }
        None => {
            info!("no config file found, using defaults");
            Config::default()
        }
    };
    let config = Arc::new(config);

    let engine: Arc<dyn DataEngine> = if config.cluster_enabled() {
        info!(
            "starting in cluster mode as {} with {} peer(s)",
            config.self_addr,
            config.peers.len()
        );
        Cluster::new(config.clone()).await?
    } else {
        info!("starting in standalone mode");
        MultiDb::new_standalone(config.clone()).await?
    };

    let (shutdown_tx, _) = broadcast::channel(1);
    let mut server_task = tokio::spawn(server::run(
        Arc::clone(&engine),
        config.clone(),
        shutdown_tx.clone(),
    ));

    tokio::select! {
        result = &mut server_task => {
            match result {
                Ok(Err(e)) => error!("accept loop failed: {e}"),
                Err(e) => error!("accept loop ended abnormally: {e}"),
                Ok(Ok(())) => {}
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown signal received");
            let _ = shutdown_tx.send(());
            let _ = server_task.await;
        }
    }
    engine.close().await;
    info!("bye");
    Ok(())
}
