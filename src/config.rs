// src/config.rs

//! Server configuration: a plain `key value` text file, one setting per
//! line, `#` starting a comment line. Unknown keys are ignored; missing keys
//! keep their defaults.

use anyhow::{Context, Result};
use std::fs;
use tracing::warn;

#[derive(Debug, Clone)]
pub struct Config {
    /// Listen address.
    pub bind: String,
    /// Listen port.
    pub port: u16,
    /// `yes` enables the append-only file.
    pub append_only: bool,
    /// AOF path.
    pub append_filename: String,
    /// Cap on concurrent connections; 0 means unlimited.
    pub max_clients: usize,
    /// When non-empty, clients must AUTH before anything else.
    pub require_pass: String,
    /// Number of logical databases.
    pub database_count: usize,
    /// Snapshot path, loaded on start when the AOF is disabled.
    pub db_filename: String,
    /// Password sent to the master during the replica handshake.
    pub master_auth: String,
    /// Port announced via REPLCONF; 0 falls back to `port`.
    pub slave_announce_port: u16,
    /// Address announced via REPLCONF.
    pub slave_announce_ip: String,
    /// Seconds of master silence before the replica reconnects.
    pub repl_timeout_secs: u64,
    /// Cluster peers, comma separated in the file.
    pub peers: Vec<String>,
    /// This node's advertised address in cluster mode.
    pub self_addr: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".to_string(),
            port: 6379,
            append_only: false,
            append_filename: "appendonly.aof".to_string(),
            max_clients: 0,
            require_pass: String::new(),
            database_count: 16,
            db_filename: String::new(),
            master_auth: String::new(),
            slave_announce_port: 0,
            slave_announce_ip: String::new(),
            repl_timeout_secs: 60,
            peers: Vec::new(),
            self_addr: String::new(),
        }
    }
}

impl Config {
    pub fn from_file(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file \"{path}\""))?;
        Ok(Self::parse(&contents))
    }

    pub fn parse(contents: &str) -> Self {
        let mut config = Self::default();
        for raw_line in contents.lines() {
            let line = raw_line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((key, value)) = line.split_once(' ') else {
                continue;
            };
            let key = key.to_lowercase();
            let value = value.trim();
            match key.as_str() {
                "bind" => config.bind = value.to_string(),
                "port" => set_number(&mut config.port, &key, value),
                "appendonly" => config.append_only = value == "yes",
                "appendfilename" => config.append_filename = value.to_string(),
                "maxclients" => set_number(&mut config.max_clients, &key, value),
                "requirepass" => config.require_pass = value.to_string(),
                "databasecount" => {
                    set_number(&mut config.database_count, &key, value);
                    if config.database_count == 0 {
                        config.database_count = Self::default().database_count;
                    }
                }
                "dbfilename" => config.db_filename = value.to_string(),
                "masterauth" => config.master_auth = value.to_string(),
                "slave-announce-port" => set_number(&mut config.slave_announce_port, &key, value),
                "slave-announce-ip" => config.slave_announce_ip = value.to_string(),
                "repl-timeout" => set_number(&mut config.repl_timeout_secs, &key, value),
                "peers" => {
                    config.peers = value
                        .split(',')
                        .map(|peer| peer.trim().to_string())
                        .filter(|peer| !peer.is_empty())
                        .collect();
                }
                "self" => config.self_addr = value.to_string(),
                _ => {}
            }
        }
        config
    }

    /// Cluster mode requires both a peer list and this node's own address.
    pub fn cluster_enabled(&self) -> bool {
        !self.peers.is_empty() && !self.self_addr.is_empty()
    }
}

fn set_number<T: std::str::FromStr>(slot: &mut T, key: &str, value: &str) {
    match value.parse() {
        Ok(parsed) => *slot = parsed,
        Err(_) => warn!("ignoring non-numeric value for \"{key}\": {value}"),
    }
}
