use crate::common::constants::{DEFAULT_LOG_LEVEL, DEFAULT_POLL_TIMEOUT_MS};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;

/// Server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Server name, prefix of every generated connection name
    pub name: String,

    /// Address the acceptor binds
    pub address: SocketAddr,

    /// Number of pre-forked worker processes
    pub worker_count: usize,

    /// Disable Nagle's algorithm on accepted connections
    #[serde(default = "default_tcp_no_delay")]
    pub tcp_no_delay: bool,

    /// Upper bound on how long a loop sleeps between wakeups
    #[serde(default = "default_poll_timeout_ms")]
    pub poll_timeout_ms: i32,

    /// Default log filter when RUST_LOG is unset
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_tcp_no_delay() -> bool {
    true
}

fn default_poll_timeout_ms() -> i32 {
    DEFAULT_POLL_TIMEOUT_MS
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

impl ServerConfig {
    pub fn new(address: SocketAddr, name: impl Into<String>, worker_count: usize) -> Self {
        Self {
            name: name.into(),
            address,
            worker_count,
            tcp_no_delay: default_tcp_no_delay(),
            poll_timeout_ms: default_poll_timeout_ms(),
            log_level: default_log_level(),
        }
    }
}
