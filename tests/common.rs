// Common test utilities shared by the integration tests

use prefork::application::config::models::ServerConfig;
use prefork::TcpServer;
use std::time::{Duration, Instant};

/// Loopback config on an ephemeral port with a short poll timeout
#[allow(dead_code)] // Used in prefork_tests.rs
pub fn test_config(name: &str, workers: usize) -> ServerConfig {
    let mut config = ServerConfig::new("127.0.0.1:0".parse().unwrap(), name, workers);
    config.poll_timeout_ms = 50;
    config
}

/// Drive the acceptor loop until `done` holds or `limit` passes
#[allow(dead_code)] // Used in prefork_tests.rs
pub fn drive_until(
    server: &mut TcpServer,
    limit: Duration,
    mut done: impl FnMut() -> bool,
) -> bool {
    let deadline = Instant::now() + limit;
    while Instant::now() < deadline {
        if done() {
            return true;
        }
        server.poll_once(50).unwrap();
    }
    done()
}

/// Poll `check` until it yields a value or `limit` passes
#[allow(dead_code)] // Used in pool_tests.rs
pub fn wait_for<T>(limit: Duration, mut check: impl FnMut() -> Option<T>) -> Option<T> {
    let deadline = Instant::now() + limit;
    loop {
        if let Some(value) = check() {
            return Some(value);
        }
        if Instant::now() >= deadline {
            return None;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
}
