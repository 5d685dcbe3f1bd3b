pub const DEFAULT_READ_CHUNK_SIZE: usize = 64 * 1024; // 64KB
pub const DEFAULT_POLL_TIMEOUT_MS: i32 = 1000;
pub const DEFAULT_LOG_LEVEL: &str = "info";
pub const MAX_EVENTS_PER_POLL: usize = 1024;

/// Upper bound on `worker_count`.
pub const MAX_WORKERS: usize = 256;

/// Token of the listening socket in the parent loop and of the
/// WorkerChannel in a worker loop. Connection ids start at 1.
pub const CONTROL_TOKEN: u64 = 0;

pub const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];
