use std::net::SocketAddr;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Failed to bind to {addr}: {source}")]
    BindError {
        addr: SocketAddr,
        source: std::io::Error,
    },

    #[error("Failed to fork worker {worker}: {source}")]
    ForkError {
        worker: usize,
        source: std::io::Error,
    },

    #[error("No workers available to take the connection")]
    NoWorkers,

    #[error("Descriptor transfer to worker {worker} failed: {source}")]
    TransferError {
        worker: usize,
        source: std::io::Error,
    },

    #[error("Worker {worker} has exited ({reason})")]
    WorkerExited { worker: usize, reason: String },

    #[error("Connection {0} is not tracked by this process")]
    UnknownConnection(String),

    #[error("Connection {0} is already tracked by this process")]
    DuplicateConnection(String),

    #[error("Event loop has been torn down")]
    LoopTornDown,
}

impl ServerError {
    /// Failures of the parent-to-worker hand-off. The connection is dropped,
    /// the parent keeps running.
    pub fn is_transfer_failure(&self) -> bool {
        matches!(
            self,
            ServerError::NoWorkers
                | ServerError::TransferError { .. }
                | ServerError::WorkerExited { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, ServerError>;
