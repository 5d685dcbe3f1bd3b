pub mod application;
pub mod common;
pub mod core;

pub use application::config::{ConfigLoader, ServerConfig};
pub use application::server::{ServerStage, TcpServer};
pub use common::error::{Result, ServerError};
