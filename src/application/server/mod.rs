pub mod connection_map;
pub mod listener;
pub mod naming;
pub mod tcp_server;

pub use connection_map::ConnectionMap;
pub use listener::Listener;
pub use tcp_server::{ServerStage, TcpServer};
