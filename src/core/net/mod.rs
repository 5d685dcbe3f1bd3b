pub mod address;
pub mod connection;
pub mod fd;
pub mod io;
pub mod socket;

pub use address::InetAddress;
pub use connection::{
    ConnectionCallback, ConnectionEvent, ConnectionState, MessageCallback, TcpConnection,
};
pub use fd::Socket;
pub use socket::ListeningSocket;
