use crate::common::error::Result;
use crate::core::net::address::InetAddress;
use crate::core::net::fd::Socket;
use crate::core::net::socket::ListeningSocket;
use std::net::SocketAddr;
use std::os::unix::io::RawFd;
use tracing::info;

/// Acceptor: owns the passive socket. Lives only in the parent process.
pub struct Listener {
    addr: SocketAddr,
    socket: Option<ListeningSocket>,
}

impl Listener {
    /// Create an unbound listener for `addr`.
    pub fn new(addr: SocketAddr) -> Self {
        Self { addr, socket: None }
    }

    /// Bind and start listening. Calling it again while listening is a no-op.
    pub fn listen(&mut self) -> Result<()> {
        if self.socket.is_some() {
            return Ok(());
        }
        let socket = ListeningSocket::bind(self.addr)?;
        info!(address = %socket.local_addr()?, "Listening");
        self.socket = Some(socket);
        Ok(())
    }

    /// Accept a new client connection (non-blocking)
    pub fn accept(&self) -> Result<Option<(Socket, InetAddress)>> {
        match &self.socket {
            Some(socket) => socket.accept(),
            None => Ok(None),
        }
    }

    /// Close the passive socket without touching any poller it is
    /// registered with.
    pub fn abandon(&mut self) {
        self.socket = None;
    }

    pub fn is_listening(&self) -> bool {
        self.socket.is_some()
    }

    /// Bound address, which differs from the configured one when binding port 0
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.socket.as_ref().and_then(|s| s.local_addr().ok())
    }

    /// Get the file descriptor for event polling
    pub fn as_raw_fd(&self) -> Option<RawFd> {
        self.socket.as_ref().map(|s| s.as_raw_fd())
    }
}
