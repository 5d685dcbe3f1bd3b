use crate::common::error::{Result, ServerError};
use crate::core::net::address::InetAddress;
use crate::core::net::fd::Socket;
use std::net::{SocketAddr, TcpListener};
use std::os::unix::io::{AsRawFd, RawFd};

/// Non-blocking bound TCP listening socket.
pub struct ListeningSocket {
    listener: TcpListener,
}

impl ListeningSocket {
    pub fn bind(addr: SocketAddr) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .map_err(|source| ServerError::BindError { addr, source })?;
        listener.set_nonblocking(true)?;
        Ok(Self { listener })
    }

    /// Accept one pending connection. `Ok(None)` when the backlog is empty.
    /// The accepted socket is returned in blocking mode; whoever ends up
    /// owning it decides its mode.
    pub fn accept(&self) -> Result<Option<(Socket, InetAddress)>> {
        match self.listener.accept() {
            Ok((stream, addr)) => {
                stream.set_nonblocking(false)?;
                Ok(Some((Socket::from_stream(stream), InetAddress::new(addr))))
            }
            Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => Ok(None),
            Err(ref e) if e.kind() == std::io::ErrorKind::Interrupted => Ok(None),
            Err(e) => Err(ServerError::NetworkError(format!(
                "Failed to accept connection: {}",
                e
            ))),
        }
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn as_raw_fd(&self) -> RawFd {
        self.listener.as_raw_fd()
    }
}
