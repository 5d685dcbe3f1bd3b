use crate::common::error::{Result, ServerError};
use std::net::TcpStream;
use std::os::unix::io::{AsFd, AsRawFd, BorrowedFd, FromRawFd, IntoRawFd, OwnedFd, RawFd};

/// Exclusively owned socket descriptor, closed on drop.
///
/// Not `Clone`: handing a `Socket` to another owner (a connection, or a
/// worker through [`WorkerPool::dispatch`](crate::core::process::WorkerPool::dispatch))
/// moves it, so the sender cannot touch the descriptor afterwards.
#[derive(Debug)]
pub struct Socket {
    fd: OwnedFd,
}

impl Socket {
    pub fn new(fd: OwnedFd) -> Self {
        Self { fd }
    }

    /// Take ownership of a raw descriptor.
    ///
    /// # Safety
    /// `fd` must be open and not owned by anything else.
    pub unsafe fn from_raw(fd: RawFd) -> Self {
        Self {
            fd: unsafe { OwnedFd::from_raw_fd(fd) },
        }
    }

    pub fn from_stream(stream: TcpStream) -> Self {
        Self {
            fd: OwnedFd::from(stream),
        }
    }

    pub fn as_raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }

    pub fn set_non_blocking(&self) -> Result<()> {
        unsafe {
            let flags = libc::fcntl(self.as_raw_fd(), libc::F_GETFL);
            if flags < 0 {
                return Err(ServerError::NetworkError(
                    "Failed to get socket flags".to_string(),
                ));
            }

            if libc::fcntl(self.as_raw_fd(), libc::F_SETFL, flags | libc::O_NONBLOCK) < 0 {
                return Err(ServerError::NetworkError(
                    "Failed to set non-blocking mode".to_string(),
                ));
            }
        }
        Ok(())
    }

    /// Toggle Nagle's algorithm (`TCP_NODELAY`).
    pub fn set_tcp_no_delay(&self, on: bool) -> Result<()> {
        let value: libc::c_int = on.into();
        let rc = unsafe {
            libc::setsockopt(
                self.as_raw_fd(),
                libc::IPPROTO_TCP,
                libc::TCP_NODELAY,
                &value as *const libc::c_int as *const libc::c_void,
                std::mem::size_of::<libc::c_int>() as libc::socklen_t,
            )
        };
        if rc < 0 {
            return Err(ServerError::NetworkError(format!(
                "Failed to set TCP_NODELAY: {}",
                std::io::Error::last_os_error()
            )));
        }
        Ok(())
    }

    /// Half-close: no more writes, reads stay open.
    pub fn shutdown_write(&self) -> Result<()> {
        if unsafe { libc::shutdown(self.as_raw_fd(), libc::SHUT_WR) } < 0 {
            return Err(ServerError::IoError(std::io::Error::last_os_error()));
        }
        Ok(())
    }
}

impl AsFd for Socket {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.fd.as_fd()
    }
}

impl AsRawFd for Socket {
    fn as_raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }
}

impl IntoRawFd for Socket {
    fn into_raw_fd(self) -> RawFd {
        self.fd.into_raw_fd()
    }
}

impl From<OwnedFd> for Socket {
    fn from(fd: OwnedFd) -> Self {
        Self::new(fd)
    }
}
