use crate::common::error::{Result, ServerError};
use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4, SocketAddrV6};
use std::os::unix::io::AsRawFd;

/// IPv4/IPv6 endpoint of a TCP socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InetAddress(SocketAddr);

impl InetAddress {
    pub fn new(addr: SocketAddr) -> Self {
        Self(addr)
    }

    /// Address the socket is bound to (`getsockname`).
    pub fn resolve_local(socket: &impl AsRawFd) -> Result<Self> {
        Self::resolve(socket.as_raw_fd(), libc::getsockname)
    }

    /// Address of the remote end (`getpeername`).
    pub fn resolve_peer(socket: &impl AsRawFd) -> Result<Self> {
        Self::resolve(socket.as_raw_fd(), libc::getpeername)
    }

    fn resolve(
        fd: libc::c_int,
        query: unsafe extern "C" fn(
            libc::c_int,
            *mut libc::sockaddr,
            *mut libc::socklen_t,
        ) -> libc::c_int,
    ) -> Result<Self> {
        let mut storage: libc::sockaddr_storage = unsafe { std::mem::zeroed() };
        let mut len = std::mem::size_of::<libc::sockaddr_storage>() as libc::socklen_t;
        let rc = unsafe {
            query(
                fd,
                &mut storage as *mut libc::sockaddr_storage as *mut libc::sockaddr,
                &mut len,
            )
        };
        if rc < 0 {
            return Err(ServerError::IoError(std::io::Error::last_os_error()));
        }
        from_storage(&storage).map(Self)
    }

    pub fn socket_addr(&self) -> SocketAddr {
        self.0
    }

    pub fn port(&self) -> u16 {
        self.0.port()
    }

    pub fn to_ip_port(&self) -> String {
        self.0.to_string()
    }
}

fn from_storage(storage: &libc::sockaddr_storage) -> Result<SocketAddr> {
    match storage.ss_family as libc::c_int {
        libc::AF_INET => {
            let sin = unsafe {
                &*(storage as *const libc::sockaddr_storage as *const libc::sockaddr_in)
            };
            let ip = Ipv4Addr::from(u32::from_be(sin.sin_addr.s_addr));
            Ok(SocketAddr::V4(SocketAddrV4::new(ip, u16::from_be(sin.sin_port))))
        }
        libc::AF_INET6 => {
            let sin6 = unsafe {
                &*(storage as *const libc::sockaddr_storage as *const libc::sockaddr_in6)
            };
            let ip = Ipv6Addr::from(sin6.sin6_addr.s6_addr);
            Ok(SocketAddr::V6(SocketAddrV6::new(
                ip,
                u16::from_be(sin6.sin6_port),
                sin6.sin6_flowinfo,
                sin6.sin6_scope_id,
            )))
        }
        family => Err(ServerError::NetworkError(format!(
            "Unsupported address family {}",
            family
        ))),
    }
}

impl From<SocketAddr> for InetAddress {
    fn from(addr: SocketAddr) -> Self {
        Self(addr)
    }
}

impl fmt::Display for InetAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
