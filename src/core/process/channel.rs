//! Parent/worker control link.
//!
//! A `SOCK_SEQPACKET` Unix socket pair created before fork. Each message
//! carries one descriptor (`SCM_RIGHTS`) together with an 8-byte sequence
//! number, so a descriptor and its payload arrive atomically and in send
//! order.

use crate::common::error::{Result, ServerError};
use crate::core::net::fd::Socket;
use std::io;
use std::mem;
use std::os::unix::io::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::ptr;

const PAYLOAD_LEN: usize = mem::size_of::<u64>();

/// Control buffer, 8-byte aligned for `cmsghdr`. Room for a handful of
/// descriptors so a misbehaving sender cannot truncate the first one.
type ControlBuffer = [u64; 8];

/// A descriptor received from the other end.
#[derive(Debug)]
pub struct Transfer {
    pub socket: Socket,
    pub sequence: u64,
}

#[derive(Debug)]
pub enum ChannelRecv {
    Descriptor(Transfer),
    /// A message arrived but carried no usable descriptor (control data
    /// truncated, e.g. EMFILE in the receiver, or malformed). Anything it did
    /// carry has been closed.
    Dropped(String),
    /// Nothing queued right now.
    Empty,
    /// The other end is closed.
    Closed,
}

/// One end of a WorkerChannel.
#[derive(Debug)]
pub struct ChannelEnd {
    fd: OwnedFd,
}

/// Create a connected pair of endpoints: `(parent end, worker end)`.
pub fn pair() -> Result<(ChannelEnd, ChannelEnd)> {
    let mut fds: [libc::c_int; 2] = [-1, -1];
    let rc = unsafe {
        libc::socketpair(
            libc::AF_UNIX,
            libc::SOCK_SEQPACKET | libc::SOCK_CLOEXEC,
            0,
            fds.as_mut_ptr(),
        )
    };
    if rc < 0 {
        return Err(ServerError::NetworkError(format!(
            "Failed to create worker channel: {}",
            io::Error::last_os_error()
        )));
    }
    unsafe {
        Ok((
            ChannelEnd {
                fd: OwnedFd::from_raw_fd(fds[0]),
            },
            ChannelEnd {
                fd: OwnedFd::from_raw_fd(fds[1]),
            },
        ))
    }
}

impl ChannelEnd {
    /// Send `socket` to the other end. The local copy is closed whether or
    /// not the send succeeds; on success the receiver holds the only one.
    pub fn send(&self, socket: Socket, sequence: u64) -> io::Result<()> {
        let payload = sequence.to_le_bytes();
        let mut iov = libc::iovec {
            iov_base: payload.as_ptr() as *mut libc::c_void,
            iov_len: payload.len(),
        };
        let mut control: ControlBuffer = [0; 8];

        let mut msg: libc::msghdr = unsafe { mem::zeroed() };
        msg.msg_iov = &mut iov;
        msg.msg_iovlen = 1;
        msg.msg_control = control.as_mut_ptr() as *mut libc::c_void;
        msg.msg_controllen = unsafe { libc::CMSG_SPACE(mem::size_of::<RawFd>() as u32) } as _;

        unsafe {
            let cmsg = libc::CMSG_FIRSTHDR(&msg);
            (*cmsg).cmsg_level = libc::SOL_SOCKET;
            (*cmsg).cmsg_type = libc::SCM_RIGHTS;
            (*cmsg).cmsg_len = libc::CMSG_LEN(mem::size_of::<RawFd>() as u32) as _;
            ptr::write_unaligned(libc::CMSG_DATA(cmsg) as *mut RawFd, socket.as_raw_fd());
        }

        loop {
            let n = unsafe { libc::sendmsg(self.fd.as_raw_fd(), &msg, libc::MSG_NOSIGNAL) };
            if n >= 0 {
                if n as usize != PAYLOAD_LEN {
                    return Err(io::Error::new(
                        io::ErrorKind::WriteZero,
                        "short write on worker channel",
                    ));
                }
                return Ok(());
            }
            let err = io::Error::last_os_error();
            if err.kind() != io::ErrorKind::Interrupted {
                return Err(err);
            }
        }
    }

    /// Receive at most one descriptor without blocking.
    pub fn recv(&self) -> Result<ChannelRecv> {
        let mut payload = [0u8; PAYLOAD_LEN];
        let mut iov = libc::iovec {
            iov_base: payload.as_mut_ptr() as *mut libc::c_void,
            iov_len: payload.len(),
        };
        let mut control: ControlBuffer = [0; 8];

        let mut msg: libc::msghdr = unsafe { mem::zeroed() };
        msg.msg_iov = &mut iov;
        msg.msg_iovlen = 1;
        msg.msg_control = control.as_mut_ptr() as *mut libc::c_void;
        msg.msg_controllen = mem::size_of::<ControlBuffer>() as _;

        let n = loop {
            let n = unsafe {
                libc::recvmsg(
                    self.fd.as_raw_fd(),
                    &mut msg,
                    libc::MSG_DONTWAIT | libc::MSG_CMSG_CLOEXEC,
                )
            };
            if n >= 0 {
                break n as usize;
            }
            let err = io::Error::last_os_error();
            match err.kind() {
                io::ErrorKind::Interrupted => continue,
                io::ErrorKind::WouldBlock => return Ok(ChannelRecv::Empty),
                _ => return Err(ServerError::IoError(err)),
            }
        };

        let mut received = take_descriptors(&msg);

        if n == 0 && received.is_empty() && msg.msg_flags & libc::MSG_CTRUNC == 0 {
            return Ok(ChannelRecv::Closed);
        }
        if msg.msg_flags & libc::MSG_CTRUNC != 0 {
            return Ok(ChannelRecv::Dropped(format!(
                "control data truncated, {} descriptors kept",
                received.len()
            )));
        }
        if n != PAYLOAD_LEN || received.len() != 1 {
            return Ok(ChannelRecv::Dropped(format!(
                "malformed message: {} payload bytes, {} descriptors",
                n,
                received.len()
            )));
        }

        let fd = received.remove(0);
        Ok(ChannelRecv::Descriptor(Transfer {
            socket: Socket::new(fd),
            sequence: u64::from_le_bytes(payload),
        }))
    }

    pub fn as_raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }
}

impl AsRawFd for ChannelEnd {
    fn as_raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }
}

/// Adopt every descriptor carried by `msg`, so none can leak.
fn take_descriptors(msg: &libc::msghdr) -> Vec<OwnedFd> {
    let mut fds = Vec::new();
    unsafe {
        let mut cmsg = libc::CMSG_FIRSTHDR(msg);
        while !cmsg.is_null() {
            if (*cmsg).cmsg_level == libc::SOL_SOCKET && (*cmsg).cmsg_type == libc::SCM_RIGHTS {
                let data = libc::CMSG_DATA(cmsg) as *const RawFd;
                let len = (*cmsg).cmsg_len as usize - libc::CMSG_LEN(0) as usize;
                for i in 0..len / mem::size_of::<RawFd>() {
                    let fd = ptr::read_unaligned(data.add(i));
                    fds.push(OwnedFd::from_raw_fd(fd));
                }
            }
            cmsg = libc::CMSG_NXTHDR(msg, cmsg);
        }
    }
    fds
}
