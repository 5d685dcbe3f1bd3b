use crate::common::error::{Result, ServerError};
use libc::{
    epoll_create1, epoll_ctl, epoll_event, epoll_wait, EPOLLERR, EPOLLHUP, EPOLLIN, EPOLLOUT,
    EPOLLRDHUP, EPOLL_CLOEXEC, EPOLL_CTL_ADD, EPOLL_CTL_DEL, EPOLL_CTL_MOD,
};
use std::os::unix::io::{AsRawFd, FromRawFd, OwnedFd, RawFd};

/// Readiness a descriptor is registered for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interest {
    pub readable: bool,
    pub writable: bool,
}

impl Interest {
    pub const READABLE: Interest = Interest {
        readable: true,
        writable: false,
    };
    pub const READ_WRITE: Interest = Interest {
        readable: true,
        writable: true,
    };

    fn as_epoll(self) -> u32 {
        let mut events = 0u32;
        if self.readable {
            events |= (EPOLLIN | EPOLLRDHUP) as u32;
        }
        if self.writable {
            events |= EPOLLOUT as u32;
        }
        events
    }
}

/// One readiness notification. Hang-up and error conditions are folded into
/// `is_read` so the owner discovers them through a failing or empty read.
#[derive(Debug, Clone, Copy)]
pub struct Event {
    pub token: u64,
    pub is_read: bool,
    pub is_write: bool,
}

pub struct Poller {
    epfd: OwnedFd,
}

impl Poller {
    pub fn new() -> Result<Self> {
        let epfd = unsafe { epoll_create1(EPOLL_CLOEXEC) };
        if epfd < 0 {
            return Err(ServerError::NetworkError(format!(
                "Failed to create epoll instance: {}",
                std::io::Error::last_os_error()
            )));
        }
        Ok(Self {
            epfd: unsafe { OwnedFd::from_raw_fd(epfd) },
        })
    }

    pub fn register(&self, fd: RawFd, token: u64, interest: Interest) -> Result<()> {
        self.ctl(EPOLL_CTL_ADD, fd, token, interest)
    }

    pub fn reregister(&self, fd: RawFd, token: u64, interest: Interest) -> Result<()> {
        self.ctl(EPOLL_CTL_MOD, fd, token, interest)
    }

    pub fn deregister(&self, fd: RawFd) -> Result<()> {
        let rc = unsafe {
            epoll_ctl(
                self.epfd.as_raw_fd(),
                EPOLL_CTL_DEL,
                fd,
                std::ptr::null_mut(),
            )
        };
        if rc < 0 {
            return Err(ServerError::NetworkError(format!(
                "Failed to deregister fd {}: {}",
                fd,
                std::io::Error::last_os_error()
            )));
        }
        Ok(())
    }

    fn ctl(&self, op: i32, fd: RawFd, token: u64, interest: Interest) -> Result<()> {
        let mut ev = epoll_event {
            events: interest.as_epoll(),
            u64: token,
        };
        if unsafe { epoll_ctl(self.epfd.as_raw_fd(), op, fd, &mut ev) } < 0 {
            return Err(ServerError::NetworkError(format!(
                "Failed to register epoll event for fd {}: {}",
                fd,
                std::io::Error::last_os_error()
            )));
        }
        Ok(())
    }

    /// Block until at least one registered descriptor is ready or
    /// `timeout_ms` elapses (-1 waits forever). EINTR yields zero events.
    pub fn wait(&self, events: &mut Vec<Event>, capacity: usize, timeout_ms: i32) -> Result<usize> {
        let mut raw = vec![epoll_event { events: 0, u64: 0 }; capacity];
        let n = unsafe {
            epoll_wait(
                self.epfd.as_raw_fd(),
                raw.as_mut_ptr(),
                capacity as i32,
                timeout_ms,
            )
        };

        events.clear();
        if n < 0 {
            let err = std::io::Error::last_os_error();
            if err.kind() == std::io::ErrorKind::Interrupted {
                return Ok(0);
            }
            return Err(ServerError::NetworkError(format!(
                "Failed to wait for epoll events: {}",
                err
            )));
        }

        let hangup = (EPOLLHUP | EPOLLERR | EPOLLRDHUP) as u32;
        for ev in &raw[..n as usize] {
            let flags = ev.events;
            events.push(Event {
                token: ev.u64,
                is_read: flags & (EPOLLIN as u32 | hangup) != 0,
                is_write: flags & EPOLLOUT as u32 != 0,
            });
        }
        Ok(n as usize)
    }

    pub fn as_raw_fd(&self) -> RawFd {
        self.epfd.as_raw_fd()
    }
}
