// Per-process readiness loop
use crate::common::constants::MAX_EVENTS_PER_POLL;
use crate::common::error::{Result, ServerError};
use crate::core::event::poller::{Event, Interest, Poller};
use std::os::unix::io::RawFd;

/// One per process. The owner registers descriptors under tokens and
/// dispatches the events returned by [`EventLoop::poll`].
pub struct EventLoop {
    poller: Option<Poller>,
    events: Vec<Event>,
}

impl EventLoop {
    pub fn new() -> Result<Self> {
        Ok(Self {
            poller: Some(Poller::new()?),
            events: Vec::with_capacity(MAX_EVENTS_PER_POLL),
        })
    }

    fn poller(&self) -> Result<&Poller> {
        self.poller.as_ref().ok_or(ServerError::LoopTornDown)
    }

    pub fn register_read(&self, fd: RawFd, token: u64) -> Result<()> {
        self.poller()?.register(fd, token, Interest::READABLE)
    }

    pub fn update_interest(&self, fd: RawFd, token: u64, interest: Interest) -> Result<()> {
        self.poller()?.reregister(fd, token, interest)
    }

    pub fn unregister(&self, fd: RawFd) -> Result<()> {
        self.poller()?.deregister(fd)
    }

    pub fn poll(&mut self, timeout_ms: i32) -> Result<&[Event]> {
        let poller = self.poller.as_ref().ok_or(ServerError::LoopTornDown)?;
        let n = poller.wait(&mut self.events, MAX_EVENTS_PER_POLL, timeout_ms)?;
        Ok(&self.events[..n])
    }

    /// Close the underlying epoll descriptor without touching its interest
    /// set. After fork the instance is shared with the parent, so a worker
    /// must only ever close it.
    pub fn teardown(&mut self) {
        self.poller = None;
        self.events.clear();
    }

    pub fn is_torn_down(&self) -> bool {
        self.poller.is_none()
    }
}
