use crate::common::error::{Result, ServerError};
use crate::core::net::fd::Socket;
use crate::core::process::channel::{self, ChannelEnd};
use crate::core::process::termination::TerminationReason;
use tracing::{debug, error, info, warn};

/// Which process a fork hook is running in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessRole {
    Parent { worker: usize, pid: libc::pid_t },
    Worker { worker: usize },
}

pub type ForkHook = Box<dyn FnMut(ProcessRole)>;

/// Everything a freshly forked worker keeps from the pool.
#[derive(Debug)]
pub struct WorkerContext {
    pub index: usize,
    pub channel: ChannelEnd,
}

/// Result of [`WorkerPool::start`], different in each process.
#[derive(Debug)]
pub enum Split {
    /// All workers forked; this is the acceptor process.
    Parent,
    /// This is worker `index`; the pool in this process is empty.
    Worker(WorkerContext),
}

/// Parent-side view of one worker process.
#[derive(Debug)]
pub struct WorkerSlot {
    index: usize,
    pid: Option<libc::pid_t>,
    channel: ChannelEnd,
    exited: Option<TerminationReason>,
}

impl WorkerSlot {
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn pid(&self) -> Option<libc::pid_t> {
        self.pid
    }

    pub fn exited(&self) -> Option<&TerminationReason> {
        self.exited.as_ref()
    }
}

/// Fixed set of pre-forked workers with round-robin descriptor hand-off.
pub struct WorkerPool {
    worker_count: usize,
    slots: Vec<WorkerSlot>,
    next: usize,
    started: bool,
    fork_hook: Option<ForkHook>,
}

impl WorkerPool {
    pub fn new(worker_count: usize) -> Self {
        Self {
            worker_count,
            slots: Vec::new(),
            next: 0,
            started: false,
            fork_hook: None,
        }
    }

    /// Only effective before [`start`](Self::start).
    pub fn set_worker_count(&mut self, worker_count: usize) {
        if self.started {
            warn!(worker_count, "Ignoring worker count change after pool start");
            return;
        }
        self.worker_count = worker_count;
    }

    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    /// Run `hook` in every process right after each fork.
    pub fn set_fork_hook(&mut self, hook: impl FnMut(ProcessRole) + 'static) {
        self.fork_hook = Some(Box::new(hook));
    }

    pub fn slots(&self) -> &[WorkerSlot] {
        &self.slots
    }

    pub fn worker_pids(&self) -> Vec<libc::pid_t> {
        self.slots.iter().filter_map(|s| s.pid).collect()
    }

    /// Fork `worker_count` workers, each with its own channel.
    ///
    /// Returns `Split::Parent` in the calling process once every fork has
    /// completed, and `Split::Worker` inside each child. A second call in the
    /// parent is a no-op.
    pub fn start(&mut self) -> Result<Split> {
        if self.started {
            return Ok(Split::Parent);
        }
        self.started = true;

        if self.worker_count == 0 {
            warn!("Worker pool started with no workers; accepted connections will be dropped");
        }

        for index in 0..self.worker_count {
            let (parent_end, worker_end) = channel::pair()?;

            match unsafe { libc::fork() } {
                -1 => {
                    return Err(ServerError::ForkError {
                        worker: index,
                        source: std::io::Error::last_os_error(),
                    });
                }
                0 => {
                    drop(parent_end);
                    // Siblings' parent endpoints were inherited; they belong
                    // to the acceptor only. Closing them needs no waitpid.
                    for slot in self.slots.drain(..) {
                        drop(slot.channel);
                    }
                    self.next = 0;
                    if let Some(hook) = self.fork_hook.as_mut() {
                        hook(ProcessRole::Worker { worker: index });
                    }
                    return Ok(Split::Worker(WorkerContext {
                        index,
                        channel: worker_end,
                    }));
                }
                pid => {
                    drop(worker_end);
                    info!(worker = index, pid, "Forked worker");
                    self.slots.push(WorkerSlot {
                        index,
                        pid: Some(pid),
                        channel: parent_end,
                        exited: None,
                    });
                    if let Some(hook) = self.fork_hook.as_mut() {
                        hook(ProcessRole::Parent { worker: index, pid });
                    }
                }
            }
        }

        Ok(Split::Parent)
    }

    fn next_index(&mut self) -> usize {
        let index = self.next;
        self.next = (self.next + 1) % self.slots.len();
        index
    }

    /// Hand `socket` to the next worker in round-robin order and return its
    /// index. The parent's copy is closed on every path.
    pub fn dispatch(&mut self, socket: Socket, sequence: u64) -> Result<usize> {
        if self.slots.is_empty() {
            return Err(ServerError::NoWorkers);
        }

        let index = self.next_index();
        let slot = &self.slots[index];
        if let Some(reason) = &slot.exited {
            return Err(ServerError::WorkerExited {
                worker: index,
                reason: reason.to_string(),
            });
        }

        slot.channel
            .send(socket, sequence)
            .map_err(|source| ServerError::TransferError {
                worker: index,
                source,
            })?;
        debug!(worker = index, sequence, "Dispatched connection");
        Ok(index)
    }

    /// Collect workers that have exited since the last call, without
    /// blocking. Their slots stay in the rotation and fail every dispatch.
    pub fn reap_exited(&mut self) -> Vec<(usize, TerminationReason)> {
        let mut reaped = Vec::new();
        for slot in self.slots.iter_mut().filter(|s| s.exited.is_none()) {
            let Some(pid) = slot.pid else { continue };
            let mut status: libc::c_int = 0;
            let rc = unsafe { libc::waitpid(pid, &mut status, libc::WNOHANG) };
            let reason = match rc {
                0 => continue,
                -1 => TerminationReason::Vanished,
                _ => match TerminationReason::from_wait_status(status) {
                    Some(reason) => reason,
                    None => continue,
                },
            };
            if reason.is_success() {
                info!(worker = slot.index, pid, %reason, "Worker exited");
            } else {
                error!(worker = slot.index, pid, %reason, "Worker exited");
            }
            slot.exited = Some(reason.clone());
            reaped.push((slot.index, reason));
        }
        reaped
    }

    #[cfg(test)]
    pub(crate) fn from_channels(channels: Vec<ChannelEnd>) -> Self {
        let worker_count = channels.len();
        Self {
            worker_count,
            slots: channels
                .into_iter()
                .enumerate()
                .map(|(index, channel)| WorkerSlot {
                    index,
                    pid: None,
                    channel,
                    exited: None,
                })
                .collect(),
            next: 0,
            started: true,
            fork_hook: None,
        }
    }
}

impl Drop for WorkerPool {
    /// Closing the parent endpoints lets every worker see EOF and exit.
    fn drop(&mut self) {
        for slot in self.slots.drain(..) {
            let WorkerSlot {
                index,
                pid,
                channel,
                exited,
            } = slot;
            drop(channel);
            if let (Some(pid), None) = (pid, exited) {
                let mut status: libc::c_int = 0;
                if unsafe { libc::waitpid(pid, &mut status, 0) } == pid {
                    debug!(worker = index, pid, "Reaped worker");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::process::channel::ChannelRecv;
    use rstest::rstest;
    use std::os::unix::io::OwnedFd;
    use std::os::unix::net::UnixStream;

    fn labelled_socket() -> (UnixStream, Socket) {
        let (keep, give) = UnixStream::pair().unwrap();
        (keep, Socket::new(OwnedFd::from(give)))
    }

    fn pool_with(workers: usize) -> (WorkerPool, Vec<ChannelEnd>) {
        let mut parent_ends = Vec::new();
        let mut worker_ends = Vec::new();
        for _ in 0..workers {
            let (p, w) = channel::pair().unwrap();
            parent_ends.push(p);
            worker_ends.push(w);
        }
        (WorkerPool::from_channels(parent_ends), worker_ends)
    }

    fn drain(end: &ChannelEnd) -> Vec<u64> {
        let mut seen = Vec::new();
        while let ChannelRecv::Descriptor(t) = end.recv().unwrap() {
            seen.push(t.sequence);
        }
        seen
    }

    #[rstest]
    #[case(1, 5)]
    #[case(3, 7)]
    #[case(4, 4)]
    fn test_round_robin_subsequences(#[case] workers: usize, #[case] accepted: u64) {
        let (mut pool, worker_ends) = pool_with(workers);
        let mut keep = Vec::new();
        for seq in 0..accepted {
            let (peer, socket) = labelled_socket();
            keep.push(peer);
            assert_eq!(pool.dispatch(socket, seq).unwrap(), seq as usize % workers);
        }

        for (i, end) in worker_ends.iter().enumerate() {
            let expected: Vec<u64> = (0..accepted)
                .filter(|s| *s as usize % workers == i)
                .collect();
            assert_eq!(drain(end), expected);
        }
    }

    #[test]
    fn test_fourth_connection_wraps_to_first_worker() {
        let (mut pool, _worker_ends) = pool_with(3);
        let mut keep = Vec::new();
        let mut targets = Vec::new();
        for seq in 1..=4 {
            let (peer, socket) = labelled_socket();
            keep.push(peer);
            targets.push(pool.dispatch(socket, seq).unwrap());
        }
        assert_eq!(targets, vec![0, 1, 2, 0]);
    }

    #[test]
    fn test_no_workers_drops_descriptor() {
        let mut pool = WorkerPool::new(0);
        assert!(matches!(pool.start().unwrap(), Split::Parent));

        let (mut peer, socket) = labelled_socket();
        let err = pool.dispatch(socket, 1).unwrap_err();
        assert!(matches!(err, ServerError::NoWorkers));

        let mut buf = [0u8; 1];
        assert_eq!(std::io::Read::read(&mut peer, &mut buf).unwrap(), 0);
    }

    #[test]
    fn test_closed_worker_channel_is_transfer_failure() {
        let (mut pool, mut worker_ends) = pool_with(2);
        drop(worker_ends.remove(0));

        let (_p1, s1) = labelled_socket();
        let err = pool.dispatch(s1, 1).unwrap_err();
        assert!(err.is_transfer_failure());
        assert!(matches!(err, ServerError::TransferError { worker: 0, .. }));

        // The healthy worker keeps receiving; the dead slot keeps failing.
        let (_p2, s2) = labelled_socket();
        assert_eq!(pool.dispatch(s2, 2).unwrap(), 1);
        let (_p3, s3) = labelled_socket();
        assert!(pool.dispatch(s3, 3).is_err());
        assert_eq!(drain(&worker_ends[0]), vec![2]);
    }

    #[test]
    fn test_worker_count_fixed_after_start() {
        let mut pool = WorkerPool::new(0);
        pool.set_worker_count(2);
        assert_eq!(pool.worker_count(), 2);
        pool.set_worker_count(0);
        pool.start().unwrap();
        pool.set_worker_count(5);
        assert_eq!(pool.worker_count(), 0);
    }
}
