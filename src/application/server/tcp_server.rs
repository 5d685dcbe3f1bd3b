use crate::application::config::models::ServerConfig;
use crate::application::config::validator::validate_config;
use crate::application::server::connection_map::ConnectionMap;
use crate::application::server::listener::Listener;
use crate::application::server::naming::{
    connection_name_in_parent, connection_name_in_worker, ConnectionIdGenerator,
};
use crate::common::buffer::Buffer;
use crate::common::constants::CONTROL_TOKEN;
use crate::common::error::{Result, ServerError};
use crate::core::event::event_loop::EventLoop;
use crate::core::event::poller::Event;
use crate::core::net::address::InetAddress;
use crate::core::net::connection::{
    default_connection_callback, default_message_callback, ConnectionCallback, ConnectionEvent,
    MessageCallback, TcpConnection,
};
use crate::core::net::fd::Socket;
use crate::core::process::channel::{ChannelEnd, ChannelRecv};
use crate::core::process::pool::{ProcessRole, Split, WorkerContext, WorkerPool};
use std::net::SocketAddr;
use std::rc::Rc;
use tracing::{debug, error, info, warn};

/// Startup progress. Only moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerStage {
    Created,
    Listening,
    PoolStarted,
}

/// Which side of the fork this server value lives on.
enum Process {
    Acceptor,
    Worker { index: usize, channel: ChannelEnd },
}

/// Prefork TCP server.
///
/// The parent (acceptor) process owns the listening socket and hands every
/// accepted descriptor to a worker. Each worker runs its own loop and owns
/// the connections it receives. One value per process; forking copies it and
/// [`specialize_for_worker`](Self::specialize_for_worker) turns the copy into
/// a worker.
pub struct TcpServer {
    config: ServerConfig,
    started: bool,
    stage: ServerStage,
    event_loop: EventLoop,
    listener: Listener,
    pool: WorkerPool,
    process: Process,
    ids: ConnectionIdGenerator,
    connections: ConnectionMap,
    connection_callback: ConnectionCallback,
    message_callback: MessageCallback,
}

impl TcpServer {
    pub fn new(config: ServerConfig) -> Result<Self> {
        validate_config(&config)?;

        Ok(Self {
            event_loop: EventLoop::new()?,
            listener: Listener::new(config.address),
            pool: WorkerPool::new(config.worker_count),
            started: false,
            stage: ServerStage::Created,
            process: Process::Acceptor,
            ids: ConnectionIdGenerator::new(),
            connections: ConnectionMap::new(),
            connection_callback: Rc::new(default_connection_callback),
            message_callback: Rc::new(default_message_callback),
            config,
        })
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn stage(&self) -> ServerStage {
        self.stage
    }

    /// Bound listening address (parent only, after `start`).
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    pub fn connections(&self) -> &ConnectionMap {
        &self.connections
    }

    /// `Some(index)` inside a worker process.
    pub fn worker_index(&self) -> Option<usize> {
        match self.process {
            Process::Acceptor => None,
            Process::Worker { index, .. } => Some(index),
        }
    }

    pub fn set_connection_callback(&mut self, cb: impl Fn(&TcpConnection) + 'static) {
        self.connection_callback = Rc::new(cb);
    }

    pub fn set_message_callback(&mut self, cb: impl Fn(&mut TcpConnection, &mut Buffer) + 'static) {
        self.message_callback = Rc::new(cb);
    }

    /// Run `hook` in every process right after each worker fork.
    pub fn set_fork_hook(&mut self, hook: impl FnMut(ProcessRole) + 'static) {
        self.pool.set_fork_hook(hook);
    }

    /// Listen, then fork the workers. Listening strictly precedes the pool so
    /// the port is bound before any worker exists.
    ///
    /// Returns in the parent once all workers are forked. Inside a worker it
    /// never returns: the worker runs its loop and exits the process when the
    /// parent goes away. Once listening has succeeded a second call is a
    /// no-op; after a bind failure it tries again.
    pub fn start(&mut self) -> Result<()> {
        if self.started {
            return Ok(());
        }
        self.listen()?;
        self.started = true;

        match self.pool.start()? {
            Split::Parent => {
                self.stage = ServerStage::PoolStarted;
                info!(
                    server = %self.config.name,
                    workers = self.pool.worker_count(),
                    pids = ?self.pool.worker_pids(),
                    "Server started"
                );
                Ok(())
            }
            Split::Worker(context) => {
                let index = context.index;
                let code = match self.run_worker(context) {
                    Ok(()) => 0,
                    Err(e) => {
                        error!(worker = index, error = %e, "Worker failed");
                        1
                    }
                };
                std::process::exit(code);
            }
        }
    }

    /// `start` followed by `run`: the whole life of the process.
    pub fn serve(&mut self) -> Result<()> {
        self.start()?;
        self.run()
    }

    /// Drive this process's loop until it has nothing left to serve. In the
    /// parent that is never.
    pub fn run(&mut self) -> Result<()> {
        let timeout = self.config.poll_timeout_ms;
        while self.poll_once(timeout)? {}
        Ok(())
    }

    /// One loop iteration. Returns `false` once a worker's channel to the
    /// parent has closed.
    pub fn poll_once(&mut self, timeout_ms: i32) -> Result<bool> {
        match self.process {
            Process::Acceptor => self.poll_acceptor(timeout_ms).map(|_| true),
            Process::Worker { .. } => self.poll_worker(timeout_ms),
        }
    }

    fn listen(&mut self) -> Result<()> {
        self.listener.listen()?;
        if let Some(fd) = self.listener.as_raw_fd() {
            self.event_loop.register_read(fd, CONTROL_TOKEN)?;
        }
        self.stage = ServerStage::Listening;
        Ok(())
    }

    fn run_worker(&mut self, context: WorkerContext) -> Result<()> {
        self.specialize_for_worker(context)?;
        self.run()?;
        info!(worker = ?self.worker_index(), "Acceptor closed the channel, worker exiting");
        Ok(())
    }

    /// Turn the forked copy of the acceptor into worker `context.index`.
    ///
    /// The inherited epoll instance is the parent's own kernel object, so the
    /// listening socket and the loop are closed outright, never deregistered.
    /// Only then is a fresh loop built and the channel registered on it.
    pub fn specialize_for_worker(&mut self, context: WorkerContext) -> Result<()> {
        self.listener.abandon();
        self.event_loop.teardown();

        self.event_loop = EventLoop::new()?;
        self.event_loop
            .register_read(context.channel.as_raw_fd(), CONTROL_TOKEN)?;

        self.ids = ConnectionIdGenerator::new();
        info!(
            worker = context.index,
            pid = std::process::id(),
            "Worker ready"
        );
        self.process = Process::Worker {
            index: context.index,
            channel: context.channel,
        };
        Ok(())
    }

    fn poll_acceptor(&mut self, timeout_ms: i32) -> Result<()> {
        let readable = self
            .event_loop
            .poll(timeout_ms)?
            .iter()
            .any(|e| e.token == CONTROL_TOKEN);

        if readable {
            self.accept_pending()?;
        }
        self.pool.reap_exited();
        Ok(())
    }

    fn accept_pending(&mut self) -> Result<()> {
        loop {
            match self.listener.accept() {
                Ok(Some((socket, peer))) => {
                    self.on_accepted_in_parent(socket, peer)?;
                }
                Ok(None) => return Ok(()),
                Err(e) => {
                    // EMFILE and friends: leave the rest in the backlog.
                    warn!(error = %e, "Accept failed");
                    return Ok(());
                }
            }
        }
    }

    /// Name the connection for the log and pass it to the next worker.
    /// Returns the chosen worker, or `None` if the hand-off failed and the
    /// connection was dropped.
    pub fn on_accepted_in_parent(
        &mut self,
        socket: Socket,
        peer: InetAddress,
    ) -> Result<Option<usize>> {
        let id = self.ids.next_id();
        let name = connection_name_in_parent(&self.config.name, id);
        info!(connection = %name, peer = %peer, "New connection");

        match self.pool.dispatch(socket, id) {
            Ok(worker) => {
                debug!(connection = %name, worker, "Handed off to worker");
                Ok(Some(worker))
            }
            Err(e) if e.is_transfer_failure() => {
                warn!(connection = %name, error = %e, "Dropping connection");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    fn poll_worker(&mut self, timeout_ms: i32) -> Result<bool> {
        let events: Vec<Event> = self.event_loop.poll(timeout_ms)?.to_vec();

        for event in &events {
            if event.token == CONTROL_TOKEN {
                if !self.drain_channel()? {
                    return Ok(false);
                }
            } else {
                self.handle_connection_event(event)?;
            }
        }
        Ok(true)
    }

    /// Returns `false` when the parent end is closed.
    fn drain_channel(&mut self) -> Result<bool> {
        loop {
            let received = match &self.process {
                Process::Worker { channel, .. } => channel.recv()?,
                Process::Acceptor => return Ok(true),
            };
            match received {
                ChannelRecv::Descriptor(transfer) => {
                    self.on_accepted_in_worker(transfer.socket, transfer.sequence)?;
                }
                ChannelRecv::Dropped(reason) => {
                    warn!(worker = ?self.worker_index(), %reason, "Dropped transfer");
                }
                ChannelRecv::Empty => return Ok(true),
                ChannelRecv::Closed => return Ok(false),
            }
        }
    }

    /// Build a connection around a descriptor received from the acceptor.
    /// `sequence` is the acceptor's id for it, kept for log correlation.
    pub fn on_accepted_in_worker(&mut self, socket: Socket, sequence: u64) -> Result<()> {
        let Process::Worker { index, .. } = self.process else {
            return Err(ServerError::NetworkError(
                "Connections are only materialized in workers".to_string(),
            ));
        };

        let id = self.ids.next_id();
        let name = connection_name_in_worker(&self.config.name, index, id);
        let addresses = InetAddress::resolve_local(&socket)
            .and_then(|local| InetAddress::resolve_peer(&socket).map(|peer| (local, peer)));
        let (local, peer) = match addresses {
            Ok(pair) => pair,
            Err(e) => {
                // Peer already gone; the descriptor closes here.
                warn!(connection = %name, sequence, error = %e, "Discarding dead connection");
                return Ok(());
            }
        };

        let mut connection = TcpConnection::new(id, name.clone(), socket, local, peer);
        if self.config.tcp_no_delay {
            if let Err(e) = connection.set_tcp_no_delay(true) {
                warn!(connection = %name, error = %e, "Failed to disable Nagle");
            }
        }
        connection.set_connection_callback(Rc::clone(&self.connection_callback));
        connection.set_message_callback(Rc::clone(&self.message_callback));

        self.connections.insert(connection)?;
        debug!(connection = %name, sequence, peer = %peer, "Received connection");

        let established = match self.connections.get_mut(&name) {
            Some(connection) => connection.establish(&self.event_loop),
            None => return Err(ServerError::UnknownConnection(name)),
        };
        if let Err(e) = established {
            warn!(connection = %name, error = %e, "Failed to establish connection");
            self.on_connection_closed(&name)?;
        }
        Ok(())
    }

    fn handle_connection_event(&mut self, event: &Event) -> Result<()> {
        let Some(connection) = self.connections.get_by_token_mut(event.token) else {
            // Closed earlier in this batch.
            return Ok(());
        };

        let outcome = connection
            .handle_event(&self.event_loop, event)
            .unwrap_or_else(|e| {
                warn!(connection = connection.name(), error = %e, "Connection I/O failed");
                ConnectionEvent::Closed
            });

        if outcome == ConnectionEvent::Closed {
            let name = connection.name().to_string();
            self.on_connection_closed(&name)?;
        }
        Ok(())
    }

    /// Drop `name` from this process's map and destroy it. An unknown name
    /// means the map and the live descriptors have diverged; the error is
    /// fatal to the worker.
    pub fn on_connection_closed(&mut self, name: &str) -> Result<()> {
        let mut connection = self.connections.remove(name)?;
        info!(connection = name, "Connection removed");
        connection.destroy(&self.event_loop)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::process::channel;
    use std::cell::RefCell;
    use std::io::{Read, Write};
    use std::net::{TcpListener, TcpStream};
    use std::os::unix::io::OwnedFd;
    use std::os::unix::net::UnixStream;

    fn config(workers: usize) -> ServerConfig {
        ServerConfig::new("127.0.0.1:0".parse().unwrap(), "echo", workers)
    }

    fn accepted_pair() -> (TcpStream, Socket) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let client = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (server, _) = listener.accept().unwrap();
        (client, Socket::from_stream(server))
    }

    fn poll_until(server: &mut TcpServer, mut done: impl FnMut(&TcpServer) -> bool) {
        for _ in 0..50 {
            if done(server) {
                return;
            }
            server.poll_once(100).unwrap();
        }
        assert!(done(server), "condition not reached");
    }

    #[test]
    fn test_zero_workers_rejected() {
        assert!(matches!(
            TcpServer::new(config(0)),
            Err(ServerError::ConfigError(_))
        ));
    }

    #[test]
    fn test_start_is_idempotent() {
        let mut server = TcpServer::new(config(2)).unwrap();
        let (parent_a, _worker_a) = channel::pair().unwrap();
        let (parent_b, _worker_b) = channel::pair().unwrap();
        server.pool = WorkerPool::from_channels(vec![parent_a, parent_b]);
        assert_eq!(server.stage(), ServerStage::Created);

        server.start().unwrap();
        let fd = server.listener.as_raw_fd();
        let addr = server.local_addr();
        assert_eq!(server.stage(), ServerStage::PoolStarted);

        server.start().unwrap();
        assert_eq!(server.listener.as_raw_fd(), fd);
        assert_eq!(server.local_addr(), addr);
        assert_eq!(server.pool().slots().len(), 2);
    }

    #[test]
    fn test_acceptor_dispatches_round_robin() {
        let mut server = TcpServer::new(config(2)).unwrap();
        let (parent_a, worker_a) = channel::pair().unwrap();
        let (parent_b, worker_b) = channel::pair().unwrap();
        server.pool = WorkerPool::from_channels(vec![parent_a, parent_b]);
        server.start().unwrap();
        let addr = server.local_addr().unwrap();

        let _clients: Vec<TcpStream> = (0..3).map(|_| TcpStream::connect(addr).unwrap()).collect();
        poll_until(&mut server, |s| s.ids.peek() == 4);

        let sequences = |end: &ChannelEnd| {
            let mut seen = Vec::new();
            while let ChannelRecv::Descriptor(t) = end.recv().unwrap() {
                seen.push(t.sequence);
            }
            seen
        };
        assert_eq!(sequences(&worker_a), vec![1, 3]);
        assert_eq!(sequences(&worker_b), vec![2]);
        assert!(server.connections().is_empty());
    }

    #[test]
    fn test_failed_transfer_drops_connection() {
        let mut server = TcpServer::new(config(1)).unwrap();
        let (parent, worker) = channel::pair().unwrap();
        drop(worker);
        server.pool = WorkerPool::from_channels(vec![parent]);
        server.start().unwrap();

        let mut client = TcpStream::connect(server.local_addr().unwrap()).unwrap();
        poll_until(&mut server, |s| s.ids.peek() == 2);

        let mut buf = [0u8; 1];
        assert_eq!(client.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn test_worker_specialization_and_lifecycle() {
        let mut server = TcpServer::new(config(2)).unwrap();
        server.listen().unwrap();
        let acceptor_addr = server.local_addr().unwrap();

        let events = Rc::new(RefCell::new(Vec::new()));
        let seen = Rc::clone(&events);
        server.set_connection_callback(move |c: &TcpConnection| {
            seen.borrow_mut().push((c.name().to_string(), c.connected()))
        });
        server.set_message_callback(|c: &mut TcpConnection, buf: &mut Buffer| {
            let bytes = buf.retrieve_all();
            c.send(&bytes);
        });

        let (parent_end, worker_end) = channel::pair().unwrap();
        server
            .specialize_for_worker(WorkerContext {
                index: 1,
                channel: worker_end,
            })
            .unwrap();

        // Inherited acceptor state is gone.
        assert!(!server.listener.is_listening());
        assert_eq!(server.worker_index(), Some(1));
        assert!(TcpStream::connect(acceptor_addr).is_err());

        let (mut client, socket) = accepted_pair();
        parent_end.send(socket, 42).unwrap();
        poll_until(&mut server, |s| s.connections().len() == 1);

        let name = "echo-worker1_connection_1";
        assert!(server.connections().contains(name));
        assert_eq!(*events.borrow(), vec![(name.to_string(), true)]);

        client.write_all(b"hello").unwrap();
        let mut reply = [0u8; 5];
        for _ in 0..20 {
            server.poll_once(100).unwrap();
            client.set_nonblocking(true).unwrap();
            let got = client.peek(&mut reply).unwrap_or(0);
            client.set_nonblocking(false).unwrap();
            if got == reply.len() {
                break;
            }
        }
        client.read_exact(&mut reply).unwrap();
        assert_eq!(&reply, b"hello");

        drop(client);
        poll_until(&mut server, |s| s.connections().is_empty());
        assert_eq!(events.borrow().last(), Some(&(name.to_string(), false)));

        // A second close of the same name is a bookkeeping violation.
        assert!(matches!(
            server.on_connection_closed(name),
            Err(ServerError::UnknownConnection(_))
        ));

        // Acceptor gone: the worker loop reports it is done.
        drop(parent_end);
        let mut running = true;
        for _ in 0..10 {
            running = server.poll_once(100).unwrap();
            if !running {
                break;
            }
        }
        assert!(!running);
    }

    fn worker_server(index: usize) -> (TcpServer, ChannelEnd) {
        let mut server = TcpServer::new(config(2)).unwrap();
        let (parent_end, worker_end) = channel::pair().unwrap();
        server
            .specialize_for_worker(WorkerContext {
                index,
                channel: worker_end,
            })
            .unwrap();
        (server, parent_end)
    }

    #[test]
    fn test_bad_transfer_keeps_worker_running() {
        let (mut server, parent_end) = worker_server(0);

        let (_first, socket) = accepted_pair();
        parent_end.send(socket, 1).unwrap();
        poll_until(&mut server, |s| s.connections().len() == 1);

        // A payload with no descriptor attached.
        let payload = 2u64.to_le_bytes();
        let n = unsafe {
            libc::send(
                parent_end.as_raw_fd(),
                payload.as_ptr() as *const libc::c_void,
                payload.len(),
                libc::MSG_NOSIGNAL,
            )
        };
        assert_eq!(n as usize, payload.len());
        let (_second, socket) = accepted_pair();
        parent_end.send(socket, 3).unwrap();

        for _ in 0..10 {
            assert!(server.poll_once(100).unwrap());
            if server.connections().len() == 2 {
                break;
            }
        }
        assert!(server.connections().contains("echo-worker0_connection_1"));
        assert!(server.connections().contains("echo-worker0_connection_2"));
    }

    #[test]
    fn test_discarded_descriptor_consumes_an_id() {
        let (mut server, parent_end) = worker_server(0);

        let (_unix, not_inet) = UnixStream::pair().unwrap();
        parent_end
            .send(Socket::new(OwnedFd::from(not_inet)), 1)
            .unwrap();
        let (_client, socket) = accepted_pair();
        parent_end.send(socket, 2).unwrap();
        poll_until(&mut server, |s| s.connections().len() == 1);

        assert!(server.connections().contains("echo-worker0_connection_2"));
        assert_eq!(server.ids.peek(), 3);
    }

    #[test]
    fn test_start_after_bind_failure_retries() {
        let taken = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = taken.local_addr().unwrap();
        let mut server = TcpServer::new(ServerConfig::new(addr, "echo", 1)).unwrap();

        assert!(matches!(server.start(), Err(ServerError::BindError { .. })));
        assert!(matches!(server.start(), Err(ServerError::BindError { .. })));
        assert_eq!(server.stage(), ServerStage::Created);
        assert!(server.pool().slots().is_empty());
    }

    #[test]
    fn test_acceptor_never_materializes_connections() {
        let mut server = TcpServer::new(config(1)).unwrap();
        let (_client, socket) = accepted_pair();
        assert!(server.on_accepted_in_worker(socket, 1).is_err());
        assert!(server.connections().is_empty());
    }
}
