use crate::common::buffer::Buffer;
use crate::common::constants::DEFAULT_READ_CHUNK_SIZE;
use crate::common::error::Result;
use crate::core::event::event_loop::EventLoop;
use crate::core::event::poller::{Event, Interest};
use crate::core::net::address::InetAddress;
use crate::core::net::fd::Socket;
use crate::core::net::io::{read_non_blocking, write_non_blocking, ReadStatus};
use std::rc::Rc;
use tracing::{debug, info, warn};

/// Invoked when a connection comes up and again when it goes down;
/// check [`TcpConnection::connected`] to tell which.
pub type ConnectionCallback = Rc<dyn Fn(&TcpConnection)>;

/// Invoked with the bytes read so far. Bytes left in the buffer are kept for
/// the next call.
pub type MessageCallback = Rc<dyn Fn(&mut TcpConnection, &mut Buffer)>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Connected,
    Disconnecting,
    Disconnected,
}

/// What the owner must do after handing the connection an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionEvent {
    Open,
    /// The peer went away or the socket failed. The owner removes the
    /// connection from its map and destroys it.
    Closed,
}

pub struct TcpConnection {
    token: u64,
    name: String,
    socket: Socket,
    local_addr: InetAddress,
    peer_addr: InetAddress,
    state: ConnectionState,
    input: Buffer,
    output: Buffer,
    write_interest: bool,
    write_shut: bool,
    connection_callback: Option<ConnectionCallback>,
    message_callback: Option<MessageCallback>,
}

impl TcpConnection {
    pub fn new(
        token: u64,
        name: String,
        socket: Socket,
        local_addr: InetAddress,
        peer_addr: InetAddress,
    ) -> Self {
        Self {
            token,
            name,
            socket,
            local_addr,
            peer_addr,
            state: ConnectionState::Connecting,
            input: Buffer::new(),
            output: Buffer::new(),
            write_interest: false,
            write_shut: false,
            connection_callback: None,
            message_callback: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn token(&self) -> u64 {
        self.token
    }

    pub fn local_address(&self) -> InetAddress {
        self.local_addr
    }

    pub fn peer_address(&self) -> InetAddress {
        self.peer_addr
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    pub fn as_raw_fd(&self) -> i32 {
        self.socket.as_raw_fd()
    }

    pub fn set_connection_callback(&mut self, cb: ConnectionCallback) {
        self.connection_callback = Some(cb);
    }

    pub fn set_message_callback(&mut self, cb: MessageCallback) {
        self.message_callback = Some(cb);
    }

    pub fn set_tcp_no_delay(&self, on: bool) -> Result<()> {
        self.socket.set_tcp_no_delay(on)
    }

    /// Queue bytes for the peer. Ignored once the connection is shutting down.
    pub fn send(&mut self, data: &[u8]) {
        if self.state != ConnectionState::Connected {
            debug!(connection = %self.name, "Dropping send on a connection that is not connected");
            return;
        }
        self.output.extend(data);
    }

    /// Half-close once everything queued has been written.
    pub fn shutdown(&mut self) {
        if self.state == ConnectionState::Connected {
            self.state = ConnectionState::Disconnecting;
        }
    }

    /// Arm the connection for I/O on `event_loop`.
    pub fn establish(&mut self, event_loop: &EventLoop) -> Result<()> {
        debug_assert_eq!(self.state, ConnectionState::Connecting);
        self.socket.set_non_blocking()?;
        event_loop.register_read(self.socket.as_raw_fd(), self.token)?;
        self.state = ConnectionState::Connected;
        if let Some(cb) = self.connection_callback.clone() {
            cb(self);
        }
        self.flush(event_loop).map(|_| ())
    }

    pub fn handle_event(
        &mut self,
        event_loop: &EventLoop,
        event: &Event,
    ) -> Result<ConnectionEvent> {
        if event.is_read && self.handle_read() == ConnectionEvent::Closed {
            return Ok(ConnectionEvent::Closed);
        }
        self.flush(event_loop)
    }

    fn handle_read(&mut self) -> ConnectionEvent {
        let mut chunk = vec![0u8; DEFAULT_READ_CHUNK_SIZE];
        match read_non_blocking(&self.socket, &mut chunk) {
            Ok(ReadStatus::Data(n)) => {
                self.input.extend(&chunk[..n]);
                match self.message_callback.clone() {
                    Some(cb) => {
                        let mut input = std::mem::take(&mut self.input);
                        cb(self, &mut input);
                        self.input = input;
                    }
                    None => self.input.clear(),
                }
                ConnectionEvent::Open
            }
            Ok(ReadStatus::WouldBlock) => ConnectionEvent::Open,
            Ok(ReadStatus::Eof) => ConnectionEvent::Closed,
            Err(e) => {
                warn!(connection = %self.name, error = %e, "Read failed");
                ConnectionEvent::Closed
            }
        }
    }

    /// Write what the socket takes, then keep write interest in step with
    /// whatever is still queued.
    fn flush(&mut self, event_loop: &EventLoop) -> Result<ConnectionEvent> {
        if !self.output.is_empty() {
            match write_non_blocking(&self.socket, self.output.peek()) {
                Ok(n) => self.output.consume(n),
                Err(e) => {
                    warn!(connection = %self.name, error = %e, "Write failed");
                    return Ok(ConnectionEvent::Closed);
                }
            }
        }

        if self.output.is_empty()
            && self.state == ConnectionState::Disconnecting
            && !self.write_shut
        {
            if let Err(e) = self.socket.shutdown_write() {
                warn!(connection = %self.name, error = %e, "Half-close failed");
                return Ok(ConnectionEvent::Closed);
            }
            self.write_shut = true;
        }

        let want_write = !self.output.is_empty();
        if want_write != self.write_interest {
            let interest = if want_write {
                Interest::READ_WRITE
            } else {
                Interest::READABLE
            };
            event_loop.update_interest(self.socket.as_raw_fd(), self.token, interest)?;
            self.write_interest = want_write;
        }
        Ok(ConnectionEvent::Open)
    }

    /// Detach from `event_loop` and report the connection down. The socket
    /// closes when the connection is dropped.
    pub fn destroy(&mut self, event_loop: &EventLoop) -> Result<()> {
        if self.state == ConnectionState::Disconnected {
            return Ok(());
        }
        let was_armed = self.state != ConnectionState::Connecting;
        self.state = ConnectionState::Disconnected;
        if was_armed {
            event_loop.unregister(self.socket.as_raw_fd())?;
            if let Some(cb) = self.connection_callback.clone() {
                cb(self);
            }
        }
        Ok(())
    }
}

pub fn default_connection_callback(conn: &TcpConnection) {
    info!(
        local = %conn.local_address(),
        peer = %conn.peer_address(),
        connection = conn.name(),
        "Connection {}",
        if conn.connected() { "up" } else { "down" }
    );
}

pub fn default_message_callback(_conn: &mut TcpConnection, buf: &mut Buffer) {
    buf.clear();
}
