//! Connection acceptance and the login handshake state machine.
//!
//! [`Networking`] owns the I/O driver, a fixed slab of connection
//! records, and the join queue. The embedding driver calls
//! [`Networking::poll`] once per tick; each call drains the driver's
//! ready completions, advances every affected connection through the
//! login sequence, and queues freshly logged-in sessions for pickup via
//! [`Networking::joined`].
//!
//! Per-connection state machine:
//!
//! ```text
//! [Allocated] --recv posted--> [ReadingHandshake]
//!   on complete, buf full: --parse ok--> [WritingHandshakeResponse]
//!                          --parse fail--> [Released]
//! [WritingHandshakeResponse] --send complete--> [ReadingLogin]
//!                            --send fail------> [Released]
//! [ReadingLogin] --parse ok & queue ok--> [HandedOff]
//!                --parse fail|bad ver|queue full--> [Released]
//! ```
//!
//! Every failure a client can cause is terminal for that client only:
//! the slot is released, the socket closed, and nothing escapes
//! `poll()`.

use crate::connection::{Connection, ConnectionHandle, Op, BUF_LEN};
use crate::metrics;
use crate::slab::Slab;
use arrayvec::ArrayVec;
use io_driver::{Driver, DriverBuilder, Engine, Event};
use protocol_beta::{Handshake, Login, ParseError, PROTOCOL_VERSION};
use std::io;
use std::net::SocketAddr;
use std::os::fd::{AsRawFd, OwnedFd};
use std::time::Duration;
use tracing::{debug, error};

/// Size of the connection slab. Accepts beyond this are closed on the
/// spot and cost no slot.
pub const MAX_CONNECTIONS: usize = 256;

/// Join queue capacity, shared with the embedding driver. Sessions that
/// complete login after the queue fills within one tick are dropped.
pub const JOIN_QUEUE_CAPACITY: usize = 8;

/// Listen backlog.
const BACKLOG: u32 = 16;

/// A session that completed login this tick, awaiting pickup.
#[derive(Debug, Clone, Copy)]
pub struct IncomingSession {
    /// The live connection slot now owned by the embedding driver.
    pub connection: ConnectionHandle,
    /// Username bytes, null-terminated iff shorter than 16.
    pub username: [u8; 16],
}

impl IncomingSession {
    /// The username as text, for display.
    pub fn username_lossy(&self) -> std::borrow::Cow<'_, str> {
        let len = self
            .username
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(self.username.len());
        String::from_utf8_lossy(&self.username[..len])
    }
}

/// The connection-acceptance core.
///
/// Dropping it closes the listener and every live connection socket.
/// Field order matters: the driver tears down first, settling any
/// in-flight operation before the records owning the buffers and
/// sockets go away.
pub struct Networking {
    driver: Box<dyn Driver>,
    /// The slab's storage is heap-allocated, so record addresses stay
    /// stable while recvs are in flight even if this value moves.
    connections: Slab<Connection, MAX_CONNECTIONS>,
    join_queue: ArrayVec<IncomingSession, JOIN_QUEUE_CAPACITY>,
}

impl Networking {
    /// Build the I/O driver. Failure here is fatal to startup.
    pub fn new(engine: Engine) -> io::Result<Self> {
        let driver = DriverBuilder::new()
            .engine(engine)
            .max_slots(MAX_CONNECTIONS)
            .build()?;

        Ok(Self {
            driver,
            connections: Slab::new(),
            join_queue: ArrayVec::new(),
        })
    }

    /// Bind the listener and arm the first accept. Failure here is
    /// fatal to startup.
    pub fn listen(&mut self, addr: SocketAddr) -> io::Result<()> {
        self.driver.listen(addr, BACKLOG)?;
        self.driver.post_accept()
    }

    /// The listener's bound address, once [`Networking::listen`] has
    /// succeeded.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.driver.local_addr()
    }

    /// Number of connections currently holding a slot, including
    /// sessions already handed off.
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Drive one tick: drain ready completions and return the number of
    /// sessions queued for [`Networking::joined`].
    ///
    /// A return of 0 means no new sessions, not that no I/O happened.
    /// The previous tick's join queue is invalidated on entry, so the
    /// caller must have consumed it already.
    pub fn poll(&mut self) -> usize {
        self.join_queue.clear();

        if let Err(e) = self.driver.poll(Some(Duration::ZERO)) {
            error!("driver poll failed: {e}");
        }

        let drained = self.driver.drain();
        eprintln!("drained.len()={}", drained.len());
        for completion in drained {
            match completion.event {
                Event::Accept { ref fd } => { eprintln!("completion: Accept ok={}", fd.is_ok()); }
                Event::Recv { slot, .. } => { eprintln!("completion: Recv slot={slot}"); }
                Event::Send { slot, .. } => { eprintln!("completion: Send slot={slot}"); }
            }
            match completion.event {
                Event::Accept { fd } => self.handle_accept(fd, completion.more),
                Event::Recv { slot, result } => self.handle_recv(slot, result),
                Event::Send { slot, result } => self.handle_send(slot, result),
            }
        }

        self.join_queue.len()
    }

    /// Sessions queued by the last [`Networking::poll`] call.
    pub fn joined(&self) -> &[IncomingSession] {
        &self.join_queue
    }

    fn handle_accept(&mut self, fd: io::Result<OwnedFd>, more: bool) {
        if !more {
            // The kernel dropped the multishot accept; re-arm before
            // anything else so no connection window is lost.
            if let Err(e) = self.driver.post_accept() {
                error!("failed to re-arm accept: {e}");
            }
        }

        let socket = match fd {
            Ok(socket) => socket,
            Err(e) => {
                // Client-caused races (reset before accept) land here;
                // the listener itself is fine.
                debug!("accept failed: {e}");
                return;
            }
        };

        let raw = socket.as_raw_fd();
        let Some(slot) = self.connections.insert(Connection::new(socket)) else {
            // Slab exhausted; the record was dropped and the socket
            // closed with it.
            debug!(fd = raw, "out of connection slots");
            return;
        };

        if let Err(e) = self.driver.associate(slot, raw) {
            debug!(slot, "failed to associate socket: {e}");
            self.release_slot(slot);
            return;
        }

        metrics::CONNECTIONS_ACCEPTED.increment();
        metrics::CONNECTIONS_ACTIVE.increment();
        self.post_recv(slot);
    }

    fn handle_recv(&mut self, slot: usize, result: io::Result<usize>) {
        let read_len = match result {
            Ok(0) => {
                debug!(slot, "eof during login sequence");
                self.release_slot(slot);
                return;
            }
            Ok(n) => n,
            Err(e) => {
                debug!(slot, "read failed: {e}");
                self.release_slot(slot);
                return;
            }
        };

        eprintln!("handle_recv slot={slot} read_len={read_len}");
        let conn = self.connections.get_mut(slot);
        conn.buf_used += read_len;
        debug_assert!(
            conn.buf_used <= BUF_LEN,
            "slot {slot}: buf_used {} over capacity",
            conn.buf_used
        );

        eprintln!("slot={slot} buf_used={} target={}", conn.buf_used, conn.target_buf_len);
        if conn.buf_used < conn.target_buf_len {
            self.post_recv(slot);
            return;
        }

        match conn.op {
            Op::ReadHandshake => self.finish_handshake_read(slot),
            Op::ReadLogin => self.finish_login_read(slot),
            Op::WriteHandshake => {
                unreachable!("recv completion while a send is outstanding on slot {slot}")
            }
        }
    }

    fn finish_handshake_read(&mut self, slot: usize) {
        let conn = self.connections.get_mut(slot);
        match Handshake::parse(&conn.buf[..conn.buf_used]) {
            Err(ParseError::Invalid) => {
                debug!(slot, "malformed handshake");
                metrics::PROTOCOL_ERRORS.increment();
                self.release_slot(slot);
            }
            Err(ParseError::Incomplete(need)) => {
                conn.target_buf_len = conn.buf_used + need;
                debug_assert!(
                    conn.target_buf_len <= BUF_LEN,
                    "slot {slot}: target {} over capacity",
                    conn.target_buf_len
                );
                self.post_recv(slot);
            }
            Ok(handshake) => {
                // The login packet's exact size is now known. The
                // buffered handshake bytes are discarded when the
                // response send completes.
                conn.target_buf_len = Login::packet_size(handshake.username_len as usize);
                conn.op = Op::WriteHandshake;
                let fd = conn.fd();
                if let Err(e) = self
                    .driver
                    .post_send(slot, fd, &Handshake::OFFLINE_MODE_RESPONSE)
                {
                    debug!(slot, "failed to post handshake response: {e}");
                    self.release_slot(slot);
                }
            }
        }
    }

    fn handle_send(&mut self, slot: usize, result: io::Result<usize>) {
        let conn = self.connections.get_mut(slot);
        assert_eq!(
            conn.op,
            Op::WriteHandshake,
            "send completion in a read state on slot {slot}"
        );

        let written = match result {
            Ok(n) => n,
            Err(e) => {
                debug!(slot, "write failed: {e}");
                self.release_slot(slot);
                return;
            }
        };

        // A short write of the 5-byte response only happens on a dying
        // socket; single-shot sends are not resumed.
        if written < Handshake::OFFLINE_MODE_RESPONSE.len() {
            debug!(slot, written, "short handshake response write");
            self.release_slot(slot);
            return;
        }

        let conn = self.connections.get_mut(slot);
        conn.op = Op::ReadLogin;
        conn.buf_used = 0;
        self.post_recv(slot);
    }

    fn finish_login_read(&mut self, slot: usize) {
        let conn = self.connections.get_mut(slot);
        let login = match Login::parse(&conn.buf[..conn.buf_used]) {
            Ok(login) => login,
            Err(_) => {
                debug!(slot, "malformed login");
                metrics::PROTOCOL_ERRORS.increment();
                self.release_slot(slot);
                return;
            }
        };

        if login.protocol_version != PROTOCOL_VERSION {
            debug!(
                slot,
                version = login.protocol_version,
                "unsupported protocol version"
            );
            self.release_slot(slot);
            return;
        }

        if self.join_queue.is_full() {
            debug!(slot, "join queue full");
            self.release_slot(slot);
            return;
        }

        self.join_queue.push(IncomingSession {
            connection: ConnectionHandle(slot),
            username: login.username_bytes(),
        });
        metrics::SESSIONS_JOINED.increment();
        // The slot stays allocated: the session belongs to the
        // embedding driver now.
    }

    /// Post a recv into the unfilled tail of the connection's buffer.
    fn post_recv(&mut self, slot: usize) {
        let conn = self.connections.get_mut(slot);
        let fd = conn.fd();
        let used = conn.buf_used;
        if let Err(e) = self.driver.post_recv(slot, fd, &mut conn.buf[used..]) {
            debug!(slot, "failed to post recv: {e}");
            self.release_slot(slot);
        }
    }

    /// Tear down a connection: driver state first, then the record,
    /// whose drop closes the socket.
    fn release_slot(&mut self, slot: usize) {
        self.driver.release(slot);
        let _ = self.connections.release(slot);
        metrics::CONNECTIONS_ACTIVE.decrement();
        metrics::CONNECTIONS_RELEASED.increment();
    }
}
