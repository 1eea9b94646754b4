//! Per-connection state for the login sequence.

use protocol_beta::Login;
use std::os::fd::{AsRawFd, OwnedFd, RawFd};

/// Per-connection buffer capacity: the largest inbound packet is a
/// login request carrying a 16-character username.
pub const BUF_LEN: usize = Login::MAX_SIZE;

/// The async operation currently outstanding on a connection.
///
/// Doubles as the connection's position in the login sequence: exactly
/// one operation is in flight per connection, and its completion is the
/// only thing that advances the state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    /// Receiving the handshake packet.
    ReadHandshake,
    /// Sending the offline-mode handshake response.
    WriteHandshake,
    /// Receiving the login request.
    ReadLogin,
}

/// Opaque reference to a live connection slot, handed to the embedding
/// driver when a session joins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionHandle(pub(crate) usize);

impl ConnectionHandle {
    /// The underlying slot key.
    pub fn index(self) -> usize {
        self.0
    }
}

/// A connection working through the handshake/login exchange.
///
/// One buffer serves both directions: inbound framing while reading,
/// and (notionally) the outbound response while writing. The state
/// machine never has two operations in flight, so the two uses cannot
/// overlap.
pub struct Connection {
    socket: OwnedFd,
    /// The outstanding operation; see [`Op`].
    pub op: Op,
    pub buf: [u8; BUF_LEN],
    /// Valid bytes at the head of `buf`.
    pub buf_used: usize,
    /// How full `buf` must be before the parser can make progress.
    pub target_buf_len: usize,
}

impl Connection {
    /// Wrap a freshly accepted socket, ready for its first recv.
    pub fn new(socket: OwnedFd) -> Self {
        Self {
            socket,
            op: Op::ReadHandshake,
            buf: [0; BUF_LEN],
            buf_used: 0,
            target_buf_len: 1,
        }
    }

    /// The connection's socket. Closed when the record is dropped.
    pub fn fd(&self) -> RawFd {
        self.socket.as_raw_fd()
    }
}
