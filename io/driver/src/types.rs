//! Core types for the I/O driver.

use std::io;
use std::os::fd::OwnedFd;

/// A completed I/O operation, tagged with its origin.
///
/// Connection completions carry the slot key the operation was posted
/// under; listener completions are distinguished by variant. The tag is
/// recovered from the backend's per-operation user data in constant
/// time, with no auxiliary lookup.
#[derive(Debug)]
pub enum Event {
    /// An accept completed. On success the new socket is handed to the
    /// caller, which owns it from here on.
    Accept {
        /// The accepted socket, or the listener-level error.
        fd: io::Result<OwnedFd>,
    },

    /// A posted recv completed. `Ok(0)` means the peer closed the
    /// connection.
    Recv {
        /// Slot key the recv was posted under.
        slot: usize,
        /// Bytes read into the caller's buffer, or the socket error.
        result: io::Result<usize>,
    },

    /// A posted send completed.
    Send {
        /// Slot key the send was posted under.
        slot: usize,
        /// Bytes written, or the socket error.
        result: io::Result<usize>,
    },
}

/// An [`Event`] plus the re-arm state of the operation that produced it.
#[derive(Debug)]
pub struct Completion {
    /// What completed.
    pub event: Event,
    /// Whether the originating operation is still armed and will produce
    /// further completions. Only multishot accept ever clears this: when
    /// `more` is false after an accept completion, the caller must
    /// re-post the accept. Single-shot recv/send always report false.
    pub more: bool,
}

impl Completion {
    /// Create a single-shot completion (`more = false`).
    #[inline]
    pub fn new(event: Event) -> Self {
        Self { event, more: false }
    }

    /// Create a completion with an explicit re-arm flag.
    #[inline]
    pub fn with_more(event: Event, more: bool) -> Self {
        Self { event, more }
    }
}

/// I/O engine selection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum Engine {
    /// Use io_uring when the kernel supports it, mio otherwise.
    #[default]
    Auto,

    /// Use mio (epoll on Linux, kqueue on macOS).
    Mio,

    /// Use io_uring (Linux only). Building fails if unavailable.
    Uring,
}

impl std::fmt::Display for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Engine::Auto => write!(f, "auto"),
            Engine::Mio => write!(f, "mio"),
            Engine::Uring => write!(f, "uring"),
        }
    }
}

impl std::str::FromStr for Engine {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "auto" => Ok(Engine::Auto),
            "mio" | "epoll" | "kqueue" => Ok(Engine::Mio),
            "uring" | "io_uring" | "io-uring" => Ok(Engine::Uring),
            _ => Err(format!("unknown io engine: {}", s)),
        }
    }
}
