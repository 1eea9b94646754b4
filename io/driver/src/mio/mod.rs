//! Mio-based I/O driver using epoll/kqueue.
//!
//! Adapts mio's readiness model to the completion-based [`Driver`]
//! interface: posted operations are parked per slot and executed
//! non-blockingly when the socket reports ready, producing the same
//! completions the io_uring backend gets from the kernel.

use crate::driver::Driver;
use crate::types::{Completion, Event};
use mio::net::TcpListener;
use mio::unix::SourceFd;
use mio::{Events, Interest, Poll, Token};
use std::io;
use std::net::SocketAddr;
use std::os::fd::{FromRawFd, IntoRawFd, OwnedFd, RawFd};
use std::time::Duration;

/// Token for the listening socket: the all-ones marker, disjoint from
/// every slot key.
const LISTENER: Token = Token(usize::MAX);

#[cfg(target_os = "linux")]
const SEND_FLAGS: libc::c_int = libc::MSG_NOSIGNAL;
#[cfg(not(target_os = "linux"))]
const SEND_FLAGS: libc::c_int = 0;

/// An operation waiting for its socket to become ready.
enum PendingOp {
    Recv {
        fd: RawFd,
        buf: *mut u8,
        len: usize,
    },
    Send {
        fd: RawFd,
        data: Box<[u8]>,
    },
}

/// Mio-based I/O driver.
pub struct MioDriver {
    poll: Poll,
    events: Events,
    listener: Option<TcpListener>,
    local_addr: Option<SocketAddr>,
    /// Parked operation per slot; at most one by the driver contract.
    ops: Box<[Option<PendingOp>]>,
    pending: Vec<Completion>,
}

// SAFETY: the raw buffer pointers in parked recv operations point into
// caller-owned memory that the caller keeps valid and unmoved until the
// completion is drained (the post_recv contract). They carry no thread
// affinity, so moving the driver between threads is sound.
unsafe impl Send for MioDriver {}

/// Non-blocking recv into a raw buffer. `None` means try again on the
/// next readiness event.
fn try_recv(fd: RawFd, buf: *mut u8, len: usize) -> Option<io::Result<usize>> {
    loop {
        let n = unsafe { libc::recv(fd, buf as *mut libc::c_void, len, 0) };
        if n >= 0 {
            return Some(Ok(n as usize));
        }
        let err = io::Error::last_os_error();
        match err.kind() {
            io::ErrorKind::WouldBlock => return None,
            io::ErrorKind::Interrupted => continue,
            _ => return Some(Err(err)),
        }
    }
}

/// Non-blocking send. `None` means try again on the next readiness
/// event; a short write is reported as-is.
fn try_send(fd: RawFd, data: &[u8]) -> Option<io::Result<usize>> {
    loop {
        let n = unsafe { libc::send(fd, data.as_ptr() as *const libc::c_void, data.len(), SEND_FLAGS) };
        if n >= 0 {
            return Some(Ok(n as usize));
        }
        let err = io::Error::last_os_error();
        match err.kind() {
            io::ErrorKind::WouldBlock => return None,
            io::ErrorKind::Interrupted => continue,
            _ => return Some(Err(err)),
        }
    }
}

impl MioDriver {
    /// Create a new mio driver with default settings.
    pub fn new() -> io::Result<Self> {
        Self::with_config(256)
    }

    /// Create a new mio driver sized for `max_slots` slot keys.
    pub fn with_config(max_slots: usize) -> io::Result<Self> {
        Ok(Self {
            poll: Poll::new()?,
            events: Events::with_capacity(1024),
            listener: None,
            local_addr: None,
            ops: (0..max_slots).map(|_| None).collect(),
            pending: Vec::with_capacity(256),
        })
    }

    /// Accept everything currently queued on the listener.
    fn accept_ready(&mut self) {
        let Some(listener) = &self.listener else {
            return;
        };

        loop {
            match listener.accept() {
                Ok((stream, _)) => {
                    let fd = unsafe { OwnedFd::from_raw_fd(stream.into_raw_fd()) };
                    self.pending
                        .push(Completion::with_more(Event::Accept { fd: Ok(fd) }, true));
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    self.pending
                        .push(Completion::with_more(Event::Accept { fd: Err(e) }, true));
                    break;
                }
            }
        }
    }

    /// Run the parked operation for `slot` if its readiness arrived.
    fn drive_slot(&mut self, slot: usize, readable: bool, writable: bool) {
        let Some(entry) = self.ops.get_mut(slot) else {
            return;
        };
        let Some(op) = entry.take() else {
            // Spurious readiness with nothing posted; the next post will
            // make its own attempt.
            return;
        };

        match op {
            PendingOp::Recv { fd, buf, len } => {
                if !readable {
                    *entry = Some(PendingOp::Recv { fd, buf, len });
                    return;
                }
                match try_recv(fd, buf, len) {
                    None => *entry = Some(PendingOp::Recv { fd, buf, len }),
                    Some(result) => self
                        .pending
                        .push(Completion::new(Event::Recv { slot, result })),
                }
            }
            PendingOp::Send { fd, data } => {
                if !writable {
                    *entry = Some(PendingOp::Send { fd, data });
                    return;
                }
                match try_send(fd, &data) {
                    None => *entry = Some(PendingOp::Send { fd, data }),
                    Some(result) => self
                        .pending
                        .push(Completion::new(Event::Send { slot, result })),
                }
            }
        }
    }
}

impl Driver for MioDriver {
    fn listen(&mut self, addr: SocketAddr, backlog: u32) -> io::Result<()> {
        let socket = socket2::Socket::new(
            match addr {
                SocketAddr::V4(_) => socket2::Domain::IPV4,
                SocketAddr::V6(_) => socket2::Domain::IPV6,
            },
            socket2::Type::STREAM,
            Some(socket2::Protocol::TCP),
        )?;

        socket.set_reuse_address(true)?;
        socket.set_nonblocking(true)?;
        socket.bind(&addr.into())?;
        socket.listen(backlog as i32)?;

        let std_listener: std::net::TcpListener = socket.into();
        let mut listener = TcpListener::from_std(std_listener);
        self.local_addr = listener.local_addr().ok();

        self.poll
            .registry()
            .register(&mut listener, LISTENER, Interest::READABLE)?;
        self.listener = Some(listener);
        Ok(())
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    fn post_accept(&mut self) -> io::Result<()> {
        // The listener registration is the standing arm; sweep anything
        // that queued before (or without) a readiness edge.
        self.accept_ready();
        Ok(())
    }

    fn associate(&mut self, slot: usize, fd: RawFd) -> io::Result<()> {
        if slot >= self.ops.len() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "slot out of range",
            ));
        }
        self.poll.registry().register(
            &mut SourceFd(&fd),
            Token(slot),
            Interest::READABLE | Interest::WRITABLE,
        )
    }

    fn post_recv(&mut self, slot: usize, fd: RawFd, buf: &mut [u8]) -> io::Result<()> {
        debug_assert!(
            self.ops.get(slot).is_some_and(|op| op.is_none()),
            "operation already in flight on slot {slot}"
        );

        // Attempt immediately: under edge-triggered readiness, data that
        // arrived before this post will never produce another event.
        match try_recv(fd, buf.as_mut_ptr(), buf.len()) {
            Some(result) => self
                .pending
                .push(Completion::new(Event::Recv { slot, result })),
            None => {
                self.ops[slot] = Some(PendingOp::Recv {
                    fd,
                    buf: buf.as_mut_ptr(),
                    len: buf.len(),
                });
            }
        }
        Ok(())
    }

    fn post_send(&mut self, slot: usize, fd: RawFd, data: &[u8]) -> io::Result<()> {
        debug_assert!(
            self.ops.get(slot).is_some_and(|op| op.is_none()),
            "operation already in flight on slot {slot}"
        );

        match try_send(fd, data) {
            Some(result) => self
                .pending
                .push(Completion::new(Event::Send { slot, result })),
            None => {
                self.ops[slot] = Some(PendingOp::Send {
                    fd,
                    data: data.into(),
                });
            }
        }
        Ok(())
    }

    fn release(&mut self, slot: usize) {
        // The caller closes the fd, which removes it from the OS
        // readiness set; only the parked state needs discarding.
        if let Some(op) = self.ops.get_mut(slot) {
            *op = None;
        }
    }

    fn poll(&mut self, timeout: Option<Duration>) -> io::Result<usize> {
        // Completions queued by post_recv/post_send immediate attempts
        // are preserved; drain() is the only consumer.
        match self.poll.poll(&mut self.events, timeout) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }

        // Collect event info first to avoid borrow issues.
        let ready: Vec<(Token, bool, bool)> = self
            .events
            .iter()
            .map(|e| {
                (
                    e.token(),
                    e.is_readable() || e.is_read_closed() || e.is_error(),
                    e.is_writable() || e.is_write_closed() || e.is_error(),
                )
            })
            .collect();

        for (token, readable, writable) in ready {
            if token == LISTENER {
                self.accept_ready();
            } else {
                self.drive_slot(token.0, readable, writable);
            }
        }

        Ok(self.pending.len())
    }

    fn drain(&mut self) -> Vec<Completion> {
        std::mem::take(&mut self.pending)
    }
}
