//! io_uring-based I/O driver for Linux.
//!
//! Uses a multishot accept for the listener and single-shot recv/send
//! for connections. Completions are matched back to their slot through
//! the submission's user-data word; no per-operation allocation and no
//! lookup on the completion path.

use crate::driver::Driver;
use crate::types::{Completion, Event};
use io_uring::opcode::{self, AcceptMulti};
use io_uring::types::{Fd, SubmitArgs, Timespec};
use io_uring::{cqueue, squeue, IoUring, Probe};
use std::io;
use std::net::SocketAddr;
use std::os::fd::{AsRawFd, FromRawFd, IntoRawFd, OwnedFd, RawFd};
use std::time::Duration;

/// User data layout (64 bits):
/// - bits 8..: slot key
/// - bits 0..8: op kind
///
/// The all-ones word tags the multishot accept, mirroring the listener
/// completion key convention. It can never collide with a connection
/// tag because slot keys are bounded far below `2^56`.
const ACCEPT_TOKEN: u64 = u64::MAX;

const OP_RECV: u64 = 1;
const OP_SEND: u64 = 2;

#[inline]
fn encode_user_data(slot: usize, op: u64) -> u64 {
    ((slot as u64) << 8) | op
}

#[inline]
fn decode_user_data(user_data: u64) -> (usize, u64) {
    ((user_data >> 8) as usize, user_data & 0xFF)
}

/// io_uring-based I/O driver.
pub struct UringDriver {
    ring: IoUring,
    listener: Option<OwnedFd>,
    local_addr: Option<SocketAddr>,
    /// In-flight send copy per slot. The kernel reads from the boxed
    /// buffer until the send completes, so it must not be dropped early.
    send_bufs: Box<[Option<Box<[u8]>>]>,
    pending: Vec<Completion>,
    /// Scratch for collecting CQEs during poll (reused to avoid allocation).
    cqe_scratch: Vec<cqueue::Entry>,
}

impl UringDriver {
    /// Create a new io_uring driver with default settings.
    pub fn new() -> io::Result<Self> {
        Self::with_config(512, 256)
    }

    /// Create a new io_uring driver with the given submission queue
    /// depth, sized for `max_slots` slot keys.
    pub fn with_config(sq_depth: u32, max_slots: usize) -> io::Result<Self> {
        if !is_supported() {
            return Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "io_uring lacks the required opcodes on this kernel",
            ));
        }

        Ok(Self {
            ring: IoUring::new(sq_depth)?,
            listener: None,
            local_addr: None,
            send_bufs: vec![None; max_slots].into_boxed_slice(),
            pending: Vec::with_capacity(256),
            cqe_scratch: Vec::with_capacity(256),
        })
    }

    /// Push an entry, flushing the submission queue once if it is full.
    fn push_sqe(&mut self, entry: &squeue::Entry) -> io::Result<()> {
        unsafe {
            if self.ring.submission().push(entry).is_ok() {
                return Ok(());
            }
            self.ring.submit()?;
            self.ring
                .submission()
                .push(entry)
                .map_err(|_| io::Error::other("submission queue full"))
        }
    }

    fn process_cqe(&mut self, cqe: cqueue::Entry) {
        let user_data = cqe.user_data();
        let result = cqe.result();

        if user_data == ACCEPT_TOKEN {
            let more = cqueue::more(cqe.flags());
            let fd = if result < 0 {
                Err(io::Error::from_raw_os_error(-result))
            } else {
                Ok(unsafe { OwnedFd::from_raw_fd(result) })
            };
            self.pending
                .push(Completion::with_more(Event::Accept { fd }, more));
            return;
        }

        let (slot, op) = decode_user_data(user_data);
        let result = if result < 0 {
            Err(io::Error::from_raw_os_error(-result))
        } else {
            Ok(result as usize)
        };

        match op {
            OP_RECV => self
                .pending
                .push(Completion::new(Event::Recv { slot, result })),
            OP_SEND => {
                // The kernel is done with the copy.
                if let Some(buf) = self.send_bufs.get_mut(slot) {
                    *buf = None;
                }
                self.pending
                    .push(Completion::new(Event::Send { slot, result }));
            }
            _ => {}
        }
    }
}

impl Driver for UringDriver {
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
        socket.bind(&addr.into())?;
        socket.listen(backlog as i32)?;

        self.local_addr = socket.local_addr()?.as_socket();
        self.listener = Some(unsafe { OwnedFd::from_raw_fd(socket.into_raw_fd()) });
        Ok(())
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    fn post_accept(&mut self) -> io::Result<()> {
        let fd = self
            .listener
            .as_ref()
            .map(|fd| fd.as_raw_fd())
            .ok_or_else(|| io::Error::other("post_accept before listen"))?;

        let entry = AcceptMulti::new(Fd(fd)).build().user_data(ACCEPT_TOKEN);
        self.push_sqe(&entry)?;
        self.ring.submit()?;
        Ok(())
    }

    fn associate(&mut self, _slot: usize, _fd: RawFd) -> io::Result<()> {
        // Plain fds need no per-connection setup with io_uring; the slot
        // key travels in each submission's user data instead.
        Ok(())
    }

    fn post_recv(&mut self, slot: usize, fd: RawFd, buf: &mut [u8]) -> io::Result<()> {
        let entry = opcode::Recv::new(Fd(fd), buf.as_mut_ptr(), buf.len() as u32)
            .build()
            .user_data(encode_user_data(slot, OP_RECV));
        self.push_sqe(&entry)
    }

    fn post_send(&mut self, slot: usize, fd: RawFd, data: &[u8]) -> io::Result<()> {
        debug_assert!(
            self.send_bufs.get(slot).is_some_and(|buf| buf.is_none()),
            "send already in flight on slot {slot}"
        );

        let data: Box<[u8]> = data.into();
        let entry = opcode::Send::new(Fd(fd), data.as_ptr(), data.len() as u32)
            .build()
            .user_data(encode_user_data(slot, OP_SEND));
        self.send_bufs[slot] = Some(data);

        if let Err(e) = self.push_sqe(&entry) {
            self.send_bufs[slot] = None;
            return Err(e);
        }
        Ok(())
    }

    fn release(&mut self, slot: usize) {
        if let Some(buf) = self.send_bufs.get_mut(slot) {
            *buf = None;
        }
    }

    fn poll(&mut self, timeout: Option<Duration>) -> io::Result<usize> {
        match timeout {
            Some(t) if t.is_zero() => {
                // Submit and sweep whatever is already complete.
                self.ring.submit()?;
            }
            Some(t) => {
                let ts = Timespec::new().sec(t.as_secs()).nsec(t.subsec_nanos());
                let args = SubmitArgs::new().timespec(&ts);
                // A lapsed timeout surfaces as ETIME; not an error here.
                let _ = self.ring.submitter().submit_with_args(1, &args);
            }
            None => {
                self.ring.submit_and_wait(1)?;
            }
        }

        self.cqe_scratch.extend(self.ring.completion());

        // Process in FIFO order; take the vec to sidestep the borrow.
        let mut cqes = std::mem::take(&mut self.cqe_scratch);
        for cqe in cqes.drain(..) {
            self.process_cqe(cqe);
        }
        self.cqe_scratch = cqes;

        Ok(self.pending.len())
    }

    fn drain(&mut self) -> Vec<Completion> {
        std::mem::take(&mut self.pending)
    }
}

/// Check whether this kernel's io_uring carries the opcodes the driver
/// needs.
pub fn is_supported() -> bool {
    match IoUring::new(8) {
        Ok(ring) => {
            let mut probe = Probe::new();
            if ring.submitter().register_probe(&mut probe).is_err() {
                return false;
            }
            probe.is_supported(AcceptMulti::CODE)
                && probe.is_supported(opcode::Recv::CODE)
                && probe.is_supported(opcode::Send::CODE)
        }
        Err(_) => false,
    }
}
