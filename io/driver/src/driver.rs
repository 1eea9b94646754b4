//! I/O driver trait definition.

use crate::types::Completion;
use std::io;
use std::net::SocketAddr;
use std::os::fd::RawFd;
use std::time::Duration;

/// Completion-based I/O driver, abstracting over io_uring and mio.
///
/// The driver owns the listening socket and the completion machinery;
/// connection sockets stay with the caller, which passes the raw fd into
/// each posted operation. Tagging discipline:
///
/// - Every connection operation is posted under a small integer slot
///   key chosen by the caller, and its completion carries that key back.
/// - At most one operation may be in flight per slot at a time. Backends
///   rely on this to keep per-slot state flat; violating it is a caller
///   bug.
/// - A slot key must not be reused for a new connection while an
///   operation posted under it is still in flight. Combined with the
///   one-op rule this means slot keys need no generation counters: a
///   completion always refers to the connection that posted it.
///
/// # Usage Pattern
///
/// ```ignore
/// let mut driver = Driver::builder().build()?;
/// driver.listen("0.0.0.0:25565".parse()?, 16)?;
/// driver.post_accept()?;
///
/// loop {
///     driver.poll(Some(Duration::ZERO))?;
///     for completion in driver.drain() {
///         match completion.event {
///             Event::Accept { fd } => { /* allocate a slot, post a recv */ }
///             Event::Recv { slot, result } => { /* advance the parser */ }
///             Event::Send { slot, result } => { /* next phase */ }
///         }
///         if !completion.more { driver.post_accept()?; }
///     }
/// }
/// ```
pub trait Driver: Send {
    // === Listener operations ===

    /// Bind the listening socket and start listening.
    ///
    /// Sets `SO_REUSEADDR` before binding. Does not arm the accept; call
    /// [`Driver::post_accept`] once after this.
    fn listen(&mut self, addr: SocketAddr, backlog: u32) -> io::Result<()>;

    /// The address the listener is bound to, once [`Driver::listen`] has
    /// succeeded.
    fn local_addr(&self) -> Option<SocketAddr>;

    /// Arm (or re-arm) the accept operation.
    ///
    /// io_uring posts a multishot accept; it stays armed until a
    /// completion reports `more == false`, at which point the caller
    /// re-posts. mio listeners are level-armed by registration and this
    /// is a cheap re-check for already-queued connections.
    fn post_accept(&mut self) -> io::Result<()>;

    // === Connection operations ===

    /// Associate an accepted socket with the driver under a slot key.
    ///
    /// Must be called once per connection before the first posted
    /// operation. mio registers the fd with its poll under the slot
    /// token; io_uring needs no per-fd setup.
    fn associate(&mut self, slot: usize, fd: RawFd) -> io::Result<()>;

    /// Post a single-shot recv into a caller-owned buffer.
    ///
    /// Completes with `Event::Recv { slot, result }`; `Ok(0)` is EOF.
    ///
    /// # Buffer Lifetime
    ///
    /// The buffer must remain valid **and unmoved** until the completion
    /// for this operation is drained. The kernel may write into it at
    /// any point in between.
    fn post_recv(&mut self, slot: usize, fd: RawFd, buf: &mut [u8]) -> io::Result<()>;

    /// Post a single-shot send.
    ///
    /// The driver copies `data` internally, so the caller's buffer is
    /// free as soon as this returns. Completes with
    /// `Event::Send { slot, result }` carrying the number of bytes the
    /// kernel actually wrote.
    fn post_send(&mut self, slot: usize, fd: RawFd, data: &[u8]) -> io::Result<()>;

    /// Discard per-slot driver state after the caller releases a
    /// connection.
    ///
    /// The caller closes the fd itself; closing removes it from the OS
    /// readiness set, so there is nothing to deregister. Must not be
    /// called with an operation still in flight on the slot.
    fn release(&mut self, slot: usize);

    // === Event loop ===

    /// Submit pending operations and collect ready completions.
    ///
    /// - `Some(Duration::ZERO)`: drain whatever is ready, never block.
    /// - `Some(t)`: block up to `t` for at least one completion.
    /// - `None`: block until at least one completion arrives.
    ///
    /// Returns the number of completions waiting to be drained.
    fn poll(&mut self, timeout: Option<Duration>) -> io::Result<usize>;

    /// Take all pending completions.
    ///
    /// Call after [`Driver::poll`]. Completions are delivered in the
    /// order the backend observed them; per-slot order is total because
    /// of the one-op-per-slot rule.
    fn drain(&mut self) -> Vec<Completion>;
}
