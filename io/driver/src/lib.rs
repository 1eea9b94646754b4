//! io-driver - completion-based network I/O with io_uring and mio backends.
//!
//! This crate provides the proactor primitive for a single-threaded,
//! tick-driven server: the caller posts whole operations (accept, recv,
//! send) and collects their completions once per tick, tagged so each
//! one maps back to its connection slot in constant time.
//!
//! # Features
//!
//! - **Cross-platform**: io_uring on Linux 5.19+, mio (epoll/kqueue)
//!   everywhere else, behind one interface
//! - **Caller-owned sockets and buffers**: the driver never allocates
//!   per connection
//! - **Tick-friendly**: `poll(Some(Duration::ZERO))` drains ready
//!   completions without blocking
//!
//! # Quick Start
//!
//! ```no_run
//! use io_driver::{DriverBuilder, Event};
//! use std::time::Duration;
//!
//! # fn main() -> std::io::Result<()> {
//! let mut driver = DriverBuilder::new().build()?;
//! driver.listen("0.0.0.0:25565".parse().unwrap(), 16)?;
//! driver.post_accept()?;
//!
//! loop {
//!     driver.poll(Some(Duration::ZERO))?;
//!     for completion in driver.drain() {
//!         match completion.event {
//!             Event::Accept { fd } => { /* allocate a slot, post a recv */ }
//!             Event::Recv { slot, result } => { /* advance the parser */ }
//!             Event::Send { slot, result } => { /* move to the next phase */ }
//!         }
//!         if !completion.more {
//!             driver.post_accept()?;
//!         }
//!     }
//! }
//! # }
//! ```
//!
//! # Backend Selection
//!
//! By default the best available backend is selected: io_uring when the
//! kernel supports the needed opcodes, mio otherwise. Force one with
//! [`DriverBuilder::engine`].

mod builder;
mod driver;
mod types;

pub mod mio;

#[cfg(all(target_os = "linux", feature = "io_uring"))]
pub mod uring;

pub use builder::DriverBuilder;
pub use driver::Driver;
pub use types::{Completion, Engine, Event};

/// Check if io_uring is available on this system.
pub fn uring_available() -> bool {
    #[cfg(all(target_os = "linux", feature = "io_uring"))]
    {
        uring::is_supported()
    }
    #[cfg(not(all(target_os = "linux", feature = "io_uring")))]
    {
        false
    }
}
