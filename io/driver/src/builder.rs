//! Driver builder with fluent API.

use crate::driver::Driver;
use crate::types::Engine;
use std::io;

/// Builder for creating an I/O driver.
///
/// # Example
///
/// ```
/// use io_driver::{DriverBuilder, Engine};
///
/// let driver = DriverBuilder::new()
///     .engine(Engine::Mio)
///     .max_slots(256)
///     .build()
///     .unwrap();
/// ```
#[derive(Debug, Clone)]
pub struct DriverBuilder {
    engine: Engine,
    max_slots: usize,
    sq_depth: u32,
}

impl Default for DriverBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl DriverBuilder {
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        Self {
            engine: Engine::Auto,
            max_slots: 256,
            sq_depth: 512,
        }
    }

    /// Set the I/O engine to use.
    pub fn engine(mut self, engine: Engine) -> Self {
        self.engine = engine;
        self
    }

    /// Set the number of slot keys the caller will post operations
    /// under. Backends size per-slot state from this.
    pub fn max_slots(mut self, max_slots: usize) -> Self {
        self.max_slots = max_slots;
        self
    }

    /// Set the io_uring submission queue depth.
    ///
    /// Only applies to the io_uring backend. One in-flight operation per
    /// slot plus the accept means the queue never holds more than
    /// `max_slots + 1` entries, so the default leaves plenty of slack.
    pub fn sq_depth(mut self, depth: u32) -> Self {
        self.sq_depth = depth;
        self
    }

    /// Build the driver with the configured settings.
    pub fn build(self) -> io::Result<Box<dyn Driver>> {
        match self.engine {
            Engine::Auto => {
                #[cfg(all(target_os = "linux", feature = "io_uring"))]
                {
                    if crate::uring::is_supported() {
                        return self.build_uring();
                    }
                }
                self.build_mio()
            }
            Engine::Mio => self.build_mio(),
            Engine::Uring => {
                #[cfg(all(target_os = "linux", feature = "io_uring"))]
                {
                    if !crate::uring::is_supported() {
                        return Err(io::Error::new(
                            io::ErrorKind::Unsupported,
                            "io_uring is not supported on this kernel",
                        ));
                    }
                    self.build_uring()
                }
                #[cfg(not(all(target_os = "linux", feature = "io_uring")))]
                {
                    Err(io::Error::new(
                        io::ErrorKind::Unsupported,
                        "io_uring is only available on Linux with the io_uring feature",
                    ))
                }
            }
        }
    }

    fn build_mio(self) -> io::Result<Box<dyn Driver>> {
        Ok(Box::new(crate::mio::MioDriver::with_config(
            self.max_slots,
        )?))
    }

    #[cfg(all(target_os = "linux", feature = "io_uring"))]
    fn build_uring(self) -> io::Result<Box<dyn Driver>> {
        Ok(Box::new(crate::uring::UringDriver::with_config(
            self.sq_depth,
            self.max_slots,
        )?))
    }
}
