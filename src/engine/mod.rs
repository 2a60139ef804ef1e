//! Network engines for the echo benchmark.
//!
//! Three interchangeable single-threaded event loops:
//! - `epoll`: readiness-based, edge-triggered (mio)
//! - `uring::single_shot`: completion-based, one operation per submission
//! - `uring::multishot`: completion-based, multishot accept/recv with a
//!   kernel-shared provided buffer ring
//!
//! Each engine owns its listener, its connection state, and the run's
//! `Metrics`, which it returns after a clean shutdown.

pub mod epoll;
pub mod listener;

#[cfg(target_os = "linux")]
pub mod uring;

use crate::config::{Config, EngineType};
use crate::metrics::Metrics;
use std::io;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

/// Run the engine selected by the configuration until `shutdown` is set.
///
/// Returns the final metrics on clean shutdown; setup failures (bind,
/// listen, ring init, buffer-ring registration) propagate as errors.
pub fn run(config: &Config, shutdown: Arc<AtomicBool>) -> io::Result<Metrics> {
    match config.mode {
        EngineType::Epoll => epoll::run(config, shutdown),
        EngineType::Uring => {
            #[cfg(target_os = "linux")]
            {
                uring::single_shot::run(config, shutdown)
            }
            #[cfg(not(target_os = "linux"))]
            {
                Err(unsupported())
            }
        }
        EngineType::Multishot => {
            #[cfg(target_os = "linux")]
            {
                uring::multishot::run(config, shutdown)
            }
            #[cfg(not(target_os = "linux"))]
            {
                Err(unsupported())
            }
        }
    }
}

#[cfg(not(target_os = "linux"))]
fn unsupported() -> io::Error {
    io::Error::new(
        io::ErrorKind::Unsupported,
        "io_uring engines are only supported on Linux",
    )
}
