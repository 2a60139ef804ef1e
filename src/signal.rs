//! Signal handling for shutdown.
//!
//! SIGINT and SIGTERM set a shared flag; the running engine observes it at
//! loop boundaries and exits cleanly after printing the final metrics line.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Install signal handlers for shutdown.
///
/// Returns an `Arc<AtomicBool>` that is set to `true` when SIGINT or
/// SIGTERM is received. A second signal exits the process immediately.
pub fn install() -> Result<Arc<AtomicBool>, ctrlc::Error> {
    let shutdown = Arc::new(AtomicBool::new(false));
    let flag = shutdown.clone();

    ctrlc::set_handler(move || {
        if flag.swap(true, Ordering::Relaxed) {
            tracing::warn!("received second signal, exiting immediately");
            std::process::exit(1);
        }
    })?;

    Ok(shutdown)
}
