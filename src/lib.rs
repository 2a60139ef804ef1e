//! echobench: a TCP echo benchmark server.
//!
//! Compares three Linux I/O models under an identical echo workload:
//! - `epoll`: readiness notification via mio (edge-triggered epoll)
//! - `uring`: single-shot completion-based I/O via io_uring
//! - `multishot`: multishot accept/recv via io_uring with a provided
//!   buffer ring shared with the kernel
//!
//! All three engines share one connection lifecycle, one metrics surface,
//! and one shutdown mechanism. The engine is selected at startup and runs
//! a single-threaded event loop until the shutdown flag is set.

pub mod config;
pub mod engine;
pub mod metrics;
pub mod signal;
