//! Completion-based engines on io_uring (Linux only).
//!
//! Shared pieces: the tagged operation table correlating submissions with
//! completions, the provided buffer ring for multishot receive, and the
//! timed completion wait both engines loop on.

pub mod buf_ring;
pub mod multishot;
pub mod request;
pub mod single_shot;

pub use buf_ring::BufRing;
pub use request::{Op, OpTable};

use io_uring::{squeue, types, IoUring};
use std::io;
use std::os::unix::io::RawFd;

/// Submission/completion queue depth for both engines.
pub const RING_ENTRIES: u32 = 256;

/// Receive buffer size, also the stride of the provided buffer ring.
pub const RECV_BUFFER_SIZE: usize = 4096;

/// Completion wait timeout so the reporter and shutdown flag are serviced
/// on idle.
const WAIT_TIMEOUT_NS: u32 = 100_000_000;

/// Submit pending entries and wait for at least one completion, bounded
/// by the 100 ms poll timeout. Timeouts surface as `ETIME`.
pub(crate) fn submit_and_wait(ring: &IoUring) -> io::Result<usize> {
    let ts = types::Timespec::new().nsec(WAIT_TIMEOUT_NS);
    let args = types::SubmitArgs::new().timespec(&ts);
    ring.submitter().submit_with_args(1, &args)
}

/// Push a prepared entry whose user_data is `token`. On a full submission
/// queue the operation record is released before the error is returned.
pub(crate) fn push(
    ring: &mut IoUring,
    ops: &mut OpTable,
    token: u64,
    entry: &squeue::Entry,
) -> io::Result<()> {
    unsafe {
        if ring.submission().push(entry).is_err() {
            ops.free(token);
            return Err(io::Error::new(
                io::ErrorKind::Other,
                "submission queue full",
            ));
        }
    }
    Ok(())
}

pub(crate) fn set_tcp_nodelay(fd: RawFd) {
    let on: libc::c_int = 1;
    let _ = unsafe {
        libc::setsockopt(
            fd,
            libc::IPPROTO_TCP,
            libc::TCP_NODELAY,
            &on as *const _ as *const libc::c_void,
            std::mem::size_of::<libc::c_int>() as libc::socklen_t,
        )
    };
}

pub(crate) fn close_fd(fd: RawFd) {
    unsafe { libc::close(fd) };
}
