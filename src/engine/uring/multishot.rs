//! Multishot completion engine with a provided buffer ring.
//!
//! One multishot accept covers the listener and one multishot recv covers
//! each connection; the kernel selects a receive buffer from the
//! registered ring per arriving message. Each received chunk is copied
//! into a fresh heap buffer for an async send and the pool buffer is
//! recycled immediately, so pool residency is capped at one loop
//! iteration regardless of how slowly peers drain their echoes.
//!
//! A terminating multishot recv (no `F_MORE`) is treated as end of
//! connection; recv is not re-armed.

use super::{
    close_fd, push, set_tcp_nodelay, submit_and_wait, BufRing, Op, OpTable, RECV_BUFFER_SIZE,
    RING_ENTRIES,
};
use crate::config::Config;
use crate::engine::listener::create_listener;
use crate::metrics::Metrics;
use io_uring::{cqueue, opcode, types, IoUring};
use std::io;
use std::os::unix::io::{AsRawFd, RawFd};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Buffer group id the ring is registered under.
pub const RECV_BGID: u16 = 1;

/// Number of buffers in the provided ring.
const BUF_COUNT: u16 = 256;

/// Lightweight view of a record, so dispatch can inspect the tag without
/// holding a borrow of the table across submissions.
enum Tag {
    Accept,
    Read(RawFd),
    Write,
}

/// Run the multishot io_uring echo server until `shutdown` is set.
pub fn run(config: &Config, shutdown: Arc<AtomicBool>) -> io::Result<Metrics> {
    let listener = create_listener(config.port, false)?;
    let listener_fd = listener.as_raw_fd();

    let mut ring = IoUring::new(RING_ENTRIES)?;
    let mut buf_ring = BufRing::new(&ring, BUF_COUNT, RECV_BUFFER_SIZE, RECV_BGID)?;
    let mut ops = OpTable::with_capacity(RING_ENTRIES as usize * 2);
    let mut metrics = Metrics::new();

    submit_multishot_accept(&mut ring, &mut ops, listener_fd)?;
    ring.submit()?;

    println!("multishot server listening on port {}", config.port);

    while !shutdown.load(Ordering::Relaxed) {
        match submit_and_wait(&ring) {
            Ok(_) => {}
            Err(ref e) if e.raw_os_error() == Some(libc::ETIME) => {
                metrics.report(false);
                continue;
            }
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }

        loop {
            let cqe = match ring.completion().next() {
                Some(cqe) => cqe,
                None => break,
            };

            dispatch(
                cqe.user_data(),
                cqe.result(),
                cqe.flags(),
                &mut ring,
                &mut ops,
                &mut buf_ring,
                &mut metrics,
                listener_fd,
            )?;

            metrics.report(false);
        }
    }

    println!();

    // Every live connection holds exactly one multishot recv record;
    // in-flight send records only carry copied buffers.
    for op in ops.drain() {
        match op {
            Op::Read { fd, .. } => {
                close_fd(fd);
                metrics.connections_closed += 1;
            }
            Op::Accept { .. } | Op::Write { .. } => {}
        }
    }

    metrics.report(true);

    if let Err(e) = buf_ring.unregister(&ring) {
        warn!(error = %e, "failed to unregister buffer ring");
    }

    Ok(metrics)
}

#[allow(clippy::too_many_arguments)]
fn dispatch(
    token: u64,
    result: i32,
    flags: u32,
    ring: &mut IoUring,
    ops: &mut OpTable,
    buf_ring: &mut BufRing,
    metrics: &mut Metrics,
    listener_fd: RawFd,
) -> io::Result<()> {
    let more = cqueue::more(flags);

    let tag = match ops.get(token) {
        Some(Op::Accept { .. }) => Tag::Accept,
        Some(Op::Read { fd, .. }) => Tag::Read(*fd),
        Some(Op::Write { .. }) => Tag::Write,
        None => {
            warn!(token, "unknown token in completion");
            return Ok(());
        }
    };

    // Errors are handled before any tag-specific logic. The accept record
    // is bound to the multishot submission and must survive transient
    // failures; everything else is freed along with any buffer it owns.
    if result < 0 {
        let err = io::Error::from_raw_os_error(-result);
        if -result == libc::ENOBUFS {
            warn!("buffer pool exhausted");
        }
        match tag {
            Tag::Accept => warn!(error = %err, "accept failed"),
            Tag::Read(_) | Tag::Write => {
                debug!(error = %err, "operation failed");
                ops.free(token);
            }
        }
        return Ok(());
    }

    match tag {
        Tag::Accept => {
            let client_fd = result;
            set_tcp_nodelay(client_fd);
            metrics.connections_accepted += 1;
            debug!(fd = client_fd, "accepted connection");

            submit_multishot_recv(ring, ops, client_fd)?;

            // The kernel dropped the multishot accept; rearm it on the
            // same record.
            if !more {
                rearm_multishot_accept(ring, token, listener_fd)?;
            }

            ring.submit()?;
        }
        Tag::Read(fd) => {
            let n = result as usize;

            if let Some(bid) = cqueue::buffer_select(flags) {
                if n > 0 {
                    metrics.total_bytes += n as u64;
                    metrics.total_messages += 1;

                    // Copy out and hand the pool slot straight back to the
                    // kernel rather than holding it across the send.
                    let echo = buf_ring.buffer(bid)[..n].to_vec();
                    submit_send(ring, ops, fd, echo)?;
                }
                buf_ring.recycle(bid);
            }

            // Multishot recv terminated: end of connection.
            if !more {
                ops.free(token);
                close_fd(fd);
                metrics.connections_closed += 1;
                debug!(fd, "connection closed");
            }

            ring.submit()?;
        }
        Tag::Write => {
            // Send finished; release the copied buffer with the record.
            ops.free(token);
        }
    }

    Ok(())
}

fn submit_multishot_accept(
    ring: &mut IoUring,
    ops: &mut OpTable,
    listener_fd: RawFd,
) -> io::Result<()> {
    let token = ops.alloc(Op::Accept { fd: listener_fd });

    let entry = opcode::AcceptMulti::new(types::Fd(listener_fd))
        .build()
        .user_data(token);

    push(ring, ops, token, &entry)
}

/// Resubmit a multishot accept reusing an existing record's token.
fn rearm_multishot_accept(ring: &mut IoUring, token: u64, listener_fd: RawFd) -> io::Result<()> {
    let entry = opcode::AcceptMulti::new(types::Fd(listener_fd))
        .build()
        .user_data(token);

    unsafe {
        if ring.submission().push(&entry).is_err() {
            return Err(io::Error::new(
                io::ErrorKind::Other,
                "submission queue full",
            ));
        }
    }
    Ok(())
}

fn submit_multishot_recv(ring: &mut IoUring, ops: &mut OpTable, fd: RawFd) -> io::Result<()> {
    let token = ops.alloc(Op::Read { fd, buf: None });

    let entry = opcode::RecvMulti::new(types::Fd(fd), RECV_BGID)
        .build()
        .user_data(token);

    push(ring, ops, token, &entry)
}

fn submit_send(ring: &mut IoUring, ops: &mut OpTable, fd: RawFd, buf: Vec<u8>) -> io::Result<()> {
    let ptr = buf.as_ptr();
    let len = buf.len();
    let token = ops.alloc(Op::Write { fd, buf, len });

    let entry = opcode::Send::new(types::Fd(fd), ptr, len as u32)
        .build()
        .user_data(token);

    push(ring, ops, token, &entry)
}
