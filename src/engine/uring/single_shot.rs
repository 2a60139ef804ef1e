//! Single-shot completion engine.
//!
//! Every operation is submitted individually: one accept is kept in
//! flight against the listener, and each connection cycles through
//! recv → send → recv, one submission at a time. The 4 KiB receive
//! buffer travels with the operation records, so a connection owns
//! exactly one buffer for its whole lifetime.
//!
//! Partial sends are not retried; the buffer is resubmitted in full on
//! the next receive cycle.

use super::{
    close_fd, push, set_tcp_nodelay, submit_and_wait, Op, OpTable, RECV_BUFFER_SIZE, RING_ENTRIES,
};
use crate::config::Config;
use crate::engine::listener::create_listener;
use crate::metrics::Metrics;
use io_uring::{opcode, types, IoUring};
use std::io;
use std::os::unix::io::{AsRawFd, RawFd};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Run the single-shot io_uring echo server until `shutdown` is set.
pub fn run(config: &Config, shutdown: Arc<AtomicBool>) -> io::Result<Metrics> {
    let listener = create_listener(config.port, false)?;
    let listener_fd = listener.as_raw_fd();

    let mut ring = IoUring::new(RING_ENTRIES)?;
    let mut ops = OpTable::with_capacity(RING_ENTRIES as usize * 2);
    let mut metrics = Metrics::new();

    submit_accept(&mut ring, &mut ops, listener_fd)?;
    ring.submit()?;

    println!("uring server listening on port {}", config.port);

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
                &mut ring,
                &mut ops,
                &mut metrics,
            )?;

            metrics.report(false);
        }
    }

    println!();

    // Each live connection has exactly one operation in flight, so the
    // table drains to one close per connection.
    for op in ops.drain() {
        match op {
            Op::Read { fd, .. } | Op::Write { fd, .. } => {
                close_fd(fd);
                metrics.connections_closed += 1;
            }
            Op::Accept { .. } => {}
        }
    }

    metrics.report(true);

    Ok(metrics)
}

/// Handle one completion by its record tag; flushes any submissions the
/// dispatch produced.
fn dispatch(
    token: u64,
    result: i32,
    ring: &mut IoUring,
    ops: &mut OpTable,
    metrics: &mut Metrics,
) -> io::Result<()> {
    let op = match ops.free(token) {
        Some(op) => op,
        None => {
            warn!(token, "unknown token in completion");
            return Ok(());
        }
    };

    match op {
        Op::Accept { fd: listener_fd } => {
            if result < 0 {
                // Stop accepting; existing connections continue.
                warn!(
                    "accept failed: {}",
                    io::Error::from_raw_os_error(-result)
                );
                return Ok(());
            }

            let client_fd = result;
            set_tcp_nodelay(client_fd);
            metrics.connections_accepted += 1;
            debug!(fd = client_fd, "accepted connection");

            submit_recv(ring, ops, client_fd, vec![0u8; RECV_BUFFER_SIZE])?;
            submit_accept(ring, ops, listener_fd)?;
        }
        Op::Read { fd, buf: Some(buf) } => {
            if result > 0 {
                let n = result as usize;
                metrics.total_bytes += n as u64;
                metrics.total_messages += 1;

                // The receive buffer becomes the send buffer.
                submit_send(ring, ops, fd, buf, n)?;
            } else {
                if result < 0 {
                    debug!(fd, error = %io::Error::from_raw_os_error(-result), "recv error");
                }
                close_fd(fd);
                metrics.connections_closed += 1;
            }
        }
        Op::Read { fd, buf: None } => {
            warn!(fd, "recv completion without a buffer");
        }
        Op::Write { fd, buf, .. } => {
            if result > 0 {
                // Echo done; rearm the receive with the same buffer.
                submit_recv(ring, ops, fd, buf)?;
            } else {
                if result < 0 {
                    debug!(fd, error = %io::Error::from_raw_os_error(-result), "send error");
                }
                close_fd(fd);
                metrics.connections_closed += 1;
            }
        }
    }

    ring.submit()?;
    Ok(())
}

fn submit_accept(ring: &mut IoUring, ops: &mut OpTable, listener_fd: RawFd) -> io::Result<()> {
    let token = ops.alloc(Op::Accept { fd: listener_fd });

    let entry = opcode::Accept::new(
        types::Fd(listener_fd),
        std::ptr::null_mut(),
        std::ptr::null_mut(),
    )
    .build()
    .user_data(token);

    push(ring, ops, token, &entry)
}

fn submit_recv(ring: &mut IoUring, ops: &mut OpTable, fd: RawFd, mut buf: Vec<u8>) -> io::Result<()> {
    let ptr = buf.as_mut_ptr();
    let len = buf.len() as u32;
    let token = ops.alloc(Op::Read { fd, buf: Some(buf) });

    let entry = opcode::Recv::new(types::Fd(fd), ptr, len)
        .build()
        .user_data(token);

    push(ring, ops, token, &entry)
}

fn submit_send(
    ring: &mut IoUring,
    ops: &mut OpTable,
    fd: RawFd,
    buf: Vec<u8>,
    len: usize,
) -> io::Result<()> {
    let ptr = buf.as_ptr();
    let token = ops.alloc(Op::Write { fd, buf, len });

    let entry = opcode::Send::new(types::Fd(fd), ptr, len as u32)
        .build()
        .user_data(token);

    push(ring, ops, token, &entry)
}
