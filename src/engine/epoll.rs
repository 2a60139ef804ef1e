//! Readiness-based engine using mio (edge-triggered epoll on Linux).
//!
//! The poll loop wakes on socket readiness, then drains each ready socket
//! with non-blocking syscalls until `WouldBlock`. Received data is echoed
//! back with an immediate non-blocking send; short writes are not retried.

use crate::config::Config;
use crate::engine::listener::create_listener;
use crate::metrics::Metrics;
use mio::net::{TcpListener, TcpStream};
use mio::{Events, Interest, Poll, Token};
use slab::Slab;
use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error};

const LISTENER_TOKEN: Token = Token(usize::MAX);
const MAX_EVENTS: usize = 128;
const RECV_BUFFER_SIZE: usize = 4096;

/// Poll timeout so the reporter and shutdown flag are serviced on idle.
const WAIT_TIMEOUT: Duration = Duration::from_millis(100);

/// Per-connection state: the stream and an in-flight receive buffer.
struct Connection {
    stream: TcpStream,
    buf: Vec<u8>,
    /// Bytes received but not yet successfully echoed.
    filled: usize,
}

/// Run the epoll-based echo server until `shutdown` is set.
pub fn run(config: &Config, shutdown: Arc<AtomicBool>) -> io::Result<Metrics> {
    let listener = create_listener(config.port, true)?;
    let mut listener = TcpListener::from_std(listener);

    let mut poll = Poll::new()?;
    poll.registry()
        .register(&mut listener, LISTENER_TOKEN, Interest::READABLE)?;

    let mut events = Events::with_capacity(MAX_EVENTS);
    let mut connections: Slab<Connection> = Slab::new();
    let mut metrics = Metrics::new();

    println!("epoll server listening on port {}", config.port);

    while !shutdown.load(Ordering::Relaxed) {
        if let Err(e) = poll.poll(&mut events, Some(WAIT_TIMEOUT)) {
            if e.kind() == io::ErrorKind::Interrupted {
                continue;
            }
            return Err(e);
        }

        for event in events.iter() {
            match event.token() {
                LISTENER_TOKEN => {
                    accept_connections(&listener, &mut poll, &mut connections, &mut metrics)?;
                }
                Token(conn_id) => {
                    if event.is_readable() {
                        handle_readable(conn_id, &mut poll, &mut connections, &mut metrics);
                    }
                }
            }
        }

        metrics.report(false);
    }

    println!();

    // Abrupt close of whatever is still open; no drain protocol.
    for (conn_id, conn) in connections.iter_mut() {
        let _ = poll.registry().deregister(&mut conn.stream);
        metrics.connections_closed += 1;
        debug!(conn_id, "connection closed at shutdown");
    }
    connections.clear();

    metrics.report(true);

    Ok(metrics)
}

/// Accept until the listener would block.
fn accept_connections(
    listener: &TcpListener,
    poll: &mut Poll,
    connections: &mut Slab<Connection>,
    metrics: &mut Metrics,
) -> io::Result<()> {
    loop {
        match listener.accept() {
            Ok((stream, peer_addr)) => {
                let _ = stream.set_nodelay(true);

                let conn_id = connections.insert(Connection {
                    stream,
                    buf: vec![0u8; RECV_BUFFER_SIZE],
                    filled: 0,
                });

                // Re-borrow after insert
                let conn = &mut connections[conn_id];
                poll.registry()
                    .register(&mut conn.stream, Token(conn_id), Interest::READABLE)?;

                metrics.connections_accepted += 1;
                debug!(conn_id, peer = %peer_addr, "accepted connection");
            }
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
            Err(e) => {
                error!("accept error: {}", e);
                break;
            }
        }
    }
    Ok(())
}

/// Drain a readable connection, echoing each received chunk.
///
/// Edge-triggered registration means the readable event is only delivered
/// once per state change, so the recv loop must run until `WouldBlock`.
fn handle_readable(
    conn_id: usize,
    poll: &mut Poll,
    connections: &mut Slab<Connection>,
    metrics: &mut Metrics,
) {
    loop {
        let conn = match connections.get_mut(conn_id) {
            Some(c) => c,
            None => return,
        };

        let filled = conn.filled;
        let n = match conn.stream.read(&mut conn.buf[filled..]) {
            Ok(0) => {
                // Peer closed. A full buffer also lands here: a read into
                // a zero-length slice returns 0.
                close_connection(poll, connections, metrics, conn_id);
                return;
            }
            Ok(n) => n,
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return,
            Err(e) => {
                debug!(conn_id, error = %e, "recv error");
                close_connection(poll, connections, metrics, conn_id);
                return;
            }
        };

        conn.filled += n;
        metrics.total_bytes += n as u64;

        // Echo everything pending. A failed or would-block send leaves the
        // cursor in place; short writes are not retried.
        match conn.stream.write(&conn.buf[..conn.filled]) {
            Ok(sent) if sent > 0 => {
                metrics.total_messages += 1;
                conn.filled = 0;
            }
            _ => {}
        }
    }
}

fn close_connection(
    poll: &mut Poll,
    connections: &mut Slab<Connection>,
    metrics: &mut Metrics,
    conn_id: usize,
) {
    if let Some(mut conn) = connections.try_remove(conn_id) {
        let _ = poll.registry().deregister(&mut conn.stream);
        metrics.connections_closed += 1;
        debug!(conn_id, "connection closed");
    }
}
