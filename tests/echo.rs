//! End-to-end echo tests.
//!
//! Each test spawns an engine on an ephemeral port in a background
//! thread, drives it with blocking TCP clients, then sets the shutdown
//! flag and asserts on the metrics the engine returns.

use echobench::config::{Config, EngineType};
use echobench::engine;
use echobench::metrics::Metrics;
use std::io::{self, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

struct TestServer {
    port: u16,
    shutdown: Arc<AtomicBool>,
    handle: thread::JoinHandle<io::Result<Metrics>>,
}

impl TestServer {
    fn start(mode: EngineType) -> Self {
        let port = reserve_port();
        let config = Config {
            mode,
            port,
            ..Config::default()
        };

        let shutdown = Arc::new(AtomicBool::new(false));
        let flag = shutdown.clone();
        let handle = thread::spawn(move || engine::run(&config, flag));

        Self {
            port,
            shutdown,
            handle,
        }
    }

    /// Connect to the server, retrying until the listener is up.
    fn connect(&self) -> TcpStream {
        let deadline = Instant::now() + Duration::from_secs(2);
        loop {
            match TcpStream::connect(("127.0.0.1", self.port)) {
                Ok(stream) => {
                    stream.set_nodelay(true).unwrap();
                    stream
                        .set_read_timeout(Some(Duration::from_secs(2)))
                        .unwrap();
                    return stream;
                }
                Err(_) if Instant::now() < deadline => {
                    thread::sleep(Duration::from_millis(10));
                }
                Err(e) => panic!("server never started listening: {e}"),
            }
        }
    }

    /// Signal shutdown and return the final metrics.
    fn stop(self) -> Metrics {
        // Give the engine time to observe client EOFs before it exits.
        thread::sleep(Duration::from_millis(300));
        self.shutdown.store(true, Ordering::Relaxed);
        self.handle
            .join()
            .expect("engine thread panicked")
            .expect("engine returned an error")
    }
}

fn reserve_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

fn roundtrip(stream: &mut TcpStream, payload: &[u8]) -> Vec<u8> {
    stream.write_all(payload).unwrap();
    let mut echoed = vec![0u8; payload.len()];
    stream.read_exact(&mut echoed).unwrap();
    echoed
}

fn repeating_payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| b'A' + (i % 26) as u8).collect()
}

#[cfg(target_os = "linux")]
fn uring_available() -> bool {
    io_uring::IoUring::new(8).is_ok()
}

#[cfg(target_os = "linux")]
fn multishot_available() -> bool {
    use io_uring::{opcode, IoUring, Probe};

    let ring = match IoUring::new(8) {
        Ok(ring) => ring,
        Err(_) => return false,
    };

    let mut probe = Probe::new();
    if ring.submitter().register_probe(&mut probe).is_err() {
        return false;
    }
    if !probe.is_supported(opcode::AcceptMulti::CODE)
        || !probe.is_supported(opcode::RecvMulti::CODE)
    {
        return false;
    }

    // Provided buffer rings cannot be probed by opcode; try one.
    match echobench::engine::uring::BufRing::new(&ring, 8, 512, 9) {
        Ok(buf_ring) => {
            let _ = buf_ring.unregister(&ring);
            true
        }
        Err(_) => false,
    }
}

#[test]
fn epoll_single_connection_roundtrip() {
    let server = TestServer::start(EngineType::Epoll);

    let payload = repeating_payload(128);
    let mut client = server.connect();
    let echoed = roundtrip(&mut client, &payload);
    assert_eq!(echoed, payload);
    drop(client);

    let metrics = server.stop();
    assert_eq!(metrics.connections_accepted, 1);
    assert_eq!(metrics.connections_closed, 1);
    assert_eq!(metrics.total_bytes, 128);
    assert!(metrics.total_messages >= 1);
}

#[test]
fn epoll_immediate_disconnect() {
    let server = TestServer::start(EngineType::Epoll);

    let client = server.connect();
    drop(client);

    let metrics = server.stop();
    assert_eq!(metrics.connections_accepted, 1);
    assert_eq!(metrics.connections_closed, 1);
    assert_eq!(metrics.total_bytes, 0);
}

#[test]
fn epoll_bind_conflict_fails() {
    // Occupy a port without SO_REUSEPORT; engine setup must fail.
    let occupied = TcpListener::bind("0.0.0.0:0").unwrap();
    let port = occupied.local_addr().unwrap().port();

    let config = Config {
        mode: EngineType::Epoll,
        port,
        ..Config::default()
    };
    let shutdown = Arc::new(AtomicBool::new(false));

    let err = engine::run(&config, shutdown).unwrap_err();
    assert_eq!(err.kind(), io::ErrorKind::AddrInUse);
}

#[cfg(target_os = "linux")]
#[test]
fn uring_ten_connections_five_roundtrips() {
    if !uring_available() {
        eprintln!("skipping: io_uring unavailable");
        return;
    }

    let server = TestServer::start(EngineType::Uring);

    let payload = repeating_payload(1024);
    for _ in 0..10 {
        let mut client = server.connect();
        for _ in 0..5 {
            let echoed = roundtrip(&mut client, &payload);
            assert_eq!(echoed, payload);
        }
    }

    let metrics = server.stop();
    assert_eq!(metrics.connections_accepted, 10);
    assert_eq!(metrics.connections_closed, 10);
    assert_eq!(metrics.total_bytes, 51_200);
    assert!(metrics.total_messages >= 50);
}

#[cfg(target_os = "linux")]
#[test]
fn multishot_large_payload_spans_pool_buffers() {
    if !multishot_available() {
        eprintln!("skipping: multishot io_uring unavailable");
        return;
    }

    let server = TestServer::start(EngineType::Multishot);

    // 16 KiB in one write: four pool-buffer fills, echoed back in
    // whatever chunking the kernel produces.
    let payload = repeating_payload(16 * 1024);
    let mut client = server.connect();
    client.write_all(&payload).unwrap();

    let mut echoed = vec![0u8; payload.len()];
    client.read_exact(&mut echoed).unwrap();
    assert_eq!(echoed, payload);
    drop(client);

    let metrics = server.stop();
    assert_eq!(metrics.connections_accepted, 1);
    assert_eq!(metrics.connections_closed, 1);
    assert_eq!(metrics.total_bytes, 16 * 1024);
    assert!(metrics.total_messages >= 4);
}

#[cfg(target_os = "linux")]
#[test]
fn multishot_concurrent_connections() {
    if !multishot_available() {
        eprintln!("skipping: multishot io_uring unavailable");
        return;
    }

    let server = TestServer::start(EngineType::Multishot);

    let mut clients: Vec<TcpStream> = (0..8).map(|_| server.connect()).collect();
    let payload = repeating_payload(512);
    for _ in 0..3 {
        for client in clients.iter_mut() {
            let echoed = roundtrip(client, &payload);
            assert_eq!(echoed, payload);
        }
    }
    drop(clients);

    let metrics = server.stop();
    assert_eq!(metrics.connections_accepted, 8);
    assert_eq!(metrics.connections_closed, 8);
    assert_eq!(metrics.total_bytes, 8 * 3 * 512);
}
