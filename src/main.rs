//! echobench: TCP echo benchmark server.
//!
//! Selects one of three network engines at startup (epoll, io_uring
//! single-shot, io_uring multishot) and runs it until SIGINT or SIGTERM.
//! Throughput metrics are re-printed to stdout once per second;
//! diagnostics go to stderr so the status line stays intact.

use echobench::config::Config;
use echobench::{engine, signal};
use tracing::info;
use tracing_subscriber::EnvFilter;

fn main() {
    let config = match Config::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("echobench: {e}");
            std::process::exit(1);
        }
    };

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let shutdown = match signal::install() {
        Ok(flag) => flag,
        Err(e) => {
            eprintln!("echobench: failed to install signal handler: {e}");
            std::process::exit(1);
        }
    };

    info!(mode = ?config.mode, port = config.port, "starting echo benchmark server");

    match engine::run(&config, shutdown) {
        Ok(metrics) => {
            info!(
                bytes = metrics.total_bytes,
                messages = metrics.total_messages,
                accepted = metrics.connections_accepted,
                closed = metrics.connections_closed,
                "server stopped"
            );
        }
        Err(e) => {
            eprintln!("echobench: {e}");
            std::process::exit(1);
        }
    }
}
