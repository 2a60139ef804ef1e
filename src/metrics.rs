//! Benchmark counters and the periodic stdout reporter.
//!
//! All counters are monotonic and mutated only by the event loop that owns
//! the `Metrics` value. The reporter re-prints a single carriage-return
//! status line at most once per second; the final summary bypasses the
//! rate limit with `force`.

use std::io::Write;
use std::time::{Duration, Instant};

const REPORT_INTERVAL: Duration = Duration::from_secs(1);

/// Counters recorded per benchmark run.
#[derive(Debug)]
pub struct Metrics {
    pub total_bytes: u64,
    pub total_messages: u64,
    pub connections_accepted: u64,
    pub connections_closed: u64,
    started: Instant,
    last_report: Instant,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        let now = Instant::now();
        Self {
            total_bytes: 0,
            total_messages: 0,
            connections_accepted: 0,
            connections_closed: 0,
            started: now,
            last_report: now,
        }
    }

    /// Connections currently open: accepted minus closed.
    pub fn active_connections(&self) -> u64 {
        self.connections_accepted - self.connections_closed
    }

    /// Re-print the status line, at most once per second unless `force` is
    /// set. The line is carriage-return prefixed so successive reports
    /// overwrite each other in place.
    pub fn report(&mut self, force: bool) {
        let now = Instant::now();
        if !force && now.duration_since(self.last_report) < REPORT_INTERVAL {
            return;
        }

        print!("\r{}", self.status_line(now.duration_since(self.started)));
        let _ = std::io::stdout().flush();

        self.last_report = now;
    }

    /// Format the status line for the given elapsed wall-clock time.
    fn status_line(&self, elapsed: Duration) -> String {
        let secs = elapsed.as_secs_f64();
        let msg_rate = self.total_messages as f64 / secs;
        let throughput_mbps = (self.total_bytes as f64 * 8.0) / (secs * 1_000_000.0);

        format!(
            "[{:.1}s] Connections: {} active, {} total | \
             Messages: {} ({:.0} msg/s) | \
             Throughput: {:.2} Mb/s ({:.2} MB/s) | \
             Total: {:.2} MB",
            secs,
            self.active_connections(),
            self.connections_accepted,
            self.total_messages,
            msg_rate,
            throughput_mbps,
            throughput_mbps / 8.0,
            self.total_bytes as f64 / (1024.0 * 1024.0),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_active_connections() {
        let mut metrics = Metrics::new();
        metrics.connections_accepted = 10;
        metrics.connections_closed = 4;
        assert_eq!(metrics.active_connections(), 6);
    }

    #[test]
    fn test_status_line_content() {
        let mut metrics = Metrics::new();
        metrics.total_bytes = 2_000_000;
        metrics.total_messages = 100;
        metrics.connections_accepted = 3;
        metrics.connections_closed = 1;

        let line = metrics.status_line(Duration::from_secs(2));
        assert!(line.starts_with("[2.0s]"), "line: {line}");
        assert!(line.contains("Connections: 2 active, 3 total"), "line: {line}");
        assert!(line.contains("Messages: 100 (50 msg/s)"), "line: {line}");
        // 2 MB over 2 s: 8 Mb/s, 1 MB/s
        assert!(line.contains("Throughput: 8.00 Mb/s (1.00 MB/s)"), "line: {line}");
        // 2_000_000 / 1024^2
        assert!(line.contains("Total: 1.91 MB"), "line: {line}");
    }
}
