//! Exchange statistics collected by the generator.

use hdrhistogram::Histogram;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::info;

/// Counters shared by all workers of one generator.
///
/// Atomics for counts; the latency histogram sits behind a
/// `parking_lot::Mutex` and is only locked to record or snapshot.
pub struct GeneratorStats {
    exchanges: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    bytes_sent: AtomicU64,
    bytes_received: AtomicU64,
    reconnects: AtomicU64,
    /// Exchange latency in microseconds.
    latency: Mutex<Histogram<u64>>,
}

impl Default for GeneratorStats {
    fn default() -> Self {
        Self {
            exchanges: AtomicU64::new(0),
            succeeded: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
            reconnects: AtomicU64::new(0),
            latency: Mutex::new(Histogram::new(3).expect("histogram creation should succeed")),
        }
    }
}

impl GeneratorStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one finished exchange.
    ///
    /// `success` means the responder reported success (HTTP 200) or a
    /// stream exchange verified.
    pub fn record_exchange(&self, success: bool, sent: u64, received: u64, latency: Duration) {
        self.exchanges.fetch_add(1, Ordering::Relaxed);
        if success {
            self.succeeded.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failed.fetch_add(1, Ordering::Relaxed);
        }
        self.bytes_sent.fetch_add(sent, Ordering::Relaxed);
        self.bytes_received.fetch_add(received, Ordering::Relaxed);
        let _ = self
            .latency
            .lock()
            .record(latency.as_micros().min(u64::MAX as u128) as u64);
    }

    /// Record one redial of the stream connection.
    pub fn record_reconnect(&self) {
        self.reconnects.fetch_add(1, Ordering::Relaxed);
    }

    pub fn exchanges(&self) -> u64 {
        self.exchanges.load(Ordering::Relaxed)
    }

    pub fn succeeded(&self) -> u64 {
        self.succeeded.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    pub fn reconnects(&self) -> u64 {
        self.reconnects.load(Ordering::Relaxed)
    }

    /// Snapshot everything into a report.
    pub fn report(&self, duration: Duration) -> GeneratorReport {
        let latency = self.latency.lock();
        let quantile = |q: f64| {
            if latency.len() == 0 {
                Duration::ZERO
            } else {
                Duration::from_micros(latency.value_at_quantile(q))
            }
        };

        GeneratorReport {
            duration,
            exchanges: self.exchanges(),
            succeeded: self.succeeded(),
            failed: self.failed(),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            reconnects: self.reconnects(),
            p50_latency: quantile(0.50),
            p99_latency: quantile(0.99),
            max_latency: if latency.len() == 0 {
                Duration::ZERO
            } else {
                Duration::from_micros(latency.max())
            },
        }
    }
}

impl std::fmt::Debug for GeneratorStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeneratorStats")
            .field("exchanges", &self.exchanges())
            .field("succeeded", &self.succeeded())
            .field("failed", &self.failed())
            .field("reconnects", &self.reconnects())
            .finish()
    }
}

/// Summary of a generator run.
#[derive(Debug, Clone)]
pub struct GeneratorReport {
    pub duration: Duration,
    pub exchanges: u64,
    /// Exchanges the responder reported as successful.
    pub succeeded: u64,
    /// Exchanges with a simulated failure status or a discarded stream.
    pub failed: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub reconnects: u64,
    pub p50_latency: Duration,
    pub p99_latency: Duration,
    pub max_latency: Duration,
}

impl GeneratorReport {
    /// Exchanges per second over the run.
    pub fn throughput(&self) -> f64 {
        let secs = self.duration.as_secs_f64();
        if secs > 0.0 {
            self.exchanges as f64 / secs
        } else {
            0.0
        }
    }

    /// Emit the report as one structured log line.
    pub fn log(&self) {
        info!(
            duration_secs = self.duration.as_secs_f64(),
            exchanges = self.exchanges,
            succeeded = self.succeeded,
            failed = self.failed,
            bytes_sent = self.bytes_sent,
            bytes_received = self.bytes_received,
            reconnects = self.reconnects,
            throughput = self.throughput(),
            p50_ms = self.p50_latency.as_millis() as u64,
            p99_ms = self.p99_latency.as_millis() as u64,
            max_ms = self.max_latency.as_millis() as u64,
            "Generator finished"
        );
    }
}
