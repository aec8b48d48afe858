//! Generator and responder configuration.

use crate::EchoError;
use rand::Rng;
use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;
use taler_metrics::DEFAULT_TRAFFIC_MULTIPLIER;
use taler_types::PeerIdentity;

/// One mebibyte.
pub const MIB: usize = 1024 * 1024;

/// Transport used between generator and responder.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TransportMode {
    /// Independent request/response exchanges over HTTP.
    #[default]
    Http,
    /// One long-lived duplex TCP connection.
    Stream,
}

impl fmt::Display for TransportMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportMode::Http => write!(f, "http"),
            TransportMode::Stream => write!(f, "stream"),
        }
    }
}

impl FromStr for TransportMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "http" => Ok(TransportMode::Http),
            "stream" | "tcp" => Ok(TransportMode::Stream),
            other => Err(format!(
                "unknown transport mode '{other}' (expected 'http' or 'stream')"
            )),
        }
    }
}

/// Inclusive lower and exclusive upper bound on HTTP payload sizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PayloadBounds {
    pub min_bytes: usize,
    pub max_bytes: usize,
}

impl PayloadBounds {
    pub fn new(min_bytes: usize, max_bytes: usize) -> Self {
        Self {
            min_bytes,
            max_bytes,
        }
    }

    /// Bounds given in MiB.
    pub fn from_mib(min_mib: usize, max_mib: usize) -> Self {
        Self::new(min_mib.saturating_mul(MIB), max_mib.saturating_mul(MIB))
    }

    /// Reject bounds that cannot produce a payload.
    pub fn validate(&self) -> Result<(), EchoError> {
        if self.max_bytes == 0 {
            return Err(EchoError::Config(
                "maximum payload size must be positive".to_string(),
            ));
        }
        if self.min_bytes > self.max_bytes {
            return Err(EchoError::Config(format!(
                "minimum payload size {} exceeds maximum {}",
                self.min_bytes, self.max_bytes
            )));
        }
        Ok(())
    }

    /// Draw a size uniformly from `[min, max)`, or exactly `min` when the
    /// bounds coincide.
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> usize {
        if self.min_bytes >= self.max_bytes {
            self.min_bytes
        } else {
            rng.gen_range(self.min_bytes..self.max_bytes)
        }
    }
}

impl Default for PayloadBounds {
    fn default() -> Self {
        Self::from_mib(1, 3)
    }
}

/// Knobs of the duplex stream mode.
#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// Bytes per chunk written by the send loop.
    pub chunk_size: usize,
    /// Pause between chunks.
    pub chunk_interval: Duration,
    /// Extra chunks sent after cancellation before half-closing.
    pub drain_iterations: u32,
    /// Deadline applied to every individual read.
    pub read_timeout: Duration,
    /// End an exchange after this many chunks instead of waiting for
    /// cancellation. Each bounded exchange uses a fresh connection.
    pub chunks_per_exchange: Option<u32>,
    /// Stop after this many verified exchanges.
    pub exchanges: Option<u32>,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            chunk_size: 64 * 1024,
            chunk_interval: Duration::from_millis(10),
            drain_iterations: 3,
            read_timeout: Duration::from_secs(20),
            chunks_per_exchange: None,
            exchanges: None,
        }
    }
}

impl StreamConfig {
    pub fn with_chunk_size(mut self, bytes: usize) -> Self {
        self.chunk_size = bytes;
        self
    }

    pub fn with_chunk_interval(mut self, interval: Duration) -> Self {
        self.chunk_interval = interval;
        self
    }

    pub fn with_drain_iterations(mut self, iterations: u32) -> Self {
        self.drain_iterations = iterations;
        self
    }

    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    pub fn with_chunks_per_exchange(mut self, chunks: u32) -> Self {
        self.chunks_per_exchange = Some(chunks);
        self
    }

    pub fn with_exchanges(mut self, exchanges: u32) -> Self {
        self.exchanges = Some(exchanges);
        self
    }
}

/// Configuration for the echo generator.
#[derive(Debug, Clone)]
pub struct GeneratorConfig {
    /// `host:port` of the responder.
    pub server_addr: String,
    pub mode: TransportMode,
    /// Identity declared to the responder.
    pub identity: PeerIdentity,
    pub payload: PayloadBounds,
    /// Number of concurrent HTTP workers.
    pub parallelism: usize,
    /// Target rate per worker. Zero disables pacing.
    pub requests_per_second: u32,
    /// Upper bound on one HTTP exchange or one stream write.
    pub operation_timeout: Duration,
    /// Allow one redial after a failure on an established stream.
    pub allow_reconnect: bool,
    pub stream: StreamConfig,
}

impl GeneratorConfig {
    /// Create a config targeting `server_addr` with default settings.
    pub fn new(server_addr: impl Into<String>) -> Self {
        Self {
            server_addr: server_addr.into(),
            mode: TransportMode::Http,
            identity: PeerIdentity::default(),
            payload: PayloadBounds::default(),
            parallelism: 1,
            requests_per_second: 1,
            operation_timeout: Duration::from_secs(20),
            allow_reconnect: false,
            stream: StreamConfig::default(),
        }
    }

    pub fn with_mode(mut self, mode: TransportMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_identity(mut self, identity: PeerIdentity) -> Self {
        self.identity = identity;
        self
    }

    pub fn with_payload(mut self, payload: PayloadBounds) -> Self {
        self.payload = payload;
        self
    }

    pub fn with_parallelism(mut self, workers: usize) -> Self {
        self.parallelism = workers;
        self
    }

    pub fn with_requests_per_second(mut self, rps: u32) -> Self {
        self.requests_per_second = rps;
        self
    }

    pub fn with_operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout = timeout;
        self
    }

    pub fn with_reconnect(mut self, allow: bool) -> Self {
        self.allow_reconnect = allow;
        self
    }

    pub fn with_stream(mut self, stream: StreamConfig) -> Self {
        self.stream = stream;
        self
    }

    /// Check the settings before anything is spawned.
    pub fn validate(&self) -> Result<(), EchoError> {
        if self.server_addr.is_empty() {
            return Err(EchoError::Config("server address is empty".to_string()));
        }
        if self.parallelism == 0 {
            return Err(EchoError::Config(
                "parallelism must be at least 1".to_string(),
            ));
        }
        if self.operation_timeout.is_zero() {
            return Err(EchoError::Config(
                "operation timeout must be positive".to_string(),
            ));
        }
        match self.mode {
            TransportMode::Http => self.payload.validate(),
            TransportMode::Stream => {
                if self.stream.chunk_size == 0 {
                    return Err(EchoError::Config("chunk size must be positive".to_string()));
                }
                if self.stream.read_timeout.is_zero() {
                    return Err(EchoError::Config(
                        "read timeout must be positive".to_string(),
                    ));
                }
                Ok(())
            }
        }
    }

    /// Full URL of the echo endpoint.
    pub fn echo_url(&self) -> String {
        format!("http://{}/echo", self.server_addr)
    }

    /// Minimum spacing between exchanges of one worker, if pacing is enabled.
    pub fn pacing_period(&self) -> Option<Duration> {
        (self.requests_per_second > 0).then(|| Duration::from_secs(1) / self.requests_per_second)
    }
}

/// Configuration for the echo responder.
#[derive(Debug, Clone)]
pub struct ResponderConfig {
    pub listen_addr: SocketAddr,
    pub mode: TransportMode,
    /// Identity of this responder; its zone selects the outcome row.
    pub identity: PeerIdentity,
    /// Factor applied to byte counts before recording.
    pub traffic_multiplier: u64,
    /// Delay added to every simulated failure.
    pub failure_delay: Duration,
    /// How long in-flight exchanges may finish after cancellation.
    pub shutdown_grace: Duration,
    /// Per-operation deadline on stream connections.
    pub operation_timeout: Duration,
}

impl ResponderConfig {
    /// Create a config listening on `listen_addr` with default settings.
    pub fn new(listen_addr: SocketAddr) -> Self {
        Self {
            listen_addr,
            mode: TransportMode::Http,
            identity: PeerIdentity::default(),
            traffic_multiplier: DEFAULT_TRAFFIC_MULTIPLIER,
            failure_delay: Duration::from_secs(1),
            shutdown_grace: Duration::from_secs(5),
            operation_timeout: Duration::from_secs(20),
        }
    }

    pub fn with_mode(mut self, mode: TransportMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_identity(mut self, identity: PeerIdentity) -> Self {
        self.identity = identity;
        self
    }

    pub fn with_traffic_multiplier(mut self, multiplier: u64) -> Self {
        self.traffic_multiplier = multiplier;
        self
    }

    pub fn with_failure_delay(mut self, delay: Duration) -> Self {
        self.failure_delay = delay;
        self
    }

    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    pub fn with_operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout = timeout;
        self
    }
}
