//! Traffic accounting for the echo simulator.
//!
//! Every exchange produces two [`TrafficRecord`]s, one per direction, which a
//! [`TrafficRecorder`] folds into monotonically increasing byte counters. The
//! simulator only writes; the exporter in the production crate reads.
//!
//! # Failed exchanges
//!
//! Both records of a failed exchange carry `success = false`. The client→server
//! leg reports the bytes the responder actually received; the server→client
//! leg reports **zero** bytes, so failure simulations do not inflate the egress
//! numbers dashboards and the cross-zone optimizer look at. The rule is the
//! same for both transport modes.

mod exporter;

pub use exporter::{PrometheusTrafficRecorder, TRAFFIC_LABELS, TRAFFIC_TOTAL};

use std::fmt;
use taler_types::PeerIdentity;
use thiserror::Error;

/// Default factor applied to byte counts before they reach the counters.
pub const DEFAULT_TRAFFIC_MULTIPLIER: u64 = 1000;

/// Errors from the metrics backend.
#[derive(Debug, Error)]
pub enum MetricsError {
    #[error("Prometheus error: {0}")]
    Prometheus(#[from] prometheus::Error),
}

/// Transport a record was observed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Protocol {
    Http,
    Tcp,
}

impl Protocol {
    /// Label value used in the exported counter.
    pub fn as_str(self) -> &'static str {
        match self {
            Protocol::Http => "http",
            Protocol::Tcp => "tcp",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One counter increment: bytes that flowed from `source` to `target`.
#[derive(Debug, Clone, Copy)]
pub struct TrafficRecord<'a> {
    pub success: bool,
    pub protocol: Protocol,
    pub source: &'a PeerIdentity,
    pub target: &'a PeerIdentity,
    pub bytes: u64,
}

/// Sink for traffic records.
///
/// Implementations must tolerate high-frequency concurrent calls.
pub trait TrafficRecorder: Send + Sync {
    fn record(&self, record: TrafficRecord<'_>);
}

/// Recorder that discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopTrafficRecorder;

impl TrafficRecorder for NoopTrafficRecorder {
    fn record(&self, _record: TrafficRecord<'_>) {}
}

/// Byte totals of one finished exchange, seen from the responder.
#[derive(Debug, Clone, Copy)]
pub struct ExchangeTraffic<'a> {
    pub protocol: Protocol,
    pub client: &'a PeerIdentity,
    pub server: &'a PeerIdentity,
    pub success: bool,
    /// Bytes the responder received.
    pub client_to_server: u64,
    /// Bytes the responder sent back.
    pub server_to_client: u64,
}

impl ExchangeTraffic<'_> {
    /// Emit both legs, scaled by `multiplier`.
    pub fn record(&self, recorder: &dyn TrafficRecorder, multiplier: u64) {
        recorder.record(TrafficRecord {
            success: self.success,
            protocol: self.protocol,
            source: self.client,
            target: self.server,
            bytes: self.client_to_server.saturating_mul(multiplier),
        });

        let egress = if self.success {
            self.server_to_client.saturating_mul(multiplier)
        } else {
            0
        };
        recorder.record(TrafficRecord {
            success: self.success,
            protocol: self.protocol,
            source: self.server,
            target: self.client,
            bytes: egress,
        });
    }
}
