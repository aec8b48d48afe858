//! Prometheus-backed [`TrafficRecorder`].
//!
//! Each recorder owns its own [`Registry`] rather than registering globally, so
//! several recorders (one per test, say) can coexist in one process.

use crate::{MetricsError, Protocol, TrafficRecord, TrafficRecorder};
use prometheus::{Encoder, IntCounterVec, Opts, Registry, TextEncoder};
use taler_types::PeerIdentity;

/// Name of the exported byte counter.
pub const TRAFFIC_TOTAL: &str = "traffic_total";

/// Label names of [`TRAFFIC_TOTAL`], in `with_label_values` order.
pub const TRAFFIC_LABELS: [&str; 6] = [
    "success",
    "protocol",
    "source_pod",
    "source_az",
    "target_az",
    "target_pod",
];

/// Accumulates traffic into an `IntCounterVec`.
#[derive(Clone)]
pub struct PrometheusTrafficRecorder {
    registry: Registry,
    traffic: IntCounterVec,
}

impl PrometheusTrafficRecorder {
    /// Create a recorder with a fresh registry.
    pub fn new() -> Result<Self, MetricsError> {
        let registry = Registry::new();
        let traffic = IntCounterVec::new(
            Opts::new(
                TRAFFIC_TOTAL,
                "Total bytes sent and received by protocol, source pod, source az, target az, target pod, and success.",
            ),
            &TRAFFIC_LABELS,
        )?;
        registry.register(Box::new(traffic.clone()))?;

        Ok(Self { registry, traffic })
    }

    /// Render all metrics in the Prometheus text format.
    ///
    /// Returns the content type alongside the encoded bytes.
    pub fn encode(&self) -> Result<(String, Vec<u8>), MetricsError> {
        let encoder = TextEncoder::new();
        let families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&families, &mut buffer)?;
        Ok((encoder.format_type().to_string(), buffer))
    }

    /// Current value of one series.
    pub fn bytes(
        &self,
        success: bool,
        protocol: Protocol,
        source: &PeerIdentity,
        target: &PeerIdentity,
    ) -> u64 {
        self.traffic
            .with_label_values(&label_values(success, protocol, source, target))
            .get()
    }
}

impl TrafficRecorder for PrometheusTrafficRecorder {
    fn record(&self, record: TrafficRecord<'_>) {
        self.traffic
            .with_label_values(&label_values(
                record.success,
                record.protocol,
                record.source,
                record.target,
            ))
            .inc_by(record.bytes);
    }
}

fn label_values<'a>(
    success: bool,
    protocol: Protocol,
    source: &'a PeerIdentity,
    target: &'a PeerIdentity,
) -> [&'a str; 6] {
    [
        if success { "true" } else { "false" },
        protocol.as_str(),
        source.pod.as_str(),
        source.zone.as_str(),
        target.zone.as_str(),
        target.pod.as_str(),
    ]
}
