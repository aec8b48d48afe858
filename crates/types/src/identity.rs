//! Peer identity carried on the wire and into traffic labels.

use std::fmt;

/// Header carrying the caller's availability zone.
pub const AVAILABILITY_ZONE_HEADER: &str = "Availability-Zone";

/// Header carrying the caller's pod name.
pub const POD_NAME_HEADER: &str = "Pod-Name";

/// The zone and pod a participant declares for itself.
///
/// Either field may be empty: a peer that does not declare its identity is
/// still served, and shows up with empty labels.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct PeerIdentity {
    /// Raw availability zone, e.g. `us-east-1a`.
    pub zone: String,
    /// Pod name, usually the hostname.
    pub pod: String,
}

impl PeerIdentity {
    /// Create a new identity.
    pub fn new(zone: impl Into<String>, pod: impl Into<String>) -> Self {
        Self {
            zone: zone.into(),
            pod: pod.into(),
        }
    }

    /// The rightmost segment of the zone name.
    pub fn zone_suffix(&self) -> &str {
        zone_suffix(&self.zone)
    }
}

impl fmt::Display for PeerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.zone, self.pod)
    }
}

/// Rightmost segment of a hierarchical zone name (`us-east-1a` → `1a`).
///
/// Names without a separator are returned unchanged.
pub fn zone_suffix(zone: &str) -> &str {
    zone.rsplit_once('-').map(|(_, suffix)| suffix).unwrap_or(zone)
}
