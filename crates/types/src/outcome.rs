//! Synthetic outcome codes returned by the responder.

use std::fmt;

/// A status code the responder can hand back for one exchange.
///
/// The declaration order is the bucket order used by
/// [`ZoneOutcomeTable::sample_outcome`](crate::ZoneOutcomeTable::sample_outcome):
/// a draw that lands on a bucket boundary belongs to the later code, so
/// reordering these variants changes which code owns boundary draws.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum OutcomeCode {
    /// 200 OK.
    Ok,
    /// 404 Not Found.
    NotFound,
    /// 500 Internal Server Error.
    InternalServerError,
    /// 503 Service Unavailable.
    ServiceUnavailable,
    /// 504 Gateway Timeout.
    GatewayTimeout,
}

impl OutcomeCode {
    /// All codes, in bucket order.
    pub const ALL: [OutcomeCode; 5] = [
        OutcomeCode::Ok,
        OutcomeCode::NotFound,
        OutcomeCode::InternalServerError,
        OutcomeCode::ServiceUnavailable,
        OutcomeCode::GatewayTimeout,
    ];

    /// The numeric HTTP status.
    pub fn as_u16(self) -> u16 {
        match self {
            OutcomeCode::Ok => 200,
            OutcomeCode::NotFound => 404,
            OutcomeCode::InternalServerError => 500,
            OutcomeCode::ServiceUnavailable => 503,
            OutcomeCode::GatewayTimeout => 504,
        }
    }

    /// Map a numeric status back to a code, if it is one we simulate.
    pub fn from_u16(status: u16) -> Option<Self> {
        Self::ALL.into_iter().find(|code| code.as_u16() == status)
    }

    /// Whether this outcome simulates a failing zone.
    pub fn is_failure(self) -> bool {
        self != OutcomeCode::Ok
    }
}

impl fmt::Display for OutcomeCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_u16())
    }
}
