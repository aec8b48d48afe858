//! Error types for zone configuration and lookup.

use crate::OutcomeCode;
use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while loading or validating a zone configuration.
///
/// All of these are fatal: no traffic starts with a bad table.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read zone config {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse zone config: {0}")]
    Parse(String),

    #[error("Zone config defines no zones")]
    Empty,

    #[error("Response weight for {code} cannot be negative in zone {zone}, got {weight}")]
    NegativeWeight {
        zone: String,
        code: OutcomeCode,
        weight: i64,
    },

    #[error("Response percentages must sum to 100 for zone {zone}, got {total}")]
    BadTotal { zone: String, total: i64 },

    #[error("Zone {0} has no entry in the zone config")]
    MissingZone(String),
}

/// Errors raised when sampling an outcome for a zone.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ZoneError {
    #[error("Zone {0} not found")]
    UnknownZone(String),

    #[error("No responses defined for zone {0}")]
    NoWeights(String),
}
