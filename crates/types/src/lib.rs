//! Core types for the Taler echo simulator.
//!
//! This crate holds the pieces shared by both sides of a simulated exchange:
//!
//! - [`ZoneOutcomeTable`]: the per-zone weighted distribution of synthetic
//!   outcome codes the responder samples from.
//! - [`OutcomeCode`]: the fixed, ordered set of codes a responder can return.
//! - [`PeerIdentity`]: the (zone, pod) pair each side declares on the wire and
//!   that ends up in the traffic counter labels.

mod error;
mod identity;
mod outcome;
mod zone;

pub use error::{ConfigError, ZoneError};
pub use identity::{zone_suffix, PeerIdentity, AVAILABILITY_ZONE_HEADER, POD_NAME_HEADER};
pub use outcome::OutcomeCode;
pub use zone::{UnknownZonePolicy, Zone, ZoneOutcomeTable};
