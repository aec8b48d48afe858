//! Echo Traffic Simulator
//!
//! A generator/responder pair that produces realistic cross-zone traffic and a
//! per-zone weighted outcome model that lets operators simulate degraded zones.
//!
//! # Architecture
//!
//! - **[`EchoResponder`]**: accepts requests (HTTP) or connections (raw TCP
//!   stream), samples an outcome from the [`ZoneOutcomeTable`], echoes the
//!   payload back and records both traffic legs.
//! - **[`EchoGenerator`]**: drives N HTTP workers at a target rate, or one
//!   long-lived duplex stream with send/receive logs, verifying that every byte
//!   comes back unchanged.
//! - **[`PayloadBufferPool`]**: recycles payload buffers between exchanges.
//! - **[`join_pair`]**: runs the two halves of a duplex stream as a structured
//!   pair of tasks.
//!
//! Generator and responder share nothing in memory; all coordination happens
//! over the wire.
//!
//! # Example
//!
//! ```ignore
//! use taler_echo::{EchoGenerator, GeneratorConfig, TransportMode};
//! use tokio_util::sync::CancellationToken;
//!
//! let config = GeneratorConfig::new("echo-server:8080")
//!     .with_mode(TransportMode::Http)
//!     .with_parallelism(4)
//!     .with_requests_per_second(10);
//!
//! let generator = EchoGenerator::new(config)?;
//! let report = generator.run(CancellationToken::new()).await?;
//! ```
//!
//! [`ZoneOutcomeTable`]: taler_types::ZoneOutcomeTable

pub mod config;
mod deadline;
mod error;
pub mod generator;
mod pair;
pub mod pool;
pub mod preamble;
mod readiness;
pub mod responder;

pub use config::{
    GeneratorConfig, PayloadBounds, ResponderConfig, StreamConfig, TransportMode, MIB,
};
pub use error::EchoError;
pub use generator::{EchoGenerator, GeneratorReport, GeneratorStats};
pub use pair::join_pair;
pub use pool::PayloadBufferPool;
pub use readiness::Readiness;
pub use responder::{BoundResponder, EchoResponder};
