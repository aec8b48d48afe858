//! Process layer for the Taler echo traffic simulator.
//!
//! This crate wires the library crates into a runnable process:
//!
//! - [`config`]: the immutable [`AppConfig`] built once from the CLI.
//! - [`probe`]: `/health`, `/ready` and `/metrics` for orchestrators and
//!   Prometheus.
//! - [`runner`]: starts the configured modules under one cancellation token,
//!   aggregates the first error and maps the outcome to an exit code.
//! - [`telemetry`]: logging setup.

pub mod config;
pub mod probe;
pub mod runner;
pub mod telemetry;

pub use config::{AppConfig, Module};
pub use probe::{create_router, ProbeServer, ProbeState};
pub use runner::{RunError, Runner, EXIT_MODULE_FAILURE, EXIT_SIGNAL};
pub use telemetry::{init_logging, LoggingConfig, TelemetryError};
