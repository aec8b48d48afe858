//! Taler echo traffic simulator.
//!
//! Runs the echo responder, the echo generator, or both, and exposes
//! `/health`, `/ready` and `/metrics` on the probe address.
//!
//! # Usage
//!
//! ```bash
//! # Responder
//! taler --module echo-server --availability-zone us-east-1a \
//!     --zone-config-path zones.toml
//!
//! # Generator
//! taler --module echo-client --availability-zone us-east-1b \
//!     --echo-server-address echo-server.taler.svc.cluster.local
//! ```
//!
//! # Exit codes
//!
//! - `0`: every module finished, or a signal arrived with
//!   `--fail-on-signal=false`
//! - `13`: stopped by SIGINT/SIGTERM with `--fail-on-signal` (the default)
//! - `99`: a module or the process setup failed

use anyhow::{Context, Result};
use clap::{ArgAction, Parser};
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use taler_echo::{PayloadBounds, StreamConfig, TransportMode};
use taler_metrics::DEFAULT_TRAFFIC_MULTIPLIER;
use taler_production::{
    init_logging, AppConfig, LoggingConfig, Module, RunError, Runner, EXIT_MODULE_FAILURE,
};
use taler_types::{PeerIdentity, UnknownZonePolicy};
use tokio::signal;
use tracing::{error, info};

/// Taler echo traffic simulator
///
/// Generates and answers cross-zone echo traffic and exports per-zone byte
/// counters.
#[derive(Parser, Debug)]
#[command(name = "taler")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Modules to run (echo-client, echo-server); repeat or comma-separate
    #[arg(long, value_delimiter = ',', required = true)]
    module: Vec<Module>,

    /// Availability zone of this pod
    #[arg(long, env = "AVAILABILITY_ZONE", default_value = "")]
    availability_zone: String,

    /// Pod name (defaults to the hostname)
    #[arg(long, env = "POD_NAME")]
    pod_name: Option<String>,

    /// Zone outcome table (YAML or TOML by extension, JSON otherwise)
    #[arg(long)]
    zone_config_path: Option<PathBuf>,

    /// What to do for zones missing from the table (reject, default-success)
    #[arg(long, default_value = "reject")]
    unknown_zone_policy: UnknownZonePolicy,

    /// Transport mode (http, stream)
    #[arg(long, default_value = "http")]
    mode: TransportMode,

    /// Echo responder host the generator targets
    #[arg(long, default_value = "echo-server.taler.svc.cluster.local")]
    echo_server_address: String,

    /// Echo port, used by both the generator and the responder
    #[arg(long, default_value_t = 8080)]
    echo_port: u16,

    /// IP the responder listens on
    #[arg(long, default_value = "0.0.0.0")]
    echo_server_listen_ip: IpAddr,

    /// Minimum payload size in MiB
    #[arg(long, default_value_t = 1)]
    min_data_size_mb: usize,

    /// Maximum payload size in MiB
    #[arg(long, default_value_t = 3)]
    max_data_size_mb: usize,

    /// Concurrent generator workers (defaults to the zone's hint, then 1)
    #[arg(long)]
    parallel_requests: Option<usize>,

    /// Exchanges per second per worker, 0 for unpaced (defaults to the
    /// zone's hint, then 1)
    #[arg(long)]
    requests_per_second: Option<u32>,

    /// Reconnect once after a stream-mode I/O failure
    #[arg(long)]
    allow_reconnect: bool,

    /// Deadline for dials, reads and HTTP exchanges
    #[arg(long, default_value = "20s", value_parser = humantime::parse_duration)]
    operation_timeout: Duration,

    /// Stream-mode chunk size in bytes
    #[arg(long, default_value_t = 64 * 1024)]
    chunk_size: usize,

    /// Stream-mode delay between chunks
    #[arg(long, default_value = "10ms", value_parser = humantime::parse_duration)]
    chunk_interval: Duration,

    /// Stream-mode chunks per exchange before half-closing (unbounded if unset)
    #[arg(long)]
    chunks_per_exchange: Option<u32>,

    /// Stream-mode exchanges per worker (unbounded if unset)
    #[arg(long)]
    exchanges: Option<u32>,

    /// Factor applied to byte counts before they reach the counters
    #[arg(long, default_value_t = DEFAULT_TRAFFIC_MULTIPLIER)]
    traffic_multiplier: u64,

    /// Probe and metrics listen address
    #[arg(long, default_value = "0.0.0.0:9090")]
    probe_addr: SocketAddr,

    /// Grace period for in-flight exchanges on shutdown
    #[arg(long, default_value = "5s", value_parser = humantime::parse_duration)]
    shutdown_grace: Duration,

    /// Exit with code 13 when stopped by SIGINT/SIGTERM
    #[arg(long, default_value_t = true, action = ArgAction::Set)]
    fail_on_signal: bool,

    /// Log level filter (overrides RUST_LOG)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Path to log file (redirects all logs to this file)
    #[arg(long)]
    logfile: Option<PathBuf>,

    /// Disable logging
    #[arg(long)]
    silent: bool,
}

impl Cli {
    fn pod_name(&self) -> String {
        self.pod_name
            .clone()
            .or_else(|| std::env::var("HOSTNAME").ok())
            .unwrap_or_default()
    }

    fn app_config(&self) -> AppConfig {
        let mut stream = StreamConfig::default()
            .with_chunk_size(self.chunk_size)
            .with_chunk_interval(self.chunk_interval)
            .with_read_timeout(self.operation_timeout);
        if let Some(chunks) = self.chunks_per_exchange {
            stream = stream.with_chunks_per_exchange(chunks);
        }
        if let Some(exchanges) = self.exchanges {
            stream = stream.with_exchanges(exchanges);
        }

        AppConfig {
            modules: self.module.clone(),
            identity: PeerIdentity::new(self.availability_zone.clone(), self.pod_name()),
            zone_config: self.zone_config_path.clone(),
            unknown_zone_policy: self.unknown_zone_policy,
            mode: self.mode,
            server_addr: format!("{}:{}", self.echo_server_address, self.echo_port),
            listen_addr: SocketAddr::new(self.echo_server_listen_ip, self.echo_port),
            payload: PayloadBounds::from_mib(self.min_data_size_mb, self.max_data_size_mb),
            parallelism: self.parallel_requests,
            requests_per_second: self.requests_per_second,
            allow_reconnect: self.allow_reconnect,
            operation_timeout: self.operation_timeout,
            stream,
            traffic_multiplier: self.traffic_multiplier,
            probe_addr: self.probe_addr,
            fail_on_signal: self.fail_on_signal,
            shutdown_grace: self.shutdown_grace,
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let logging = LoggingConfig {
        level: cli.log_level.clone(),
        logfile: cli.logfile.clone(),
        silent: cli.silent,
    };
    let _log_guard = match init_logging(&logging) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialise logging: {}", e);
            return ExitCode::from(EXIT_MODULE_FAILURE);
        }
    };

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            let code = e
                .downcast_ref::<RunError>()
                .map(RunError::exit_code)
                .unwrap_or(EXIT_MODULE_FAILURE);
            error!(error = %format!("{:#}", e), exit_code = code, "Taler exiting");
            ExitCode::from(code)
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = cli.app_config();
    info!(
        modules = ?config.modules,
        identity = %config.identity,
        mode = %config.mode,
        "Taler starting"
    );

    let runner = Runner::new(config).context("Failed to initialise modules")?;
    runner.run(shutdown_signal()).await?;
    Ok(())
}

/// Resolve on SIGINT or SIGTERM with the signal's name.
async fn shutdown_signal() -> &'static str {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => "SIGINT",
        _ = terminate => "SIGTERM",
    }
}
