//! Module supervision.
//!
//! The [`Runner`] owns the process-wide shared state (zone table, traffic
//! recorder, readiness flag), starts the probe server and every configured
//! module under one [`CancellationToken`], and stops everything on the first
//! module error or on a shutdown signal.

use crate::config::{AppConfig, Module};
use crate::probe::{ProbeServer, ProbeState};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use taler_echo::{EchoError, EchoGenerator, EchoResponder, Readiness};
use taler_metrics::{MetricsError, PrometheusTrafficRecorder, TrafficRecorder};
use taler_types::{ConfigError, ZoneOutcomeTable};
use thiserror::Error;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Exit code when a module fails.
pub const EXIT_MODULE_FAILURE: u8 = 99;

/// Exit code when stopped by a signal with fail-on-signal set.
pub const EXIT_SIGNAL: u8 = 13;

/// Extra time past the responders' own grace period before tasks are aborted.
const TEARDOWN_MARGIN: Duration = Duration::from_secs(1);

/// Errors that end a run.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("No modules configured")]
    NoModules,

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Metrics error: {0}")]
    Metrics(#[from] MetricsError),

    #[error("Probe server error: {0}")]
    Probe(#[from] std::io::Error),

    #[error("Module {module} failed: {source}")]
    Module { module: Module, source: EchoError },

    #[error("Task failed: {0}")]
    Task(String),

    #[error("Stopped by {0}")]
    Signal(&'static str),
}

impl RunError {
    /// Process exit code for this error.
    pub fn exit_code(&self) -> u8 {
        match self {
            RunError::Signal(_) => EXIT_SIGNAL,
            _ => EXIT_MODULE_FAILURE,
        }
    }
}

type ModuleResult = (Module, Result<(), EchoError>);

/// Runs the configured modules until they finish, fail, or a signal arrives.
pub struct Runner {
    config: AppConfig,
    table: Arc<ZoneOutcomeTable>,
    recorder: Arc<PrometheusTrafficRecorder>,
    readiness: Readiness,
}

impl Runner {
    /// Load the zone table and build the shared state.
    ///
    /// Without a responder module there is nothing to wait for, so the
    /// process reports ready immediately.
    pub fn new(config: AppConfig) -> Result<Self, RunError> {
        if config.modules.is_empty() {
            return Err(RunError::NoModules);
        }

        let table = Arc::new(config.load_zone_table()?);
        let recorder = Arc::new(PrometheusTrafficRecorder::new()?);
        let readiness = Readiness::new();
        if !config.runs(Module::EchoServer) {
            readiness.mark_ready();
        }

        Ok(Self {
            config,
            table,
            recorder,
            readiness,
        })
    }

    /// State served by the probe router.
    pub fn probe_state(&self) -> ProbeState {
        ProbeState {
            readiness: self.readiness.clone(),
            recorder: Arc::clone(&self.recorder),
        }
    }

    /// Run until every module finishes, one fails, or `shutdown` resolves.
    ///
    /// `shutdown` yields the name of the signal that stopped the process.
    pub async fn run<S>(self, shutdown: S) -> Result<(), RunError>
    where
        S: Future<Output = &'static str>,
    {
        let cancel = CancellationToken::new();
        let probe = ProbeServer::bind(self.config.probe_addr, self.probe_state()).await?;
        let probe_task = tokio::spawn(probe.serve(cancel.clone()));

        let mut modules = JoinSet::new();
        let mut first_error = match self.start_modules(&mut modules, &cancel).await {
            Ok(()) => self.supervise(&mut modules, shutdown).await,
            Err(e) => Some(e),
        };

        cancel.cancel();
        self.drain(&mut modules, &mut first_error).await;

        match probe_task.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                warn!(error = %e, "Probe server failed");
                first_error.get_or_insert(RunError::Probe(e));
            }
            Err(e) => {
                warn!(error = %e, "Probe server task failed");
                first_error.get_or_insert(RunError::Task(e.to_string()));
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => {
                info!("All modules stopped");
                Ok(())
            }
        }
    }

    /// Build and spawn every configured module.
    ///
    /// The responder binds before any generator starts, so a colocated
    /// generator never races the listener.
    async fn start_modules(
        &self,
        modules: &mut JoinSet<ModuleResult>,
        cancel: &CancellationToken,
    ) -> Result<(), RunError> {
        if self.config.runs(Module::EchoServer) {
            let module = Module::EchoServer;
            let recorder: Arc<dyn TrafficRecorder> = self.recorder.clone();
            let responder = EchoResponder::new(
                self.config.responder_config(),
                Arc::clone(&self.table),
                recorder,
                self.readiness.clone(),
            )
            .map_err(|source| RunError::Module { module, source })?;
            let bound = responder
                .bind()
                .await
                .map_err(|source| RunError::Module { module, source })?;

            let token = cancel.clone();
            modules.spawn(async move { (module, bound.serve(token).await) });
            info!(%module, "Module started");
        }

        if self.config.runs(Module::EchoClient) {
            let module = Module::EchoClient;
            let generator = EchoGenerator::new(self.config.generator_config(&self.table))
                .map_err(|source| RunError::Module { module, source })?;

            let token = cancel.clone();
            modules.spawn(async move { (module, generator.run(token).await.map(|_| ())) });
            info!(%module, "Module started");
        }

        Ok(())
    }

    /// Wait for the first failure, the shutdown signal, or every module to
    /// finish on its own.
    async fn supervise<S>(
        &self,
        modules: &mut JoinSet<ModuleResult>,
        shutdown: S,
    ) -> Option<RunError>
    where
        S: Future<Output = &'static str>,
    {
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                signal = &mut shutdown => {
                    info!(signal, "Shutdown signal received");
                    return self.config.fail_on_signal.then_some(RunError::Signal(signal));
                }
                joined = modules.join_next() => match joined {
                    None => return None,
                    Some(Ok((module, Ok(())))) => {
                        info!(%module, "Module finished");
                    }
                    Some(Ok((module, Err(source)))) => {
                        error!(%module, error = %source, "Module failed, stopping");
                        return Some(RunError::Module { module, source });
                    }
                    Some(Err(e)) => {
                        error!(error = %e, "Module task failed, stopping");
                        return Some(RunError::Task(e.to_string()));
                    }
                },
            }
        }
    }

    /// Wait for cancelled modules to stop, aborting stragglers.
    async fn drain(&self, modules: &mut JoinSet<ModuleResult>, first_error: &mut Option<RunError>) {
        let grace = self.config.shutdown_grace + TEARDOWN_MARGIN;
        let drained = tokio::time::timeout(grace, async {
            while let Some(joined) = modules.join_next().await {
                match joined {
                    Ok((module, Ok(()))) => debug!(%module, "Module stopped"),
                    Ok((module, Err(source))) => {
                        warn!(%module, error = %source, "Module failed during shutdown");
                        first_error.get_or_insert(RunError::Module { module, source });
                    }
                    Err(e) => debug!(error = %e, "Module task ended during shutdown"),
                }
            }
        })
        .await;

        if drained.is_err() {
            warn!(
                grace_ms = grace.as_millis() as u64,
                remaining = modules.len(),
                "Modules did not stop in time, aborting"
            );
            modules.abort_all();
        }
    }
}
