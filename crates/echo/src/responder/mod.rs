//! Echo responder.
//!
//! Serves either the HTTP `POST /echo` endpoint or raw duplex TCP connections.
//! In HTTP mode every request draws an outcome from the zone table for the
//! responder's own zone; the payload is echoed back whatever the outcome, and
//! failures are delayed to mimic a struggling backend. Stream connections are
//! echoed byte for byte with no outcome sampling.
//!
//! Both legs of every finished exchange are handed to the [`TrafficRecorder`].

mod http;
mod stream;

pub use self::http::{BANNER_PREFIX, ECHO_PATH};

use crate::{EchoError, Readiness, ResponderConfig, TransportMode};
use std::net::SocketAddr;
use std::sync::Arc;
use taler_metrics::TrafficRecorder;
use taler_types::{ConfigError, UnknownZonePolicy, ZoneOutcomeTable};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// State shared by every connection of one responder.
pub(crate) struct ResponderState {
    pub(crate) config: ResponderConfig,
    pub(crate) table: Arc<ZoneOutcomeTable>,
    pub(crate) recorder: Arc<dyn TrafficRecorder>,
}

/// An echo responder that has not started listening yet.
pub struct EchoResponder {
    state: ResponderState,
    readiness: Readiness,
}

impl EchoResponder {
    /// Create a responder.
    ///
    /// Under [`UnknownZonePolicy::Reject`] an HTTP responder whose own zone is
    /// missing from the table is refused here, before any traffic.
    pub fn new(
        config: ResponderConfig,
        table: Arc<ZoneOutcomeTable>,
        recorder: Arc<dyn TrafficRecorder>,
        readiness: Readiness,
    ) -> Result<Self, EchoError> {
        if config.mode == TransportMode::Http
            && table.policy() == UnknownZonePolicy::Reject
            && !table.contains(&config.identity.zone)
        {
            return Err(ConfigError::MissingZone(config.identity.zone.clone()).into());
        }

        Ok(Self {
            state: ResponderState {
                config,
                table,
                recorder,
            },
            readiness,
        })
    }

    /// Bind the listening socket.
    pub async fn bind(self) -> Result<BoundResponder, EchoError> {
        let listener = TcpListener::bind(self.state.config.listen_addr).await?;
        info!(
            addr = %listener.local_addr()?,
            mode = %self.state.config.mode,
            identity = %self.state.config.identity,
            "Echo responder listening"
        );
        Ok(BoundResponder {
            responder: self,
            listener,
        })
    }

    /// Bind and serve until `cancel` fires.
    pub async fn run(self, cancel: CancellationToken) -> Result<(), EchoError> {
        self.bind().await?.serve(cancel).await
    }
}

/// A responder holding its listening socket.
pub struct BoundResponder {
    responder: EchoResponder,
    listener: TcpListener,
}

impl BoundResponder {
    /// Address actually bound (useful with port 0).
    pub fn local_addr(&self) -> Result<SocketAddr, EchoError> {
        Ok(self.listener.local_addr()?)
    }

    /// Serve until `cancel` fires, then give in-flight exchanges the
    /// configured grace period.
    ///
    /// Readiness is flipped just before the first accept.
    pub async fn serve(self, cancel: CancellationToken) -> Result<(), EchoError> {
        let BoundResponder {
            responder: EchoResponder { state, readiness },
            listener,
        } = self;
        let mode = state.config.mode;
        let state = Arc::new(state);

        let result = match mode {
            TransportMode::Http => http::serve(listener, state, readiness, cancel).await,
            TransportMode::Stream => stream::serve(listener, state, readiness, cancel).await,
        };
        info!("Echo responder stopped");
        result
    }
}
