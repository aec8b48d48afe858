//! Duplex TCP echo.
//!
//! Each connection starts with an identity preamble, then every byte read is
//! written straight back. An inbound task reads and forwards chunks over a
//! bounded channel; an outbound task writes them. When the client half-closes,
//! the inbound task ends, the channel closes, and the outbound task half-closes
//! its own write side once the backlog is flushed.

use super::ResponderState;
use crate::deadline::with_deadline;
use crate::{join_pair, preamble, EchoError, Readiness};
use bytes::{Bytes, BytesMut};
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use taler_metrics::{ExchangeTraffic, Protocol};
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Size of a single read.
const READ_CHUNK: usize = 64 * 1024;

/// Chunks buffered between the inbound and outbound halves.
const CHANNEL_DEPTH: usize = 64;

pub(super) async fn serve(
    listener: TcpListener,
    state: Arc<ResponderState>,
    readiness: Readiness,
    cancel: CancellationToken,
) -> Result<(), EchoError> {
    let mut connections = JoinSet::new();

    readiness.mark_ready();
    info!("Echo responder accepting connections");

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((socket, peer)) => {
                    connections.spawn(handle_connection(Arc::clone(&state), socket, peer));
                }
                Err(e) => warn!(error = %e, "Failed to accept connection"),
            },
            Some(_) = connections.join_next(), if !connections.is_empty() => {}
        }
    }

    // Stop accepting; let open connections finish within the grace period.
    drop(listener);
    let grace = state.config.shutdown_grace;
    let drained = tokio::time::timeout(grace, async {
        while connections.join_next().await.is_some() {}
    })
    .await;
    if drained.is_err() {
        warn!(
            remaining = connections.len(),
            "Connections still open after the grace period, aborting"
        );
        connections.abort_all();
    }
    Ok(())
}

async fn handle_connection(state: Arc<ResponderState>, socket: TcpStream, peer: SocketAddr) {
    let timeout = state.config.operation_timeout;
    let started = Instant::now();
    let (read_half, write_half) = socket.into_split();
    let mut reader = BufReader::new(read_half);

    let client = match with_deadline(
        "read preamble",
        timeout,
        preamble::read_identity(&mut reader),
    )
    .await
    {
        Ok(identity) => identity,
        Err(e) => {
            warn!(peer = %peer, error = %e, "Dropping connection without a valid preamble");
            return;
        }
    };
    debug!(peer = %peer, client = %client, "Stream connection opened");

    let received = Arc::new(AtomicU64::new(0));
    let sent = Arc::new(AtomicU64::new(0));
    let (tx, rx) = mpsc::channel(CHANNEL_DEPTH);

    let result = join_pair(
        inbound(reader, tx, timeout, Arc::clone(&received)),
        outbound(write_half, rx, timeout, Arc::clone(&sent)),
    )
    .await;

    let client_to_server = received.load(Ordering::Relaxed);
    let server_to_client = sent.load(Ordering::Relaxed);
    ExchangeTraffic {
        protocol: Protocol::Tcp,
        client: &client,
        server: &state.config.identity,
        success: result.is_ok(),
        client_to_server,
        server_to_client,
    }
    .record(state.recorder.as_ref(), state.config.traffic_multiplier);

    match result {
        Ok(_) => info!(
            client = %client,
            bytes = client_to_server,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Done echoing stream"
        ),
        Err(e) => warn!(
            client = %client,
            received = client_to_server,
            sent = server_to_client,
            error = %e,
            "Stream connection failed"
        ),
    }
}

async fn inbound(
    mut reader: BufReader<OwnedReadHalf>,
    tx: mpsc::Sender<Bytes>,
    timeout: Duration,
    received: Arc<AtomicU64>,
) -> Result<(), EchoError> {
    loop {
        let mut chunk = BytesMut::with_capacity(READ_CHUNK);
        let n = with_deadline("read", timeout, reader.read_buf(&mut chunk)).await?;
        if n == 0 {
            // Client half-closed; dropping `tx` lets the outbound side finish.
            return Ok(());
        }
        received.fetch_add(n as u64, Ordering::Relaxed);
        if tx.send(chunk.freeze()).await.is_err() {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "echo writer stopped").into());
        }
    }
}

async fn outbound(
    mut writer: OwnedWriteHalf,
    mut rx: mpsc::Receiver<Bytes>,
    timeout: Duration,
    sent: Arc<AtomicU64>,
) -> Result<(), EchoError> {
    while let Some(chunk) = rx.recv().await {
        with_deadline("write", timeout, writer.write_all(&chunk)).await?;
        sent.fetch_add(chunk.len() as u64, Ordering::Relaxed);
    }
    with_deadline("shutdown", timeout, writer.shutdown()).await
}
