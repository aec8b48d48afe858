//! Duplex stream exchange.
//!
//! One connection carries one exchange: the send loop writes random chunks,
//! the receive loop checks whatever comes back against them, and the exchange
//! is verified once the responder half-closes with nothing left unmatched.
//! Both loops run as a [`join_pair`], so a failure in either tears down the
//! other.
//!
//! Verification is incremental. Each chunk is queued in the [`EchoLog`]
//! before it is written and dropped as soon as its echo matches, so an
//! unbounded exchange holds only the bytes in flight.
//!
//! With reconnect enabled, the first I/O failure or stalled read on an
//! established connection discards the log and redials once. A second
//! failure, or any failed dial, ends the run.

use super::GeneratorStats;
use crate::deadline::with_deadline;
use crate::{join_pair, preamble, EchoError, GeneratorConfig, StreamConfig};
use parking_lot::Mutex;
use rand::RngCore;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Size of a single read on the receive side.
const READ_CHUNK: usize = 64 * 1024;

/// Connection lifecycle of the stream generator.
enum StreamState {
    Connecting,
    Exchanging(TcpStream),
    Terminated,
}

/// Sent bytes whose echo has not arrived yet.
///
/// The send loop queues each chunk before writing it, so an echo can never
/// arrive ahead of its entry.
#[derive(Debug, Default)]
pub(crate) struct EchoLog {
    inner: Mutex<EchoLogInner>,
}

#[derive(Debug, Default)]
struct EchoLogInner {
    pending: VecDeque<u8>,
    sent: usize,
    verified: usize,
    high_water: usize,
}

impl EchoLog {
    fn record_sent(&self, chunk: &[u8]) {
        let mut inner = self.inner.lock();
        inner.pending.extend(chunk);
        inner.sent += chunk.len();
        inner.high_water = inner.high_water.max(inner.pending.len());
    }

    /// Match `received` against the oldest unverified bytes and drop them.
    fn verify_received(&self, received: &[u8]) -> Result<(), EchoError> {
        let mut inner = self.inner.lock();
        let mismatch = inner
            .pending
            .iter()
            .zip(received)
            .position(|(sent, echoed)| sent != echoed)
            .or_else(|| (received.len() > inner.pending.len()).then_some(inner.pending.len()));

        if let Some(offset) = mismatch {
            return Err(EchoError::Verification {
                sent: inner.sent,
                received: inner.verified + received.len(),
                first_mismatch: Some(inner.verified + offset),
            });
        }

        inner.pending.drain(..received.len());
        inner.verified += received.len();
        Ok(())
    }

    /// Close the log once both directions ended. Returns `(sent, received)`.
    fn finish(&self) -> Result<(usize, usize), EchoError> {
        let inner = self.inner.lock();
        if !inner.pending.is_empty() {
            return Err(EchoError::Verification {
                sent: inner.sent,
                received: inner.verified,
                first_mismatch: Some(inner.verified),
            });
        }
        Ok((inner.sent, inner.verified))
    }

    /// Most bytes ever waiting for their echo.
    fn high_water(&self) -> usize {
        self.inner.lock().high_water
    }
}

pub(super) async fn run(
    config: &GeneratorConfig,
    stats: &GeneratorStats,
    cancel: CancellationToken,
) -> Result<(), EchoError> {
    let mut reconnect_available = config.allow_reconnect;
    let mut completed: u32 = 0;
    let mut state = StreamState::Connecting;

    loop {
        state = match state {
            StreamState::Connecting => StreamState::Exchanging(dial(config).await?),

            StreamState::Exchanging(socket) => {
                let started = Instant::now();
                match exchange(config, socket, cancel.clone()).await {
                    Ok(log) => {
                        let (sent, received) = match log.finish() {
                            Ok(totals) => totals,
                            Err(e) => {
                                stats.record_exchange(false, 0, 0, started.elapsed());
                                return Err(e);
                            }
                        };
                        stats.record_exchange(true, sent as u64, received as u64, started.elapsed());
                        completed += 1;
                        info!(
                            exchange = completed,
                            bytes = sent,
                            high_water = log.high_water(),
                            elapsed_ms = started.elapsed().as_millis() as u64,
                            "Stream exchange verified"
                        );

                        let limit_reached = config
                            .stream
                            .exchanges
                            .is_some_and(|limit| completed >= limit);
                        // Unbounded exchanges only end on cancellation.
                        let bounded = config.stream.chunks_per_exchange.is_some();
                        if cancel.is_cancelled() || limit_reached || !bounded {
                            StreamState::Terminated
                        } else {
                            StreamState::Connecting
                        }
                    }
                    Err(e) if e.is_retryable() && reconnect_available => {
                        warn!(error = %e, "Stream exchange failed, discarding log and reconnecting");
                        reconnect_available = false;
                        stats.record_reconnect();
                        stats.record_exchange(false, 0, 0, started.elapsed());
                        StreamState::Connecting
                    }
                    Err(e) => {
                        stats.record_exchange(false, 0, 0, started.elapsed());
                        return Err(e);
                    }
                }
            }

            StreamState::Terminated => return Ok(()),
        };
    }
}

async fn dial(config: &GeneratorConfig) -> Result<TcpStream, EchoError> {
    let addr = config.server_addr.as_str();
    let timeout = config.operation_timeout;
    let socket = match tokio::time::timeout(timeout, TcpStream::connect(addr)).await {
        Ok(Ok(socket)) => socket,
        Ok(Err(e)) => {
            return Err(EchoError::Dial {
                addr: addr.to_string(),
                reason: e.to_string(),
            })
        }
        Err(_) => {
            return Err(EchoError::Dial {
                addr: addr.to_string(),
                reason: format!("timed out after {timeout:?}"),
            })
        }
    };
    socket.set_nodelay(true)?;
    debug!(server = addr, "Stream connection established");
    Ok(socket)
}

async fn exchange(
    config: &GeneratorConfig,
    socket: TcpStream,
    cancel: CancellationToken,
) -> Result<Arc<EchoLog>, EchoError> {
    let (reader, mut writer) = socket.into_split();
    with_deadline(
        "write preamble",
        config.operation_timeout,
        preamble::write_identity(&mut writer, &config.identity),
    )
    .await?;

    let log = Arc::new(EchoLog::default());
    join_pair(
        send_loop(
            writer,
            config.stream.clone(),
            config.operation_timeout,
            cancel,
            Arc::clone(&log),
        ),
        receive_loop(reader, config.stream.read_timeout, Arc::clone(&log)),
    )
    .await?;

    Ok(log)
}

/// Write random chunks until cancelled or the chunk budget is spent, then a
/// few drain chunks, then half-close.
async fn send_loop(
    mut writer: OwnedWriteHalf,
    stream: StreamConfig,
    write_timeout: Duration,
    cancel: CancellationToken,
    log: Arc<EchoLog>,
) -> Result<(), EchoError> {
    let mut chunk = vec![0u8; stream.chunk_size];
    let mut ticker = tokio::time::interval(stream.chunk_interval);
    let mut chunks: u32 = 0;

    loop {
        if cancel.is_cancelled() {
            break;
        }
        if stream
            .chunks_per_exchange
            .is_some_and(|limit| chunks >= limit)
        {
            break;
        }
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }
        write_chunk(&mut writer, &mut chunk, &log, write_timeout).await?;
        chunks += 1;
    }

    // Data is still in flight while the exchange winds down.
    if cancel.is_cancelled() {
        for _ in 0..stream.drain_iterations {
            ticker.tick().await;
            write_chunk(&mut writer, &mut chunk, &log, write_timeout).await?;
        }
    }

    with_deadline("shutdown", write_timeout, writer.shutdown()).await?;
    debug!(chunks, "Send side half-closed");
    Ok(())
}

async fn write_chunk(
    writer: &mut OwnedWriteHalf,
    chunk: &mut [u8],
    log: &EchoLog,
    timeout: Duration,
) -> Result<(), EchoError> {
    rand::thread_rng().fill_bytes(chunk);
    log.record_sent(chunk);
    with_deadline("write", timeout, writer.write_all(chunk)).await?;
    Ok(())
}

/// Read and verify the echo until the responder half-closes.
async fn receive_loop(
    mut reader: OwnedReadHalf,
    read_timeout: Duration,
    log: Arc<EchoLog>,
) -> Result<(), EchoError> {
    let mut buf = vec![0u8; READ_CHUNK];
    let mut received = 0usize;
    loop {
        let n = with_deadline("read", read_timeout, reader.read(&mut buf)).await?;
        if n == 0 {
            debug!(bytes = received, "Receive side reached end of stream");
            return Ok(());
        }
        log.verify_received(&buf[..n])?;
        received += n;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TransportMode;

    #[tokio::test]
    async fn test_dial_failure_is_fatal_even_with_reconnect() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let config = GeneratorConfig::new(addr.to_string())
            .with_mode(TransportMode::Stream)
            .with_reconnect(true);
        let stats = GeneratorStats::new();
        let result = run(&config, &stats, CancellationToken::new()).await;

        assert!(matches!(result, Err(EchoError::Dial { .. })));
        assert_eq!(stats.reconnects(), 0);
    }

    #[test]
    fn test_echo_log_drops_verified_bytes() {
        let log = EchoLog::default();
        log.record_sent(b"hello");
        log.record_sent(b"world");

        log.verify_received(b"hel").unwrap();
        log.verify_received(b"lowo").unwrap();
        assert!(matches!(
            log.finish(),
            Err(EchoError::Verification {
                sent: 10,
                received: 7,
                first_mismatch: Some(7),
            })
        ));

        log.verify_received(b"rld").unwrap();
        assert_eq!(log.finish().unwrap(), (10, 10));
        assert_eq!(log.high_water(), 10);
    }

    #[test]
    fn test_echo_log_reports_mismatch_offset() {
        let log = EchoLog::default();
        log.record_sent(b"abcdef");
        log.verify_received(b"abc").unwrap();

        assert!(matches!(
            log.verify_received(b"dXf"),
            Err(EchoError::Verification {
                first_mismatch: Some(4),
                ..
            })
        ));
    }

    #[test]
    fn test_echo_log_rejects_unsent_bytes() {
        let log = EchoLog::default();
        log.record_sent(b"ab");
        assert!(matches!(
            log.verify_received(b"abc"),
            Err(EchoError::Verification {
                sent: 2,
                received: 3,
                first_mismatch: Some(2),
            })
        ));
    }

    /// Accept one connection and count the bytes it sends.
    async fn byte_sink() -> (std::net::SocketAddr, tokio::task::JoinHandle<usize>) {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let sink = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut all = Vec::new();
            socket.read_to_end(&mut all).await.unwrap();
            all.len()
        });
        (addr, sink)
    }

    #[tokio::test]
    async fn test_send_loop_respects_chunk_budget() {
        let (addr, sink) = byte_sink().await;
        let socket = TcpStream::connect(addr).await.unwrap();
        let (_reader, writer) = socket.into_split();
        let stream = StreamConfig::default()
            .with_chunk_size(100)
            .with_chunk_interval(Duration::from_millis(1))
            .with_chunks_per_exchange(5);

        let log = Arc::new(EchoLog::default());
        send_loop(
            writer,
            stream,
            Duration::from_secs(5),
            CancellationToken::new(),
            Arc::clone(&log),
        )
        .await
        .unwrap();
        assert_eq!(sink.await.unwrap(), 500);
        assert_eq!(log.high_water(), 500);
    }

    #[tokio::test]
    async fn test_send_loop_drains_after_cancel() {
        let (addr, sink) = byte_sink().await;
        let socket = TcpStream::connect(addr).await.unwrap();
        let (_reader, writer) = socket.into_split();
        let stream = StreamConfig::default()
            .with_chunk_size(10)
            .with_drain_iterations(3);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let log = Arc::new(EchoLog::default());
        send_loop(writer, stream, Duration::from_secs(5), cancel, Arc::clone(&log))
            .await
            .unwrap();
        assert_eq!(sink.await.unwrap(), 30);
        assert_eq!(log.high_water(), 30);
    }

    #[tokio::test]
    async fn test_long_exchange_keeps_log_bounded() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let echo = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let (reader, mut writer) = socket.into_split();
            let mut reader = tokio::io::BufReader::new(reader);
            preamble::read_identity(&mut reader).await.unwrap();
            tokio::io::copy(&mut reader, &mut writer).await.unwrap();
            writer.shutdown().await.unwrap();
        });

        let chunk_size = 4096;
        let chunks = 1000;
        let config = GeneratorConfig::new(addr.to_string())
            .with_mode(TransportMode::Stream)
            .with_stream(
                StreamConfig::default()
                    .with_chunk_size(chunk_size)
                    .with_chunk_interval(Duration::from_millis(1))
                    .with_chunks_per_exchange(chunks),
            );
        let socket = dial(&config).await.unwrap();

        let log = exchange(&config, socket, CancellationToken::new())
            .await
            .unwrap();
        let total = chunk_size * chunks as usize;
        assert_eq!(log.finish().unwrap(), (total, total));
        // The echo keeps pace, so only a small window is ever outstanding.
        assert!(log.high_water() < total / 4, "high water {}", log.high_water());
        echo.await.unwrap();
    }
}
