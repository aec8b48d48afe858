//! End-to-end HTTP exchanges between a generator and a responder on loopback.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use taler_echo::{
    EchoError, EchoGenerator, EchoResponder, GeneratorConfig, GeneratorReport, PayloadBounds,
    Readiness, ResponderConfig,
};
use taler_metrics::{PrometheusTrafficRecorder, Protocol};
use taler_types::{OutcomeCode, PeerIdentity, Zone, ZoneOutcomeTable};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

struct Harness {
    addr: SocketAddr,
    recorder: Arc<PrometheusTrafficRecorder>,
    readiness: Readiness,
    cancel: CancellationToken,
    server: JoinHandle<Result<(), EchoError>>,
}

async fn start_responder(table: ZoneOutcomeTable, identity: PeerIdentity) -> Harness {
    let recorder = Arc::new(PrometheusTrafficRecorder::new().unwrap());
    let readiness = Readiness::new();
    let config = ResponderConfig::new("127.0.0.1:0".parse().unwrap()).with_identity(identity);

    let responder = EchoResponder::new(
        config,
        Arc::new(table),
        recorder.clone(),
        readiness.clone(),
    )
    .unwrap();
    let bound = responder.bind().await.unwrap();
    let addr = bound.local_addr().unwrap();
    let cancel = CancellationToken::new();
    let server = tokio::spawn(bound.serve(cancel.clone()));

    for _ in 0..100 {
        if readiness.is_ready() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(readiness.is_ready());

    Harness {
        addr,
        recorder,
        readiness,
        cancel,
        server,
    }
}

/// Run the generator until it has finished `exchanges` exchanges, then stop it.
async fn run_exchanges(generator: EchoGenerator, exchanges: u64) -> GeneratorReport {
    let generator = Arc::new(generator);
    let cancel = CancellationToken::new();
    let task = {
        let generator = Arc::clone(&generator);
        let cancel = cancel.clone();
        tokio::spawn(async move { generator.run(cancel).await })
    };

    for _ in 0..500 {
        if generator.stats().exchanges() >= exchanges || task.is_finished() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    cancel.cancel();
    task.await.unwrap().unwrap()
}

#[tokio::test]
async fn test_cross_zone_success_records_both_legs() {
    let table = ZoneOutcomeTable::from_zones([(
        "us-east-1a",
        Zone::default().with_weight(OutcomeCode::Ok, 100),
    )]);
    let server = PeerIdentity::new("us-east-1a", "echo-server-0");
    let client = PeerIdentity::new("us-east-1b", "echo-client-0");
    let harness = start_responder(table, server.clone()).await;

    let config = GeneratorConfig::new(harness.addr.to_string())
        .with_identity(client.clone())
        .with_payload(PayloadBounds::new(2_000_000, 2_000_000));
    let report = run_exchanges(EchoGenerator::new(config).unwrap(), 1).await;

    assert!(report.exchanges >= 1);
    assert_eq!(report.failed, 0);
    assert_eq!(report.succeeded, report.exchanges);

    let expected = report.exchanges * 2_000_000 * 1000;
    assert!(
        harness
            .recorder
            .bytes(true, Protocol::Http, &client, &server)
            >= expected
    );
    assert!(
        harness
            .recorder
            .bytes(true, Protocol::Http, &server, &client)
            >= expected
    );

    harness.cancel.cancel();
    harness.server.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_simulated_failure_is_delayed_and_zeroes_egress() {
    let table =
        ZoneOutcomeTable::from_zones([("z1", Zone::default().with_weight(OutcomeCode::InternalServerError, 100))]);
    let server = PeerIdentity::new("z1", "echo-server-0");
    let client = PeerIdentity::new("z2", "echo-client-0");
    let harness = start_responder(table, server.clone()).await;

    let config = GeneratorConfig::new(harness.addr.to_string())
        .with_identity(client.clone())
        .with_payload(PayloadBounds::new(1000, 1000));
    let started = Instant::now();
    let report = run_exchanges(EchoGenerator::new(config).unwrap(), 1).await;

    assert!(started.elapsed() >= Duration::from_secs(1));
    assert!(report.exchanges >= 1);
    assert_eq!(report.succeeded, 0);
    assert!(report.p50_latency >= Duration::from_millis(900));

    assert!(
        harness
            .recorder
            .bytes(false, Protocol::Http, &client, &server)
            >= report.exchanges * 1000 * 1000
    );
    assert_eq!(
        harness
            .recorder
            .bytes(false, Protocol::Http, &server, &client),
        0
    );
    assert_eq!(
        harness
            .recorder
            .bytes(true, Protocol::Http, &client, &server),
        0
    );

    harness.cancel.cancel();
    harness.server.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_parallel_workers_share_load() {
    let table = ZoneOutcomeTable::from_zones([(
        "1a",
        Zone::default().with_weight(OutcomeCode::Ok, 100),
    )]);
    // Full name misses, suffix `1a` hits.
    let server = PeerIdentity::new("us-east-1a", "echo-server-0");
    let harness = start_responder(table, server).await;

    let config = GeneratorConfig::new(harness.addr.to_string())
        .with_identity(PeerIdentity::new("us-east-1b", "echo-client-0"))
        .with_payload(PayloadBounds::new(1024, 4096))
        .with_parallelism(4)
        .with_requests_per_second(0);
    let generator = EchoGenerator::new(config).unwrap();
    let report = run_exchanges(generator, 40).await;

    assert!(report.exchanges >= 40);
    assert_eq!(report.failed, 0);
    assert!(report.bytes_received > report.bytes_sent);

    harness.cancel.cancel();
    harness.server.await.unwrap().unwrap();
    assert!(harness.readiness.is_ready());
}

#[tokio::test]
async fn test_responder_stops_on_cancel() {
    let table = ZoneOutcomeTable::from_zones([("z1", Zone::default().with_weight(OutcomeCode::Ok, 100))]);
    let harness = start_responder(table, PeerIdentity::new("z1", "s")).await;

    harness.cancel.cancel();
    tokio::time::timeout(Duration::from_secs(6), harness.server)
        .await
        .unwrap()
        .unwrap()
        .unwrap();

    // Nothing is listening any more.
    let config = GeneratorConfig::new(harness.addr.to_string())
        .with_payload(PayloadBounds::new(8, 8))
        .with_operation_timeout(Duration::from_secs(2));
    let result = EchoGenerator::new(config)
        .unwrap()
        .run(CancellationToken::new())
        .await;
    assert!(matches!(result, Err(EchoError::Dial { .. })));
}
