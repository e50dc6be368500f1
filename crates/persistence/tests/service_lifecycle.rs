//! Lifecycle and round-trip coverage for the persistence service, run
//! against the in-process bus backend.

use std::collections::HashMap;
use std::path::Path;
use std::time::{Duration, Instant};

use offerpipe_bus::{build_transport, queues, MemoryBroker};
use offerpipe_core::Config;
use offerpipe_importer::{BusStrategy, OfferStrategy};
use offerpipe_persistence::{start, ConsumerState};

/// Config over the memory backend. Each test uses its own host name so its
/// broker is isolated from the others in this binary.
fn test_config(host: &str, dir: &Path) -> Config {
    let src: HashMap<String, String> = [
        ("RABBITMQ_HOST", host),
        ("RABBITMQ_PORT", "5672"),
        ("RABBITMQ_USERNAME", "guest"),
        ("RABBITMQ_PASSWORD", "guest"),
        ("BUS_BACKEND", "memory"),
        ("OFFER_PERSISTENCE_PATH", dir.to_str().unwrap()),
    ]
    .iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect();
    Config::from_source(&src).unwrap()
}

fn artifacts(dir: &Path) -> Vec<(String, String)> {
    let mut out = Vec::new();
    for entry in std::fs::read_dir(dir).unwrap() {
        let entry = entry.unwrap();
        let name = entry.file_name().to_string_lossy().into_owned();
        let content = std::fs::read_to_string(entry.path()).unwrap();
        out.push((name, content));
    }
    out
}

async fn wait_until(what: &str, mut cond: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !cond() {
        if Instant::now() > deadline {
            panic!("timed out waiting for {what}");
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
}

#[tokio::test]
async fn payload_round_trips_to_exactly_one_artifact() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config("lifecycle-roundtrip", dir.path());

    let handle = start(&config).await.unwrap();
    handle.wait_for(ConsumerState::Running).await;

    let producer = BusStrategy::connect(build_transport(&config.bus))
        .await
        .unwrap();
    producer
        .handle("a parsed offer document".to_string())
        .await
        .unwrap()
        .unwrap();

    wait_until("artifact to appear", || !artifacts(dir.path()).is_empty()).await;

    let files = artifacts(dir.path());
    assert_eq!(files.len(), 1);
    assert!(files[0].0.starts_with("offer_"));
    assert_eq!(files[0].1, "a parsed offer document");

    producer.close().await;
    handle.shutdown().await;
    assert_eq!(handle.state(), ConsumerState::Stopped);
}

#[tokio::test]
async fn fifty_concurrent_payloads_yield_fifty_distinct_artifacts() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config("lifecycle-concurrent", dir.path());

    let handle = start(&config).await.unwrap();
    handle.wait_for(ConsumerState::Running).await;

    let producer = BusStrategy::connect(build_transport(&config.bus))
        .await
        .unwrap();
    let sends: Vec<_> = (0..50)
        .map(|i| producer.handle(format!("payload-{i}")))
        .collect();
    for send in sends {
        send.await.unwrap().unwrap();
    }

    wait_until("all 50 artifacts", || artifacts(dir.path()).len() == 50).await;

    let mut contents: Vec<String> = artifacts(dir.path()).into_iter().map(|(_, c)| c).collect();
    contents.sort();
    contents.dedup();
    assert_eq!(contents.len(), 50, "payloads were overwritten or lost");

    producer.close().await;
    handle.shutdown().await;
}

#[tokio::test]
async fn shutdown_loses_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config("lifecycle-drain", dir.path());
    let broker = MemoryBroker::shared(&config.bus.endpoint());

    let handle = start(&config).await.unwrap();
    handle.wait_for(ConsumerState::Running).await;

    let producer = BusStrategy::connect(build_transport(&config.bus))
        .await
        .unwrap();
    for i in 0..10 {
        producer
            .handle(format!("buffered-{i}"))
            .await
            .unwrap()
            .unwrap();
    }
    producer.close().await;

    // Whatever intake had pulled by now gets drained and written; the rest
    // stays with the broker. Nothing may fall between the two.
    handle.shutdown().await;
    let persisted = artifacts(dir.path()).len();
    let retained = broker.queue_depth(queues::OFFER_INPUT);
    assert_eq!(persisted + retained, 10);
    assert_eq!(broker.unacked_count(queues::OFFER_INPUT), 0);
}

#[tokio::test]
async fn failed_write_leaves_delivery_with_the_broker() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config("lifecycle-write-failure", dir.path());
    let broker = MemoryBroker::shared(&config.bus.endpoint());

    let handle = start(&config).await.unwrap();
    handle.wait_for(ConsumerState::Running).await;

    // Every write fails from here on.
    std::fs::remove_dir_all(dir.path()).unwrap();

    let producer = BusStrategy::connect(build_transport(&config.bus))
        .await
        .unwrap();
    producer
        .handle("survives a write failure".to_string())
        .await
        .unwrap()
        .unwrap();

    // Let the worker go through a few failed attempts. The delivery must
    // never be acknowledged, so the broker keeps it: at any instant it is
    // either pending or checked out unacked, never gone.
    tokio::time::sleep(Duration::from_millis(600)).await;
    assert_eq!(
        broker.queue_depth(queues::OFFER_INPUT) + broker.unacked_count(queues::OFFER_INPUT),
        1,
        "unwritten delivery was lost"
    );

    // Once the directory comes back, redelivery persists the payload.
    std::fs::create_dir(dir.path()).unwrap();
    wait_until("artifact after the directory returns", || {
        artifacts(dir.path()).len() == 1
    })
    .await;
    assert_eq!(artifacts(dir.path())[0].1, "survives a write failure");
    wait_until("delivery acknowledged", || {
        broker.queue_depth(queues::OFFER_INPUT) + broker.unacked_count(queues::OFFER_INPUT) == 0
    })
    .await;

    producer.close().await;
    handle.shutdown().await;
}

#[tokio::test]
async fn shutdown_handle_is_idempotent_across_clones() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config("lifecycle-idempotent", dir.path());

    let handle = start(&config).await.unwrap();
    handle.wait_for(ConsumerState::Running).await;

    let clone = handle.clone();
    handle.shutdown().await;
    handle.shutdown().await;
    clone.shutdown().await;

    assert_eq!(handle.state(), ConsumerState::Stopped);
    assert_eq!(clone.state(), ConsumerState::Stopped);
}

#[tokio::test]
async fn start_fails_fast_against_unreachable_broker() {
    let dir = tempfile::tempdir().unwrap();
    let src: HashMap<String, String> = [
        ("RABBITMQ_HOST", "127.0.0.1"),
        ("RABBITMQ_PORT", "59999"),
        ("RABBITMQ_USERNAME", "guest"),
        ("RABBITMQ_PASSWORD", "guest"),
        ("OFFER_PERSISTENCE_PATH", dir.path().to_str().unwrap()),
    ]
    .iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect();
    let config = Config::from_source(&src).unwrap();

    let result = tokio::time::timeout(Duration::from_secs(30), start(&config)).await;
    let err = result.expect("construction should resolve").unwrap_err();
    assert!(err.to_string().contains("127.0.0.1"), "error was: {err}");
}
