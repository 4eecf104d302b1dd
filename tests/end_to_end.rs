//! Broker behavior seen from in-process consumers

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_test::assert_ok;

use stomp_broker::gateway::{ConsumerClient, GatewayError};
use stomp_broker::transport::{MemoryFeed, MemoryTransportFactory};
use stomp_broker::{Broker, Envelope, GatewayConfig, MessageType, ProviderConfig, RegistryConfig};

const WAIT: Duration = Duration::from_secs(2);

fn broker(factory: &MemoryTransportFactory) -> Broker {
    Broker::with_config(
        Arc::new(factory.clone()),
        RegistryConfig::default()
            .stats_interval(Duration::from_secs(3600))
            .refresh_settle_delay(Duration::from_millis(20)),
        GatewayConfig::default(),
    )
}

fn provider(id: &str) -> ProviderConfig {
    ProviderConfig::new(id, "ws://feeds.local/ws", "positions")
        .end_token("Success")
        .key_field("id")
}

async fn expect(client: &mut ConsumerClient, kind: MessageType) -> Value {
    let event = timeout(WAIT, client.next_event_of(kind))
        .await
        .unwrap_or_else(|_| panic!("no {:?} event", kind))
        .expect("event stream closed");
    event.payload.expect("event without payload")
}

/// Connect and run a two-record snapshot to completion
async fn run_snapshot(client: &mut ConsumerClient, feed: &MemoryFeed) {
    assert_ok!(client.connect(&provider("p1")).await);
    expect(client, MessageType::Connected).await;

    assert!(feed.frame(r#"{"id":"1","v":10}"#));
    assert!(feed.frame(r#"{"id":"2","v":20}"#));
    assert!(feed.frame("Success: All 2 records delivered"));
}

#[tokio::test]
async fn snapshot_then_complete() {
    let factory = MemoryTransportFactory::new();
    let broker = broker(&factory);
    let mut client = broker.client();
    let feed = factory.feed("p1");

    run_snapshot(&mut client, &feed).await;

    let first = expect(&mut client, MessageType::Data).await;
    assert_eq!(first["phase"], "snapshot");
    assert_eq!(first["records"][0], json!({"id": "1", "v": 10}));
    let second = expect(&mut client, MessageType::Data).await;
    assert_eq!(second["phase"], "snapshot");

    let complete = expect(&mut client, MessageType::SnapshotComplete).await;
    assert_eq!(complete["rowCount"], 2);
    assert_eq!(complete["timedOut"], false);

    let snapshot = client.snapshot().await.unwrap();
    assert_eq!(snapshot["count"], 2);

    assert_eq!(
        feed.published(),
        vec![("/snapshot/positions/p1/1000".to_string(), String::new())]
    );
    assert_eq!(feed.subscriptions(), vec!["/snapshot/positions/p1".to_string()]);
}

#[tokio::test]
async fn realtime_update_replaces_record() {
    let factory = MemoryTransportFactory::new();
    let broker = broker(&factory);
    let mut client = broker.client();
    let feed = factory.feed("p1");

    run_snapshot(&mut client, &feed).await;
    expect(&mut client, MessageType::SnapshotComplete).await;

    assert!(feed.frame(r#"{"id":"1","v":99}"#));
    let update = expect(&mut client, MessageType::Data).await;
    assert_eq!(update["phase"], "realtime");
    assert_eq!(update["count"], 1);

    let snapshot = client.snapshot().await.unwrap();
    let mut records = snapshot["records"].as_array().cloned().unwrap();
    records.sort_by_key(|r| r["id"].as_str().map(str::to_string));
    assert_eq!(
        records,
        vec![json!({"id": "1", "v": 99}), json!({"id": "2", "v": 20})]
    );

    let stats = client.statistics().await.unwrap();
    assert_eq!(stats["phase"], "realtime");
    assert_eq!(stats["statistics"]["snapshotRows"], 2);
    assert_eq!(stats["statistics"]["realtimeRows"], 1);
}

#[tokio::test]
async fn realtime_record_mentioning_success_is_data() {
    let factory = MemoryTransportFactory::new();
    let broker = broker(&factory);
    let mut client = broker.client();
    let feed = factory.feed("p1");

    run_snapshot(&mut client, &feed).await;
    expect(&mut client, MessageType::SnapshotComplete).await;

    assert!(feed.frame(r#"{"id":"1","v":11,"status":"SUCCESS"}"#));
    let update = expect(&mut client, MessageType::Data).await;
    assert_eq!(update["phase"], "realtime");
    assert_eq!(update["records"][0]["v"], 11);

    let stats = client.statistics().await.unwrap();
    assert_eq!(stats["phase"], "realtime");
    assert_eq!(stats["statistics"]["realtimeRows"], 1);
}

#[tokio::test]
async fn statistics_for_unknown_provider_is_an_error_response() {
    let factory = MemoryTransportFactory::new();
    let broker = broker(&factory);
    let mut channel = broker.open_channel();

    channel
        .requests
        .send(Envelope::request(
            "x1",
            MessageType::GetStatistics,
            Some(json!({"providerId": "nobody"})),
        ))
        .await
        .unwrap();

    let response = timeout(WAIT, channel.inbound.recv())
        .await
        .expect("no response")
        .expect("channel closed");
    assert_eq!(response.id.as_deref(), Some("x1"));
    assert_eq!(response.kind, MessageType::GetStatistics);
    assert!(response.error.unwrap().contains("nobody"));
    assert_eq!(broker.registry().session_count().await, 0);
}

#[tokio::test]
async fn unanswered_request_times_out_once() {
    let (requests, mut peer) = mpsc::channel(8);
    let (responses, inbound) = mpsc::channel(8);
    let mut client = ConsumerClient::from_parts(requests, inbound, Duration::from_millis(50));

    let result = client
        .request_with_id("r-1", MessageType::GetSnapshot, None)
        .await;
    assert_eq!(result, Err(GatewayError::Timeout("r-1".into())));
    assert_eq!(client.pending(), 0);

    // The peer answers too late
    let request = peer.recv().await.unwrap();
    responses
        .send(Envelope::success(request.id, request.kind, json!({"records": []})))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert!(client.try_next_event().is_none());
    assert_eq!(client.pending(), 0);
}

#[tokio::test]
async fn consumers_share_one_connection() {
    let factory = MemoryTransportFactory::new();
    let broker = broker(&factory);
    let feed = factory.feed("p1");

    let mut first = broker.client();
    let mut second = broker.client();
    assert_ok!(first.connect(&provider("p1")).await);
    assert_ok!(second.connect(&provider("p1").message_rate(5)).await);
    expect(&mut first, MessageType::Connected).await;
    expect(&mut second, MessageType::Connected).await;

    assert_eq!(feed.transports_created(), 1);
    assert_eq!(broker.registry().consumer_count("p1").await, Some(2));

    // Both consumers see the same frame
    assert!(feed.frame(r#"{"id":"7"}"#));
    expect(&mut first, MessageType::Data).await;
    expect(&mut second, MessageType::Data).await;

    // The first config stays in force
    let session = broker.registry().session("p1").await.unwrap();
    assert_eq!(session.config().message_rate, 1000);

    let released = first.disconnect().await.unwrap();
    assert_eq!(released["sessionClosed"], false);
    assert!(feed.is_active());

    let released = second.disconnect().await.unwrap();
    assert_eq!(released["sessionClosed"], true);
    assert!(!broker.registry().contains("p1").await);

    timeout(WAIT, async {
        while feed.is_active() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("transport still active");
}

#[tokio::test]
async fn late_joiner_reads_cache() {
    let factory = MemoryTransportFactory::new();
    let broker = broker(&factory);
    let mut first = broker.client();
    let feed = factory.feed("p1");

    run_snapshot(&mut first, &feed).await;
    expect(&mut first, MessageType::SnapshotComplete).await;

    let mut late = broker.client();
    assert_ok!(late.connect(&provider("p1")).await);

    let complete = expect(&mut late, MessageType::SnapshotComplete).await;
    assert_eq!(complete["rowCount"], 2);
    assert_eq!(late.snapshot().await.unwrap()["count"], 2);

    // No second trigger for the late joiner
    assert_eq!(feed.published().len(), 1);
}

#[tokio::test]
async fn refresh_runs_a_new_snapshot_cycle() {
    let factory = MemoryTransportFactory::new();
    let broker = broker(&factory);
    let mut client = broker.client();
    let feed = factory.feed("p1");

    run_snapshot(&mut client, &feed).await;
    expect(&mut client, MessageType::SnapshotComplete).await;

    let refreshed = client.refresh().await.unwrap();
    assert_eq!(refreshed["phase"], "disconnected");

    let disconnected = expect(&mut client, MessageType::Disconnected).await;
    assert_eq!(disconnected["reason"], "refresh");

    let connected = expect(&mut client, MessageType::Connected).await;
    assert_eq!(connected["phase"], "snapshot");
    assert_eq!(feed.activations(), 2);
    assert_eq!(feed.published().len(), 2);
    assert_eq!(client.snapshot().await.unwrap()["count"], 0);
}

#[tokio::test]
async fn snapshot_timeout_forces_realtime() {
    let factory = MemoryTransportFactory::new();
    let broker = broker(&factory);
    let mut client = broker.client();

    let config = provider("p1").snapshot_timeout(Duration::from_millis(50));
    assert_ok!(client.connect(&config).await);
    expect(&mut client, MessageType::Connected).await;
    assert!(factory.feed("p1").frame(r#"{"id":"1"}"#));

    let complete = expect(&mut client, MessageType::SnapshotComplete).await;
    assert_eq!(complete["timedOut"], true);
    assert_eq!(complete["rowCount"], 1);

    let stats = client.statistics().await.unwrap();
    assert_eq!(stats["phase"], "realtime");
}

#[tokio::test]
async fn transport_error_keeps_cache() {
    let factory = MemoryTransportFactory::new();
    let broker = broker(&factory);
    let mut client = broker.client();
    let feed = factory.feed("p1");

    run_snapshot(&mut client, &feed).await;
    expect(&mut client, MessageType::SnapshotComplete).await;

    assert!(feed.error("broker went away"));
    let error = expect(&mut client, MessageType::Error).await;
    assert_eq!(error["message"], "broker went away");
    expect(&mut client, MessageType::Disconnected).await;

    let stats = client.statistics().await.unwrap();
    assert_eq!(stats["phase"], "disconnected");
    assert_eq!(client.snapshot().await.unwrap()["count"], 2);
}

#[tokio::test]
async fn phases_follow_connection_lifecycle() {
    let factory = MemoryTransportFactory::manual_connect();
    let broker = broker(&factory);
    let mut client = broker.client();
    let feed = factory.feed("p1");

    assert_ok!(client.connect(&provider("p1")).await);
    assert_eq!(client.statistics().await.unwrap()["phase"], "connecting");

    assert!(feed.connect());
    let connected = expect(&mut client, MessageType::Connected).await;
    assert_eq!(connected["phase"], "snapshot");

    assert!(feed.frame("SUCCESS"));
    expect(&mut client, MessageType::SnapshotComplete).await;
    assert_eq!(client.statistics().await.unwrap()["phase"], "realtime");

    broker.shutdown().await;
    let disconnected = expect(&mut client, MessageType::Disconnected).await;
    assert_eq!(disconnected["reason"], "broker shutting down");
}
