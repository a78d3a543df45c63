//! End-to-end scenarios (§8) driven against the in-memory `FakeSqsClient`,
//! exercising the full poller → manager/serializer → handler → finalize
//! pipeline without a real SQS queue.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use sqs_message_pump::config::{ControlToken, PollerConfig};
use sqs_message_pump::envelope::MessageEnvelope;
use sqs_message_pump::error::SqsError;
use sqs_message_pump::poller::Poller;
use sqs_message_pump::pump::MessagePump;
use sqs_message_pump::registry::{Handler, HandlerRegistry, HandlerStatus};
use sqs_message_pump::testing::{FakeMessage, FakeSqsClient};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Deserialize)]
struct Job {
    #[allow(dead_code)]
    n: u32,
}

fn job_body(id: &str, n: u32) -> String {
    serde_json::json!({
        "id": id,
        "source": "/test",
        "specversion": "1.0",
        "type": "job",
        "time": "2024-01-01T00:00:00Z",
        "data": {"n": n},
    })
    .to_string()
}

struct AlwaysSucceeds;

#[async_trait]
impl Handler<Job> for AlwaysSucceeds {
    async fn handle(&self, _envelope: &MessageEnvelope<Job>, _cancel: CancellationToken) -> anyhow::Result<HandlerStatus> {
        Ok(HandlerStatus::Success)
    }
}

struct AlwaysFails;

#[async_trait]
impl Handler<Job> for AlwaysFails {
    async fn handle(&self, _envelope: &MessageEnvelope<Job>, _cancel: CancellationToken) -> anyhow::Result<HandlerStatus> {
        Ok(HandlerStatus::Failed)
    }
}

/// Scenario: single message, handler succeeds -> deleted exactly once (P2).
#[tokio::test]
async fn single_success_deletes_the_message() {
    let sqs = Arc::new(FakeSqsClient::new());
    sqs.enqueue(FakeMessage::new("m1", job_body("m1", 1)));
    let registry = HandlerRegistry::builder().register("job", || AlwaysSucceeds).build();
    let config = Arc::new(PollerConfig::builder("https://example/q").build().unwrap());
    let shutdown = CancellationToken::new();
    let poller = Poller::new(
        config,
        sqs.clone(),
        registry,
        ControlToken::default(),
        sqs_message_pump::backoff::BackoffPolicy::None,
        shutdown.clone(),
    );

    let handle = tokio::spawn(async move { poller.run().await });
    wait_until(|| sqs.deleted_ids().len() == 1, Duration::from_secs(1)).await;
    shutdown.cancel();
    let _ = tokio::time::timeout(Duration::from_secs(1), handle).await;

    assert_eq!(sqs.deleted_ids(), vec!["m1".to_string()]);
}

/// Scenario: single message, handler fails -> never deleted (P3).
#[tokio::test]
async fn single_failure_never_deletes() {
    let sqs = Arc::new(FakeSqsClient::new());
    sqs.enqueue(FakeMessage::new("m1", job_body("m1", 1)));
    let registry = HandlerRegistry::builder().register("job", || AlwaysFails).build();
    let config = Arc::new(PollerConfig::builder("https://example/q").build().unwrap());
    let shutdown = CancellationToken::new();
    let poller = Poller::new(
        config,
        sqs.clone(),
        registry,
        ControlToken::default(),
        sqs_message_pump::backoff::BackoffPolicy::None,
        shutdown.clone(),
    );

    let handle = tokio::spawn(async move { poller.run().await });
    tokio::time::sleep(Duration::from_millis(150)).await;
    shutdown.cancel();
    let _ = tokio::time::timeout(Duration::from_secs(1), handle).await;

    assert!(sqs.deleted_ids().is_empty());
}

/// Scenario: a slow handler crosses the visibility-extension threshold, so a
/// `ChangeVisibilityBatch` call must extend it before it completes (P5).
#[tokio::test]
async fn visibility_is_extended_for_slow_handlers() {
    struct SlowHandler;

    #[async_trait]
    impl Handler<Job> for SlowHandler {
        async fn handle(&self, _envelope: &MessageEnvelope<Job>, _cancel: CancellationToken) -> anyhow::Result<HandlerStatus> {
            tokio::time::sleep(Duration::from_millis(1500)).await;
            Ok(HandlerStatus::Success)
        }
    }

    let sqs = Arc::new(FakeSqsClient::new());
    sqs.enqueue(FakeMessage::new("m1", job_body("m1", 1)));
    let registry = HandlerRegistry::builder().register("job", || SlowHandler).build();
    let config = Arc::new(
        PollerConfig::builder("https://example/q")
            .visibility_timeout_seconds(3)
            .visibility_extension_threshold_seconds(2)
            .visibility_extension_heartbeat_seconds(1)
            .build()
            .expect("valid heartbeat ordering"),
    );
    let shutdown = CancellationToken::new();
    let poller = Poller::new(
        config,
        sqs.clone(),
        registry,
        ControlToken::default(),
        sqs_message_pump::backoff::BackoffPolicy::None,
        shutdown.clone(),
    );

    let handle = tokio::spawn(async move { poller.run().await });
    wait_until(|| sqs.deleted_ids().len() == 1, Duration::from_secs(5)).await;
    shutdown.cancel();
    let _ = tokio::time::timeout(Duration::from_secs(1), handle).await;

    assert!(!sqs.change_visibility_batches().is_empty());
    assert_eq!(sqs.deleted_ids(), vec!["m1".to_string()]);
}

/// Scenario: FIFO group ordering with a mid-group failure (P4).
#[tokio::test]
async fn fifo_group_stops_at_first_failure() {
    let seen = Arc::new(Mutex::new(Vec::new()));

    struct RecordingHandler {
        seen: Arc<Mutex<Vec<u32>>>,
        fail_at: u32,
    }

    #[async_trait]
    impl Handler<Job> for RecordingHandler {
        async fn handle(&self, envelope: &MessageEnvelope<Job>, _cancel: CancellationToken) -> anyhow::Result<HandlerStatus> {
            self.seen.lock().unwrap().push(envelope.data.n);
            if envelope.data.n == self.fail_at {
                Ok(HandlerStatus::Failed)
            } else {
                Ok(HandlerStatus::Success)
            }
        }
    }

    let sqs = Arc::new(FakeSqsClient::new());
    for n in 1..=4u32 {
        sqs.enqueue(FakeMessage::new(format!("m{n}"), job_body(&format!("m{n}"), n)).with_group("g1"));
    }
    let registry = HandlerRegistry::builder()
        .register("job", {
            let seen = Arc::clone(&seen);
            move || RecordingHandler { seen: Arc::clone(&seen), fail_at: 2 }
        })
        .build();
    let config = Arc::new(PollerConfig::builder("https://example/q.fifo").build().unwrap());
    let shutdown = CancellationToken::new();
    let poller = Poller::new(
        config,
        sqs.clone(),
        registry,
        ControlToken::default(),
        sqs_message_pump::backoff::BackoffPolicy::None,
        shutdown.clone(),
    );

    let handle = tokio::spawn(async move { poller.run().await });
    wait_until(|| seen.lock().unwrap().len() >= 2, Duration::from_secs(1)).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    shutdown.cancel();
    let _ = tokio::time::timeout(Duration::from_secs(1), handle).await;

    assert_eq!(*seen.lock().unwrap(), vec![1, 2]);
}

/// Scenario: concurrency cap is respected (no more than `max_concurrent`
/// handlers in flight at once).
#[tokio::test]
async fn concurrency_cap_is_respected() {
    let in_flight = Arc::new(AtomicU32::new(0));
    let max_observed = Arc::new(AtomicU32::new(0));

    struct TrackingHandler {
        in_flight: Arc<AtomicU32>,
        max_observed: Arc<AtomicU32>,
    }

    #[async_trait]
    impl Handler<Job> for TrackingHandler {
        async fn handle(&self, _envelope: &MessageEnvelope<Job>, _cancel: CancellationToken) -> anyhow::Result<HandlerStatus> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_observed.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(50)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok(HandlerStatus::Success)
        }
    }

    let sqs = Arc::new(FakeSqsClient::new());
    for n in 1..=10u32 {
        sqs.enqueue(FakeMessage::new(format!("m{n}"), job_body(&format!("m{n}"), n)));
    }
    let registry = HandlerRegistry::builder()
        .register("job", {
            let in_flight = Arc::clone(&in_flight);
            let max_observed = Arc::clone(&max_observed);
            move || TrackingHandler {
                in_flight: Arc::clone(&in_flight),
                max_observed: Arc::clone(&max_observed),
            }
        })
        .build();
    let config = Arc::new(PollerConfig::builder("https://example/q").max_concurrent(3).build().unwrap());
    let shutdown = CancellationToken::new();
    let poller = Poller::new(
        config,
        sqs.clone(),
        registry,
        ControlToken::default(),
        sqs_message_pump::backoff::BackoffPolicy::None,
        shutdown.clone(),
    );

    let handle = tokio::spawn(async move { poller.run().await });
    wait_until(|| sqs.deleted_ids().len() == 10, Duration::from_secs(3)).await;
    shutdown.cancel();
    let _ = tokio::time::timeout(Duration::from_secs(1), handle).await;

    assert!(max_observed.load(Ordering::SeqCst) <= 3);
}

/// Scenario: a fatal receive error terminates the pump instead of retrying.
#[tokio::test]
async fn fatal_classification_terminates_the_pump() {
    let sqs = Arc::new(FakeSqsClient::new());
    sqs.queue_receive_error(SqsError::synthetic("AccessDenied", "nope"));
    let registry = HandlerRegistry::builder().register("job", || AlwaysSucceeds).build();
    let config = Arc::new(PollerConfig::builder("https://example/q").build().unwrap());
    let pump = MessagePump::builder(sqs).subscribe(config, registry).build();

    let result = tokio::time::timeout(Duration::from_secs(1), pump.run())
        .await
        .expect("pump terminates promptly");
    assert!(result.is_err());
}

/// Scenario: disabling the polling control token halts Receive calls until
/// re-enabled.
#[tokio::test]
async fn polling_control_token_pauses_and_resumes_polling() {
    let sqs = Arc::new(FakeSqsClient::new());
    sqs.enqueue(FakeMessage::new("m1", job_body("m1", 1)));
    let registry = HandlerRegistry::builder().register("job", || AlwaysSucceeds).build();
    let config = Arc::new(PollerConfig::builder("https://example/q").build().unwrap());
    let control = ControlToken::new(false, Duration::from_millis(20));
    let shutdown = CancellationToken::new();
    let poller = Poller::new(
        config,
        sqs.clone(),
        registry,
        control.clone(),
        sqs_message_pump::backoff::BackoffPolicy::None,
        shutdown.clone(),
    );

    let handle = tokio::spawn(async move { poller.run().await });
    tokio::time::sleep(Duration::from_millis(80)).await;
    assert_eq!(sqs.receive_call_count(), 0);

    control.enable();
    wait_until(|| sqs.deleted_ids().len() == 1, Duration::from_secs(1)).await;
    shutdown.cancel();
    let _ = tokio::time::timeout(Duration::from_secs(1), handle).await;

    assert_eq!(sqs.deleted_ids(), vec!["m1".to_string()]);
}

async fn wait_until(mut condition: impl FnMut() -> bool, timeout: Duration) {
    let deadline = tokio::time::Instant::now() + timeout;
    while !condition() {
        if tokio::time::Instant::now() >= deadline {
            panic!("condition was not met within {timeout:?}");
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
