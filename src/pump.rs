//! The message pump host (§2, §4.3 Shutdown, §6 Exit signals): owns one
//! [`crate::poller::Poller`] per configured subscription, joins them, and
//! propagates the first fatal error while coordinating graceful shutdown
//! through a shared `CancellationToken`, in the spirit of the teacher's
//! `bin/sqs-consumer.rs` ctrl-c `tokio::select!` loop.

use std::sync::Arc;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::backoff::BackoffPolicy;
use crate::config::{ControlToken, PollerConfig};
use crate::error::PumpError;
use crate::manager::{self, FailureReporter};
use crate::poller::Poller;
use crate::registry::HandlerRegistry;
use crate::sqs::SqsClient;

/// One subscription: a queue configuration plus the handler registry its
/// poller should resolve message types against.
pub struct Subscription {
    pub config: Arc<PollerConfig>,
    pub registry: HandlerRegistry,
}

/// Builds and runs a [`MessagePump`] over one or more subscriptions sharing
/// an SQS client, polling control token, and backoff policy.
pub struct MessagePumpBuilder {
    sqs: Arc<dyn SqsClient>,
    subscriptions: Vec<Subscription>,
    control: ControlToken,
    backoff_policy: BackoffPolicy,
    failure_reporter: FailureReporter,
}

impl MessagePumpBuilder {
    pub fn new(sqs: Arc<dyn SqsClient>) -> Self {
        Self {
            sqs,
            subscriptions: Vec::new(),
            control: ControlToken::default(),
            backoff_policy: BackoffPolicy::default(),
            failure_reporter: manager::default_failure_reporter(),
        }
    }

    pub fn subscribe(mut self, config: Arc<PollerConfig>, registry: HandlerRegistry) -> Self {
        self.subscriptions.push(Subscription { config, registry });
        self
    }

    pub fn control_token(mut self, control: ControlToken) -> Self {
        self.control = control;
        self
    }

    pub fn backoff_policy(mut self, policy: BackoffPolicy) -> Self {
        self.backoff_policy = policy;
        self
    }

    /// Install a custom sink for terminal per-message failures (handler
    /// failures and decode failures alike), in place of the default
    /// log-only reporter (§4.3 step 6, §7).
    pub fn failure_reporter(mut self, reporter: FailureReporter) -> Self {
        self.failure_reporter = reporter;
        self
    }

    pub fn build(self) -> MessagePump {
        MessagePump {
            sqs: self.sqs,
            subscriptions: self.subscriptions,
            control: self.control,
            backoff_policy: self.backoff_policy,
            failure_reporter: self.failure_reporter,
            shutdown: CancellationToken::new(),
        }
    }
}

/// Runs one poller task per subscription until either every poller shuts
/// down gracefully or one reports a fatal error, in which case the shared
/// shutdown token is cancelled so the others unwind too (§4.3 Shutdown).
pub struct MessagePump {
    sqs: Arc<dyn SqsClient>,
    subscriptions: Vec<Subscription>,
    control: ControlToken,
    backoff_policy: BackoffPolicy,
    failure_reporter: FailureReporter,
    shutdown: CancellationToken,
}

impl MessagePump {
    pub fn builder(sqs: Arc<dyn SqsClient>) -> MessagePumpBuilder {
        MessagePumpBuilder::new(sqs)
    }

    /// A clone of the pump's shutdown token, so a caller (e.g. a ctrl-c
    /// handler) can request a graceful stop from outside `run`.
    pub fn shutdown_handle(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Run every subscription's poller to completion. Returns the first
    /// fatal error encountered, if any; cancels all other pollers as soon as
    /// one reports fatal.
    pub async fn run(self) -> Result<(), PumpError> {
        let mut joinset: JoinSet<Result<(), PumpError>> = JoinSet::new();
        for subscription in self.subscriptions {
            let sqs = Arc::clone(&self.sqs);
            let control = self.control.clone();
            let backoff_policy = self.backoff_policy.clone();
            let failure_reporter = self.failure_reporter.clone();
            let shutdown = self.shutdown.clone();
            joinset.spawn(async move {
                let poller = Poller::with_failure_reporter(
                    subscription.config,
                    sqs,
                    subscription.registry,
                    control,
                    backoff_policy,
                    shutdown,
                    failure_reporter,
                );
                poller.run().await
            });
        }

        let mut first_error = None;
        while let Some(result) = joinset.join_next().await {
            match result {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    tracing::error!(error = %err, "poller terminated with a fatal error; shutting down the pump");
                    self.shutdown.cancel();
                    if first_error.is_none() {
                        first_error = Some(err);
                    }
                }
                Err(join_err) => {
                    tracing::error!(error = %join_err, "poller task panicked");
                    self.shutdown.cancel();
                }
            }
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{Handler, HandlerStatus};
    use crate::testing::{FakeMessage, FakeSqsClient};
    use async_trait::async_trait;
    use serde::Deserialize;
    use std::time::Duration;

    #[derive(Debug, Deserialize)]
    struct Ping {
        #[allow(dead_code)]
        n: u32,
    }

    struct OkHandler;

    #[async_trait]
    impl Handler<Ping> for OkHandler {
        async fn handle(
            &self,
            _envelope: &crate::envelope::MessageEnvelope<Ping>,
            _cancel: CancellationToken,
        ) -> anyhow::Result<HandlerStatus> {
            Ok(HandlerStatus::Success)
        }
    }

    #[tokio::test]
    async fn graceful_shutdown_returns_ok() {
        let sqs = Arc::new(FakeSqsClient::new());
        let registry = HandlerRegistry::builder().register("ping", || OkHandler).build();
        let config = Arc::new(PollerConfig::builder("https://example/q").build().unwrap());
        let pump = MessagePump::builder(sqs).subscribe(config, registry).build();
        let shutdown = pump.shutdown_handle();

        let handle = tokio::spawn(pump.run());
        tokio::time::sleep(Duration::from_millis(30)).await;
        shutdown.cancel();
        let result = tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("pump stopped within grace period")
            .expect("task did not panic");
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn fatal_error_on_one_subscription_shuts_the_whole_pump_down() {
        use crate::error::SqsError;

        let failing = Arc::new(FakeSqsClient::new());
        failing.queue_receive_error(SqsError::synthetic("QueueDoesNotExist", "gone"));
        let quiet = Arc::new(FakeSqsClient::new());
        quiet.enqueue(FakeMessage::new("m1", "{}"));

        // Two subscriptions sharing a client wrapper that fails only the first queue
        // would need request routing the fake doesn't model; exercise the simpler
        // single-subscription fatal path instead.
        let registry = HandlerRegistry::builder().register("ping", || OkHandler).build();
        let config = Arc::new(PollerConfig::builder("https://example/q").build().unwrap());
        let pump = MessagePump::builder(failing).subscribe(config, registry).build();

        let result = tokio::time::timeout(Duration::from_secs(1), pump.run())
            .await
            .expect("pump terminates promptly on fatal error");
        assert!(matches!(result, Err(PumpError::FatalSqs { .. })));
    }
}
