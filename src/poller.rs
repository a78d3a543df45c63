//! The poller loop (§4.3): admission control, batched `Receive`, decode,
//! dispatch, backoff coordination, and shutdown.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::backoff::{BackoffHandler, BackoffPolicy};
use crate::config::{ControlToken, PollerConfig};
use crate::decode;
use crate::error::{ErrorClass, PumpError, SqsError};
use crate::fifo::FifoGroupSerializer;
use crate::manager::{self, FailureReport, FailureReporter, MessageManager};
use crate::registry::HandlerRegistry;
use crate::sqs::{ReceiveRequest, SqsClient};

/// The two shapes of downstream dispatch a poller can drive, selected once
/// at construction from [`PollerConfig::is_fifo`] (§4.5).
enum Dispatcher {
    Standard(Arc<MessageManager>),
    Fifo(Arc<FifoGroupSerializer>),
}

impl Dispatcher {
    fn in_flight_count(&self) -> usize {
        match self {
            Dispatcher::Standard(m) => m.in_flight_count(),
            Dispatcher::Fifo(f) => f.in_flight_count(),
        }
    }

    fn admit(&self, decoded: decode::DecodedMessage) {
        match self {
            Dispatcher::Standard(m) => m.dispatch(decoded),
            Dispatcher::Fifo(f) => f.admit(decoded),
        }
    }
}

/// Drives one subscription's Receive/decode/dispatch loop (§4.3).
pub struct Poller {
    config: Arc<PollerConfig>,
    sqs: Arc<dyn SqsClient>,
    registry: HandlerRegistry,
    dispatcher: Dispatcher,
    control: ControlToken,
    backoff: BackoffHandler,
    failure_reporter: FailureReporter,
    shutdown: CancellationToken,
}

impl Poller {
    pub fn new(
        config: Arc<PollerConfig>,
        sqs: Arc<dyn SqsClient>,
        registry: HandlerRegistry,
        control: ControlToken,
        backoff_policy: BackoffPolicy,
        shutdown: CancellationToken,
    ) -> Self {
        Self::with_failure_reporter(
            config,
            sqs,
            registry,
            control,
            backoff_policy,
            shutdown,
            manager::default_failure_reporter(),
        )
    }

    /// Like [`Poller::new`], but lets a caller (e.g. [`crate::pump::MessagePumpBuilder`])
    /// install a custom [`FailureReporter`] instead of the default log-only
    /// one — used for both handler-reported and decode-time failures (§4.3
    /// step 6, §7).
    pub fn with_failure_reporter(
        config: Arc<PollerConfig>,
        sqs: Arc<dyn SqsClient>,
        registry: HandlerRegistry,
        control: ControlToken,
        backoff_policy: BackoffPolicy,
        shutdown: CancellationToken,
        failure_reporter: FailureReporter,
    ) -> Self {
        let manager = MessageManager::with_failure_reporter(
            Arc::clone(&config),
            Arc::clone(&sqs),
            shutdown.clone(),
            failure_reporter.clone(),
        );
        let dispatcher = if config.is_fifo() {
            Dispatcher::Fifo(FifoGroupSerializer::new(manager, config.max_concurrent))
        } else {
            Dispatcher::Standard(manager)
        };
        Self {
            config,
            sqs,
            registry,
            dispatcher,
            control,
            backoff: BackoffHandler::new(backoff_policy),
            failure_reporter,
            shutdown,
        }
    }

    /// Run the loop to completion: returns `Ok(())` on graceful shutdown, or
    /// `Err` on a fatal SQS error (§4.3 step 4, §7).
    pub async fn run(&self) -> Result<(), PumpError> {
        loop {
            if self.shutdown.is_cancelled() {
                return Ok(());
            }
            if !self.control.enabled() {
                tokio::select! {
                    _ = tokio::time::sleep(self.control.poll_wait()) => continue,
                    _ = self.shutdown.cancelled() => return Ok(()),
                }
            }

            let available = self
                .config
                .max_concurrent
                .saturating_sub(self.dispatcher.in_flight_count());
            if available == 0 {
                tokio::select! {
                    _ = tokio::time::sleep(self.control.poll_wait()) => continue,
                    _ = self.shutdown.cancelled() => return Ok(()),
                }
            }

            let request = ReceiveRequest {
                queue_url: self.config.queue_url.clone(),
                max_messages: available.min(crate::sqs::MAX_BATCH_SIZE) as i32,
                wait_time_seconds: self.config.wait_time_seconds as i32,
                visibility_timeout_seconds: self.config.visibility_timeout_seconds as i32,
            };

            let received = tokio::select! {
                res = self.sqs.receive(request) => res,
                _ = self.shutdown.cancelled() => return Ok(()),
            };

            match received {
                Ok(messages) => {
                    self.backoff.reset();
                    for message in &messages {
                        self.handle_one(message);
                    }
                    // `receive` and the dispatch it triggers can both resolve
                    // without ever actually suspending (an empty result from
                    // a fake/local client, or a task that completes before
                    // it's first polled). Yield here so freshly spawned
                    // handler/heartbeat tasks get a turn instead of the loop
                    // spinning straight back into another `receive` (§4.4).
                    tokio::task::yield_now().await;
                }
                Err(err) => {
                    if self.classify(&err) == ErrorClass::Fatal {
                        return Err(PumpError::FatalSqs {
                            queue_url: self.config.queue_url.clone(),
                            source: err,
                        });
                    }
                    tracing::warn!(error = %err, queue_url = %self.config.queue_url, "transient receive failure");
                    let wait = self.backoff.record_failure();
                    tokio::select! {
                        _ = tokio::time::sleep(wait) => {},
                        _ = self.shutdown.cancelled() => return Ok(()),
                    }
                }
            }
        }
    }

    fn classify(&self, err: &SqsError) -> ErrorClass {
        if (self.config.is_exception_fatal)(err) {
            ErrorClass::Fatal
        } else {
            ErrorClass::Transient
        }
    }

    fn handle_one(&self, message: &aws_sdk_sqs::types::Message) {
        match decode::decode(message, &self.registry) {
            Ok(decoded) => self.dispatcher.admit(decoded),
            Err(err) => {
                tracing::warn!(
                    error = %err,
                    message_id = ?message.message_id(),
                    queue_url = %self.config.queue_url,
                    "failed to decode message"
                );
                (self.failure_reporter)(FailureReport {
                    message_id: message.message_id().unwrap_or_default().to_string(),
                    message_type: err.message_type().unwrap_or("unknown").to_string(),
                    reason: err.to_string(),
                });
            }
        }
    }
}
