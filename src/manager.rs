//! The message manager (§4.4): tracks in-flight records, runs the
//! heartbeater, dispatches handlers up to the configured concurrency bound,
//! and finalizes each message by delete-on-success or release-on-failure.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::config::PollerConfig;
use crate::decode::DecodedMessage;
use crate::envelope::RawEnvelope;
use crate::registry::{DynHandler, HandlerStatus};
use crate::sqs::{ChangeVisibilityEntry, DeleteEntry, SqsClient, RECEIPT_HANDLE_IS_INVALID};
use crate::telemetry;

/// Per in-flight message state (§3 InFlightRecord).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinalizationState {
    Pending,
    Deleting,
    Deleted,
    Released,
    Failed,
}

struct InFlightRecord {
    receipt_handle: String,
    message_id: String,
    expiry: Instant,
    state: FinalizationState,
}

/// Invoked once per message with a terminal, non-success outcome (decode
/// failure, handler failure). The default implementation just logs; callers
/// may plug in their own sink (dead-letter publication, metrics, etc).
pub type FailureReporter = Arc<dyn Fn(FailureReport) + Send + Sync>;

#[derive(Debug, Clone)]
pub struct FailureReport {
    pub message_id: String,
    pub message_type: String,
    pub reason: String,
}

pub fn default_failure_reporter() -> FailureReporter {
    Arc::new(|report: FailureReport| {
        tracing::warn!(
            message_id = %report.message_id,
            message_type = %report.message_type,
            reason = %report.reason,
            "message processing failed"
        );
    })
}

/// Tracks in-flight messages for one poller subscription, heartbeats their
/// visibility, and finalizes them after handler completion.
pub struct MessageManager {
    config: Arc<PollerConfig>,
    sqs: Arc<dyn SqsClient>,
    failure_reporter: FailureReporter,
    records: Mutex<HashMap<String, InFlightRecord>>,
    count: Arc<AtomicUsize>,
    heartbeat_task: Mutex<Option<JoinHandle<()>>>,
    shutdown: CancellationToken,
}

impl MessageManager {
    pub fn new(config: Arc<PollerConfig>, sqs: Arc<dyn SqsClient>, shutdown: CancellationToken) -> Arc<Self> {
        Self::with_failure_reporter(config, sqs, shutdown, default_failure_reporter())
    }

    pub fn with_failure_reporter(
        config: Arc<PollerConfig>,
        sqs: Arc<dyn SqsClient>,
        shutdown: CancellationToken,
        failure_reporter: FailureReporter,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            sqs,
            failure_reporter,
            records: Mutex::new(HashMap::new()),
            count: Arc::new(AtomicUsize::new(0)),
            heartbeat_task: Mutex::new(None),
            shutdown,
        })
    }

    pub fn in_flight_count(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }

    /// Dispatch a decoded message fire-and-forget on its own task (§4.4
    /// Dispatch). Used by the non-FIFO path; the FIFO serializer instead
    /// calls [`MessageManager::process`] directly so it can await the
    /// result before advancing to the next message in the group.
    ///
    /// Tracking happens synchronously, before the task is spawned, so the
    /// in-flight count is accurate the instant this call returns — the
    /// poller reads it right after dispatching to compute how many more
    /// messages it may admit (§3/§4.4).
    pub fn dispatch(self: &Arc<Self>, decoded: DecodedMessage) {
        self.track(&decoded.envelope);
        let this = Arc::clone(self);
        tokio::spawn(async move {
            this.invoke_and_finalize(decoded).await;
        });
    }

    /// Track, invoke, and finalize a single message, returning its terminal
    /// status. Exposed so the FIFO serializer can run messages within a
    /// group strictly sequentially (§4.5).
    pub async fn process(self: &Arc<Self>, decoded: DecodedMessage) -> HandlerStatus {
        self.track(&decoded.envelope);
        self.invoke_and_finalize(decoded).await
    }

    async fn invoke_and_finalize(&self, decoded: DecodedMessage) -> HandlerStatus {
        let DecodedMessage { envelope, handler } = decoded;
        let status = self.invoke(&envelope, &handler).await;
        self.finalize(&envelope, status).await;
        status
    }

    fn track(&self, envelope: &RawEnvelope) {
        let receipt_handle = envelope.sqs_receipt_handle().unwrap_or_default().to_string();
        let message_id = envelope.sqs_message_id().unwrap_or_default().to_string();
        let expiry = Instant::now() + Duration::from_secs(self.config.visibility_timeout_seconds as u64);
        {
            let mut records = self.records.lock().unwrap();
            records.insert(
                envelope.id.clone(),
                InFlightRecord {
                    receipt_handle,
                    message_id,
                    expiry,
                    state: FinalizationState::Pending,
                },
            );
        }
        let prev = self.count.fetch_add(1, Ordering::SeqCst);
        if prev == 0 {
            self.ensure_heartbeater_started();
        }
    }

    async fn invoke(&self, envelope: &RawEnvelope, handler: &Arc<dyn DynHandler>) -> HandlerStatus {
        let span = telemetry::message_span(envelope, handler.handler_type_name());
        let shutdown = self.shutdown.clone();
        async move {
            match handler.invoke(envelope, shutdown).await {
                Ok(Ok(status)) => status,
                Ok(Err(err)) => {
                    tracing::warn!(error = %err, "handler invocation failed");
                    HandlerStatus::Failed
                }
                Err(decode_err) => {
                    tracing::warn!(error = %decode_err, "failed to decode payload at invocation time");
                    HandlerStatus::Failed
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn finalize(&self, envelope: &RawEnvelope, status: HandlerStatus) {
        let receipt_handle = {
            let records = self.records.lock().unwrap();
            records.get(&envelope.id).map(|r| r.receipt_handle.clone())
        };
        let Some(receipt_handle) = receipt_handle else {
            // Already purged (e.g. a FIFO skip). Nothing left to finalize.
            return;
        };

        match status {
            HandlerStatus::Success => {
                self.set_state(&envelope.id, FinalizationState::Deleting);
                let entry = DeleteEntry {
                    id: envelope.id.clone(),
                    receipt_handle,
                };
                match self.sqs.delete_batch(&self.config.queue_url, vec![entry]).await {
                    Ok(outcome) if outcome.all_succeeded() => {
                        self.set_state(&envelope.id, FinalizationState::Deleted);
                    }
                    Ok(outcome) => {
                        for failed in outcome.failed() {
                            tracing::error!(
                                message_id = %envelope.id,
                                code = ?failed.code,
                                "delete of successfully-handled message failed"
                            );
                        }
                        self.set_state(&envelope.id, FinalizationState::Failed);
                    }
                    Err(err) => {
                        tracing::error!(error = %err, message_id = %envelope.id, "delete_batch request failed");
                        self.set_state(&envelope.id, FinalizationState::Failed);
                    }
                }
            }
            HandlerStatus::Failed => {
                (self.failure_reporter)(FailureReport {
                    message_id: envelope.id.clone(),
                    message_type: envelope.message_type.clone(),
                    reason: "handler returned failed".to_string(),
                });
                self.set_state(&envelope.id, FinalizationState::Released);
            }
        }
        self.untrack(&envelope.id);
    }

    fn set_state(&self, id: &str, state: FinalizationState) {
        if let Some(record) = self.records.lock().unwrap().get_mut(id) {
            record.state = state;
        }
    }

    fn untrack(&self, id: &str) {
        let removed = self.records.lock().unwrap().remove(id).is_some();
        if removed {
            let prev = self.count.fetch_sub(1, Ordering::SeqCst);
            if prev == 1 {
                self.stop_heartbeater();
            }
        }
    }

    /// Purge a record that was never invoked (FIFO skip-on-failure, §4.5):
    /// mark it released and report failure without touching SQS.
    pub fn skip(&self, envelope: &RawEnvelope, reason: impl Into<String>) {
        (self.failure_reporter)(FailureReport {
            message_id: envelope.id.clone(),
            message_type: envelope.message_type.clone(),
            reason: reason.into(),
        });
    }

    fn ensure_heartbeater_started(self: &Arc<Self>) {
        let mut task = self.heartbeat_task.lock().unwrap();
        if task.is_some() {
            return;
        }
        let this = Arc::clone(self);
        *task = Some(tokio::spawn(async move { this.heartbeat_loop().await }));
    }

    fn stop_heartbeater(&self) {
        if let Some(handle) = self.heartbeat_task.lock().unwrap().take() {
            handle.abort();
        }
    }

    /// The heartbeater (§4.4): every `heartbeat-seconds`, extend visibility
    /// for records nearing expiry, in batches of at most 10 (P8).
    async fn heartbeat_loop(self: Arc<Self>) {
        let period = Duration::from_secs(self.config.visibility_extension_heartbeat_seconds as u64);
        let threshold = Duration::from_secs(self.config.visibility_extension_threshold_seconds as u64);
        let mut interval = tokio::time::interval(period);
        loop {
            interval.tick().await;
            if self.in_flight_count() == 0 {
                break;
            }
            self.heartbeat_tick(threshold).await;
        }
    }

    async fn heartbeat_tick(&self, threshold: Duration) {
        let now = Instant::now();
        let due: Vec<(String, String, String)> = {
            let records = self.records.lock().unwrap();
            let mut due: Vec<_> = records
                .iter()
                .filter(|(_, r)| r.state == FinalizationState::Pending && r.expiry.saturating_duration_since(now) <= threshold)
                .map(|(id, r)| (id.clone(), r.message_id.clone(), r.receipt_handle.clone()))
                .collect();
            due.sort_by(|a, b| a.0.cmp(&b.0));
            due
        };
        if due.is_empty() {
            return;
        }
        let new_timeout = self.config.visibility_timeout_seconds as i32;
        for batch in crate::sqs::chunk_into_batches(due, crate::sqs::MAX_BATCH_SIZE) {
            let entries: Vec<ChangeVisibilityEntry> = batch
                .iter()
                .map(|(id, _, receipt_handle)| ChangeVisibilityEntry {
                    id: id.clone(),
                    receipt_handle: receipt_handle.clone(),
                    new_timeout_seconds: new_timeout,
                })
                .collect();
            match self.sqs.change_visibility_batch(&self.config.queue_url, entries).await {
                Ok(outcome) => {
                    let new_expiry = Instant::now() + Duration::from_secs(self.config.visibility_timeout_seconds as u64);
                    for result in &outcome.results {
                        if result.success {
                            if let Some(record) = self.records.lock().unwrap().get_mut(&result.id) {
                                record.expiry = new_expiry;
                            }
                        } else if result.code.as_deref() == Some(RECEIPT_HANDLE_IS_INVALID) {
                            tracing::trace!(message_id = %result.id, "receipt handle already invalid; dropping from tracking");
                            self.untrack(&result.id);
                        } else {
                            tracing::error!(message_id = %result.id, code = ?result.code, "visibility extension failed");
                        }
                    }
                }
                Err(err) => {
                    tracing::warn!(error = %err, "change_visibility_batch request failed; will retry next heartbeat");
                }
            }
        }
    }
}
