//! In-memory fake SQS client for exercising the pump end-to-end without a
//! real queue (§8 scenarios). Gated behind the `test-util` feature so it
//! ships as part of the crate's public test-support surface rather than
//! living only inside `#[cfg(test)]`, the way `tests/` integration tests
//! need to reach it too.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use aws_sdk_sqs::types::Message;

use crate::error::SqsError;
use crate::sqs::{BatchEntryResult, BatchOutcome, ChangeVisibilityEntry, DeleteEntry, ReceiveRequest, SqsClient};

/// A message queued in the fake, not yet delivered.
#[derive(Clone)]
pub struct FakeMessage {
    pub message_id: String,
    pub body: String,
    pub group_id: Option<String>,
    pub deduplication_id: Option<String>,
}

impl FakeMessage {
    pub fn new(message_id: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            message_id: message_id.into(),
            body: body.into(),
            group_id: None,
            deduplication_id: None,
        }
    }

    pub fn with_group(mut self, group_id: impl Into<String>) -> Self {
        self.group_id = Some(group_id.into());
        self
    }
}

struct InFlight {
    message: FakeMessage,
    receipt_handle: String,
    visible_again_at: Instant,
}

#[derive(Default)]
struct State {
    pending: Vec<FakeMessage>,
    in_flight: HashMap<String, InFlight>,
    deleted_ids: Vec<String>,
    next_receipt: u64,
    delete_batches: Vec<Vec<DeleteEntry>>,
    change_visibility_batches: Vec<Vec<ChangeVisibilityEntry>>,
    receive_calls: u32,
    queued_receive_errors: Vec<SqsError>,
}

/// An in-memory [`SqsClient`] double. Enqueue messages with
/// [`FakeSqsClient::enqueue`], then drive a [`crate::manager::MessageManager`]
/// or [`crate::poller::Poller`] against it and inspect the recorded batch
/// calls to assert the §8 testable properties.
#[derive(Default)]
pub struct FakeSqsClient {
    state: Mutex<State>,
}

impl FakeSqsClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue(&self, message: FakeMessage) {
        self.state.lock().unwrap().pending.push(message);
    }

    /// Make the next `receive` call return this error instead of messages.
    pub fn queue_receive_error(&self, err: SqsError) {
        self.state.lock().unwrap().queued_receive_errors.push(err);
    }

    pub fn receive_call_count(&self) -> u32 {
        self.state.lock().unwrap().receive_calls
    }

    pub fn deleted_ids(&self) -> Vec<String> {
        self.state.lock().unwrap().deleted_ids.clone()
    }

    pub fn delete_batches(&self) -> Vec<Vec<DeleteEntry>> {
        self.state.lock().unwrap().delete_batches.clone()
    }

    pub fn change_visibility_batches(&self) -> Vec<Vec<ChangeVisibilityEntry>> {
        self.state.lock().unwrap().change_visibility_batches.clone()
    }

    pub fn in_flight_count(&self) -> usize {
        self.state.lock().unwrap().in_flight.len()
    }
}

#[async_trait]
impl SqsClient for FakeSqsClient {
    async fn receive(&self, req: ReceiveRequest) -> Result<Vec<Message>, SqsError> {
        let mut state = self.state.lock().unwrap();
        state.receive_calls += 1;
        if let Some(err) = state.queued_receive_errors.pop() {
            return Err(err);
        }
        // Visibility-expired in-flight messages become visible again.
        let now = Instant::now();
        let expired: Vec<String> = state
            .in_flight
            .iter()
            .filter(|(_, v)| v.visible_again_at <= now)
            .map(|(k, _)| k.clone())
            .collect();
        for receipt in expired {
            if let Some(entry) = state.in_flight.remove(&receipt) {
                state.pending.push(entry.message);
            }
        }

        let take = (req.max_messages as usize).min(state.pending.len());
        let batch: Vec<FakeMessage> = state.pending.drain(0..take).collect();
        let mut out = Vec::with_capacity(batch.len());
        for msg in batch {
            state.next_receipt += 1;
            let receipt_handle = format!("receipt-{}", state.next_receipt);
            let mut builder = Message::builder()
                .message_id(&msg.message_id)
                .receipt_handle(&receipt_handle)
                .body(&msg.body);
            if let Some(group) = &msg.group_id {
                builder = builder.attributes(
                    aws_sdk_sqs::types::MessageSystemAttributeName::MessageGroupId,
                    group,
                );
            }
            if let Some(dedup) = &msg.deduplication_id {
                builder = builder.attributes(
                    aws_sdk_sqs::types::MessageSystemAttributeName::MessageDeduplicationId,
                    dedup,
                );
            }
            out.push(builder.build());
            state.in_flight.insert(
                receipt_handle.clone(),
                InFlight {
                    message: FakeMessage {
                        message_id: msg.message_id,
                        body: msg.body,
                        group_id: msg.group_id,
                        deduplication_id: msg.deduplication_id,
                    },
                    receipt_handle,
                    visible_again_at: now + Duration::from_secs(req.visibility_timeout_seconds.max(0) as u64),
                },
            );
        }
        Ok(out)
    }

    async fn delete_batch(&self, _queue_url: &str, entries: Vec<DeleteEntry>) -> Result<BatchOutcome, SqsError> {
        let mut state = self.state.lock().unwrap();
        let mut results = Vec::with_capacity(entries.len());
        for entry in &entries {
            let existed = state.in_flight.remove(&entry.receipt_handle).is_some();
            if existed {
                state.deleted_ids.push(entry.id.clone());
                results.push(BatchEntryResult {
                    id: entry.id.clone(),
                    success: true,
                    code: None,
                });
            } else {
                results.push(BatchEntryResult {
                    id: entry.id.clone(),
                    success: false,
                    code: Some(crate::sqs::RECEIPT_HANDLE_IS_INVALID.to_string()),
                });
            }
        }
        state.delete_batches.push(entries);
        Ok(BatchOutcome { results })
    }

    async fn change_visibility_batch(
        &self,
        _queue_url: &str,
        entries: Vec<ChangeVisibilityEntry>,
    ) -> Result<BatchOutcome, SqsError> {
        let mut state = self.state.lock().unwrap();
        let mut results = Vec::with_capacity(entries.len());
        let now = Instant::now();
        for entry in &entries {
            if let Some(in_flight) = state.in_flight.get_mut(&entry.receipt_handle) {
                in_flight.visible_again_at = now + Duration::from_secs(entry.new_timeout_seconds.max(0) as u64);
                results.push(BatchEntryResult {
                    id: entry.id.clone(),
                    success: true,
                    code: None,
                });
            } else {
                results.push(BatchEntryResult {
                    id: entry.id.clone(),
                    success: false,
                    code: Some(crate::sqs::RECEIPT_HANDLE_IS_INVALID.to_string()),
                });
            }
        }
        state.change_visibility_batches.push(entries);
        Ok(BatchOutcome { results })
    }
}
