//! The SQS client abstraction (§4.2): a small surface over Receive / Delete
//! / ChangeVisibility batch operations, with default and user-overridable
//! fatal/transient error classification.

use async_trait::async_trait;
use aws_sdk_sqs::error::ProvideErrorMetadata;
use aws_sdk_sqs::types::{
    ChangeMessageVisibilityBatchRequestEntry, DeleteMessageBatchRequestEntry, Message,
    MessageSystemAttributeName,
};
use aws_sdk_sqs::Client;

use crate::error::SqsError;

/// Per-entry error code SQS uses when a receipt handle has already expired
/// or been deleted. Benign: must never be logged at error level (§4.2, P9).
pub const RECEIPT_HANDLE_IS_INVALID: &str = "ReceiptHandleIsInvalid";

/// Maximum number of entries SQS accepts in a single batch request.
pub const MAX_BATCH_SIZE: usize = 10;

/// Default fatal/transient classifier (§4.2). Queue/permission/KMS/unsupported-operation
/// errors are fatal; everything else (throttling, overlimit, network) is transient.
pub fn default_is_fatal(err: &SqsError) -> bool {
    matches!(
        err.code(),
        Some("QueueDoesNotExist")
            | Some("AccessDenied")
            | Some("AccessDeniedException")
            | Some("InvalidAddress")
            | Some("KMS.AccessDeniedException")
            | Some("KMS.DisabledException")
            | Some("KMS.InvalidStateException")
            | Some("KMS.NotFoundException")
            | Some("KMS.OptInRequired")
            | Some("UnsupportedOperation")
    )
}

#[derive(Debug, Clone)]
pub struct ReceiveRequest {
    pub queue_url: String,
    pub max_messages: i32,
    pub wait_time_seconds: i32,
    pub visibility_timeout_seconds: i32,
}

#[derive(Debug, Clone)]
pub struct DeleteEntry {
    pub id: String,
    pub receipt_handle: String,
}

#[derive(Debug, Clone)]
pub struct ChangeVisibilityEntry {
    pub id: String,
    pub receipt_handle: String,
    pub new_timeout_seconds: i32,
}

/// Per-entry result of a batch operation.
#[derive(Debug, Clone)]
pub struct BatchEntryResult {
    pub id: String,
    pub success: bool,
    /// The AWS error code for failed entries (e.g. `ReceiptHandleIsInvalid`).
    pub code: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct BatchOutcome {
    pub results: Vec<BatchEntryResult>,
}

impl BatchOutcome {
    pub fn all_succeeded(&self) -> bool {
        self.results.iter().all(|r| r.success)
    }

    pub fn failed(&self) -> impl Iterator<Item = &BatchEntryResult> {
        self.results.iter().filter(|r| !r.success)
    }
}

/// Split `items` into chunks no larger than [`MAX_BATCH_SIZE`] (§4.2, P8).
pub fn chunk_into_batches<T>(items: Vec<T>, size: usize) -> Vec<Vec<T>> {
    let size = size.max(1);
    let mut out = Vec::with_capacity(items.len() / size + 1);
    let mut iter = items.into_iter().peekable();
    while iter.peek().is_some() {
        out.push(iter.by_ref().take(size).collect());
    }
    out
}

/// The minimal SQS operations the poller and manager need. Implemented by
/// [`AwsSqsClient`] for production use and by an in-memory fake for tests
/// (see `testing` module, behind the `test-util` feature).
#[async_trait]
pub trait SqsClient: Send + Sync {
    async fn receive(&self, req: ReceiveRequest) -> Result<Vec<Message>, SqsError>;
    async fn delete_batch(&self, queue_url: &str, entries: Vec<DeleteEntry>) -> Result<BatchOutcome, SqsError>;
    async fn change_visibility_batch(
        &self,
        queue_url: &str,
        entries: Vec<ChangeVisibilityEntry>,
    ) -> Result<BatchOutcome, SqsError>;
}

/// Production implementation backed by `aws-sdk-sqs`.
pub struct AwsSqsClient {
    client: Client,
}

impl AwsSqsClient {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl SqsClient for AwsSqsClient {
    async fn receive(&self, req: ReceiveRequest) -> Result<Vec<Message>, SqsError> {
        let result = self
            .client
            .receive_message()
            .queue_url(&req.queue_url)
            .max_number_of_messages(req.max_messages)
            .wait_time_seconds(req.wait_time_seconds)
            .visibility_timeout(req.visibility_timeout_seconds)
            .message_system_attribute_names(MessageSystemAttributeName::All)
            .message_attribute_names("All")
            .send()
            .await
            .map_err(|e| SqsError::from(aws_sdk_sqs::Error::from(e)))?;
        Ok(result.messages().to_vec())
    }

    async fn delete_batch(&self, queue_url: &str, entries: Vec<DeleteEntry>) -> Result<BatchOutcome, SqsError> {
        let mut outcome = BatchOutcome::default();
        for batch in chunk_into_batches(entries, MAX_BATCH_SIZE) {
            let request_entries = batch
                .iter()
                .map(|e| {
                    DeleteMessageBatchRequestEntry::builder()
                        .id(&e.id)
                        .receipt_handle(&e.receipt_handle)
                        .build()
                        .expect("id and receipt_handle are always set")
                })
                .collect::<Vec<_>>();
            let response = self
                .client
                .delete_message_batch()
                .queue_url(queue_url)
                .set_entries(Some(request_entries))
                .send()
                .await
                .map_err(|e| SqsError::from(aws_sdk_sqs::Error::from(e)))?;
            for success in response.successful() {
                outcome.results.push(BatchEntryResult {
                    id: success.id().to_string(),
                    success: true,
                    code: None,
                });
            }
            for failure in response.failed() {
                outcome.results.push(BatchEntryResult {
                    id: failure.id().to_string(),
                    success: false,
                    code: Some(failure.code().to_string()),
                });
            }
        }
        Ok(outcome)
    }

    async fn change_visibility_batch(
        &self,
        queue_url: &str,
        entries: Vec<ChangeVisibilityEntry>,
    ) -> Result<BatchOutcome, SqsError> {
        let mut outcome = BatchOutcome::default();
        for batch in chunk_into_batches(entries, MAX_BATCH_SIZE) {
            let request_entries = batch
                .iter()
                .map(|e| {
                    ChangeMessageVisibilityBatchRequestEntry::builder()
                        .id(&e.id)
                        .receipt_handle(&e.receipt_handle)
                        .visibility_timeout(e.new_timeout_seconds)
                        .build()
                        .expect("id and receipt_handle are always set")
                })
                .collect::<Vec<_>>();
            let response = self
                .client
                .change_message_visibility_batch()
                .queue_url(queue_url)
                .set_entries(Some(request_entries))
                .send()
                .await
                .map_err(|e| SqsError::from(aws_sdk_sqs::Error::from(e)))?;
            for success in response.successful() {
                outcome.results.push(BatchEntryResult {
                    id: success.id().to_string(),
                    success: true,
                    code: None,
                });
            }
            for failure in response.failed() {
                outcome.results.push(BatchEntryResult {
                    id: failure.id().to_string(),
                    success: false,
                    code: Some(failure.code().to_string()),
                });
            }
        }
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunking_respects_max_batch_size() {
        let items: Vec<u32> = (0..25).collect();
        let chunks = chunk_into_batches(items, MAX_BATCH_SIZE);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].len(), 10);
        assert_eq!(chunks[1].len(), 10);
        assert_eq!(chunks[2].len(), 5);
    }

    #[test]
    fn chunking_empty_input_produces_no_batches() {
        let items: Vec<u32> = Vec::new();
        assert!(chunk_into_batches(items, MAX_BATCH_SIZE).is_empty());
    }
}
