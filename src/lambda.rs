//! Lambda partial-batch integration (§4.5 Lambda variant): decode + invoke a
//! full SQS batch synchronously (the Lambda event-source model has no
//! standing poller) and produce an `SqsBatchResponse` so the platform
//! redrives only the messages that actually failed, re-queueing a whole FIFO
//! group atomically when any message in it fails.

use std::collections::HashSet;
use std::sync::Arc;

use aws_lambda_events::event::sqs::{BatchItemFailure, SqsBatchResponse, SqsEventObj};
use tokio_util::sync::CancellationToken;

use crate::decode;
use crate::registry::{HandlerRegistry, HandlerStatus};

/// Process one Lambda-delivered batch of raw SQS records and report, per
/// §4.5's Lambda variant, which message IDs the platform should redrive.
///
/// Messages that fail to decode are reported as failed outright (their
/// identifier is still a valid `message_id` even though the body never made
/// it through the registry). For a FIFO group, the first failure anywhere in
/// the group marks every remaining message of that group (by arrival order
/// within this batch) as failed too, preserving group atomicity on redrive.
pub async fn handle_batch(
    event: SqsEventObj<serde_json::Value>,
    registry: &HandlerRegistry,
    cancel: CancellationToken,
) -> SqsBatchResponse {
    let mut failed_ids: Vec<String> = Vec::new();
    let mut failed_groups: HashSet<String> = HashSet::new();

    for record in event.records {
        let message_id = record.message_id.clone().unwrap_or_default();
        let group_id = record.attributes.get("MessageGroupId").cloned();

        if let Some(group) = &group_id {
            if failed_groups.contains(group) {
                failed_ids.push(message_id);
                continue;
            }
        }

        let sqs_message = to_sdk_message(&record);
        let outcome = match decode::decode(&sqs_message, registry) {
            Ok(decoded) => invoke(decoded, cancel.clone()).await,
            Err(err) => {
                tracing::warn!(error = %err, message_id = %message_id, "failed to decode message in lambda batch");
                HandlerStatus::Failed
            }
        };

        if outcome == HandlerStatus::Failed {
            failed_ids.push(message_id);
            if let Some(group) = group_id {
                failed_groups.insert(group);
            }
        }
    }

    SqsBatchResponse {
        batch_item_failures: failed_ids
            .into_iter()
            .map(|id| BatchItemFailure { item_identifier: id })
            .collect(),
    }
}

async fn invoke(decoded: decode::DecodedMessage, cancel: CancellationToken) -> HandlerStatus {
    let decode::DecodedMessage { envelope, handler } = decoded;
    match handler.invoke(&envelope, cancel).await {
        Ok(Ok(status)) => status,
        Ok(Err(err)) => {
            tracing::warn!(error = %err, message_id = %envelope.id, "handler invocation failed in lambda batch");
            HandlerStatus::Failed
        }
        Err(err) => {
            tracing::warn!(error = %err, message_id = %envelope.id, "failed to deserialize payload in lambda batch");
            HandlerStatus::Failed
        }
    }
}

fn to_sdk_message(record: &aws_lambda_events::event::sqs::SqsMessageObj<serde_json::Value>) -> aws_sdk_sqs::types::Message {
    let mut builder = aws_sdk_sqs::types::Message::builder()
        .set_message_id(record.message_id.clone())
        .set_receipt_handle(record.receipt_handle.clone())
        .set_body(record.body.as_ref().map(|b| serde_json::to_string(b).unwrap_or_default()));
    for (k, v) in &record.attributes {
        builder = builder.attributes(aws_sdk_sqs::types::MessageSystemAttributeName::from(k.as_str()), v.clone());
    }
    builder.build()
}
