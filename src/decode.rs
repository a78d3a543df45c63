//! The envelope decoder (§6): parses a raw SQS message body as a CloudEvents
//! v1.0 JSON document, resolves the message-type identifier against the
//! handler registry, and produces a [`RawEnvelope`] plus the resolved
//! handler. Transport metadata comes from the raw SQS message, never from
//! the envelope JSON.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde_json::Value;
use std::sync::Arc;

use crate::envelope::{RawEnvelope, SqsTransportMetadata, TransportMetadata};
use crate::error::DecodeError;
use crate::registry::{DynHandler, HandlerRegistry};

const RESERVED_ATTRIBUTES: &[&str] = &[
    "id",
    "source",
    "specversion",
    "type",
    "time",
    "datacontenttype",
    "data",
];

/// A decoded message ready for dispatch: the envelope plus the handler
/// resolved for its message type (§4.3 step 6).
pub struct DecodedMessage {
    pub envelope: RawEnvelope,
    pub handler: Arc<dyn DynHandler>,
}

/// Decode a single raw SQS message into a [`DecodedMessage`].
pub fn decode(
    message: &aws_sdk_sqs::types::Message,
    registry: &HandlerRegistry,
) -> Result<DecodedMessage, DecodeError> {
    let body = message.body().ok_or(DecodeError::EmptyBody)?;
    let receipt_handle = message
        .receipt_handle()
        .ok_or(DecodeError::MissingReceiptHandle)?
        .to_string();

    let json: Value = serde_json::from_str(body).map_err(DecodeError::InvalidJson)?;
    let obj = json.as_object().cloned().unwrap_or_default();

    let id = required_string(&obj, "id")?;
    let source = required_string(&obj, "source")?;
    let spec_version = required_string(&obj, "specversion")?;
    if spec_version != crate::envelope::SPEC_VERSION {
        return Err(DecodeError::UnsupportedSpecVersion(spec_version));
    }
    let message_type = required_string(&obj, "type")?;
    let time_str = required_string(&obj, "time")?;
    let timestamp = DateTime::parse_from_rfc3339(&time_str)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|_| DecodeError::InvalidTimestamp(time_str))?;
    let data_content_type = obj
        .get("datacontenttype")
        .and_then(Value::as_str)
        .map(str::to_string);
    let data = obj.get("data").cloned().unwrap_or(Value::Null);

    let metadata: HashMap<String, Value> = obj
        .iter()
        .filter(|(k, _)| !RESERVED_ATTRIBUTES.contains(&k.as_str()))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();

    let handler = registry
        .resolve(&message_type)
        .ok_or_else(|| DecodeError::UnknownMessageType(message_type.clone()))?;

    let attributes: HashMap<String, String> = message
        .attributes()
        .map(|attrs| {
            attrs
                .iter()
                .map(|(k, v)| (k.as_str().to_string(), v.clone()))
                .collect()
        })
        .unwrap_or_default();
    let group_id = attributes.get("MessageGroupId").cloned();
    let deduplication_id = attributes.get("MessageDeduplicationId").cloned();

    let envelope = RawEnvelope {
        id,
        source,
        spec_version,
        message_type,
        timestamp,
        data_content_type,
        data,
        metadata,
        transport: TransportMetadata::Sqs(SqsTransportMetadata {
            receipt_handle,
            message_id: message.message_id().unwrap_or_default().to_string(),
            group_id,
            deduplication_id,
            attributes,
        }),
    };

    Ok(DecodedMessage { envelope, handler })
}

fn required_string(obj: &serde_json::Map<String, Value>, key: &'static str) -> Result<String, DecodeError> {
    obj.get(key)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or(DecodeError::MissingAttribute(key))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{Handler, HandlerStatus};
    use async_trait::async_trait;
    use serde::Deserialize;
    use tokio_util::sync::CancellationToken;

    #[derive(Debug, Deserialize)]
    struct Payload {
        value: String,
    }

    struct NoopHandler;

    #[async_trait]
    impl Handler<Payload> for NoopHandler {
        async fn handle(
            &self,
            _envelope: &crate::envelope::MessageEnvelope<Payload>,
            _cancel: CancellationToken,
        ) -> anyhow::Result<HandlerStatus> {
            Ok(HandlerStatus::Success)
        }
    }

    fn registry() -> HandlerRegistry {
        HandlerRegistry::builder().register("chat", || NoopHandler).build()
    }

    fn sqs_message(body: &str) -> aws_sdk_sqs::types::Message {
        aws_sdk_sqs::types::Message::builder()
            .message_id("mid-1")
            .receipt_handle("rh-1")
            .body(body)
            .build()
    }

    #[test]
    fn decodes_a_well_formed_cloud_event() {
        let body = serde_json::json!({
            "id": "evt-1",
            "source": "/test",
            "specversion": "1.0",
            "type": "chat",
            "time": "2024-01-01T00:00:00Z",
            "datacontenttype": "application/json",
            "data": {"value": "hi"},
            "traceparent": "00-abc-def-01"
        })
        .to_string();
        let msg = sqs_message(&body);
        let decoded = decode(&msg, &registry()).expect("decodes");
        assert_eq!(decoded.envelope.id, "evt-1");
        assert_eq!(decoded.envelope.message_type, "chat");
        assert!(decoded.envelope.metadata.contains_key("traceparent"));
        assert_eq!(decoded.envelope.sqs_receipt_handle(), Some("rh-1"));
    }

    #[test]
    fn rejects_unknown_message_type() {
        let body = serde_json::json!({
            "id": "evt-1", "source": "/test", "specversion": "1.0",
            "type": "unregistered", "time": "2024-01-01T00:00:00Z", "data": {}
        })
        .to_string();
        let msg = sqs_message(&body);
        let err = decode(&msg, &registry()).unwrap_err();
        assert!(matches!(err, DecodeError::UnknownMessageType(t) if t == "unregistered"));
    }

    #[test]
    fn rejects_unparseable_body() {
        let msg = sqs_message("not json");
        let err = decode(&msg, &registry()).unwrap_err();
        assert!(matches!(err, DecodeError::InvalidJson(_)));
    }

    #[test]
    fn rejects_wrong_spec_version() {
        let body = serde_json::json!({
            "id": "evt-1", "source": "/test", "specversion": "0.3",
            "type": "chat", "time": "2024-01-01T00:00:00Z", "data": {}
        })
        .to_string();
        let msg = sqs_message(&body);
        let err = decode(&msg, &registry()).unwrap_err();
        assert!(matches!(err, DecodeError::UnsupportedSpecVersion(v) if v == "0.3"));
    }

    #[test]
    fn rejects_missing_body() {
        let msg = aws_sdk_sqs::types::Message::builder()
            .message_id("mid-1")
            .receipt_handle("rh-1")
            .build();
        let err = decode(&msg, &registry()).unwrap_err();
        assert!(matches!(err, DecodeError::EmptyBody));
    }
}
