//! The message envelope (§3, §6): an immutable, decoded message plus
//! transport metadata. Envelopes are CloudEvents v1.0-shaped on the wire.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde_json::Value;

/// Fixed CloudEvents spec version this crate understands.
pub const SPEC_VERSION: &str = "1.0";

/// Transport-specific metadata, populated by the decoder from the raw
/// delivery, never from the envelope JSON (§6).
#[derive(Debug, Clone)]
pub enum TransportMetadata {
    Sqs(SqsTransportMetadata),
    Sns(SnsTransportMetadata),
    EventBridge(EventBridgeTransportMetadata),
}

#[derive(Debug, Clone)]
pub struct SqsTransportMetadata {
    pub receipt_handle: String,
    pub message_id: String,
    pub group_id: Option<String>,
    pub deduplication_id: Option<String>,
    pub attributes: HashMap<String, String>,
}

#[derive(Debug, Clone)]
pub struct SnsTransportMetadata {
    pub message_id: String,
    pub topic_arn: String,
}

#[derive(Debug, Clone)]
pub struct EventBridgeTransportMetadata {
    pub event_id: String,
    pub detail_type: String,
}

/// A fully decoded envelope before the payload has been deserialized into
/// its concrete handler type. The poller produces these; the handler
/// registry resolves `data` into `T` lazily, at invocation time (§4.6),
/// since the handler implementation is the only party that knows `T`.
#[derive(Debug, Clone)]
pub struct RawEnvelope {
    pub id: String,
    pub source: String,
    pub spec_version: String,
    pub message_type: String,
    pub timestamp: DateTime<Utc>,
    pub data_content_type: Option<String>,
    pub data: Value,
    pub metadata: HashMap<String, Value>,
    pub transport: TransportMetadata,
}

impl RawEnvelope {
    /// The SQS receipt handle for this message, if delivered over SQS.
    /// Every in-flight record is required to have one until finalized (§3).
    pub fn sqs_receipt_handle(&self) -> Option<&str> {
        match &self.transport {
            TransportMetadata::Sqs(meta) => Some(meta.receipt_handle.as_str()),
            _ => None,
        }
    }

    pub fn sqs_message_id(&self) -> Option<&str> {
        match &self.transport {
            TransportMetadata::Sqs(meta) => Some(meta.message_id.as_str()),
            _ => None,
        }
    }

    pub fn sqs_group_id(&self) -> Option<&str> {
        match &self.transport {
            TransportMetadata::Sqs(meta) => meta.group_id.as_deref(),
            _ => None,
        }
    }
}

/// A read-only, typed envelope handed to user handlers (§3). Built from a
/// [`RawEnvelope`] plus the handler's own deserialized payload type.
#[derive(Debug, Clone)]
pub struct MessageEnvelope<T> {
    pub id: String,
    pub source: String,
    pub spec_version: String,
    pub message_type: String,
    pub timestamp: DateTime<Utc>,
    pub data_content_type: Option<String>,
    pub data: T,
    pub metadata: HashMap<String, Value>,
    pub transport: TransportMetadata,
}

impl<T> MessageEnvelope<T> {
    pub fn from_raw(raw: &RawEnvelope, data: T) -> Self {
        Self {
            id: raw.id.clone(),
            source: raw.source.clone(),
            spec_version: raw.spec_version.clone(),
            message_type: raw.message_type.clone(),
            timestamp: raw.timestamp,
            data_content_type: raw.data_content_type.clone(),
            data,
            metadata: raw.metadata.clone(),
            transport: raw.transport.clone(),
        }
    }
}
