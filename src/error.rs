//! Error taxonomy for the pump: configuration, decode, and SQS-facing errors.
//!
//! Configuration errors are construction-time only (§3 invariants). Decode
//! and SQS errors are runtime and carry enough information for the poller
//! and manager to classify them per §7.

use thiserror::Error;

/// Errors raised while building a [`crate::config::PollerConfig`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("queue_url must not be empty")]
    EmptyQueueUrl,

    #[error("max_concurrent must be >= 1, got {0}")]
    InvalidMaxConcurrent(usize),

    #[error("visibility_timeout_seconds must be between 0 and 43200, got {0}")]
    InvalidVisibilityTimeout(u32),

    #[error("wait_time_seconds must be between 0 and 20, got {0}")]
    InvalidWaitTime(u32),

    #[error(
        "visibility heartbeat/threshold/timeout must satisfy heartbeat < threshold < timeout; \
         got heartbeat={heartbeat}, threshold={threshold}, timeout={timeout}"
    )]
    InvalidHeartbeatOrdering {
        heartbeat: u32,
        threshold: u32,
        timeout: u32,
    },
}

/// Errors raised while decoding a raw SQS message into a [`crate::envelope::RawEnvelope`].
///
/// All decode errors are per-message: the poller reports a failure for the
/// offending message and continues (§7).
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("SQS message is missing a body")]
    EmptyBody,

    #[error("SQS message is missing a receipt handle")]
    MissingReceiptHandle,

    #[error("failed to parse CloudEvents envelope JSON: {0}")]
    InvalidJson(#[source] serde_json::Error),

    #[error("envelope specversion {0:?} is not supported, expected \"1.0\"")]
    UnsupportedSpecVersion(String),

    #[error("envelope is missing required attribute {0:?}")]
    MissingAttribute(&'static str),

    #[error("envelope time attribute {0:?} is not a valid RFC-3339 timestamp")]
    InvalidTimestamp(String),

    #[error("no handler registered for message type {0:?}")]
    UnknownMessageType(String),

    #[error("failed to deserialize payload for message type {message_type:?}: {source}")]
    PayloadDeserialize {
        message_type: String,
        #[source]
        source: serde_json::Error,
    },
}

impl DecodeError {
    /// The message-type identifier, when the failure occurred after it was
    /// parsed out of the envelope. `None` for failures earlier in decoding
    /// (missing body, bad JSON, missing attributes).
    pub fn message_type(&self) -> Option<&str> {
        match self {
            DecodeError::UnknownMessageType(t) => Some(t),
            DecodeError::PayloadDeserialize { message_type, .. } => Some(message_type),
            _ => None,
        }
    }
}

/// Wraps the AWS SQS service error enum so the rest of the crate can classify
/// it as fatal or transient (§4.2) without depending on SDK internals at
/// every call site. The `Synthetic` variant exists so test doubles (the
/// fake SQS client) can produce classifiable errors without constructing a
/// real `aws_sdk_sqs::Error`.
#[derive(Debug, Error)]
pub enum SqsError {
    #[error(transparent)]
    Sdk(#[from] aws_sdk_sqs::Error),

    #[error("{code}: {message}")]
    Synthetic { code: String, message: String },
}

impl SqsError {
    /// The AWS error code, when the service reported one (e.g. `"QueueDoesNotExist"`).
    pub fn code(&self) -> Option<&str> {
        use aws_sdk_sqs::error::ProvideErrorMetadata;
        match self {
            SqsError::Sdk(e) => e.code(),
            SqsError::Synthetic { code, .. } => Some(code.as_str()),
        }
    }

    /// Construct a synthetic error carrying just an AWS error code, for use
    /// by test doubles that need to exercise classification logic.
    pub fn synthetic(code: impl Into<String>, message: impl Into<String>) -> Self {
        SqsError::Synthetic {
            code: code.into(),
            message: message.into(),
        }
    }
}

/// The outcome of classifying a runtime error: either the pump must stop
/// (`Fatal`) or the caller should back off and retry (`Transient`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Fatal,
    Transient,
}

/// Top-level error returned when the pump terminates. Only fatal SQS errors
/// and configuration errors ever surface here; handler failures and decode
/// errors are handled locally (§7).
#[derive(Debug, Error)]
pub enum PumpError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("fatal SQS error on queue {queue_url}: {source}")]
    FatalSqs {
        queue_url: String,
        #[source]
        source: SqsError,
    },
}
