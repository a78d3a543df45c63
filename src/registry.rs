//! Handler registry (§4.6, §9 "polymorphic handlers keyed by message-type
//! identifier"): a table lookup from a message-type identifier to a tagged
//! handler descriptor, not runtime type introspection.

use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;

use crate::envelope::{MessageEnvelope, RawEnvelope};
use crate::error::DecodeError;

/// The result of a single handler invocation (§4.6). Rust's `Result`
/// already distinguishes "handler threw" from "handler returned"; an `Err`
/// here plays the role of the distilled spec's thrown-exception path and is
/// treated as `Failed` by the invoker unless it is reclassified as fatal by
/// the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerStatus {
    Success,
    Failed,
}

/// User-implemented business logic for a single message type `T`.
///
/// A fresh handler is resolved per invocation via the factory held in the
/// registry (§4.6 step 1) — there is no shared mutable handler state unless
/// the implementation captures it explicitly (e.g. behind an `Arc`).
#[async_trait]
pub trait Handler<T>: Send + Sync {
    async fn handle(
        &self,
        envelope: &MessageEnvelope<T>,
        cancel: CancellationToken,
    ) -> anyhow::Result<HandlerStatus>;
}

/// Type-erased handler invocation, so the manager can dispatch without
/// knowing the payload type of any particular subscriber mapping.
#[async_trait]
pub trait DynHandler: Send + Sync {
    async fn invoke(
        &self,
        raw: &RawEnvelope,
        cancel: CancellationToken,
    ) -> Result<anyhow::Result<HandlerStatus>, DecodeError>;

    /// Name of the concrete handler type, attached to the telemetry span (§6).
    fn handler_type_name(&self) -> &'static str;
}

/// Binds a message-type identifier to a handler factory producing a handler
/// for payload type `T` (§3 SubscriberMapping). Deserializes `raw.data` into
/// `T` lazily, at invocation time, then calls the factory to get a fresh
/// handler instance.
struct SubscriberMapping<T, F> {
    factory: F,
    _marker: PhantomData<fn() -> T>,
}

#[async_trait]
impl<T, F, H> DynHandler for SubscriberMapping<T, F>
where
    T: DeserializeOwned + Send + Sync + 'static,
    F: Fn() -> H + Send + Sync,
    H: Handler<T> + 'static,
{
    async fn invoke(
        &self,
        raw: &RawEnvelope,
        cancel: CancellationToken,
    ) -> Result<anyhow::Result<HandlerStatus>, DecodeError> {
        let data: T =
            serde_json::from_value(raw.data.clone()).map_err(|source| DecodeError::PayloadDeserialize {
                message_type: raw.message_type.clone(),
                source,
            })?;
        let envelope = MessageEnvelope::from_raw(raw, data);
        let handler = (self.factory)();
        Ok(handler.handle(&envelope, cancel).await)
    }

    fn handler_type_name(&self) -> &'static str {
        std::any::type_name::<H>()
    }
}

/// Immutable, built-once mapping from message-type identifier to handler.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    mappings: HashMap<String, Arc<dyn DynHandler>>,
}

impl HandlerRegistry {
    pub fn builder() -> HandlerRegistryBuilder {
        HandlerRegistryBuilder::default()
    }

    pub fn resolve(&self, message_type: &str) -> Option<Arc<dyn DynHandler>> {
        self.mappings.get(message_type).cloned()
    }

    pub fn contains(&self, message_type: &str) -> bool {
        self.mappings.contains_key(message_type)
    }
}

#[derive(Default)]
pub struct HandlerRegistryBuilder {
    mappings: HashMap<String, Arc<dyn DynHandler>>,
}

impl HandlerRegistryBuilder {
    /// Register a handler factory for `message_type`. The factory is called
    /// once per message, producing a scoped handler instance (§4.6).
    pub fn register<T, F, H>(mut self, message_type: impl Into<String>, factory: F) -> Self
    where
        T: DeserializeOwned + Send + Sync + 'static,
        F: Fn() -> H + Send + Sync + 'static,
        H: Handler<T> + 'static,
    {
        let mapping = SubscriberMapping {
            factory,
            _marker: PhantomData,
        };
        self.mappings.insert(message_type.into(), Arc::new(mapping));
        self
    }

    pub fn build(self) -> HandlerRegistry {
        HandlerRegistry {
            mappings: self.mappings,
        }
    }
}
