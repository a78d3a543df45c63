//! Example host process wiring a [`sqs_message_pump::pump::MessagePump`]
//! against a real SQS queue, analogous to the teacher's own
//! `bin/sqs-consumer.rs` cycle-and-ctrl-c loop.

use std::sync::Arc;

use anyhow::{Context, Result};
use serde::Deserialize;
use sqs_message_pump::aws_bootstrap;
use sqs_message_pump::config::ControlToken;
use sqs_message_pump::envelope::MessageEnvelope;
use sqs_message_pump::pump::MessagePump;
use sqs_message_pump::registry::{Handler, HandlerRegistry, HandlerStatus};
use sqs_message_pump::settings::Settings;
use sqs_message_pump::sqs::AwsSqsClient;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Example payload for a `"greeting"` message type.
#[derive(Debug, Deserialize)]
struct Greeting {
    name: String,
}

struct LogGreetingHandler;

#[async_trait::async_trait]
impl Handler<Greeting> for LogGreetingHandler {
    async fn handle(&self, envelope: &MessageEnvelope<Greeting>, _cancel: CancellationToken) -> Result<HandlerStatus> {
        info!(name = %envelope.data.name, message_id = %envelope.id, "received greeting");
        Ok(HandlerStatus::Success)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .with_target(false)
        .without_time()
        .init();

    let settings = Settings::from_env().context("failed to load settings")?;
    aws_bootstrap::init().await.context("failed to initialize AWS SQS client")?;

    let config = Arc::new(settings.poller_config().context("invalid poller configuration")?);
    let registry = HandlerRegistry::builder().register("greeting", || LogGreetingHandler).build();
    let sqs = Arc::new(AwsSqsClient::new(aws_bootstrap::current().clone()));

    let pump = MessagePump::builder(sqs)
        .subscribe(config, registry)
        .control_token(ControlToken::default())
        .build();
    let shutdown = pump.shutdown_handle();

    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        info!("received shutdown signal");
        shutdown.cancel();
    });

    pump.run().await.context("message pump terminated with a fatal error")
}
