//! Lambda event-source entry point, analogous to the teacher's own
//! `bin/lambda-bootstrap.rs`: wraps [`sqs_message_pump::lambda::handle_batch`]
//! in a `lambda_runtime::service_fn`.

use anyhow::{anyhow, Result};
use aws_lambda_events::event::sqs::SqsEventObj;
use lambda_runtime::{run, service_fn, LambdaEvent};
use serde::Deserialize;
use sqs_message_pump::envelope::MessageEnvelope;
use sqs_message_pump::lambda::handle_batch;
use sqs_message_pump::registry::{Handler, HandlerRegistry, HandlerStatus};
use tokio_util::sync::CancellationToken;
use tracing::info;

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

async fn function_handler(
    event: LambdaEvent<SqsEventObj<serde_json::Value>>,
    registry: &HandlerRegistry,
) -> Result<aws_lambda_events::event::sqs::SqsBatchResponse> {
    Ok(handle_batch(event.payload, registry, CancellationToken::new()).await)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .with_target(false)
        .without_time()
        .init();

    let registry = HandlerRegistry::builder().register("greeting", || LogGreetingHandler).build();

    run(service_fn(|event| {
        let registry = &registry;
        async move { function_handler(event, registry).await }
    }))
    .await
    .map_err(|e| anyhow!("{:?}", e))
}
