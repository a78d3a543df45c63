//! AWS client bootstrap (§10): a global, lazily-initialized SQS client,
//! mirroring the teacher's `conf::aws_service_config`/`client::init`
//! singleton dance, including the `AWS_ENDPOINT_URL` override used to point
//! at a local SQS emulator during development.

use std::env;

use aws_sdk_sqs::Client;
use once_cell::sync::OnceCell;

static CURRENT: OnceCell<Client> = OnceCell::new();

async fn load_sdk_config() -> aws_config::SdkConfig {
    match env::var("AWS_ENDPOINT_URL") {
        Ok(endpoint_url) => {
            let endpoint_url = if endpoint_url.starts_with("http://") || endpoint_url.starts_with("https://") {
                endpoint_url
            } else {
                format!("https://{endpoint_url}")
            };
            aws_config::from_env()
                .endpoint_url(endpoint_url)
                .region("us-east-1") // overridden endpoint makes the region mostly cosmetic
                .load()
                .await
        }
        Err(_) => aws_config::from_env().load().await,
    }
}

/// Initialize the global SQS client. Must be called once, before [`current`].
pub async fn init() -> anyhow::Result<()> {
    let sdk_config = load_sdk_config().await;
    let client = Client::new(&sdk_config);
    CURRENT
        .set(client)
        .map_err(|_| anyhow::anyhow!("aws_bootstrap::CURRENT was already initialized"))
}

/// Get the current SQS client, or panic if [`init`] hasn't run yet.
pub fn current() -> &'static Client {
    CURRENT.get().expect("aws_bootstrap is not initialized")
}
