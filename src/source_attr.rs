//! Default `source` attribute computation (§6): resolves a CloudEvents
//! `source` URI from the deployment environment when a publisher hasn't been
//! given one explicitly. The consumer core never calls this on the decode
//! path; it exists so a pump can stamp a diagnostic default, mirroring the
//! teacher's `conf::aws_service_config` singleton-resolution shape.

use std::env;
use std::time::Duration;

const ECS_TASK_PATH: &str = "/task";

/// Resolve the default `source` attribute, trying each collaborator in turn
/// and falling back to DNS hostname (§6).
pub async fn resolve_source(suffix: Option<&str>) -> String {
    let base = if let Ok(function_name) = env::var("AWS_LAMBDA_FUNCTION_NAME") {
        format!("/AWSLambda/{function_name}")
    } else if let Some(from_ecs) = resolve_from_ecs_metadata().await {
        from_ecs
    } else if let Some(from_ec2) = resolve_from_ec2_metadata().await {
        from_ec2
    } else {
        format!("/DNSHostName/{}", hostname())
    };
    append_suffix(base, suffix)
}

fn append_suffix(base: String, suffix: Option<&str>) -> String {
    match suffix.map(str::trim).filter(|s| !s.is_empty()) {
        Some(suffix) => format!("{}/{}", base.trim_end_matches('/'), suffix),
        None => base,
    }
}

async fn resolve_from_ecs_metadata() -> Option<String> {
    let metadata_uri = env::var("ECS_CONTAINER_METADATA_URI").ok()?;
    let url = format!("{metadata_uri}{ECS_TASK_PATH}");
    let client = reqwest::Client::builder().timeout(Duration::from_millis(500)).build().ok()?;
    let body: serde_json::Value = client.get(&url).send().await.ok()?.json().await.ok()?;
    let cluster = body.get("Cluster")?.as_str()?;
    let task_arn = body.get("TaskARN")?.as_str()?;
    Some(format!("/AmazonECS/{cluster}/{task_arn}"))
}

async fn resolve_from_ec2_metadata() -> Option<String> {
    let client = reqwest::Client::builder().timeout(Duration::from_millis(500)).build().ok()?;
    let instance_id = client
        .get("http://169.254.169.254/latest/meta-data/instance-id")
        .send()
        .await
        .ok()?
        .text()
        .await
        .ok()?;
    if instance_id.trim().is_empty() {
        return None;
    }
    Some(format!("/AmazonEC2/{}", instance_id.trim()))
}

fn hostname() -> String {
    env::var("HOSTNAME")
        .or_else(|_| env::var("COMPUTERNAME"))
        .unwrap_or_else(|_| "unknown-host".to_string())
}
