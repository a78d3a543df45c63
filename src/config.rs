//! Per-subscription poller configuration (§3) and the process-wide polling
//! control token.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::error::{ConfigError, SqsError};

/// A user-overridable classifier deciding whether an [`SqsError`] is fatal
/// (stop the pump) or transient (back off and retry). Defaults to
/// [`crate::sqs::default_is_fatal`].
pub type FatalClassifier = Arc<dyn Fn(&SqsError) -> bool + Send + Sync>;

/// Per-subscription settings (§3). Constructed only through [`PollerConfig::builder`]
/// so the `heartbeat < threshold < timeout` invariant can never be violated
/// at runtime (§6 P6).
#[derive(Clone)]
pub struct PollerConfig {
    pub queue_url: String,
    pub max_concurrent: usize,
    pub visibility_timeout_seconds: u32,
    pub visibility_extension_threshold_seconds: u32,
    pub visibility_extension_heartbeat_seconds: u32,
    pub wait_time_seconds: u32,
    pub is_exception_fatal: FatalClassifier,
    /// How long the pump waits for in-flight records to drain on shutdown
    /// before abandoning them to visibility expiry (§4.3 Shutdown).
    pub shutdown_grace_period: Duration,
}

impl std::fmt::Debug for PollerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PollerConfig")
            .field("queue_url", &self.queue_url)
            .field("max_concurrent", &self.max_concurrent)
            .field("visibility_timeout_seconds", &self.visibility_timeout_seconds)
            .field(
                "visibility_extension_threshold_seconds",
                &self.visibility_extension_threshold_seconds,
            )
            .field(
                "visibility_extension_heartbeat_seconds",
                &self.visibility_extension_heartbeat_seconds,
            )
            .field("wait_time_seconds", &self.wait_time_seconds)
            .field("shutdown_grace_period", &self.shutdown_grace_period)
            .finish()
    }
}

impl PollerConfig {
    /// Is this a FIFO queue? Per §4.5, determined by the `.fifo` suffix on
    /// the queue URL.
    pub fn is_fifo(&self) -> bool {
        self.queue_url.ends_with(".fifo")
    }

    pub fn builder(queue_url: impl Into<String>) -> PollerConfigBuilder {
        PollerConfigBuilder::new(queue_url)
    }
}

/// Builder for [`PollerConfig`]; any invariant violation fails at `build()`
/// time rather than silently clamping (§3).
pub struct PollerConfigBuilder {
    queue_url: String,
    max_concurrent: usize,
    visibility_timeout_seconds: u32,
    visibility_extension_threshold_seconds: u32,
    visibility_extension_heartbeat_seconds: u32,
    wait_time_seconds: u32,
    is_exception_fatal: Option<FatalClassifier>,
    shutdown_grace_period: Duration,
}

impl PollerConfigBuilder {
    pub fn new(queue_url: impl Into<String>) -> Self {
        Self {
            queue_url: queue_url.into(),
            max_concurrent: 10,
            visibility_timeout_seconds: 30,
            visibility_extension_threshold_seconds: 5,
            visibility_extension_heartbeat_seconds: 1,
            wait_time_seconds: 20,
            is_exception_fatal: None,
            shutdown_grace_period: Duration::from_secs(30),
        }
    }

    pub fn max_concurrent(mut self, v: usize) -> Self {
        self.max_concurrent = v;
        self
    }

    pub fn visibility_timeout_seconds(mut self, v: u32) -> Self {
        self.visibility_timeout_seconds = v;
        self
    }

    pub fn visibility_extension_threshold_seconds(mut self, v: u32) -> Self {
        self.visibility_extension_threshold_seconds = v;
        self
    }

    pub fn visibility_extension_heartbeat_seconds(mut self, v: u32) -> Self {
        self.visibility_extension_heartbeat_seconds = v;
        self
    }

    pub fn wait_time_seconds(mut self, v: u32) -> Self {
        self.wait_time_seconds = v;
        self
    }

    pub fn is_exception_fatal<F>(mut self, f: F) -> Self
    where
        F: Fn(&SqsError) -> bool + Send + Sync + 'static,
    {
        self.is_exception_fatal = Some(Arc::new(f));
        self
    }

    pub fn shutdown_grace_period(mut self, d: Duration) -> Self {
        self.shutdown_grace_period = d;
        self
    }

    pub fn build(self) -> Result<PollerConfig, ConfigError> {
        if self.queue_url.trim().is_empty() {
            return Err(ConfigError::EmptyQueueUrl);
        }
        if self.max_concurrent < 1 {
            return Err(ConfigError::InvalidMaxConcurrent(self.max_concurrent));
        }
        if self.visibility_timeout_seconds > 43200 {
            return Err(ConfigError::InvalidVisibilityTimeout(
                self.visibility_timeout_seconds,
            ));
        }
        if self.wait_time_seconds > 20 {
            return Err(ConfigError::InvalidWaitTime(self.wait_time_seconds));
        }
        let (h, t, v) = (
            self.visibility_extension_heartbeat_seconds,
            self.visibility_extension_threshold_seconds,
            self.visibility_timeout_seconds,
        );
        if !(h > 0 && h < t && t < v) {
            return Err(ConfigError::InvalidHeartbeatOrdering {
                heartbeat: h,
                threshold: t,
                timeout: v,
            });
        }
        Ok(PollerConfig {
            queue_url: self.queue_url,
            max_concurrent: self.max_concurrent,
            visibility_timeout_seconds: self.visibility_timeout_seconds,
            visibility_extension_threshold_seconds: self.visibility_extension_threshold_seconds,
            visibility_extension_heartbeat_seconds: self.visibility_extension_heartbeat_seconds,
            wait_time_seconds: self.wait_time_seconds,
            is_exception_fatal: self
                .is_exception_fatal
                .unwrap_or_else(|| Arc::new(crate::sqs::default_is_fatal)),
            shutdown_grace_period: self.shutdown_grace_period,
        })
    }
}

/// Process-wide, user-mutable polling control (§3). Reads are lock-free;
/// writes take effect on the poller's next cycle.
#[derive(Clone)]
pub struct ControlToken {
    enabled: Arc<AtomicBool>,
    poll_wait_millis: Arc<AtomicU64>,
}

impl ControlToken {
    pub fn new(enabled: bool, poll_wait: Duration) -> Self {
        Self {
            enabled: Arc::new(AtomicBool::new(enabled)),
            poll_wait_millis: Arc::new(AtomicU64::new(poll_wait.as_millis() as u64)),
        }
    }

    pub fn enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    pub fn poll_wait(&self) -> Duration {
        Duration::from_millis(self.poll_wait_millis.load(Ordering::Relaxed))
    }

    pub fn enable(&self) {
        self.enabled.store(true, Ordering::Relaxed);
    }

    pub fn disable(&self) {
        self.enabled.store(false, Ordering::Relaxed);
    }

    pub fn set_poll_wait(&self, d: Duration) {
        self.poll_wait_millis.store(d.as_millis() as u64, Ordering::Relaxed);
    }
}

impl Default for ControlToken {
    fn default() -> Self {
        Self::new(true, Duration::from_millis(100))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_heartbeat_gte_threshold() {
        let err = PollerConfig::builder("https://example/q")
            .visibility_timeout_seconds(10)
            .visibility_extension_threshold_seconds(5)
            .visibility_extension_heartbeat_seconds(5)
            .build()
            .unwrap_err();
        assert_eq!(
            err,
            ConfigError::InvalidHeartbeatOrdering {
                heartbeat: 5,
                threshold: 5,
                timeout: 10
            }
        );
    }

    #[test]
    fn rejects_threshold_gte_timeout() {
        let err = PollerConfig::builder("https://example/q")
            .visibility_timeout_seconds(5)
            .visibility_extension_threshold_seconds(5)
            .visibility_extension_heartbeat_seconds(1)
            .build()
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidHeartbeatOrdering { .. }));
    }

    #[test]
    fn accepts_defaults() {
        let cfg = PollerConfig::builder("https://example/q").build().unwrap();
        assert_eq!(cfg.max_concurrent, 10);
        assert!(!cfg.is_fifo());
    }

    #[test]
    fn detects_fifo_queue_url() {
        let cfg = PollerConfig::builder("https://example/q.fifo").build().unwrap();
        assert!(cfg.is_fifo());
    }

    #[test]
    fn rejects_empty_queue_url() {
        assert_eq!(
            PollerConfig::builder("   ").build().unwrap_err(),
            ConfigError::EmptyQueueUrl
        );
    }

    #[test]
    fn rejects_zero_max_concurrent() {
        assert_eq!(
            PollerConfig::builder("https://example/q")
                .max_concurrent(0)
                .build()
                .unwrap_err(),
            ConfigError::InvalidMaxConcurrent(0)
        );
    }

    #[test]
    fn control_token_updates_are_visible() {
        let token = ControlToken::new(false, Duration::from_millis(50));
        assert!(!token.enabled());
        token.enable();
        assert!(token.enabled());
        token.set_poll_wait(Duration::from_millis(250));
        assert_eq!(token.poll_wait(), Duration::from_millis(250));
    }
}
