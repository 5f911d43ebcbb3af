//! Request orchestration.
//!
//! [`Pipeline::execute`] wraps an opaque async operation with, innermost
//! first: error normalization (always), circuit breaking (when a breaker
//! name is given), retry (unless disabled), and deduplication (when a dedupe
//! key is given). The order matters: deduplication wraps retry so concurrent
//! duplicate calls share one retry sequence, and the breaker sits inside
//! retry so every attempt is gated and the circuit can open mid-sequence.
//!
//! Terminal failures are surfaced through the notification sink unless the
//! call is marked silent.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{error, warn};

use crate::breaker::{BreakerConfig, BreakerSnapshot, CircuitBreaker, CircuitBreakers};
use crate::correlation::CorrelationContext;
use crate::dedupe::Deduplicator;
use crate::error::{DomainError, Failure, Result, Severity};
use crate::retry::{retry_async, RetryPolicy};

/// A user-facing notification for a surfaced failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub text: String,
    pub severity: Severity,
    /// Suggested display duration; critical failures stay up longer.
    pub duration: Duration,
}

/// Swappable sink for user-facing notifications (a toast system in the
/// dashboard; a log forwarder by default).
#[async_trait]
pub trait Notify: Send + Sync {
    async fn notify(&self, notice: Notice);
}

/// Default sink that forwards notices to the log.
#[derive(Debug, Default)]
pub struct TracingNotifier;

#[async_trait]
impl Notify for TracingNotifier {
    async fn notify(&self, notice: Notice) {
        warn!(severity = ?notice.severity, "{}", notice.text);
    }
}

/// Per-call execution options.
#[derive(Debug, Clone)]
pub struct RequestOptions {
    pub retry: bool,
    pub retry_policy: Option<RetryPolicy>,
    pub breaker: Option<String>,
    pub dedupe_key: Option<String>,
    /// How long a settled deduplicated result remains joinable.
    pub dedupe_ttl: Duration,
    /// Suppress the user-facing notification (logging still happens).
    pub silent: bool,
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self {
            retry: true,
            retry_policy: None,
            breaker: None,
            dedupe_key: None,
            dedupe_ttl: Duration::from_secs(5),
            silent: false,
        }
    }
}

impl RequestOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn no_retry(mut self) -> Self {
        self.retry = false;
        self
    }

    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = Some(policy);
        self
    }

    pub fn breaker(mut self, name: impl Into<String>) -> Self {
        self.breaker = Some(name.into());
        self
    }

    pub fn dedupe(mut self, key: impl Into<String>) -> Self {
        self.dedupe_key = Some(key.into());
        self
    }

    pub fn dedupe_ttl(mut self, ttl: Duration) -> Self {
        self.dedupe_ttl = ttl;
        self
    }

    pub fn silent(mut self) -> Self {
        self.silent = true;
        self
    }
}

/// The composition root: owns the breaker registry, pending-request map,
/// correlation context, and notification sink. Cheap to clone; clones share
/// all state.
#[derive(Clone)]
pub struct Pipeline {
    breakers: Arc<CircuitBreakers>,
    deduplicator: Arc<Deduplicator>,
    correlation: Arc<CorrelationContext>,
    notifier: Arc<dyn Notify>,
    default_policy: RetryPolicy,
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl Pipeline {
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::default()
    }

    pub fn new() -> Self {
        Self::default()
    }

    /// Execute an operation through the configured pipeline stages.
    pub async fn execute<T, F, Fut>(&self, operation: F, options: RequestOptions) -> Result<T>
    where
        T: Clone + Send + Sync + 'static,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<T, Failure>> + Send + 'static,
    {
        let silent = options.silent;
        let outcome = match options.dedupe_key.clone() {
            Some(key) => {
                let this = self.clone();
                let ttl = options.dedupe_ttl;
                self.deduplicator
                    .dedupe(&key, ttl, move || run(this, operation, options))
                    .await
            }
            None => run(self.clone(), operation, options).await,
        };

        match outcome {
            Ok(value) => Ok(value),
            Err(error) => {
                self.handle_error(&error, silent).await;
                Err(error)
            }
        }
    }

    /// Log a terminal failure and, unless silenced, emit a user-facing
    /// notice combining message and hint.
    async fn handle_error(&self, error: &DomainError, silent: bool) {
        if error.severity >= Severity::High {
            error!(
                code = %error.code,
                status = ?error.status,
                trace_id = ?error.trace_id,
                retryable = error.retryable,
                "{}",
                error.message
            );
        } else {
            warn!(code = %error.code, status = ?error.status, "{}", error.message);
        }

        if silent {
            return;
        }

        let text = match &error.hint {
            Some(hint) => format!("{} {}", error.message, hint),
            None => error.message.clone(),
        };
        let duration = if error.severity == Severity::Critical {
            Duration::from_secs(10)
        } else {
            Duration::from_secs(5)
        };
        self.notifier
            .notify(Notice {
                text,
                severity: error.severity,
                duration,
            })
            .await;
    }

    pub fn correlation_id(&self) -> String {
        self.correlation.get()
    }

    /// Start a fresh correlation id (navigation boundary).
    pub fn reset_correlation_id(&self) -> String {
        self.correlation.reset()
    }

    /// Introspection over every breaker created so far.
    pub fn breaker_snapshots(&self) -> Vec<BreakerSnapshot> {
        self.breakers.snapshots()
    }

    /// Direct handle to a named breaker, for maintenance surfaces.
    pub fn breaker(&self, name: &str) -> Arc<CircuitBreaker> {
        self.breakers.get_or_create(name)
    }
}

/// One full normalize → breaker → retry pass for a single logical request.
/// Deduplication, when requested, wraps this whole function.
async fn run<T, F, Fut>(pipeline: Pipeline, operation: F, options: RequestOptions) -> Result<T>
where
    T: Send + 'static,
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = std::result::Result<T, Failure>> + Send,
{
    let policy = options
        .retry_policy
        .unwrap_or_else(|| pipeline.default_policy.clone());
    let breaker = options
        .breaker
        .as_deref()
        .map(|name| pipeline.breakers.get_or_create(name));
    let correlation_id = pipeline.correlation.get();

    let attempt = || {
        let correlation_id = correlation_id.clone();
        let breaker = breaker.clone();
        let op = &operation;
        async move {
            let normalized = || async move { op().await.map_err(DomainError::normalize) };
            let outcome = match breaker {
                Some(breaker) => breaker.call(normalized).await,
                None => normalized().await,
            };
            // Tag after the breaker so fail-fast rejections carry the id
            // just like normalized operation failures.
            outcome.map_err(|error| {
                error.with_context("correlation_id", Value::String(correlation_id))
            })
        }
    };

    if options.retry {
        retry_async(attempt, &policy).await
    } else {
        attempt().await
    }
}

/// Builder for [`Pipeline`].
#[derive(Default)]
pub struct PipelineBuilder {
    breaker_config: BreakerConfig,
    default_policy: RetryPolicy,
    notifier: Option<Arc<dyn Notify>>,
}

impl PipelineBuilder {
    pub fn breaker_config(mut self, config: BreakerConfig) -> Self {
        self.breaker_config = config;
        self
    }

    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.default_policy = policy;
        self
    }

    pub fn notifier(mut self, notifier: Arc<dyn Notify>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn build(self) -> Pipeline {
        Pipeline {
            breakers: Arc::new(CircuitBreakers::new(self.breaker_config)),
            deduplicator: Arc::new(Deduplicator::new()),
            correlation: Arc::new(CorrelationContext::new()),
            notifier: self
                .notifier
                .unwrap_or_else(|| Arc::new(TracingNotifier)),
            default_policy: self.default_policy,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Notifier capturing notices for assertions.
    #[derive(Default)]
    struct CaptureNotifier {
        notices: Mutex<Vec<Notice>>,
    }

    #[async_trait]
    impl Notify for CaptureNotifier {
        async fn notify(&self, notice: Notice) {
            self.notices.lock().unwrap().push(notice);
        }
    }

    fn pipeline_with_capture() -> (Pipeline, Arc<CaptureNotifier>) {
        let capture = Arc::new(CaptureNotifier::default());
        let pipeline = Pipeline::builder()
            .retry_policy(RetryPolicy::new(0))
            .notifier(capture.clone())
            .build();
        (pipeline, capture)
    }

    #[tokio::test]
    async fn successful_operation_passes_value_through() {
        let pipeline = Pipeline::new();
        let result = pipeline
            .execute(
                || async { Ok::<_, Failure>("hello".to_string()) },
                RequestOptions::default(),
            )
            .await;
        assert_eq!(result.unwrap(), "hello");
    }

    #[tokio::test]
    async fn failures_are_normalized_and_tagged_with_correlation_id() {
        let (pipeline, _) = pipeline_with_capture();
        let expected = pipeline.correlation_id();

        let error = pipeline
            .execute(
                || async { Err::<(), _>(Failure::response(404)) },
                RequestOptions::default(),
            )
            .await
            .unwrap_err();

        assert_eq!(error.code, ErrorCode::NotFound);
        assert_eq!(
            error.context.get("correlation_id"),
            Some(&Value::String(expected))
        );
    }

    #[tokio::test]
    async fn notice_combines_message_and_hint() {
        let (pipeline, capture) = pipeline_with_capture();

        let _ = pipeline
            .execute(
                || async { Err::<(), _>(Failure::transport("offline")) },
                RequestOptions::new().no_retry(),
            )
            .await;

        let notices = capture.notices.lock().unwrap();
        assert_eq!(notices.len(), 1);
        assert_eq!(
            notices[0].text,
            "Network request failed Check your connection and try again."
        );
        assert_eq!(notices[0].severity, Severity::Medium);
        assert_eq!(notices[0].duration, Duration::from_secs(5));
    }

    #[tokio::test]
    async fn silent_option_suppresses_notification() {
        let (pipeline, capture) = pipeline_with_capture();

        let _ = pipeline
            .execute(
                || async { Err::<(), _>(Failure::response(500)) },
                RequestOptions::new().no_retry().silent(),
            )
            .await;

        assert!(capture.notices.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn critical_failures_get_a_longer_display_duration() {
        let (pipeline, capture) = pipeline_with_capture();

        let _ = pipeline
            .execute(
                || async {
                    Err::<(), _>(Failure::Domain(
                        DomainError::new(ErrorCode::QuotaExceeded, "out of credits")
                            .severity(Severity::Critical),
                    ))
                },
                RequestOptions::new().no_retry(),
            )
            .await;

        let notices = capture.notices.lock().unwrap();
        assert_eq!(notices[0].duration, Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn retry_is_applied_by_default() {
        let capture = Arc::new(CaptureNotifier::default());
        let pipeline = Pipeline::builder()
            .retry_policy(RetryPolicy::new(2).base_delay(Duration::from_millis(1)))
            .notifier(capture)
            .build();

        let attempts = Arc::new(AtomicUsize::new(0));
        let calls = attempts.clone();
        let result = pipeline
            .execute(
                move || {
                    let calls = calls.clone();
                    async move {
                        if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                            Err(Failure::response(503))
                        } else {
                            Ok(1u8)
                        }
                    }
                },
                RequestOptions::default(),
            )
            .await;

        assert_eq!(result.unwrap(), 1);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn no_retry_disables_the_retry_stage() {
        let (pipeline, _) = pipeline_with_capture();
        let attempts = Arc::new(AtomicUsize::new(0));
        let calls = attempts.clone();

        let _ = pipeline
            .execute(
                move || {
                    let calls = calls.clone();
                    async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        Err::<(), _>(Failure::response(503))
                    }
                },
                RequestOptions::new().no_retry().silent(),
            )
            .await;

        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }
}
