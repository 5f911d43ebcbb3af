//! # Palisade
//!
//! A resilience and validation layer for clients of flaky backends. Every
//! outbound operation runs through one pipeline that normalizes failures into
//! a closed error taxonomy, fails fast through per-endpoint circuit breakers,
//! retries transient errors with jittered exponential backoff, and collapses
//! concurrent identical requests into a single execution.
//!
//! ## Core Concepts
//!
//! - **DomainError**: the single error currency; transport failures, HTTP
//!   responses, and plain messages all normalize into it
//! - **Pipeline**: composes normalization, circuit breaking, retry, and
//!   deduplication around any async operation, then routes failures to logs
//!   and user notifications
//! - **Schema**: composable validators with fail-fast primitives and
//!   aggregate-everything compound shapes
//! - **Guard**: HTML escaping, prompt-injection screening, and sliding-window
//!   rate limiting for untrusted input
//!
//! ## Getting Started
//!
//! ```rust,no_run
//! use palisade::{Failure, Pipeline, RequestOptions};
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
//! let pipeline = Pipeline::builder().build();
//!
//! let options = RequestOptions::new()
//!     .breaker("agents-api")
//!     .dedupe("list-agents")
//!     .dedupe_ttl(Duration::from_secs(5));
//!
//! let agents: Vec<String> = pipeline
//!     .execute(
//!         || async {
//!             // Any async call that can fail; return Failure for transport
//!             // or HTTP errors and they normalize automatically.
//!             Ok::<_, Failure>(vec!["triage-bot".to_string()])
//!         },
//!         options,
//!     )
//!     .await?;
//! # Ok(())
//! # }
//! ```

pub mod breaker;
pub mod correlation;
pub mod dedupe;
pub mod error;
pub mod guard;
pub mod pipeline;
pub mod retry;
pub mod schema;

// Public re-exports for convenience
pub use breaker::{
    BreakerConfig, BreakerSnapshot, CircuitBreaker, CircuitBreakers, CircuitState,
};
pub use correlation::CorrelationContext;
pub use dedupe::Deduplicator;
pub use error::{DomainError, ErrorBody, ErrorCode, Failure, Result, Severity};
pub use guard::{
    sanitize_html, InjectionDetector, InjectionReport, RateLimitDecision, RateLimiter, RiskLevel,
};
pub use pipeline::{
    Notice, Notify, Pipeline, PipelineBuilder, RequestOptions, TracingNotifier,
};
pub use retry::{retry_async, RetryPolicy};
pub use schema::{FieldError, Validated, Validator};
