//! # tiered-prompt-orchestrator
//!
//! Request orchestration in front of several LLM backends of differing
//! capability and cost.
//!
//! ## Architecture
//!
//! ```text
//! process(text)
//!   → validate → RateLimiter.admit → Cache.get ──hit──────────────────────────┐
//!                                        └─miss→ Classifier → ModelCatalog     │
//!                                                → RetryExecutor(GenerationPipeline)
//!                                                → Cache.put + history ────────┤
//!                                                                   GenerationResult
//! ```
//!
//! Every transition is published on the [`EventBus`]; rolling statistics are
//! derived from the interaction history by [`history::MetricsRecorder`].

// ── Lint policy ───────────────────────────────────────────────────────────
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![deny(clippy::todo)]
#![deny(missing_docs)]

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing_subscriber::EnvFilter;

pub mod config;
pub mod enhanced;
pub mod events;
pub mod history;
pub mod metrics;
pub mod orchestrator;
pub mod pipeline;
pub mod routing;
pub mod worker;

// Re-exports for convenience
pub use config::OrchestratorConfig;
pub use events::{Event, EventBus, EventKind, SubscriptionId};
pub use history::{InteractionRecord, MetricsSnapshot, Role};
pub use orchestrator::Orchestrator;
pub use routing::{Classification, Classifier, ModelCatalog, ModelDescriptor, ModelSelection, Tier};
pub use worker::{EchoWorker, ModelWorker, OpenAiWorker};

/// Initialise the global tracing subscriber.
///
/// Reads the `LOG_FORMAT` environment variable to choose output format:
/// - `"json"`: structured JSON output for log aggregators
/// - anything else (including unset): human-readable pretty output
///
/// Filter level is controlled by `RUST_LOG` (e.g. `RUST_LOG=info`).
///
/// # Errors
///
/// Returns [`OrchestratorError::Other`] if the global subscriber has already
/// been set (e.g. by a previous call or a test harness).
///
/// # Panics
///
/// This function never panics.
pub fn init_tracing() -> Result<(), OrchestratorError> {
    let format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| "pretty".to_string());

    let result = match format.as_str() {
        "json" => tracing_subscriber::fmt()
            .json()
            .with_env_filter(EnvFilter::from_default_env())
            .with_current_span(true)
            .with_span_list(true)
            .try_init(),
        _ => tracing_subscriber::fmt()
            .pretty()
            .with_env_filter(EnvFilter::from_default_env())
            .try_init(),
    };

    result.map_err(|e| OrchestratorError::Other(format!("tracing init failed: {e}")))
}

/// Top-level orchestrator errors.
///
/// Only [`InvalidInput`](Self::InvalidInput), [`RateLimited`](Self::RateLimited)
/// and [`RetryExhausted`](Self::RetryExhausted) cross the
/// [`Orchestrator::process`] boundary. [`Backend`](Self::Backend) is the
/// transient failure the retry executor works against.
#[derive(Error, Debug)]
pub enum OrchestratorError {
    /// The request text was empty or longer than the configured maximum.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The global admission window is full; the caller should retry later.
    #[error("rate limit exceeded")]
    RateLimited,

    /// A single backend round trip failed (transport, quota, or parse error).
    #[error("backend call failed: {0}")]
    Backend(String),

    /// A retried operation gave up: every attempt failed, or one failed with
    /// a non-retryable error.
    #[error("gave up after {attempts} attempt(s): {last_error}")]
    RetryExhausted {
        /// Number of attempts that were made.
        attempts: u32,
        /// The error returned by the final attempt.
        #[source]
        last_error: Box<OrchestratorError>,
    },

    /// A configuration value is missing or invalid (e.g., missing env var).
    ///
    /// Returned at construction time so that misconfiguration surfaces
    /// immediately rather than at the first request.
    #[error("configuration error: {0}")]
    ConfigError(String),

    /// Catch-all for errors that do not fit a specific variant.
    #[error("{0}")]
    Other(String),
}

impl OrchestratorError {
    /// Whether the retry executor should attempt the operation again.
    ///
    /// Only backend round-trip failures are transient.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Backend(_))
    }

    /// Stable, low-cardinality label for metrics and event payloads.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidInput(_) => "invalid_input",
            Self::RateLimited => "rate_limited",
            Self::Backend(_) => "backend",
            Self::RetryExhausted { .. } => "retry_exhausted",
            Self::ConfigError(_) => "config",
            Self::Other(_) => "other",
        }
    }
}

/// Per-result execution metrics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultMetrics {
    /// Wall time spent producing the result, in milliseconds.
    pub duration_ms: u64,
    /// Rough output size in tokens (see [`estimate_tokens`]).
    pub token_estimate: usize,
    /// `true` when the result was served from the response cache.
    pub cache_hit: bool,
    /// Number of failed attempts before the successful one.
    pub retry_count: u32,
}

/// The value returned to the caller of [`Orchestrator::process`], and the
/// payload stored in the response cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationResult {
    /// Generated response text.
    pub text: String,
    /// `false` only when self-review rejected the answer and the improvement
    /// step could not replace it.
    pub is_valid: bool,
    /// Tier the request was classified as.
    pub tier: Tier,
    /// Technologies or topics identified by the analysis stage (complex only).
    pub technologies: Vec<String>,
    /// Identifier of the backend model that produced the text.
    pub model_used: String,
    /// Execution metrics.
    pub metrics: ResultMetrics,
}

/// Estimate the token count of `text` at roughly four characters per token.
///
/// # Example
///
/// ```rust
/// use tiered_prompt_orchestrator::estimate_tokens;
/// assert_eq!(estimate_tokens(""), 0);
/// assert_eq!(estimate_tokens("hello"), 2);
/// ```
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(4)
}
