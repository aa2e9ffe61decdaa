//! # Orchestrator Configuration
//!
//! ## Responsibility
//! Parse and validate TOML configuration for an [`Orchestrator`](crate::Orchestrator):
//! the model catalog, input bounds, cache, rate limit, retry and history
//! settings.
//!
//! ## Guarantees
//! - Deterministic: same TOML input always produces the same `OrchestratorConfig`
//! - Complete defaults: an empty file yields the reference configuration
//! - Validated: all semantic constraints are checked before a config is accepted
//! - Schema-exportable: JSON Schema output enables IDE autocomplete
//!
//! ## NOT Responsible For
//! - Building the runtime components (that belongs to `orchestrator`)
//! - Backend credentials (that belongs to `worker`)
//!
//! ## Example
//!
//! ```toml
//! [assistant]
//! name = "Aria"
//!
//! [[models]]
//! identifier = "gpt-4o-mini"
//! tier = "simple"
//! temperature = 0.7
//! max_output_tokens = 256
//!
//! [rate_limit]
//! max_requests = 50
//! window_secs = 60
//! ```

pub mod loader;
pub mod validation;

pub use loader::{load_from_file, load_from_str};
pub use validation::{validate, ConfigError};

use std::time::Duration;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::enhanced::RetryPolicy;
use crate::routing::{reference_descriptors, ModelDescriptor};

// ── Default value functions ──────────────────────────────────────────────

fn default_assistant_name() -> String {
    "Aria".to_string()
}

/// Default maximum request length: 8000 characters.
fn default_max_length() -> usize {
    8000
}

/// Default cache TTL: one hour.
fn default_ttl_secs() -> u64 {
    3600
}

/// Default sweep interval: five minutes.
fn default_sweep_interval_secs() -> u64 {
    300
}

fn default_max_entries() -> usize {
    1000
}

fn default_max_requests() -> u32 {
    100
}

fn default_window_secs() -> u64 {
    60
}

fn default_min_spacing_ms() -> u64 {
    100
}

fn default_max_attempts() -> u32 {
    3
}

/// Default retry base delay: 1000ms (so 1s, 2s, 4s).
fn default_base_delay_ms() -> u64 {
    1000
}

fn default_max_records() -> usize {
    10_000
}

// ── Top-level config ─────────────────────────────────────────────────────

/// Root configuration for an orchestrator instance.
///
/// Every section and field has a default, so a partial file only needs to
/// name what it changes.
///
/// # Panics
///
/// This type never panics during construction or access.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Assistant identity used in prompts.
    pub assistant: AssistantConfig,
    /// Model catalog, at most one descriptor per tier.
    pub models: Vec<ModelDescriptor>,
    /// Request validation bounds.
    pub input: InputConfig,
    /// Response cache settings.
    pub cache: CacheConfig,
    /// Global admission control.
    pub rate_limit: RateLimitConfig,
    /// Retry policy for backend calls.
    pub retry: RetryConfig,
    /// Interaction history bound.
    pub history: HistoryConfig,
}

/// The reference configuration: three tiers, default limits.
impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            assistant: AssistantConfig::default(),
            models: reference_descriptors(),
            input: InputConfig::default(),
            cache: CacheConfig::default(),
            rate_limit: RateLimitConfig::default(),
            retry: RetryConfig::default(),
            history: HistoryConfig::default(),
        }
    }
}

// ── Sections ─────────────────────────────────────────────────────────────

/// Assistant identity.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(default)]
pub struct AssistantConfig {
    /// Name the assistant introduces itself with.
    pub name: String,
}

impl Default for AssistantConfig {
    fn default() -> Self {
        Self {
            name: default_assistant_name(),
        }
    }
}

/// Request validation bounds.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(default)]
pub struct InputConfig {
    /// Maximum request length in characters.
    pub max_length: usize,
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            max_length: default_max_length(),
        }
    }
}

/// Response cache settings.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(default)]
pub struct CacheConfig {
    /// Lifetime of a cached response, in seconds.
    pub ttl_secs: u64,
    /// Period of the background sweep, in seconds.
    pub sweep_interval_secs: u64,
    /// Maximum live entries; `0` means unbounded.
    pub max_entries: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_ttl_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
            max_entries: default_max_entries(),
        }
    }
}

impl CacheConfig {
    /// Entry lifetime as a [`Duration`].
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    /// Sweep period as a [`Duration`].
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

/// Global admission control.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Admissions allowed per window.
    pub max_requests: u32,
    /// Window length, in seconds.
    pub window_secs: u64,
    /// Delay after every admission, in milliseconds.
    pub min_spacing_ms: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: default_max_requests(),
            window_secs: default_window_secs(),
            min_spacing_ms: default_min_spacing_ms(),
        }
    }
}

impl RateLimitConfig {
    /// Window length as a [`Duration`].
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }

    /// Minimum spacing as a [`Duration`].
    pub fn min_spacing(&self) -> Duration {
        Duration::from_millis(self.min_spacing_ms)
    }
}

/// Retry policy for backend calls.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts including the first.
    pub max_attempts: u32,
    /// Backoff after the first failure, in milliseconds; doubles each time.
    pub base_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
        }
    }
}

impl RetryConfig {
    /// The equivalent [`RetryPolicy`].
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy::exponential(self.max_attempts, Duration::from_millis(self.base_delay_ms))
    }
}

/// Interaction history bound.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(default)]
pub struct HistoryConfig {
    /// Maximum records kept; `0` means unbounded.
    pub max_records: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            max_records: default_max_records(),
        }
    }
}

/// Export the JSON Schema for [`OrchestratorConfig`] as a pretty-printed string.
///
/// # Errors
///
/// Returns `serde_json::Error` if schema serialization fails (should not
/// happen with well-formed derive macros).
///
/// # Panics
///
/// This function never panics.
pub fn json_schema() -> Result<String, serde_json::Error> {
    let schema = schemars::schema_for!(OrchestratorConfig);
    serde_json::to_string_pretty(&schema)
}
