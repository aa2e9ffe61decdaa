//! Configuration validation engine.
//!
//! ## Responsibility
//! Validate semantic constraints on a parsed [`OrchestratorConfig`] that
//! cannot be expressed through the type system alone (range checks,
//! uniqueness across the model list).
//!
//! ## Guarantees
//! - Every validation rule has at least one test that triggers it
//! - Validation collects *all* errors before returning (no short-circuit)
//! - Error messages include the field path and the invalid value
//!
//! ## NOT Responsible For
//! - Parsing TOML (that belongs to `loader`)
//! - File I/O (that belongs to `loader`)

use std::collections::HashSet;

use super::OrchestratorConfig;
use crate::OrchestratorError;

/// Errors arising from configuration parsing, validation, or I/O.
///
/// # Panics
///
/// This type never panics.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// TOML parsing failed.
    #[error("Parse error in {file}: {source}")]
    Parse {
        /// Path of the file that failed to parse.
        file: String,
        /// Underlying TOML deserialization error.
        #[source]
        source: toml::de::Error,
    },

    /// One or more semantic validation rules failed.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// A specific field has an out-of-range or contradictory value.
    #[error("Field '{field}' has invalid value {value}: {reason}")]
    InvalidField {
        /// Dot-separated field path (e.g., "rate_limit.window_secs").
        field: String,
        /// String representation of the invalid value.
        value: String,
        /// Human-readable explanation of the constraint.
        reason: String,
    },

    /// File I/O error.
    #[error("IO error reading {file}: {source}")]
    Io {
        /// Path of the file that could not be read.
        file: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

impl From<ConfigError> for OrchestratorError {
    fn from(e: ConfigError) -> Self {
        OrchestratorError::ConfigError(e.to_string())
    }
}

fn must_be_positive(errors: &mut Vec<ConfigError>, field: &str, value: u64, reason: &str) {
    if value == 0 {
        errors.push(ConfigError::InvalidField {
            field: field.into(),
            value: "0".into(),
            reason: reason.into(),
        });
    }
}

/// Validate all semantic constraints on an [`OrchestratorConfig`].
///
/// Collects every violation before returning so the caller sees the full
/// scope of issues at once.
///
/// # Returns
///
/// - `Ok(())` if all constraints pass.
/// - `Err(Vec<ConfigError>)` with every violation found.
///
/// # Panics
///
/// This function never panics.
pub fn validate(config: &OrchestratorConfig) -> Result<(), Vec<ConfigError>> {
    let mut errors = Vec::new();

    // ── Assistant ────────────────────────────────────────────────────
    if config.assistant.name.trim().is_empty() {
        errors.push(ConfigError::InvalidField {
            field: "assistant.name".into(),
            value: String::new(),
            reason: "assistant name must not be empty".into(),
        });
    }

    // ── Model catalog ────────────────────────────────────────────────
    if config.models.is_empty() {
        errors.push(ConfigError::InvalidField {
            field: "models".into(),
            value: "[]".into(),
            reason: "at least one model must be configured".into(),
        });
    }

    let mut tiers = HashSet::new();
    let mut identifiers = HashSet::new();
    for (i, model) in config.models.iter().enumerate() {
        if model.identifier.trim().is_empty() {
            errors.push(ConfigError::InvalidField {
                field: format!("models[{i}].identifier"),
                value: String::new(),
                reason: "model identifier must not be empty".into(),
            });
        } else if !identifiers.insert(model.identifier.as_str()) {
            errors.push(ConfigError::InvalidField {
                field: format!("models[{i}].identifier"),
                value: model.identifier.clone(),
                reason: "model identifier is declared more than once".into(),
            });
        }

        if !tiers.insert(model.tier) {
            errors.push(ConfigError::InvalidField {
                field: format!("models[{i}].tier"),
                value: model.tier.to_string(),
                reason: "each tier may be served by at most one model".into(),
            });
        }

        if !(0.0..=2.0).contains(&model.temperature) {
            errors.push(ConfigError::InvalidField {
                field: format!("models[{i}].temperature"),
                value: model.temperature.to_string(),
                reason: "must be between 0.0 and 2.0".into(),
            });
        }

        must_be_positive(
            &mut errors,
            &format!("models[{i}].max_output_tokens"),
            u64::from(model.max_output_tokens),
            "must be at least 1",
        );
    }

    // ── Input ────────────────────────────────────────────────────────
    must_be_positive(
        &mut errors,
        "input.max_length",
        config.input.max_length as u64,
        "must be at least 1 character",
    );

    // ── Cache ────────────────────────────────────────────────────────
    must_be_positive(
        &mut errors,
        "cache.ttl_secs",
        config.cache.ttl_secs,
        "must be at least 1 second",
    );
    must_be_positive(
        &mut errors,
        "cache.sweep_interval_secs",
        config.cache.sweep_interval_secs,
        "must be at least 1 second",
    );

    // ── Rate limit ───────────────────────────────────────────────────
    must_be_positive(
        &mut errors,
        "rate_limit.max_requests",
        u64::from(config.rate_limit.max_requests),
        "must be at least 1",
    );
    must_be_positive(
        &mut errors,
        "rate_limit.window_secs",
        config.rate_limit.window_secs,
        "must be at least 1 second",
    );

    // ── Retry ────────────────────────────────────────────────────────
    must_be_positive(
        &mut errors,
        "retry.max_attempts",
        u64::from(config.retry.max_attempts),
        "must be at least 1",
    );

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
