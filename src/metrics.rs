//! Prometheus metrics for the orchestrator.
//!
//! ## Usage
//!
//! Call [`init_metrics`] once at process startup. The helper functions
//! (`inc_request`, `inc_cache_lookup`, …) are no-ops if `init_metrics` was
//! never called, so the orchestrator is always safe to run and observability
//! simply degrades gracefully.
//!
//! These series complement the event stream: events describe individual
//! requests, the counters here aggregate them for scraping.
//!
//! ## Metrics Exposed
//!
//! | Name | Type | Labels |
//! |------|------|--------|
//! | `orchestrator_requests_total` | Counter | `tier` |
//! | `orchestrator_errors_total` | Counter | `kind` |
//! | `orchestrator_backend_calls_total` | Counter | `stage` |
//! | `orchestrator_cache_lookups_total` | Counter | `outcome` |
//! | `orchestrator_request_duration_seconds` | Histogram | `tier` |

use crate::OrchestratorError;
use prometheus::{
    core::Collector, CounterVec, Encoder, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder,
};
use std::collections::HashMap;
use std::sync::OnceLock;
use std::time::Duration;

// ── Internal metrics bundle ────────────────────────────────────────────────

/// All Prometheus metrics for the orchestrator, bundled together so they can
/// be stored in a single [`OnceLock`] and initialised atomically.
pub struct Metrics {
    /// Prometheus registry that owns all metric descriptors.
    pub registry: Registry,
    /// Requests that reached the pipeline, per tier.
    pub requests_total: CounterVec,
    /// Requests that failed, per error kind.
    pub errors_total: CounterVec,
    /// Backend round trips, per pipeline stage.
    pub backend_calls: CounterVec,
    /// Cache lookups, per outcome (`hit` / `miss`).
    pub cache_lookups: CounterVec,
    /// End-to-end latency of uncached requests, per tier.
    pub request_duration: HistogramVec,
}

static METRICS: OnceLock<Metrics> = OnceLock::new();

// ── Initialisation ─────────────────────────────────────────────────────────

fn counter_vec(
    registry: &Registry,
    name: &str,
    help: &str,
    label: &str,
) -> Result<CounterVec, OrchestratorError> {
    let counter = CounterVec::new(Opts::new(name, help), &[label])
        .map_err(|e| OrchestratorError::Other(format!("metrics init failed: {e}")))?;
    registry
        .register(Box::new(counter.clone()))
        .map_err(|e| OrchestratorError::Other(format!("metrics registration failed: {e}")))?;
    Ok(counter)
}

fn build_metrics(prefix: &str) -> Result<Metrics, OrchestratorError> {
    let registry = Registry::new();

    let requests_total = counter_vec(
        &registry,
        &format!("{prefix}_requests_total"),
        "Requests routed to a tier",
        "tier",
    )?;
    let errors_total = counter_vec(
        &registry,
        &format!("{prefix}_errors_total"),
        "Failed requests by error kind",
        "kind",
    )?;
    let backend_calls = counter_vec(
        &registry,
        &format!("{prefix}_backend_calls_total"),
        "Backend round trips by pipeline stage",
        "stage",
    )?;
    let cache_lookups = counter_vec(
        &registry,
        &format!("{prefix}_cache_lookups_total"),
        "Response cache lookups by outcome",
        "outcome",
    )?;

    let request_duration = HistogramVec::new(
        HistogramOpts::new(
            format!("{prefix}_request_duration_seconds"),
            "End-to-end duration of uncached requests",
        )
        .buckets(vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0]),
        &["tier"],
    )
    .map_err(|e| OrchestratorError::Other(format!("metrics init failed: {e}")))?;
    registry
        .register(Box::new(request_duration.clone()))
        .map_err(|e| OrchestratorError::Other(format!("metrics registration failed: {e}")))?;

    Ok(Metrics {
        registry,
        requests_total,
        errors_total,
        backend_calls,
        cache_lookups,
        request_duration,
    })
}

/// Initialise all Prometheus metrics and register them with a private registry.
///
/// Calling it a second time is a no-op (returns `Ok(())`).
///
/// # Errors
///
/// Returns [`OrchestratorError::Other`] if metric construction or registry
/// registration fails (e.g., duplicate descriptor names).
///
/// # Panics
///
/// This function never panics.
pub fn init_metrics() -> Result<(), OrchestratorError> {
    if METRICS.get().is_some() {
        return Ok(());
    }

    let bundle = build_metrics("orchestrator")?;

    // A racing initialiser builds identical descriptors; first one wins.
    let _ = METRICS.set(bundle);

    Ok(())
}

/// Return a reference to the initialised [`Metrics`], or `None` if
/// [`init_metrics`] has not been called yet.
fn metrics() -> Option<&'static Metrics> {
    METRICS.get()
}

fn inc(counter: &CounterVec, label: &str) {
    if let Ok(c) = counter.get_metric_with_label_values(&[label]) {
        c.inc();
    }
}

// ── Public helper functions ────────────────────────────────────────────────

/// Increment the request counter for a tier.
///
/// No-op if metrics have not been initialised.
///
/// # Panics
///
/// This function never panics.
pub fn inc_request(tier: &str) {
    if let Some(m) = metrics() {
        inc(&m.requests_total, tier);
    }
}

/// Increment the error counter for an error kind (see
/// [`OrchestratorError::kind`]).
///
/// No-op if metrics have not been initialised.
///
/// # Panics
///
/// This function never panics.
pub fn inc_error(kind: &str) {
    if let Some(m) = metrics() {
        inc(&m.errors_total, kind);
    }
}

/// Increment the backend round-trip counter for a pipeline stage.
///
/// No-op if metrics have not been initialised.
///
/// # Panics
///
/// This function never panics.
pub fn inc_backend_call(stage: &str) {
    if let Some(m) = metrics() {
        inc(&m.backend_calls, stage);
    }
}

/// Count one cache lookup.
///
/// No-op if metrics have not been initialised.
///
/// # Panics
///
/// This function never panics.
pub fn inc_cache_lookup(hit: bool) {
    if let Some(m) = metrics() {
        inc(&m.cache_lookups, if hit { "hit" } else { "miss" });
    }
}

/// Record the end-to-end duration of an uncached request.
///
/// No-op if metrics have not been initialised.
///
/// # Panics
///
/// This function never panics.
pub fn record_request_duration(tier: &str, d: Duration) {
    if let Some(m) = metrics() {
        if let Ok(h) = m.request_duration.get_metric_with_label_values(&[tier]) {
            h.observe(d.as_secs_f64());
        }
    }
}

/// Gather all registered metrics as a raw list of metric families.
///
/// Returns an empty `Vec` if metrics have not been initialised.
///
/// # Panics
///
/// This function never panics.
pub fn gather() -> Vec<prometheus::proto::MetricFamily> {
    metrics().map_or_else(Vec::new, |m| m.registry.gather())
}

/// Gather and encode all metrics in the Prometheus text exposition format.
///
/// Returns an empty string if metrics have not been initialised or if
/// encoding fails.
///
/// # Panics
///
/// This function never panics.
pub fn gather_metrics() -> String {
    let families = gather();
    if families.is_empty() {
        return String::new();
    }
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if encoder.encode(&families, &mut buffer).is_err() {
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

/// A structured snapshot of the counter series.
#[derive(Debug, Default)]
pub struct MetricsSummary {
    /// Request counts keyed by tier.
    pub requests_total: HashMap<String, u64>,
    /// Error counts keyed by error kind.
    pub errors_total: HashMap<String, u64>,
    /// Backend round trips keyed by stage.
    pub backend_calls: HashMap<String, u64>,
    /// Cache lookups keyed by outcome.
    pub cache_lookups: HashMap<String, u64>,
}

fn collect_counter(counter: &CounterVec, label: &str) -> HashMap<String, u64> {
    let mut values = HashMap::new();
    for family in counter.collect() {
        for metric in family.get_metric() {
            let key = metric
                .get_label()
                .iter()
                .find(|l| l.get_name() == label)
                .map_or("unknown", |l| l.get_value());
            values.insert(key.to_string(), metric.get_counter().get_value() as u64);
        }
    }
    values
}

fn summarize(m: &Metrics) -> MetricsSummary {
    MetricsSummary {
        requests_total: collect_counter(&m.requests_total, "tier"),
        errors_total: collect_counter(&m.errors_total, "kind"),
        backend_calls: collect_counter(&m.backend_calls, "stage"),
        cache_lookups: collect_counter(&m.cache_lookups, "outcome"),
    }
}

/// Return a structured summary of current metric counter values.
///
/// Returns a zeroed [`MetricsSummary`] if metrics have not been initialised.
///
/// # Panics
///
/// This function never panics.
pub fn get_metrics_summary() -> MetricsSummary {
    metrics().map_or_else(MetricsSummary::default, summarize)
}
