//! Interaction history and derived statistics.
//!
//! [`InteractionHistory`] is the append-only log of user requests and
//! assistant responses. [`OutcomeCounters`] hold the process-wide success and
//! error totals maintained by the retry executor. [`MetricsRecorder`] derives
//! every reported statistic from those two sources.

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::{GenerationResult, OrchestratorError};

/// Author of an interaction record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The caller's request.
    User,
    /// The orchestrator's response (or failure).
    Assistant,
}

/// One entry of the interaction history. Never mutated once appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InteractionRecord {
    /// Who produced the content.
    pub role: Role,
    /// Request text or response text (empty for failures).
    pub content: String,
    /// Model that produced the response, if any.
    pub model_used: Option<String>,
    /// When the record was appended.
    pub timestamp: DateTime<Utc>,
    /// Processing time of the request, in milliseconds.
    pub processing_ms: u64,
    /// `true` when the response was served from the cache.
    pub cache_hit: bool,
    /// Error message for failed requests.
    pub error: Option<String>,
}

impl InteractionRecord {
    /// Record for an incoming request.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            model_used: None,
            timestamp: Utc::now(),
            processing_ms: 0,
            cache_hit: false,
            error: None,
        }
    }

    /// Record for a successful response.
    pub fn assistant(result: &GenerationResult) -> Self {
        Self {
            role: Role::Assistant,
            content: result.text.clone(),
            model_used: Some(result.model_used.clone()),
            timestamp: Utc::now(),
            processing_ms: result.metrics.duration_ms,
            cache_hit: result.metrics.cache_hit,
            error: None,
        }
    }

    /// Record for a failed request.
    pub fn failure(model: Option<String>, processing_ms: u64, error: &OrchestratorError) -> Self {
        Self {
            role: Role::Assistant,
            content: String::new(),
            model_used: model,
            timestamp: Utc::now(),
            processing_ms,
            cache_hit: false,
            error: Some(error.to_string()),
        }
    }

    /// `true` for assistant records carrying an error.
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// Bounded, append-only interaction log.
///
/// When `max_records` is non-zero the oldest records are dropped once the
/// bound is reached; `0` means unbounded.
#[derive(Debug)]
pub struct InteractionHistory {
    records: Mutex<VecDeque<InteractionRecord>>,
    max_records: usize,
}

impl InteractionHistory {
    /// Create an empty history.
    pub fn new(max_records: usize) -> Self {
        Self {
            records: Mutex::new(VecDeque::new()),
            max_records,
        }
    }

    /// Append a record, evicting the oldest one if at capacity.
    pub fn push(&self, record: InteractionRecord) {
        let mut records = self.records.lock();
        if self.max_records > 0 && records.len() >= self.max_records {
            records.pop_front();
        }
        records.push_back(record);
    }

    /// Copy of every record, oldest first.
    pub fn snapshot(&self) -> Vec<InteractionRecord> {
        self.records.lock().iter().cloned().collect()
    }

    /// Records whose `model_used` equals `model`.
    pub fn for_model(&self, model: &str) -> Vec<InteractionRecord> {
        self.records
            .lock()
            .iter()
            .filter(|r| r.model_used.as_deref() == Some(model))
            .cloned()
            .collect()
    }

    /// Drop every record; returns how many were removed.
    pub fn clear(&self) -> usize {
        let mut records = self.records.lock();
        let removed = records.len();
        records.clear();
        removed
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    /// `true` if no records are held.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Process-wide success/error totals, one increment per completed request.
#[derive(Debug, Default)]
pub struct OutcomeCounters {
    success: AtomicU64,
    error: AtomicU64,
}

impl OutcomeCounters {
    /// Create zeroed counters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one successful request.
    pub fn record_success(&self) {
        self.success.fetch_add(1, Ordering::Relaxed);
    }

    /// Count one failed request.
    pub fn record_error(&self) {
        self.error.fetch_add(1, Ordering::Relaxed);
    }

    /// Successful requests so far.
    pub fn success_count(&self) -> u64 {
        self.success.load(Ordering::Relaxed)
    }

    /// Failed requests so far.
    pub fn error_count(&self) -> u64 {
        self.error.load(Ordering::Relaxed)
    }
}

/// Point-in-time statistics.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    /// `success_count + error_count`.
    pub total_requests: u64,
    /// Requests that completed successfully.
    pub success_count: u64,
    /// Requests that failed.
    pub error_count: u64,
    /// `success_count / total_requests` (0 when no requests).
    pub success_rate: f64,
    /// `error_count / total_requests` (0 when no requests).
    pub error_rate: f64,
    /// Assistant records per model identifier.
    pub model_usage: BTreeMap<String, u64>,
    /// Mean processing time over assistant records, in milliseconds.
    pub average_processing_ms: f64,
    /// Fraction of assistant records served from the cache.
    pub cache_hit_rate: f64,
    /// Number of records currently held.
    pub history_len: usize,
}

/// Derives [`MetricsSnapshot`]s from the history and the outcome counters.
#[derive(Debug, Clone)]
pub struct MetricsRecorder {
    history: Arc<InteractionHistory>,
    counters: Arc<OutcomeCounters>,
}

impl MetricsRecorder {
    /// Create a recorder over shared state.
    pub fn new(history: Arc<InteractionHistory>, counters: Arc<OutcomeCounters>) -> Self {
        Self { history, counters }
    }

    /// Compute a snapshot now.
    pub fn snapshot(&self) -> MetricsSnapshot {
        summarize(
            &self.history.snapshot(),
            self.counters.success_count(),
            self.counters.error_count(),
        )
    }
}

/// Compute statistics over `records` and the given counter values.
pub fn summarize(records: &[InteractionRecord], success: u64, error: u64) -> MetricsSnapshot {
    let total = success + error;
    let ratio = |n: u64| if total == 0 { 0.0 } else { n as f64 / total as f64 };

    let assistant: Vec<&InteractionRecord> = records
        .iter()
        .filter(|r| r.role == Role::Assistant)
        .collect();

    let mut model_usage = BTreeMap::new();
    for model in assistant.iter().filter_map(|r| r.model_used.as_ref()) {
        *model_usage.entry(model.clone()).or_insert(0) += 1;
    }

    let (average_processing_ms, cache_hit_rate) = if assistant.is_empty() {
        (0.0, 0.0)
    } else {
        let n = assistant.len() as f64;
        let total_ms: u64 = assistant.iter().map(|r| r.processing_ms).sum();
        let hits = assistant.iter().filter(|r| r.cache_hit).count();
        (total_ms as f64 / n, hits as f64 / n)
    };

    MetricsSnapshot {
        total_requests: total,
        success_count: success,
        error_count: error,
        success_rate: ratio(success),
        error_rate: ratio(error),
        model_usage,
        average_processing_ms,
        cache_hit_rate,
        history_len: records.len(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ResultMetrics, Tier};

    fn result(model: &str, duration_ms: u64, cache_hit: bool) -> GenerationResult {
        GenerationResult {
            text: "answer".into(),
            is_valid: true,
            tier: Tier::Medium,
            technologies: vec![],
            model_used: model.into(),
            metrics: ResultMetrics {
                duration_ms,
                token_estimate: 2,
                cache_hit,
                retry_count: 0,
            },
        }
    }

    #[test]
    fn test_history_appends_in_order() {
        let history = InteractionHistory::new(0);
        history.push(InteractionRecord::user("first"));
        history.push(InteractionRecord::assistant(&result("m", 10, false)));

        let records = history.snapshot();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].role, Role::User);
        assert_eq!(records[1].role, Role::Assistant);
    }

    #[test]
    fn test_bounded_history_drops_oldest() {
        let history = InteractionHistory::new(2);
        history.push(InteractionRecord::user("a"));
        history.push(InteractionRecord::user("b"));
        history.push(InteractionRecord::user("c"));

        let contents: Vec<_> = history.snapshot().into_iter().map(|r| r.content).collect();
        assert_eq!(contents, vec!["b", "c"]);
    }

    #[test]
    fn test_for_model_filters_on_model_used() {
        let history = InteractionHistory::new(0);
        history.push(InteractionRecord::user("q"));
        history.push(InteractionRecord::assistant(&result("small", 5, false)));
        history.push(InteractionRecord::assistant(&result("big", 5, false)));

        let small = history.for_model("small");
        assert_eq!(small.len(), 1);
        assert_eq!(small[0].model_used.as_deref(), Some("small"));
        assert!(history.for_model("missing").is_empty());
    }

    #[test]
    fn test_clear_reports_removed_count() {
        let history = InteractionHistory::new(0);
        history.push(InteractionRecord::user("q"));
        assert_eq!(history.clear(), 1);
        assert!(history.is_empty());
    }

    #[test]
    fn test_failure_record_carries_error() {
        let record = InteractionRecord::failure(
            Some("m".into()),
            12,
            &OrchestratorError::RateLimited,
        );
        assert!(record.is_error());
        assert_eq!(record.role, Role::Assistant);
        assert_eq!(record.error.as_deref(), Some("rate limit exceeded"));
    }

    #[test]
    fn test_summarize_empty_is_all_zero() {
        let snapshot = summarize(&[], 0, 0);
        assert_eq!(snapshot.total_requests, 0);
        assert_eq!(snapshot.success_rate, 0.0);
        assert_eq!(snapshot.cache_hit_rate, 0.0);
        assert!(snapshot.model_usage.is_empty());
    }

    #[test]
    fn test_summarize_rates_and_usage() {
        let records = vec![
            InteractionRecord::user("q1"),
            InteractionRecord::assistant(&result("small", 10, false)),
            InteractionRecord::user("q1"),
            InteractionRecord::assistant(&result("small", 0, true)),
            InteractionRecord::user("q2"),
            InteractionRecord::assistant(&result("big", 20, false)),
            InteractionRecord::user("q3"),
            InteractionRecord::failure(Some("big".into()), 30, &OrchestratorError::RateLimited),
        ];

        let snapshot = summarize(&records, 2, 1);
        assert_eq!(snapshot.total_requests, 3);
        assert!((snapshot.success_rate - 2.0 / 3.0).abs() < 1e-9);
        assert!((snapshot.error_rate - 1.0 / 3.0).abs() < 1e-9);
        assert_eq!(snapshot.model_usage.get("small"), Some(&2));
        assert_eq!(snapshot.model_usage.get("big"), Some(&2));
        assert!((snapshot.average_processing_ms - 15.0).abs() < 1e-9);
        assert!((snapshot.cache_hit_rate - 0.25).abs() < 1e-9);
        assert_eq!(snapshot.history_len, 8);
    }

    #[test]
    fn test_recorder_reads_live_state() {
        let history = Arc::new(InteractionHistory::new(0));
        let counters = Arc::new(OutcomeCounters::new());
        let recorder = MetricsRecorder::new(Arc::clone(&history), Arc::clone(&counters));

        counters.record_success();
        history.push(InteractionRecord::assistant(&result("m", 4, false)));

        let snapshot = recorder.snapshot();
        assert_eq!(snapshot.success_count, 1);
        assert_eq!(snapshot.history_len, 1);
    }
}
