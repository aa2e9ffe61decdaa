//! End-to-end tests for `Orchestrator::process` against a scripted backend.

mod common;

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use common::{orchestrator_with, test_config, ScriptedWorker};
use tiered_prompt_orchestrator::enhanced::fingerprint;
use tiered_prompt_orchestrator::routing::reference_descriptors;
use tiered_prompt_orchestrator::{
    EventKind, Orchestrator, OrchestratorConfig, OrchestratorError, Role, Tier,
};

const COMPLEX_INPUT: &str = "implement a binary search tree and explain the algorithm";

fn record_kinds(o: &Orchestrator) -> Arc<Mutex<Vec<EventKind>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    o.subscribe_all(move |e| sink.lock().push(e.kind));
    seen
}

// ── Routing scenarios ────────────────────────────────────────────────

#[tokio::test]
async fn test_greeting_is_simple_single_call_and_cached() {
    let worker = ScriptedWorker::new();
    let o = orchestrator_with(Arc::clone(&worker), test_config());

    let result = o.process("hi").await.expect("test: simple request succeeds");

    assert_eq!(result.tier, Tier::Simple);
    assert_eq!(result.model_used, "gpt-4o-mini");
    assert_eq!(result.text, "respond reply from gpt-4o-mini");
    assert!(result.is_valid);
    assert!(!result.metrics.cache_hit);
    assert_eq!(result.metrics.retry_count, 0);
    assert_eq!(result.metrics.token_estimate, result.text.chars().count().div_ceil(4));
    assert_eq!(worker.stages(), vec!["respond"]);

    let version = o.catalog().version().to_string();
    assert_eq!(fingerprint("hi", &version), format!("hi_{version}"));
    assert!(o.is_cached("hi"));
}

#[tokio::test]
async fn test_plain_question_is_medium() {
    let worker = ScriptedWorker::new();
    let o = orchestrator_with(Arc::clone(&worker), test_config());

    let result = o
        .process("what is the capital of France?")
        .await
        .expect("test: medium request succeeds");

    assert_eq!(result.tier, Tier::Medium);
    assert_eq!(result.model_used, "gpt-4o");
    assert_eq!(worker.stages(), vec!["answer"]);
}

#[tokio::test]
async fn test_complex_request_runs_three_stages_when_reflection_accepts() {
    let worker = ScriptedWorker::new();
    let o = orchestrator_with(Arc::clone(&worker), test_config());

    let result = o.process(COMPLEX_INPUT).await.expect("test: complex succeeds");

    assert_eq!(result.tier, Tier::Complex);
    assert_eq!(result.model_used, "gpt-4.1");
    assert_eq!(result.text, "initial solution");
    assert_eq!(result.technologies, vec!["rust", "data structures"]);
    assert_eq!(worker.stages(), vec!["analyze", "generate", "reflect"]);
    assert!(worker.models().iter().all(|m| m == "gpt-4.1"));
}

#[tokio::test]
async fn test_complex_request_runs_improvement_when_reflection_rejects() {
    let worker = ScriptedWorker::new();
    worker.set_verdict("FALSE");
    let o = orchestrator_with(Arc::clone(&worker), test_config());

    let result = o.process(COMPLEX_INPUT).await.expect("test: complex succeeds");

    assert_eq!(result.text, "improved solution");
    assert!(result.is_valid);
    assert_eq!(
        worker.stages(),
        vec!["analyze", "generate", "reflect", "improve"]
    );
}

#[tokio::test]
async fn test_simple_inputs_never_reach_complex_stages() {
    let worker = ScriptedWorker::new();
    let o = orchestrator_with(Arc::clone(&worker), test_config());

    for input in ["hello", "thanks!", "bye for now", "hi, can you debug this?", "ok"] {
        let result = o.process(input).await.expect("test: simple succeeds");
        assert_eq!(result.tier, Tier::Simple, "input {input:?}");
    }

    assert!(worker.stages().iter().all(|s| *s == "respond"));
}

#[tokio::test]
async fn test_missing_tier_falls_back_to_highest_model() {
    let worker = ScriptedWorker::new();
    let mut config = test_config();
    config.models = reference_descriptors()
        .into_iter()
        .filter(|d| d.tier != Tier::Complex)
        .collect();
    let o = orchestrator_with(Arc::clone(&worker), config);
    let seen = record_kinds(&o);

    let result = o.process(COMPLEX_INPUT).await.expect("test: fallback succeeds");

    assert_eq!(result.tier, Tier::Complex);
    assert_eq!(result.model_used, "gpt-4o");
    assert!(seen.lock().contains(&EventKind::ModelFallback));
}

// ── Cache ────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_repeat_request_is_served_from_cache_without_backend_calls() {
    let worker = ScriptedWorker::new();
    let o = orchestrator_with(Arc::clone(&worker), test_config());

    let first = o.process(COMPLEX_INPUT).await.expect("test: first call");
    let calls = worker.call_count();

    let second = o.process(COMPLEX_INPUT).await.expect("test: second call");

    assert_eq!(worker.call_count(), calls);
    assert_eq!(second.text, first.text);
    assert!(second.metrics.cache_hit);
    assert_eq!(o.cache_stats().hits, 1);
}

#[tokio::test]
async fn test_cache_key_ignores_case_and_surrounding_whitespace() {
    let worker = ScriptedWorker::new();
    let o = orchestrator_with(Arc::clone(&worker), test_config());

    o.process("  Hi ").await.expect("test: first call");
    let second = o.process("hi").await.expect("test: second call");

    assert!(second.metrics.cache_hit);
    assert_eq!(worker.call_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_expired_entry_is_regenerated() {
    let worker = ScriptedWorker::new();
    let mut config = test_config();
    config.cache.ttl_secs = 5;
    let o = orchestrator_with(Arc::clone(&worker), config);

    o.process("hi").await.expect("test: first call");
    tokio::time::advance(Duration::from_secs(6)).await;
    let second = o.process("hi").await.expect("test: second call");

    assert!(!second.metrics.cache_hit);
    assert_eq!(worker.call_count(), 2);
}

#[tokio::test]
async fn test_clear_cache_forces_regeneration() {
    let worker = ScriptedWorker::new();
    let o = orchestrator_with(Arc::clone(&worker), test_config());

    o.process("hi").await.expect("test: first call");
    assert_eq!(o.clear_cache(), 1);
    o.process("hi").await.expect("test: second call");

    assert_eq!(worker.call_count(), 2);
}

// ── Validation ───────────────────────────────────────────────────────

#[tokio::test]
async fn test_empty_input_is_invalid_and_not_recorded() {
    let worker = ScriptedWorker::new();
    let o = orchestrator_with(Arc::clone(&worker), test_config());
    o.process("hi").await.expect("test: seed history");
    let before = o.history().len();

    let result = o.process("").await;

    assert!(matches!(result, Err(OrchestratorError::InvalidInput(_))));
    assert_eq!(o.history().len(), before);
    assert_eq!(worker.call_count(), 1);
}

// ── Retry ────────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_transient_failures_are_retried() {
    let worker = ScriptedWorker::new();
    worker.fail_first(2);
    let o = orchestrator_with(Arc::clone(&worker), test_config());

    let result = o.process("hi").await.expect("test: third attempt succeeds");

    assert_eq!(result.metrics.retry_count, 2);
    assert_eq!(worker.call_count(), 3);
    let metrics = o.metrics();
    assert_eq!(metrics.success_count, 1);
    assert_eq!(metrics.error_count, 0);
}

#[tokio::test(start_paused = true)]
async fn test_persistent_failure_exhausts_retries_and_is_recorded() {
    let worker = ScriptedWorker::new();
    worker.fail_stage("respond");
    let o = orchestrator_with(Arc::clone(&worker), test_config());
    let seen = record_kinds(&o);

    let start = tokio::time::Instant::now();
    let result = o.process("hi").await;

    assert!(matches!(
        result,
        Err(OrchestratorError::RetryExhausted { attempts: 3, .. })
    ));
    assert_eq!(start.elapsed(), Duration::from_secs(7));
    assert_eq!(worker.call_count(), 3);

    let history = o.history();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].role, Role::User);
    assert!(history[1].is_error());
    assert_eq!(history[1].model_used.as_deref(), Some("gpt-4o-mini"));

    let kinds = seen.lock();
    assert_eq!(
        kinds.iter().filter(|k| **k == EventKind::RetryAttempt).count(),
        3
    );
    assert_eq!(kinds.last(), Some(&EventKind::ProcessError));
    assert!(!o.is_cached("hi"));
    assert_eq!(o.metrics().error_count, 1);
}

#[tokio::test(start_paused = true)]
async fn test_non_retryable_backend_error_surfaces_as_retry_exhausted() {
    let worker = ScriptedWorker::new();
    worker.reject_with("401 unauthorized");
    let o = orchestrator_with(Arc::clone(&worker), test_config());
    let seen = record_kinds(&o);

    let start = tokio::time::Instant::now();
    let result = o.process("hi").await;

    match result {
        Err(OrchestratorError::RetryExhausted { attempts, last_error }) => {
            assert_eq!(attempts, 1);
            assert!(last_error.to_string().contains("401 unauthorized"));
        }
        other => panic!("expected RetryExhausted, got {other:?}"),
    }
    assert_eq!(start.elapsed(), Duration::ZERO, "no backoff for non-retryable errors");
    assert_eq!(worker.call_count(), 1);

    let kinds = seen.lock();
    assert!(!kinds.contains(&EventKind::RetryAttempt));
    assert_eq!(kinds.last(), Some(&EventKind::ProcessError));
    assert_eq!(o.metrics().error_count, 1);
    assert!(!o.is_cached("hi"));
}

#[tokio::test(start_paused = true)]
async fn test_complex_retry_reruns_whole_pipeline() {
    let worker = ScriptedWorker::new();
    worker.fail_first(1);
    let o = orchestrator_with(Arc::clone(&worker), test_config());

    let result = o.process(COMPLEX_INPUT).await.expect("test: retry succeeds");

    assert_eq!(result.metrics.retry_count, 1);
    assert_eq!(
        worker.stages(),
        vec!["analyze", "analyze", "generate", "reflect"]
    );
}

#[tokio::test]
async fn test_absorbed_stage_failures_do_not_fail_the_request() {
    let worker = ScriptedWorker::new();
    worker.set_analysis("not json at all");
    worker.fail_stage("reflect");
    let o = orchestrator_with(Arc::clone(&worker), test_config());

    let result = o.process(COMPLEX_INPUT).await.expect("test: absorbed failures");

    assert_eq!(result.technologies, vec!["unknown"]);
    assert_eq!(result.text, "initial solution");
    assert!(result.is_valid);
    assert_eq!(o.metrics().error_count, 0);
}

// ── Rate limiting ────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_request_over_window_capacity_is_rejected() {
    let worker = ScriptedWorker::new();
    let mut config = test_config();
    config.rate_limit.max_requests = 3;
    let o = orchestrator_with(Arc::clone(&worker), config);

    for input in ["hi", "hello", "what is rust"] {
        o.process(input).await.expect("test: within capacity");
    }
    // Rejected regardless of content, even if it would be a cache hit
    assert!(matches!(
        o.process("hi").await,
        Err(OrchestratorError::RateLimited)
    ));
    assert_eq!(o.rate_limit_usage().remaining, 0);

    tokio::time::advance(Duration::from_secs(60)).await;
    assert!(o.process("hi").await.is_ok(), "new window admits again");
}

#[tokio::test(start_paused = true)]
async fn test_minimum_spacing_is_applied_per_request() {
    let worker = ScriptedWorker::new();
    let o = orchestrator_with(Arc::clone(&worker), OrchestratorConfig::default());

    let start = tokio::time::Instant::now();
    o.process("hi").await.expect("test: first");
    o.process("hello").await.expect("test: second");

    assert!(start.elapsed() >= Duration::from_millis(200));
}

// ── Events and metrics ───────────────────────────────────────────────

#[tokio::test]
async fn test_event_order_for_uncached_simple_request() {
    let worker = ScriptedWorker::new();
    let o = orchestrator_with(Arc::clone(&worker), test_config());
    let seen = record_kinds(&o);

    o.process("hi").await.expect("test: processed");

    assert_eq!(
        *seen.lock(),
        vec![
            EventKind::ProcessStart,
            EventKind::CacheCheck,
            EventKind::CacheMiss,
            EventKind::ModelSelectionStart,
            EventKind::ModelSelected,
            EventKind::ProcessingSimple,
            EventKind::ProcessComplete,
        ]
    );
}

#[tokio::test]
async fn test_event_order_for_cache_hit() {
    let worker = ScriptedWorker::new();
    let o = orchestrator_with(Arc::clone(&worker), test_config());
    o.process("hi").await.expect("test: warm cache");

    let seen = record_kinds(&o);
    o.process("hi").await.expect("test: cached");

    assert_eq!(
        *seen.lock(),
        vec![
            EventKind::ProcessStart,
            EventKind::CacheCheck,
            EventKind::CacheHit,
            EventKind::ProcessComplete,
        ]
    );
}

#[tokio::test]
async fn test_metrics_snapshot_reflects_history() {
    let worker = ScriptedWorker::new();
    let o = orchestrator_with(Arc::clone(&worker), test_config());

    o.process("hi").await.expect("test: simple");
    o.process("hi").await.expect("test: cached");
    o.process("what is a monad").await.expect("test: medium");
    let _ = o.process("").await;

    let m = o.metrics();
    assert_eq!(m.success_count, 2);
    assert_eq!(m.error_count, 1);
    assert_eq!(m.total_requests, 3);
    assert_eq!(m.model_usage.get("gpt-4o-mini"), Some(&2));
    assert_eq!(m.model_usage.get("gpt-4o"), Some(&1));
    assert!((m.cache_hit_rate - 1.0 / 3.0).abs() < 1e-9);
    assert_eq!(m.history_len, 6);
}

#[tokio::test]
async fn test_history_for_model_and_clear() {
    let worker = ScriptedWorker::new();
    let o = orchestrator_with(Arc::clone(&worker), test_config());
    let seen = record_kinds(&o);

    o.process("hi").await.expect("test: simple");
    o.process("what is a monad").await.expect("test: medium");

    let simple = o.history_for_model("gpt-4o-mini");
    assert_eq!(simple.len(), 1);
    assert_eq!(simple[0].role, Role::Assistant);

    assert_eq!(o.clear_history(), 4);
    assert!(o.history().is_empty());
    assert_eq!(seen.lock().last(), Some(&EventKind::HistoryCleared));
}

#[tokio::test]
async fn test_unsubscribed_handler_stops_receiving() {
    let worker = ScriptedWorker::new();
    let o = orchestrator_with(Arc::clone(&worker), test_config());
    let count = Arc::new(Mutex::new(0usize));
    let c = Arc::clone(&count);
    let id = o.subscribe(EventKind::ProcessComplete, move |_| *c.lock() += 1);

    o.process("hi").await.expect("test: first");
    assert!(o.unsubscribe(id));
    o.process("hello").await.expect("test: second");

    assert_eq!(*count.lock(), 1);
    assert!(!o.unsubscribe(id));
}

// ── Concurrency ──────────────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_requests_share_state_safely() {
    let worker = ScriptedWorker::new();
    let o = Arc::new(orchestrator_with(Arc::clone(&worker), test_config()));

    let mut handles = Vec::new();
    for i in 0..20 {
        let o = Arc::clone(&o);
        handles.push(tokio::spawn(async move {
            let prompt = format!("question number {i}");
            let result = o.process(&prompt).await;
            result
        }));
    }
    for h in handles {
        h.await
            .expect("test: task completes")
            .expect("test: request succeeds");
    }

    let m = o.metrics();
    assert_eq!(m.success_count, 20);
    assert_eq!(m.history_len, 40);
    assert_eq!(o.cache_stats().size, 20);
    assert_eq!(worker.call_count(), 20);
}
