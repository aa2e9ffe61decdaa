//! # Orchestrator
//!
//! ## Responsibility
//! Own every piece of shared state (cache, rate-limit window, history,
//! outcome counters, event bus) for one process and drive each request
//! through validate → admit → cache → classify → resolve → retry(pipeline).
//!
//! ## Guarantees
//! - All-or-nothing: a failed [`Orchestrator::process`] never returns a
//!   partial result. Only `InvalidInput`, `RateLimited` and
//!   `RetryExhausted` reach the caller.
//! - Cache hits perform zero backend calls.
//! - Requests rejected by validation leave the history untouched; every
//!   later failure is recorded.
//! - Background tasks (cache sweep, rate-window reset) are started by
//!   [`Orchestrator::start`] and stopped by [`Orchestrator::shutdown`] or
//!   drop. Both are idempotent against request-path access.
//!
//! ## NOT Responsible For
//! - Cancellation: an abandoned `process` future stops at its next
//!   suspension point, but retries already in flight are not aborted
//!   elsewhere.
//! - Transport (HTTP, SSE): callers subscribe to the event bus.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::json;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{info, info_span, warn, Instrument, Span};
use uuid::Uuid;

use crate::config::{validate, ConfigError, OrchestratorConfig};
use crate::enhanced::{CacheStats, RateLimitInfo, RateLimiter, ResponseCache, RetryExecutor};
use crate::events::{Event, EventBus, EventKind, SubscriptionId};
use crate::history::{
    InteractionHistory, InteractionRecord, MetricsRecorder, MetricsSnapshot, OutcomeCounters,
};
use crate::metrics;
use crate::pipeline::GenerationPipeline;
use crate::routing::{Classifier, ModelCatalog, ModelSelection};
use crate::worker::ModelWorker;
use crate::{estimate_tokens, GenerationResult, OrchestratorError, ResultMetrics};

struct Background {
    shutdown: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

/// Request orchestrator. Construct once per process and share by `Arc`.
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use tiered_prompt_orchestrator::{EchoWorker, Orchestrator, OrchestratorConfig};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), tiered_prompt_orchestrator::OrchestratorError> {
/// let orchestrator = Orchestrator::new(OrchestratorConfig::default(), Arc::new(EchoWorker::new()))?;
/// orchestrator.start();
///
/// let result = orchestrator.process("hi").await?;
/// println!("{} via {}", result.text, result.model_used);
///
/// orchestrator.shutdown().await;
/// # Ok(())
/// # }
/// ```
pub struct Orchestrator {
    config: OrchestratorConfig,
    catalog: ModelCatalog,
    classifier: Classifier,
    events: EventBus,
    cache: ResponseCache,
    limiter: RateLimiter,
    retry: RetryExecutor,
    pipeline: GenerationPipeline,
    history: Arc<InteractionHistory>,
    counters: Arc<OutcomeCounters>,
    recorder: MetricsRecorder,
    background: Mutex<Option<Background>>,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("catalog_version", &self.catalog.version())
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

impl Orchestrator {
    /// Build an orchestrator from a configuration and a backend.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::ConfigError`] if the configuration fails
    /// validation.
    pub fn new(
        config: OrchestratorConfig,
        worker: Arc<dyn ModelWorker>,
    ) -> Result<Self, OrchestratorError> {
        validate(&config).map_err(|errors| {
            ConfigError::Validation(
                errors
                    .iter()
                    .map(|e| e.to_string())
                    .collect::<Vec<_>>()
                    .join("\n"),
            )
        })?;

        let catalog = ModelCatalog::new(config.models.clone())?;
        let events = EventBus::new();
        let history = Arc::new(InteractionHistory::new(config.history.max_records));
        let counters = Arc::new(OutcomeCounters::new());

        let cache = ResponseCache::new(catalog.version(), config.cache.max_entries, events.clone());
        let limiter = RateLimiter::new(
            config.rate_limit.max_requests,
            config.rate_limit.window(),
            config.rate_limit.min_spacing(),
            events.clone(),
        );
        let retry = RetryExecutor::new(config.retry.policy(), Arc::clone(&counters), events.clone());
        let pipeline = GenerationPipeline::new(worker, events.clone(), config.assistant.name.clone());
        let recorder = MetricsRecorder::new(Arc::clone(&history), Arc::clone(&counters));

        info!(
            catalog_version = catalog.version(),
            models = catalog.descriptors().len(),
            "orchestrator initialised"
        );

        Ok(Self {
            config,
            catalog,
            classifier: Classifier::new(),
            events,
            cache,
            limiter,
            retry,
            pipeline,
            history,
            counters,
            recorder,
            background: Mutex::new(None),
        })
    }

    // ── Request path ──────────────────────────────────────────────────────

    /// Process one request.
    ///
    /// # Errors
    ///
    /// - [`OrchestratorError::InvalidInput`] for empty or over-length text.
    /// - [`OrchestratorError::RateLimited`] when the admission window is full.
    /// - [`OrchestratorError::RetryExhausted`] when every backend attempt failed.
    pub async fn process(&self, text: &str) -> Result<GenerationResult, OrchestratorError> {
        let request_id = Uuid::new_v4();
        let span = info_span!(
            "process",
            request_id = %request_id,
            tier = tracing::field::Empty,
            model = tracing::field::Empty,
            duration_ms = tracing::field::Empty,
            outcome = tracing::field::Empty,
        );
        self.process_inner(text).instrument(span).await
    }

    async fn process_inner(&self, text: &str) -> Result<GenerationResult, OrchestratorError> {
        let started = Instant::now();
        self.events.emit(
            EventKind::ProcessStart,
            json!({ "length": text.chars().count() }),
        );

        if let Err(e) = self.validate_input(text) {
            return Err(self.reject(e, started, false));
        }

        self.history.push(InteractionRecord::user(text));

        if let Err(e) = self.limiter.admit().await {
            return Err(self.reject(e, started, true));
        }

        let key = self.cache.key(text);
        self.events.emit(
            EventKind::CacheCheck,
            json!({ "catalogVersion": self.catalog.version() }),
        );

        if let Some(mut hit) = self.cache.get(&key) {
            metrics::inc_cache_lookup(true);
            hit.metrics.duration_ms = elapsed_ms(started);
            hit.metrics.retry_count = 0;
            self.events.emit(
                EventKind::CacheHit,
                json!({ "model": hit.model_used, "tier": hit.tier }),
            );
            self.history.push(InteractionRecord::assistant(&hit));
            self.complete(&hit);
            return Ok(hit);
        }
        metrics::inc_cache_lookup(false);
        self.events.emit(EventKind::CacheMiss, json!({}));

        self.events.emit(EventKind::ModelSelectionStart, json!({}));
        let classification = self.classifier.classify(text);
        let tier = classification.tier;
        let resolution = self.catalog.resolve(tier);
        let descriptor = resolution.descriptor;

        if resolution.fallback {
            self.events.emit(
                EventKind::ModelFallback,
                json!({ "requestedTier": tier, "model": descriptor.identifier }),
            );
        }
        let selection = ModelSelection {
            model: descriptor.identifier.clone(),
            tier,
            reason: classification.reason,
            fallback: resolution.fallback,
        };
        self.events.emit(
            EventKind::ModelSelected,
            serde_json::to_value(&selection).unwrap_or_default(),
        );

        let span = Span::current();
        span.record("tier", tier.as_str());
        span.record("model", descriptor.identifier.as_str());
        metrics::inc_request(tier.as_str());

        let pipeline = &self.pipeline;
        let outcome = self
            .retry
            .run(move || pipeline.execute(tier, descriptor, text))
            .await;

        match outcome {
            Ok(outcome) => {
                let mut result = outcome.value;
                result.metrics = ResultMetrics {
                    duration_ms: elapsed_ms(started),
                    token_estimate: estimate_tokens(&result.text),
                    cache_hit: false,
                    retry_count: outcome.retry_count,
                };

                self.cache.put(key, result.clone(), self.config.cache.ttl());
                self.history.push(InteractionRecord::assistant(&result));
                metrics::record_request_duration(tier.as_str(), started.elapsed());
                self.complete(&result);
                Ok(result)
            }
            Err(e) => {
                // Already counted by the retry executor.
                self.history.push(InteractionRecord::failure(
                    Some(descriptor.identifier.clone()),
                    elapsed_ms(started),
                    &e,
                ));
                Err(self.fail(e, started))
            }
        }
    }

    fn validate_input(&self, text: &str) -> Result<(), OrchestratorError> {
        if text.trim().is_empty() {
            return Err(OrchestratorError::InvalidInput(
                "request text must not be empty".into(),
            ));
        }
        let max = self.config.input.max_length;
        if text.chars().count() > max {
            return Err(OrchestratorError::InvalidInput(format!(
                "request text exceeds {max} characters"
            )));
        }
        Ok(())
    }

    /// Failure before the retry executor ran: count it here.
    fn reject(&self, e: OrchestratorError, started: Instant, record: bool) -> OrchestratorError {
        self.counters.record_error();
        if record {
            self.history
                .push(InteractionRecord::failure(None, elapsed_ms(started), &e));
        }
        self.fail(e, started)
    }

    fn fail(&self, e: OrchestratorError, started: Instant) -> OrchestratorError {
        let duration_ms = elapsed_ms(started);
        let span = Span::current();
        span.record("duration_ms", duration_ms);
        span.record("outcome", "err");

        metrics::inc_error(e.kind());
        warn!(kind = e.kind(), error = %e, duration_ms = duration_ms, "request failed");
        self.events.emit(
            EventKind::ProcessError,
            json!({ "kind": e.kind(), "error": e.to_string(), "durationMs": duration_ms }),
        );
        e
    }

    fn complete(&self, result: &GenerationResult) {
        let span = Span::current();
        span.record("duration_ms", result.metrics.duration_ms);
        span.record("outcome", "ok");

        info!(
            tier = result.tier.as_str(),
            model = %result.model_used,
            cache_hit = result.metrics.cache_hit,
            retry_count = result.metrics.retry_count,
            duration_ms = result.metrics.duration_ms,
            "request complete"
        );
        self.events.emit(
            EventKind::ProcessComplete,
            json!({
                "model": result.model_used,
                "tier": result.tier,
                "isValid": result.is_valid,
                "metrics": result.metrics,
            }),
        );
    }

    // ── Observability ─────────────────────────────────────────────────────

    /// Register `handler` for events of `kind`.
    pub fn subscribe<F>(&self, kind: EventKind, handler: F) -> SubscriptionId
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.events.subscribe(kind, handler)
    }

    /// Register `handler` for every event kind.
    pub fn subscribe_all<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.events.subscribe_all(handler)
    }

    /// Remove a subscription. Returns `false` if `id` was not registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.events.unsubscribe(id)
    }

    /// The shared event bus.
    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Statistics derived from the history and outcome counters.
    pub fn metrics(&self) -> MetricsSnapshot {
        self.recorder.snapshot()
    }

    /// Copy of the interaction history, oldest first.
    pub fn history(&self) -> Vec<InteractionRecord> {
        self.history.snapshot()
    }

    /// History records produced by `model`.
    pub fn history_for_model(&self, model: &str) -> Vec<InteractionRecord> {
        self.history.for_model(model)
    }

    /// Drop the interaction history; returns how many records were removed.
    pub fn clear_history(&self) -> usize {
        let removed = self.history.clear();
        info!(removed = removed, "history cleared");
        self.events.emit(
            EventKind::HistoryCleared,
            json!({ "removedRecords": removed }),
        );
        removed
    }

    /// Response cache counters.
    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Empty the response cache; returns how many entries were removed.
    pub fn clear_cache(&self) -> usize {
        self.cache.clear()
    }

    /// Remove expired cache entries now; returns how many were removed.
    pub fn sweep_cache(&self) -> usize {
        self.cache.sweep()
    }

    /// Whether a cache entry exists for `text` (expired entries count until
    /// the next sweep).
    pub fn is_cached(&self, text: &str) -> bool {
        self.cache.contains(&self.cache.key(text))
    }

    /// Current rate-limit window usage.
    pub fn rate_limit_usage(&self) -> RateLimitInfo {
        self.limiter.usage()
    }

    /// The model catalog.
    pub fn catalog(&self) -> &ModelCatalog {
        &self.catalog
    }

    /// The active configuration.
    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    // ── Lifecycle ─────────────────────────────────────────────────────────

    /// Spawn the cache sweep and rate-window reset tasks.
    ///
    /// A second call while running is a no-op. Must be called from within a
    /// Tokio runtime.
    pub fn start(&self) {
        let mut background = self.background.lock();
        if background.is_some() {
            return;
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let cache = self.cache.clone();
        let limiter = self.limiter.clone();

        let sweep = spawn_periodic(
            "cache-sweep",
            self.config.cache.sweep_interval(),
            shutdown_rx.clone(),
            move || {
                cache.sweep();
            },
        );
        let reset = spawn_periodic(
            "rate-limit-reset",
            limiter.window(),
            shutdown_rx,
            move || {
                limiter.reset_if_elapsed();
            },
        );

        info!(
            sweep_interval_secs = self.config.cache.sweep_interval_secs,
            window_secs = self.config.rate_limit.window_secs,
            "background tasks started"
        );
        *background = Some(Background {
            shutdown: shutdown_tx,
            handles: vec![sweep, reset],
        });
    }

    /// Whether the background tasks are running.
    pub fn is_running(&self) -> bool {
        self.background.lock().is_some()
    }

    /// Stop the background tasks and wait for them to exit.
    pub async fn shutdown(&self) {
        let Some(background) = self.background.lock().take() else {
            return;
        };

        let _ = background.shutdown.send(true);
        for handle in background.handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "background task ended abnormally");
            }
        }
        info!("background tasks stopped");
    }
}

impl Drop for Orchestrator {
    fn drop(&mut self) {
        if let Some(background) = self.background.get_mut().take() {
            let _ = background.shutdown.send(true);
        }
    }
}

/// Run `tick` every `period` until `shutdown` fires or its sender is dropped.
///
/// The first tick happens one full period after spawning.
fn spawn_periodic<F>(
    name: &'static str,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
    tick: F,
) -> JoinHandle<()>
where
    F: Fn() + Send + 'static,
{
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        loop {
            tokio::select! {
                _ = ticker.tick() => tick(),
                _ = shutdown.changed() => {
                    tracing::debug!(task = name, "shutdown signal received");
                    break;
                }
            }
        }
    })
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}
