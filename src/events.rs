//! # Event Bus
//!
//! ## Responsibility
//! In-process publish/subscribe for orchestration lifecycle events. Every
//! stage of [`Orchestrator::process`](crate::Orchestrator::process) and every
//! background task reports its transitions here; transports (SSE, logs,
//! dashboards) subscribe.
//!
//! ## Guarantees
//! - Synchronous: [`EventBus::emit`] calls every matching subscriber in
//!   registration order and returns only after the last one has returned, so
//!   an event is always observed before dependent work proceeds.
//! - Re-entrant: the subscriber list is snapshotted before dispatch, so a
//!   handler may subscribe, unsubscribe or emit without deadlocking.
//!
//! ## NOT Responsible For
//! - Queuing or backpressure: a slow subscriber stalls the emitting call.
//! - Persistence: events are never stored.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::trace;

/// Fixed catalog of lifecycle stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventKind {
    /// A request entered `process`.
    ProcessStart,
    /// The response cache is being consulted.
    CacheCheck,
    /// A live cache entry answered the request.
    CacheHit,
    /// No live cache entry matched.
    CacheMiss,
    /// Classification and model resolution began.
    ModelSelectionStart,
    /// A model was chosen for the request.
    ModelSelected,
    /// The requested tier had no model; the highest-capability one was used.
    ModelFallback,
    /// The single-call simple strategy started.
    ProcessingSimple,
    /// The single-call standard strategy started.
    ProcessingStandard,
    /// The four-stage complex strategy started.
    ProcessingComplex,
    /// Complex stage 1 (analyze) started.
    ComplexAnalysisStart,
    /// Complex stage 1 finished, possibly with the degraded fallback analysis.
    AnalysisComplete,
    /// Complex stage 2 (generate) started.
    SolutionGenerationStart,
    /// Complex stage 3 (reflect) started.
    ReflectionStart,
    /// Complex stage 3 finished with a verdict.
    ReflectionComplete,
    /// Complex stage 4 (improve) started.
    ImprovementStart,
    /// Complex stage 4 finished, possibly keeping the initial solution.
    ImprovementComplete,
    /// A request completed successfully.
    ProcessComplete,
    /// A request failed.
    ProcessError,
    /// A retried operation failed one attempt.
    RetryAttempt,
    /// The rate-limit window rolled over.
    RateLimitReset,
    /// The cache sweep removed expired entries.
    CacheCleaned,
    /// The cache was cleared explicitly.
    CacheCleared,
    /// The interaction history was cleared explicitly.
    HistoryCleared,
}

impl EventKind {
    /// Every event kind, in lifecycle order.
    pub const ALL: [EventKind; 24] = [
        EventKind::ProcessStart,
        EventKind::CacheCheck,
        EventKind::CacheHit,
        EventKind::CacheMiss,
        EventKind::ModelSelectionStart,
        EventKind::ModelSelected,
        EventKind::ModelFallback,
        EventKind::ProcessingSimple,
        EventKind::ProcessingStandard,
        EventKind::ProcessingComplex,
        EventKind::ComplexAnalysisStart,
        EventKind::AnalysisComplete,
        EventKind::SolutionGenerationStart,
        EventKind::ReflectionStart,
        EventKind::ReflectionComplete,
        EventKind::ImprovementStart,
        EventKind::ImprovementComplete,
        EventKind::ProcessComplete,
        EventKind::ProcessError,
        EventKind::RetryAttempt,
        EventKind::RateLimitReset,
        EventKind::CacheCleaned,
        EventKind::CacheCleared,
        EventKind::HistoryCleared,
    ];

    /// Wire name, e.g. `"process-start"`.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ProcessStart => "process-start",
            Self::CacheCheck => "cache-check",
            Self::CacheHit => "cache-hit",
            Self::CacheMiss => "cache-miss",
            Self::ModelSelectionStart => "model-selection-start",
            Self::ModelSelected => "model-selected",
            Self::ModelFallback => "model-fallback",
            Self::ProcessingSimple => "processing-simple",
            Self::ProcessingStandard => "processing-standard",
            Self::ProcessingComplex => "processing-complex",
            Self::ComplexAnalysisStart => "complex-analysis-start",
            Self::AnalysisComplete => "analysis-complete",
            Self::SolutionGenerationStart => "solution-generation-start",
            Self::ReflectionStart => "reflection-start",
            Self::ReflectionComplete => "reflection-complete",
            Self::ImprovementStart => "improvement-start",
            Self::ImprovementComplete => "improvement-complete",
            Self::ProcessComplete => "process-complete",
            Self::ProcessError => "process-error",
            Self::RetryAttempt => "retry-attempt",
            Self::RateLimitReset => "rate-limit-reset",
            Self::CacheCleaned => "cache-cleaned",
            Self::CacheCleared => "cache-cleared",
            Self::HistoryCleared => "history-cleared",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One published event.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Event {
    /// Lifecycle stage.
    pub kind: EventKind,
    /// Stage-specific payload (camelCase keys).
    pub payload: serde_json::Value,
    /// Emission time.
    pub timestamp: DateTime<Utc>,
}

/// Handle returned by [`EventBus::subscribe`], used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Handler = Arc<dyn Fn(&Event) + Send + Sync>;

struct Subscription {
    id: SubscriptionId,
    /// `None` subscribes to every kind.
    filter: Option<EventKind>,
    handler: Handler,
}

struct BusInner {
    subscribers: RwLock<Vec<Subscription>>,
    next_id: AtomicU64,
}

/// Cheaply cloneable handle to a shared subscriber list.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    /// Create a bus with no subscribers.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(BusInner {
                subscribers: RwLock::new(Vec::new()),
                next_id: AtomicU64::new(0),
            }),
        }
    }

    /// Register `handler` for events of `kind`.
    pub fn subscribe<F>(&self, kind: EventKind, handler: F) -> SubscriptionId
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.register(Some(kind), Arc::new(handler))
    }

    /// Register `handler` for every event kind.
    pub fn subscribe_all<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.register(None, Arc::new(handler))
    }

    /// Remove a subscription. Returns `false` if `id` was not registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscribers = self.inner.subscribers.write();
        let before = subscribers.len();
        subscribers.retain(|s| s.id != id);
        subscribers.len() != before
    }

    /// Number of registered subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.read().len()
    }

    /// Publish an event to every matching subscriber, in registration order.
    pub fn emit(&self, kind: EventKind, payload: serde_json::Value) {
        let handlers: Vec<Handler> = self
            .inner
            .subscribers
            .read()
            .iter()
            .filter(|s| s.filter.map_or(true, |k| k == kind))
            .map(|s| Arc::clone(&s.handler))
            .collect();

        trace!(event = kind.as_str(), subscribers = handlers.len(), "emit");

        if handlers.is_empty() {
            return;
        }

        let event = Event {
            kind,
            payload,
            timestamp: Utc::now(),
        };
        for handler in handlers {
            handler(&event);
        }
    }

    fn register(&self, filter: Option<EventKind>, handler: Handler) -> SubscriptionId {
        let id = SubscriptionId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        self.inner.subscribers.write().push(Subscription {
            id,
            filter,
            handler,
        });
        id
    }
}
