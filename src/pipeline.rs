//! # Generation Pipeline
//!
//! ## Responsibility
//! Turn one validated request into a [`GenerationResult`] using the strategy
//! that matches its [`Tier`]:
//!
//! | Tier | Stages | Backend calls |
//! |------|--------|---------------|
//! | Simple | respond | 1 |
//! | Medium | answer | 1 |
//! | Complex | analyze → generate → reflect → improve? | 3 or 4 |
//!
//! ## Guarantees
//! - Stages run strictly in order; each is exactly one backend round trip.
//! - Analyze output that is not a JSON object degrades to
//!   [`Analysis::degraded`] instead of failing the request.
//! - Reflect fails open: a backend error or an unparsable verdict counts as
//!   "valid" and skips improvement.
//! - Improve falls back to the initial solution when its call fails.
//! - Backend errors from respond, answer, analyze and generate propagate
//!   unchanged so that the caller's retry executor can re-run the pipeline.
//!
//! ## NOT Responsible For
//! - Timing, caching or retry: `metrics` on the returned result are left at
//!   their defaults and filled in by the orchestrator.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, warn};

use crate::events::{EventBus, EventKind};
use crate::metrics;
use crate::routing::{ModelDescriptor, Tier};
use crate::worker::ModelWorker;
use crate::{GenerationResult, OrchestratorError, ResultMetrics};

// ── Analysis ──────────────────────────────────────────────────────────────

/// Structured assessment produced by the analyze stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Analysis {
    /// Technologies or topics the request involves.
    #[serde(default)]
    pub technologies: Vec<String>,
    /// Candidate approaches to the problem.
    #[serde(default)]
    pub approaches: Vec<String>,
    /// Expected complexity, free-form (e.g. `"Complex"`).
    #[serde(default = "default_complexity")]
    pub complexity: String,
}

fn default_complexity() -> String {
    "Complex".to_string()
}

impl Analysis {
    /// Fallback used when the backend's analysis cannot be parsed.
    pub fn degraded() -> Self {
        Self {
            technologies: vec!["unknown".to_string()],
            approaches: Vec::new(),
            complexity: "Complex".to_string(),
        }
    }

    /// Parse the first JSON object embedded in `text`.
    ///
    /// Surrounding prose and code fences are ignored. Returns `None` when no
    /// object is present or it does not deserialize.
    pub fn parse(text: &str) -> Option<Self> {
        let start = text.find('{')?;
        let end = text.rfind('}')?;
        if end < start {
            return None;
        }
        serde_json::from_str(&text[start..=end]).ok()
    }
}

// ── Stages ────────────────────────────────────────────────────────────────

/// One backend round trip within the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    /// Simple tier: short identity-reinforcing reply.
    Respond,
    /// Medium tier: full answer.
    Answer,
    /// Complex stage 1.
    Analyze,
    /// Complex stage 2.
    Generate,
    /// Complex stage 3.
    Reflect,
    /// Complex stage 4.
    Improve,
}

impl Stage {
    /// Low-cardinality label, used for metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Respond => "respond",
            Self::Answer => "answer",
            Self::Analyze => "analyze",
            Self::Generate => "generate",
            Self::Reflect => "reflect",
            Self::Improve => "improve",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Prompt templates ──────────────────────────────────────────────────────

/// Prompt for the simple tier.
pub fn simple_prompt(assistant: &str, input: &str) -> String {
    format!(
        "You are {assistant}. Reply briefly and in a friendly tone, staying in character as \
         {assistant}.\n\nUser: {input}"
    )
}

/// Prompt for the medium tier.
pub fn standard_prompt(assistant: &str, input: &str) -> String {
    format!(
        "You are {assistant}, a knowledgeable technical assistant. Answer the question below \
         clearly and completely, using short examples where they help.\n\nQuestion: {input}"
    )
}

/// Prompt for complex stage 1.
pub fn analysis_prompt(input: &str) -> String {
    format!(
        "Analyze the following request. Respond with only a JSON object of the form \
         {{\"technologies\": [string], \"approaches\": [string], \"complexity\": \
         \"Simple\" | \"Medium\" | \"Complex\"}}.\n\nRequest: {input}"
    )
}

/// Prompt for complex stage 2.
pub fn solution_prompt(assistant: &str, input: &str, analysis: &Analysis) -> String {
    format!(
        "You are {assistant}. Solve the request below step by step.\n\
         Relevant technologies: {}\n\
         Candidate approaches: {}\n\
         Expected complexity: {}\n\nRequest: {input}",
        join_or_none(&analysis.technologies),
        join_or_none(&analysis.approaches),
        analysis.complexity,
    )
}

/// Prompt for complex stage 3.
pub fn reflection_prompt(assistant: &str, input: &str, solution: &str) -> String {
    format!(
        "Review the solution below. Is it complete, written in the voice of {assistant}, and \
         in need of no further work? Answer with exactly one word: true or false.\n\n\
         Request: {input}\n\nSolution: {solution}"
    )
}

/// Prompt for complex stage 4.
pub fn improvement_prompt(assistant: &str, input: &str, solution: &str) -> String {
    format!(
        "You are {assistant}. The initial solution below was judged incomplete. Rewrite it as \
         a complete, improved solution to the original request.\n\n\
         Request: {input}\n\nInitial solution: {solution}"
    )
}

fn join_or_none(items: &[String]) -> String {
    if items.is_empty() {
        "none identified".to_string()
    } else {
        items.join(", ")
    }
}

/// Parse a reflection verdict.
///
/// Accepts exactly `true` or `false` in any case, ignoring surrounding
/// whitespace. Anything else, including trailing punctuation, is `None`.
pub fn parse_verdict(text: &str) -> Option<bool> {
    let word = text.trim();
    if word.eq_ignore_ascii_case("true") {
        Some(true)
    } else if word.eq_ignore_ascii_case("false") {
        Some(false)
    } else {
        None
    }
}

// ── Pipeline ──────────────────────────────────────────────────────────────

/// Executes the tier-specific generation strategy against one backend.
#[derive(Clone)]
pub struct GenerationPipeline {
    worker: Arc<dyn ModelWorker>,
    events: EventBus,
    assistant: String,
}

impl fmt::Debug for GenerationPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GenerationPipeline")
            .field("assistant", &self.assistant)
            .finish_non_exhaustive()
    }
}

impl GenerationPipeline {
    /// Create a pipeline. `assistant` is the identity used in prompts.
    pub fn new(worker: Arc<dyn ModelWorker>, events: EventBus, assistant: impl Into<String>) -> Self {
        Self {
            worker,
            events,
            assistant: assistant.into(),
        }
    }

    /// Run the strategy for `tier` using `model`.
    ///
    /// # Errors
    ///
    /// Returns the backend error of any non-absorbing stage (see module docs).
    pub async fn execute(
        &self,
        tier: Tier,
        model: &ModelDescriptor,
        input: &str,
    ) -> Result<GenerationResult, OrchestratorError> {
        match tier {
            Tier::Simple => {
                self.events.emit(
                    EventKind::ProcessingSimple,
                    json!({ "model": model.identifier }),
                );
                let prompt = simple_prompt(&self.assistant, input);
                let text = self.call(Stage::Respond, model, &prompt).await?;
                Ok(self.wrap(tier, model, text, true, Vec::new()))
            }
            Tier::Medium => {
                self.events.emit(
                    EventKind::ProcessingStandard,
                    json!({ "model": model.identifier }),
                );
                let prompt = standard_prompt(&self.assistant, input);
                let text = self.call(Stage::Answer, model, &prompt).await?;
                Ok(self.wrap(tier, model, text, true, Vec::new()))
            }
            Tier::Complex => self.execute_complex(model, input).await,
        }
    }

    async fn execute_complex(
        &self,
        model: &ModelDescriptor,
        input: &str,
    ) -> Result<GenerationResult, OrchestratorError> {
        self.events.emit(
            EventKind::ProcessingComplex,
            json!({ "model": model.identifier }),
        );

        let analysis = self.analyze(model, input).await?;

        self.events.emit(
            EventKind::SolutionGenerationStart,
            json!({ "model": model.identifier }),
        );
        let prompt = solution_prompt(&self.assistant, input, &analysis);
        let solution = self.call(Stage::Generate, model, &prompt).await?;

        if self.reflect(model, input, &solution).await {
            return Ok(self.wrap(Tier::Complex, model, solution, true, analysis.technologies));
        }

        let (text, is_valid) = self.improve(model, input, solution).await;
        Ok(self.wrap(Tier::Complex, model, text, is_valid, analysis.technologies))
    }

    async fn analyze(
        &self,
        model: &ModelDescriptor,
        input: &str,
    ) -> Result<Analysis, OrchestratorError> {
        self.events.emit(
            EventKind::ComplexAnalysisStart,
            json!({ "model": model.identifier }),
        );

        let raw = self.call(Stage::Analyze, model, &analysis_prompt(input)).await?;
        let (analysis, degraded) = match Analysis::parse(&raw) {
            Some(analysis) => (analysis, false),
            None => {
                warn!(model = %model.identifier, "analysis response is not a JSON object, using degraded analysis");
                (Analysis::degraded(), true)
            }
        };

        self.events.emit(
            EventKind::AnalysisComplete,
            json!({
                "technologies": analysis.technologies,
                "approaches": analysis.approaches,
                "complexity": analysis.complexity,
                "degraded": degraded,
            }),
        );
        Ok(analysis)
    }

    /// Returns the verdict; `true` on any failure.
    async fn reflect(&self, model: &ModelDescriptor, input: &str, solution: &str) -> bool {
        self.events.emit(
            EventKind::ReflectionStart,
            json!({ "model": model.identifier }),
        );

        let prompt = reflection_prompt(&self.assistant, input, solution);
        let (valid, fail_open) = match self.call(Stage::Reflect, model, &prompt).await {
            Ok(raw) => match parse_verdict(&raw) {
                Some(valid) => (valid, false),
                None => {
                    warn!(model = %model.identifier, "unparsable reflection verdict, treating solution as valid");
                    (true, true)
                }
            },
            Err(e) => {
                warn!(model = %model.identifier, error = %e, "reflection failed, treating solution as valid");
                (true, true)
            }
        };

        self.events.emit(
            EventKind::ReflectionComplete,
            json!({ "valid": valid, "failOpen": fail_open }),
        );
        valid
    }

    /// Returns the final text and whether it is considered valid.
    async fn improve(&self, model: &ModelDescriptor, input: &str, solution: String) -> (String, bool) {
        self.events.emit(
            EventKind::ImprovementStart,
            json!({ "model": model.identifier }),
        );

        let prompt = improvement_prompt(&self.assistant, input, &solution);
        let (text, fallback) = match self.call(Stage::Improve, model, &prompt).await {
            Ok(improved) => (improved, false),
            Err(e) => {
                warn!(model = %model.identifier, error = %e, "improvement failed, keeping initial solution");
                (solution, true)
            }
        };

        self.events.emit(
            EventKind::ImprovementComplete,
            json!({ "fallback": fallback }),
        );
        (text, !fallback)
    }

    async fn call(
        &self,
        stage: Stage,
        model: &ModelDescriptor,
        prompt: &str,
    ) -> Result<String, OrchestratorError> {
        debug!(stage = stage.as_str(), model = %model.identifier, "backend call");
        metrics::inc_backend_call(stage.as_str());
        self.worker.generate(model, prompt).await
    }

    fn wrap(
        &self,
        tier: Tier,
        model: &ModelDescriptor,
        text: String,
        is_valid: bool,
        technologies: Vec<String>,
    ) -> GenerationResult {
        GenerationResult {
            text,
            is_valid,
            tier,
            technologies,
            model_used: model.identifier.clone(),
            metrics: ResultMetrics::default(),
        }
    }
}
