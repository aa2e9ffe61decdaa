//! Shared test doubles for integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use tiered_prompt_orchestrator::{
    EchoWorker, ModelDescriptor, ModelWorker, Orchestrator, OrchestratorConfig, OrchestratorError,
};

pub const ANALYSIS_JSON: &str =
    r#"{"technologies": ["rust", "data structures"], "approaches": ["recursive insert"], "complexity": "Complex"}"#;

/// Identify the pipeline stage a prompt belongs to.
pub fn stage_of(prompt: &str) -> &'static str {
    if prompt.starts_with("Analyze the following request") {
        "analyze"
    } else if prompt.starts_with("Review the solution below") {
        "reflect"
    } else if prompt.contains("judged incomplete") {
        "improve"
    } else if prompt.contains("Solve the request below") {
        "generate"
    } else if prompt.contains("Question:") {
        "answer"
    } else {
        "respond"
    }
}

/// Backend double: answers by stage, records every call, and can fail the
/// first `n` calls, every call to one stage, or every call with a
/// non-retryable error.
pub struct ScriptedWorker {
    calls: Mutex<Vec<(String, &'static str)>>,
    verdict: Mutex<String>,
    analysis: Mutex<String>,
    fail_first: AtomicU32,
    fail_stage: Mutex<Option<&'static str>>,
    reject_with: Mutex<Option<String>>,
}

impl ScriptedWorker {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: Mutex::new(Vec::new()),
            verdict: Mutex::new("true".into()),
            analysis: Mutex::new(ANALYSIS_JSON.into()),
            fail_first: AtomicU32::new(0),
            fail_stage: Mutex::new(None),
            reject_with: Mutex::new(None),
        })
    }

    pub fn set_verdict(&self, verdict: &str) {
        *self.verdict.lock() = verdict.to_string();
    }

    pub fn set_analysis(&self, analysis: &str) {
        *self.analysis.lock() = analysis.to_string();
    }

    pub fn fail_first(&self, n: u32) {
        self.fail_first.store(n, Ordering::SeqCst);
    }

    pub fn fail_stage(&self, stage: &'static str) {
        *self.fail_stage.lock() = Some(stage);
    }

    /// Fail every call with `OrchestratorError::Other(message)`.
    pub fn reject_with(&self, message: &str) {
        *self.reject_with.lock() = Some(message.to_string());
    }

    /// Stage names in call order.
    pub fn stages(&self) -> Vec<&'static str> {
        self.calls.lock().iter().map(|(_, s)| *s).collect()
    }

    /// Model identifiers in call order.
    pub fn models(&self) -> Vec<String> {
        self.calls.lock().iter().map(|(m, _)| m.clone()).collect()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }
}

#[async_trait]
impl ModelWorker for ScriptedWorker {
    async fn generate(
        &self,
        model: &ModelDescriptor,
        prompt: &str,
    ) -> Result<String, OrchestratorError> {
        let stage = stage_of(prompt);
        self.calls.lock().push((model.identifier.clone(), stage));

        if let Some(message) = self.reject_with.lock().clone() {
            return Err(OrchestratorError::Other(message));
        }

        let remaining = self.fail_first.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fail_first.store(remaining - 1, Ordering::SeqCst);
            return Err(OrchestratorError::Backend("scripted transient failure".into()));
        }
        if *self.fail_stage.lock() == Some(stage) {
            return Err(OrchestratorError::Backend(format!("scripted {stage} failure")));
        }

        Ok(match stage {
            "analyze" => self.analysis.lock().clone(),
            "generate" => "initial solution".to_string(),
            "reflect" => self.verdict.lock().clone(),
            "improve" => "improved solution".to_string(),
            other => format!("{other} reply from {}", model.identifier),
        })
    }
}

/// Reference configuration without the admission spacing delay.
pub fn test_config() -> OrchestratorConfig {
    let mut config = OrchestratorConfig::default();
    config.rate_limit.min_spacing_ms = 0;
    config
}

pub fn orchestrator_with(worker: Arc<ScriptedWorker>, config: OrchestratorConfig) -> Orchestrator {
    Orchestrator::new(config, worker).expect("test: valid configuration")
}

pub fn echo_orchestrator() -> Orchestrator {
    Orchestrator::new(test_config(), Arc::new(EchoWorker::with_delay(0)))
        .expect("test: valid configuration")
}
