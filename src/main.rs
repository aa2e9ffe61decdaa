//! Demo binary for tiered-prompt-orchestrator
//!
//! Routes each prompt (CLI arguments, or one per stdin line when none are
//! given) through the orchestrator and prints every result as JSON, followed
//! by the metrics snapshot.
//!
//! ## Environment Variables
//!
//! - `ORCHESTRATOR_CONFIG`: path to a TOML config (default configuration when unset)
//! - `OPENAI_API_KEY`: use the OpenAI backend instead of the echo worker
//! - `LOG_FORMAT=json`: structured JSON output (production)
//! - `RUST_LOG=info`: log level filter

use std::io::BufRead;
use std::path::Path;
use std::sync::Arc;

use tiered_prompt_orchestrator::{
    config, init_tracing, metrics, EchoWorker, ModelWorker, OpenAiWorker, Orchestrator,
    OrchestratorConfig,
};
use tracing::{info, warn};

fn load_config() -> Result<OrchestratorConfig, config::ConfigError> {
    match std::env::var("ORCHESTRATOR_CONFIG") {
        Ok(path) if !path.trim().is_empty() => config::load_from_file(Path::new(&path)),
        _ => Ok(OrchestratorConfig::default()),
    }
}

fn select_worker() -> Arc<dyn ModelWorker> {
    match OpenAiWorker::from_env() {
        Ok(worker) => {
            info!(base_url = worker.base_url(), "using OpenAI backend");
            Arc::new(worker)
        }
        Err(_) => {
            info!("OPENAI_API_KEY not set, using echo backend");
            Arc::new(EchoWorker::with_delay(10))
        }
    }
}

fn read_prompts() -> std::io::Result<Vec<String>> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    if !args.is_empty() {
        return Ok(args);
    }
    std::io::stdin()
        .lock()
        .lines()
        .filter(|line| !matches!(line, Ok(l) if l.trim().is_empty()))
        .collect()
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize structured tracing (JSON or pretty, based on LOG_FORMAT env)
    let _ = init_tracing();
    metrics::init_metrics()?;

    let config = load_config()?;
    let orchestrator = Orchestrator::new(config, select_worker())?;
    orchestrator.start();

    let prompts = read_prompts()?;
    info!(count = prompts.len(), "processing prompts");

    for prompt in &prompts {
        match orchestrator.process(prompt).await {
            Ok(result) => println!("{}", serde_json::to_string_pretty(&result)?),
            Err(e) => {
                warn!(kind = e.kind(), "prompt failed");
                println!("{}", serde_json::json!({ "error": e.to_string(), "kind": e.kind() }));
            }
        }
    }

    println!("{}", serde_json::to_string_pretty(&orchestrator.metrics())?);

    orchestrator.shutdown().await;
    info!("demo complete");
    Ok(())
}
