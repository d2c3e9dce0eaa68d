//! Delegation CLI - demo harness for running `delegate()` end to end.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use delegation_core::prelude::*;
use serde_json::Value;

#[derive(Parser)]
#[command(name = "delegate")]
#[command(about = "Demo harness for the delegation core", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile a plan file and run it against a stub engine/strategy tools,
    /// printing the resulting summary and every event emitted along the way.
    Run {
        /// Free-text delegation goal.
        #[arg(long)]
        goal: String,
        /// Path to a JSON file containing the nested plan.
        #[arg(long)]
        plan: PathBuf,
        /// Maximum concurrent sub-tasks.
        #[arg(long, default_value_t = 4)]
        max_concurrency: usize,
    },
    /// Compile a plan file and print the resulting DAG without running it.
    Compile {
        #[arg(long)]
        goal: String,
        #[arg(long)]
        plan: PathBuf,
    },
    Version,
}

/// An engine that echoes a single fabricated `create_step` tool result for
/// every task, useful for exercising the orchestrator without a real agent.
struct EchoEngine;

#[async_trait]
impl Engine for EchoEngine {
    async fn full_round_stream(&self, prompt: &str) -> delegation_core::prelude::Result<Vec<RoundMessage>> {
        let step_id = format!("step_{:x}", seahash(prompt));
        Ok(vec![
            RoundMessage {
                role: RoundRole::Assistant,
                content: Some(String::new()),
                tool_calls: vec![ToolCall {
                    id: "call_1".to_string(),
                    function_name: "create_step".to_string(),
                    arguments: Value::Null,
                }],
                tool_call_id: None,
            },
            RoundMessage {
                role: RoundRole::Function,
                content: Some(
                    serde_json::json!({ "stepId": step_id, "ok": true, "displayName": "demo step" })
                        .to_string(),
                ),
                tool_calls: Vec::new(),
                tool_call_id: Some("call_1".to_string()),
            },
        ])
    }
}

/// A combine tool that always succeeds, stamping a deterministic step id.
struct EchoStrategyTools;

#[async_trait]
impl StrategyTools for EchoStrategyTools {
    async fn create_step(
        &self,
        primary_input_step_id: &str,
        secondary_input_step_id: &str,
        operator: &str,
        display_name: Option<&str>,
        _upstream: Option<i64>,
        _downstream: Option<i64>,
    ) -> Value {
        let step_id = format!(
            "step_{:x}",
            seahash(&format!("{primary_input_step_id}:{secondary_input_step_id}:{operator}"))
        );
        serde_json::json!({
            "ok": true,
            "stepId": step_id,
            "graphId": "demo-graph",
            "displayName": display_name,
        })
    }
}

/// Cheap, dependency-free string hash for fabricating stable demo step ids.
fn seahash(input: &str) -> u64 {
    let mut hash: u64 = 0xcbf29ce484222325;
    for byte in input.bytes() {
        hash ^= byte as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash
}

fn load_plan(path: &PathBuf) -> Result<Value> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading plan file {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parsing plan file {}", path.display()))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Version => {
            println!("delegate {}", env!("CARGO_PKG_VERSION"));
            println!("delegation-core {}", delegation_core::VERSION);
        }
        Commands::Compile { goal, plan } => {
            let plan_value = load_plan(&plan)?;
            let compiled = compile(goal, &plan_value)?;
            println!(
                "root: {}\ntasks: {}\ncombines: {}",
                compiled.root_id,
                compiled.tasks.len(),
                compiled.combines.len()
            );
            for node in compiled.tasks.iter().chain(compiled.combines.iter()) {
                println!("  {} <- {:?} :: {}", node.id, node.depends_on, node.display_task());
            }
        }
        Commands::Run {
            goal,
            plan,
            max_concurrency,
        } => {
            let plan_value = load_plan(&plan)?;
            let (emit, rx) = event_channel(256);
            let config = Arc::new(DelegationConfig {
                max_concurrency,
                ..DelegationConfig::default()
            });

            let ctx = DelegateContext {
                strategy_session: Arc::new(InMemoryStrategySession::new()),
                strategy_tools: Arc::new(EchoStrategyTools),
                engine: Arc::new(EchoEngine),
                emit,
                config: config.clone(),
                cancellation: None,
            };

            let printer = tokio::spawn(async move {
                for event in drain(rx, config.drain_grace).await {
                    println!("{}", event.to_sse_frame().trim_end());
                }
            });

            let summary = delegate(goal, &plan_value, ctx).await?;
            printer.await.ok();

            println!(
                "\n{} validated, {} rejected, {} combine steps created",
                summary.results.len(),
                summary.rejected.len(),
                summary.combine_results.len()
            );
        }
    }

    Ok(())
}
