//! Orchestrator: the `delegate` entry point wiring the Plan Compiler, DAG
//! Scheduler, Sub-Task Runner, and Combine Executor into one call.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::combine::{self, CombineNode, StrategyTools};
use crate::config::DelegationConfig;
use crate::error::Result;
use crate::events::{Event, EventEmitter, EventKind};
use crate::interfaces::{Engine, StrategySession};
use crate::plan::{self, Node, NodeKind};
use crate::scheduler;
use crate::subtask::{self, RunResult};

/// One task result folded down to its stable public shape: always present
/// for a task node, whether or not it created any steps.
#[derive(Debug, Clone, Serialize)]
pub struct ValidatedResult {
    pub id: String,
    pub task: String,
    pub steps: Vec<Value>,
    pub notes: Option<String>,
}

/// A task result rejected for creating no steps, carrying the taxonomy code
/// that explains why.
#[derive(Debug, Clone, Serialize)]
pub struct RejectedResult {
    pub id: String,
    pub task: String,
    pub code: String,
    pub message: String,
}

/// The full result of one `delegate` call.
#[derive(Debug, Clone, Serialize)]
pub struct DelegationSummary {
    pub goal: String,
    pub tasks: Vec<Node>,
    pub combines: Vec<Node>,
    pub graph_id: String,
    pub graph_name: String,
    pub graph_description: String,
    pub combine_results: Vec<RunResult>,
    pub combine_errors: Vec<RunResult>,
    pub results: Vec<ValidatedResult>,
    pub rejected: Vec<RejectedResult>,
}

/// The external adapters and tuning knobs `delegate` drives. Cheap to clone:
/// every field is either an `Arc`, a channel handle, or a token, so one
/// instance is cloned once per scheduled node.
#[derive(Clone)]
pub struct DelegateContext {
    pub strategy_session: Arc<dyn StrategySession>,
    pub strategy_tools: Arc<dyn StrategyTools>,
    pub engine: Arc<dyn Engine>,
    pub emit: EventEmitter,
    pub config: Arc<DelegationConfig>,
    pub cancellation: Option<CancellationToken>,
}

/// Derive a short graph name and a longer description from a free-text goal.
///
/// The name is the goal's leading clause (trimmed to a word boundary under
/// 60 characters); the description is the goal verbatim.
fn derive_graph_metadata(goal: &str) -> (String, String) {
    const MAX_NAME_LEN: usize = 60;
    let goal = goal.trim();
    if goal.is_empty() {
        return ("Untitled Strategy".to_string(), String::new());
    }
    let name = if goal.chars().count() <= MAX_NAME_LEN {
        goal.to_string()
    } else {
        let truncated: String = goal.chars().take(MAX_NAME_LEN).collect();
        match truncated.rfind(' ') {
            Some(cut) if cut > 0 => format!("{}\u{2026}", &truncated[..cut]),
            _ => format!("{truncated}\u{2026}"),
        }
    };
    (name, goal.to_string())
}

/// Render optional per-task context for a subtask prompt: strings pass
/// through trimmed, everything else renders as sorted, indented JSON.
fn format_task_context(context: Option<&Value>) -> Option<String> {
    match context? {
        Value::Null => None,
        Value::String(s) => {
            let trimmed = s.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        }
        other => serde_json::to_string_pretty(other).ok(),
    }
}

fn step_label(step: &Value) -> Option<String> {
    let step_id = step.get("stepId").or_else(|| step.get("id")).and_then(Value::as_str)?;
    let name = step
        .get("displayName")
        .or_else(|| step.get("display_name"))
        .or_else(|| step.get("searchName"))
        .or_else(|| step.get("transformName"))
        .and_then(Value::as_str);
    Some(match name {
        Some(name) => format!("{step_id} ({name})"),
        None => step_id.to_string(),
    })
}

fn node_hint(node: &Node) -> Option<String> {
    match &node.kind {
        NodeKind::Task { hint, .. } if !hint.trim().is_empty() => Some(hint.clone()),
        NodeKind::Combine { hint: Some(h), .. } if !h.trim().is_empty() => Some(h.clone()),
        _ => None,
    }
}

/// Render the completed-dependency summary a task's prompt is built from:
/// one line per dependency naming the steps it created (or that it created
/// none), plus the raw JSON of every such step for the model to inspect.
fn format_dependency_context(
    node_id: &str,
    nodes_by_id: &HashMap<String, Node>,
    results_by_id: &HashMap<String, RunResult>,
) -> Option<String> {
    let deps = &nodes_by_id.get(node_id)?.depends_on;
    if deps.is_empty() {
        return None;
    }

    let mut lines = Vec::new();
    let mut structured_steps = Vec::new();

    for dep_id in deps {
        let dep_node = nodes_by_id.get(dep_id);
        let dep_task = dep_node.map(Node::display_task).unwrap_or_else(|| dep_id.clone());
        let hint_suffix = dep_node
            .and_then(node_hint)
            .map(|h| format!(" (hint: {h})"))
            .unwrap_or_default();

        let mut dep_steps = Vec::new();
        if let Some(result) = results_by_id.get(dep_id) {
            for step in &result.steps {
                if let Some(label) = step_label(step) {
                    dep_steps.push(label);
                    structured_steps.push(step.clone());
                }
            }
        }

        if dep_steps.is_empty() {
            lines.push(format!("- {dep_id}: {dep_task}{hint_suffix} \u{2192} no steps created"));
        } else {
            lines.push(format!(
                "- {dep_id}: {dep_task}{hint_suffix} \u{2192} {}",
                dep_steps.join(", ")
            ));
        }
    }

    if !structured_steps.is_empty() {
        lines.push("Dependency steps (JSON):".to_string());
        if let Ok(json) = serde_json::to_string_pretty(&structured_steps) {
            lines.push(json);
        }
    }

    Some(lines.join("\n"))
}

/// Split task results into their validated public shape and the subset
/// rejected for creating no steps. A result with no steps appears in both:
/// it is still validated (with an empty `steps`), and separately flagged
/// rejected so callers can surface the failure without losing the record.
fn partition_task_results(results: &[RunResult]) -> (Vec<ValidatedResult>, Vec<RejectedResult>) {
    let mut validated = Vec::with_capacity(results.len());
    let mut rejected = Vec::new();

    for result in results {
        if result.steps.is_empty() {
            rejected.push(RejectedResult {
                id: result.id.clone(),
                task: result.task.clone(),
                code: "NO_STEPS_CREATED".to_string(),
                message: "No steps created for the subtask.".to_string(),
            });
        }
        validated.push(ValidatedResult {
            id: result.id.clone(),
            task: result.task.clone(),
            steps: result.steps.clone(),
            notes: result.notes.clone(),
        });
    }

    (validated, rejected)
}

async fn run_node(
    node_id: String,
    node: Node,
    dependency_context: Option<String>,
    results_so_far: &HashMap<String, RunResult>,
    goal: &str,
    graph_id: &str,
    ctx: &DelegateContext,
) -> RunResult {
    let task_label = node.display_task();
    match node.kind {
        NodeKind::Combine {
            operator,
            inputs,
            display_name,
            colocation,
            ..
        } => {
            combine::run_combine(
                CombineNode {
                    id: &node_id,
                    task: &task_label,
                    operator,
                    inputs: &inputs,
                    display_name: display_name.as_deref(),
                    colocation: colocation.as_ref(),
                },
                results_so_far,
                ctx.strategy_tools.as_ref(),
                &ctx.emit,
            )
            .await
        }
        NodeKind::Task { task, hint, context } => {
            let mut task_text = task;
            if !hint.trim().is_empty() {
                task_text = format!("{task_text}\n\nHint: {hint}");
            }

            let extra_context = format_task_context(context.as_ref());
            let dep_context = match (dependency_context, extra_context) {
                (Some(dep), Some(extra)) => {
                    Some(format!("{dep}\n\nPlanner-provided context (JSON/text):\n{extra}"))
                }
                (Some(dep), None) => Some(dep),
                (None, Some(extra)) => {
                    Some(format!("Planner-provided context (JSON/text):\n{extra}"))
                }
                (None, None) => None,
            };

            match subtask::run_task(
                &node_id,
                &task_text,
                goal,
                Some(graph_id),
                dep_context.as_deref(),
                ctx.engine.as_ref(),
                &ctx.config,
                &ctx.emit,
                ctx.cancellation.as_ref(),
            )
            .await
            {
                Ok(result) => result,
                Err(err) => RunResult {
                    id: node_id,
                    task: task_text,
                    kind: "task".to_string(),
                    steps: Vec::new(),
                    notes: Some("failed".to_string()),
                    errors: vec![err.to_string()],
                },
            }
        }
    }
}

/// Compile `plan`, run every task/combine node it describes, and fold the
/// results into a [`DelegationSummary`].
///
/// Returns `Err` before scheduling anything if the plan fails to compile; no
/// events are emitted in that case.
pub async fn delegate(
    goal: impl Into<String>,
    plan_value: &Value,
    ctx: DelegateContext,
) -> Result<DelegationSummary> {
    let goal = goal.into();
    let compiled = plan::compile(goal.clone(), plan_value)?;

    let (graph_name, graph_description) = derive_graph_metadata(&goal);

    let graph = match ctx.strategy_session.get_graph(None).await {
        Some(graph) => graph,
        None => ctx.strategy_session.create_graph(&graph_name, None).await,
    };
    let graph_id = graph.id.clone();

    ctx.emit.emit_kind(
        EventKind::GraphSnapshot,
        serde_json::json!({ "graphSnapshot": &graph }),
    );

    let nodes_by_id = compiled.nodes_by_id.clone();
    let dependents = compiled.dependents.clone();

    let (results, _results_by_id) = scheduler::run_dag(
        &nodes_by_id,
        &dependents,
        ctx.config.max_concurrency,
        ctx.cancellation.clone(),
        |node_id, node, dependency_context, results_so_far| {
            let ctx = ctx.clone();
            let goal = goal.clone();
            let graph_id = graph_id.clone();
            let results_so_far = results_so_far.clone();
            async move {
                run_node(
                    node_id,
                    node,
                    dependency_context,
                    &results_so_far,
                    &goal,
                    &graph_id,
                    &ctx,
                )
                .await
            }
        },
        format_dependency_context,
    )
    .await;

    let task_results: Vec<RunResult> = results.iter().filter(|r| r.kind == "task").cloned().collect();
    let (validated, rejected) = partition_task_results(&task_results);

    let combine_results: Vec<RunResult> = results
        .iter()
        .filter(|r| r.kind == "combine" && r.primary_step_id().is_some())
        .cloned()
        .collect();
    let combine_errors: Vec<RunResult> = results
        .iter()
        .filter(|r| r.kind == "combine" && !r.errors.is_empty())
        .cloned()
        .collect();

    let mut graph = graph;
    graph.name = graph_name.clone();
    ctx.strategy_session.update_graph(graph.clone()).await;
    ctx.emit.emit_kind(
        EventKind::GraphSnapshot,
        serde_json::json!({ "graphSnapshot": &graph }),
    );

    Ok(DelegationSummary {
        goal,
        tasks: compiled.tasks,
        combines: compiled.combines,
        graph_id,
        graph_name,
        graph_description,
        combine_results,
        combine_errors,
        results: validated,
        rejected,
    })
}

/// Run `delegate` as the bus's sole producer: emits `message_start` before
/// anything else, then `delegate`'s own events, then enqueues a single
/// `message_end` regardless of outcome. A `delegate` failure is first
/// enqueued as an `error` event; this does not change `delegate`'s own
/// contract of emitting nothing when the plan fails to compile.
///
/// Mirrors the producer-task wrapper a streaming transport would build
/// around the bare `delegate` call: `message_start` yielded up front,
/// the real work wrapped in a try/except that turns a raised error into
/// an `error` event, and a `finally` that always emits `message_end`.
pub async fn run_delegation_stream(
    goal: impl Into<String>,
    plan_value: &Value,
    ctx: DelegateContext,
) -> Result<DelegationSummary> {
    let goal = goal.into();
    ctx.emit.emit_kind(EventKind::MessageStart, serde_json::json!({ "goal": &goal }));

    let result = delegate(goal, plan_value, ctx.clone()).await;

    if let Err(err) = &result {
        ctx.emit.emit(Event::error(err.to_string()));
    }
    ctx.emit.emit(Event::message_end());

    result
}
