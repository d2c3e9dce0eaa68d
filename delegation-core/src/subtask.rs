//! Sub-Task Runner: drives one task node to completion against an [`Engine`],
//! retrying up to a configured attempt limit when a round produces no steps.

use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::config::DelegationConfig;
use crate::error::Result;
use crate::events::{EventEmitter, EventKind};
use crate::interfaces::{Engine, RoundRole};
use crate::parsing::{JsonParser, OutputParser};

/// Outcome of running a single DAG node (task or combine).
#[derive(Debug, Clone, serde::Serialize)]
pub struct RunResult {
    pub id: String,
    pub task: String,
    pub kind: String,
    pub steps: Vec<Value>,
    pub notes: Option<String>,
    pub errors: Vec<String>,
}

impl RunResult {
    /// The primary created step id, if any: the last entry in `steps` that
    /// carries a `stepId` field (scanned in reverse, matching how a combine
    /// node resolves its inputs).
    pub fn primary_step_id(&self) -> Option<String> {
        self.steps
            .iter()
            .rev()
            .find_map(|step| step.get("stepId").and_then(Value::as_str))
            .map(str::to_string)
    }
}

fn build_round_prompt(task: &str, goal: &str, graph_id: Option<&str>, dep_context: Option<&str>) -> String {
    let mut prompt = format!("Goal: {goal}\nTask: {task}\n");
    if let Some(graph_id) = graph_id {
        prompt.push_str(&format!("Graph: {graph_id}\n"));
    }
    if let Some(ctx) = dep_context {
        prompt.push_str(&format!("\n{ctx}\n"));
    }
    prompt
}

fn build_retry_prompt(task: &str, goal: &str, graph_id: Option<&str>, error_hint: &str) -> String {
    format!(
        "Retry the task and you MUST create at least one valid step.\n\
         Before creating anything:\n\
         - Use get_record_types() if record type is unclear.\n\
         - Use search_for_searches(query) to find relevant searches.\n\
         - Use get_search_parameters(record_type, search_name) to learn required params.\n\
         Execution rules:\n\
         - All parameter values must be strings.\n\
         - Use create_step for all step creation.\n\
         - If the step depends on a prior step, set primary_input_step_id.\n\
         - If the step needs a binary operator, set secondary_input_step_id + operator.\n\
         Previous issue: {error_hint}\n\
         Task: {task}\n\
         Graph: {graph_id}\n",
        graph_id = graph_id.unwrap_or("<none>")
    )
}

/// A tool result interpreted out of a function-role round message.
struct ToolInterpretation {
    step: Option<Value>,
    error: Option<String>,
}

/// Interpret a tool's JSON result: a `stepId` field counts as a created
/// step; `ok == false` or a truthy `error` contributes a message/code/error
/// string; a truthy `invalid` records the literal string `"invalid parameters"`.
fn interpret_tool_result(value: &Value) -> ToolInterpretation {
    let step = value
        .get("stepId")
        .filter(|v| !v.is_null())
        .map(|_| value.clone());

    let mut error = None;
    let ok_false = value.get("ok").and_then(Value::as_bool) == Some(false);
    let error_field = value.get("error");
    let error_truthy = match error_field {
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => !s.is_empty(),
        Some(Value::Null) | None => false,
        Some(_) => true,
    };
    if ok_false || error_truthy {
        error = value
            .get("message")
            .or_else(|| value.get("code"))
            .or(error_field)
            .and_then(Value::as_str)
            .map(str::to_string)
            .or_else(|| Some("tool call failed".to_string()));
    }
    if value.get("invalid").and_then(Value::as_bool) == Some(true) {
        error = Some("invalid parameters".to_string());
    }

    ToolInterpretation { step, error }
}

/// Run a task node against `engine` for up to `config.subtask_max_attempts`
/// attempts, each bounded by `config.subtask_timeout`.
///
/// Returns `Err` only when the engine itself fails outside of a timeout
/// (e.g. a transport error); the caller is expected to fold that into a
/// `SUBKANI_FAILED` result, matching the crate's error taxonomy.
pub async fn run_task(
    id: &str,
    task: &str,
    goal: &str,
    graph_id: Option<&str>,
    dep_context: Option<&str>,
    engine: &dyn Engine,
    config: &DelegationConfig,
    emit: &EventEmitter,
    cancellation: Option<&CancellationToken>,
) -> Result<RunResult> {
    emit.emit_kind(EventKind::SubkaniTaskStart, serde_json::json!({ "task": task }));

    let tool_result_parser = JsonParser::new();
    let mut prompt = build_round_prompt(task, goal, graph_id, dep_context);
    let mut created_steps: Vec<Value> = Vec::new();
    let mut last_errors: Vec<String> = Vec::new();

    for attempt in 0..config.subtask_max_attempts {
        if cancellation.is_some_and(CancellationToken::is_cancelled) {
            return Ok(RunResult {
                id: id.to_string(),
                task: task.to_string(),
                kind: "cancelled".to_string(),
                steps: Vec::new(),
                notes: Some("cancelled".to_string()),
                errors: Vec::new(),
            });
        }

        let round = tokio::time::timeout(config.subtask_timeout, engine.full_round_stream(&prompt)).await;

        let messages = match round {
            Err(_elapsed) => {
                emit.emit_kind(
                    EventKind::SubkaniTaskEnd,
                    serde_json::json!({ "task": task, "status": "timeout" }),
                );
                return Ok(RunResult {
                    id: id.to_string(),
                    task: task.to_string(),
                    kind: "task".to_string(),
                    steps: Vec::new(),
                    notes: Some("timeout".to_string()),
                    errors: Vec::new(),
                });
            }
            Ok(result) => result?,
        };

        let mut round_errors = Vec::new();
        for message in &messages {
            match message.role {
                RoundRole::Assistant => {
                    for call in &message.tool_calls {
                        emit.emit_kind(
                            EventKind::SubkaniToolCallStart,
                            serde_json::json!({ "id": call.id, "name": call.function_name }),
                        );
                    }
                }
                RoundRole::Function => {
                    emit.emit_kind(
                        EventKind::SubkaniToolCallEnd,
                        serde_json::json!({ "toolCallId": message.tool_call_id }),
                    );
                    if let Some(content) = &message.content {
                        if let Ok(parsed) = tool_result_parser.parse(content) {
                            let interpretation = interpret_tool_result(&parsed);
                            if let Some(step) = interpretation.step {
                                created_steps.push(step);
                            }
                            if let Some(err) = interpretation.error {
                                round_errors.push(err);
                            }
                        }
                    }
                }
            }
        }

        last_errors = round_errors;

        if !created_steps.is_empty() {
            for step in &created_steps {
                emit.emit_kind(
                    EventKind::StrategyUpdate,
                    serde_json::json!({ "step": step }),
                );
                if let Some(snapshot) = step.get("graphSnapshot") {
                    emit.emit_kind(
                        EventKind::GraphSnapshot,
                        serde_json::json!({ "graphSnapshot": snapshot }),
                    );
                }
            }
            emit.emit_kind(
                EventKind::SubkaniTaskEnd,
                serde_json::json!({ "task": task, "status": "done" }),
            );
            return Ok(RunResult {
                id: id.to_string(),
                task: task.to_string(),
                kind: "task".to_string(),
                steps: created_steps,
                notes: Some("created".to_string()),
                errors: Vec::new(),
            });
        }

        if attempt + 1 < config.subtask_max_attempts {
            emit.emit_kind(
                EventKind::SubkaniTaskRetry,
                serde_json::json!({ "task": task, "attempt": attempt + 1 }),
            );
            let hint = if last_errors.is_empty() {
                "no steps created".to_string()
            } else {
                last_errors.join("; ")
            };
            prompt = build_retry_prompt(task, goal, graph_id, &hint);
        }
    }

    emit.emit_kind(
        EventKind::SubkaniTaskEnd,
        serde_json::json!({ "task": task, "status": "no_steps" }),
    );
    Ok(RunResult {
        id: id.to_string(),
        task: task.to_string(),
        kind: "task".to_string(),
        steps: Vec::new(),
        notes: Some("no_steps".to_string()),
        errors: last_errors,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interfaces::{RoundMessage, ToolCall};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct ScriptedEngine {
        rounds: std::sync::Mutex<Vec<Vec<RoundMessage>>>,
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Engine for ScriptedEngine {
        async fn full_round_stream(&self, _prompt: &str) -> Result<Vec<RoundMessage>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut rounds = self.rounds.lock().unwrap();
            Ok(rounds.remove(0))
        }
    }

    fn function_message(content: &str) -> RoundMessage {
        RoundMessage {
            role: RoundRole::Function,
            content: Some(content.to_string()),
            tool_calls: Vec::new(),
            tool_call_id: Some("call_1".to_string()),
        }
    }

    fn assistant_with_call() -> RoundMessage {
        RoundMessage {
            role: RoundRole::Assistant,
            content: Some(String::new()),
            tool_calls: vec![ToolCall {
                id: "call_1".to_string(),
                function_name: "create_step".to_string(),
                arguments: Value::Null,
            }],
            tool_call_id: None,
        }
    }

    #[tokio::test]
    async fn returns_created_on_first_successful_round() {
        let engine = ScriptedEngine {
            rounds: std::sync::Mutex::new(vec![vec![
                assistant_with_call(),
                function_message(r#"{"stepId": "s1", "ok": true}"#),
            ]]),
            calls: Arc::new(AtomicUsize::new(0)),
        };
        let config = DelegationConfig::default();
        let (emitter, _rx) = crate::events::event_channel(32);

        let result = run_task("n1", "find genes", "goal", None, None, &engine, &config, &emitter, None)
            .await
            .unwrap();

        assert_eq!(result.notes.as_deref(), Some("created"));
        assert_eq!(result.steps.len(), 1);
        assert_eq!(result.primary_step_id().as_deref(), Some("s1"));
    }

    #[tokio::test]
    async fn retries_until_steps_created() {
        let engine = ScriptedEngine {
            rounds: std::sync::Mutex::new(vec![
                vec![function_message(r#"{"ok": false, "message": "bad search"}"#)],
                vec![
                    assistant_with_call(),
                    function_message(r#"{"stepId": "s2"}"#),
                ],
            ]),
            calls: Arc::new(AtomicUsize::new(0)),
        };
        let calls = engine.calls.clone();
        let config = DelegationConfig::default();
        let (emitter, _rx) = crate::events::event_channel(32);

        let result = run_task("n1", "t", "g", None, None, &engine, &config, &emitter, None)
            .await
            .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(result.notes.as_deref(), Some("created"));
    }

    struct StallingEngine;

    #[async_trait]
    impl Engine for StallingEngine {
        async fn full_round_stream(&self, _prompt: &str) -> Result<Vec<RoundMessage>> {
            tokio::time::sleep(std::time::Duration::from_secs(3600)).await;
            Ok(Vec::new())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn timed_out_round_reports_timeout_and_no_steps() {
        let config = DelegationConfig {
            subtask_timeout: std::time::Duration::from_millis(1),
            ..DelegationConfig::default()
        };
        let (emitter, _rx) = crate::events::event_channel(32);

        let result = run_task("n1", "t", "g", None, None, &StallingEngine, &config, &emitter, None)
            .await
            .unwrap();

        assert_eq!(result.notes.as_deref(), Some("timeout"));
        assert!(result.steps.is_empty());
    }

    #[tokio::test]
    async fn exhausts_attempts_and_reports_no_steps() {
        let mut rounds = Vec::new();
        for _ in 0..5 {
            rounds.push(vec![function_message(r#"{"ok": false, "message": "still wrong"}"#)]);
        }
        let engine = ScriptedEngine {
            rounds: std::sync::Mutex::new(rounds),
            calls: Arc::new(AtomicUsize::new(0)),
        };
        let config = DelegationConfig::default();
        let (emitter, _rx) = crate::events::event_channel(32);

        let result = run_task("n1", "t", "g", None, None, &engine, &config, &emitter, None)
            .await
            .unwrap();

        assert_eq!(result.notes.as_deref(), Some("no_steps"));
        assert!(result.steps.is_empty());
        assert_eq!(result.errors, vec!["still wrong".to_string()]);
    }

    #[test]
    fn interprets_invalid_parameters_literally() {
        let value = serde_json::json!({"invalid": true});
        let interpretation = interpret_tool_result(&value);
        assert_eq!(interpretation.error.as_deref(), Some("invalid parameters"));
    }
}
