//! Combine Executor: folds two or more resolved step results into a single
//! step through a sequence of boolean (or colocation) combine tool calls.

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::{DelegationError, Result};
use crate::events::{EventEmitter, EventKind};
use crate::operator::{CombineOp, ColocationParams};
use crate::subtask::RunResult;

/// The strategy-mutation surface the combine executor calls into.
///
/// A thin seam over the same `create_step` tool a sub-task's agent would
/// call, so both paths produce identical step shapes.
#[async_trait]
pub trait StrategyTools: Send + Sync {
    async fn create_step(
        &self,
        primary_input_step_id: &str,
        secondary_input_step_id: &str,
        operator: &str,
        display_name: Option<&str>,
        upstream: Option<i64>,
        downstream: Option<i64>,
    ) -> Value;
}

/// Inputs describing one combine node, independent of how the plan compiler
/// represented it.
pub struct CombineNode<'a> {
    pub id: &'a str,
    pub task: &'a str,
    pub operator: CombineOp,
    pub inputs: &'a [String],
    pub display_name: Option<&'a str>,
    pub colocation: Option<&'a ColocationParams>,
}

/// Run a combine node: resolve each input to its primary created step id,
/// then iteratively fold them together via `strategy_tools.create_step`.
pub async fn run_combine(
    node: CombineNode<'_>,
    results_by_id: &HashMap<String, RunResult>,
    strategy_tools: &dyn StrategyTools,
    emit: &EventEmitter,
) -> RunResult {
    if node.operator == CombineOp::Colocate {
        if let Some(params) = node.colocation {
            let errors = params.validate();
            if !errors.is_empty() {
                let detail = errors.join("; ");
                let code = DelegationError::ValidationError(detail.clone()).code();
                return failure(node.id, node.task, format!("[{code}] {detail}"));
            }
        }
    }

    let mut resolved_inputs = Vec::with_capacity(node.inputs.len());
    let mut missing = Vec::new();
    for input in node.inputs {
        match results_by_id.get(input).and_then(RunResult::primary_step_id) {
            Some(step_id) => resolved_inputs.push(step_id),
            None => missing.push(input.clone()),
        }
    }
    if !missing.is_empty() {
        return RunResult {
            id: node.id.to_string(),
            task: node.task.to_string(),
            kind: "combine".to_string(),
            steps: Vec::new(),
            notes: Some("missing_inputs".to_string()),
            errors: vec![format!("missing combine inputs: {}", missing.join(", "))],
        };
    }

    let operator_str = node.operator.wdk_operator().unwrap_or("COLOCATE");
    let mut current_step_id = resolved_inputs[0].clone();
    let mut created_steps = Vec::new();

    for (index, next_step_id) in resolved_inputs.iter().skip(1).enumerate() {
        let is_final = index + 2 == resolved_inputs.len();
        let (upstream, downstream) = node
            .colocation
            .map(|p| (Some(p.upstream), Some(p.downstream)))
            .unwrap_or((None, None));
        let response = strategy_tools
            .create_step(
                &current_step_id,
                next_step_id,
                operator_str,
                if is_final { node.display_name } else { None },
                upstream,
                downstream,
            )
            .await;

        let ok_false = response.get("ok").and_then(Value::as_bool) == Some(false);
        let has_error = response.get("error").map(|v| !v.is_null()).unwrap_or(false);
        if ok_false || has_error {
            return failure(node.id, node.task, format!("[COMBINE_FAILED] combine step failed: {response}"));
        }

        emit.emit_kind(
            EventKind::StrategyUpdate,
            serde_json::json!({ "graphId": response.get("graphId"), "step": response }),
        );

        if let Some(step_id) = response.get("stepId").and_then(Value::as_str) {
            current_step_id = step_id.to_string();
        }
        created_steps.push(response);
    }

    let final_step = serde_json::json!({
        "stepId": current_step_id,
        "displayName": node.display_name.unwrap_or(node.task),
    });

    RunResult {
        id: node.id.to_string(),
        task: node.task.to_string(),
        kind: "combine".to_string(),
        steps: vec![final_step],
        notes: Some("created".to_string()),
        errors: Vec::new(),
    }
}

fn failure(id: &str, task: &str, detail: String) -> RunResult {
    RunResult {
        id: id.to_string(),
        task: task.to_string(),
        kind: "combine".to_string(),
        steps: Vec::new(),
        notes: Some("failed".to_string()),
        errors: vec![detail],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StubTools {
        response: Value,
    }

    #[async_trait]
    impl StrategyTools for StubTools {
        async fn create_step(
            &self,
            _primary_input_step_id: &str,
            _secondary_input_step_id: &str,
            _operator: &str,
            _display_name: Option<&str>,
            _upstream: Option<i64>,
            _downstream: Option<i64>,
        ) -> Value {
            self.response.clone()
        }
    }

    fn done_result(step_id: &str) -> RunResult {
        RunResult {
            id: "x".to_string(),
            task: "x".to_string(),
            kind: "task".to_string(),
            steps: vec![serde_json::json!({ "stepId": step_id })],
            notes: Some("created".to_string()),
            errors: Vec::new(),
        }
    }

    #[tokio::test]
    async fn folds_two_inputs_into_one_step() {
        let mut results_by_id = HashMap::new();
        results_by_id.insert("a".to_string(), done_result("step_a"));
        results_by_id.insert("b".to_string(), done_result("step_b"));

        let tools = StubTools {
            response: serde_json::json!({ "ok": true, "stepId": "step_c", "graphId": "g1" }),
        };
        let (emitter, _rx) = crate::events::event_channel(8);

        let node = CombineNode {
            id: "n1",
            task: "combine a and b",
            operator: CombineOp::Intersect,
            inputs: &["a".to_string(), "b".to_string()],
            display_name: None,
            colocation: None,
        };

        let result = run_combine(node, &results_by_id, &tools, &emitter).await;
        assert_eq!(result.notes.as_deref(), Some("created"));
        assert_eq!(result.primary_step_id().as_deref(), Some("step_c"));
    }

    #[tokio::test]
    async fn reports_missing_inputs() {
        let results_by_id = HashMap::new();
        let tools = StubTools {
            response: serde_json::json!({ "ok": true }),
        };
        let (emitter, _rx) = crate::events::event_channel(8);

        let node = CombineNode {
            id: "n1",
            task: "combine",
            operator: CombineOp::Union,
            inputs: &["a".to_string(), "b".to_string()],
            display_name: None,
            colocation: None,
        };

        let result = run_combine(node, &results_by_id, &tools, &emitter).await;
        assert_eq!(result.notes.as_deref(), Some("missing_inputs"));
        assert!(result.steps.is_empty());
    }

    #[tokio::test]
    async fn colocate_rejects_negative_distance() {
        let mut results_by_id = HashMap::new();
        results_by_id.insert("a".to_string(), done_result("step_a"));
        results_by_id.insert("b".to_string(), done_result("step_b"));

        let tools = StubTools {
            response: serde_json::json!({ "ok": true, "stepId": "step_c" }),
        };
        let (emitter, _rx) = crate::events::event_channel(8);
        let bad_params = ColocationParams {
            upstream: -5,
            downstream: 0,
            strand: crate::operator::Strand::Both,
        };

        let node = CombineNode {
            id: "n1",
            task: "colocate",
            operator: CombineOp::Colocate,
            inputs: &["a".to_string(), "b".to_string()],
            display_name: None,
            colocation: Some(&bad_params),
        };

        let result = run_combine(node, &results_by_id, &tools, &emitter).await;
        assert_eq!(result.notes.as_deref(), Some("failed"));
    }

    #[tokio::test]
    async fn propagates_tool_failure_response() {
        let mut results_by_id = HashMap::new();
        results_by_id.insert("a".to_string(), done_result("step_a"));
        results_by_id.insert("b".to_string(), done_result("step_b"));

        let tools = StubTools {
            response: serde_json::json!({ "ok": false, "error": "WDK rejected parameters" }),
        };
        let (emitter, _rx) = crate::events::event_channel(8);

        let node = CombineNode {
            id: "n1",
            task: "combine",
            operator: CombineOp::Intersect,
            inputs: &["a".to_string(), "b".to_string()],
            display_name: None,
            colocation: None,
        };

        let result = run_combine(node, &results_by_id, &tools, &emitter).await;
        assert_eq!(result.notes.as_deref(), Some("failed"));
    }
}
