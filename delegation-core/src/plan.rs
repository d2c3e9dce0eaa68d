//! Plan Compiler: turns a nested, model-produced plan into a validated DAG.
//!
//! The input is untyped JSON because the planner (an LLM) does not reliably
//! emit a single consistent shape: field names vary (`task`/`text`,
//! `context`/`parameters`/`params`), node `type` is sometimes omitted when the
//! structure is unambiguous, and combine nodes may nest two children under
//! `inputs: [..]` or under explicit `left`/`right`. Compilation normalizes all
//! of that into a strict, address-stable DAG: every node gets a generated
//! `node_N` id, structurally identical nodes are deduplicated onto the same
//! id, and the resulting dependency graph is checked for cycles before it is
//! handed to the scheduler.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{DelegationError, Result};
use crate::operator::{CombineOp, ColocationParams, Strand};

/// A compiled node in the delegation DAG.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub id: String,
    #[serde(flatten)]
    pub kind: NodeKind,
    pub depends_on: Vec<String>,
}

/// The two node kinds a compiled plan can contain.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NodeKind {
    Task {
        task: String,
        hint: String,
        context: Option<Value>,
    },
    Combine {
        operator: CombineOp,
        inputs: [String; 2],
        display_name: Option<String>,
        hint: Option<String>,
        /// Only meaningful for `CombineOp::Colocate`; absent for every other
        /// operator.
        colocation: Option<ColocationParams>,
    },
}

impl Node {
    /// Display text for this node, falling back to a generated label for
    /// combine nodes with no `display_name`.
    pub fn display_task(&self) -> String {
        match &self.kind {
            NodeKind::Task { task, .. } => task.clone(),
            NodeKind::Combine {
                display_name,
                operator,
                ..
            } => display_name
                .clone()
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| format!("Combine {} ({:?})", self.id, operator)),
        }
    }
}

/// A compiled, validated delegation plan: a DAG of task and combine nodes
/// reachable from a single root.
#[derive(Debug, Clone)]
pub struct DelegationPlan {
    pub goal: String,
    pub root_id: String,
    pub tasks: Vec<Node>,
    pub combines: Vec<Node>,
    pub nodes_by_id: HashMap<String, Node>,
    pub dependents: HashMap<String, Vec<String>>,
}

struct Compiler {
    goal: String,
    node_counter: usize,
    tasks: Vec<Node>,
    combines: Vec<Node>,
    seen_signatures: HashMap<String, String>,
}

impl Compiler {
    fn new(goal: String) -> Self {
        Self {
            goal,
            node_counter: 0,
            tasks: Vec::new(),
            combines: Vec::new(),
            seen_signatures: HashMap::new(),
        }
    }

    fn new_id(&mut self) -> String {
        self.node_counter += 1;
        format!("node_{}", self.node_counter)
    }

    fn plan_invalid(&self, message: &str, detail: &str) -> DelegationError {
        DelegationError::plan_invalid(format!("{message} {detail} (goal: {})", self.goal))
    }

    /// Canonicalize a value for structural-dedup signatures: object keys are
    /// sorted, strings are trimmed, list order is preserved.
    fn canon(value: &Value) -> Value {
        match value {
            Value::Object(map) => {
                let mut out = Map::new();
                for (k, v) in map.iter() {
                    out.insert(k.clone(), Self::canon(v));
                }
                Value::Object(out)
            }
            Value::Array(items) => Value::Array(items.iter().map(Self::canon).collect()),
            Value::String(s) => Value::String(s.trim().to_string()),
            other => other.clone(),
        }
    }

    fn signature_of(value: &Value) -> String {
        serde_json::to_string(&Self::canon(value)).unwrap_or_default()
    }

    /// Get-or-create the id for a node, deduplicating on structural signature.
    fn get_or_create_node_id(
        &mut self,
        signature_obj: &Value,
        is_combine: bool,
        mut build: impl FnMut(&mut Self, &str) -> Node,
    ) -> String {
        let signature = Self::signature_of(signature_obj);
        if let Some(existing) = self.seen_signatures.get(&signature) {
            return existing.clone();
        }
        let id = self.new_id();
        self.seen_signatures.insert(signature, id.clone());
        let node = build(self, &id);
        if is_combine {
            self.combines.push(node);
        } else {
            self.tasks.push(node);
        }
        id
    }

    fn compile_dependencies(&mut self, nodes: &[Option<&Value>]) -> Result<Vec<String>> {
        let mut ids = Vec::with_capacity(nodes.len());
        for node in nodes.iter().flatten() {
            ids.push(self.compile_node(node)?);
        }
        Ok(ids)
    }

    fn compile_node(&mut self, node: &Value) -> Result<String> {
        let obj = node.as_object().ok_or_else(|| {
            self.plan_invalid("Invalid plan node.", "Each node must be an object.")
        })?;

        let mut node_type = get_field(obj, &["type", "kind"])
            .and_then(Value::as_str)
            .unwrap_or("")
            .trim()
            .to_lowercase();

        if node_type.is_empty() {
            let has_operator = get_field(obj, &["operator", "op"]).is_some();
            let has_combine_shape = get_field(obj, &["left"]).is_some()
                || get_field(obj, &["right"]).is_some()
                || get_field(obj, &["inputs"]).is_some();
            if has_operator && has_combine_shape {
                node_type = "combine".to_string();
            } else if get_field(obj, &["task", "text"]).is_some() {
                node_type = "task".to_string();
            }
        }

        if node_type.is_empty() && obj.contains_key("id") {
            return Err(self.plan_invalid(
                "Invalid plan node.",
                "Do not use id-only references. Provide a full node object with 'type'.",
            ));
        }

        match node_type.as_str() {
            "combine" | "op" | "operator" => self.compile_combine(obj),
            "task" | "step" | "subtask" => self.compile_task(obj),
            other => Err(self.plan_invalid(
                "Invalid node type.",
                &format!("Node 'type' must be either 'task' or 'combine' (got '{other}')."),
            )),
        }
    }

    fn compile_combine(&mut self, obj: &Map<String, Value>) -> Result<String> {
        let op_raw = get_field(obj, &["operator", "op"]);
        let operator = op_raw
            .and_then(value_as_op_string)
            .and_then(|s| CombineOp::parse(&s).ok())
            .ok_or_else(|| {
                self.plan_invalid(
                    "Invalid combine operator.",
                    "Combine node requires a valid operator.",
                )
            })?;

        let inputs_raw = get_field(obj, &["inputs"]);
        let (left_node, right_node) = if let Some(inputs) = inputs_raw {
            let arr = inputs.as_array().filter(|a| a.len() == 2).ok_or_else(|| {
                self.plan_invalid(
                    "Invalid combine inputs.",
                    "Combine node inputs must be a list of exactly 2 child nodes.",
                )
            })?;
            (Some(&arr[0]), Some(&arr[1]))
        } else {
            let left = get_field(obj, &["left"]);
            let right = get_field(obj, &["right"]);
            if left.is_none() || right.is_none() {
                return Err(self.plan_invalid(
                    "Invalid combine inputs.",
                    "Combine node requires left and right child nodes.",
                ));
            }
            (left, right)
        };

        let dep_ids = self.compile_dependencies(&[left_node, right_node])?;
        let left_id = dep_ids[0].clone();
        let right_id = dep_ids[1].clone();

        let display_name = get_field(obj, &["display_name", "displayName"])
            .and_then(Value::as_str)
            .map(str::to_string);
        let hint = get_field(obj, &["hint"]).and_then(Value::as_str).map(str::to_string);

        let colocation = (operator == CombineOp::Colocate).then(|| ColocationParams {
            upstream: get_field(obj, &["upstream"]).and_then(Value::as_i64).unwrap_or(0),
            downstream: get_field(obj, &["downstream"]).and_then(Value::as_i64).unwrap_or(0),
            strand: get_field(obj, &["strand"])
                .and_then(Value::as_str)
                .map(|s| match s.to_lowercase().as_str() {
                    "same" => Strand::Same,
                    "opposite" => Strand::Opposite,
                    _ => Strand::Both,
                })
                .unwrap_or(Strand::Both),
        });

        let signature_obj = serde_json::json!({
            "kind": "combine",
            "operator": operator,
            "inputs": [left_id, right_id],
            "display_name": display_name,
            "hint": hint,
            "colocation": colocation,
        });

        let id = self.get_or_create_node_id(&signature_obj, true, |_, id| Node {
            id: id.to_string(),
            depends_on: vec![left_id.clone(), right_id.clone()],
            kind: NodeKind::Combine {
                operator,
                inputs: [left_id.clone(), right_id.clone()],
                display_name: display_name.clone(),
                hint: hint.clone(),
                colocation: colocation.clone(),
            },
        });
        Ok(id)
    }

    fn compile_task(&mut self, obj: &Map<String, Value>) -> Result<String> {
        let task_text = get_field(obj, &["task", "text"])
            .and_then(Value::as_str)
            .unwrap_or("")
            .trim()
            .to_string();
        if task_text.is_empty() {
            return Err(self.plan_invalid(
                "Invalid task node.",
                "Task node requires a non-empty 'task' string.",
            ));
        }

        let hint = get_field(obj, &["hint"])
            .and_then(Value::as_str)
            .unwrap_or("")
            .trim()
            .to_string();

        let context = get_field(obj, &["context", "parameters", "params"]).cloned();

        let input_node = get_field(obj, &["input"]);
        let dep_ids = self.compile_dependencies(&[input_node])?;

        let signature_obj = serde_json::json!({
            "kind": "task",
            "task": task_text,
            "hint": hint,
            "context": context,
            "depends_on": dep_ids,
        });

        let task_text_for_node = task_text.clone();
        let hint_for_node = hint.clone();
        let context_for_node = context.clone();
        let dep_ids_for_node = dep_ids.clone();
        let id = self.get_or_create_node_id(&signature_obj, false, move |_, id| Node {
            id: id.to_string(),
            depends_on: dep_ids_for_node.clone(),
            kind: NodeKind::Task {
                task: task_text_for_node.clone(),
                hint: hint_for_node.clone(),
                context: context_for_node.clone(),
            },
        });
        Ok(id)
    }
}

fn get_field<'a>(obj: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter().find_map(|k| obj.get(*k))
}

fn value_as_op_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.trim().to_string()),
        Value::Null => None,
        other => Some(other.to_string()),
    }
}

/// Compile a nested plan into a validated DAG.
///
/// Returns `Err(DelegationError::DelegationPlanInvalid)` if the plan is
/// structurally malformed, references an invalid operator, or its dependency
/// graph contains a cycle.
pub fn compile(goal: impl Into<String>, plan: &Value) -> Result<DelegationPlan> {
    let goal = goal.into();
    if !plan.is_object() {
        return Err(DelegationError::plan_invalid(format!(
            "plan is required when delegating. Provide a nested plan object as 'plan' (goal: {goal})"
        )));
    }

    let mut compiler = Compiler::new(goal.clone());
    let root_id = compiler.compile_node(plan)?;

    let mut nodes_by_id: HashMap<String, Node> = HashMap::new();
    for node in compiler.tasks.iter().chain(compiler.combines.iter()) {
        nodes_by_id.insert(node.id.clone(), node.clone());
    }

    if !nodes_by_id.contains_key(&root_id) {
        return Err(DelegationError::plan_invalid(format!(
            "Invalid root node. Root id missing after compilation: {root_id}"
        )));
    }

    let all_ids: Vec<String> = nodes_by_id.keys().cloned().collect();
    let mut indegree: HashMap<String, usize> = all_ids.iter().map(|id| (id.clone(), 0)).collect();
    let mut dependents: HashMap<String, Vec<String>> =
        all_ids.iter().map(|id| (id.clone(), Vec::new())).collect();

    for (node_id, node) in nodes_by_id.iter() {
        for dep in &node.depends_on {
            if nodes_by_id.contains_key(dep) {
                *indegree.get_mut(node_id).unwrap() += 1;
                dependents.get_mut(dep).unwrap().push(node_id.clone());
            }
        }
    }

    let mut pending = indegree.clone();
    let mut queue: Vec<String> = indegree
        .iter()
        .filter(|(_, count)| **count == 0)
        .map(|(id, _)| id.clone())
        .collect();
    let mut processed = 0usize;
    while let Some(current) = queue.pop() {
        processed += 1;
        for child in dependents.get(&current).cloned().unwrap_or_default() {
            let count = pending.get_mut(&child).unwrap();
            *count -= 1;
            if *count == 0 {
                queue.push(child);
            }
        }
    }
    if processed != all_ids.len() {
        return Err(DelegationError::plan_invalid(
            "Dependency cycle detected. Cycle detected in delegation graph (tasks/combines). Replan and retry.",
        ));
    }

    Ok(DelegationPlan {
        goal,
        root_id,
        tasks: compiler.tasks,
        combines: compiler.combines,
        nodes_by_id,
        dependents,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn compiles_single_task() {
        let plan = json!({"type": "task", "task": "find genes on chr1"});
        let compiled = compile("test goal", &plan).unwrap();
        assert_eq!(compiled.tasks.len(), 1);
        assert_eq!(compiled.combines.len(), 0);
        assert_eq!(compiled.root_id, "node_1");
    }

    #[test]
    fn infers_type_from_structure() {
        let plan = json!({
            "operator": "AND",
            "left": {"task": "search A"},
            "right": {"task": "search B"},
        });
        let compiled = compile("g", &plan).unwrap();
        assert_eq!(compiled.tasks.len(), 2);
        assert_eq!(compiled.combines.len(), 1);
    }

    #[test]
    fn dedups_structurally_identical_siblings() {
        let plan = json!({
            "operator": "UNION",
            "left": {"task": "same query", "hint": "h"},
            "right": {"task": "same query", "hint": "h"},
        });
        let compiled = compile("g", &plan).unwrap();
        assert_eq!(compiled.tasks.len(), 1, "identical task nodes must dedup to one id");
        assert_eq!(compiled.combines.len(), 1);
    }

    #[test]
    fn rejects_id_only_reference() {
        let plan = json!({"id": "node_1"});
        let err = compile("g", &plan).unwrap_err();
        assert_eq!(err.code(), "DELEGATION_PLAN_INVALID");
    }

    #[test]
    fn rejects_empty_task_text() {
        let plan = json!({"type": "task", "task": "   "});
        let err = compile("g", &plan).unwrap_err();
        assert_eq!(err.code(), "DELEGATION_PLAN_INVALID");
    }

    #[test]
    fn rejects_unknown_operator() {
        let plan = json!({
            "operator": "XOR",
            "left": {"task": "a"},
            "right": {"task": "b"},
        });
        let err = compile("g", &plan).unwrap_err();
        assert_eq!(err.code(), "DELEGATION_PLAN_INVALID");
    }

    #[test]
    fn accepts_inputs_array_form() {
        let plan = json!({
            "type": "combine",
            "operator": "INTERSECT",
            "inputs": [{"task": "a"}, {"task": "b"}],
        });
        let compiled = compile("g", &plan).unwrap();
        assert_eq!(compiled.combines.len(), 1);
    }

    #[test]
    fn colocate_node_captures_colocation_params() {
        let plan = json!({
            "operator": "COLOCATE",
            "left": {"task": "genes near marker"},
            "right": {"task": "known variants"},
            "upstream": 500,
            "downstream": 1000,
            "strand": "opposite",
        });
        let compiled = compile("g", &plan).unwrap();
        let root = &compiled.nodes_by_id[&compiled.root_id];
        match &root.kind {
            NodeKind::Combine { colocation, .. } => {
                let params = colocation.as_ref().expect("colocate node must carry params");
                assert_eq!(params.upstream, 500);
                assert_eq!(params.downstream, 1000);
                assert_eq!(params.strand, Strand::Opposite);
            }
            _ => panic!("expected combine node"),
        }
    }

    #[test]
    fn colocate_node_defaults_missing_fields() {
        let plan = json!({
            "operator": "COLOCATE",
            "left": {"task": "a"},
            "right": {"task": "b"},
        });
        let compiled = compile("g", &plan).unwrap();
        let root = &compiled.nodes_by_id[&compiled.root_id];
        match &root.kind {
            NodeKind::Combine { colocation, .. } => {
                let params = colocation.as_ref().expect("colocate node must carry params");
                assert_eq!(params.upstream, 0);
                assert_eq!(params.downstream, 0);
                assert_eq!(params.strand, Strand::Both);
            }
            _ => panic!("expected combine node"),
        }
    }

    #[test]
    fn non_colocate_combine_has_no_colocation_params() {
        let plan = json!({
            "operator": "AND",
            "left": {"task": "a"},
            "right": {"task": "b"},
        });
        let compiled = compile("g", &plan).unwrap();
        let root = &compiled.nodes_by_id[&compiled.root_id];
        match &root.kind {
            NodeKind::Combine { colocation, .. } => assert!(colocation.is_none()),
            _ => panic!("expected combine node"),
        }
    }

    #[test]
    fn rejects_combine_inputs_of_wrong_length() {
        let plan = json!({
            "type": "combine",
            "operator": "INTERSECT",
            "inputs": [{"task": "a"}],
        });
        let err = compile("g", &plan).unwrap_err();
        assert_eq!(err.code(), "DELEGATION_PLAN_INVALID");
    }

    #[test]
    fn task_context_aliases_are_accepted() {
        let plan = json!({"type": "task", "task": "x", "params": {"organism": "Pf3D7"}});
        let compiled = compile("g", &plan).unwrap();
        let root = &compiled.nodes_by_id[&compiled.root_id];
        match &root.kind {
            NodeKind::Task { context, .. } => {
                assert_eq!(context.as_ref().unwrap()["organism"], "Pf3D7");
            }
            _ => panic!("expected task node"),
        }
    }

    #[test]
    fn diamond_dependency_compiles_without_cycle() {
        let shared = json!({"task": "shared search"});
        let plan = json!({
            "operator": "UNION",
            "left": {"operator": "AND", "left": shared.clone(), "right": {"task": "b"}},
            "right": {"operator": "AND", "left": shared, "right": {"task": "c"}},
        });
        let compiled = compile("g", &plan).unwrap();
        // "shared search" dedups to a single task node reused by both AND combines.
        assert_eq!(compiled.tasks.len(), 3);
        assert_eq!(compiled.combines.len(), 3);
    }
}
