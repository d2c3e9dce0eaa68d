//! DAG Scheduler: runs delegation-graph nodes with bounded concurrency while
//! honoring `depends_on` edges.
//!
//! A node becomes eligible to run the moment all of its dependencies have
//! produced a result; eligible nodes are popped LIFO (most recently made
//! ready goes first) and run concurrently up to `max_concurrency`. The loop
//! ends once nothing is ready and nothing is running.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::plan::Node;

/// Run every node in `nodes_by_id`, respecting `dependents` edges, with at
/// most `max_concurrency` nodes executing at once (clamped to at least 1).
///
/// `run_node` is invoked once per node with the node's id, a clone of the
/// node itself, a caller-formatted dependency context string (built from
/// `results_by_id` so far), and a read-only view of every result completed
/// before this node became ready (enough for a combine node to resolve its
/// own inputs, which are always among its dependencies). `cancellation`, if
/// set, stops scheduling *new* nodes once triggered; nodes already running
/// are left to complete (they are expected to observe the same token
/// themselves if they need to bail out early).
///
/// Returns the results in completion order alongside a node-id-keyed map.
pub async fn run_dag<F, Fut, R, C>(
    nodes_by_id: &HashMap<String, Node>,
    dependents: &HashMap<String, Vec<String>>,
    max_concurrency: usize,
    cancellation: Option<CancellationToken>,
    mut run_node: F,
    mut format_dependency_context: C,
) -> (Vec<R>, HashMap<String, R>)
where
    F: FnMut(String, Node, Option<String>, &HashMap<String, R>) -> Fut,
    Fut: Future<Output = R> + Send + 'static,
    R: Clone + Send + 'static,
    C: FnMut(&str, &HashMap<String, Node>, &HashMap<String, R>) -> Option<String>,
{
    let max_concurrency = max_concurrency.max(1);
    let node_ids: HashSet<&String> = nodes_by_id.keys().collect();

    let mut remaining_deps: HashMap<String, HashSet<String>> = nodes_by_id
        .iter()
        .map(|(id, node)| {
            let deps = node
                .depends_on
                .iter()
                .filter(|d| node_ids.contains(d))
                .cloned()
                .collect();
            (id.clone(), deps)
        })
        .collect();

    let mut ready: Vec<String> = remaining_deps
        .iter()
        .filter(|(_, deps)| deps.is_empty())
        .map(|(id, _)| id.clone())
        .collect();

    let mut results: Vec<R> = Vec::new();
    let mut results_by_id: HashMap<String, R> = HashMap::new();
    let semaphore = Arc::new(Semaphore::new(max_concurrency));
    let mut running: JoinSet<(String, R)> = JoinSet::new();

    loop {
        let cancelled = cancellation
            .as_ref()
            .is_some_and(CancellationToken::is_cancelled);
        while !cancelled && !ready.is_empty() && running.len() < max_concurrency {
            let node_id = ready.pop().expect("non-empty");
            let node = nodes_by_id
                .get(&node_id)
                .cloned()
                .expect("ready node must exist in nodes_by_id");
            let dependency_context = format_dependency_context(&node_id, nodes_by_id, &results_by_id);
            let fut = run_node(node_id.clone(), node, dependency_context, &results_by_id);
            let permit = semaphore.clone();
            running.spawn(async move {
                let _permit = permit.acquire_owned().await.expect("semaphore never closes");
                let result = fut.await;
                (node_id, result)
            });
        }

        if running.is_empty() {
            break;
        }

        match running.join_next().await {
            Some(Ok((finished_id, result))) => {
                for child in dependents.get(&finished_id).cloned().unwrap_or_default() {
                    if let Some(deps) = remaining_deps.get_mut(&child) {
                        deps.remove(&finished_id);
                        if deps.is_empty() {
                            ready.push(child);
                        }
                    }
                }
                results.push(result.clone());
                results_by_id.insert(finished_id, result);
            }
            Some(Err(join_err)) => {
                tracing::error!(error = %join_err, "scheduled node task panicked");
            }
            None => break,
        }
    }

    (results, results_by_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use crate::operator::CombineOp;
    use crate::plan::NodeKind;

    fn task_node(id: &str, depends_on: Vec<String>) -> Node {
        Node {
            id: id.to_string(),
            depends_on,
            kind: NodeKind::Task {
                task: id.to_string(),
                hint: String::new(),
                context: None,
            },
        }
    }

    #[tokio::test]
    async fn runs_independent_nodes_concurrently() {
        let mut nodes_by_id = HashMap::new();
        nodes_by_id.insert("a".to_string(), task_node("a", vec![]));
        nodes_by_id.insert("b".to_string(), task_node("b", vec![]));
        let dependents = HashMap::new();

        let active = Arc::new(AtomicUsize::new(0));
        let max_active = Arc::new(AtomicUsize::new(0));

        let (results, results_by_id) = run_dag(
            &nodes_by_id,
            &dependents,
            4,
            None,
            |id, _node, _ctx, _results| {
                let active = active.clone();
                let max_active = max_active.clone();
                async move {
                    let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                    max_active.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    active.fetch_sub(1, Ordering::SeqCst);
                    id
                }
            },
            |_id, _nodes, _results| None,
        )
        .await;

        assert_eq!(results.len(), 2);
        assert_eq!(results_by_id.len(), 2);
        assert!(max_active.load(Ordering::SeqCst) >= 2);
    }

    #[tokio::test]
    async fn respects_dependency_order() {
        let mut nodes_by_id = HashMap::new();
        nodes_by_id.insert("a".to_string(), task_node("a", vec![]));
        nodes_by_id.insert("b".to_string(), task_node("b", vec!["a".to_string()]));
        let mut dependents = HashMap::new();
        dependents.insert("a".to_string(), vec!["b".to_string()]);

        let order = Arc::new(tokio::sync::Mutex::new(Vec::new()));

        let (_, _) = run_dag(
            &nodes_by_id,
            &dependents,
            4,
            None,
            |id, _node, _ctx, _results| {
                let order = order.clone();
                async move {
                    order.lock().await.push(id.clone());
                    id
                }
            },
            |_id, _nodes, _results| None,
        )
        .await;

        let seen = order.lock().await.clone();
        assert_eq!(seen, vec!["a".to_string(), "b".to_string()]);
    }

    #[tokio::test]
    async fn clamps_zero_concurrency_to_one() {
        let mut nodes_by_id = HashMap::new();
        nodes_by_id.insert("a".to_string(), task_node("a", vec![]));
        let dependents = HashMap::new();

        let (results, _) = run_dag(
            &nodes_by_id,
            &dependents,
            0,
            None,
            |id, _node, _ctx, _results| async move { id },
            |_id, _nodes, _results| None,
        )
        .await;

        assert_eq!(results, vec!["a".to_string()]);
    }

    #[test]
    fn combine_op_reexport_is_usable_in_tests() {
        // Sanity: scheduler tests can reach into operator/plan types directly.
        let _ = CombineOp::Intersect;
    }
}
