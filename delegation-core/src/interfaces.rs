//! External interfaces the delegation core is built against: the Agent/Engine
//! a sub-task runs on top of, and the Strategy Session that holds the graph
//! being built. The core depends only on these traits, never on a concrete
//! agent framework or storage backend.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

use crate::error::Result;
use crate::llm::LLMProvider;

/// One message in a multi-turn agent round.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoundMessage {
    pub role: RoundRole,
    /// Present on assistant messages: streamed/aggregated text content.
    #[serde(default)]
    pub content: Option<String>,
    /// Present on assistant messages that invoked tools.
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,
    /// Present on function (tool result) messages.
    #[serde(default)]
    pub tool_call_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoundRole {
    Assistant,
    Function,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub function_name: String,
    pub arguments: Value,
}

/// The multi-turn, tool-call-aware agent contract a sub-task runs against.
///
/// This sits above a single-turn [`LLMProvider`]: an `Engine` owns whatever
/// agent loop actually drives tool calls (a `kani`-alike, a hand-rolled
/// ReAct loop, whatever the caller's agent framework provides), while this
/// crate only ever sees the stream of [`RoundMessage`]s it produces.
#[async_trait]
pub trait Engine: Send + Sync {
    /// Run one agent round for `prompt`, returning every message the agent
    /// produced (assistant deltas/tool-calls and their matching function
    /// results) in emission order.
    ///
    /// Failures propagate as `Err` from this call site; the Sub-Task Runner
    /// is responsible for applying its own attempt/timeout semantics around
    /// this call, not this trait.
    async fn full_round_stream(&self, prompt: &str) -> Result<Vec<RoundMessage>>;
}

/// An [`Engine`] built on a single-turn [`LLMProvider`] with no tool-calling
/// of its own; useful for tests and for providers that only ever produce a
/// single assistant message per round.
pub struct SingleTurnEngine<P: LLMProvider> {
    provider: P,
}

impl<P: LLMProvider> SingleTurnEngine<P> {
    pub fn new(provider: P) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl<P: LLMProvider> Engine for SingleTurnEngine<P> {
    async fn full_round_stream(&self, prompt: &str) -> Result<Vec<RoundMessage>> {
        let request = crate::llm::LLMRequest::from_prompt(prompt);
        let response = self.provider.generate_request(&request).await?;
        Ok(vec![RoundMessage {
            role: RoundRole::Assistant,
            content: Some(response.content),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }])
    }
}

/// A step created inside a strategy graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    pub step_id: String,
    pub display_name: Option<String>,
    #[serde(default)]
    pub kind: Option<String>,
}

/// A strategy graph: the set of steps being built for one delegation call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Graph {
    pub id: String,
    pub name: String,
    pub site_id: Option<String>,
    pub record_type: Option<String>,
    pub steps: HashMap<String, Step>,
    pub roots: Vec<String>,
    pub history: Vec<String>,
    pub last_step_id: Option<String>,
}

impl Graph {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            site_id: None,
            record_type: None,
            steps: HashMap::new(),
            roots: Vec::new(),
            history: Vec::new(),
            last_step_id: None,
        }
    }
}

/// Strategy Session: the single-writer handle to the graph(s) a delegation
/// call mutates. Reads may happen concurrently; writes are serialized by the
/// implementation (e.g. behind a `tokio::sync::RwLock`).
#[async_trait]
pub trait StrategySession: Send + Sync {
    async fn get_graph(&self, id: Option<&str>) -> Option<Graph>;
    async fn create_graph(&self, name: &str, graph_id: Option<&str>) -> Graph;
    async fn remove_graph(&self, id: &str) -> bool;
    async fn update_graph(&self, graph: Graph);
}

/// In-memory `StrategySession` suitable for tests and the CLI demo harness.
#[derive(Default)]
pub struct InMemoryStrategySession {
    graphs: tokio::sync::RwLock<HashMap<String, Graph>>,
    current: tokio::sync::RwLock<Option<String>>,
}

impl InMemoryStrategySession {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StrategySession for InMemoryStrategySession {
    async fn get_graph(&self, id: Option<&str>) -> Option<Graph> {
        let graphs = self.graphs.read().await;
        match id {
            Some(id) => graphs.get(id).cloned(),
            None => {
                let current = self.current.read().await;
                current.as_ref().and_then(|id| graphs.get(id).cloned())
            }
        }
    }

    async fn create_graph(&self, name: &str, graph_id: Option<&str>) -> Graph {
        let id = graph_id
            .map(str::to_string)
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let graph = Graph::new(id.clone(), name.to_string());
        self.graphs.write().await.insert(id.clone(), graph.clone());
        *self.current.write().await = Some(id);
        graph
    }

    async fn remove_graph(&self, id: &str) -> bool {
        self.graphs.write().await.remove(id).is_some()
    }

    async fn update_graph(&self, graph: Graph) {
        self.graphs.write().await.insert(graph.id.clone(), graph);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn creates_and_fetches_default_graph() {
        let session = InMemoryStrategySession::new();
        let graph = session.create_graph("Draft Strategy", None).await;
        let fetched = session.get_graph(None).await.unwrap();
        assert_eq!(fetched.id, graph.id);
        assert_eq!(fetched.name, "Draft Strategy");
    }

    #[tokio::test]
    async fn remove_graph_drops_it() {
        let session = InMemoryStrategySession::new();
        let graph = session.create_graph("g", Some("fixed-id")).await;
        assert!(session.remove_graph(&graph.id).await);
        assert!(session.get_graph(Some(&graph.id)).await.is_none());
    }
}
