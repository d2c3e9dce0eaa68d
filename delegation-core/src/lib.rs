//! # Delegation Core
//!
//! Delegation Core turns a nested, model-produced plan into a validated DAG
//! of sub-tasks and combine steps, runs it with bounded concurrency against
//! a caller-supplied agent engine and strategy backend, and streams every
//! step of the process out as an ordered sequence of semantic events.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use delegation_core::prelude::*;
//! use std::sync::Arc;
//!
//! # async fn run(engine: Arc<dyn Engine>, strategy_tools: Arc<dyn StrategyTools>) -> Result<()> {
//! let ctx = DelegateContext {
//!     strategy_session: Arc::new(InMemoryStrategySession::new()),
//!     strategy_tools,
//!     engine,
//!     emit: event_channel(64).0,
//!     config: Arc::new(DelegationConfig::default()),
//!     cancellation: None,
//! };
//!
//! let plan = serde_json::json!({"task": "find genes on chromosome 7"});
//! let summary = delegate("find resistance markers", &plan, ctx).await?;
//! println!("{} steps validated", summary.results.len());
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - **Plan Compiler** ([`plan`]): normalizes an untyped, model-produced plan
//!   into a DAG, deduplicating structurally identical nodes and rejecting
//!   malformed input or cycles.
//! - **DAG Scheduler** ([`scheduler`]): runs the compiled DAG with bounded
//!   concurrency, honoring dependency edges.
//! - **Sub-Task Runner** ([`subtask`]): drives one task node to completion
//!   against an [`interfaces::Engine`], retrying on empty output.
//! - **Combine Executor** ([`combine`]): folds resolved step results together
//!   through a sequence of boolean or colocation tool calls.
//! - **Streaming Event Bus** ([`events`]): an ordered, quiescence-aware
//!   channel every other module emits onto.
//! - **Orchestrator** ([`orchestrator`]): the `delegate()` entry point tying
//!   all of the above together.

pub mod combine;
pub mod config;
pub mod error;
pub mod events;
pub mod interfaces;
pub mod llm;
pub mod operator;
pub mod orchestrator;
pub mod parsing;
pub mod plan;
pub mod record_type;
pub mod scheduler;
pub mod subtask;

/// Current library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Re-export of the crate's public API surface.
pub mod prelude {
    pub use crate::combine::{CombineNode, StrategyTools};
    pub use crate::config::DelegationConfig;
    pub use crate::error::{DelegationError, Result};
    pub use crate::events::{drain, event_channel, Event, EventEmitter, EventKind};
    pub use crate::interfaces::{
        Engine, Graph, InMemoryStrategySession, RoundMessage, RoundRole, SingleTurnEngine, Step,
        StrategySession, ToolCall,
    };
    pub use crate::operator::{CombineOp, ColocationParams, Strand};
    pub use crate::orchestrator::{
        delegate, run_delegation_stream, DelegateContext, DelegationSummary, RejectedResult,
        ValidatedResult,
    };
    pub use crate::plan::{compile, DelegationPlan, Node, NodeKind};
    pub use crate::record_type::resolve_record_type;
    pub use crate::scheduler::run_dag;
    pub use crate::subtask::{run_task, RunResult};
}
