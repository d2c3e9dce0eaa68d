//! Streaming Event Bus: ordered semantic events from a multi-producer queue
//! to a single consumer, with a quiescence-aware drain rule.
//!
//! Every producer in a `delegate()` call — the orchestrator, the scheduler,
//! each sub-task runner invocation, the combine executor — gets its own
//! cheap clone of an [`EventEmitter`] backed by a shared `tokio::sync::mpsc`
//! channel. The consumer side does not simply drain the channel to
//! completion: once it sees `message_end` it keeps listening for a short
//! grace window, because a producer spawned slightly behind the one that
//! emitted `message_end` may still have in-flight events to deliver.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::time::timeout;

/// A single semantic event on the bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub data: Value,
    #[serde(skip)]
    pub emitted_at: Option<DateTime<Utc>>,
}

/// The fixed set of event kinds the bus carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    MessageStart,
    AssistantDelta,
    AssistantMessage,
    ToolCallStart,
    ToolCallEnd,
    SubkaniTaskStart,
    SubkaniTaskEnd,
    SubkaniTaskRetry,
    SubkaniToolCallStart,
    SubkaniToolCallEnd,
    StrategyUpdate,
    GraphSnapshot,
    GraphPlan,
    MessageEnd,
    Error,
}

impl Event {
    pub fn new(kind: EventKind, data: Value) -> Self {
        Self {
            kind,
            data,
            emitted_at: Some(Utc::now()),
        }
    }

    pub fn message_end() -> Self {
        Self::new(EventKind::MessageEnd, Value::Object(Default::default()))
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(EventKind::Error, serde_json::json!({ "error": message.into() }))
    }

    /// Render this event as a Server-Sent-Events frame: `event: <type>\ndata: <json>\n\n`.
    ///
    /// Formatting the frame is the core's responsibility; actually writing it
    /// to an HTTP response (chunked transfer, keep-alives) is not.
    pub fn to_sse_frame(&self) -> String {
        let type_str = serde_json::to_value(self.kind)
            .ok()
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_else(|| "error".to_string());
        format!("event: {type_str}\ndata: {}\n\n", self.data)
    }
}

/// A cheaply-cloneable handle producers use to push events onto the bus.
#[derive(Clone)]
pub struct EventEmitter {
    tx: mpsc::Sender<Event>,
}

impl EventEmitter {
    /// Emit an event. Silently drops the event if the consumer has already
    /// gone away (e.g. client disconnect) rather than erroring a producer.
    pub fn emit(&self, event: Event) {
        if let Err(err) = self.tx.try_send(event) {
            tracing::debug!(%err, "event dropped; consumer channel closed or full");
        }
    }

    pub fn emit_kind(&self, kind: EventKind, data: Value) {
        self.emit(Event::new(kind, data));
    }
}

/// Create a bounded event channel. `buffer` bounds how many events may be
/// in flight before a producer's `try_send` starts dropping (producers never
/// block the scheduler waiting for bus capacity).
pub fn event_channel(buffer: usize) -> (EventEmitter, mpsc::Receiver<Event>) {
    let (tx, rx) = mpsc::channel(buffer.max(1));
    (EventEmitter { tx }, rx)
}

/// Drain the bus into a `Vec<Event>`, applying the quiescence rule: once
/// `message_end` is observed, keep waiting up to `grace` for further events
/// instead of stopping immediately, so that events enqueued by a
/// slightly-lagging producer are not lost. Duplicate `message_end`s are
/// suppressed. The returned vector always ends with exactly one
/// `message_end`, which is the last event yielded regardless of when it
/// first arrived.
pub async fn drain(mut rx: mpsc::Receiver<Event>, grace: Duration) -> Vec<Event> {
    let mut out = Vec::new();
    let mut pending_end: Option<Event> = None;

    loop {
        if pending_end.is_none() {
            match rx.recv().await {
                Some(event) if event.kind == EventKind::MessageEnd => {
                    pending_end = Some(event);
                }
                Some(event) => out.push(event),
                None => break,
            }
            continue;
        }

        match timeout(grace, rx.recv()).await {
            // Duplicate message_end: discard, keep waiting out the grace window.
            Ok(Some(event)) if event.kind == EventKind::MessageEnd => {}
            Ok(Some(event)) => out.push(event),
            // Channel closed and drained: nothing more can ever arrive.
            Ok(None) => break,
            // Grace window elapsed with nothing queued. Only stop once every
            // producer has dropped its sender; otherwise one may still be
            // about to enqueue something.
            Err(_elapsed) => {
                if rx.is_closed() {
                    break;
                }
            }
        }
    }

    if let Some(end) = pending_end {
        out.push(end);
    } else {
        out.push(Event::message_end());
    }
    out
}
