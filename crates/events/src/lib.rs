//! Run event stream
//!
//! A single-producer, single-consumer ordered channel of lifecycle events
//! emitted by the runner. Delivery is buffered: the producer never waits for
//! the consumer, and every emitted event is received exactly once, in order.

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, trace};

/// Lifecycle event of one run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RunEvent {
    /// Text produced by the model for the active agent
    TextDelta { agent: String, delta: String },
    /// Control moved between agents (delegation entry or return)
    AgentSwitched { from: String, to: String },
    ToolCallStarted {
        agent: String,
        call_id: String,
        tool: String,
        arguments: Value,
    },
    ToolCallFinished {
        agent: String,
        call_id: String,
        tool: String,
        output: String,
        is_error: bool,
    },
    RunFailed { agent: String, reason: String },
    RunCompleted { agent: String, output: Value },
}

impl RunEvent {
    /// Stable name of the variant, used in logs
    pub fn kind(&self) -> &'static str {
        match self {
            Self::TextDelta { .. } => "text_delta",
            Self::AgentSwitched { .. } => "agent_switched",
            Self::ToolCallStarted { .. } => "tool_call_started",
            Self::ToolCallFinished { .. } => "tool_call_finished",
            Self::RunFailed { .. } => "run_failed",
            Self::RunCompleted { .. } => "run_completed",
        }
    }

    /// Agent the event is attributed to
    pub fn agent(&self) -> &str {
        match self {
            Self::TextDelta { agent, .. }
            | Self::ToolCallStarted { agent, .. }
            | Self::ToolCallFinished { agent, .. }
            | Self::RunFailed { agent, .. }
            | Self::RunCompleted { agent, .. } => agent,
            Self::AgentSwitched { to, .. } => to,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::RunFailed { .. } | Self::RunCompleted { .. })
    }
}

/// An event with its position in the stream
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StampedEvent {
    /// Identifier of the top-level run
    pub run_id: String,
    /// Zero-based, gap-free emission order
    pub seq: u64,
    pub timestamp: DateTime<Local>,
    pub event: RunEvent,
}

/// Producer half, held by the runner
#[derive(Debug, Clone)]
pub struct EventSender {
    tx: mpsc::UnboundedSender<StampedEvent>,
    run_id: String,
    next_seq: Arc<AtomicU64>,
}

impl EventSender {
    /// Emit an event. Returns false when the consumer has gone away, in
    /// which case the event is dropped and the run continues.
    pub fn emit(&self, event: RunEvent) -> bool {
        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
        trace!("◆ EVENT #{} {} ({})", seq, event.kind(), event.agent());
        let stamped = StampedEvent {
            run_id: self.run_id.clone(),
            seq,
            timestamp: Local::now(),
            event,
        };
        self.tx.send(stamped).is_ok()
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Consumer half, held by the caller
#[derive(Debug)]
pub struct EventStream {
    rx: mpsc::UnboundedReceiver<StampedEvent>,
}

impl EventStream {
    /// Wait for the next event; `None` once every sender is dropped
    pub async fn next(&mut self) -> Option<StampedEvent> {
        self.rx.recv().await
    }

    /// Wait for every sender to drop, returning all events in order
    pub async fn collect(mut self) -> Vec<StampedEvent> {
        let mut events = Vec::new();
        while let Some(event) = self.rx.recv().await {
            events.push(event);
        }
        events
    }

    /// Feed every event to `handler` until the stream closes
    pub async fn dispatch<F>(mut self, mut handler: F)
    where
        F: FnMut(&StampedEvent) + Send,
    {
        debug!("◆ EVENT CONSUMER ONLINE");

        while let Some(event) = self.rx.recv().await {
            handler(&event);
        }

        debug!("◆ EVENT CONSUMER OFFLINE");
    }

    /// Like `dispatch`, but stops after the first terminal event
    pub async fn dispatch_until_terminal<F>(mut self, mut handler: F) -> Option<RunEvent>
    where
        F: FnMut(&StampedEvent) + Send,
    {
        while let Some(event) = self.rx.recv().await {
            handler(&event);
            if event.event.is_terminal() {
                return Some(event.event);
            }
        }
        None
    }
}

/// Open a stream for one run, tagged with `run_id`
pub fn channel(run_id: impl Into<String>) -> (EventSender, EventStream) {
    let (tx, rx) = mpsc::unbounded_channel();
    (
        EventSender {
            tx,
            run_id: run_id.into(),
            next_seq: Arc::new(AtomicU64::new(0)),
        },
        EventStream { rx },
    )
}
