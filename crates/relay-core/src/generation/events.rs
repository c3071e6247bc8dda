//! Events published by a running generation turn.
//!
//! Events are serializable so hosts can forward them as JSON.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;

use crate::message::UIMessage;
use crate::providers::ProviderError;

/// Phase of a generation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerationState {
    Idle,
    TransformingInput,
    Streaming,
    ToolExecuting,
    /// Blocked until every pending tool call has an approval decision.
    AwaitingApproval,
    TransformingOutput,
}

/// Why a turn failed. Partial content is kept either way.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum GenerationFailure {
    Provider { error: ProviderError },
    ToolLoopLimit { limit: usize },
}

impl fmt::Display for GenerationFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GenerationFailure::Provider { error } => write!(f, "{error}"),
            GenerationFailure::ToolLoopLimit { limit } => {
                write!(f, "tool loop stopped after {limit} iterations")
            }
        }
    }
}

impl From<ProviderError> for GenerationFailure {
    fn from(error: ProviderError) -> Self {
        GenerationFailure::Provider { error }
    }
}

/// Terminal state of a turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum GenerationOutcome {
    Done,
    /// Stopped by the caller. Not an error.
    Cancelled,
    Failed { failure: GenerationFailure },
}

impl GenerationOutcome {
    pub fn is_done(&self) -> bool {
        matches!(self, GenerationOutcome::Done)
    }
}

/// Events emitted by the orchestrator during one turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GenerationEvent {
    State { state: GenerationState },

    /// Full conversation including the in-flight assistant message.
    Snapshot { messages: Vec<UIMessage> },

    /// A tool call is waiting for `approve` or `deny`.
    ApprovalRequested {
        tool_call_id: String,
        tool_name: String,
        input: Value,
    },

    /// A transformer failed; the turn continues with the content it left.
    TransformerFailed { transformer: String, message: String },

    /// Always the last event of a turn.
    Finished { outcome: GenerationOutcome },
}

pub type GenerationEventTx = mpsc::Sender<Arc<GenerationEvent>>;
pub type GenerationEventRx = mpsc::Receiver<Arc<GenerationEvent>>;

/// Creates the bounded event channel for one turn.
pub(crate) fn create_event_channel(capacity: usize) -> (GenerationEventTx, GenerationEventRx) {
    mpsc::channel(capacity.max(1))
}

/// Sender wrapper that separates droppable updates from events that must
/// arrive.
#[derive(Debug, Clone)]
pub(crate) struct EventSender {
    tx: GenerationEventTx,
}

impl EventSender {
    pub(crate) fn new(tx: GenerationEventTx) -> Self {
        Self { tx }
    }

    /// Best-effort send: never awaits, drops if the channel is full.
    /// A later snapshot supersedes a dropped one.
    pub(crate) fn send_delta(&self, ev: GenerationEvent) {
        let _ = self.tx.try_send(Arc::new(ev));
    }

    /// Reliable send: awaits delivery.
    pub(crate) async fn send_important(&self, ev: GenerationEvent) {
        let _ = self.tx.send(Arc::new(ev)).await;
    }

    pub(crate) async fn state(&self, state: GenerationState) {
        self.send_important(GenerationEvent::State { state }).await;
    }
}
