//! Generation turns: streaming, tool loops, transformers, cancellation.
//!
//! [`Orchestrator::start`] spawns one turn and returns a [`GenerationHandle`]
//! that yields [`GenerationEvent`]s. Hosts that allow one turn per
//! conversation get their cancellation tokens from a
//! [`ConversationSupervisor`].

mod events;
mod orchestrator;
mod supervisor;
pub mod tool;
pub mod transformer;

pub use events::{
    GenerationEvent, GenerationEventRx, GenerationEventTx, GenerationFailure, GenerationOutcome,
    GenerationState,
};
pub use orchestrator::{
    DEFAULT_EVENT_CHANNEL_CAPACITY, DEFAULT_MAX_TOOL_ITERATIONS, GenerationController,
    GenerationHandle, GenerationOptions, GenerationRequest, GenerationResult, Orchestrator,
    TextBackend,
};
pub use supervisor::ConversationSupervisor;
pub use tool::{FnTool, Tool, ToolSet};
