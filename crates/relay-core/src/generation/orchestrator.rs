//! Drives one generation turn.
//!
//! A turn runs input transformers, streams the model reply into a trailing
//! assistant message, resolves the tool calls it asks for (waiting for
//! approval where a tool requires it), and streams again until the model
//! stops calling tools. Output transformers then run over the finished
//! message. Every step publishes [`GenerationEvent`]s on a bounded channel.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use futures_util::future::BoxFuture;
use futures_util::stream::BoxStream;
use futures_util::{FutureExt, StreamExt};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::events::{
    EventSender, GenerationEvent, GenerationEventRx, GenerationFailure, GenerationOutcome,
    GenerationState, create_event_channel,
};
use super::tool::{Tool, ToolSet, error_output};
use super::transformer::{InputTransformer, OutputTransformer};
use crate::message::{Role, ToolApproval, UIMessage, UIMessagePart};
use crate::providers::{
    ChunkStream, ProviderManager, ProviderResult, ProviderSetting, TextGenerationParams,
};

/// Default cap on tool rounds within one turn.
pub const DEFAULT_MAX_TOOL_ITERATIONS: usize = 32;

/// Default capacity for the generation event channel.
pub const DEFAULT_EVENT_CHANNEL_CAPACITY: usize = 128;

/// Where the orchestrator gets its streams from.
pub trait TextBackend: Send + Sync {
    fn stream_text<'a>(
        &'a self,
        setting: &'a ProviderSetting,
        messages: &'a [UIMessage],
        params: &'a TextGenerationParams,
    ) -> BoxFuture<'a, ProviderResult<ChunkStream>>;
}

impl TextBackend for ProviderManager {
    fn stream_text<'a>(
        &'a self,
        setting: &'a ProviderSetting,
        messages: &'a [UIMessage],
        params: &'a TextGenerationParams,
    ) -> BoxFuture<'a, ProviderResult<ChunkStream>> {
        async move {
            self.provider_for(setting)
                .stream_text(messages, params)
                .await
        }
        .boxed()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GenerationOptions {
    pub max_tool_iterations: usize,
    pub event_channel_capacity: usize,
}

impl Default for GenerationOptions {
    fn default() -> Self {
        Self {
            max_tool_iterations: DEFAULT_MAX_TOOL_ITERATIONS,
            event_channel_capacity: DEFAULT_EVENT_CHANNEL_CAPACITY,
        }
    }
}

/// Input to one turn.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    /// Conversation history, ending with the message to answer.
    pub messages: Vec<UIMessage>,
    pub setting: ProviderSetting,
    pub params: TextGenerationParams,
    /// When non-empty, their definitions replace `params.tools`.
    pub tools: ToolSet,
}

impl GenerationRequest {
    pub fn new(
        setting: ProviderSetting,
        params: TextGenerationParams,
        messages: Vec<UIMessage>,
    ) -> Self {
        Self {
            messages,
            setting,
            params,
            tools: ToolSet::new(),
        }
    }

    #[must_use]
    pub fn with_tools(mut self, tools: ToolSet) -> Self {
        self.tools = tools;
        self
    }
}

/// Starts generation turns. Cheap to clone.
#[derive(Clone)]
pub struct Orchestrator {
    backend: Arc<dyn TextBackend>,
    input_transformers: Vec<Arc<dyn InputTransformer>>,
    output_transformers: Vec<Arc<dyn OutputTransformer>>,
    options: GenerationOptions,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field(
                "input_transformers",
                &self.input_transformers.iter().map(|t| t.name()).collect::<Vec<_>>(),
            )
            .field(
                "output_transformers",
                &self.output_transformers.iter().map(|t| t.name()).collect::<Vec<_>>(),
            )
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl Orchestrator {
    pub fn new(backend: Arc<dyn TextBackend>, options: GenerationOptions) -> Self {
        Self {
            backend,
            input_transformers: Vec::new(),
            output_transformers: Vec::new(),
            options,
        }
    }

    /// Appends an input transformer; they run in insertion order.
    #[must_use]
    pub fn with_input_transformer(mut self, transformer: impl InputTransformer + 'static) -> Self {
        self.input_transformers.push(Arc::new(transformer));
        self
    }

    /// Appends an output transformer; they run in insertion order.
    #[must_use]
    pub fn with_output_transformer(
        mut self,
        transformer: impl OutputTransformer + 'static,
    ) -> Self {
        self.output_transformers.push(Arc::new(transformer));
        self
    }

    pub fn options(&self) -> GenerationOptions {
        self.options
    }

    /// Spawns a turn on the current tokio runtime.
    ///
    /// Cancelling `cancel` (or calling [`GenerationHandle::cancel`]) stops the
    /// turn at its next suspension point; partial content is kept.
    pub fn start(&self, request: GenerationRequest, cancel: CancellationToken) -> GenerationHandle {
        let (tx, rx) = create_event_channel(self.options.event_channel_capacity);
        let (decision_tx, decision_rx) = mpsc::unbounded_channel();

        let turn = Turn {
            orchestrator: self.clone(),
            events: EventSender::new(tx),
            decisions: decision_rx,
            cancel: cancel.clone(),
        };
        tokio::spawn(turn.run(request));

        GenerationHandle {
            events: rx,
            controller: GenerationController {
                decisions: decision_tx,
                cancel,
            },
        }
    }
}

#[derive(Debug)]
enum ApprovalDecision {
    Approve { tool_call_id: String },
    Deny { tool_call_id: String, reason: String },
}

impl ApprovalDecision {
    fn tool_call_id(&self) -> &str {
        match self {
            ApprovalDecision::Approve { tool_call_id }
            | ApprovalDecision::Deny { tool_call_id, .. } => tool_call_id,
        }
    }
}

/// Approval and cancellation for a running turn. Cheap to clone.
#[derive(Debug, Clone)]
pub struct GenerationController {
    decisions: mpsc::UnboundedSender<ApprovalDecision>,
    cancel: CancellationToken,
}

impl GenerationController {
    /// Approves a pending tool call. Returns false once the turn has ended.
    pub fn approve(&self, tool_call_id: impl Into<String>) -> bool {
        self.decisions
            .send(ApprovalDecision::Approve {
                tool_call_id: tool_call_id.into(),
            })
            .is_ok()
    }

    /// Denies a pending tool call; `reason` becomes the call's output.
    pub fn deny(&self, tool_call_id: impl Into<String>, reason: impl Into<String>) -> bool {
        self.decisions
            .send(ApprovalDecision::Deny {
                tool_call_id: tool_call_id.into(),
                reason: reason.into(),
            })
            .is_ok()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }
}

/// Final state of a turn as seen through its events.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationResult {
    pub messages: Vec<UIMessage>,
    pub outcome: GenerationOutcome,
}

/// Receiving end of a running turn.
#[derive(Debug)]
pub struct GenerationHandle {
    events: GenerationEventRx,
    controller: GenerationController,
}

impl GenerationHandle {
    /// Next event, or `None` after `Finished` has been received.
    pub async fn next_event(&mut self) -> Option<Arc<GenerationEvent>> {
        self.events.recv().await
    }

    pub fn controller(&self) -> GenerationController {
        self.controller.clone()
    }

    pub fn approve(&self, tool_call_id: impl Into<String>) -> bool {
        self.controller.approve(tool_call_id)
    }

    pub fn deny(&self, tool_call_id: impl Into<String>, reason: impl Into<String>) -> bool {
        self.controller.deny(tool_call_id, reason)
    }

    pub fn cancel(&self) {
        self.controller.cancel();
    }

    /// Events as a stream. The stream keeps the controller alive, so clones
    /// taken with [`Self::controller`] can still approve calls.
    pub fn into_stream(self) -> BoxStream<'static, Arc<GenerationEvent>> {
        futures_util::stream::unfold(
            (self.events, self.controller),
            |(mut events, controller)| async move {
                let event = events.recv().await?;
                Some((event, (events, controller)))
            },
        )
        .boxed()
    }

    /// Drains the turn, returning the last snapshot and the outcome.
    ///
    /// Approval requests are not answered here; use a controller from
    /// [`Self::controller`] for tools that need approval.
    pub async fn finish(mut self) -> GenerationResult {
        let mut messages = Vec::new();
        while let Some(event) = self.next_event().await {
            match event.as_ref() {
                GenerationEvent::Snapshot { messages: latest } => messages.clone_from(latest),
                GenerationEvent::Finished { outcome } => {
                    return GenerationResult {
                        messages,
                        outcome: outcome.clone(),
                    };
                }
                _ => {}
            }
        }
        // The task only stops sending without `Finished` if it panicked.
        GenerationResult {
            messages,
            outcome: GenerationOutcome::Cancelled,
        }
    }
}

/// Early exit from a turn step.
type Step<T> = Result<T, GenerationOutcome>;

fn failed(failure: impl Into<GenerationFailure>) -> GenerationOutcome {
    GenerationOutcome::Failed {
        failure: failure.into(),
    }
}

/// State owned by one spawned turn.
struct Turn {
    orchestrator: Orchestrator,
    events: EventSender,
    decisions: mpsc::UnboundedReceiver<ApprovalDecision>,
    cancel: CancellationToken,
}

impl Turn {
    async fn run(mut self, request: GenerationRequest) {
        let GenerationRequest {
            mut messages,
            setting,
            mut params,
            tools,
        } = request;
        if !tools.is_empty() {
            params.tools = tools.definitions();
        }
        debug!(
            provider = setting.id(),
            model = %params.model.model_id,
            tools = params.tools.len(),
            "generation started"
        );

        self.events.state(GenerationState::TransformingInput).await;
        self.transform_input(&mut messages).await;
        messages.push(UIMessage::new(Role::Assistant, Vec::new()));

        let outcome = match self.drive(&mut messages, &setting, &params, &tools).await {
            Ok(()) => GenerationOutcome::Done,
            Err(outcome) => outcome,
        };

        if let Some(assistant) = messages.last_mut() {
            assistant.finish_reasoning(Utc::now());
            if outcome.is_done() && !self.orchestrator.output_transformers.is_empty() {
                self.events.state(GenerationState::TransformingOutput).await;
                self.transform_output(assistant).await;
            }
        }

        match &outcome {
            GenerationOutcome::Done => debug!("generation done"),
            GenerationOutcome::Cancelled => info!("generation cancelled"),
            GenerationOutcome::Failed { failure } => warn!("generation failed: {failure}"),
        }
        self.events
            .send_important(GenerationEvent::Snapshot { messages })
            .await;
        self.events
            .send_important(GenerationEvent::Finished { outcome })
            .await;
    }

    async fn transform_input(&self, messages: &mut Vec<UIMessage>) {
        for transformer in &self.orchestrator.input_transformers {
            if let Err(err) = transformer.transform(messages).await {
                self.report_transformer_failure(transformer.name(), &err)
                    .await;
            }
        }
    }

    async fn transform_output(&self, message: &mut UIMessage) {
        for transformer in &self.orchestrator.output_transformers {
            if let Err(err) = transformer.transform(message).await {
                self.report_transformer_failure(transformer.name(), &err)
                    .await;
            }
        }
    }

    async fn report_transformer_failure(&self, name: &str, err: &anyhow::Error) {
        warn!(transformer = name, "transformer failed: {err:#}");
        self.events
            .send_important(GenerationEvent::TransformerFailed {
                transformer: name.to_string(),
                message: format!("{err:#}"),
            })
            .await;
    }

    /// Streams and resolves tools until the model stops calling them.
    async fn drive(
        &mut self,
        messages: &mut Vec<UIMessage>,
        setting: &ProviderSetting,
        params: &TextGenerationParams,
        tools: &ToolSet,
    ) -> Step<()> {
        let limit = self.orchestrator.options.max_tool_iterations;
        let mut iterations = 0;
        loop {
            if self.cancel.is_cancelled() {
                return Err(GenerationOutcome::Cancelled);
            }
            self.events.state(GenerationState::Streaming).await;
            self.stream_step(messages, setting, params).await?;

            let has_pending = messages.last().is_some_and(UIMessage::has_pending_tools);
            if !has_pending {
                return Ok(());
            }
            if iterations >= limit {
                warn!(limit, "tool loop limit reached");
                return Err(failed(GenerationFailure::ToolLoopLimit { limit }));
            }
            iterations += 1;

            if !self.resolve_tools(messages, tools).await? {
                // Every call was denied; the model has nothing new to read.
                return Ok(());
            }
            self.events
                .send_important(GenerationEvent::Snapshot {
                    messages: messages.clone(),
                })
                .await;
        }
    }

    /// One model call, merged into the trailing assistant message in receipt
    /// order.
    async fn stream_step(
        &self,
        messages: &mut [UIMessage],
        setting: &ProviderSetting,
        params: &TextGenerationParams,
    ) -> Step<()> {
        let history = request_history(messages);
        let result = tokio::select! {
            biased;
            () = self.cancel.cancelled() => return Err(GenerationOutcome::Cancelled),
            result = self.orchestrator.backend.stream_text(setting, history, params) => result,
        };
        let mut stream = result.map_err(failed)?;

        loop {
            let item = tokio::select! {
                biased;
                () = self.cancel.cancelled() => {
                    debug!("cancelled mid-stream, closing connection");
                    return Err(GenerationOutcome::Cancelled);
                }
                item = stream.next() => item,
            };
            match item {
                Some(Ok(chunk)) => {
                    if let Some(assistant) = messages.last_mut() {
                        assistant.apply_chunk(&chunk, Utc::now());
                    }
                    self.events.send_delta(GenerationEvent::Snapshot {
                        messages: messages.to_vec(),
                    });
                }
                Some(Err(err)) => return Err(failed(err)),
                None => return Ok(()),
            }
        }
    }

    /// Resolves every pending call of the trailing assistant message.
    ///
    /// Returns whether any call produced output for the model to read.
    async fn resolve_tools(&mut self, messages: &mut Vec<UIMessage>, tools: &ToolSet) -> Step<bool> {
        self.events.state(GenerationState::ToolExecuting).await;

        let mut running = ToolRun::default();
        let mut awaiting: HashMap<String, (Arc<dyn Tool>, Value)> = HashMap::new();
        let mut executed_any = false;

        if let Some(assistant) = messages.last_mut() {
            for call in assistant.tool_parts_mut().filter(|t| t.is_pending()) {
                let Some(tool) = tools.get(&call.tool_name) else {
                    warn!(tool = %call.tool_name, "model called an unknown tool");
                    call.output = error_output(format!("unknown tool `{}`", call.tool_name));
                    call.executed = true;
                    executed_any = true;
                    continue;
                };
                let input = match call.parsed_input() {
                    Ok(input) => input,
                    Err(err) => {
                        call.output = error_output(format!("invalid tool input: {err}"));
                        call.executed = true;
                        executed_any = true;
                        continue;
                    }
                };
                if call.approval == ToolApproval::Approved || !tool.needs_approval(&input) {
                    call.approval = ToolApproval::Approved;
                    running.spawn(&call.tool_call_id, &tool, input);
                } else {
                    call.approval = ToolApproval::Pending;
                    awaiting.insert(call.tool_call_id.clone(), (tool, input));
                }
            }
        }

        if !awaiting.is_empty() {
            self.await_approvals(messages, awaiting, &mut running).await?;
        }

        executed_any |= running.has_tasks();
        let outputs = tokio::select! {
            biased;
            () = self.cancel.cancelled() => return Err(GenerationOutcome::Cancelled),
            outputs = running.join_all() => outputs,
        };
        if let Some(assistant) = messages.last_mut() {
            for call in assistant.tool_parts_mut() {
                if let Some(output) = outputs.get(&call.tool_call_id) {
                    call.output.clone_from(output);
                    call.executed = true;
                }
            }
        }
        Ok(executed_any)
    }

    /// Blocks until every call in `awaiting` has a decision.
    async fn await_approvals(
        &mut self,
        messages: &mut [UIMessage],
        mut awaiting: HashMap<String, (Arc<dyn Tool>, Value)>,
        running: &mut ToolRun,
    ) -> Step<()> {
        let requests: Vec<_> = messages
            .last()
            .into_iter()
            .flat_map(|m| m.tool_parts())
            .filter(|call| awaiting.contains_key(&call.tool_call_id))
            .map(|call| (call.tool_call_id.clone(), call.tool_name.clone()))
            .collect();
        for (tool_call_id, tool_name) in requests {
            let input = awaiting
                .get(&tool_call_id)
                .map(|(_, input)| input.clone())
                .unwrap_or_default();
            self.events
                .send_important(GenerationEvent::ApprovalRequested {
                    tool_call_id,
                    tool_name,
                    input,
                })
                .await;
        }
        self.events.state(GenerationState::AwaitingApproval).await;
        self.events
            .send_important(GenerationEvent::Snapshot {
                messages: messages.to_vec(),
            })
            .await;

        while !awaiting.is_empty() {
            let decision = tokio::select! {
                biased;
                () = self.cancel.cancelled() => return Err(GenerationOutcome::Cancelled),
                decision = self.decisions.recv() => decision,
            };
            // Every controller is gone, so nobody can answer.
            let Some(decision) = decision else {
                debug!("approval channel closed while waiting");
                return Err(GenerationOutcome::Cancelled);
            };
            let Some((tool, input)) = awaiting.remove(decision.tool_call_id()) else {
                debug!(
                    tool_call_id = decision.tool_call_id(),
                    "ignoring decision for a call that is not waiting"
                );
                continue;
            };

            let Some(call) = messages
                .last_mut()
                .and_then(|m| {
                    m.tool_parts_mut()
                        .find(|call| call.tool_call_id == decision.tool_call_id())
                })
            else {
                continue;
            };
            match decision {
                ApprovalDecision::Approve { tool_call_id } => {
                    debug!(%tool_call_id, "tool call approved");
                    call.approval = ToolApproval::Approved;
                    running.spawn(&tool_call_id, &tool, input);
                }
                ApprovalDecision::Deny {
                    tool_call_id,
                    reason,
                } => {
                    debug!(%tool_call_id, "tool call denied");
                    let text = if reason.trim().is_empty() {
                        "The user denied this tool call.".to_string()
                    } else {
                        reason.clone()
                    };
                    call.approval = ToolApproval::Denied(reason);
                    call.output = vec![UIMessagePart::text(text)];
                }
            }
        }
        Ok(())
    }
}

/// Approved tool calls running concurrently, keyed back to their call ids.
#[derive(Default)]
struct ToolRun {
    tasks: JoinSet<(String, anyhow::Result<Vec<UIMessagePart>>)>,
    ids: HashMap<tokio::task::Id, String>,
}

impl ToolRun {
    fn spawn(&mut self, tool_call_id: &str, tool: &Arc<dyn Tool>, input: Value) {
        debug!(tool_call_id, tool = %tool.definition().name, "executing tool");
        let id = tool_call_id.to_string();
        let future = tool.execute(input);
        let handle = self
            .tasks
            .spawn(async move { (id, future.await) });
        self.ids.insert(handle.id(), tool_call_id.to_string());
    }

    fn has_tasks(&self) -> bool {
        !self.tasks.is_empty()
    }

    /// Waits for every task. Errors and panics become error output.
    async fn join_all(&mut self) -> HashMap<String, Vec<UIMessagePart>> {
        let mut outputs = HashMap::new();
        while let Some(joined) = self.tasks.join_next().await {
            match joined {
                Ok((id, Ok(output))) => {
                    outputs.insert(id, output);
                }
                Ok((id, Err(err))) => {
                    warn!(tool_call_id = %id, "tool failed: {err:#}");
                    outputs.insert(id, error_output(format!("{err:#}")));
                }
                Err(err) => {
                    if let Some(id) = self.ids.get(&err.id()) {
                        warn!(tool_call_id = %id, "tool task failed: {err}");
                        outputs.insert(id.clone(), error_output(&err));
                    }
                }
            }
        }
        outputs
    }
}

/// The messages sent to the model: the trailing assistant message is left out
/// until it has content.
fn request_history(messages: &[UIMessage]) -> &[UIMessage] {
    match messages.split_last() {
        Some((last, rest)) if last.role == Role::Assistant && last.parts.is_empty() => rest,
        _ => messages,
    }
}
