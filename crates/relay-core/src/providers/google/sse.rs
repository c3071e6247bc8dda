//! Gemini response parsing, streamed (`alt=sse`) and buffered.

use std::collections::VecDeque;
use std::pin::Pin;

use eventsource_stream::{EventStream, Eventsource};
use futures_util::Stream;
use serde::Deserialize;
use serde_json::Value;

use crate::message::{
    MessageChunk, ReasoningMetadata, Role, TokenUsage, ToolPart, UIMessage, UIMessagePart,
};
use crate::providers::shared::{
    ProviderError, ProviderResult, SseTerminatedStream, new_chunk_id, parse_event_json,
    sse_transport_error,
};

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    #[serde(default)]
    prompt_token_count: u64,
    #[serde(default)]
    candidates_token_count: u64,
    #[serde(default)]
    thoughts_token_count: u64,
    #[serde(default)]
    cached_content_token_count: u64,
}

impl From<UsageMetadata> for TokenUsage {
    fn from(usage: UsageMetadata) -> Self {
        TokenUsage::new(
            usage.prompt_token_count,
            usage.candidates_token_count + usage.thoughts_token_count,
            usage.cached_content_token_count,
        )
    }
}

/// Content extracted from one `GenerateContentResponse` payload.
#[derive(Debug, Default)]
pub(crate) struct CandidateContent {
    pub(crate) parts: Vec<UIMessagePart>,
    pub(crate) finish_reason: Option<String>,
    pub(crate) usage: Option<TokenUsage>,
    pub(crate) model: Option<String>,
}

/// Returns the API error carried by a payload, if any.
pub(crate) fn payload_error(payload: &Value) -> Option<ProviderError> {
    let error = payload.get("error")?;
    let error_type = error
        .get("status")
        .and_then(Value::as_str)
        .unwrap_or("error");
    let message = error
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or("Unknown error");
    Some(ProviderError::api_error(error_type, message))
}

/// Maps the first candidate of a payload onto message parts.
///
/// Thought parts become reasoning, `thoughtSignature`s are kept as reasoning
/// metadata ahead of the part they were attached to, and function calls
/// without an id get one from `next_tool_id`.
pub(crate) fn parse_candidate(
    payload: &Value,
    next_tool_id: &mut dyn FnMut() -> String,
) -> CandidateContent {
    let mut out = CandidateContent {
        usage: payload
            .get("usageMetadata")
            .and_then(|u| serde_json::from_value::<UsageMetadata>(u.clone()).ok())
            .map(TokenUsage::from),
        model: payload
            .get("modelVersion")
            .and_then(Value::as_str)
            .map(str::to_string),
        ..Default::default()
    };

    let Some(candidate) = payload
        .get("candidates")
        .and_then(Value::as_array)
        .and_then(|c| c.first())
    else {
        return out;
    };

    out.finish_reason = candidate
        .get("finishReason")
        .and_then(Value::as_str)
        .map(str::to_string);

    let parts = candidate
        .get("content")
        .and_then(|c| c.get("parts"))
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();

    for part in parts {
        let signature = part
            .get("thoughtSignature")
            .and_then(Value::as_str)
            .map(str::to_string);
        let is_thought = part.get("thought").and_then(Value::as_bool) == Some(true);

        if let Some(text) = part.get("text").and_then(Value::as_str) {
            if is_thought {
                out.parts.push(UIMessagePart::reasoning_delta(
                    text,
                    ReasoningMetadata {
                        signature,
                        ..Default::default()
                    },
                ));
                continue;
            }
            push_signature(&mut out.parts, signature);
            out.parts.push(UIMessagePart::text(text));
        } else if let Some(call) = part.get("functionCall") {
            push_signature(&mut out.parts, signature);
            let id = match call.get("id").and_then(Value::as_str) {
                Some(id) if !id.is_empty() => id.to_string(),
                _ => next_tool_id(),
            };
            let name = call.get("name").and_then(Value::as_str).unwrap_or_default();
            let args = call
                .get("args")
                .filter(|a| !a.is_null())
                .map(Value::to_string)
                .unwrap_or_default();
            out.parts
                .push(UIMessagePart::Tool(ToolPart::new(id, name, args)));
        } else if let Some(inline) = part.get("inlineData") {
            let mime = inline
                .get("mimeType")
                .and_then(Value::as_str)
                .unwrap_or("application/octet-stream");
            let data = inline.get("data").and_then(Value::as_str).unwrap_or_default();
            out.parts.push(UIMessagePart::Image {
                url: format!("data:{mime};base64,{data}"),
            });
        }
    }

    out
}

fn push_signature(parts: &mut Vec<UIMessagePart>, signature: Option<String>) {
    if let Some(signature) = signature {
        parts.push(UIMessagePart::reasoning_delta(
            "",
            ReasoningMetadata {
                signature: Some(signature),
                ..Default::default()
            },
        ));
    }
}

/// Gemini SSE stream parser.
///
/// With `alt=sse` every event is a complete `GenerateContentResponse` whose
/// parts are increments of the reply.
pub(crate) struct GoogleSseParser<S> {
    inner: EventStream<SseTerminatedStream<S>>,
    message_id: String,
    model: String,
    tool_count: usize,
    pending: VecDeque<ProviderResult<MessageChunk>>,
    finished: bool,
}

impl<S> GoogleSseParser<S> {
    pub(crate) fn new<E>(stream: S, model: String) -> Self
    where
        S: Stream<Item = std::result::Result<bytes::Bytes, E>> + Unpin,
    {
        Self {
            inner: SseTerminatedStream::new(stream).eventsource(),
            message_id: new_chunk_id(),
            model,
            tool_count: 0,
            pending: VecDeque::new(),
            finished: false,
        }
    }

    fn handle_event_data(&mut self, data: &str) {
        let Some(value) = parse_event_json("google", data) else {
            return;
        };
        if let Some(error) = payload_error(&value) {
            self.pending.push_back(Err(error));
            self.finished = true;
            return;
        }

        let message_id = &self.message_id;
        let tool_count = &mut self.tool_count;
        let content = parse_candidate(&value, &mut || {
            *tool_count += 1;
            format!("google-{message_id}-{tool_count}")
        });

        if let Some(model) = content.model {
            self.model = model;
        }
        let delta = UIMessage::new(Role::Assistant, content.parts);
        let chunk = MessageChunk::delta(&self.message_id, &self.model, delta)
            .with_finish_reason(content.finish_reason)
            .with_usage(content.usage);
        self.pending.push_back(Ok(chunk));
    }
}

impl<S, E> Stream for GoogleSseParser<S>
where
    S: Stream<Item = std::result::Result<bytes::Bytes, E>> + Unpin,
    E: std::error::Error + Send + Sync + 'static,
{
    type Item = ProviderResult<MessageChunk>;

    fn poll_next(
        mut self: Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Option<Self::Item>> {
        use std::task::Poll;

        loop {
            if let Some(item) = self.pending.pop_front() {
                return Poll::Ready(Some(item));
            }
            if self.finished {
                return Poll::Ready(None);
            }

            match Pin::new(&mut self.inner).poll_next(cx) {
                Poll::Ready(Some(Ok(event))) => self.handle_event_data(&event.data),
                Poll::Ready(Some(Err(e))) => {
                    self.finished = true;
                    return Poll::Ready(Some(Err(sse_transport_error(e))));
                }
                Poll::Ready(None) => self.finished = true,
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}
