use std::collections::{HashMap, VecDeque};
use std::pin::Pin;

use eventsource_stream::{EventStream, Eventsource};
use futures_util::Stream;
use serde::Deserialize;

use super::types::ApiUsage;
use crate::message::{
    MessageChunk, ReasoningMetadata, Role, TokenUsage, ToolPart, UIMessage, UIMessagePart,
};
use crate::providers::shared::{
    ProviderError, ProviderResult, SseTerminatedStream, parse_event_json, sse_transport_error,
};

/// Converts a Messages API SSE byte stream into message chunks.
///
/// Block starts register tool ids by block index so later `input_json_delta`
/// events can be attributed. The stream ends at `message_stop`.
pub(crate) struct ClaudeSseParser<S> {
    inner: EventStream<SseTerminatedStream<S>>,
    message_id: String,
    model: String,
    tool_blocks: HashMap<usize, String>,
    pending: VecDeque<ProviderResult<MessageChunk>>,
    finished: bool,
}

impl<S> ClaudeSseParser<S> {
    pub(crate) fn new<E>(stream: S, model: String) -> Self
    where
        S: Stream<Item = std::result::Result<bytes::Bytes, E>> + Unpin,
    {
        Self {
            inner: SseTerminatedStream::new(stream).eventsource(),
            message_id: String::new(),
            model,
            tool_blocks: HashMap::new(),
            pending: VecDeque::new(),
            finished: false,
        }
    }

    fn emit(&mut self, parts: Vec<UIMessagePart>, usage: Option<TokenUsage>) {
        let delta = UIMessage::new(Role::Assistant, parts);
        let chunk = MessageChunk::delta(&self.message_id, &self.model, delta).with_usage(usage);
        self.pending.push_back(Ok(chunk));
    }

    fn handle_event_data(&mut self, data: &str) {
        let Some(value) = parse_event_json("claude", data) else {
            return;
        };

        let usage = value
            .get("usage")
            .or_else(|| value.get("message").and_then(|m| m.get("usage")))
            .and_then(|u| serde_json::from_value::<ApiUsage>(u.clone()).ok())
            .map(TokenUsage::from);

        let event = match serde_json::from_value::<SseEvent>(value) {
            Ok(event) => event,
            Err(err) => {
                tracing::warn!("skipping unrecognised claude event: {err}");
                return;
            }
        };

        match event {
            SseEvent::MessageStart { message } => {
                self.message_id = message.id;
                if let Some(model) = message.model {
                    self.model = model;
                }
                self.emit(Vec::new(), usage);
            }
            SseEvent::ContentBlockStart {
                index,
                content_block,
            } => self.handle_block_start(index, content_block, usage),
            SseEvent::ContentBlockDelta { index, delta } => {
                let part = match delta {
                    SseDelta::TextDelta { text } => UIMessagePart::text(text),
                    SseDelta::ThinkingDelta { thinking } => {
                        UIMessagePart::reasoning_delta(thinking, ReasoningMetadata::default())
                    }
                    SseDelta::SignatureDelta { signature } => UIMessagePart::reasoning_delta(
                        "",
                        ReasoningMetadata {
                            signature: Some(signature),
                            ..Default::default()
                        },
                    ),
                    SseDelta::InputJsonDelta { partial_json } => {
                        let Some(id) = self.tool_blocks.get(&index) else {
                            tracing::warn!(index, "input_json_delta for unknown block");
                            return;
                        };
                        UIMessagePart::Tool(ToolPart::new(id.clone(), "", partial_json))
                    }
                    SseDelta::Unknown => return,
                };
                self.emit(vec![part], usage);
            }
            SseEvent::ContentBlockStop | SseEvent::Ping | SseEvent::Unknown => {
                if usage.is_some() {
                    self.emit(Vec::new(), usage);
                }
            }
            SseEvent::MessageDelta { delta } => {
                let delta_message = UIMessage::new(Role::Assistant, Vec::new());
                let chunk = MessageChunk::delta(&self.message_id, &self.model, delta_message)
                    .with_finish_reason(delta.stop_reason)
                    .with_usage(usage);
                self.pending.push_back(Ok(chunk));
            }
            SseEvent::MessageStop => self.finished = true,
            SseEvent::Error { error } => {
                self.pending.push_back(Err(ProviderError::api_error(
                    &error.error_type,
                    &error.message,
                )));
                self.finished = true;
            }
        }
    }

    fn handle_block_start(
        &mut self,
        index: usize,
        block: SseContentBlock,
        usage: Option<TokenUsage>,
    ) {
        match block {
            SseContentBlock::Text { text } => self.emit(vec![UIMessagePart::text(text)], usage),
            SseContentBlock::Thinking { thinking } => self.emit(
                vec![UIMessagePart::reasoning_delta(
                    thinking,
                    ReasoningMetadata::default(),
                )],
                usage,
            ),
            SseContentBlock::ToolUse { id, name } => {
                self.tool_blocks.insert(index, id.clone());
                self.emit(vec![UIMessagePart::Tool(ToolPart::new(id, name, ""))], usage);
            }
            SseContentBlock::RedactedThinking => {
                self.pending.push_back(Err(ProviderError::protocol(
                    "redacted_thinking blocks are not supported",
                )));
                self.finished = true;
            }
            SseContentBlock::Unknown => {
                tracing::debug!(index, "ignoring unsupported content block");
            }
        }
    }
}

impl<S, E> Stream for ClaudeSseParser<S>
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
                Poll::Ready(None) => {
                    self.finished = true;
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

// === SSE Response Structures ===

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum SseEvent {
    MessageStart {
        message: SseMessageInfo,
    },
    ContentBlockStart {
        index: usize,
        content_block: SseContentBlock,
    },
    ContentBlockDelta {
        index: usize,
        delta: SseDelta,
    },
    ContentBlockStop,
    MessageDelta {
        delta: SseMessageDeltaInner,
    },
    MessageStop,
    Ping,
    Error {
        error: SseErrorInfo,
    },
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Deserialize)]
struct SseMessageInfo {
    #[serde(default)]
    id: String,
    #[serde(default)]
    model: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum SseContentBlock {
    Text {
        #[serde(default)]
        text: String,
    },
    Thinking {
        #[serde(default)]
        thinking: String,
    },
    RedactedThinking,
    ToolUse {
        id: String,
        name: String,
    },
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum SseDelta {
    TextDelta { text: String },
    InputJsonDelta { partial_json: String },
    ThinkingDelta { thinking: String },
    SignatureDelta { signature: String },
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Deserialize)]
struct SseMessageDeltaInner {
    #[serde(default)]
    stop_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SseErrorInfo {
    #[serde(rename = "type")]
    error_type: String,
    message: String,
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use futures_util::{StreamExt, stream};

    use super::*;
    use crate::providers::shared::ProviderErrorKind;

    async fn collect(body: &str) -> Vec<ProviderResult<MessageChunk>> {
        let chunks = vec![Ok::<_, std::io::Error>(bytes::Bytes::from(body.to_string()))];
        ClaudeSseParser::new(stream::iter(chunks), "claude-test".to_string())
            .collect()
            .await
    }

    const SSE_THINKING_TEXT_TOOL: &str = r#"event: message_start
data: {"type":"message_start","message":{"id":"msg_1","model":"claude-sonnet","usage":{"input_tokens":10,"output_tokens":1}}}

event: content_block_start
data: {"type":"content_block_start","index":0,"content_block":{"type":"thinking","thinking":""}}

event: content_block_delta
data: {"type":"content_block_delta","index":0,"delta":{"type":"thinking_delta","thinking":"Thin"}}

event: content_block_delta
data: {"type":"content_block_delta","index":0,"delta":{"type":"thinking_delta","thinking":"king..."}}

event: content_block_delta
data: {"type":"content_block_delta","index":0,"delta":{"type":"signature_delta","signature":"abc"}}

event: content_block_stop
data: {"type":"content_block_stop","index":0}

event: content_block_start
data: {"type":"content_block_start","index":1,"content_block":{"type":"text","text":""}}

event: content_block_delta
data: {"type":"content_block_delta","index":1,"delta":{"type":"text_delta","text":"Let me check."}}

event: content_block_delta
data: {not json at all

event: content_block_start
data: {"type":"content_block_start","index":2,"content_block":{"type":"tool_use","id":"toolu_1","name":"weather","input":{}}}

event: content_block_delta
data: {"type":"content_block_delta","index":2,"delta":{"type":"input_json_delta","partial_json":"{\"city\":"}}

event: content_block_delta
data: {"type":"content_block_delta","index":2,"delta":{"type":"input_json_delta","partial_json":"\"Paris\"}"}}

event: message_delta
data: {"type":"message_delta","delta":{"stop_reason":"tool_use"},"usage":{"output_tokens":42}}

event: message_stop
data: {"type":"message_stop"}

"#;

    #[tokio::test]
    async fn test_stream_merges_into_reasoning_text_and_tool() {
        let chunks = collect(SSE_THINKING_TEXT_TOOL).await;
        let mut message = UIMessage::new(Role::Assistant, Vec::new());
        let now = Utc::now();
        for chunk in &chunks {
            message.apply_chunk(chunk.as_ref().unwrap(), now);
        }

        let UIMessagePart::Reasoning {
            reasoning,
            metadata,
            ..
        } = &message.parts[0]
        else {
            panic!("expected reasoning first");
        };
        assert_eq!(reasoning, "Thinking...");
        assert_eq!(metadata.signature.as_deref(), Some("abc"));
        assert_eq!(message.text(), "Let me check.");

        let tool = message.tool_parts().next().unwrap();
        assert_eq!(tool.tool_call_id, "toolu_1");
        assert_eq!(tool.tool_name, "weather");
        assert_eq!(tool.parsed_input().unwrap()["city"], "Paris");

        let usage = message.usage.unwrap();
        assert_eq!(usage.prompt_tokens, 10);
        assert_eq!(usage.completion_tokens, 42);

        let last = chunks.last().unwrap().as_ref().unwrap();
        assert_eq!(last.finish_reason(), Some("tool_use"));
        assert_eq!(last.id, "msg_1");
    }

    #[tokio::test]
    async fn test_redacted_thinking_fails_fast() {
        let body = r#"event: content_block_start
data: {"type":"content_block_start","index":0,"content_block":{"type":"redacted_thinking","data":"xyz"}}

event: content_block_delta
data: {"type":"content_block_delta","index":1,"delta":{"type":"text_delta","text":"never"}}

"#;
        let chunks = collect(body).await;
        assert_eq!(chunks.len(), 1);
        assert_eq!(
            chunks[0].as_ref().unwrap_err().kind,
            ProviderErrorKind::Protocol
        );
    }

    #[tokio::test]
    async fn test_error_event_closes_stream() {
        let body = r#"event: error
data: {"type":"error","error":{"type":"overloaded_error","message":"Overloaded"}}

event: content_block_delta
data: {"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"late"}}
"#;
        let chunks = collect(body).await;
        assert_eq!(chunks.len(), 1);
        let err = chunks[0].as_ref().unwrap_err();
        assert_eq!(err.kind, ProviderErrorKind::ApiError);
        assert!(err.message.contains("Overloaded"));
    }
}
