//! OpenAI-compatible Chat Completions wire format.

use std::collections::{HashMap, VecDeque};
use std::pin::Pin;

use eventsource_stream::{EventStream, Eventsource};
use futures_util::Stream;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::message::{
    MessageChunk, ReasoningMetadata, Role, TokenUsage, ToolPart, UIMessage, UIMessagePart,
};
use crate::providers::params::{TextGenerationParams, ToolDefinition};
use crate::providers::shared::{
    MediaSource, ProviderError, ProviderResult, SseTerminatedStream, ToolStep,
    inline_media_or_warn, new_chunk_id, parse_event_json, split_tool_steps, sse_transport_error,
};

#[derive(Debug, Serialize)]
pub(crate) struct ChatCompletionRequest<'a> {
    model: &'a str,
    stream: bool,
    messages: Vec<ChatCompletionMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<ChatToolDefinition<'a>>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream_options: Option<StreamOptions>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reasoning_effort: Option<&'static str>,
}

#[derive(Debug, Serialize)]
struct StreamOptions {
    include_usage: bool,
}

#[derive(Debug, Serialize)]
struct ChatCompletionMessage {
    role: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<ChatMessageContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<ChatToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

impl ChatCompletionMessage {
    fn new(role: &'static str, content: ChatMessageContent) -> Self {
        Self {
            role,
            content: Some(content),
            tool_calls: None,
            tool_call_id: None,
        }
    }
}

/// Message content - either a simple string or an array of content parts.
#[derive(Debug, Serialize)]
#[serde(untagged)]
enum ChatMessageContent {
    Text(String),
    Parts(Vec<ChatContentPart>),
}

impl ChatMessageContent {
    /// Text-only content collapses to a plain string for endpoints that
    /// reject the array form.
    fn from_parts(parts: Vec<ChatContentPart>) -> Self {
        if parts.iter().all(|p| matches!(p, ChatContentPart::Text { .. })) {
            let text = parts
                .into_iter()
                .filter_map(|p| match p {
                    ChatContentPart::Text { text } => Some(text),
                    ChatContentPart::ImageUrl { .. } => None,
                })
                .collect::<String>();
            Self::Text(text)
        } else {
            Self::Parts(parts)
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ChatContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrlData },
}

#[derive(Debug, Serialize)]
struct ImageUrlData {
    url: String,
}

#[derive(Debug, Serialize)]
struct ChatToolCall {
    id: String,
    #[serde(rename = "type")]
    tool_type: &'static str,
    function: ChatToolCallFunction,
}

#[derive(Debug, Serialize)]
struct ChatToolCallFunction {
    name: String,
    arguments: String,
}

#[derive(Debug, Serialize)]
struct ChatToolDefinition<'a> {
    #[serde(rename = "type")]
    tool_type: &'static str,
    function: ChatToolFunction<'a>,
}

#[derive(Debug, Serialize)]
struct ChatToolFunction<'a> {
    name: &'a str,
    description: &'a str,
    parameters: &'a Value,
}

impl<'a> From<&'a ToolDefinition> for ChatToolDefinition<'a> {
    fn from(tool: &'a ToolDefinition) -> Self {
        Self {
            tool_type: "function",
            function: ChatToolFunction {
                name: &tool.name,
                description: &tool.description,
                parameters: &tool.parameters,
            },
        }
    }
}

impl<'a> ChatCompletionRequest<'a> {
    pub(crate) fn new(messages: &[UIMessage], params: &'a TextGenerationParams, stream: bool) -> Self {
        Self {
            model: &params.model.model_id,
            stream,
            messages: build_messages(messages),
            tools: params
                .declared_tools()
                .map(|tools| tools.iter().map(ChatToolDefinition::from).collect()),
            max_tokens: params.max_tokens,
            temperature: params.temperature,
            top_p: params.top_p,
            stream_options: stream.then_some(StreamOptions {
                include_usage: true,
            }),
            reasoning_effort: params.reasoning().and_then(|r| r.level.effort_label()),
        }
    }
}

fn build_messages(messages: &[UIMessage]) -> Vec<ChatCompletionMessage> {
    let mut out = Vec::new();
    for message in messages {
        match message.role {
            Role::System => {
                let text = message.text();
                if !text.trim().is_empty() {
                    out.push(ChatCompletionMessage::new(
                        "system",
                        ChatMessageContent::Text(text),
                    ));
                }
            }
            Role::User => {
                let parts: Vec<_> = message.parts.iter().filter_map(user_content_part).collect();
                if !parts.is_empty() {
                    out.push(ChatCompletionMessage::new(
                        "user",
                        ChatMessageContent::from_parts(parts),
                    ));
                }
            }
            Role::Assistant => {
                for step in split_tool_steps(&message.parts) {
                    push_assistant_step(&mut out, &step);
                }
            }
        }
    }
    out
}

fn user_content_part(part: &UIMessagePart) -> Option<ChatContentPart> {
    match part {
        UIMessagePart::Text { text } => Some(ChatContentPart::Text { text: text.clone() }),
        UIMessagePart::Image { url } => Some(image_part(url)),
        UIMessagePart::Video { .. } | UIMessagePart::Audio { .. } | UIMessagePart::Document { .. } => {
            tracing::debug!("chat completions: dropping unsupported media part");
            None
        }
        UIMessagePart::Reasoning { .. } | UIMessagePart::Tool(_) => None,
    }
}

fn image_part(url: &str) -> ChatContentPart {
    match inline_media_or_warn(url) {
        Some(MediaSource::Inline { mime_type, data }) => ChatContentPart::ImageUrl {
            image_url: ImageUrlData {
                url: format!("data:{mime_type};base64,{data}"),
            },
        },
        Some(MediaSource::Remote(url)) => ChatContentPart::ImageUrl {
            image_url: ImageUrlData { url },
        },
        None => ChatContentPart::Text {
            text: String::new(),
        },
    }
}

/// One assistant turn with its tool calls, then one `tool` message per call.
fn push_assistant_step(out: &mut Vec<ChatCompletionMessage>, step: &ToolStep<'_>) {
    let text: String = step
        .content
        .iter()
        .filter_map(|part| match part {
            UIMessagePart::Text { text } => Some(text.as_str()),
            _ => None,
        })
        .collect();

    if text.is_empty() && step.tools.is_empty() {
        return;
    }

    let tool_calls: Vec<_> = step
        .tools
        .iter()
        .map(|tool| ChatToolCall {
            id: tool.tool_call_id.clone(),
            tool_type: "function",
            function: ChatToolCallFunction {
                name: tool.tool_name.clone(),
                arguments: if tool.input.trim().is_empty() {
                    "{}".to_string()
                } else {
                    tool.input.clone()
                },
            },
        })
        .collect();

    out.push(ChatCompletionMessage {
        role: "assistant",
        content: (!text.is_empty()).then_some(ChatMessageContent::Text(text)),
        tool_calls: (!tool_calls.is_empty()).then_some(tool_calls),
        tool_call_id: None,
    });

    for tool in &step.tools {
        out.push(ChatCompletionMessage {
            role: "tool",
            content: Some(ChatMessageContent::Text(tool.output_text())),
            tool_calls: None,
            tool_call_id: Some(tool.tool_call_id.clone()),
        });

        // Tool messages cannot carry images, so they follow as a user turn.
        let images: Vec<_> = tool
            .output
            .iter()
            .filter_map(|part| match part {
                UIMessagePart::Image { url } => Some(image_part(url)),
                _ => None,
            })
            .collect();
        if !images.is_empty() {
            out.push(ChatCompletionMessage::new(
                "user",
                ChatMessageContent::Parts(images),
            ));
        }
    }
}

// === Responses ===

#[derive(Debug, Default, Deserialize)]
pub(crate) struct ApiUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
    #[serde(default)]
    prompt_tokens_details: Option<PromptTokensDetails>,
}

#[derive(Debug, Default, Deserialize)]
struct PromptTokensDetails {
    #[serde(default)]
    cached_tokens: u64,
}

impl From<ApiUsage> for TokenUsage {
    fn from(usage: ApiUsage) -> Self {
        TokenUsage::new(
            usage.prompt_tokens,
            usage.completion_tokens,
            usage.prompt_tokens_details.map_or(0, |d| d.cached_tokens),
        )
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct ChatCompletionResponse {
    #[serde(default)]
    id: String,
    #[serde(default)]
    model: String,
    #[serde(default)]
    choices: Vec<ResponseChoice>,
    #[serde(default)]
    usage: Option<ApiUsage>,
}

#[derive(Debug, Deserialize)]
struct ResponseChoice {
    message: ResponseMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    reasoning_content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<ResponseToolCall>,
}

#[derive(Debug, Deserialize)]
struct ResponseToolCall {
    id: String,
    function: ResponseFunction,
}

#[derive(Debug, Deserialize)]
struct ResponseFunction {
    name: String,
    #[serde(default)]
    arguments: String,
}

pub(crate) fn response_to_chunk(response: ChatCompletionResponse) -> ProviderResult<MessageChunk> {
    let Some(choice) = response.choices.into_iter().next() else {
        return Err(ProviderError::parse("Chat completion returned no choices"));
    };

    let mut parts = Vec::new();
    if let Some(reasoning) = choice.message.reasoning_content.filter(|r| !r.is_empty()) {
        parts.push(UIMessagePart::reasoning_delta(
            reasoning,
            ReasoningMetadata::default(),
        ));
    }
    if let Some(content) = choice.message.content.filter(|c| !c.is_empty()) {
        parts.push(UIMessagePart::text(content));
    }
    for call in choice.message.tool_calls {
        parts.push(UIMessagePart::Tool(ToolPart::new(
            call.id,
            call.function.name,
            call.function.arguments,
        )));
    }

    let id = if response.id.is_empty() {
        new_chunk_id()
    } else {
        response.id
    };
    Ok(MessageChunk::complete(
        id,
        response.model,
        UIMessage::new(Role::Assistant, parts),
        choice.finish_reason,
        response.usage.map(TokenUsage::from),
    ))
}

// === Streaming ===

/// SSE parser for OpenAI-compatible chat completions.
///
/// Every data event becomes one chunk. Tool call fragments carry the call id
/// only on their first fragment, so ids are remembered by `tool_calls[].index`.
pub(crate) struct ChatCompletionsSseParser<S> {
    inner: EventStream<SseTerminatedStream<S>>,
    model: String,
    tool_ids: HashMap<u64, String>,
    pending: VecDeque<ProviderResult<MessageChunk>>,
    finished: bool,
}

impl<S> ChatCompletionsSseParser<S> {
    pub(crate) fn new<E>(stream: S, model: String) -> Self
    where
        S: Stream<Item = std::result::Result<bytes::Bytes, E>> + Unpin,
    {
        Self {
            inner: SseTerminatedStream::new(stream).eventsource(),
            model,
            tool_ids: HashMap::new(),
            pending: VecDeque::new(),
            finished: false,
        }
    }

    fn handle_event_data(&mut self, data: &str) {
        let Some(value) = parse_event_json("openai", data) else {
            return;
        };

        if let Some(error) = value.get("error") {
            let error_type = error.get("type").and_then(Value::as_str).unwrap_or("error");
            let message = error
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("Unknown error");
            self.pending
                .push_back(Err(ProviderError::api_error(error_type, message)));
            self.finished = true;
            return;
        }

        let id = value.get("id").and_then(Value::as_str).unwrap_or_default();
        if let Some(model) = value.get("model").and_then(Value::as_str) {
            model.clone_into(&mut self.model);
        }
        let usage = value
            .get("usage")
            .filter(|u| !u.is_null())
            .and_then(|u| serde_json::from_value::<ApiUsage>(u.clone()).ok())
            .map(TokenUsage::from);

        let choice = value
            .get("choices")
            .and_then(Value::as_array)
            .and_then(|choices| choices.first());

        let mut parts = Vec::new();
        let mut finish_reason = None;
        if let Some(choice) = choice {
            finish_reason = choice
                .get("finish_reason")
                .and_then(Value::as_str)
                .map(str::to_string);
            if let Some(delta) = choice.get("delta") {
                parts = self.delta_parts(delta);
            }
        }

        let chunk = MessageChunk::delta(id, &self.model, UIMessage::new(Role::Assistant, parts))
            .with_finish_reason(finish_reason)
            .with_usage(usage);
        self.pending.push_back(Ok(chunk));
    }

    fn delta_parts(&mut self, delta: &Value) -> Vec<UIMessagePart> {
        let mut parts = Vec::new();

        let reasoning = delta
            .get("reasoning_content")
            .or_else(|| delta.get("reasoning"))
            .and_then(Value::as_str)
            .filter(|r| !r.is_empty());
        if let Some(reasoning) = reasoning {
            parts.push(UIMessagePart::reasoning_delta(
                reasoning,
                ReasoningMetadata::default(),
            ));
        }

        if let Some(text) = delta
            .get("content")
            .and_then(Value::as_str)
            .filter(|t| !t.is_empty())
        {
            parts.push(UIMessagePart::text(text));
        }

        let calls = delta
            .get("tool_calls")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default();
        for (position, call) in calls.iter().enumerate() {
            let index = call
                .get("index")
                .and_then(Value::as_u64)
                .unwrap_or(position as u64);
            let id = match call.get("id").and_then(Value::as_str).filter(|id| !id.is_empty()) {
                Some(id) => {
                    self.tool_ids.insert(index, id.to_string());
                    id.to_string()
                }
                None => self
                    .tool_ids
                    .entry(index)
                    .or_insert_with(|| format!("call_{}", new_chunk_id()))
                    .clone(),
            };
            let function = call.get("function");
            let name = function
                .and_then(|f| f.get("name"))
                .and_then(Value::as_str)
                .unwrap_or_default();
            let arguments = function
                .and_then(|f| f.get("arguments"))
                .and_then(Value::as_str)
                .unwrap_or_default();
            parts.push(UIMessagePart::Tool(ToolPart::new(id, name, arguments)));
        }

        parts
    }
}

impl<S, E> Stream for ChatCompletionsSseParser<S>
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

#[cfg(test)]
mod tests {
    use futures_util::StreamExt;
    use serde_json::json;

    use super::*;
    use crate::message::ToolApproval;
    use crate::providers::setting::{Model, ModelAbility};

    fn params(abilities: &[ModelAbility]) -> TextGenerationParams {
        TextGenerationParams::new(Model::new("gpt-test").with_abilities(abilities))
    }

    async fn collect(events: &[&str]) -> Vec<ProviderResult<MessageChunk>> {
        let body = events
            .iter()
            .map(|data| format!("data: {data}\n\n"))
            .collect::<String>();
        let stream = futures_util::stream::iter(vec![Ok::<_, std::io::Error>(
            bytes::Bytes::from(body),
        )]);
        ChatCompletionsSseParser::new(stream, "gpt-test".to_string())
            .collect()
            .await
    }

    #[test]
    fn test_unreadable_image_becomes_empty_text() {
        let messages = [UIMessage::new(
            Role::User,
            vec![
                UIMessagePart::Image {
                    url: "/definitely/missing.png".to_string(),
                },
                UIMessagePart::Image {
                    url: "https://example.com/cat.png".to_string(),
                },
            ],
        )];
        let params = params(&[]);
        let value = serde_json::to_value(ChatCompletionRequest::new(&messages, &params, false)).unwrap();

        assert_eq!(
            value["messages"],
            json!([{"role": "user", "content": [
                {"type": "text", "text": ""},
                {"type": "image_url", "image_url": {"url": "https://example.com/cat.png"}}
            ]}])
        );

        // with only text left the content collapses to a string
        let messages = [UIMessage::new(
            Role::User,
            vec![
                UIMessagePart::Image {
                    url: "/definitely/missing.png".to_string(),
                },
                UIMessagePart::text("describe it"),
            ],
        )];
        let value = serde_json::to_value(ChatCompletionRequest::new(&messages, &params, false)).unwrap();
        assert_eq!(value["messages"][0]["content"], "describe it");
    }

    #[test]
    fn test_assistant_tool_steps_alternate_with_tool_messages() {
        let mut tool = ToolPart::new("call_1", "weather", r#"{"city":"Oslo"}"#);
        tool.output = vec![UIMessagePart::text("sunny")];
        tool.approval = ToolApproval::Approved;
        tool.executed = true;
        let messages = [
            UIMessage::system("sys"),
            UIMessage::user("weather?"),
            UIMessage::new(
                Role::Assistant,
                vec![
                    UIMessagePart::text("Checking."),
                    UIMessagePart::Tool(tool),
                    UIMessagePart::text("It is sunny."),
                ],
            ),
        ];
        let params = params(&[]);
        let value = serde_json::to_value(ChatCompletionRequest::new(&messages, &params, false)).unwrap();

        assert_eq!(
            value["messages"],
            json!([
                {"role": "system", "content": "sys"},
                {"role": "user", "content": "weather?"},
                {"role": "assistant", "content": "Checking.", "tool_calls": [
                    {"id": "call_1", "type": "function", "function": {"name": "weather", "arguments": "{\"city\":\"Oslo\"}"}}
                ]},
                {"role": "tool", "content": "sunny", "tool_call_id": "call_1"},
                {"role": "assistant", "content": "It is sunny."}
            ])
        );
        assert!(value.get("stream_options").is_none());
    }

    #[test]
    fn test_tools_and_effort_follow_model_abilities() {
        let tool = ToolDefinition::new("echo", "Echo input", json!({"type": "object"}));

        let mut plain = params(&[]);
        plain.tools = vec![tool.clone()];
        plain.thinking_budget = Some(0);
        let value = serde_json::to_value(ChatCompletionRequest::new(&[], &plain, true)).unwrap();
        assert!(value.get("tools").is_none());
        assert!(value.get("reasoning_effort").is_none());
        assert_eq!(value["stream_options"], json!({"include_usage": true}));

        let mut capable = params(&[ModelAbility::Tool, ModelAbility::Reasoning]);
        capable.tools = vec![tool];
        capable.thinking_budget = Some(0);
        let value = serde_json::to_value(ChatCompletionRequest::new(&[], &capable, true)).unwrap();
        assert_eq!(value["tools"][0]["function"]["name"], "echo");
        assert_eq!(value["reasoning_effort"], "none");

        capable.thinking_budget = Some(20_000);
        let value = serde_json::to_value(ChatCompletionRequest::new(&[], &capable, true)).unwrap();
        assert_eq!(value["reasoning_effort"], "high");
    }

    #[test]
    fn test_user_image_becomes_data_url_part() {
        let messages = [UIMessage::new(
            Role::User,
            vec![
                UIMessagePart::text("what is this?"),
                UIMessagePart::Image {
                    url: "data:image/png;base64,AAAA".to_string(),
                },
            ],
        )];
        let params = params(&[]);
        let value = serde_json::to_value(ChatCompletionRequest::new(&messages, &params, false)).unwrap();
        assert_eq!(
            value["messages"][0]["content"],
            json!([
                {"type": "text", "text": "what is this?"},
                {"type": "image_url", "image_url": {"url": "data:image/png;base64,AAAA"}}
            ])
        );
    }

    #[tokio::test]
    async fn test_stream_tool_call_fragments_share_id() {
        let chunks = collect(&[
            r#"{"id":"c1","model":"gpt-test","choices":[{"index":0,"delta":{"role":"assistant","content":"Hi"}}]}"#,
            r#"{"id":"c1","choices":[{"index":0,"delta":{"tool_calls":[{"index":0,"id":"call_9","function":{"name":"echo","arguments":"{\"te"}}]}}]}"#,
            r#"{"id":"c1","choices":[{"index":0,"delta":{"tool_calls":[{"index":0,"function":{"arguments":"xt\":1}"}}]}}]}"#,
            r#"{"id":"c1","choices":[{"index":0,"delta":{},"finish_reason":"tool_calls"}]}"#,
            r#"{"id":"c1","choices":[],"usage":{"prompt_tokens":5,"completion_tokens":7}}"#,
            "[DONE]",
        ])
        .await;
        assert_eq!(chunks.len(), 5);

        let mut message = UIMessage::new(Role::Assistant, Vec::new());
        for chunk in &chunks {
            message.apply_chunk(chunk.as_ref().unwrap(), chrono::Utc::now());
        }
        assert_eq!(message.text(), "Hi");
        let tool = message.tool_parts().next().unwrap();
        assert_eq!(tool.tool_call_id, "call_9");
        assert_eq!(tool.tool_name, "echo");
        assert_eq!(tool.parsed_input().unwrap(), json!({"text": 1}));
        assert_eq!(message.usage.unwrap().total_tokens, 12);
        assert_eq!(chunks[3].as_ref().unwrap().finish_reason(), Some("tool_calls"));
    }

    #[tokio::test]
    async fn test_stream_skips_malformed_and_stops_on_error() {
        let chunks = collect(&[
            r#"{"choices":[{"delta":{"reasoning_content":"hmm"}}]}"#,
            "{not json",
            r#"{"error":{"type":"rate_limit","message":"slow down"}}"#,
            r#"{"choices":[{"delta":{"content":"never"}}]}"#,
        ])
        .await;
        assert_eq!(chunks.len(), 2);
        let err = chunks[1].as_ref().unwrap_err();
        assert!(err.message.contains("slow down"));
    }

    #[test]
    fn test_buffered_response_parses_tool_calls() {
        let response: ChatCompletionResponse = serde_json::from_value(json!({
            "id": "chatcmpl-1",
            "model": "gpt-test",
            "choices": [{
                "message": {
                    "role": "assistant",
                    "content": null,
                    "tool_calls": [{"id": "call_1", "type": "function", "function": {"name": "echo", "arguments": "{}"}}]
                },
                "finish_reason": "tool_calls"
            }],
            "usage": {"prompt_tokens": 3, "completion_tokens": 4, "prompt_tokens_details": {"cached_tokens": 1}}
        }))
        .unwrap();
        let chunk = response_to_chunk(response).unwrap();
        let message = chunk.message().unwrap();
        assert_eq!(message.tool_parts().count(), 1);
        assert_eq!(chunk.usage.as_ref().unwrap().cached_tokens, 1);
        assert_eq!(chunk.finish_reason(), Some("tool_calls"));
    }
}
