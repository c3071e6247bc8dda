//! SSE parsing for Responses API streaming.

use std::collections::{HashMap, VecDeque};
use std::pin::Pin;

use eventsource_stream::{EventStream, Eventsource};
use futures_util::Stream;
use serde_json::Value;

use super::responses::{OutputItem, ResponsesResponse};
use crate::message::{
    MessageChunk, ReasoningMetadata, Role, TokenUsage, ToolPart, UIMessage, UIMessagePart,
};
use crate::providers::shared::{
    ProviderError, ProviderResult, SseTerminatedStream, parse_event_json, sse_transport_error,
};

/// Extension trait for extracting strings from JSON values.
trait JsonExt {
    /// Get a string field, returning empty string if missing or not a string.
    fn get_str(&self, key: &str) -> &str;
}

impl JsonExt for Value {
    fn get_str(&self, key: &str) -> &str {
        self.get(key).and_then(Value::as_str).unwrap_or("")
    }
}

/// A function call being streamed, keyed by its output item id.
#[derive(Debug)]
struct CallState {
    call_id: String,
    emitted_bytes: usize,
}

/// Converts Responses API events into message chunks.
///
/// Argument deltas reference the output item id, not the call id, so calls
/// are tracked from `response.output_item.added`. When a provider skips the
/// deltas, the final arguments from the `done` events are emitted instead.
pub(crate) struct ResponsesSseParser<S> {
    inner: EventStream<SseTerminatedStream<S>>,
    response_id: String,
    model: String,
    calls: HashMap<String, CallState>,
    pending: VecDeque<ProviderResult<MessageChunk>>,
    finished: bool,
}

impl<S> ResponsesSseParser<S> {
    pub(crate) fn new<E>(stream: S, model: String) -> Self
    where
        S: Stream<Item = std::result::Result<bytes::Bytes, E>> + Unpin,
    {
        Self {
            inner: SseTerminatedStream::new(stream).eventsource(),
            response_id: String::new(),
            model,
            calls: HashMap::new(),
            pending: VecDeque::new(),
            finished: false,
        }
    }

    fn emit(&mut self, parts: Vec<UIMessagePart>) {
        let delta = UIMessage::new(Role::Assistant, parts);
        self.pending.push_back(Ok(MessageChunk::delta(
            &self.response_id,
            &self.model,
            delta,
        )));
    }

    fn fail(&mut self, error: ProviderError) {
        self.pending.push_back(Err(error));
        self.finished = true;
    }

    fn handle_event_data(&mut self, data: &str) {
        let Some(value) = parse_event_json("openai-responses", data) else {
            return;
        };

        match value.get_str("type") {
            "response.created" | "response.in_progress" => {
                if let Some(response) = value.get("response") {
                    response.get_str("id").clone_into(&mut self.response_id);
                    let model = response.get_str("model");
                    if !model.is_empty() {
                        model.clone_into(&mut self.model);
                    }
                }
            }
            "response.output_item.added" => self.handle_item_added(&value),
            "response.output_text.delta" | "response.refusal.delta" => {
                let delta = value.get_str("delta");
                if !delta.is_empty() {
                    self.emit(vec![UIMessagePart::text(delta)]);
                }
            }
            "response.reasoning_summary_part.added" => {
                // Separate consecutive summary parts inside one reasoning item.
                let index = value.get("summary_index").and_then(Value::as_u64);
                if index.is_some_and(|i| i > 0) {
                    self.emit(vec![reasoning_part("\n\n", value.get_str("item_id"), None)]);
                }
            }
            "response.reasoning_summary_text.delta" => {
                let delta = value.get_str("delta");
                if !delta.is_empty() {
                    self.emit(vec![reasoning_part(delta, value.get_str("item_id"), None)]);
                }
            }
            "response.function_call_arguments.delta" => {
                let item_id = value.get_str("item_id");
                let delta = value.get_str("delta");
                let Some(call) = self.calls.get_mut(item_id) else {
                    tracing::warn!(item_id, "arguments delta for unknown function call");
                    return;
                };
                call.emitted_bytes += delta.len();
                let id = call.call_id.clone();
                self.emit(vec![UIMessagePart::Tool(ToolPart::new(id, "", delta))]);
            }
            "response.function_call_arguments.done" => {
                let item_id = value.get_str("item_id").to_string();
                self.emit_argument_remainder(&item_id, value.get_str("arguments"));
            }
            "response.output_item.done" => self.handle_item_done(&value),
            "response.completed" | "response.incomplete" => {
                let response = value
                    .get("response")
                    .cloned()
                    .and_then(|r| serde_json::from_value::<ResponsesResponse>(r).ok());
                let (finish_reason, usage) = response.map_or((None, None), |r| {
                    (r.finish_reason(), r.usage.map(TokenUsage::from))
                });
                let delta = UIMessage::new(Role::Assistant, Vec::new());
                let chunk = MessageChunk::delta(&self.response_id, &self.model, delta)
                    .with_finish_reason(finish_reason)
                    .with_usage(usage);
                self.pending.push_back(Ok(chunk));
                self.finished = true;
            }
            "response.failed" => {
                let error = value.get("response").and_then(|r| r.get("error"));
                let code = error.map_or("error", |e| e.get_str("code"));
                let message = error.map_or("response failed", |e| e.get_str("message"));
                self.fail(ProviderError::api_error(code, message));
            }
            "error" => {
                let code = value.get("code").and_then(Value::as_str).unwrap_or("error");
                self.fail(ProviderError::api_error(code, value.get_str("message")));
            }
            _ => {}
        }
    }

    fn handle_item_added(&mut self, value: &Value) {
        let Some(item) = value.get("item") else {
            return;
        };
        match item.get_str("type") {
            "function_call" => {
                let call_id = item.get_str("call_id").to_string();
                let item_id = item.get_str("id").to_string();
                let name = item.get_str("name").to_string();
                self.calls.insert(
                    item_id,
                    CallState {
                        call_id: call_id.clone(),
                        emitted_bytes: 0,
                    },
                );
                self.emit(vec![UIMessagePart::Tool(ToolPart::new(call_id, name, ""))]);
            }
            "reasoning" => {
                self.emit(vec![reasoning_part("", item.get_str("id"), None)]);
            }
            _ => {}
        }
    }

    fn handle_item_done(&mut self, value: &Value) {
        let Some(item) = value.get("item") else {
            return;
        };
        match serde_json::from_value::<OutputItem>(item.clone()) {
            Ok(OutputItem::FunctionCall { id, arguments, .. }) => {
                self.emit_argument_remainder(&id, &arguments);
            }
            Ok(OutputItem::Reasoning {
                id,
                encrypted_content: Some(encrypted),
                ..
            }) => {
                self.emit(vec![reasoning_part("", &id, Some(encrypted))]);
            }
            Ok(_) => {}
            Err(err) => tracing::warn!("skipping unrecognised output item: {err}"),
        }
    }

    /// Emits whatever part of the final arguments was not streamed as deltas.
    fn emit_argument_remainder(&mut self, item_id: &str, arguments: &str) {
        let Some(call) = self.calls.get_mut(item_id) else {
            return;
        };
        let remainder = arguments.get(call.emitted_bytes..).unwrap_or("");
        if remainder.is_empty() {
            return;
        }
        call.emitted_bytes = arguments.len();
        let part = UIMessagePart::Tool(ToolPart::new(call.call_id.clone(), "", remainder));
        self.emit(vec![part]);
    }
}

fn reasoning_part(text: &str, item_id: &str, encrypted: Option<String>) -> UIMessagePart {
    UIMessagePart::reasoning_delta(
        text,
        ReasoningMetadata {
            item_id: (!item_id.is_empty()).then(|| item_id.to_string()),
            encrypted,
            ..Default::default()
        },
    )
}

impl<S, E> Stream for ResponsesSseParser<S>
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

    async fn collect(events: &[Value]) -> Vec<ProviderResult<MessageChunk>> {
        let body = events
            .iter()
            .map(|event| format!("data: {event}\n\n"))
            .collect::<String>();
        let stream = futures_util::stream::iter(vec![Ok::<_, std::io::Error>(
            bytes::Bytes::from(body),
        )]);
        ResponsesSseParser::new(stream, "o4".to_string()).collect().await
    }

    fn merge(chunks: &[ProviderResult<MessageChunk>]) -> UIMessage {
        let mut message = UIMessage::new(Role::Assistant, Vec::new());
        for chunk in chunks {
            message.apply_chunk(chunk.as_ref().unwrap(), chrono::Utc::now());
        }
        message
    }

    #[tokio::test]
    async fn test_stream_reasoning_text_and_function_call() {
        let chunks = collect(&[
            json!({"type": "response.created", "response": {"id": "resp_1", "model": "o4-mini"}}),
            json!({"type": "response.output_item.added", "item": {"type": "reasoning", "id": "rs_1"}}),
            json!({"type": "response.reasoning_summary_text.delta", "item_id": "rs_1", "delta": "Plan"}),
            json!({"type": "response.output_item.done", "item": {"type": "reasoning", "id": "rs_1", "encrypted_content": "enc", "summary": []}}),
            json!({"type": "response.output_text.delta", "delta": "Calling."}),
            json!({"type": "response.output_item.added", "item": {"type": "function_call", "id": "fc_1", "call_id": "call_1", "name": "echo"}}),
            json!({"type": "response.function_call_arguments.delta", "item_id": "fc_1", "delta": "{\"a\""}),
            json!({"type": "response.function_call_arguments.delta", "item_id": "fc_1", "delta": ":1}"}),
            json!({"type": "response.output_item.done", "item": {"type": "function_call", "id": "fc_1", "call_id": "call_1", "name": "echo", "arguments": "{\"a\":1}"}}),
            json!({"type": "response.completed", "response": {"id": "resp_1", "status": "completed", "usage": {"input_tokens": 4, "output_tokens": 6}}}),
        ])
        .await;

        assert_eq!(chunks[0].as_ref().unwrap().model, "o4-mini");
        let message = merge(&chunks);
        let UIMessagePart::Reasoning {
            reasoning,
            metadata,
            finished_at,
            ..
        } = &message.parts[0]
        else {
            panic!("expected reasoning");
        };
        assert_eq!(reasoning, "Plan");
        assert_eq!(metadata.encrypted.as_deref(), Some("enc"));
        assert_eq!(metadata.item_id.as_deref(), Some("rs_1"));
        assert!(finished_at.is_some());
        assert_eq!(message.text(), "Calling.");

        let tool = message.tool_parts().next().unwrap();
        assert_eq!(tool.tool_call_id, "call_1");
        assert_eq!(tool.input, "{\"a\":1}");
        assert_eq!(message.usage.unwrap().total_tokens, 10);
        assert_eq!(chunks.last().unwrap().as_ref().unwrap().finish_reason(), Some("completed"));
    }

    #[tokio::test]
    async fn test_arguments_without_deltas_come_from_done_event() {
        let chunks = collect(&[
            json!({"type": "response.output_item.added", "item": {"type": "function_call", "id": "fc_2", "call_id": "call_2", "name": "echo"}}),
            json!({"type": "response.function_call_arguments.done", "item_id": "fc_2", "arguments": "{\"b\":2}"}),
            json!({"type": "response.output_item.done", "item": {"type": "function_call", "id": "fc_2", "call_id": "call_2", "name": "echo", "arguments": "{\"b\":2}"}}),
        ])
        .await;
        let message = merge(&chunks);
        assert_eq!(message.tool_parts().next().unwrap().input, "{\"b\":2}");
    }

    #[tokio::test]
    async fn test_failed_response_ends_with_error() {
        let chunks = collect(&[
            json!({"type": "response.output_text.delta", "delta": "par"}),
            json!({"type": "response.failed", "response": {"error": {"code": "server_error", "message": "boom"}}}),
            json!({"type": "response.output_text.delta", "delta": "ignored"}),
        ])
        .await;
        assert_eq!(chunks.len(), 2);
        let err = chunks[1].as_ref().unwrap_err();
        assert!(err.message.contains("boom"));
    }
}
