//! Anthropic Claude Messages API adapter.

mod sse;
mod types;

use std::sync::Arc;

use futures_util::StreamExt;
use reqwest::header::{HeaderMap, HeaderValue};

use self::sse::ClaudeSseParser;
use self::types::{MessagesRequest, MessagesResponse, ModelList, ResponseBlock};
use crate::key_roulette::KeyRoulette;
use crate::message::{
    MessageChunk, ReasoningMetadata, Role, TokenUsage, ToolPart, UIMessage, UIMessagePart,
};
use crate::providers::params::{ImageGenerationParams, ImageGenerationResult, TextGenerationParams};
use crate::providers::setting::{ClaudeSetting, CustomHeader, Model};
use crate::providers::shared::{
    ChunkStream, HttpTransport, ProviderError, ProviderResult, apply_custom_headers,
    classify_reqwest_error, ensure_success, finalize_body, load_local_media, read_json,
    resolve_base_url, select_api_key,
};

/// Default base URL for the Anthropic API.
pub const DEFAULT_BASE_URL: &str = "https://api.anthropic.com/v1";

const API_VERSION: &str = "2023-06-01";

/// Claude adapter bound to the shared transport and key roulette.
#[derive(Debug, Clone)]
pub struct ClaudeProvider {
    transport: Arc<HttpTransport>,
    roulette: Arc<KeyRoulette>,
}

impl ClaudeProvider {
    pub fn new(transport: Arc<HttpTransport>, roulette: Arc<KeyRoulette>) -> Self {
        Self {
            transport,
            roulette,
        }
    }

    fn headers(
        &self,
        setting: &ClaudeSetting,
        extra: &[CustomHeader],
        streaming: bool,
    ) -> ProviderResult<HeaderMap> {
        let api_key = select_api_key(&self.roulette, &setting.common)?;
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-api-key",
            HeaderValue::from_str(&api_key)
                .map_err(|e| ProviderError::config(format!("Invalid API key header: {e}")))?,
        );
        headers.insert("anthropic-version", HeaderValue::from_static(API_VERSION));
        headers.insert("content-type", HeaderValue::from_static("application/json"));
        if streaming {
            headers.insert("accept", HeaderValue::from_static("text/event-stream"));
        }
        apply_custom_headers(&mut headers, setting.common.custom_headers.iter().chain(extra));
        Ok(headers)
    }

    /// Lists models via `GET /models`.
    ///
    /// # Errors
    /// Fails on transport errors, non-2xx responses, or an unexpected body.
    pub async fn list_models(&self, setting: &ClaudeSetting) -> ProviderResult<Vec<Model>> {
        let base_url = resolve_base_url(&setting.common, DEFAULT_BASE_URL)?;
        let client = self.transport.client_for(setting.common.proxy.as_ref())?;
        let response = client
            .get(format!("{base_url}/models?limit=1000"))
            .headers(self.headers(setting, &[], false)?)
            .send()
            .await
            .map_err(classify_reqwest_error)?;

        let body = read_json(response).await?;
        let list: ModelList = serde_json::from_value(body)
            .map_err(|e| ProviderError::parse(format!("Unexpected model list: {e}")))?;
        Ok(list
            .data
            .into_iter()
            .map(|entry| {
                let name = entry.display_name.unwrap_or_else(|| entry.id.clone());
                Model::new(entry.id).with_display_name(name)
            })
            .collect())
    }

    /// # Errors
    /// Always fails: Anthropic exposes no balance endpoint.
    pub async fn get_balance(&self, _setting: &ClaudeSetting) -> ProviderResult<String> {
        Err(ProviderError::unsupported("claude", "balance lookup"))
    }

    /// One-shot `POST /messages`.
    ///
    /// # Errors
    /// Fails on transport errors, non-2xx responses, unparseable bodies, or
    /// `redacted_thinking` content.
    pub async fn generate_text(
        &self,
        setting: &ClaudeSetting,
        messages: &[UIMessage],
        params: &TextGenerationParams,
    ) -> ProviderResult<MessageChunk> {
        let base_url = resolve_base_url(&setting.common, DEFAULT_BASE_URL)?;
        let messages = load_local_media(messages).await;
        let request = MessagesRequest::new(&messages, params, false);
        let body = finalize_body(&request, &setting.common.custom_body, &params.custom_body)?;
        let client = self.transport.client_for(setting.common.proxy.as_ref())?;

        tracing::debug!(provider = %setting.common.id, model = %params.model.model_id, "claude generate");
        let response = client
            .post(format!("{base_url}/messages"))
            .headers(self.headers(setting, &params.custom_headers, false)?)
            .json(&body)
            .send()
            .await
            .map_err(classify_reqwest_error)?;

        let json = read_json(response).await?;
        let parsed: MessagesResponse = serde_json::from_value(json)
            .map_err(|e| ProviderError::parse(format!("Unexpected messages response: {e}")))?;
        response_to_chunk(parsed)
    }

    /// Streaming `POST /messages` with `stream: true`.
    ///
    /// # Errors
    /// Fails before streaming on transport errors or non-2xx responses.
    pub async fn stream_text(
        &self,
        setting: &ClaudeSetting,
        messages: &[UIMessage],
        params: &TextGenerationParams,
    ) -> ProviderResult<ChunkStream> {
        let base_url = resolve_base_url(&setting.common, DEFAULT_BASE_URL)?;
        let messages = load_local_media(messages).await;
        let request = MessagesRequest::new(&messages, params, true);
        let body = finalize_body(&request, &setting.common.custom_body, &params.custom_body)?;
        let client = self.transport.client_for(setting.common.proxy.as_ref())?;

        tracing::debug!(provider = %setting.common.id, model = %params.model.model_id, "claude stream");
        let response = client
            .post(format!("{base_url}/messages"))
            .headers(self.headers(setting, &params.custom_headers, true)?)
            .json(&body)
            .send()
            .await
            .map_err(classify_reqwest_error)?;
        let response = ensure_success(response).await?;

        let parser = ClaudeSseParser::new(response.bytes_stream(), params.model.model_id.clone());
        Ok(parser.boxed())
    }

    /// # Errors
    /// Always fails: Claude cannot generate images.
    pub async fn generate_image(
        &self,
        _setting: &ClaudeSetting,
        _params: &ImageGenerationParams,
    ) -> ProviderResult<ImageGenerationResult> {
        Err(ProviderError::unsupported("claude", "image generation"))
    }
}

fn response_to_chunk(response: MessagesResponse) -> ProviderResult<MessageChunk> {
    let mut parts = Vec::new();
    for block in response.content {
        match block {
            ResponseBlock::Text { text } => parts.push(UIMessagePart::text(text)),
            ResponseBlock::Thinking {
                thinking,
                signature,
            } => parts.push(UIMessagePart::reasoning_delta(
                thinking,
                ReasoningMetadata {
                    signature,
                    ..Default::default()
                },
            )),
            ResponseBlock::ToolUse { id, name, input } => {
                parts.push(UIMessagePart::Tool(ToolPart::new(id, name, input.to_string())));
            }
            ResponseBlock::RedactedThinking => {
                return Err(ProviderError::protocol(
                    "redacted_thinking blocks are not supported",
                ));
            }
            ResponseBlock::Unknown => {}
        }
    }

    let message = UIMessage::new(Role::Assistant, parts);
    Ok(MessageChunk::complete(
        response.id,
        response.model,
        message,
        response.stop_reason,
        response.usage.map(TokenUsage::from),
    ))
}

#[cfg(test)]
mod tests {
    use futures_util::StreamExt;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::providers::setting::{ModelAbility, ProviderCommon};
    use crate::providers::shared::{ProviderErrorKind, TransportOptions};

    fn provider() -> ClaudeProvider {
        ClaudeProvider::new(
            Arc::new(HttpTransport::new(TransportOptions::default()).unwrap()),
            Arc::new(KeyRoulette::default()),
        )
    }

    fn setting(server: &MockServer) -> ClaudeSetting {
        let mut common = ProviderCommon::new("claude-test");
        common.api_keys = vec!["key-a".to_string(), "key-b".to_string()];
        common.base_url = Some(server.uri());
        ClaudeSetting { common }
    }

    fn sse_response(events: &[&str]) -> ResponseTemplate {
        ResponseTemplate::new(200)
            .insert_header("content-type", "text/event-stream")
            .set_body_string(events.join("\n\n") + "\n\n")
    }

    #[tokio::test]
    async fn test_list_models_rotates_keys() {
        let server = MockServer::start().await;
        let body = json!({"data": [{"id": "claude-sonnet-4", "display_name": "Claude Sonnet 4"}]});
        Mock::given(method("GET"))
            .and(path("/models"))
            .and(header("x-api-key", "key-a"))
            .and(header("anthropic-version", "2023-06-01"))
            .respond_with(ResponseTemplate::new(200).set_body_json(&body))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/models"))
            .and(header("x-api-key", "key-b"))
            .respond_with(ResponseTemplate::new(200).set_body_json(&body))
            .expect(1)
            .mount(&server)
            .await;

        let provider = provider();
        let setting = setting(&server);
        let models = provider.list_models(&setting).await.unwrap();
        assert_eq!(models[0].model_id, "claude-sonnet-4");
        assert_eq!(models[0].display_name, "Claude Sonnet 4");
        provider.list_models(&setting).await.unwrap();
    }

    #[tokio::test]
    async fn test_non_success_carries_status_and_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/messages"))
            .respond_with(ResponseTemplate::new(401).set_body_string(
                r#"{"type":"error","error":{"type":"authentication_error","message":"invalid x-api-key"}}"#,
            ))
            .mount(&server)
            .await;

        let params = TextGenerationParams::new(Model::new("claude-sonnet-4"));
        let Err(err) = provider()
            .stream_text(&setting(&server), &[UIMessage::user("hi")], &params)
            .await
        else {
            panic!("expected failure");
        };
        assert_eq!(err.kind, ProviderErrorKind::HttpStatus);
        assert_eq!(err.status, Some(401));
        assert!(err.message.contains("invalid x-api-key"));
        assert!(err.details.unwrap().contains("authentication_error"));
    }

    #[tokio::test]
    async fn test_stream_text_sends_system_and_parses_text() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/messages"))
            .and(header("x-custom", "yes"))
            .and(body_partial_json(json!({
                "model": "claude-sonnet-4",
                "stream": true,
                "system": [{"type": "text", "text": "be brief"}],
                "metadata": {"user_id": "u1"}
            })))
            .respond_with(sse_response(&[
                r#"event: message_start
data: {"type":"message_start","message":{"id":"msg_9","model":"claude-sonnet-4","usage":{"input_tokens":3}}}"#,
                r#"event: content_block_delta
data: {"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"Hi"}}"#,
                r#"event: message_delta
data: {"type":"message_delta","delta":{"stop_reason":"end_turn"},"usage":{"output_tokens":1}}"#,
                r#"event: message_stop
data: {"type":"message_stop"}"#,
            ]))
            .mount(&server)
            .await;

        let mut params = TextGenerationParams::new(Model::new("claude-sonnet-4"));
        params.custom_headers = vec![CustomHeader {
            name: "x-custom".to_string(),
            value: "yes".to_string(),
        }];
        params.custom_body = vec![crate::providers::setting::CustomBody {
            key: "metadata".to_string(),
            value: json!({"user_id": "u1"}),
        }];
        let messages = [UIMessage::system("be brief"), UIMessage::user("hello")];

        let stream = provider()
            .stream_text(&setting(&server), &messages, &params)
            .await
            .unwrap();
        let chunks: Vec<_> = stream.collect().await;

        let mut message = UIMessage::new(Role::Assistant, Vec::new());
        for chunk in &chunks {
            message.apply_chunk(chunk.as_ref().unwrap(), chrono::Utc::now());
        }
        assert_eq!(message.text(), "Hi");
        assert_eq!(chunks.last().unwrap().as_ref().unwrap().finish_reason(), Some("end_turn"));
    }

    #[tokio::test]
    async fn test_generate_text_parses_blocks() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/messages"))
            .and(body_partial_json(json!({"stream": false})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "msg_1",
                "model": "claude-sonnet-4",
                "stop_reason": "tool_use",
                "content": [
                    {"type": "thinking", "thinking": "need data", "signature": "sig"},
                    {"type": "text", "text": "Looking up."},
                    {"type": "tool_use", "id": "toolu_1", "name": "weather", "input": {"city": "Oslo"}}
                ],
                "usage": {"input_tokens": 12, "output_tokens": 30, "cache_read_input_tokens": 4}
            })))
            .mount(&server)
            .await;

        let model = Model::new("claude-sonnet-4").with_abilities(&[ModelAbility::Tool]);
        let chunk = provider()
            .generate_text(&setting(&server), &[UIMessage::user("weather?")], &TextGenerationParams::new(model))
            .await
            .unwrap();

        let message = chunk.message().unwrap();
        assert_eq!(message.text(), "Looking up.");
        let tool = message.tool_parts().next().unwrap();
        assert_eq!(tool.parsed_input().unwrap(), json!({"city": "Oslo"}));
        assert_eq!(chunk.finish_reason(), Some("tool_use"));
        assert_eq!(chunk.usage.unwrap().cached_tokens, 4);
    }

    #[tokio::test]
    async fn test_generate_text_rejects_redacted_thinking() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/messages"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "msg_1",
                "model": "claude-sonnet-4",
                "content": [{"type": "redacted_thinking", "data": "opaque"}]
            })))
            .mount(&server)
            .await;

        let err = provider()
            .generate_text(
                &setting(&server),
                &[UIMessage::user("hi")],
                &TextGenerationParams::new(Model::new("claude-sonnet-4")),
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind, ProviderErrorKind::Protocol);
    }

    #[tokio::test]
    async fn test_image_generation_is_unsupported() {
        let server = MockServer::start().await;
        let err = provider()
            .generate_image(
                &setting(&server),
                &ImageGenerationParams::new(Model::new("claude"), "a cat"),
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind, ProviderErrorKind::Unsupported);
        assert!(err.message.contains("not supported"));
    }
}
