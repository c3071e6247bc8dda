//! Google Generative Language (Gemini) adapter.

mod request;
mod sse;

use std::sync::Arc;

use futures_util::StreamExt;
use reqwest::header::{HeaderMap, HeaderValue};
use serde::Deserialize;

use self::request::{build_image_request, build_request};
use self::sse::{GoogleSseParser, parse_candidate, payload_error};
use crate::key_roulette::KeyRoulette;
use crate::message::{MessageChunk, Role, UIMessage, UIMessagePart};
use crate::providers::params::{
    GeneratedImage, ImageGenerationParams, ImageGenerationResult, TextGenerationParams,
};
use crate::providers::setting::{CustomHeader, GoogleSetting, Model};
use crate::providers::shared::{
    ChunkStream, HttpTransport, MediaSource, ProviderError, ProviderResult, apply_custom_headers,
    classify_reqwest_error, ensure_success, finalize_body, load_local_media, media_source,
    new_chunk_id, read_json, resolve_base_url, select_api_key,
};

/// Default base URL for the Gemini API.
pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Gemini adapter bound to the shared transport and key roulette.
#[derive(Debug, Clone)]
pub struct GoogleProvider {
    transport: Arc<HttpTransport>,
    roulette: Arc<KeyRoulette>,
}

impl GoogleProvider {
    pub fn new(transport: Arc<HttpTransport>, roulette: Arc<KeyRoulette>) -> Self {
        Self {
            transport,
            roulette,
        }
    }

    fn headers(&self, setting: &GoogleSetting, extra: &[CustomHeader]) -> ProviderResult<HeaderMap> {
        let api_key = select_api_key(&self.roulette, &setting.common)?;
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-goog-api-key",
            HeaderValue::from_str(&api_key)
                .map_err(|e| ProviderError::config(format!("Invalid API key header: {e}")))?,
        );
        headers.insert("content-type", HeaderValue::from_static("application/json"));
        apply_custom_headers(&mut headers, setting.common.custom_headers.iter().chain(extra));
        Ok(headers)
    }

    async fn post(
        &self,
        setting: &GoogleSetting,
        url: String,
        body: &serde_json::Value,
        extra_headers: &[CustomHeader],
    ) -> ProviderResult<reqwest::Response> {
        let client = self.transport.client_for(setting.common.proxy.as_ref())?;
        client
            .post(url)
            .headers(self.headers(setting, extra_headers)?)
            .json(body)
            .send()
            .await
            .map_err(classify_reqwest_error)
    }

    /// Lists models via `GET /models`, stripping the `models/` prefix.
    ///
    /// # Errors
    /// Fails on transport errors, non-2xx responses, or an unexpected body.
    pub async fn list_models(&self, setting: &GoogleSetting) -> ProviderResult<Vec<Model>> {
        let base_url = resolve_base_url(&setting.common, DEFAULT_BASE_URL)?;
        let client = self.transport.client_for(setting.common.proxy.as_ref())?;
        let response = client
            .get(format!("{base_url}/models?pageSize=1000"))
            .headers(self.headers(setting, &[])?)
            .send()
            .await
            .map_err(classify_reqwest_error)?;

        let body = read_json(response).await?;
        let list: ModelList = serde_json::from_value(body)
            .map_err(|e| ProviderError::parse(format!("Unexpected model list: {e}")))?;
        Ok(list
            .models
            .into_iter()
            .map(|entry| {
                let id = entry
                    .name
                    .strip_prefix("models/")
                    .unwrap_or(&entry.name)
                    .to_string();
                let display = entry.display_name.unwrap_or_else(|| id.clone());
                Model::new(id).with_display_name(display)
            })
            .collect())
    }

    /// # Errors
    /// Always fails: the Gemini API exposes no balance endpoint.
    pub async fn get_balance(&self, _setting: &GoogleSetting) -> ProviderResult<String> {
        Err(ProviderError::unsupported("google", "balance lookup"))
    }

    /// One-shot `POST /models/{model}:generateContent`.
    ///
    /// # Errors
    /// Fails on transport errors, non-2xx responses, or an error payload.
    pub async fn generate_text(
        &self,
        setting: &GoogleSetting,
        messages: &[UIMessage],
        params: &TextGenerationParams,
    ) -> ProviderResult<MessageChunk> {
        let base_url = resolve_base_url(&setting.common, DEFAULT_BASE_URL)?;
        let messages = load_local_media(messages).await;
        let body = finalize_body(
            &build_request(&messages, params),
            &setting.common.custom_body,
            &params.custom_body,
        )?;
        let url = format!("{base_url}/models/{}:generateContent", params.model.model_id);

        tracing::debug!(provider = %setting.common.id, model = %params.model.model_id, "google generate");
        let response = self.post(setting, url, &body, &params.custom_headers).await?;
        let json = read_json(response).await?;
        if let Some(error) = payload_error(&json) {
            return Err(error);
        }

        let id = new_chunk_id();
        let mut counter = 0usize;
        let content = parse_candidate(&json, &mut || {
            counter += 1;
            format!("google-{id}-{counter}")
        });
        Ok(MessageChunk::complete(
            &id,
            content.model.unwrap_or_else(|| params.model.model_id.clone()),
            UIMessage::new(Role::Assistant, content.parts),
            content.finish_reason,
            content.usage,
        ))
    }

    /// Streaming `POST /models/{model}:streamGenerateContent?alt=sse`.
    ///
    /// # Errors
    /// Fails before streaming on transport errors or non-2xx responses.
    pub async fn stream_text(
        &self,
        setting: &GoogleSetting,
        messages: &[UIMessage],
        params: &TextGenerationParams,
    ) -> ProviderResult<ChunkStream> {
        let base_url = resolve_base_url(&setting.common, DEFAULT_BASE_URL)?;
        let messages = load_local_media(messages).await;
        let body = finalize_body(
            &build_request(&messages, params),
            &setting.common.custom_body,
            &params.custom_body,
        )?;
        let url = format!(
            "{base_url}/models/{}:streamGenerateContent?alt=sse",
            params.model.model_id
        );

        tracing::debug!(provider = %setting.common.id, model = %params.model.model_id, "google stream");
        let response = self.post(setting, url, &body, &params.custom_headers).await?;
        let response = ensure_success(response).await?;
        let parser = GoogleSseParser::new(response.bytes_stream(), params.model.model_id.clone());
        Ok(parser.boxed())
    }

    /// Image generation through `generateContent` with image output enabled.
    ///
    /// # Errors
    /// Fails on transport errors, non-2xx responses, or a reply without images.
    pub async fn generate_image(
        &self,
        setting: &GoogleSetting,
        params: &ImageGenerationParams,
    ) -> ProviderResult<ImageGenerationResult> {
        let base_url = resolve_base_url(&setting.common, DEFAULT_BASE_URL)?;
        let body = finalize_body(
            &build_image_request(&params.prompt, params.aspect_ratio.as_deref()),
            &setting.common.custom_body,
            &params.custom_body,
        )?;
        let url = format!("{base_url}/models/{}:generateContent", params.model.model_id);

        let mut items = Vec::new();
        // The API returns a single candidate per call.
        for _ in 0..params.num_of_images.max(1) {
            let response = self.post(setting, url.clone(), &body, &params.custom_headers).await?;
            let json = read_json(response).await?;
            if let Some(error) = payload_error(&json) {
                return Err(error);
            }
            let content = parse_candidate(&json, &mut new_chunk_id);
            for part in content.parts {
                let UIMessagePart::Image { url } = part else {
                    continue;
                };
                if let Ok(MediaSource::Inline { mime_type, data }) = media_source(&url) {
                    items.push(GeneratedImage { data, mime_type });
                }
            }
        }

        if items.is_empty() {
            return Err(ProviderError::parse("Response contained no image data"));
        }
        Ok(ImageGenerationResult { items })
    }
}

#[derive(Debug, Deserialize)]
struct ModelList {
    #[serde(default)]
    models: Vec<ModelEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ModelEntry {
    name: String,
    #[serde(default)]
    display_name: Option<String>,
}

#[cfg(test)]
mod tests {
    use futures_util::StreamExt;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::providers::setting::ProviderCommon;
    use crate::providers::shared::{ProviderErrorKind, TransportOptions};

    fn provider() -> GoogleProvider {
        GoogleProvider::new(
            Arc::new(HttpTransport::new(TransportOptions::default()).unwrap()),
            Arc::new(KeyRoulette::default()),
        )
    }

    fn setting(server: &MockServer) -> GoogleSetting {
        let mut common = ProviderCommon::new("gemini-test");
        common.api_keys = vec!["g-key".to_string()];
        common.base_url = Some(server.uri());
        GoogleSetting { common }
    }

    #[tokio::test]
    async fn test_list_models_strips_prefix() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/models"))
            .and(header("x-goog-api-key", "g-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "models": [{"name": "models/gemini-2.5-pro", "displayName": "Gemini 2.5 Pro"}]
            })))
            .mount(&server)
            .await;

        let models = provider().list_models(&setting(&server)).await.unwrap();
        assert_eq!(models[0].model_id, "gemini-2.5-pro");
        assert_eq!(models[0].display_name, "Gemini 2.5 Pro");
    }

    #[tokio::test]
    async fn test_stream_text_uses_sse_endpoint() {
        let server = MockServer::start().await;
        let body = [
            json!({"candidates": [{"content": {"role": "model", "parts": [{"text": "Hel"}]}}]}),
            json!({"candidates": [{"content": {"role": "model", "parts": [{"text": "lo"}]}, "finishReason": "STOP"}]}),
        ]
        .iter()
        .map(|event| format!("data: {event}\n\n"))
        .collect::<String>();
        Mock::given(method("POST"))
            .and(path("/models/gemini-2.5-flash:streamGenerateContent"))
            .and(query_param("alt", "sse"))
            .and(body_partial_json(json!({
                "contents": [{"role": "user", "parts": [{"text": "hi"}]}]
            })))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/event-stream")
                    .set_body_string(body),
            )
            .mount(&server)
            .await;

        let params = TextGenerationParams::new(Model::new("gemini-2.5-flash"));
        let chunks: Vec<_> = provider()
            .stream_text(&setting(&server), &[UIMessage::user("hi")], &params)
            .await
            .unwrap()
            .collect()
            .await;
        let mut message = UIMessage::new(Role::Assistant, Vec::new());
        for chunk in &chunks {
            message.apply_chunk(chunk.as_ref().unwrap(), chrono::Utc::now());
        }
        assert_eq!(message.text(), "Hello");
    }

    #[tokio::test]
    async fn test_generate_text_function_call_gets_id() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/models/gemini-2.5-flash:generateContent"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "candidates": [{
                    "content": {"role": "model", "parts": [{"functionCall": {"name": "echo", "args": {"x": 1}}}]},
                    "finishReason": "STOP"
                }],
                "usageMetadata": {"promptTokenCount": 3, "candidatesTokenCount": 2}
            })))
            .mount(&server)
            .await;

        let chunk = provider()
            .generate_text(
                &setting(&server),
                &[UIMessage::user("echo")],
                &TextGenerationParams::new(Model::new("gemini-2.5-flash")),
            )
            .await
            .unwrap();
        let message = chunk.message().unwrap();
        let tool = message.tool_parts().next().unwrap();
        assert!(!tool.tool_call_id.is_empty());
        assert_eq!(tool.tool_name, "echo");
        assert_eq!(chunk.usage.unwrap().total_tokens, 5);
    }

    #[tokio::test]
    async fn test_generate_image_collects_inline_data() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/models/gemini-image:generateContent"))
            .and(body_partial_json(json!({
                "generationConfig": {"responseModalities": ["TEXT", "IMAGE"]}
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "candidates": [{"content": {"parts": [
                    {"text": "Here you go"},
                    {"inlineData": {"mimeType": "image/png", "data": "iVBORw0KGgo="}}
                ]}}]
            })))
            .mount(&server)
            .await;

        let result = provider()
            .generate_image(
                &setting(&server),
                &ImageGenerationParams::new(Model::new("gemini-image"), "a fox"),
            )
            .await
            .unwrap();
        assert_eq!(
            result.items,
            vec![GeneratedImage {
                data: "iVBORw0KGgo=".to_string(),
                mime_type: "image/png".to_string(),
            }]
        );
    }

    #[tokio::test]
    async fn test_balance_is_unsupported() {
        let server = MockServer::start().await;
        let err = provider().get_balance(&setting(&server)).await.unwrap_err();
        assert_eq!(err.kind, ProviderErrorKind::Unsupported);
    }
}
