//! OpenAI-compatible adapter: Chat Completions, Responses, and images.

mod chat_completions;
mod responses;
mod responses_sse;

use std::sync::Arc;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use futures_util::StreamExt;
use reqwest::header::{HeaderMap, HeaderValue};
use serde::{Deserialize, Serialize};

use self::chat_completions::{ChatCompletionRequest, ChatCompletionResponse, ChatCompletionsSseParser};
use self::responses::{ResponsesRequest, ResponsesResponse};
use self::responses_sse::ResponsesSseParser;
use crate::key_roulette::KeyRoulette;
use crate::message::{MessageChunk, UIMessage};
use crate::providers::params::{
    GeneratedImage, ImageGenerationParams, ImageGenerationResult, TextGenerationParams,
};
use crate::providers::setting::{CustomHeader, Model, OpenAiSetting};
use crate::providers::shared::{
    ChunkStream, HttpTransport, ProviderError, ProviderResult, apply_custom_headers,
    classify_reqwest_error, ensure_success, finalize_body, format_balance, load_local_media,
    read_json, resolve_base_url, resolve_json_path, select_api_key,
};

/// Default base URL for the `OpenAI` API.
pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

const RESPONSES_PATH: &str = "/responses";
const IMAGES_PATH: &str = "/images/generations";

/// `OpenAI` adapter bound to the shared transport and key roulette.
#[derive(Debug, Clone)]
pub struct OpenAiProvider {
    transport: Arc<HttpTransport>,
    roulette: Arc<KeyRoulette>,
}

impl OpenAiProvider {
    pub fn new(transport: Arc<HttpTransport>, roulette: Arc<KeyRoulette>) -> Self {
        Self {
            transport,
            roulette,
        }
    }

    fn headers(
        &self,
        setting: &OpenAiSetting,
        extra: &[CustomHeader],
        streaming: bool,
    ) -> ProviderResult<HeaderMap> {
        let api_key = select_api_key(&self.roulette, &setting.common)?;
        let mut headers = HeaderMap::new();
        headers.insert(
            "authorization",
            HeaderValue::from_str(&format!("Bearer {api_key}"))
                .map_err(|e| ProviderError::config(format!("Invalid API key header: {e}")))?,
        );
        headers.insert("content-type", HeaderValue::from_static("application/json"));
        if streaming {
            headers.insert("accept", HeaderValue::from_static("text/event-stream"));
        }
        apply_custom_headers(&mut headers, setting.common.custom_headers.iter().chain(extra));
        Ok(headers)
    }

    fn text_endpoint(setting: &OpenAiSetting, base_url: &str) -> String {
        if setting.use_response_api {
            format!("{base_url}{RESPONSES_PATH}")
        } else {
            format!("{base_url}{}", setting.chat_completions_path)
        }
    }

    async fn post_text(
        &self,
        setting: &OpenAiSetting,
        messages: &[UIMessage],
        params: &TextGenerationParams,
        stream: bool,
    ) -> ProviderResult<reqwest::Response> {
        let base_url = resolve_base_url(&setting.common, DEFAULT_BASE_URL)?;
        let messages = load_local_media(messages).await;
        let body = if setting.use_response_api {
            let request = ResponsesRequest::new(&messages, params, stream);
            finalize_body(&request, &setting.common.custom_body, &params.custom_body)?
        } else {
            let request = ChatCompletionRequest::new(&messages, params, stream);
            finalize_body(&request, &setting.common.custom_body, &params.custom_body)?
        };
        let client = self.transport.client_for(setting.common.proxy.as_ref())?;

        tracing::debug!(
            provider = %setting.common.id,
            model = %params.model.model_id,
            responses_api = setting.use_response_api,
            stream,
            "openai request"
        );
        client
            .post(Self::text_endpoint(setting, &base_url))
            .headers(self.headers(setting, &params.custom_headers, stream)?)
            .json(&body)
            .send()
            .await
            .map_err(classify_reqwest_error)
    }

    /// Lists models via `GET /models`.
    ///
    /// # Errors
    /// Fails on transport errors, non-2xx responses, or an unexpected body.
    pub async fn list_models(&self, setting: &OpenAiSetting) -> ProviderResult<Vec<Model>> {
        let base_url = resolve_base_url(&setting.common, DEFAULT_BASE_URL)?;
        let client = self.transport.client_for(setting.common.proxy.as_ref())?;
        let response = client
            .get(format!("{base_url}/models"))
            .headers(self.headers(setting, &[], false)?)
            .send()
            .await
            .map_err(classify_reqwest_error)?;

        let body = read_json(response).await?;
        let list: ModelList = serde_json::from_value(body)
            .map_err(|e| ProviderError::parse(format!("Unexpected model list: {e}")))?;
        Ok(list.data.into_iter().map(|entry| Model::new(entry.id)).collect())
    }

    /// Reads the configured balance endpoint and formats the value found at
    /// `balance.result_path`.
    ///
    /// # Errors
    /// Fails when balance lookup is disabled, on HTTP errors, or when the
    /// path does not resolve.
    pub async fn get_balance(&self, setting: &OpenAiSetting) -> ProviderResult<String> {
        let option = &setting.balance;
        if !option.enabled {
            return Err(ProviderError::unsupported(
                &setting.common.id,
                "balance lookup",
            ));
        }
        let base_url = resolve_base_url(&setting.common, DEFAULT_BASE_URL)?;
        let client = self.transport.client_for(setting.common.proxy.as_ref())?;
        let response = client
            .get(format!("{base_url}{}", option.api_path))
            .headers(self.headers(setting, &[], false)?)
            .send()
            .await
            .map_err(classify_reqwest_error)?;

        let body = read_json(response).await?;
        let value = resolve_json_path(&body, &option.result_path).ok_or_else(|| {
            ProviderError::parse(format!(
                "Balance field '{}' not found in response",
                option.result_path
            ))
            .with_details(body.to_string())
        })?;
        Ok(format_balance(value))
    }

    /// One-shot completion through Chat Completions or Responses.
    ///
    /// # Errors
    /// Fails on transport errors, non-2xx responses, or unparseable bodies.
    pub async fn generate_text(
        &self,
        setting: &OpenAiSetting,
        messages: &[UIMessage],
        params: &TextGenerationParams,
    ) -> ProviderResult<MessageChunk> {
        let response = self.post_text(setting, messages, params, false).await?;
        let json = read_json(response).await?;
        if setting.use_response_api {
            let parsed: ResponsesResponse = serde_json::from_value(json)
                .map_err(|e| ProviderError::parse(format!("Unexpected responses body: {e}")))?;
            responses::response_to_chunk(parsed)
        } else {
            let parsed: ChatCompletionResponse = serde_json::from_value(json).map_err(|e| {
                ProviderError::parse(format!("Unexpected chat completion body: {e}"))
            })?;
            chat_completions::response_to_chunk(parsed)
        }
    }

    /// Streaming completion through Chat Completions or Responses.
    ///
    /// # Errors
    /// Fails before streaming on transport errors or non-2xx responses.
    pub async fn stream_text(
        &self,
        setting: &OpenAiSetting,
        messages: &[UIMessage],
        params: &TextGenerationParams,
    ) -> ProviderResult<ChunkStream> {
        let response = self.post_text(setting, messages, params, true).await?;
        let response = ensure_success(response).await?;
        let model = params.model.model_id.clone();

        if setting.use_response_api {
            Ok(ResponsesSseParser::new(response.bytes_stream(), model).boxed())
        } else {
            Ok(ChatCompletionsSseParser::new(response.bytes_stream(), model).boxed())
        }
    }

    /// `POST /images/generations` requesting base64 output.
    ///
    /// # Errors
    /// Fails on transport errors, non-2xx responses, or a body without images.
    pub async fn generate_image(
        &self,
        setting: &OpenAiSetting,
        params: &ImageGenerationParams,
    ) -> ProviderResult<ImageGenerationResult> {
        let base_url = resolve_base_url(&setting.common, DEFAULT_BASE_URL)?;
        let request = ImageRequest {
            model: &params.model.model_id,
            prompt: &params.prompt,
            n: params.num_of_images.max(1),
            size: params.aspect_ratio.as_deref(),
            response_format: "b64_json",
        };
        let body = finalize_body(&request, &setting.common.custom_body, &params.custom_body)?;
        let client = self.transport.client_for(setting.common.proxy.as_ref())?;

        tracing::debug!(provider = %setting.common.id, model = %params.model.model_id, "openai image");
        let response = client
            .post(format!("{base_url}{IMAGES_PATH}"))
            .headers(self.headers(setting, &params.custom_headers, false)?)
            .json(&body)
            .send()
            .await
            .map_err(classify_reqwest_error)?;

        let json = read_json(response).await?;
        let parsed: ImageResponse = serde_json::from_value(json)
            .map_err(|e| ProviderError::parse(format!("Unexpected image response: {e}")))?;

        let items: Vec<_> = parsed
            .data
            .into_iter()
            .filter_map(|item| item.b64_json)
            .map(|data| GeneratedImage {
                mime_type: sniff_image_mime(&data),
                data,
            })
            .collect();
        if items.is_empty() {
            return Err(ProviderError::parse("Image response contained no base64 data"));
        }
        Ok(ImageGenerationResult { items })
    }
}

fn sniff_image_mime(data: &str) -> String {
    BASE64
        .decode(data)
        .ok()
        .and_then(|bytes| infer::get(&bytes))
        .map_or_else(|| "image/png".to_string(), |kind| kind.mime_type().to_string())
}

#[derive(Debug, Deserialize)]
struct ModelList {
    #[serde(default)]
    data: Vec<ModelEntry>,
}

#[derive(Debug, Deserialize)]
struct ModelEntry {
    id: String,
}

#[derive(Debug, Serialize)]
struct ImageRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    n: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    size: Option<&'a str>,
    response_format: &'static str,
}

#[derive(Debug, Deserialize)]
struct ImageResponse {
    #[serde(default)]
    data: Vec<ImageItem>,
}

#[derive(Debug, Deserialize)]
struct ImageItem {
    #[serde(default)]
    b64_json: Option<String>,
}
