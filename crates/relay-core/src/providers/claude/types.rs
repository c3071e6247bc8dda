use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::message::{Role, ToolPart, UIMessage, UIMessagePart};
use crate::providers::params::{TextGenerationParams, ToolDefinition};
use crate::providers::shared::{MediaSource, inline_media_or_warn, split_tool_steps};
use crate::reasoning::ReasoningLevel;

/// Default `max_tokens` when the caller does not set one.
pub(crate) const DEFAULT_MAX_TOKENS: u32 = 8192;

// === API Request Types ===

/// Thinking configuration for extended thinking feature.
#[derive(Debug, Serialize)]
pub(crate) struct ThinkingConfig {
    #[serde(rename = "type")]
    thinking_type: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    budget_tokens: Option<u32>,
}

impl ThinkingConfig {
    pub(crate) fn disabled() -> Self {
        Self {
            thinking_type: "disabled",
            budget_tokens: None,
        }
    }

    pub(crate) fn enabled(budget_tokens: Option<u32>) -> Self {
        Self {
            thinking_type: "enabled",
            budget_tokens,
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct MessagesRequest<'a> {
    pub(crate) model: &'a str,
    pub(crate) max_tokens: u32,
    pub(crate) messages: Vec<ApiMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) system: Option<Vec<SystemBlock>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) tools: Option<Vec<ApiToolDef<'a>>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) thinking: Option<ThinkingConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) top_p: Option<f32>,
    pub(crate) stream: bool,
}

/// System message block.
#[derive(Debug, Serialize)]
pub(crate) struct SystemBlock {
    #[serde(rename = "type")]
    block_type: &'static str,
    text: String,
}

#[derive(Debug, Serialize)]
pub(crate) struct ApiToolDef<'a> {
    pub(crate) name: &'a str,
    pub(crate) description: &'a str,
    pub(crate) input_schema: &'a Value,
}

impl<'a> From<&'a ToolDefinition> for ApiToolDef<'a> {
    fn from(def: &'a ToolDefinition) -> Self {
        Self {
            name: &def.name,
            description: &def.description,
            input_schema: &def.parameters,
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct ApiMessage {
    pub(crate) role: &'static str,
    pub(crate) content: Vec<ApiContentBlock>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub(crate) enum ApiImageSource {
    Base64 { media_type: String, data: String },
    Url { url: String },
}

/// Content block types that can appear in `tool_result` content arrays.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub(crate) enum ApiToolResultBlock {
    Text { text: String },
    Image { source: ApiImageSource },
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub(crate) enum ApiContentBlock {
    Thinking {
        thinking: String,
        signature: String,
    },
    Text {
        text: String,
    },
    Image {
        source: ApiImageSource,
    },
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
    ToolResult {
        tool_use_id: String,
        content: Vec<ApiToolResultBlock>,
    },
}

fn image_block(url: &str) -> ApiContentBlock {
    match inline_media_or_warn(url) {
        Some(MediaSource::Inline { mime_type, data }) => ApiContentBlock::Image {
            source: ApiImageSource::Base64 {
                media_type: mime_type,
                data,
            },
        },
        Some(MediaSource::Remote(url)) => ApiContentBlock::Image {
            source: ApiImageSource::Url { url },
        },
        None => ApiContentBlock::Text {
            text: String::new(),
        },
    }
}

/// Converts one non-tool part. Parts Claude cannot take are dropped.
fn content_block(part: &UIMessagePart) -> Option<ApiContentBlock> {
    match part {
        UIMessagePart::Text { text } if !text.is_empty() => {
            Some(ApiContentBlock::Text { text: text.clone() })
        }
        UIMessagePart::Image { url } => Some(image_block(url)),
        UIMessagePart::Reasoning {
            reasoning,
            metadata,
            ..
        } => metadata
            .signature
            .as_ref()
            .filter(|signature| !signature.is_empty())
            .map(|signature| ApiContentBlock::Thinking {
                thinking: reasoning.clone(),
                signature: signature.clone(),
            }),
        UIMessagePart::Text { .. }
        | UIMessagePart::Video { .. }
        | UIMessagePart::Audio { .. }
        | UIMessagePart::Document { .. }
        | UIMessagePart::Tool(_) => None,
    }
}

fn tool_use_block(tool: &ToolPart) -> ApiContentBlock {
    let input = tool.parsed_input().unwrap_or_else(|err| {
        tracing::warn!(tool = %tool.tool_name, "sending malformed tool input as {{}}: {err}");
        Value::Object(serde_json::Map::new())
    });
    ApiContentBlock::ToolUse {
        id: tool.tool_call_id.clone(),
        name: tool.tool_name.clone(),
        input,
    }
}

fn tool_result_block(tool: &ToolPart) -> ApiContentBlock {
    let mut content: Vec<ApiToolResultBlock> = Vec::new();
    for part in &tool.output {
        match part {
            UIMessagePart::Text { text } => {
                content.push(ApiToolResultBlock::Text { text: text.clone() });
            }
            UIMessagePart::Image { url } => {
                if let ApiContentBlock::Image { source } = image_block(url) {
                    content.push(ApiToolResultBlock::Image { source });
                }
            }
            _ => {}
        }
    }
    if content.is_empty() {
        content.push(ApiToolResultBlock::Text {
            text: String::new(),
        });
    }
    ApiContentBlock::ToolResult {
        tool_use_id: tool.tool_call_id.clone(),
        content,
    }
}

/// Builds the `system` field and the alternating message list.
///
/// Every assistant tool-call group becomes an assistant message carrying the
/// preceding content plus its `tool_use` blocks, immediately followed by a
/// user message with the matching `tool_result` blocks.
pub(crate) fn build_messages(
    messages: &[UIMessage],
) -> (Option<Vec<SystemBlock>>, Vec<ApiMessage>) {
    let mut system = Vec::new();
    let mut out = Vec::new();

    for message in messages {
        match message.role {
            Role::System => {
                let text = message.text();
                if !text.trim().is_empty() {
                    system.push(SystemBlock {
                        block_type: "text",
                        text,
                    });
                }
            }
            Role::User => {
                let content: Vec<ApiContentBlock> =
                    message.parts.iter().filter_map(content_block).collect();
                if !content.is_empty() {
                    out.push(ApiMessage {
                        role: "user",
                        content,
                    });
                }
            }
            Role::Assistant => {
                for step in split_tool_steps(&message.parts) {
                    let mut content: Vec<ApiContentBlock> = step
                        .content
                        .iter()
                        .filter_map(|part| content_block(part))
                        .collect();
                    content.extend(step.tools.iter().map(|tool| tool_use_block(tool)));
                    if !content.is_empty() {
                        out.push(ApiMessage {
                            role: "assistant",
                            content,
                        });
                    }
                    if !step.tools.is_empty() {
                        out.push(ApiMessage {
                            role: "user",
                            content: step
                                .tools
                                .iter()
                                .map(|tool| tool_result_block(tool))
                                .collect(),
                        });
                    }
                }
            }
        }
    }

    ((!system.is_empty()).then_some(system), out)
}

impl<'a> MessagesRequest<'a> {
    pub(crate) fn new(
        messages: &[UIMessage],
        params: &'a TextGenerationParams,
        stream: bool,
    ) -> Self {
        let (system, api_messages) = build_messages(messages);
        let mut max_tokens = params.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS);

        let thinking = params.reasoning().map(|budget| match budget.level {
            ReasoningLevel::Off => ThinkingConfig::disabled(),
            ReasoningLevel::Auto => ThinkingConfig::enabled(None),
            _ => {
                let tokens = budget.tokens.unwrap_or_default();
                if tokens >= max_tokens {
                    max_tokens = tokens + DEFAULT_MAX_TOKENS;
                }
                ThinkingConfig::enabled(Some(tokens))
            }
        });

        Self {
            model: &params.model.model_id,
            max_tokens,
            messages: api_messages,
            system,
            tools: params
                .declared_tools()
                .map(|tools| tools.iter().map(ApiToolDef::from).collect()),
            thinking,
            temperature: params.temperature,
            top_p: params.top_p,
            stream,
        }
    }
}

// === API Response Types ===

/// Token usage as reported by the Messages API.
#[derive(Debug, Default, Deserialize)]
pub(crate) struct ApiUsage {
    #[serde(default)]
    pub(crate) input_tokens: u64,
    #[serde(default)]
    pub(crate) output_tokens: u64,
    #[serde(default)]
    pub(crate) cache_read_input_tokens: u64,
}

impl From<ApiUsage> for crate::message::TokenUsage {
    fn from(u: ApiUsage) -> Self {
        crate::message::TokenUsage::new(u.input_tokens, u.output_tokens, u.cache_read_input_tokens)
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct MessagesResponse {
    pub(crate) id: String,
    pub(crate) model: String,
    #[serde(default)]
    pub(crate) content: Vec<ResponseBlock>,
    #[serde(default)]
    pub(crate) stop_reason: Option<String>,
    #[serde(default)]
    pub(crate) usage: Option<ApiUsage>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub(crate) enum ResponseBlock {
    Text {
        text: String,
    },
    Thinking {
        thinking: String,
        #[serde(default)]
        signature: Option<String>,
    },
    RedactedThinking,
    ToolUse {
        id: String,
        name: String,
        #[serde(default)]
        input: Value,
    },
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ModelList {
    #[serde(default)]
    pub(crate) data: Vec<ModelEntry>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ModelEntry {
    pub(crate) id: String,
    #[serde(default)]
    pub(crate) display_name: Option<String>,
}
