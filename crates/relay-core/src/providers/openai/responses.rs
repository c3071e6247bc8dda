//! Request/response types for the `OpenAI` Responses API.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::message::{
    MessageChunk, ReasoningMetadata, Role, TokenUsage, ToolPart, UIMessage, UIMessagePart,
};
use crate::providers::params::{TextGenerationParams, ToolDefinition};
use crate::providers::shared::{
    MediaSource, ProviderError, ProviderResult, ToolStep, inline_media_or_warn, new_chunk_id,
    split_tool_steps,
};

/// Include key that makes the API return replayable reasoning.
const ENCRYPTED_REASONING: &str = "reasoning.encrypted_content";

#[derive(Debug, Serialize)]
pub(crate) struct ResponsesRequest<'a> {
    model: &'a str,
    stream: bool,
    /// Replay relies on encrypted reasoning, so nothing is stored server-side.
    store: bool,
    input: Vec<InputItem>,
    #[serde(skip_serializing_if = "Option::is_none")]
    instructions: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reasoning: Option<ReasoningConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    include: Option<Vec<&'static str>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<FunctionTool<'a>>>,
}

#[derive(Debug, Serialize)]
struct ReasoningConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    effort: Option<&'static str>,
    summary: &'static str,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum InputItem {
    Message {
        role: &'static str,
        content: Vec<InputContent>,
    },
    Reasoning {
        id: String,
        encrypted_content: String,
        summary: Vec<SummaryText>,
    },
    FunctionCall {
        call_id: String,
        name: String,
        arguments: String,
    },
    FunctionCallOutput {
        call_id: String,
        output: String,
    },
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum InputContent {
    InputText { text: String },
    OutputText { text: String },
    InputImage { image_url: String },
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct SummaryText {
    #[serde(rename = "type", default = "summary_text_type")]
    item_type: String,
    #[serde(default)]
    pub(crate) text: String,
}

fn summary_text_type() -> String {
    "summary_text".to_string()
}

#[derive(Debug, Serialize)]
struct FunctionTool<'a> {
    #[serde(rename = "type")]
    tool_type: &'static str,
    name: &'a str,
    description: &'a str,
    parameters: &'a Value,
}

impl<'a> From<&'a ToolDefinition> for FunctionTool<'a> {
    fn from(tool: &'a ToolDefinition) -> Self {
        Self {
            tool_type: "function",
            name: &tool.name,
            description: &tool.description,
            parameters: &tool.parameters,
        }
    }
}

impl<'a> ResponsesRequest<'a> {
    pub(crate) fn new(messages: &[UIMessage], params: &'a TextGenerationParams, stream: bool) -> Self {
        let instructions = messages
            .iter()
            .filter(|m| m.role == Role::System)
            .map(UIMessage::text)
            .filter(|text| !text.trim().is_empty())
            .collect::<Vec<_>>();
        let reasoning = params.reasoning();

        Self {
            model: &params.model.model_id,
            stream,
            store: false,
            input: build_input(messages),
            instructions: (!instructions.is_empty()).then(|| instructions.join("\n\n")),
            max_output_tokens: params.max_tokens,
            temperature: params.temperature,
            top_p: params.top_p,
            reasoning: reasoning.map(|r| ReasoningConfig {
                effort: r.level.effort_label(),
                summary: "auto",
            }),
            include: reasoning
                .filter(|r| r.level.is_enabled())
                .map(|_| vec![ENCRYPTED_REASONING]),
            tools: params
                .declared_tools()
                .map(|tools| tools.iter().map(FunctionTool::from).collect()),
        }
    }
}

fn build_input(messages: &[UIMessage]) -> Vec<InputItem> {
    let mut items = Vec::new();
    for message in messages {
        match message.role {
            Role::System => {}
            Role::User => {
                let content: Vec<_> = message
                    .parts
                    .iter()
                    .filter_map(|part| match part {
                        UIMessagePart::Text { text } => {
                            Some(InputContent::InputText { text: text.clone() })
                        }
                        UIMessagePart::Image { url } => Some(image_content(url)),
                        _ => None,
                    })
                    .collect();
                if !content.is_empty() {
                    items.push(InputItem::Message {
                        role: "user",
                        content,
                    });
                }
            }
            Role::Assistant => {
                for step in split_tool_steps(&message.parts) {
                    push_assistant_step(&mut items, &step);
                }
            }
        }
    }
    items
}

fn image_content(url: &str) -> InputContent {
    match inline_media_or_warn(url) {
        Some(MediaSource::Inline { mime_type, data }) => InputContent::InputImage {
            image_url: format!("data:{mime_type};base64,{data}"),
        },
        Some(MediaSource::Remote(url)) => InputContent::InputImage { image_url: url },
        None => InputContent::InputText {
            text: String::new(),
        },
    }
}

fn push_assistant_step(items: &mut Vec<InputItem>, step: &ToolStep<'_>) {
    let mut text = String::new();
    for part in &step.content {
        match part {
            UIMessagePart::Text { text: t } => text.push_str(t),
            UIMessagePart::Reasoning {
                reasoning,
                metadata,
                ..
            } => {
                // Only reasoning that came back encrypted can be replayed.
                if let (Some(id), Some(encrypted)) = (&metadata.item_id, &metadata.encrypted) {
                    items.push(InputItem::Reasoning {
                        id: id.clone(),
                        encrypted_content: encrypted.clone(),
                        summary: if reasoning.is_empty() {
                            Vec::new()
                        } else {
                            vec![SummaryText {
                                item_type: summary_text_type(),
                                text: reasoning.clone(),
                            }]
                        },
                    });
                }
            }
            _ => {}
        }
    }
    if !text.is_empty() {
        items.push(InputItem::Message {
            role: "assistant",
            content: vec![InputContent::OutputText { text }],
        });
    }

    for tool in &step.tools {
        items.push(InputItem::FunctionCall {
            call_id: tool.tool_call_id.clone(),
            name: tool.tool_name.clone(),
            arguments: if tool.input.trim().is_empty() {
                "{}".to_string()
            } else {
                tool.input.clone()
            },
        });
    }
    for tool in &step.tools {
        items.push(InputItem::FunctionCallOutput {
            call_id: tool.tool_call_id.clone(),
            output: tool.output_text(),
        });
        let images: Vec<_> = tool
            .output
            .iter()
            .filter_map(|part| match part {
                UIMessagePart::Image { url } => Some(image_content(url)),
                _ => None,
            })
            .collect();
        if !images.is_empty() {
            items.push(InputItem::Message {
                role: "user",
                content: images,
            });
        }
    }
}

// === Responses ===

#[derive(Debug, Default, Deserialize)]
pub(crate) struct ResponsesUsage {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
    #[serde(default)]
    input_tokens_details: Option<InputTokensDetails>,
}

#[derive(Debug, Default, Deserialize)]
struct InputTokensDetails {
    #[serde(default)]
    cached_tokens: u64,
}

impl From<ResponsesUsage> for TokenUsage {
    fn from(usage: ResponsesUsage) -> Self {
        TokenUsage::new(
            usage.input_tokens,
            usage.output_tokens,
            usage.input_tokens_details.map_or(0, |d| d.cached_tokens),
        )
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct ApiErrorBody {
    #[serde(default)]
    pub(crate) code: Option<String>,
    #[serde(default)]
    pub(crate) message: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ResponsesResponse {
    #[serde(default)]
    pub(crate) id: String,
    #[serde(default)]
    pub(crate) model: String,
    #[serde(default)]
    pub(crate) status: Option<String>,
    #[serde(default)]
    pub(crate) incomplete_details: Option<IncompleteDetails>,
    #[serde(default)]
    pub(crate) output: Vec<OutputItem>,
    #[serde(default)]
    pub(crate) usage: Option<ResponsesUsage>,
    #[serde(default)]
    pub(crate) error: Option<ApiErrorBody>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct IncompleteDetails {
    #[serde(default)]
    pub(crate) reason: Option<String>,
}

impl ResponsesResponse {
    /// `incomplete` responses report why they stopped; otherwise the status.
    pub(crate) fn finish_reason(&self) -> Option<String> {
        self.incomplete_details
            .as_ref()
            .and_then(|d| d.reason.clone())
            .or_else(|| self.status.clone())
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub(crate) enum OutputItem {
    Message {
        #[serde(default)]
        content: Vec<OutputContent>,
    },
    Reasoning {
        #[serde(default)]
        id: String,
        #[serde(default)]
        summary: Vec<SummaryText>,
        #[serde(default)]
        encrypted_content: Option<String>,
    },
    FunctionCall {
        #[serde(default)]
        id: String,
        call_id: String,
        #[serde(default)]
        name: String,
        #[serde(default)]
        arguments: String,
    },
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub(crate) enum OutputContent {
    OutputText { text: String },
    Refusal { refusal: String },
    #[serde(other)]
    Unknown,
}

pub(crate) fn response_to_chunk(response: ResponsesResponse) -> ProviderResult<MessageChunk> {
    if let Some(error) = &response.error {
        return Err(ProviderError::api_error(
            error.code.as_deref().unwrap_or("error"),
            &error.message,
        ));
    }

    let finish_reason = response.finish_reason();
    let mut parts = Vec::new();
    for item in response.output {
        match item {
            OutputItem::Message { content } => {
                for block in content {
                    match block {
                        OutputContent::OutputText { text } => parts.push(UIMessagePart::text(text)),
                        OutputContent::Refusal { refusal } => {
                            parts.push(UIMessagePart::text(refusal));
                        }
                        OutputContent::Unknown => {}
                    }
                }
            }
            OutputItem::Reasoning {
                id,
                summary,
                encrypted_content,
            } => {
                let text = summary
                    .into_iter()
                    .map(|s| s.text)
                    .collect::<Vec<_>>()
                    .join("\n\n");
                parts.push(UIMessagePart::reasoning_delta(
                    text,
                    ReasoningMetadata {
                        encrypted: encrypted_content,
                        item_id: (!id.is_empty()).then_some(id),
                        ..Default::default()
                    },
                ));
            }
            OutputItem::FunctionCall {
                call_id,
                name,
                arguments,
                ..
            } => parts.push(UIMessagePart::Tool(ToolPart::new(call_id, name, arguments))),
            OutputItem::Unknown => {}
        }
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
        finish_reason,
        response.usage.map(TokenUsage::from),
    ))
}
