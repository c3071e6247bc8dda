//! Gemini `generateContent` request bodies.

use serde_json::{Value, json};

use crate::message::{Role, UIMessage, UIMessagePart};
use crate::providers::params::{TextGenerationParams, ToolDefinition};
use crate::providers::shared::{MediaSource, ToolStep, inline_media_or_warn, split_tool_steps};
use crate::reasoning::{ReasoningBudget, ReasoningLevel};

/// Builds the full request body for text generation.
pub(crate) fn build_request(messages: &[UIMessage], params: &TextGenerationParams) -> Value {
    let mut request = json!({ "contents": build_contents(messages) });

    let system = messages
        .iter()
        .filter(|m| m.role == Role::System)
        .map(UIMessage::text)
        .filter(|text| !text.trim().is_empty())
        .collect::<Vec<_>>();
    if !system.is_empty() {
        request["systemInstruction"] = json!({
            "parts": system.iter().map(|text| text_part(text)).collect::<Vec<_>>()
        });
    }

    if let Some(tools) = params.declared_tools() {
        request["tools"] = build_tools(tools);
    }

    let mut generation_config = json!({});
    if let Some(temperature) = params.temperature {
        generation_config["temperature"] = json!(temperature);
    }
    if let Some(top_p) = params.top_p {
        generation_config["topP"] = json!(top_p);
    }
    if let Some(max_tokens) = params.max_tokens {
        generation_config["maxOutputTokens"] = json!(max_tokens);
    }
    if let Some(reasoning) = params.reasoning() {
        generation_config["thinkingConfig"] = thinking_config(reasoning);
    }
    if generation_config.as_object().is_some_and(|o| !o.is_empty()) {
        request["generationConfig"] = generation_config;
    }

    request
}

/// Prompt-only request asking for image output.
pub(crate) fn build_image_request(prompt: &str, aspect_ratio: Option<&str>) -> Value {
    let mut generation_config = json!({ "responseModalities": ["TEXT", "IMAGE"] });
    if let Some(ratio) = aspect_ratio {
        generation_config["imageConfig"] = json!({ "aspectRatio": ratio });
    }
    json!({
        "contents": [{ "role": "user", "parts": [text_part(prompt)] }],
        "generationConfig": generation_config,
    })
}

fn thinking_config(reasoning: ReasoningBudget) -> Value {
    match (reasoning.level, reasoning.tokens) {
        (ReasoningLevel::Off, _) => json!({ "thinkingBudget": 0 }),
        (_, Some(budget)) => json!({ "includeThoughts": true, "thinkingBudget": budget }),
        (_, None) => json!({ "includeThoughts": true }),
    }
}

fn build_contents(messages: &[UIMessage]) -> Vec<Value> {
    let mut contents = Vec::new();
    for message in messages {
        match message.role {
            Role::System => {}
            Role::User => {
                let parts: Vec<_> = message.parts.iter().filter_map(user_part).collect();
                if !parts.is_empty() {
                    contents.push(content("user", parts));
                }
            }
            Role::Assistant => {
                for step in split_tool_steps(&message.parts) {
                    append_model_step(&mut contents, &step);
                }
            }
        }
    }
    contents
}

fn content(role: &str, parts: Vec<Value>) -> Value {
    json!({ "role": role, "parts": parts })
}

fn user_part(part: &UIMessagePart) -> Option<Value> {
    match part {
        UIMessagePart::Text { text } => Some(text_part(text)),
        UIMessagePart::Image { url }
        | UIMessagePart::Video { url }
        | UIMessagePart::Audio { url }
        | UIMessagePart::Document { url, .. } => Some(media_part(url)),
        UIMessagePart::Reasoning { .. } | UIMessagePart::Tool(_) => None,
    }
}

fn media_part(url: &str) -> Value {
    match inline_media_or_warn(url) {
        Some(MediaSource::Inline { mime_type, data }) => json!({
            "inlineData": { "mimeType": mime_type, "data": data }
        }),
        Some(MediaSource::Remote(uri)) => json!({ "fileData": { "fileUri": uri } }),
        None => text_part(""),
    }
}

fn text_part(text: &str) -> Value {
    json!({ "text": text })
}

/// Model turn with its `functionCall`s, then a user turn with the matching
/// `functionResponse`s. The step's thought signature rides on the first call.
fn append_model_step(contents: &mut Vec<Value>, step: &ToolStep<'_>) {
    let mut parts = Vec::new();
    let mut signature = None;
    for part in &step.content {
        match part {
            UIMessagePart::Text { text } if !text.is_empty() => parts.push(text_part(text)),
            UIMessagePart::Image { url } => parts.push(media_part(url)),
            UIMessagePart::Reasoning { metadata, .. } => {
                if let Some(sig) = &metadata.signature {
                    signature = Some(sig.clone());
                }
            }
            _ => {}
        }
    }

    for (i, tool) in step.tools.iter().enumerate() {
        let args = tool.parsed_input().unwrap_or_else(|err| {
            tracing::warn!(tool = %tool.tool_name, "sending malformed tool input as empty args: {err}");
            json!({})
        });
        let mut part = json!({ "functionCall": { "name": tool.tool_name, "args": args } });
        if i == 0
            && let Some(sig) = signature.take()
        {
            part["thoughtSignature"] = json!(sig);
        }
        parts.push(part);
    }

    if !parts.is_empty() {
        contents.push(content("model", parts));
    }
    if step.tools.is_empty() {
        return;
    }

    let mut responses = Vec::new();
    let mut images = Vec::new();
    for tool in &step.tools {
        responses.push(json!({
            "functionResponse": {
                "name": tool.tool_name,
                "response": { "content": tool.output_text() }
            }
        }));
        for output in &tool.output {
            if let UIMessagePart::Image { url } = output {
                images.push(media_part(url));
            }
        }
    }
    contents.push(content("user", responses));
    if !images.is_empty() {
        contents.push(content("user", images));
    }
}

/// Builds the tools array.
fn build_tools(tools: &[ToolDefinition]) -> Value {
    json!([{
        "functionDeclarations": tools
            .iter()
            .map(|tool| json!({
                "name": tool.name,
                "description": tool.description,
                "parameters": sanitize_function_schema(&tool.parameters),
            }))
            .collect::<Vec<_>>()
    }])
}

/// Gemini rejects `additionalProperties` and `$schema` inside function
/// parameter schemas; strip them recursively.
fn sanitize_function_schema(schema: &Value) -> Value {
    match schema {
        Value::Object(map) => Value::Object(
            map.iter()
                .filter(|(key, _)| !matches!(key.as_str(), "additionalProperties" | "$schema"))
                .map(|(key, value)| (key.clone(), sanitize_function_schema(value)))
                .collect(),
        ),
        Value::Array(values) => Value::Array(values.iter().map(sanitize_function_schema).collect()),
        _ => schema.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{ReasoningMetadata, ToolPart};
    use crate::providers::setting::{Model, ModelAbility};

    #[test]
    fn test_function_call_and_response_alternate() {
        let mut tool = ToolPart::new("g-1", "weather", r#"{"city":"Oslo"}"#);
        tool.output = vec![UIMessagePart::text("sunny")];
        tool.executed = true;
        let messages = [
            UIMessage::system("sys"),
            UIMessage::user("weather?"),
            UIMessage::new(
                Role::Assistant,
                vec![
                    UIMessagePart::reasoning_delta(
                        "thinking",
                        ReasoningMetadata {
                            signature: Some("sig-1".to_string()),
                            ..Default::default()
                        },
                    ),
                    UIMessagePart::Tool(tool),
                    UIMessagePart::text("Sunny."),
                ],
            ),
        ];
        let request = build_request(&messages, &TextGenerationParams::new(Model::new("gemini")));

        assert_eq!(request["systemInstruction"], json!({"parts": [{"text": "sys"}]}));
        assert_eq!(
            request["contents"],
            json!([
                {"role": "user", "parts": [{"text": "weather?"}]},
                {"role": "model", "parts": [{
                    "functionCall": {"name": "weather", "args": {"city": "Oslo"}},
                    "thoughtSignature": "sig-1"
                }]},
                {"role": "user", "parts": [{"functionResponse": {"name": "weather", "response": {"content": "sunny"}}}]},
                {"role": "model", "parts": [{"text": "Sunny."}]}
            ])
        );
        assert!(request.get("generationConfig").is_none());
    }

    #[test]
    fn test_unreadable_image_becomes_empty_text() {
        let messages = vec![UIMessage::new(
            Role::User,
            vec![
                UIMessagePart::text("what is this?"),
                UIMessagePart::Image {
                    url: "/definitely/missing.png".to_string(),
                },
            ],
        )];
        let request = build_request(&messages, &TextGenerationParams::new(Model::new("gemini")));

        assert_eq!(
            request["contents"],
            json!([{"role": "user", "parts": [{"text": "what is this?"}, {"text": ""}]}])
        );
    }

    #[test]
    fn test_thinking_config_levels() {
        let model = Model::new("gemini").with_abilities(&[ModelAbility::Reasoning]);
        let mut params = TextGenerationParams::new(model);

        params.thinking_budget = Some(0);
        let request = build_request(&[], &params);
        assert_eq!(request["generationConfig"]["thinkingConfig"], json!({"thinkingBudget": 0}));

        params.thinking_budget = None;
        let request = build_request(&[], &params);
        assert_eq!(request["generationConfig"]["thinkingConfig"], json!({"includeThoughts": true}));

        params.thinking_budget = Some(2048);
        let request = build_request(&[], &params);
        assert_eq!(
            request["generationConfig"]["thinkingConfig"],
            json!({"includeThoughts": true, "thinkingBudget": 2048})
        );
    }

    #[test]
    fn test_tool_schema_is_sanitized() {
        let model = Model::new("gemini").with_abilities(&[ModelAbility::Tool]);
        let mut params = TextGenerationParams::new(model);
        params.tools = vec![ToolDefinition::new(
            "echo",
            "Echo",
            json!({
                "type": "object",
                "additionalProperties": false,
                "properties": {"nested": {"type": "object", "additionalProperties": true}}
            }),
        )];
        let request = build_request(&[UIMessage::user("hi")], &params);
        assert_eq!(
            request["tools"][0]["functionDeclarations"][0]["parameters"],
            json!({"type": "object", "properties": {"nested": {"type": "object"}}})
        );
    }

    #[test]
    fn test_image_request_sets_modalities() {
        let request = build_image_request("a fox", Some("16:9"));
        assert_eq!(
            request["generationConfig"],
            json!({"responseModalities": ["TEXT", "IMAGE"], "imageConfig": {"aspectRatio": "16:9"}})
        );
    }
}
