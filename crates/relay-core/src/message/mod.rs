//! Canonical chat message model shared by every provider adapter.
//!
//! A [`UIMessage`] is one conversation turn: a role plus an ordered list of
//! typed [`UIMessagePart`]s. Streaming adapters emit partial messages
//! (deltas) inside [`MessageChunk`]s; [`UIMessage::apply_delta`] folds them
//! into the running message.

mod chunk;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use chunk::{ChunkChoice, MessageChunk, TokenUsage};

/// Author of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// Approval state of a model-requested tool call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "reason", rename_all = "snake_case")]
pub enum ToolApproval {
    /// No decision has been requested yet.
    #[default]
    None,
    /// Waiting for an external decision.
    Pending,
    Approved,
    /// Rejected; the reason is reported back to the model.
    Denied(String),
}

/// Provider replay data attached to a reasoning part.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReasoningMetadata {
    /// Claude thinking signature or Gemini thought signature.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
    /// `OpenAI` Responses encrypted reasoning content.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encrypted: Option<String>,
    /// `OpenAI` Responses reasoning item id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item_id: Option<String>,
}

impl ReasoningMetadata {
    pub fn is_empty(&self) -> bool {
        self.signature.is_none() && self.encrypted.is_none() && self.item_id.is_none()
    }

    /// Overwrites fields that are present in `other`.
    fn merge(&mut self, other: &ReasoningMetadata) {
        if other.signature.is_some() {
            self.signature.clone_from(&other.signature);
        }
        if other.encrypted.is_some() {
            self.encrypted.clone_from(&other.encrypted);
        }
        if other.item_id.is_some() {
            self.item_id.clone_from(&other.item_id);
        }
    }
}

/// A model-requested tool call and its eventual output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolPart {
    pub tool_call_id: String,
    pub tool_name: String,
    /// Raw JSON text of the arguments. Partial while streaming.
    pub input: String,
    /// Output parts; empty until the tool has run.
    #[serde(default)]
    pub output: Vec<UIMessagePart>,
    #[serde(default)]
    pub approval: ToolApproval,
    #[serde(default)]
    pub executed: bool,
}

impl ToolPart {
    pub fn new(
        tool_call_id: impl Into<String>,
        tool_name: impl Into<String>,
        input: impl Into<String>,
    ) -> Self {
        Self {
            tool_call_id: tool_call_id.into(),
            tool_name: tool_name.into(),
            input: input.into(),
            output: Vec::new(),
            approval: ToolApproval::None,
            executed: false,
        }
    }

    /// Parses the accumulated input. Empty input is treated as `{}`.
    ///
    /// # Errors
    /// Returns the JSON error when the accumulated text is not valid JSON.
    pub fn parsed_input(&self) -> Result<Value, serde_json::Error> {
        if self.input.trim().is_empty() {
            return Ok(Value::Object(serde_json::Map::new()));
        }
        serde_json::from_str(&self.input)
    }

    /// True while the call still needs to be resolved by the orchestrator.
    pub fn is_pending(&self) -> bool {
        !self.executed && self.output.is_empty()
    }

    /// Concatenated text of the output parts.
    pub fn output_text(&self) -> String {
        self.output
            .iter()
            .filter_map(|part| match part {
                UIMessagePart::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// One typed piece of message content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UIMessagePart {
    Text {
        text: String,
    },
    /// `url` may be a `data:` URL, a `file://` URL, a bare path, or http(s).
    Image {
        url: String,
    },
    Video {
        url: String,
    },
    Audio {
        url: String,
    },
    Document {
        url: String,
        file_name: String,
        mime: String,
    },
    Reasoning {
        reasoning: String,
        #[serde(default, skip_serializing_if = "ReasoningMetadata::is_empty")]
        metadata: ReasoningMetadata,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        created_at: Option<DateTime<Utc>>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        finished_at: Option<DateTime<Utc>>,
    },
    Tool(ToolPart),
}

impl UIMessagePart {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    /// A reasoning fragment as emitted by streaming adapters.
    pub fn reasoning_delta(reasoning: impl Into<String>, metadata: ReasoningMetadata) -> Self {
        Self::Reasoning {
            reasoning: reasoning.into(),
            metadata,
            created_at: None,
            finished_at: None,
        }
    }

    fn is_reasoning(&self) -> bool {
        matches!(self, Self::Reasoning { .. })
    }
}

/// One conversation turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UIMessage {
    pub id: String,
    pub role: Role,
    pub parts: Vec<UIMessagePart>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<TokenUsage>,
}

impl UIMessage {
    pub fn new(role: Role, parts: Vec<UIMessagePart>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            role,
            parts,
            created_at: Some(Utc::now()),
            usage: None,
        }
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self::new(Role::System, vec![UIMessagePart::text(text)])
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Role::User, vec![UIMessagePart::text(text)])
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self::new(Role::Assistant, vec![UIMessagePart::text(text)])
    }

    /// Concatenated text of all Text parts.
    pub fn text(&self) -> String {
        self.parts
            .iter()
            .filter_map(|part| match part {
                UIMessagePart::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }

    pub fn tool_parts(&self) -> impl Iterator<Item = &ToolPart> {
        self.parts.iter().filter_map(|part| match part {
            UIMessagePart::Tool(tool) => Some(tool),
            _ => None,
        })
    }

    pub fn tool_parts_mut(&mut self) -> impl Iterator<Item = &mut ToolPart> {
        self.parts.iter_mut().filter_map(|part| match part {
            UIMessagePart::Tool(tool) => Some(tool),
            _ => None,
        })
    }

    /// Folds a streamed message fragment into this message.
    ///
    /// Deltas must be applied in receipt order. The result depends only on
    /// the current parts, the delta, and `now`.
    pub fn apply_delta(&mut self, delta: &UIMessage, now: DateTime<Utc>) {
        for part in &delta.parts {
            self.apply_part_delta(part, now);
        }
        if let Some(usage) = &delta.usage {
            self.merge_usage(usage);
        }
    }

    /// Folds every choice delta (or full message) of a chunk into this message.
    pub fn apply_chunk(&mut self, chunk: &MessageChunk, now: DateTime<Utc>) {
        for choice in &chunk.choices {
            if let Some(delta) = &choice.delta {
                self.apply_delta(delta, now);
            } else if let Some(message) = &choice.message {
                self.apply_delta(message, now);
            }
        }
        if let Some(usage) = &chunk.usage {
            self.merge_usage(usage);
        }
    }

    fn merge_usage(&mut self, usage: &TokenUsage) {
        match &mut self.usage {
            Some(existing) => existing.merge(usage),
            None => self.usage = Some(usage.clone()),
        }
    }

    fn apply_part_delta(&mut self, part: &UIMessagePart, now: DateTime<Utc>) {
        if !part.is_reasoning() {
            self.finish_reasoning(now);
        }

        match part {
            UIMessagePart::Text { text } => {
                if let Some(UIMessagePart::Text { text: existing }) = self.parts.last_mut() {
                    existing.push_str(text);
                } else if !text.is_empty() {
                    self.parts.push(part.clone());
                }
            }
            UIMessagePart::Reasoning {
                reasoning,
                metadata,
                ..
            } => {
                if let Some(UIMessagePart::Reasoning {
                    reasoning: existing,
                    metadata: existing_metadata,
                    finished_at: None,
                    ..
                }) = self.parts.last_mut()
                {
                    existing.push_str(reasoning);
                    existing_metadata.merge(metadata);
                } else {
                    self.parts.push(UIMessagePart::Reasoning {
                        reasoning: reasoning.clone(),
                        metadata: metadata.clone(),
                        created_at: Some(now),
                        finished_at: None,
                    });
                }
            }
            UIMessagePart::Tool(delta) => {
                let existing = self.tool_parts_mut().find(|tool| {
                    !delta.tool_call_id.is_empty() && tool.tool_call_id == delta.tool_call_id
                });
                match existing {
                    Some(tool) => {
                        tool.input.push_str(&delta.input);
                        if tool.tool_name.is_empty() && !delta.tool_name.is_empty() {
                            tool.tool_name.clone_from(&delta.tool_name);
                        }
                    }
                    None => self.parts.push(part.clone()),
                }
            }
            UIMessagePart::Image { .. }
            | UIMessagePart::Video { .. }
            | UIMessagePart::Audio { .. }
            | UIMessagePart::Document { .. } => self.parts.push(part.clone()),
        }
    }

    /// Closes every open reasoning part.
    pub fn finish_reasoning(&mut self, now: DateTime<Utc>) {
        for part in &mut self.parts {
            if let UIMessagePart::Reasoning { finished_at, .. } = part
                && finished_at.is_none()
            {
                *finished_at = Some(now);
            }
        }
    }

    /// Tool calls that have neither output nor an execution record.
    pub fn has_pending_tools(&self) -> bool {
        self.tool_parts().any(ToolPart::is_pending)
    }
}
