use serde::{Deserialize, Serialize};

use super::UIMessage;

/// Token accounting reported by a provider.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
    /// Prompt tokens served from the provider's cache.
    pub cached_tokens: u64,
}

impl TokenUsage {
    pub fn new(prompt_tokens: u64, completion_tokens: u64, cached_tokens: u64) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
            cached_tokens,
        }
    }

    /// Later non-zero values override earlier ones.
    ///
    /// A zero field means "not reported": vendors send partial usage on
    /// their terminal event (Claude's `message_delta` only carries the
    /// output count), so a zero never clears a value seen earlier.
    pub fn merge(&mut self, later: &TokenUsage) {
        if later.prompt_tokens > 0 {
            self.prompt_tokens = later.prompt_tokens;
        }
        if later.completion_tokens > 0 {
            self.completion_tokens = later.completion_tokens;
        }
        if later.cached_tokens > 0 {
            self.cached_tokens = later.cached_tokens;
        }
        self.total_tokens = if later.total_tokens > 0 {
            later.total_tokens
        } else {
            self.prompt_tokens + self.completion_tokens
        };
    }
}

/// One choice inside a [`MessageChunk`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkChoice {
    pub index: usize,
    /// Complete message (buffered responses).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<UIMessage>,
    /// Message fragment (streamed responses).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delta: Option<UIMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
}

/// Uniform output unit of every adapter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageChunk {
    pub id: String,
    pub model: String,
    pub choices: Vec<ChunkChoice>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<TokenUsage>,
}

impl MessageChunk {
    /// A streamed chunk carrying a single delta.
    pub fn delta(id: impl Into<String>, model: impl Into<String>, delta: UIMessage) -> Self {
        Self {
            id: id.into(),
            model: model.into(),
            choices: vec![ChunkChoice {
                index: 0,
                message: None,
                delta: Some(delta),
                finish_reason: None,
            }],
            usage: None,
        }
    }

    /// A buffered chunk carrying a complete message.
    pub fn complete(
        id: impl Into<String>,
        model: impl Into<String>,
        message: UIMessage,
        finish_reason: Option<String>,
        usage: Option<TokenUsage>,
    ) -> Self {
        Self {
            id: id.into(),
            model: model.into(),
            choices: vec![ChunkChoice {
                index: 0,
                message: Some(message),
                delta: None,
                finish_reason,
            }],
            usage,
        }
    }

    #[must_use]
    pub fn with_finish_reason(mut self, reason: Option<String>) -> Self {
        if let Some(choice) = self.choices.first_mut() {
            choice.finish_reason = reason;
        }
        self
    }

    #[must_use]
    pub fn with_usage(mut self, usage: Option<TokenUsage>) -> Self {
        self.usage = usage;
        self
    }

    pub fn finish_reason(&self) -> Option<&str> {
        self.choices
            .iter()
            .find_map(|choice| choice.finish_reason.as_deref())
    }

    /// The full message of the first choice, if this is a buffered chunk.
    pub fn message(&self) -> Option<&UIMessage> {
        self.choices.first().and_then(|choice| choice.message.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_keeps_earlier_prompt_when_later_is_zero() {
        let mut usage = TokenUsage::new(100, 0, 20);
        usage.merge(&TokenUsage {
            completion_tokens: 42,
            ..Default::default()
        });

        assert_eq!(usage.prompt_tokens, 100);
        assert_eq!(usage.completion_tokens, 42);
        assert_eq!(usage.cached_tokens, 20);
        assert_eq!(usage.total_tokens, 142);
    }
}
