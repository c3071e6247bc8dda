//! Per-call generation parameters.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::setting::{CustomBody, CustomHeader, Model, ModelAbility};
use crate::reasoning::ReasoningBudget;

/// Tool declaration sent to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON schema of the arguments object.
    pub parameters: Value,
}

impl ToolDefinition {
    pub fn new(name: impl Into<String>, description: impl Into<String>, parameters: Value) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TextGenerationParams {
    pub model: Model,
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
    pub max_tokens: Option<u32>,
    /// `None`/negative = auto, `0` = off, positive = explicit budget.
    pub thinking_budget: Option<i32>,
    pub tools: Vec<ToolDefinition>,
    pub custom_headers: Vec<CustomHeader>,
    pub custom_body: Vec<CustomBody>,
}

impl TextGenerationParams {
    pub fn new(model: Model) -> Self {
        Self {
            model,
            temperature: None,
            top_p: None,
            max_tokens: None,
            thinking_budget: None,
            tools: Vec::new(),
            custom_headers: Vec::new(),
            custom_body: Vec::new(),
        }
    }

    /// Tools are declared only when the model supports them and some were given.
    pub fn declared_tools(&self) -> Option<&[ToolDefinition]> {
        (self.model.has(ModelAbility::Tool) && !self.tools.is_empty())
            .then_some(self.tools.as_slice())
    }

    /// Reasoning request, or `None` when the model cannot reason.
    pub fn reasoning(&self) -> Option<ReasoningBudget> {
        self.model
            .has(ModelAbility::Reasoning)
            .then(|| ReasoningBudget::from_budget(self.thinking_budget))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ImageGenerationParams {
    pub model: Model,
    pub prompt: String,
    pub num_of_images: u32,
    /// Vendor size/aspect hint, e.g. `1024x1024` or `16:9`.
    pub aspect_ratio: Option<String>,
    pub custom_headers: Vec<CustomHeader>,
    pub custom_body: Vec<CustomBody>,
}

impl ImageGenerationParams {
    pub fn new(model: Model, prompt: impl Into<String>) -> Self {
        Self {
            model,
            prompt: prompt.into(),
            num_of_images: 1,
            aspect_ratio: None,
            custom_headers: Vec::new(),
            custom_body: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedImage {
    /// Base64-encoded image bytes.
    pub data: String,
    pub mime_type: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageGenerationResult {
    pub items: Vec<GeneratedImage>,
}
