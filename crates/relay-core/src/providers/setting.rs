//! Provider settings and model descriptors.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Optional capabilities a model may advertise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ModelAbility {
    Tool,
    Reasoning,
    ImageGen,
}

/// A model registered under a provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Model {
    /// Identifier sent on the wire.
    pub model_id: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub abilities: Vec<ModelAbility>,
}

impl Model {
    pub fn new(model_id: impl Into<String>) -> Self {
        let model_id = model_id.into();
        Self {
            display_name: model_id.clone(),
            model_id,
            abilities: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = name.into();
        self
    }

    #[must_use]
    pub fn with_abilities(mut self, abilities: &[ModelAbility]) -> Self {
        self.abilities = abilities.to_vec();
        self
    }

    pub fn has(&self, ability: ModelAbility) -> bool {
        self.abilities.contains(&ability)
    }
}

/// HTTP proxy for one provider.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProxyConfig {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

/// Extra header applied after the vendor defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomHeader {
    pub name: String,
    pub value: String,
}

/// Extra request body field, deep-merged into the vendor body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomBody {
    pub key: String,
    pub value: Value,
}

/// Fields shared by every provider kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderCommon {
    /// Stable identifier; also the key-rotation scope.
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub api_keys: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(default)]
    pub models: Vec<Model>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy: Option<ProxyConfig>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub custom_headers: Vec<CustomHeader>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub custom_body: Vec<CustomBody>,
}

fn default_true() -> bool {
    true
}

impl ProviderCommon {
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            enabled: true,
            api_keys: Vec::new(),
            base_url: None,
            models: Vec::new(),
            proxy: None,
            custom_headers: Vec::new(),
            custom_body: Vec::new(),
        }
    }
}

/// Balance lookup for OpenAI-compatible providers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceOption {
    #[serde(default)]
    pub enabled: bool,
    /// Path appended to the base URL.
    #[serde(default = "default_balance_path")]
    pub api_path: String,
    /// Dot/bracket path into the response JSON, e.g. `data.balance`.
    #[serde(default = "default_balance_result_path")]
    pub result_path: String,
}

fn default_balance_path() -> String {
    "/credits".to_string()
}

fn default_balance_result_path() -> String {
    "data.total_credits".to_string()
}

impl Default for BalanceOption {
    fn default() -> Self {
        Self {
            enabled: false,
            api_path: default_balance_path(),
            result_path: default_balance_result_path(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenAiSetting {
    #[serde(flatten)]
    pub common: ProviderCommon,
    #[serde(default = "default_chat_completions_path")]
    pub chat_completions_path: String,
    /// Use the Responses API instead of Chat Completions.
    #[serde(default)]
    pub use_response_api: bool,
    #[serde(default)]
    pub balance: BalanceOption,
}

fn default_chat_completions_path() -> String {
    "/chat/completions".to_string()
}

impl OpenAiSetting {
    pub fn new(common: ProviderCommon) -> Self {
        Self {
            common,
            chat_completions_path: default_chat_completions_path(),
            use_response_api: false,
            balance: BalanceOption::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClaudeSetting {
    #[serde(flatten)]
    pub common: ProviderCommon,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GoogleSetting {
    #[serde(flatten)]
    pub common: ProviderCommon,
}

/// A configured provider instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProviderSetting {
    #[serde(rename = "openai")]
    OpenAi(OpenAiSetting),
    Google(GoogleSetting),
    Claude(ClaudeSetting),
}

impl ProviderSetting {
    pub fn common(&self) -> &ProviderCommon {
        match self {
            ProviderSetting::OpenAi(s) => &s.common,
            ProviderSetting::Google(s) => &s.common,
            ProviderSetting::Claude(s) => &s.common,
        }
    }

    pub fn common_mut(&mut self) -> &mut ProviderCommon {
        match self {
            ProviderSetting::OpenAi(s) => &mut s.common,
            ProviderSetting::Google(s) => &mut s.common,
            ProviderSetting::Claude(s) => &mut s.common,
        }
    }

    pub fn id(&self) -> &str {
        &self.common().id
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            ProviderSetting::OpenAi(_) => "openai",
            ProviderSetting::Google(_) => "google",
            ProviderSetting::Claude(_) => "claude",
        }
    }

    pub fn find_model(&self, model_id: &str) -> Option<&Model> {
        self.common()
            .models
            .iter()
            .find(|model| model.model_id == model_id)
    }
}
