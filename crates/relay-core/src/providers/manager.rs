//! Maps a provider setting to its adapter.

use std::sync::Arc;

use super::claude::ClaudeProvider;
use super::google::GoogleProvider;
use super::openai::OpenAiProvider;
use super::params::{ImageGenerationParams, ImageGenerationResult, TextGenerationParams};
use super::setting::{ClaudeSetting, GoogleSetting, Model, OpenAiSetting, ProviderSetting};
use super::shared::{ChunkStream, HttpTransport, ProviderResult};
use crate::key_roulette::KeyRoulette;
use crate::message::{MessageChunk, UIMessage};

/// Holds one adapter per provider kind, all sharing a transport and key
/// roulette.
#[derive(Debug, Clone)]
pub struct ProviderManager {
    openai: OpenAiProvider,
    claude: ClaudeProvider,
    google: GoogleProvider,
}

impl ProviderManager {
    pub fn new(transport: Arc<HttpTransport>, roulette: Arc<KeyRoulette>) -> Self {
        Self {
            openai: OpenAiProvider::new(Arc::clone(&transport), Arc::clone(&roulette)),
            claude: ClaudeProvider::new(Arc::clone(&transport), Arc::clone(&roulette)),
            google: GoogleProvider::new(transport, roulette),
        }
    }

    /// Pairs a setting with the adapter for its kind.
    pub fn provider_for<'a>(&'a self, setting: &'a ProviderSetting) -> ProviderRef<'a> {
        match setting {
            ProviderSetting::OpenAi(s) => ProviderRef::OpenAi(&self.openai, s),
            ProviderSetting::Claude(s) => ProviderRef::Claude(&self.claude, s),
            ProviderSetting::Google(s) => ProviderRef::Google(&self.google, s),
        }
    }
}

/// An adapter bound to its setting.
#[derive(Debug, Clone, Copy)]
pub enum ProviderRef<'a> {
    OpenAi(&'a OpenAiProvider, &'a OpenAiSetting),
    Claude(&'a ClaudeProvider, &'a ClaudeSetting),
    Google(&'a GoogleProvider, &'a GoogleSetting),
}

impl ProviderRef<'_> {
    /// # Errors
    /// Propagates the adapter's error.
    pub async fn list_models(&self) -> ProviderResult<Vec<Model>> {
        match self {
            ProviderRef::OpenAi(p, s) => p.list_models(s).await,
            ProviderRef::Claude(p, s) => p.list_models(s).await,
            ProviderRef::Google(p, s) => p.list_models(s).await,
        }
    }

    /// # Errors
    /// Propagates the adapter's error, `Unsupported` where no balance exists.
    pub async fn get_balance(&self) -> ProviderResult<String> {
        match self {
            ProviderRef::OpenAi(p, s) => p.get_balance(s).await,
            ProviderRef::Claude(p, s) => p.get_balance(s).await,
            ProviderRef::Google(p, s) => p.get_balance(s).await,
        }
    }

    /// # Errors
    /// Propagates the adapter's error.
    pub async fn generate_text(
        &self,
        messages: &[UIMessage],
        params: &TextGenerationParams,
    ) -> ProviderResult<MessageChunk> {
        match self {
            ProviderRef::OpenAi(p, s) => p.generate_text(s, messages, params).await,
            ProviderRef::Claude(p, s) => p.generate_text(s, messages, params).await,
            ProviderRef::Google(p, s) => p.generate_text(s, messages, params).await,
        }
    }

    /// # Errors
    /// Propagates the adapter's error.
    pub async fn stream_text(
        &self,
        messages: &[UIMessage],
        params: &TextGenerationParams,
    ) -> ProviderResult<ChunkStream> {
        match self {
            ProviderRef::OpenAi(p, s) => p.stream_text(s, messages, params).await,
            ProviderRef::Claude(p, s) => p.stream_text(s, messages, params).await,
            ProviderRef::Google(p, s) => p.stream_text(s, messages, params).await,
        }
    }

    /// # Errors
    /// Propagates the adapter's error, `Unsupported` for Claude.
    pub async fn generate_image(
        &self,
        params: &ImageGenerationParams,
    ) -> ProviderResult<ImageGenerationResult> {
        match self {
            ProviderRef::OpenAi(p, s) => p.generate_image(s, params).await,
            ProviderRef::Claude(p, s) => p.generate_image(s, params).await,
            ProviderRef::Google(p, s) => p.generate_image(s, params).await,
        }
    }
}
