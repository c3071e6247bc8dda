//! Vendor adapters and the types they share.
//!
//! Every adapter offers the same five operations (`list_models`,
//! `get_balance`, `generate_text`, `stream_text`, `generate_image`) over its
//! own setting type; [`ProviderManager`] selects one for a [`ProviderSetting`].

pub mod claude;
pub mod google;
pub mod manager;
pub mod openai;
pub mod params;
pub mod setting;
pub mod shared;

pub use manager::{ProviderManager, ProviderRef};
pub use params::{
    GeneratedImage, ImageGenerationParams, ImageGenerationResult, TextGenerationParams,
    ToolDefinition,
};
pub use setting::{
    BalanceOption, ClaudeSetting, CustomBody, CustomHeader, GoogleSetting, Model, ModelAbility,
    OpenAiSetting, ProviderCommon, ProviderSetting, ProxyConfig,
};
pub use shared::{
    ChunkStream, HttpTransport, ProviderError, ProviderErrorKind, ProviderResult, TransportOptions,
};
