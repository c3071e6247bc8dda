//! Config command handlers.

use anyhow::{Context, Result, bail};
use relay_core::config;
use relay_core::providers::{
    ClaudeSetting, GoogleSetting, OpenAiSetting, ProviderCommon, ProviderSetting,
};

pub fn path() {
    println!("{}", config::paths::config_path().display());
}

pub fn init() -> Result<()> {
    let config_path = config::paths::config_path();
    config::Config::init(&config_path)
        .with_context(|| format!("init config at {}", config_path.display()))?;
    println!("Created config at {}", config_path.display());
    Ok(())
}

pub fn add_provider(
    kind: &str,
    id: &str,
    base_url: Option<String>,
    api_keys: Vec<String>,
) -> Result<()> {
    let mut common = ProviderCommon::new(id);
    common.base_url = base_url;
    common.api_keys = api_keys;
    let setting = match kind {
        "openai" => ProviderSetting::OpenAi(OpenAiSetting::new(common)),
        "claude" => ProviderSetting::Claude(ClaudeSetting { common }),
        "google" => ProviderSetting::Google(GoogleSetting { common }),
        other => bail!("Unknown provider type '{other}' (expected openai, claude or google)"),
    };

    let config_path = config::paths::config_path();
    config::Config::add_provider_to(&config_path, &setting)
        .with_context(|| format!("add provider to {}", config_path.display()))?;
    println!("Added {kind} provider '{id}' to {}", config_path.display());
    Ok(())
}
