//! CLI command handlers.

pub mod balance;
pub mod chat;
pub mod config;
pub mod models;

use std::sync::Arc;

use anyhow::{Context, Result, bail};
use relay_core::config::{Config, paths};
use relay_core::key_roulette::{FileCursorStore, KeyRoulette};
use relay_core::providers::{HttpTransport, ProviderManager, ProviderSetting};

/// Builds the adapters from config, persisting key cursors under `RELAY_HOME`.
pub(crate) fn provider_manager(config: &Config) -> Result<ProviderManager> {
    let transport =
        HttpTransport::new(config.http.transport_options()).context("build HTTP client")?;
    let cursors = FileCursorStore::open(paths::key_cursors_path())?;
    let roulette = KeyRoulette::new(Arc::new(cursors));
    Ok(ProviderManager::new(Arc::new(transport), Arc::new(roulette)))
}

pub(crate) fn find_provider<'a>(config: &'a Config, id: &str) -> Result<&'a ProviderSetting> {
    if let Some(setting) = config.provider(id) {
        return Ok(setting);
    }
    let known: Vec<&str> = config
        .providers
        .iter()
        .filter(|p| p.common().enabled)
        .map(ProviderSetting::id)
        .collect();
    if known.is_empty() {
        bail!(
            "Unknown provider '{id}': no providers configured in {}",
            paths::config_path().display()
        );
    }
    bail!("Unknown provider '{id}' (configured: {})", known.join(", "))
}
