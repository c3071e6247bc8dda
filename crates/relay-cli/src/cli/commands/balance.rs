//! Balance command handler.

use anyhow::{Context, Result};
use relay_core::config::Config;

use super::{find_provider, provider_manager};

pub async fn show(config: &Config, provider_id: &str) -> Result<()> {
    let setting = find_provider(config, provider_id)?;
    let manager = provider_manager(config)?;
    let balance = manager
        .provider_for(setting)
        .get_balance()
        .await
        .with_context(|| format!("get balance for '{provider_id}'"))?;
    println!("{balance}");
    Ok(())
}
