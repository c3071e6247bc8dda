//! Models command handler.

use anyhow::{Context, Result};
use relay_core::config::Config;

use super::{find_provider, provider_manager};

pub async fn list(config: &Config, provider_id: &str) -> Result<()> {
    let setting = find_provider(config, provider_id)?;
    let manager = provider_manager(config)?;
    let models = manager
        .provider_for(setting)
        .list_models()
        .await
        .with_context(|| format!("list models for '{provider_id}'"))?;

    if models.is_empty() {
        println!("No models found.");
        return Ok(());
    }
    for model in models {
        if model.display_name.is_empty() || model.display_name == model.model_id {
            println!("{}", model.model_id);
        } else {
            println!("{}\t{}", model.model_id, model.display_name);
        }
    }
    Ok(())
}
