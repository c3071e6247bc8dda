//! Configuration management for relay.
//!
//! Loads configuration from `${RELAY_HOME}/config.toml` with sensible defaults.

use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

use crate::generation::{
    DEFAULT_EVENT_CHANNEL_CAPACITY, DEFAULT_MAX_TOOL_ITERATIONS, GenerationOptions,
};
use crate::providers::{ProviderSetting, TransportOptions};

pub mod paths {
    //! Path resolution for relay configuration and data directories.
    //!
    //! `RELAY_HOME` resolution order:
    //! 1. `RELAY_HOME` environment variable (if set)
    //! 2. `~/.config/relay` (default)

    use std::path::PathBuf;

    /// Returns the relay home directory.
    pub fn relay_home() -> PathBuf {
        if let Some(home) = std::env::var_os("RELAY_HOME").filter(|h| !h.is_empty()) {
            return PathBuf::from(home);
        }

        std::env::var_os("HOME")
            .map(PathBuf::from)
            .unwrap_or_default()
            .join(".config")
            .join("relay")
    }

    /// Returns the path to the config.toml file.
    pub fn config_path() -> PathBuf {
        relay_home().join("config.toml")
    }

    /// Directory for rolling log files.
    pub fn logs_dir() -> PathBuf {
        relay_home().join("logs")
    }

    /// File holding the persisted key rotation cursors.
    pub fn key_cursors_path() -> PathBuf {
        relay_home().join("key_cursors.json")
    }
}

/// Client timeouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub connect_timeout_secs: u64,
    /// Applies to each read of a response stream.
    pub read_timeout_secs: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        let defaults = TransportOptions::default();
        Self {
            connect_timeout_secs: defaults.connect_timeout.as_secs(),
            read_timeout_secs: defaults.read_timeout.as_secs(),
        }
    }
}

impl HttpConfig {
    pub fn transport_options(&self) -> TransportOptions {
        TransportOptions {
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
            read_timeout: Duration::from_secs(self.read_timeout_secs),
        }
    }
}

/// Generation turn limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    pub max_tool_iterations: usize,
    pub event_channel_capacity: usize,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            max_tool_iterations: DEFAULT_MAX_TOOL_ITERATIONS,
            event_channel_capacity: DEFAULT_EVENT_CHANNEL_CAPACITY,
        }
    }
}

impl GenerationConfig {
    pub fn options(&self) -> GenerationOptions {
        GenerationOptions {
            max_tool_iterations: self.max_tool_iterations,
            event_channel_capacity: self.event_channel_capacity,
        }
    }
}

/// Main configuration structure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Also write logs to `<RELAY_HOME>/logs`.
    pub log_to_file: bool,

    pub http: HttpConfig,

    pub generation: GenerationConfig,

    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub providers: Vec<ProviderSetting>,
}

impl Config {
    /// Loads configuration from the default config path.
    ///
    /// # Errors
    /// See [`Config::load_from`].
    pub fn load() -> Result<Self> {
        Self::load_from(&paths::config_path())
    }

    /// Loads configuration from a specific path.
    /// Returns defaults if the file doesn't exist.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed, or if two
    /// providers share an id.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Config::default());
        }
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;
        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config from {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for provider in &self.providers {
            let id = provider.id();
            if id.trim().is_empty() {
                bail!("Provider of type {} has an empty id", provider.kind_name());
            }
            if !seen.insert(id) {
                bail!("Duplicate provider id {id}");
            }
        }
        Ok(())
    }

    /// Finds an enabled provider by id.
    pub fn provider(&self, id: &str) -> Option<&ProviderSetting> {
        self.providers
            .iter()
            .find(|p| p.id() == id && p.common().enabled)
    }

    /// Creates a default config file at the given path.
    /// Returns an error if the file already exists.
    ///
    /// # Errors
    /// Returns an error if the file exists or cannot be written.
    pub fn init(path: &Path) -> Result<()> {
        if path.exists() {
            bail!("Config file already exists at {}", path.display());
        }

        Self::write_config(path, default_config_template())
    }

    /// Appends a provider to the config file, keeping its comments.
    ///
    /// Creates the file from the default template if it doesn't exist.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read, parsed, or written, or if
    /// a provider with the same id is already configured.
    pub fn add_provider_to(path: &Path, provider: &ProviderSetting) -> Result<()> {
        use toml_edit::{ArrayOfTables, DocumentMut, Item};

        let contents = if path.exists() {
            fs::read_to_string(path)
                .with_context(|| format!("Failed to read config from {}", path.display()))?
        } else {
            default_config_template().to_string()
        };

        let existing: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config from {}", path.display()))?;
        if existing.providers.iter().any(|p| p.id() == provider.id()) {
            bail!("Provider {} is already configured", provider.id());
        }

        let mut doc: DocumentMut = contents
            .parse()
            .with_context(|| format!("Failed to parse config from {}", path.display()))?;
        let entry: DocumentMut = toml::to_string(provider)
            .context("Failed to serialize provider")?
            .parse()
            .context("Failed to parse serialized provider")?;
        let mut entry = entry.as_table().clone();
        // positions from the entry document would interleave its sub-tables
        // with the existing ones
        let mut next = last_position(doc.as_table()) + 1;
        renumber_tables(&mut entry, &mut next);

        let providers = doc
            .entry("providers")
            .or_insert(Item::ArrayOfTables(ArrayOfTables::new()))
            .as_array_of_tables_mut()
            .context("`providers` must be an array of tables")?;
        providers.push(entry);

        Self::write_config(path, &doc.to_string())
    }

    /// Writes config content to a file, creating parent directories as needed.
    /// Uses atomic write (temp file + rename) to prevent corruption.
    fn write_config(path: &Path, content: &str) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory {}", parent.display()))?;
        }

        let tmp_path = path.with_extension("toml.tmp");
        fs::write(&tmp_path, content)
            .with_context(|| format!("Failed to write config to {}", tmp_path.display()))?;
        fs::rename(&tmp_path, path).with_context(|| {
            format!(
                "Failed to rename {} to {}",
                tmp_path.display(),
                path.display()
            )
        })?;

        Ok(())
    }
}

fn last_position(table: &toml_edit::Table) -> usize {
    let mut last = table.position().unwrap_or(0);
    for (_, item) in table {
        match item {
            toml_edit::Item::Table(t) => last = last.max(last_position(t)),
            toml_edit::Item::ArrayOfTables(array) => {
                for t in array {
                    last = last.max(last_position(t));
                }
            }
            _ => {}
        }
    }
    last
}

fn renumber_tables(table: &mut toml_edit::Table, next: &mut usize) {
    table.set_position(*next);
    *next += 1;
    for (_, item) in table.iter_mut() {
        match item {
            toml_edit::Item::Table(t) => renumber_tables(t, next),
            toml_edit::Item::ArrayOfTables(array) => {
                for t in array.iter_mut() {
                    renumber_tables(t, next);
                }
            }
            _ => {}
        }
    }
}

/// Returns the default config template with comments.
///
/// Embedded from `default_config.toml` at compile time.
fn default_config_template() -> &'static str {
    include_str!("../default_config.toml")
}
