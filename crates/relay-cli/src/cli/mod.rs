//! CLI entry and dispatch.

use std::fmt;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use relay_core::{config, logging};

mod commands;

#[derive(Parser)]
#[command(name = "relay")]
#[command(version = "0.1")]
#[command(about = "Multi-provider LLM streaming gateway")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand)]
enum Commands {
    /// List the models a provider offers
    Models {
        /// Provider id from config
        #[arg(value_name = "PROVIDER")]
        provider: String,
    },

    /// Show the remaining balance of a provider
    Balance {
        /// Provider id from config
        #[arg(value_name = "PROVIDER")]
        provider: String,
    },

    /// Send one prompt and stream the answer
    Chat(ChatArgs),

    /// Manage configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(clap::Args, Debug, Clone)]
pub(crate) struct ChatArgs {
    /// Provider id from config
    #[arg(long)]
    pub provider: String,

    /// Model id sent to the provider
    #[arg(short, long)]
    pub model: String,

    /// The prompt to send
    #[arg(short, long)]
    pub prompt: String,

    /// Text added to the system prompt
    #[arg(long)]
    pub system: Option<String>,

    /// Attach a text file; its content is inlined into the prompt
    #[arg(long = "file", value_name = "PATH")]
    pub files: Vec<PathBuf>,

    /// Thinking budget in tokens (0 = off, -1 = provider default)
    #[arg(long, allow_hyphen_values = true)]
    pub thinking_budget: Option<i32>,

    #[arg(long)]
    pub max_tokens: Option<u32>,

    #[arg(long)]
    pub temperature: Option<f32>,

    /// Split `<think>` blocks out of the answer (prints once the turn ends)
    #[arg(long)]
    pub think_tags: bool,
}

#[derive(clap::Subcommand)]
enum ConfigCommands {
    /// Show the path to the config file
    Path,
    /// Initialize a default config file (if not present)
    Init,
    /// Add a provider entry to the config file
    AddProvider {
        /// Provider kind: openai, claude or google
        #[arg(value_name = "TYPE")]
        kind: String,
        /// Provider id
        #[arg(value_name = "ID")]
        id: String,
        /// Override the vendor base URL
        #[arg(long)]
        base_url: Option<String>,
        /// API key (repeat for rotation)
        #[arg(long = "api-key", value_name = "KEY")]
        api_keys: Vec<String>,
    },
}

/// Returned when a turn was cancelled with Ctrl-C.
#[derive(Debug)]
pub struct Interrupted;

impl fmt::Display for Interrupted {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("interrupted")
    }
}

impl std::error::Error for Interrupted {}

pub fn run() -> Result<()> {
    let cli = Cli::parse();

    // config commands must work even when the file is broken
    let command = match cli.command {
        Commands::Config { command } => return config_command(command),
        command => command,
    };

    let config = config::Config::load().context("load config")?;
    let log_dir = config.log_to_file.then(config::paths::logs_dir);
    let _log_guard = logging::init(log_dir.as_deref());

    // one tokio runtime for everything
    let rt = tokio::runtime::Runtime::new().context("create tokio runtime")?;

    rt.block_on(async move { dispatch(command, &config).await })
}

async fn dispatch(command: Commands, config: &config::Config) -> Result<()> {
    match command {
        Commands::Models { provider } => commands::models::list(config, &provider).await,
        Commands::Balance { provider } => commands::balance::show(config, &provider).await,
        Commands::Chat(args) => commands::chat::run(config, &args).await,
        Commands::Config { command } => config_command(command),
    }
}

fn config_command(command: ConfigCommands) -> Result<()> {
    match command {
        ConfigCommands::Path => {
            commands::config::path();
            Ok(())
        }
        ConfigCommands::Init => commands::config::init(),
        ConfigCommands::AddProvider {
            kind,
            id,
            base_url,
            api_keys,
        } => commands::config::add_provider(&kind, &id, base_url, api_keys),
    }
}
