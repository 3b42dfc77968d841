use std::path::PathBuf;

use clap::{Parser, Subcommand};

pub mod config;
pub mod run;
pub mod schema;
pub mod tools;

use config::ConfigArgs;
use run::RunArgs;
use schema::SchemaArgs;
use tools::ToolsArgs;

use cardbridge::config::ConfigManager;

#[derive(Parser, Debug)]
#[command(
    name = "cardbridge",
    about = "Serve a flashcard collection to AI assistants",
    version = "0.1.0"
)]
pub struct Cli {
    /// `.env` file holding CARDBRIDGE_* settings
    #[arg(long, global = true, default_value = ".env")]
    pub env_file: PathBuf,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a host loop with an in-memory collection and serve it
    Run(RunArgs),

    /// List the tools the server offers
    Tools(ToolsArgs),

    /// Show or change configuration
    Config(ConfigArgs),

    /// Emit JSON‐Schema for the configuration and every tool
    Schema(SchemaArgs),
}

#[derive(Clone, Debug)]
pub struct CliContext {
    pub env_file: PathBuf,
    pub config_manager: ConfigManager,
}

impl CliContext {
    pub fn new(env_file: PathBuf, config_manager: ConfigManager) -> Self {
        Self {
            env_file,
            config_manager,
        }
    }
}

pub fn execute(context: &CliContext, command: Commands) -> anyhow::Result<()> {
    match command {
        Commands::Run(args) => run::execute(args, context),
        Commands::Tools(args) => tools::execute(args, context),
        Commands::Config(args) => config::execute(args, context),
        Commands::Schema(args) => schema::execute(args, context),
    }
}

pub fn default_command() -> Commands {
    Commands::Run(RunArgs::default_runtime())
}
