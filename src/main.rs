use clap::Parser;

mod cli;

use cardbridge::config::{ConfigManager, EnvConfigManager};
use cli::{Cli, CliContext, default_command, execute};

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config_manager = ConfigManager(EnvConfigManager::new(cli.env_file.clone()));
    let context = CliContext::new(cli.env_file, config_manager);
    let command = cli.command.unwrap_or_else(default_command);
    execute(&context, command)
}
