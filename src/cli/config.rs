use clap::{Args, Subcommand};

use super::CliContext;
use cardbridge::config::BridgeConfig;

#[derive(Args, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommands,
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommands {
    /// Print the effective configuration
    Show,
    /// Write a key to the `.env` file
    Set { key: String, value: String },
    Delete { key: String },
}

pub fn execute(args: ConfigArgs, context: &CliContext) -> anyhow::Result<()> {
    match args.command {
        ConfigCommands::Show => {
            let config = BridgeConfig::load(&context.config_manager)?;
            for (key, value) in config.to_pairs() {
                println!("{key}={value}");
            }
            Ok(())
        }
        ConfigCommands::Set { key, value } => {
            match context.config_manager.0.set(&key, &value) {
                Ok(()) => println!("✅ Config updated."),
                Err(e) => eprintln!("❌ Config could not be updated: {e}"),
            }
            // report now rather than at the next `run`
            if let Err(e) = BridgeConfig::load(&context.config_manager) {
                eprintln!("⚠️  Configuration is now invalid: {e}");
            }
            Ok(())
        }
        ConfigCommands::Delete { key } => {
            context.config_manager.0.del(&key);
            println!("✅ Config deleted.");
            Ok(())
        }
    }
}
