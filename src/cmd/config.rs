//! Configuration view and validation (`taskboard config`).

use anyhow::{Context, Result};
use taskboard::config::{CliOverrides, Config};

use crate::ConfigCommands;

pub fn load_config(overrides: &CliOverrides) -> Result<Config> {
    Config::load(overrides).context("Failed to load configuration")
}

pub fn cmd_config(config: &Config, command: Option<ConfigCommands>) -> Result<()> {
    match command {
        None | Some(ConfigCommands::Show) => {
            let rendered = config
                .to_toml()
                .context("Failed to render configuration")?;
            println!("# Effective configuration (file, env and flags merged)");
            println!();
            print!("{}", rendered);
        }
        Some(ConfigCommands::Validate) => {
            if config.webhooks.github_secret.is_none() {
                println!("warning: GitHub webhook secret not set; /api/webhooks/github rejects all requests");
            }
            if config.webhooks.deploy_secret.is_none() {
                println!("warning: deploy webhook secret not set; /api/webhooks/deploy rejects all requests");
            }
            println!("Configuration OK");
        }
    }
    Ok(())
}
