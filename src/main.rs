use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use taskboard::config::{CliOverrides, LogFormat, StoreBackend};

mod cmd;

#[derive(Parser)]
#[command(name = "taskboard")]
#[command(version, about = "Kanban task board with a live activity feed and PR/deploy webhooks")]
pub struct Cli {
    /// Path to a config file (default: ./taskboard.toml if present)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Store backend, overriding the config file
    #[arg(long, global = true, value_enum)]
    pub store: Option<StoreBackend>,

    /// Database file (sqlite) or directory (local)
    #[arg(long, global = true)]
    pub store_path: Option<PathBuf>,

    /// Log filter, e.g. "info" or "taskboard=debug"
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    #[arg(long, global = true, value_enum)]
    pub log_format: Option<LogFormat>,

    /// Shorthand for --log-level debug
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the board server (API, live feed and webhooks)
    Serve {
        #[arg(long)]
        bind: Option<String>,
        #[arg(short, long)]
        port: Option<u16>,
        /// Enable permissive CORS for a UI dev server
        #[arg(long)]
        dev: bool,
    },
    /// Write a starter taskboard.toml
    Init {
        /// Where to write the file
        #[arg(long, default_value = taskboard::config::DEFAULT_CONFIG_FILE)]
        path: PathBuf,
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
    /// Print the board columns
    Board {
        #[arg(long)]
        json: bool,
    },
    /// List or clear the activity log
    Activity {
        #[command(subcommand)]
        command: Option<ActivityCommands>,
    },
    /// Show or validate the effective configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
pub enum ActivityCommands {
    /// Show recent entries, newest first
    List {
        #[arg(short = 'n', long, default_value = "20")]
        limit: usize,
        #[arg(long)]
        json: bool,
    },
    /// Delete every entry
    Clear,
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Print the merged configuration (secrets redacted)
    Show,
    /// Check that the configuration loads
    Validate,
}

impl Cli {
    fn overrides(&self) -> CliOverrides {
        let mut overrides = CliOverrides {
            config: self.config.clone(),
            backend: self.store,
            store_path: self.store_path.clone(),
            log_level: self.log_level.clone(),
            log_format: self.log_format,
            ..CliOverrides::default()
        };
        if self.verbose && overrides.log_level.is_none() {
            overrides.log_level = Some("debug".to_string());
        }
        if let Commands::Serve { bind, port, dev } = &self.command {
            overrides.bind = bind.clone();
            overrides.port = *port;
            overrides.dev_mode = *dev;
        }
        overrides
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Commands::Init { path, force } = &cli.command {
        return cmd::cmd_init(path, *force);
    }

    let config = cmd::load_config(&cli.overrides())?;
    taskboard::init_tracing(&config.logging);

    match &cli.command {
        Commands::Init { .. } => {}
        Commands::Serve { .. } => cmd::cmd_serve(config).await?,
        Commands::Board { json } => cmd::cmd_board(&config, *json).await?,
        Commands::Activity { command } => cmd::cmd_activity(&config, command.clone()).await?,
        Commands::Config { command } => cmd::cmd_config(&config, command.clone())?,
    }

    Ok(())
}
