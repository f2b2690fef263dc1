//! Layered configuration for the task board.
//!
//! Priority, highest first:
//! 1. CLI flags
//! 2. Environment (`TASKBOARD_*`, webhook secrets; `.env` is loaded first)
//! 3. TOML file (`taskboard.toml` in the working directory, or `--config`)
//! 4. Compiled defaults

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::board::RetryPolicy;

pub const DEFAULT_CONFIG_FILE: &str = "taskboard.toml";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    ReadFile {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config file: {0}")]
    ParseToml(#[from] toml::de::Error),

    #[error("invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Sqlite,
    Local,
    Memory,
}

impl FromStr for StoreBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sqlite" => Ok(Self::Sqlite),
            "local" => Ok(Self::Local),
            "memory" => Ok(Self::Memory),
            other => Err(format!("unknown store backend '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Fmt,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "fmt" | "text" => Ok(Self::Fmt),
            "json" => Ok(Self::Json),
            other => Err(format!("unknown log format '{}'", other)),
        }
    }
}

// ---------------------------------------------------------------------------
// TOML file structs (all fields Option for partial overrides)
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ConfigFile {
    server: ServerFile,
    store: StoreFile,
    sync: SyncFile,
    webhooks: WebhooksFile,
    logging: LoggingFile,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ServerFile {
    bind: Option<String>,
    port: Option<u16>,
    dev_mode: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct StoreFile {
    backend: Option<StoreBackend>,
    path: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct SyncFile {
    max_attempts: Option<u32>,
    base_delay_ms: Option<u64>,
    seed_on_first_run: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct WebhooksFile {
    github_secret: Option<String>,
    deploy_secret: Option<String>,
    alert_url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct LoggingFile {
    level: Option<String>,
    format: Option<LogFormat>,
}

// ---------------------------------------------------------------------------
// CLI overrides
// ---------------------------------------------------------------------------

/// Values given on the command line. `None` falls through to lower layers.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub config: Option<PathBuf>,
    pub bind: Option<String>,
    pub port: Option<u16>,
    pub dev_mode: bool,
    pub backend: Option<StoreBackend>,
    pub store_path: Option<PathBuf>,
    pub log_level: Option<String>,
    pub log_format: Option<LogFormat>,
}

// ---------------------------------------------------------------------------
// Resolved configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct ServerConfig {
    pub bind: String,
    pub port: u16,
    /// Permissive CORS for a UI dev server on another origin.
    pub dev_mode: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    pub path: PathBuf,
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub seed_on_first_run: bool,
}

impl SyncConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_attempts, Duration::from_millis(self.base_delay_ms))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct WebhookConfig {
    #[serde(serialize_with = "redact")]
    pub github_secret: Option<String>,
    #[serde(serialize_with = "redact")]
    pub deploy_secret: Option<String>,
    pub alert_url: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Serialize)]
pub struct Config {
    pub server: ServerConfig,
    pub store: StoreConfig,
    pub sync: SyncConfig,
    pub webhooks: WebhookConfig,
    pub logging: LoggingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                bind: "127.0.0.1".to_string(),
                port: 3141,
                dev_mode: false,
            },
            store: StoreConfig {
                backend: StoreBackend::Sqlite,
                path: default_store_path(StoreBackend::Sqlite),
            },
            sync: SyncConfig {
                max_attempts: 3,
                base_delay_ms: 500,
                seed_on_first_run: false,
            },
            webhooks: WebhookConfig {
                github_secret: None,
                deploy_secret: None,
                alert_url: None,
            },
            logging: LoggingConfig {
                level: "info".to_string(),
                format: LogFormat::Fmt,
            },
        }
    }
}

fn default_store_path(backend: StoreBackend) -> PathBuf {
    match backend {
        StoreBackend::Sqlite => PathBuf::from(".taskboard/board.db"),
        StoreBackend::Local => PathBuf::from(".taskboard/local"),
        StoreBackend::Memory => PathBuf::new(),
    }
}

fn redact<S: serde::Serializer>(value: &Option<String>, s: S) -> Result<S::Ok, S::Error> {
    match value {
        Some(_) => s.serialize_str("********"),
        None => s.serialize_none(),
    }
}

impl Config {
    /// Load `.env`, then merge file, environment and CLI over the defaults.
    ///
    /// An explicit `--config` path must exist; the default file is optional.
    pub fn load(cli: &CliOverrides) -> Result<Self, ConfigError> {
        // A missing .env is normal.
        let _ = dotenvy::dotenv();
        let file = load_config_file(cli.config.as_deref())?;
        Self::resolve(&file, |key| std::env::var(key).ok(), cli)
    }

    /// Parse a TOML document over the defaults, ignoring env and CLI.
    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        let file: ConfigFile = toml::from_str(contents)?;
        Self::resolve(&file, |_| None, &CliOverrides::default())
    }

    fn resolve(
        file: &ConfigFile,
        env: impl Fn(&str) -> Option<String>,
        cli: &CliOverrides,
    ) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_file(file);
        config.apply_env(env)?;
        config.apply_cli(cli);
        Ok(config)
    }

    fn apply_file(&mut self, file: &ConfigFile) {
        if let Some(bind) = &file.server.bind {
            self.server.bind = bind.clone();
        }
        if let Some(port) = file.server.port {
            self.server.port = port;
        }
        if let Some(dev) = file.server.dev_mode {
            self.server.dev_mode = dev;
        }
        if let Some(backend) = file.store.backend {
            self.set_backend(backend);
        }
        if let Some(path) = &file.store.path {
            self.store.path = path.clone();
        }
        if let Some(n) = file.sync.max_attempts {
            self.sync.max_attempts = n;
        }
        if let Some(ms) = file.sync.base_delay_ms {
            self.sync.base_delay_ms = ms;
        }
        if let Some(seed) = file.sync.seed_on_first_run {
            self.sync.seed_on_first_run = seed;
        }
        if file.webhooks.github_secret.is_some() {
            self.webhooks.github_secret = file.webhooks.github_secret.clone();
        }
        if file.webhooks.deploy_secret.is_some() {
            self.webhooks.deploy_secret = file.webhooks.deploy_secret.clone();
        }
        if file.webhooks.alert_url.is_some() {
            self.webhooks.alert_url = file.webhooks.alert_url.clone();
        }
        if let Some(level) = &file.logging.level {
            self.logging.level = level.clone();
        }
        if let Some(format) = file.logging.format {
            self.logging.format = format;
        }
    }

    fn apply_env(&mut self, env: impl Fn(&str) -> Option<String>) -> Result<(), ConfigError> {
        let get = |key: &str| env(key).filter(|v| !v.is_empty());

        if let Some(bind) = get("TASKBOARD_BIND") {
            self.server.bind = bind;
        }
        if let Some(port) = get("TASKBOARD_PORT") {
            self.server.port = parse_env("TASKBOARD_PORT", &port)?;
        }
        if let Some(dev) = get("TASKBOARD_DEV_MODE") {
            self.server.dev_mode = parse_bool("TASKBOARD_DEV_MODE", &dev)?;
        }
        if let Some(backend) = get("TASKBOARD_STORE") {
            let backend: StoreBackend = backend
                .parse()
                .map_err(|message| ConfigError::InvalidValue {
                    key: "TASKBOARD_STORE".into(),
                    message,
                })?;
            self.set_backend(backend);
        }
        if let Some(path) = get("TASKBOARD_STORE_PATH") {
            self.store.path = PathBuf::from(path);
        }
        if let Some(level) = get("TASKBOARD_LOG") {
            self.logging.level = level;
        }
        if let Some(format) = get("TASKBOARD_LOG_FORMAT") {
            self.logging.format = format
                .parse()
                .map_err(|message| ConfigError::InvalidValue {
                    key: "TASKBOARD_LOG_FORMAT".into(),
                    message,
                })?;
        }
        if let Some(secret) = get("GITHUB_WEBHOOK_SECRET") {
            self.webhooks.github_secret = Some(secret);
        }
        if let Some(secret) = get("DEPLOY_WEBHOOK_SECRET") {
            self.webhooks.deploy_secret = Some(secret);
        }
        if let Some(url) = get("DEPLOY_ALERT_URL") {
            self.webhooks.alert_url = Some(url);
        }
        Ok(())
    }

    fn apply_cli(&mut self, cli: &CliOverrides) {
        if let Some(bind) = &cli.bind {
            self.server.bind = bind.clone();
        }
        if let Some(port) = cli.port {
            self.server.port = port;
        }
        if cli.dev_mode {
            self.server.dev_mode = true;
        }
        if let Some(backend) = cli.backend {
            self.set_backend(backend);
        }
        if let Some(path) = &cli.store_path {
            self.store.path = path.clone();
        }
        if let Some(level) = &cli.log_level {
            self.logging.level = level.clone();
        }
        if let Some(format) = cli.log_format {
            self.logging.format = format;
        }
    }

    /// Switching backend also switches a still-default path to the new
    /// backend's default.
    fn set_backend(&mut self, backend: StoreBackend) {
        if self.store.path == default_store_path(self.store.backend) {
            self.store.path = default_store_path(backend);
        }
        self.store.backend = backend;
    }

    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.server.bind, self.server.port)
    }

    /// Render as TOML with secrets redacted.
    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }
}

fn parse_env<T: FromStr>(key: &str, value: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    value.parse().map_err(|e: T::Err| ConfigError::InvalidValue {
        key: key.to_string(),
        message: e.to_string(),
    })
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("expected a boolean, got '{}'", value),
        }),
    }
}

fn load_config_file(explicit_path: Option<&Path>) -> Result<ConfigFile, ConfigError> {
    if let Some(p) = explicit_path {
        let contents = std::fs::read_to_string(p).map_err(|e| ConfigError::ReadFile {
            path: p.to_path_buf(),
            source: e,
        })?;
        return Ok(toml::from_str(&contents)?);
    }

    let path = PathBuf::from(DEFAULT_CONFIG_FILE);
    match std::fs::read_to_string(&path) {
        Ok(contents) => Ok(toml::from_str(&contents)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ConfigFile::default()),
        Err(e) => Err(ConfigError::ReadFile { path, source: e }),
    }
}

/// Starter `taskboard.toml` written by `taskboard init`.
pub const CONFIG_TEMPLATE: &str = r#"# Task board configuration.
# Environment variables (TASKBOARD_*, GITHUB_WEBHOOK_SECRET,
# DEPLOY_WEBHOOK_SECRET, DEPLOY_ALERT_URL) override these values,
# and command-line flags override both.

[server]
bind = "127.0.0.1"
port = 3141
dev_mode = false

[store]
# sqlite | local | memory
backend = "sqlite"
path = ".taskboard/board.db"

[sync]
max_attempts = 3
base_delay_ms = 500
seed_on_first_run = true

[webhooks]
# github_secret = "..."
# deploy_secret = "..."
# alert_url = "https://hooks.example.com/deploy-alerts"

[logging]
level = "info"
# fmt | json
format = "fmt"
"#;
