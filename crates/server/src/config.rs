//! Process configuration: an optional TOML file, then environment
//! variables, then whatever the binary overrides from its flags.

use std::path::{Path, PathBuf};

use bdd_core::{BrowserKind, RunConfig, DEFAULT_TIMEOUT_MS};
use browser::DriverConfig;
use orchestrator::{RegistryConfig, DEFAULT_MAX_CONCURRENT_TASKS};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

pub const DEFAULT_CONFIG_FILE: &str = "bdd-runner.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path:?}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("Invalid value for {key}: '{value}'")]
    InvalidValue { key: &'static str, value: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub results_dir: PathBuf,
    pub database_url: String,
    pub headless: bool,
    pub browser: BrowserKind,
    /// Default step timeout in milliseconds.
    pub timeout_ms: u64,
    /// Remote WebDriver endpoint; a local driver is spawned when unset.
    pub webdriver_url: Option<String>,
    pub webdriver_binary: Option<PathBuf>,
    pub max_concurrent_tasks: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 5001,
            results_dir: PathBuf::from("results"),
            database_url: "sqlite:results/executions.db".to_string(),
            headless: true,
            browser: BrowserKind::default(),
            timeout_ms: DEFAULT_TIMEOUT_MS,
            webdriver_url: None,
            webdriver_binary: None,
            max_concurrent_tasks: DEFAULT_MAX_CONCURRENT_TASKS,
        }
    }
}

impl AppConfig {
    /// Reads `path` (or `bdd-runner.toml` when present) and applies the
    /// process environment on top.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let config = match path {
            Some(path) => Self::from_file(path)?,
            None if Path::new(DEFAULT_CONFIG_FILE).exists() => {
                Self::from_file(Path::new(DEFAULT_CONFIG_FILE))?
            }
            None => Self::default(),
        };
        config.with_env(|key| std::env::var(key).ok())
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        debug!(path = %path.display(), "Config file loaded");
        Ok(config)
    }

    /// Applies `HOST`, `PORT`, `RESULTS_DIR`, `DATABASE_URL`,
    /// `HEADLESS_MODE`, `BROWSER_TYPE`, `TIMEOUT`, `WEBDRIVER_URL`,
    /// `WEBDRIVER_BINARY` and `MAX_CONCURRENT_TASKS`.
    pub fn with_env(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        if let Some(host) = lookup("HOST") {
            self.host = host;
        }
        if let Some(port) = lookup("PORT") {
            self.port = parse("PORT", &port)?;
        }
        if let Some(dir) = lookup("RESULTS_DIR") {
            self.results_dir = PathBuf::from(dir);
        }
        if let Some(url) = lookup("DATABASE_URL") {
            self.database_url = url;
        }
        if let Some(headless) = lookup("HEADLESS_MODE") {
            self.headless = parse_bool("HEADLESS_MODE", &headless)?;
        }
        if let Some(browser) = lookup("BROWSER_TYPE") {
            self.browser = BrowserKind::parse(&browser).ok_or(ConfigError::InvalidValue {
                key: "BROWSER_TYPE",
                value: browser,
            })?;
        }
        if let Some(timeout) = lookup("TIMEOUT") {
            self.timeout_ms = parse("TIMEOUT", &timeout)?;
        }
        if let Some(url) = lookup("WEBDRIVER_URL").filter(|v| !v.is_empty()) {
            self.webdriver_url = Some(url);
        }
        if let Some(binary) = lookup("WEBDRIVER_BINARY").filter(|v| !v.is_empty()) {
            self.webdriver_binary = Some(PathBuf::from(binary));
        }
        if let Some(max) = lookup("MAX_CONCURRENT_TASKS") {
            self.max_concurrent_tasks = parse("MAX_CONCURRENT_TASKS", &max)?;
        }
        Ok(self)
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Defaults for fields a submission leaves out.
    pub fn run_defaults(&self) -> RunConfig {
        RunConfig {
            base_url: None,
            timeout_ms: self.timeout_ms,
            browser: self.browser,
            headless: self.headless,
        }
    }

    pub fn driver(&self) -> DriverConfig {
        DriverConfig {
            url: self.webdriver_url.clone(),
            binary: self.webdriver_binary.clone(),
        }
    }

    pub fn registry(&self) -> RegistryConfig {
        RegistryConfig::default().with_results_dir(&self.results_dir)
    }
}

fn parse<T: std::str::FromStr>(key: &'static str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key,
        value: value.to_string(),
    })
}

fn parse_bool(key: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key,
            value: value.to_string(),
        }),
    }
}
