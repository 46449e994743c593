//! # Application Configuration
//!
//! This module defines the configuration structure for the `metafetch` binary
//! and the logic for loading it. Values are layered: built-in defaults, an
//! optional `metafetch.yml` file, `METAFETCH_` environment variables, then
//! command-line overrides.

use clap::ValueEnum;
use config::{Config as ConfigBuilder, Environment, File, FileFormat};
use metafetch::fetcher::{
    DEFAULT_BASE64_FILE_NAME, DEFAULT_ENDPOINT, DEFAULT_OUTPUT_FILE_NAME, DEFAULT_TIMEOUT,
};
use metafetch::logging::{DEFAULT_LOG_FILE, DEFAULT_MAX_AGE_DAYS, DEFAULT_MAX_SIZE_BYTES};
use metafetch::telemetry::DEFAULT_SERVICE_NAME;
use metafetch::{FetchOptions, LogOptions, TraceContext};
use regex::Regex;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// The configuration file looked up in the working directory when no path is given.
pub const DEFAULT_CONFIG_FILE: &str = "metafetch.yml";

/// A custom error type for configuration issues.
#[derive(Debug)]
pub enum ConfigError {
    /// Indicates an error from the underlying `config` crate.
    General(String),
    /// Indicates a required configuration file was not found.
    NotFound(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::General(msg) => write!(f, "Configuration error: {msg}"),
            ConfigError::NotFound(msg) => write!(f, "{msg}"),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<config::ConfigError> for ConfigError {
    fn from(err: config::ConfigError) -> Self {
        ConfigError::General(err.to_string())
    }
}

/// Log file settings, the `log:` section of `metafetch.yml`.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct LogConfig {
    #[serde(default = "default_log_file")]
    pub file: PathBuf,
    #[serde(default = "default_max_size_bytes")]
    pub max_size_bytes: usize,
    #[serde(default = "default_max_age_days")]
    pub max_age_days: i64,
    /// Mirror log lines to stderr.
    #[serde(default = "default_true")]
    pub console: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            file: default_log_file(),
            max_size_bytes: default_max_size_bytes(),
            max_age_days: default_max_age_days(),
            console: true,
        }
    }
}

fn default_log_file() -> PathBuf {
    PathBuf::from(DEFAULT_LOG_FILE)
}

fn default_max_size_bytes() -> usize {
    DEFAULT_MAX_SIZE_BYTES
}

fn default_max_age_days() -> i64 {
    DEFAULT_MAX_AGE_DAYS
}

fn default_true() -> bool {
    true
}

/// The root configuration structure, mapping directly to `metafetch.yml`.
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    /// The instance-identity URL. Loaded from `METAFETCH_ENDPOINT`.
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Output directory; the working directory when unset.
    #[serde(default)]
    pub output_dir: Option<PathBuf>,
    #[serde(default = "default_output_file_name")]
    pub output_file_name: String,
    #[serde(default)]
    pub include_base64: bool,
    #[serde(default = "default_base64_file_name")]
    pub base64_file_name: String,
    #[serde(default)]
    pub include_tracing: bool,
    #[serde(default = "default_service_name")]
    pub service_name: String,
    /// Key/value pairs attached to every span when tracing is on.
    #[serde(default)]
    pub baggage: BTreeMap<String, String>,
    #[serde(default)]
    pub log: LogConfig,
    /// The file the configuration was read from, if any. Reported once
    /// logging is up, since loading happens before it.
    #[serde(skip)]
    pub source: Option<PathBuf>,
}

fn default_endpoint() -> String {
    DEFAULT_ENDPOINT.to_string()
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT.as_secs()
}

fn default_output_file_name() -> String {
    DEFAULT_OUTPUT_FILE_NAME.to_string()
}

fn default_base64_file_name() -> String {
    DEFAULT_BASE64_FILE_NAME.to_string()
}

fn default_service_name() -> String {
    DEFAULT_SERVICE_NAME.to_string()
}

impl AppConfig {
    pub fn fetch_options(&self) -> FetchOptions {
        FetchOptions {
            endpoint: self.endpoint.clone(),
            timeout: Duration::from_secs(self.timeout_secs),
            output_dir: self.output_dir.clone(),
            output_file_name: self.output_file_name.clone(),
            include_base64: self.include_base64,
            base64_file_name: self.base64_file_name.clone(),
            include_tracing: self.include_tracing,
        }
    }

    pub fn log_options(&self) -> LogOptions {
        LogOptions {
            file: self.log.file.clone(),
            max_size_bytes: self.log.max_size_bytes,
            max_age_days: self.log.max_age_days,
            console: self.log.console,
        }
    }

    pub fn trace_context(&self) -> TraceContext {
        self.baggage.iter().fold(
            TraceContext::new(&self.service_name),
            |ctx, (k, v)| ctx.with_baggage(k, v),
        )
    }

    /// Applies a preset, then every explicitly given override.
    pub fn with_overrides(mut self, overrides: Overrides) -> Self {
        if let Some(preset) = overrides.preset {
            preset.apply(&mut self);
        }
        if let Some(endpoint) = overrides.endpoint {
            self.endpoint = endpoint;
        }
        if let Some(secs) = overrides.timeout_secs {
            self.timeout_secs = secs;
        }
        if let Some(dir) = overrides.output_dir {
            self.output_dir = Some(dir);
        }
        if let Some(name) = overrides.output_file_name {
            self.output_file_name = name;
        }
        if let Some(name) = overrides.base64_file_name {
            self.base64_file_name = name;
            self.include_base64 = true;
        }
        if overrides.include_base64 {
            self.include_base64 = true;
        }
        if overrides.include_tracing {
            self.include_tracing = true;
        }
        if let Some(file) = overrides.log_file {
            self.log.file = file;
        }
        if overrides.no_console_log {
            self.log.console = false;
        }
        self
    }
}

/// Named option bundles, one per historical variant of the tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Preset {
    /// `ec2-instance-metadata.json` with tracing spans.
    Ec2Metadata,
    /// Plain `meta.json`.
    Meta,
    /// `meta.json` plus `meta-b64.txt`.
    MetaBase64,
}

impl Preset {
    pub fn apply(self, config: &mut AppConfig) {
        match self {
            Preset::Ec2Metadata => {
                config.output_file_name = "ec2-instance-metadata.json".to_string();
                config.include_base64 = false;
                config.include_tracing = true;
            }
            Preset::Meta => {
                config.output_file_name = DEFAULT_OUTPUT_FILE_NAME.to_string();
                config.include_base64 = false;
                config.include_tracing = false;
            }
            Preset::MetaBase64 => {
                config.output_file_name = DEFAULT_OUTPUT_FILE_NAME.to_string();
                config.base64_file_name = DEFAULT_BASE64_FILE_NAME.to_string();
                config.include_base64 = true;
                config.include_tracing = false;
            }
        }
    }
}

/// Command-line values that take precedence over every other layer.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub preset: Option<Preset>,
    pub endpoint: Option<String>,
    pub timeout_secs: Option<u64>,
    pub output_dir: Option<PathBuf>,
    pub output_file_name: Option<String>,
    pub base64_file_name: Option<String>,
    pub include_base64: bool,
    pub include_tracing: bool,
    pub log_file: Option<PathBuf>,
    pub no_console_log: bool,
}

// Helper to read a file, substitute env vars, and return its content.
// Returns Ok(None) if the file does not exist, or an error if it fails to read.
fn read_and_substitute(path: &Path) -> Result<Option<String>, ConfigError> {
    if !path.exists() {
        return Ok(None);
    }

    let content = fs::read_to_string(path).map_err(|e| {
        ConfigError::General(format!(
            "Failed to read config file '{}': {e}",
            path.display()
        ))
    })?;

    let re = Regex::new(r"\$\{(?P<var>[A-Z0-9_]+)\}")
        .map_err(|e| ConfigError::General(e.to_string()))?;
    let expanded_content = re.replace_all(&content, |caps: &regex::Captures| {
        let var_name = &caps["var"];
        env::var(var_name).unwrap_or_default()
    });

    Ok(Some(expanded_content.to_string()))
}

/// Loads the application configuration from a file and environment variables.
///
/// - With `config_path_override`, that file must exist.
/// - Otherwise `metafetch.yml` in the working directory is used if present.
/// - `METAFETCH_...` variables override file values; nested keys use `__`
///   (e.g. `METAFETCH_LOG__MAX_SIZE_BYTES`).
pub fn get_config(config_path_override: Option<&Path>) -> Result<AppConfig, ConfigError> {
    let mut builder = ConfigBuilder::builder();

    let config_path = config_path_override
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));

    let mut source = None;
    match read_and_substitute(&config_path)? {
        Some(content) => {
            builder = builder.add_source(File::from_str(&content, FileFormat::Yaml));
            source = Some(config_path);
        }
        None if config_path_override.is_some() => {
            return Err(ConfigError::NotFound(format!(
                "Config file not found at '{}'.",
                config_path.display()
            )));
        }
        None => {}
    }

    let settings = builder
        .add_source(
            Environment::with_prefix("METAFETCH")
                .prefix_separator("_")
                .try_parsing(true)
                .separator("__"),
        )
        .build()?;

    let mut config: AppConfig = settings.try_deserialize()?;
    config.source = source;
    Ok(config)
}
