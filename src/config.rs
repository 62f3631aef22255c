use crate::cache::CacheConfig;
use crate::cli::Cli;
use crate::http_client::HttpClientConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Trait for abstracting environment variable access
pub trait EnvProvider {
    fn get(&self, key: &str) -> Option<String>;
}

/// System environment variable provider for production use
pub struct SystemEnvProvider;

impl EnvProvider for SystemEnvProvider {
    fn get(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlParsing(#[from] toml::de::Error),

    #[error("JSON parsing error: {0}")]
    JsonParsing(#[from] serde_json::Error),

    #[error("Configuration validation error: {0}")]
    Validation(String),

    #[error("Environment variable error: {0}")]
    Environment(String),

    #[error("Unsupported configuration file format: {0}")]
    UnsupportedFormat(String),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub cache: CacheConfig,
    pub network: NetworkConfig,
    pub registry: RegistryConfig,
    pub fault: FaultConfig,
    pub logging: LoggingConfig,
}

/// Network configuration for remote WSDL and XSD references
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct NetworkConfig {
    /// HTTP request timeout in seconds
    pub timeout_seconds: u64,
    /// Number of retry attempts for failed downloads
    pub retry_attempts: u32,
    /// Initial retry delay in milliseconds
    pub retry_delay_ms: u64,
    /// Upper bound of the exponential backoff in milliseconds
    pub max_retry_delay_ms: u64,
}

/// Where API contracts are stored
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RegistryConfig {
    /// Root directory: `<root>/<api>/<revision>/*.wsdl`
    pub root: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct FaultConfig {
    /// Add every validation problem to the fault detail
    pub include_details: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter level, overridden by `RUST_LOG`
    pub level: String,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Human,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "human" => Ok(LogFormat::Human),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("unknown log format: {}", other)),
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: 30,
            retry_attempts: 3,
            retry_delay_ms: 1000,
            max_retry_delay_ms: 30000,
        }
    }
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            root: dirs::data_dir()
                .unwrap_or_else(std::env::temp_dir)
                .join("soap-validate")
                .join("registry"),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Human,
        }
    }
}

impl Config {
    pub fn http_client_config(&self) -> HttpClientConfig {
        HttpClientConfig {
            timeout_seconds: self.network.timeout_seconds,
            retry_attempts: self.network.retry_attempts,
            retry_delay_ms: self.network.retry_delay_ms,
            max_retry_delay_ms: self.network.max_retry_delay_ms,
            ..HttpClientConfig::default()
        }
    }

    pub fn cache_config(&self) -> CacheConfig {
        self.cache.clone()
    }

    pub fn timeout_duration(&self) -> Duration {
        Duration::from_secs(self.network.timeout_seconds)
    }
}

/// Configuration manager for loading and merging configurations
pub struct ConfigManager;

impl ConfigManager {
    /// Load configuration with precedence: file -> environment -> CLI
    pub async fn load_config(cli: &Cli) -> Result<Config> {
        let mut config = Config::default();

        if let Some(config_path) = &cli.config {
            config = Self::load_from_file(config_path).await?;
        } else if let Some(found_config) = Self::find_config_file().await? {
            config = found_config;
        }

        config = Self::apply_environment_overrides(config)?;
        config = Self::merge_with_cli(config, cli);

        Self::validate_config(&config)?;

        Ok(config)
    }

    /// Load configuration from a file (TOML or JSON)
    ///
    /// Sections and keys missing from the file keep their defaults.
    pub async fn load_from_file(path: &Path) -> Result<Config> {
        let content = tokio::fs::read_to_string(path).await?;

        match path.extension().and_then(|ext| ext.to_str()) {
            Some("toml") => Ok(toml::from_str(&content)?),
            Some("json") => Ok(serde_json::from_str(&content)?),
            Some(ext) => Err(ConfigError::UnsupportedFormat(ext.to_string())),
            None => {
                if let Ok(config) = toml::from_str::<Config>(&content) {
                    Ok(config)
                } else {
                    Ok(serde_json::from_str(&content)?)
                }
            }
        }
    }

    /// Find configuration file in standard locations
    pub async fn find_config_file() -> Result<Option<Config>> {
        let config_names = [
            "soap-validate.toml",
            "soap-validate.json",
            ".soap-validate.toml",
            ".soap-validate.json",
        ];

        for name in &config_names {
            let path = PathBuf::from(name);
            if path.exists() {
                return Ok(Some(Self::load_from_file(&path).await?));
            }
        }

        if let Some(config_dir) = dirs::config_dir() {
            let app_config_dir = config_dir.join("soap-validate");
            for name in &config_names {
                let path = app_config_dir.join(name);
                if path.exists() {
                    return Ok(Some(Self::load_from_file(&path).await?));
                }
            }
        }

        Ok(None)
    }

    /// Apply environment variable overrides using the system environment
    pub fn apply_environment_overrides(config: Config) -> Result<Config> {
        Self::apply_environment_overrides_with(&SystemEnvProvider, config)
    }

    /// Apply environment variable overrides with a custom environment provider
    pub fn apply_environment_overrides_with(
        env: &impl EnvProvider,
        mut config: Config,
    ) -> Result<Config> {
        if let Some(root) = env.get("SOAP_VALIDATE_REGISTRY") {
            config.registry.root = PathBuf::from(root);
        }

        // Cache settings
        if let Some(max) = parse_env(env, "SOAP_VALIDATE_CACHE_MAX_SERVICE_MODELS")? {
            config.cache.max_service_models = Some(max);
        }
        if let Some(max) = parse_env(env, "SOAP_VALIDATE_CACHE_MAX_SCHEMAS")? {
            config.cache.max_schemas = Some(max);
        }
        if let Some(ttl) = parse_env(env, "SOAP_VALIDATE_CACHE_TTL")? {
            config.cache.ttl_seconds = Some(ttl);
        }

        // Network settings
        if let Some(timeout) = parse_env(env, "SOAP_VALIDATE_TIMEOUT")? {
            config.network.timeout_seconds = timeout;
        }
        if let Some(attempts) = parse_env(env, "SOAP_VALIDATE_RETRY_ATTEMPTS")? {
            config.network.retry_attempts = attempts;
        }
        if let Some(delay) = parse_env(env, "SOAP_VALIDATE_RETRY_DELAY_MS")? {
            config.network.retry_delay_ms = delay;
        }

        if let Some(details) = parse_env(env, "SOAP_VALIDATE_FAULT_DETAILS")? {
            config.fault.include_details = details;
        }

        // Logging settings
        if let Some(level) = env.get("SOAP_VALIDATE_LOG_LEVEL") {
            config.logging.level = level.to_lowercase();
        }
        if let Some(format) = parse_env(env, "SOAP_VALIDATE_LOG_FORMAT")? {
            config.logging.format = format;
        }

        Ok(config)
    }

    /// Merge CLI arguments with configuration (CLI takes precedence)
    ///
    /// Only flags actually given on the command line override.
    pub fn merge_with_cli(mut config: Config, cli: &Cli) -> Config {
        if let Some(registry) = &cli.registry {
            config.registry.root = registry.clone();
        }
        if let Some(timeout) = cli.timeout {
            config.network.timeout_seconds = timeout;
        }
        if cli.fault_details {
            config.fault.include_details = true;
        }
        if cli.verbose {
            config.logging.level = "debug".to_string();
        } else if cli.quiet {
            config.logging.level = "error".to_string();
        }

        config
    }

    /// Validate configuration values
    pub fn validate_config(config: &Config) -> Result<()> {
        if config.cache.max_service_models == Some(0) {
            return Err(ConfigError::Validation(
                "Service model cache capacity must be greater than 0".to_string(),
            ));
        }
        if config.cache.max_schemas == Some(0) {
            return Err(ConfigError::Validation(
                "Schema cache capacity must be greater than 0".to_string(),
            ));
        }
        if config.cache.ttl_seconds == Some(0) {
            return Err(ConfigError::Validation(
                "Cache TTL must be greater than 0".to_string(),
            ));
        }

        if config.network.timeout_seconds == 0 {
            return Err(ConfigError::Validation(
                "Timeout must be greater than 0".to_string(),
            ));
        }
        if config.network.retry_attempts > 10 {
            return Err(ConfigError::Validation(
                "Retry attempts cannot exceed 10".to_string(),
            ));
        }
        if config.network.max_retry_delay_ms < config.network.retry_delay_ms {
            return Err(ConfigError::Validation(
                "Maximum retry delay cannot be lower than the retry delay".to_string(),
            ));
        }

        if !LOG_LEVELS.contains(&config.logging.level.to_lowercase().as_str()) {
            return Err(ConfigError::Validation(format!(
                "Unknown log level: {}",
                config.logging.level
            )));
        }

        Ok(())
    }
}

fn parse_env<T: FromStr>(env: &impl EnvProvider, key: &str) -> Result<Option<T>> {
    env.get(key)
        .map(|value| {
            value
                .trim()
                .parse()
                .map_err(|_| ConfigError::Environment(format!("Invalid {} value: {}", key, value)))
        })
        .transpose()
}
