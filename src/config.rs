use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::Path;

/// Main configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub catalog: CatalogConfig,
    pub broker: BrokerConfig,
    pub execution: ExecutionConfig,
    pub database: DatabaseConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CatalogConfig {
    /// REST endpoint of the pocket catalog service
    pub base_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BrokerConfig {
    /// REST endpoint of the broker gateway
    pub base_url: String,
    /// API key for signed requests
    #[serde(default)]
    pub api_key: Option<String>,
    /// API secret for signed requests
    #[serde(default)]
    pub api_secret: Option<String>,
    /// Product code placed on every order, fixed by the account type
    /// (e.g. "CNC" for delivery accounts)
    #[serde(default = "default_product")]
    pub product: String,
    /// Simulate placements and completions instead of calling the broker
    #[serde(default)]
    pub dry_run: bool,
}

fn default_product() -> String {
    "CNC".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExecutionConfig {
    /// Seconds to wait after the last placement before polling the broker's
    /// completed-order feed. IOC market orders are assumed terminal by then.
    #[serde(default = "default_settle_interval")]
    pub settle_interval_secs: u64,
}

fn default_settle_interval() -> u64 {
    5
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            settle_interval_secs: default_settle_interval(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL
    pub url: String,
    /// Maximum connections in pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 {
    5
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Enable JSON formatted logs
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl AppConfig {
    /// Load configuration from files and environment
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from("config")
    }

    /// Load configuration from a specific directory
    pub fn load_from<P: AsRef<Path>>(config_dir: P) -> Result<Self, ConfigError> {
        let config_dir = config_dir.as_ref();

        let builder = Config::builder()
            // Start with default values
            .set_default("logging.level", "info")?
            .set_default("logging.json", false)?
            .set_default("execution.settle_interval_secs", 5)?
            .set_default("database.max_connections", 5)?
            // Load default config file
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            // Load environment-specific config (e.g., config/production.toml)
            .add_source(
                File::from(config_dir.join(
                    std::env::var("POCKETS_ENV").unwrap_or_else(|_| "development".to_string()),
                ))
                .required(false),
            )
            // Override with environment variables (POCKETS_BROKER__BASE_URL, etc.)
            .add_source(
                Environment::with_prefix("POCKETS")
                    .separator("__")
                    .try_parsing(true),
            );

        builder.build()?.try_deserialize()
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.catalog.base_url.is_empty() {
            errors.push("catalog.base_url must be set".to_string());
        }

        if self.broker.base_url.is_empty() {
            errors.push("broker.base_url must be set".to_string());
        }

        if self.broker.product.is_empty() {
            errors.push("broker.product must be set".to_string());
        }

        if !self.broker.dry_run
            && (self.broker.api_key.is_none() || self.broker.api_secret.is_none())
        {
            errors.push("broker.api_key and broker.api_secret are required outside dry_run".to_string());
        }

        if self.database.url.is_empty() {
            errors.push("database.url must be set".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}
