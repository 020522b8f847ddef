//! Configuration management for the Delivery Lifecycle Management service
//!
//! Supports hierarchical configuration loading:
//! 1. Default values in code
//! 2. Configuration files (development.toml, production.toml)
//! 3. Environment variable overrides with DLM_ prefix

use config::{ConfigError, Environment, File};
use rust_decimal::Decimal;
use serde::Deserialize;
use shared::TransitionPolicy;

/// Main application configuration
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// Current environment (development, production)
    pub environment: String,

    /// Server configuration
    pub server: ServerConfig,

    /// Database configuration
    pub database: DatabaseConfig,

    /// JWT authentication configuration
    pub jwt: JwtConfig,

    /// Log output configuration
    pub logging: LoggingConfig,

    /// Delivery order behaviour
    pub delivery: DeliveryConfig,

    /// Invoice defaults
    pub invoicing: InvoicingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    /// Server port
    pub port: u16,

    /// Server host
    pub host: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL
    pub url: String,

    /// Maximum number of connections in the pool
    pub max_connections: u32,

    /// Minimum number of connections in the pool
    pub min_connections: u32,

    /// Apply pending migrations at startup outside development
    pub run_migrations: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct JwtConfig {
    /// Secret key used to verify bearer tokens
    pub secret: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    /// Emit JSON log lines instead of human readable output
    pub json: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DeliveryConfig {
    /// Validate status changes against the forward transition table.
    ///
    /// Off by default: tracking events overwrite the status unconditionally.
    pub strict_transitions: bool,

    /// Tracking events embedded in an order detail response
    pub tracking_page_size: u32,
}

impl DeliveryConfig {
    pub fn transition_policy(&self) -> TransitionPolicy {
        TransitionPolicy::from_strict_flag(self.strict_transitions)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct InvoicingConfig {
    /// Tax rate applied when a request does not specify one (0.18 = 18%)
    pub default_tax_rate: Decimal,

    /// Days between invoice date and default due date
    pub payment_terms_days: u32,
}

impl Config {
    /// Load configuration from files and environment variables
    pub fn load() -> Result<Self, ConfigError> {
        let environment = std::env::var("DLM_ENVIRONMENT").unwrap_or_else(|_| "development".into());

        let config = config::Config::builder()
            // Start with default values
            .set_default("environment", environment.clone())?
            .set_default("server.port", 3000)?
            .set_default("server.host", "0.0.0.0")?
            .set_default("database.max_connections", 10)?
            .set_default("database.min_connections", 2)?
            .set_default("database.run_migrations", false)?
            .set_default("logging.json", false)?
            .set_default("delivery.strict_transitions", false)?
            .set_default("delivery.tracking_page_size", 50)?
            .set_default(
                "invoicing.default_tax_rate",
                shared::default_tax_rate().to_string(),
            )?
            .set_default("invoicing.payment_terms_days", 30)?
            // Load environment-specific config file
            .add_source(File::with_name(&format!("config/{}", environment)).required(false))
            // Override with environment variables (DLM_ prefix)
            .add_source(
                Environment::with_prefix("DLM")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Config = config.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.jwt.secret.len() < 32 {
            return Err(ConfigError::Message(
                "jwt.secret must be at least 32 characters".to_string(),
            ));
        }
        if shared::validate_tax_rate(self.invoicing.default_tax_rate).is_err() {
            return Err(ConfigError::Message(
                "invoicing.default_tax_rate must be between 0 and 1".to_string(),
            ));
        }
        if self.delivery.tracking_page_size == 0 || self.delivery.tracking_page_size > shared::MAX_PAGE_SIZE {
            return Err(ConfigError::Message(format!(
                "delivery.tracking_page_size must be between 1 and {}",
                shared::MAX_PAGE_SIZE
            )));
        }
        Ok(())
    }

    /// Whether migrations should run at startup
    pub fn should_run_migrations(&self) -> bool {
        self.environment == "development" || self.database.run_migrations
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 3000,
            host: "0.0.0.0".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_config() -> Config {
        Config {
            environment: "test".to_string(),
            server: ServerConfig::default(),
            database: DatabaseConfig {
                url: "postgres://localhost/dlm_test".to_string(),
                max_connections: 5,
                min_connections: 1,
                run_migrations: false,
            },
            jwt: JwtConfig {
                secret: "a-test-secret-that-is-long-enough-0123".to_string(),
            },
            logging: LoggingConfig { json: false },
            delivery: DeliveryConfig {
                strict_transitions: false,
                tracking_page_size: 50,
            },
            invoicing: InvoicingConfig {
                default_tax_rate: shared::default_tax_rate(),
                payment_terms_days: 30,
            },
        }
    }

    #[test]
    fn test_sample_config_is_valid() {
        assert!(sample_config().validate().is_ok());
    }

    #[test]
    fn test_short_jwt_secret_rejected() {
        let mut config = sample_config();
        config.jwt.secret = "short".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_tax_rate_default_follows_invoicing_rule() {
        let raw = shared::default_tax_rate().to_string();
        assert_eq!(raw.parse::<Decimal>().unwrap(), shared::default_tax_rate());
        assert_eq!(sample_config().invoicing.default_tax_rate, shared::default_tax_rate());
    }

    #[test]
    fn test_tax_rate_out_of_range_rejected() {
        let mut config = sample_config();
        config.invoicing.default_tax_rate = Decimal::from(2);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_transition_policy_follows_flag() {
        let mut config = sample_config();
        assert_eq!(config.delivery.transition_policy(), TransitionPolicy::Permissive);
        config.delivery.strict_transitions = true;
        assert_eq!(config.delivery.transition_policy(), TransitionPolicy::Strict);
    }

    #[test]
    fn test_migrations_run_in_development() {
        let mut config = sample_config();
        assert!(!config.should_run_migrations());
        config.environment = "development".to_string();
        assert!(config.should_run_migrations());
    }
}
