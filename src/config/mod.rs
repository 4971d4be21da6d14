//! Application configuration.
//!
//! Config structs deserialize from a YAML file and prefixed environment
//! variables; every field has a sensible default so tests and embedded
//! callers can use `Config::default()` directly.

use serde::Deserialize;

/// Default configuration file name.
pub const DEFAULT_CONFIG_FILE: &str = "config.yaml";
/// Environment variable for configuration file path.
pub const CONFIG_ENV_VAR: &str = "TOMBOLA_CONFIG";
/// Prefix for configuration environment variables.
pub const CONFIG_ENV_PREFIX: &str = "TOMBOLA";
/// Environment variable for logging configuration.
pub const LOG_ENV_VAR: &str = "TOMBOLA_LOG";

/// Operational limits and timers.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Limits {
    /// How long a reservation holds a number, in seconds.
    pub reservation_ttl_secs: i64,
    /// Maximum numbers a user may reserve per campaign.
    pub max_reserved_numbers: usize,
    /// Pending purchases older than this are swept to expired, in seconds.
    pub pending_purchase_ttl_secs: i64,
    /// Minimum gap between successful draws, in seconds.
    pub draw_cooldown_secs: i64,
    /// Maximum bonus winners per draw.
    pub max_bonus_winners: usize,
    /// Free-ticket count at or below which availability reports low stock.
    pub low_stock_threshold: i64,
    /// Maximum tickets per purchase.
    pub max_tickets_per_purchase: i64,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            reservation_ttl_secs: 600,
            max_reserved_numbers: 10,
            pending_purchase_ttl_secs: 1800,
            draw_cooldown_secs: 3600,
            max_bonus_winners: 10,
            low_stock_threshold: 3,
            max_tickets_per_purchase: 1000,
        }
    }
}

/// Background sweep configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SweeperConfig {
    /// Seconds between sweep passes.
    pub interval_secs: u64,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self { interval_secs: 300 }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// SQLite connection string.
    pub database_url: String,
    /// Maximum pooled connections.
    pub max_connections: u32,
    /// Wallet currency code.
    pub currency: String,
    /// Operational limits.
    pub limits: Limits,
    /// Background sweeps.
    pub sweeper: SweeperConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: "sqlite::memory:".to_string(),
            max_connections: 5,
            currency: "CDF".to_string(),
            limits: Limits::default(),
            sweeper: SweeperConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from file and environment.
    ///
    /// Sources, later overriding earlier:
    /// 1. `config.yaml` in the current directory (if present)
    /// 2. File given by `path` (if provided)
    /// 3. File named by `TOMBOLA_CONFIG` (if set)
    /// 4. Environment variables with the `TOMBOLA` prefix
    pub fn load(path: Option<&str>) -> Result<Self, Box<dyn std::error::Error>> {
        use ::config::{Config as ConfigLib, Environment, File, FileFormat};

        let mut builder = ConfigLib::builder()
            .add_source(File::new(DEFAULT_CONFIG_FILE, FileFormat::Yaml).required(false));

        if let Some(config_path) = path {
            builder = builder.add_source(File::new(config_path, FileFormat::Yaml).required(true));
        }

        if let Ok(config_path) = std::env::var(CONFIG_ENV_VAR) {
            builder = builder.add_source(File::new(&config_path, FileFormat::Yaml).required(true));
        }

        let config = builder
            .add_source(
                Environment::with_prefix(CONFIG_ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Config = config.try_deserialize()?;
        Ok(config)
    }

    /// Create config for testing.
    pub fn for_test() -> Self {
        Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_limits_default() {
        let limits = Limits::default();
        assert_eq!(limits.reservation_ttl_secs, 600);
        assert_eq!(limits.max_reserved_numbers, 10);
        assert_eq!(limits.pending_purchase_ttl_secs, 1800);
        assert_eq!(limits.draw_cooldown_secs, 3600);
        assert_eq!(limits.max_bonus_winners, 10);
        assert_eq!(limits.low_stock_threshold, 3);
    }

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.database_url, "sqlite::memory:");
        assert_eq!(config.currency, "CDF");
        assert_eq!(config.sweeper.interval_secs, 300);
    }
}
