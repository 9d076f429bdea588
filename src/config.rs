use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::env;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub scraper: ScraperConfig,
    pub sessions: SessionsConfig,
    pub storage: StorageConfig,
    pub batch: BatchConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScraperConfig {
    pub headless: bool,
    pub default_timeout_secs: u64,
    /// Uniform random pause before each navigation, milliseconds.
    pub pre_nav_delay_ms: (u64, u64),
    /// Grace period before re-checking a suspected challenge page.
    pub challenge_settle_ms: u64,
    pub idle_browser_timeout_secs: u64,
    pub chrome_path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionsConfig {
    /// Directory holding per-site session JSON files.
    pub root: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub database_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchConfig {
    /// Uniform random delay between batch items, milliseconds.
    pub delay_range_ms: (u64, u64),
}

impl Default for ScraperConfig {
    fn default() -> Self {
        Self {
            headless: true,
            default_timeout_secs: 45,
            pre_nav_delay_ms: (500, 2_500),
            challenge_settle_ms: 4_000,
            idle_browser_timeout_secs: 300,
            chrome_path: None,
        }
    }
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            root: "data/sessions".to_string(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite:data/moda.db?mode=rwc".to_string(),
        }
    }
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            delay_range_ms: (3_000, 9_000),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            scraper: ScraperConfig::default(),
            sessions: SessionsConfig::default(),
            storage: StorageConfig::default(),
            batch: BatchConfig::default(),
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let s = Config::builder()
            // Start with default configuration
            .add_source(File::with_name("config/default"))
            // Add environment-specific config
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            // Add local config (ignored by git)
            .add_source(File::with_name("config/local").required(false))
            // Add environment variables with prefix "MODA_"
            .add_source(Environment::with_prefix("MODA").separator("__"))
            .build()?;

        let mut config: AppConfig = s.try_deserialize()?;

        // Add Chrome path from environment if not set
        if config.scraper.chrome_path.is_none() {
            config.scraper.chrome_path = env::var("CHROME_PATH").ok();
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.scraper.default_timeout_secs == 0 {
            return Err(ConfigError::Message(
                "Scraper default_timeout_secs must be greater than 0".into(),
            ));
        }

        let (nav_min, nav_max) = self.scraper.pre_nav_delay_ms;
        if nav_min > nav_max {
            return Err(ConfigError::Message(
                "Scraper pre_nav_delay_ms minimum cannot exceed maximum".into(),
            ));
        }

        let (batch_min, batch_max) = self.batch.delay_range_ms;
        if batch_min > batch_max {
            return Err(ConfigError::Message(
                "Batch delay_range_ms minimum cannot exceed maximum".into(),
            ));
        }

        if self.sessions.root.trim().is_empty() {
            return Err(ConfigError::Message(
                "Sessions root directory must not be empty".into(),
            ));
        }

        if self.storage.database_url.trim().is_empty() {
            return Err(ConfigError::Message(
                "Storage database_url must not be empty".into(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(AppConfig::default().validate().is_ok());
    }

    #[test]
    fn test_validation_zero_timeout() {
        let mut config = AppConfig::default();
        config.scraper.default_timeout_secs = 0;

        let result = config.validate();
        assert!(result.is_err());
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("default_timeout_secs must be greater than 0"));
    }

    #[test]
    fn test_validation_inverted_delay_range() {
        let mut config = AppConfig::default();
        config.batch.delay_range_ms = (9_000, 3_000);

        let result = config.validate();
        assert!(result.is_err());
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("minimum cannot exceed maximum"));
    }

    #[test]
    fn test_validation_empty_sessions_root() {
        let mut config = AppConfig::default();
        config.sessions.root = "  ".to_string();

        assert!(config.validate().is_err());
    }
}
