/*!
 * Configuration management for garagelink.
 *
 * This module loads the account credentials, brand selector and polling
 * settings from defaults, an optional file and the environment, and
 * validates them. Every validation failure is fatal at startup.
 */
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use config::{Config as ConfigLib, Environment, File};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{Error, Result};

/// Environment variable prefix used by [`ConfigBuilder::from_env`]
pub const ENV_PREFIX: &str = "GARAGELINK";

/// Top-level garagelink configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Cloud account configuration
    #[serde(default)]
    pub account: AccountConfig,

    /// Polling configuration
    #[serde(default)]
    pub polling: PollingConfig,

    /// Controller node configuration
    #[serde(default)]
    pub controller: ControllerConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Cloud account credentials and opener brand
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct AccountConfig {
    /// Account username
    #[serde(default)]
    pub username: String,

    /// Account password
    #[serde(default)]
    pub password: String,

    /// Brand selector, one of the values of [`Brand`]
    #[serde(default)]
    pub brand: String,
}

impl fmt::Debug for AccountConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccountConfig")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("brand", &self.brand)
            .finish()
    }
}

/// Polling configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollingConfig {
    /// Seconds between snapshot refreshes
    #[serde(default = "default_short_poll_secs")]
    pub short_poll_secs: u64,

    /// Seconds between session revalidations
    #[serde(default = "default_long_poll_secs")]
    pub long_poll_secs: u64,

    /// Attempts per cloud operation, including the first one
    #[serde(default = "default_max_attempts")]
    pub max_attempts: usize,
}

/// Controller node configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerConfig {
    /// Node address of the controller in the hub
    #[serde(default = "default_controller_address")]
    pub address: String,

    /// Display name of the controller node
    #[serde(default = "default_controller_name")]
    pub name: String,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            short_poll_secs: default_short_poll_secs(),
            long_poll_secs: default_long_poll_secs(),
            max_attempts: default_max_attempts(),
        }
    }
}

impl PollingConfig {
    /// Interval between snapshot refreshes
    pub fn short_interval(&self) -> Duration {
        Duration::from_secs(self.short_poll_secs)
    }

    /// Interval between session revalidations
    pub fn long_interval(&self) -> Duration {
        Duration::from_secs(self.long_poll_secs)
    }
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            address: default_controller_address(),
            name: default_controller_name(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_short_poll_secs() -> u64 {
    10
}

fn default_long_poll_secs() -> u64 {
    30
}

fn default_max_attempts() -> usize {
    2
}

fn default_controller_address() -> String {
    "garagectrl".to_string()
}

fn default_controller_name() -> String {
    "Garage Controller".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Garage door opener brands accepted by the cloud service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Brand {
    /// LiftMaster
    Liftmaster,
    /// Chamberlain
    Chamberlain,
    /// Craftsman
    Craftsman,
    /// Merlin
    Merlin,
}

impl Brand {
    /// Every accepted brand
    pub const ALL: [Brand; 4] = [
        Brand::Liftmaster,
        Brand::Chamberlain,
        Brand::Craftsman,
        Brand::Merlin,
    ];

    /// Lowercase name as written in configuration
    pub fn as_str(&self) -> &'static str {
        match self {
            Brand::Liftmaster => "liftmaster",
            Brand::Chamberlain => "chamberlain",
            Brand::Craftsman => "craftsman",
            Brand::Merlin => "merlin",
        }
    }
}

impl fmt::Display for Brand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Brand {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Brand::ALL
            .iter()
            .copied()
            .find(|brand| brand.as_str() == s)
            .ok_or_else(|| {
                Error::config(format!(
                    "Invalid brand specified: {}, valid options are: liftmaster, chamberlain, craftsman, merlin",
                    s
                ))
            })
    }
}

impl Config {
    /// Parse a configuration from TOML text without validating it
    pub fn from_toml_str(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Check that credentials, brand and polling settings are usable
    pub fn validate(&self) -> Result<()> {
        if self.account.username.trim().is_empty() {
            return Err(Error::config(
                "Please specify the username parameter in the configuration",
            ));
        }
        if self.account.password.is_empty() {
            return Err(Error::config(
                "Please specify the password parameter in the configuration",
            ));
        }
        if self.account.brand.trim().is_empty() {
            return Err(Error::config(
                "Please specify the brand parameter in the configuration",
            ));
        }
        self.brand()?;

        if self.polling.short_poll_secs == 0 || self.polling.long_poll_secs == 0 {
            return Err(Error::config("Poll intervals must be at least one second"));
        }
        if self.polling.max_attempts == 0 {
            return Err(Error::config("max_attempts must be at least 1"));
        }
        if self.controller.address.is_empty() {
            return Err(Error::config("Controller address must not be empty"));
        }

        Ok(())
    }

    /// The configured brand
    pub fn brand(&self) -> Result<Brand> {
        self.account.brand.parse()
    }
}

/// A builder for creating a configuration
#[derive(Debug, Default)]
pub struct ConfigBuilder {
    config_file: Option<String>,
    environment_prefix: Option<String>,
    override_with: Option<Config>,
}

impl ConfigBuilder {
    /// Create a new ConfigBuilder
    pub fn new() -> Self {
        Self::default()
    }

    /// A builder reading `GARAGELINK__SECTION__KEY` environment variables
    pub fn from_env() -> Self {
        Self::new().with_environment_prefix(ENV_PREFIX)
    }

    /// Set the config file path
    pub fn with_config_file<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_file = Some(path.as_ref().to_string_lossy().to_string());
        self
    }

    /// Set the environment variable prefix for configuration
    pub fn with_environment_prefix<S: AsRef<str>>(mut self, prefix: S) -> Self {
        self.environment_prefix = Some(prefix.as_ref().to_string());
        self
    }

    /// Override with an existing config
    pub fn override_with(mut self, config: Config) -> Self {
        self.override_with = Some(config);
        self
    }

    /// Build the configuration without validating it
    pub fn build_unvalidated(self) -> Result<Config> {
        if let Some(config) = self.override_with {
            return Ok(config);
        }

        let mut config_builder = ConfigLib::builder()
            .add_source(ConfigLib::try_from(&Config::default())?);

        if let Some(config_file) = self.config_file {
            let path = Path::new(&config_file);
            if path.exists() {
                debug!("Loading configuration from {}", config_file);
                config_builder = config_builder.add_source(File::with_name(&config_file));
            } else {
                debug!("Configuration file {} does not exist, using defaults", config_file);
            }
        }

        if let Some(prefix) = self.environment_prefix {
            debug!("Loading configuration from environment variables with prefix {}", prefix);
            config_builder = config_builder.add_source(
                Environment::with_prefix(&prefix)
                    .separator("__")
                    .try_parsing(true),
            );
        }

        let config: Config = config_builder
            .build()
            .map_err(|e| Error::config(format!("Failed to build configuration: {}", e)))?
            .try_deserialize()
            .map_err(|e| Error::config(format!("Failed to deserialize configuration: {}", e)))?;

        Ok(config)
    }

    /// Build and validate the configuration
    pub fn build(self) -> Result<Config> {
        let config = self.build_unvalidated()?;
        config.validate()?;
        info!(
            brand = %config.account.brand,
            user = %config.account.username,
            "Configuration loaded successfully"
        );
        Ok(config)
    }
}

/// A thread-safe reference to a configuration
#[derive(Debug, Clone)]
pub struct SharedConfig(Arc<Config>);

impl SharedConfig {
    /// Create a new SharedConfig
    pub fn new(config: Config) -> Self {
        Self(Arc::new(config))
    }

    /// Get a reference to the config
    pub fn get(&self) -> &Config {
        &self.0
    }
}

impl From<Config> for SharedConfig {
    fn from(config: Config) -> Self {
        Self::new(config)
    }
}

impl AsRef<Config> for SharedConfig {
    fn as_ref(&self) -> &Config {
        self.get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::fs::File;
    use std::io::Write;
    use tempfile::tempdir;

    fn valid() -> Config {
        let mut config = Config::default();
        config.account.username = "user@example.com".to_string();
        config.account.password = "hunter2".to_string();
        config.account.brand = "chamberlain".to_string();
        config
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.polling.short_poll_secs, 10);
        assert_eq!(config.polling.long_poll_secs, 30);
        assert_eq!(config.polling.max_attempts, 2);
        assert_eq!(config.controller.address, "garagectrl");
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_defaults_are_not_startable() {
        assert!(matches!(Config::default().validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_missing_parameters() {
        let mut config = valid();
        config.account.username.clear();
        assert!(config.validate().unwrap_err().to_string().contains("username"));

        let mut config = valid();
        config.account.password.clear();
        assert!(config.validate().unwrap_err().to_string().contains("password"));

        let mut config = valid();
        config.account.brand.clear();
        assert!(config.validate().unwrap_err().to_string().contains("brand"));
    }

    #[test]
    fn test_invalid_brand() {
        let mut config = valid();
        config.account.brand = "genie".to_string();
        let err = config.validate().unwrap_err();
        assert!(err.is_fatal());
        assert!(err.to_string().contains("Invalid brand specified: genie"));
    }

    #[test]
    fn test_brand_is_case_sensitive() {
        assert!("Chamberlain".parse::<Brand>().is_err());
        assert_eq!("merlin".parse::<Brand>().unwrap(), Brand::Merlin);
        for brand in Brand::ALL {
            assert_eq!(brand.as_str().parse::<Brand>().unwrap(), brand);
        }
    }

    #[test]
    fn test_zero_attempts_rejected() {
        let mut config = valid();
        config.polling.max_attempts = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_password_is_redacted() {
        let rendered = format!("{:?}", valid().account);
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("<redacted>"));
    }

    #[test]
    fn test_from_toml_str() -> Result<()> {
        let config = Config::from_toml_str(
            r#"
                [account]
                username = "me"
                password = "secret"
                brand = "liftmaster"

                [polling]
                short_poll_secs = 5
            "#,
        )?;
        config.validate()?;
        assert_eq!(config.brand()?, Brand::Liftmaster);
        assert_eq!(config.polling.short_interval(), Duration::from_secs(5));
        assert_eq!(config.polling.long_interval(), Duration::from_secs(30));
        Ok(())
    }

    #[test]
    fn test_config_builder_with_file() -> Result<()> {
        let dir = tempdir()?;
        let file_path = dir.path().join("garagelink.toml");

        {
            let mut file = File::create(&file_path)?;
            file.write_all(
                br#"
                [account]
                username = "file-user"
                password = "file-pass"
                brand = "craftsman"

                [controller]
                address = "myctrl"
            "#,
            )?;
        }

        let config = ConfigBuilder::new().with_config_file(&file_path).build()?;

        assert_eq!(config.account.username, "file-user");
        assert_eq!(config.brand()?, Brand::Craftsman);
        assert_eq!(config.controller.address, "myctrl");
        assert_eq!(config.polling.max_attempts, 2);

        Ok(())
    }

    #[test]
    fn test_config_builder_missing_file_fails_validation() {
        let result = ConfigBuilder::new()
            .with_config_file("/nonexistent/garagelink.toml")
            .build();
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_config_builder_with_env() -> Result<()> {
        env::set_var("GLTEST__ACCOUNT__USERNAME", "env-user");
        env::set_var("GLTEST__ACCOUNT__PASSWORD", "env-pass");
        env::set_var("GLTEST__ACCOUNT__BRAND", "merlin");

        let config = ConfigBuilder::new()
            .with_environment_prefix("GLTEST")
            .build()?;

        assert_eq!(config.account.username, "env-user");
        assert_eq!(config.brand()?, Brand::Merlin);

        env::remove_var("GLTEST__ACCOUNT__USERNAME");
        env::remove_var("GLTEST__ACCOUNT__PASSWORD");
        env::remove_var("GLTEST__ACCOUNT__BRAND");

        Ok(())
    }

    #[test]
    fn test_override_skips_sources() -> Result<()> {
        let config = ConfigBuilder::from_env().override_with(valid()).build()?;
        assert_eq!(config.account.username, "user@example.com");
        Ok(())
    }

    #[test]
    fn test_shared_config() {
        let shared = SharedConfig::new(valid());
        let shared2 = shared.clone();
        assert_eq!(shared2.get().account.brand, "chamberlain");
    }
}
