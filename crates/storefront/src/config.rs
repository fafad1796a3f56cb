//! Configuration loading and management

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use storefront_auth::AuthConfig;
use tracing::info;

pub const SECRET_KEY_ENV: &str = "STOREFRONT_JWT_SECRET_KEY";
pub const ADMIN_KEY_ENV: &str = "STOREFRONT_JWT_ADMIN_KEY";
pub const API_KEY_ENV: &str = "STOREFRONT_JWT_API_KEY";

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub auth: AuthConfig,
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

impl DatabaseConfig {
    pub fn url(&self) -> String {
        format!("sqlite:{}?mode=rwc", self.path)
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    /// `pretty` or `json`
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

fn default_db_path() -> String {
    "./data/storefront.db".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Config {
    /// Load configuration from a file, then apply secret overrides from
    /// the environment
    pub fn load(path: &str) -> Result<Self> {
        let mut config = Self::load_file(path)?;
        config.apply_overrides(|name| std::env::var(name).ok());
        Ok(config)
    }

    fn load_file(path: &str) -> Result<Self> {
        let config_path = Path::new(path);

        if !config_path.exists() {
            info!("Config file not found at {}, using defaults", path);
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config file: {}", path))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path))?;

        info!("Loaded configuration from {}", path);
        Ok(config)
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let slots = [
            (SECRET_KEY_ENV, &mut self.auth.secret_key),
            (ADMIN_KEY_ENV, &mut self.auth.admin_key),
            (API_KEY_ENV, &mut self.auth.api_key),
        ];
        for (name, slot) in slots {
            if let Some(value) = lookup(name).filter(|v| !v.is_empty()) {
                info!("Using {} from the environment", name);
                *slot = value;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn test_missing_file_uses_defaults() {
        let config = Config::load_file("/nonexistent/storefront.toml").unwrap();
        assert_eq!(config.database.path, "./data/storefront.db");
        assert_eq!(config.logging.format, "pretty");
        assert_eq!(config.auth.access_expires_secs, 86400);
        assert!(config.auth.secret_key.is_empty());
    }

    #[test]
    fn test_parse_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
[database]
path = "/tmp/shop.db"

[logging]
level = "debug"
format = "json"

[auth]
secret_key = "s1"
admin_key = "s2"
api_key = "s3"
access_expires_secs = 900

[[auth.roles]]
id = 0
title = "customer"

[[auth.roles]]
id = 1
title = "admin"

[[auth.roles]]
id = 2
title = "staff"
"#
        )
        .unwrap();

        let config = Config::load_file(file.path().to_str().unwrap()).unwrap();
        assert_eq!(config.database.url(), "sqlite:/tmp/shop.db?mode=rwc");
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.logging.format, "json");
        assert_eq!(config.auth.access_expires_secs, 900);
        assert_eq!(config.auth.refresh_expires_secs, 604800);
        assert_eq!(config.auth.roles.len(), 3);
        assert_eq!(config.auth.roles[2].title, "staff");
    }

    #[test]
    fn test_parse_error_is_reported() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "[auth\nsecret_key = ").unwrap();
        assert!(Config::load_file(file.path().to_str().unwrap()).is_err());
    }

    #[test]
    fn test_env_overrides_secrets() {
        let env: HashMap<&str, &str> = [(SECRET_KEY_ENV, "from-env"), (API_KEY_ENV, "")]
            .into_iter()
            .collect();

        let mut config = Config::default();
        config.auth.api_key = "from-file".to_string();
        config.apply_overrides(|name| env.get(name).map(|v| v.to_string()));

        assert_eq!(config.auth.secret_key, "from-env");
        assert!(config.auth.admin_key.is_empty());
        // Empty values do not clobber the file
        assert_eq!(config.auth.api_key, "from-file");
    }
}
