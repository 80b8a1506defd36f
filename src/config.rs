use anyhow::{Context, Result, bail};
use dotenvy::dotenv;
use std::env;
use std::str::FromStr;

#[derive(Clone, Debug)]
pub struct Config {
    pub database_url: String,
    pub jwt_secret: String,
    pub server_addr: String,
    pub db_max_connections: u32,
    pub run_migrations: bool,

    // Rate limiting
    pub rate_protected_per_min: u32,

    pub api_prefix: String,

    // Attendance
    pub default_edit_window_minutes: u32,
    pub policy_cache_ttl_secs: u64,

    // Logging
    pub log_dir: String,
    pub log_level: tracing::Level,
}

fn required(key: &str) -> Result<String> {
    env::var(key).with_context(|| format!("{} must be set", key))
}

fn optional<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|e| anyhow::anyhow!("{} has an invalid value '{}': {}", key, raw, e)),
        Err(_) => Ok(default),
    }
}

impl Config {
    pub const MEMORY_DATABASE: &'static str = "memory:";

    pub fn from_env() -> Result<Self> {
        dotenv().ok();

        let config = Self {
            server_addr: required("SERVER_ADDR")?,
            database_url: required("DATABASE_URL")?,
            jwt_secret: required("JWT_SECRET")?,
            db_max_connections: optional("DB_MAX_CONNECTIONS", 10)?,
            run_migrations: optional("RUN_MIGRATIONS", true)?,

            rate_protected_per_min: optional("RATE_PROTECTED_PER_MIN", 1000)?,

            api_prefix: env::var("API_PREFIX").unwrap_or_else(|_| "/api".to_string()),

            default_edit_window_minutes: optional("DEFAULT_EDIT_WINDOW_MINUTES", 30)?,
            policy_cache_ttl_secs: optional("POLICY_CACHE_TTL_SECS", 300)?,

            log_dir: env::var("LOG_DIR").unwrap_or_else(|_| "logs".to_string()),
            log_level: optional("LOG_LEVEL", tracing::Level::DEBUG)?,
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.jwt_secret.len() < 16 {
            bail!("JWT_SECRET must be at least 16 characters");
        }
        if self.rate_protected_per_min == 0 {
            bail!("RATE_PROTECTED_PER_MIN must be greater than 0");
        }
        if !(1..=10_080).contains(&self.default_edit_window_minutes) {
            bail!("DEFAULT_EDIT_WINDOW_MINUTES must be between 1 and 10080");
        }
        if !self.api_prefix.starts_with('/') {
            bail!("API_PREFIX must start with '/'");
        }
        Ok(())
    }

    pub fn uses_memory_store(&self) -> bool {
        self.database_url == Self::MEMORY_DATABASE
    }

    /// Settings for tests and local tooling; never read from the environment.
    pub fn for_tests(jwt_secret: &str) -> Self {
        Self {
            database_url: Self::MEMORY_DATABASE.to_string(),
            jwt_secret: jwt_secret.to_string(),
            server_addr: "127.0.0.1:0".to_string(),
            db_max_connections: 1,
            run_migrations: false,
            rate_protected_per_min: 1000,
            api_prefix: "/api".to_string(),
            default_edit_window_minutes: 30,
            policy_cache_ttl_secs: 300,
            log_dir: "logs".to_string(),
            log_level: tracing::Level::DEBUG,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_is_valid() {
        let config = Config::for_tests("a-long-enough-test-secret");
        assert!(config.validate().is_ok());
        assert!(config.uses_memory_store());
    }

    #[test]
    fn short_secret_is_rejected() {
        let config = Config::for_tests("short");
        assert!(config.validate().is_err());
    }

    #[test]
    fn edit_window_bounds_are_checked() {
        let mut config = Config::for_tests("a-long-enough-test-secret");
        config.default_edit_window_minutes = 0;
        assert!(config.validate().is_err());
    }
}
