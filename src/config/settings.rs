//! Application settings and configuration
//!
//! This module provides configuration management for the access layer,
//! loading settings from environment variables with sensible defaults.

use anyhow::{Context, Result};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::env;
use std::fmt;
use std::time::Duration;

use crate::utils::RetryConfig;

/// Application environment
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    #[value(alias = "dev")]
    Development,
    #[value(alias = "stage")]
    Staging,
    #[value(alias = "prod")]
    Production,
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Environment::Development => write!(f, "development"),
            Environment::Staging => write!(f, "staging"),
            Environment::Production => write!(f, "production"),
        }
    }
}

impl std::str::FromStr for Environment {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "development" | "dev" => Ok(Environment::Development),
            "staging" | "stage" => Ok(Environment::Staging),
            "production" | "prod" => Ok(Environment::Production),
            _ => anyhow::bail!("Invalid environment: {}. Expected: development, staging, or production", s),
        }
    }
}

/// Bounds for the batched-get unprocessed-keys loop
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BatchGetConfig {
    /// Total batch-get calls per request, including the first
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub jitter: bool,
}

impl Default for BatchGetConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff_ms: 1_000,
            max_backoff_ms: 32_000,
            jitter: false,
        }
    }
}

impl BatchGetConfig {
    /// Backoff policy for the retry loop
    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig::new()
            .with_max_retries(self.max_attempts.saturating_sub(1))
            .with_initial_delay(Duration::from_millis(self.initial_backoff_ms))
            .with_max_delay(Duration::from_millis(self.max_backoff_ms))
            .with_multiplier(2.0)
            .with_jitter(self.jitter)
    }
}

/// Main application settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Settings {
    // App settings
    pub app_name: String,
    pub app_version: String,
    pub environment: Environment,
    pub log_level: String,

    // AWS settings
    pub aws_region: String,
    /// Client identification string, sent as the SDK app name
    pub user_agent: Option<String>,
    pub dynamodb_endpoint_url: Option<String>,

    // Batched get
    pub batch_get: BatchGetConfig,
}

impl Settings {
    /// Load settings from environment variables with defaults
    pub fn load() -> Result<Self> {
        // Load .env file if it exists (ignored in production typically)
        dotenvy::dotenv().ok();

        let defaults = BatchGetConfig::default();

        let settings = Self {
            // App settings
            app_name: env_or_default("APP_NAME", "dynamo-access"),
            app_version: env!("CARGO_PKG_VERSION").to_string(),
            environment: env_or_default("ENVIRONMENT", "development")
                .parse()
                .unwrap_or_default(),
            log_level: env_or_default("LOG_LEVEL", "info"),

            // AWS settings
            aws_region: env::var("AWS_REGION")
                .or_else(|_| env::var("REGION_NAME"))
                .unwrap_or_else(|_| "us-east-1".to_string()),
            user_agent: env_non_empty("USER_AGENT_STRING"),
            dynamodb_endpoint_url: env_non_empty("DYNAMODB_ENDPOINT_URL"),

            // Batched get
            batch_get: BatchGetConfig {
                max_attempts: env_or_default("BATCH_GET_MAX_ATTEMPTS", "5")
                    .parse()
                    .context("Invalid BATCH_GET_MAX_ATTEMPTS value")?,
                initial_backoff_ms: env_or_default("BATCH_GET_INITIAL_BACKOFF_MS", "1000")
                    .parse()
                    .context("Invalid BATCH_GET_INITIAL_BACKOFF_MS value")?,
                max_backoff_ms: env_or_default("BATCH_GET_MAX_BACKOFF_MS", "32000")
                    .parse()
                    .context("Invalid BATCH_GET_MAX_BACKOFF_MS value")?,
                jitter: env_or_default("BATCH_GET_JITTER", "false")
                    .parse()
                    .unwrap_or(defaults.jitter),
            },
        };

        // Validate settings
        settings.validate()?;

        Ok(settings)
    }

    /// Validate settings
    pub fn validate(&self) -> Result<()> {
        if self.aws_region.trim().is_empty() {
            anyhow::bail!("AWS region cannot be empty");
        }

        if self.batch_get.max_attempts == 0 {
            anyhow::bail!("Batch get max_attempts must be > 0");
        }
        if self.batch_get.initial_backoff_ms > self.batch_get.max_backoff_ms {
            anyhow::bail!("Batch get initial backoff cannot exceed the maximum backoff");
        }

        if self.environment == Environment::Production && self.dynamodb_endpoint_url.is_some() {
            tracing::warn!("Running in production against a custom DynamoDB endpoint!");
        }

        Ok(())
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            app_name: "dynamo-access".to_string(),
            app_version: env!("CARGO_PKG_VERSION").to_string(),
            environment: Environment::Development,
            log_level: "info".to_string(),
            aws_region: "us-east-1".to_string(),
            user_agent: None,
            dynamodb_endpoint_url: None,
            batch_get: BatchGetConfig::default(),
        }
    }
}

/// Helper function to get environment variable with default
fn env_or_default(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Optional environment variable; blank values count as unset
fn env_non_empty(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings() {
        let settings = Settings::default();
        assert_eq!(settings.app_name, "dynamo-access");
        assert_eq!(settings.aws_region, "us-east-1");
        assert_eq!(settings.batch_get.max_attempts, 5);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_environment_parsing() {
        assert_eq!("development".parse::<Environment>().unwrap(), Environment::Development);
        assert_eq!("dev".parse::<Environment>().unwrap(), Environment::Development);
        assert_eq!("production".parse::<Environment>().unwrap(), Environment::Production);
        assert_eq!("prod".parse::<Environment>().unwrap(), Environment::Production);
        assert!("qa".parse::<Environment>().is_err());
    }

    #[test]
    fn test_batch_get_retry_config() {
        let retry = BatchGetConfig::default().retry_config();

        // Five calls in total: the first one plus four retries
        assert_eq!(retry.max_retries, 4);
        assert!(!retry.use_jitter);
        assert_eq!(retry.calculate_delay(0), Duration::from_secs(1));
        assert_eq!(retry.calculate_delay(3), Duration::from_secs(8));
        assert_eq!(retry.calculate_delay(6), Duration::from_secs(32));
    }

    #[test]
    fn test_validate_rejects_zero_attempts() {
        let mut settings = Settings::default();
        settings.batch_get.max_attempts = 0;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_inverted_backoff() {
        let mut settings = Settings::default();
        settings.batch_get.initial_backoff_ms = 64_000;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_blank_optional_env_vars_are_unset() {
        env::set_var("DYNAMO_ACCESS_TEST_BLANK_ENDPOINT", "");
        env::set_var("DYNAMO_ACCESS_TEST_SET_ENDPOINT", "http://localhost:8000");

        assert_eq!(env_non_empty("DYNAMO_ACCESS_TEST_BLANK_ENDPOINT"), None);
        assert_eq!(env_non_empty("DYNAMO_ACCESS_TEST_UNSET_ENDPOINT"), None);
        assert_eq!(
            env_non_empty("DYNAMO_ACCESS_TEST_SET_ENDPOINT").as_deref(),
            Some("http://localhost:8000")
        );
    }
}
