use config::{Config, ConfigError, Environment, File};
use lettre::message::Mailbox;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;
use validator::Validate;

use crate::fetcher::{FetchRequest, RetryPolicy};
use crate::utils::error::{AppError, Result};

/// Runtime settings for one invocation, read from the process environment.
///
/// Keys are the upper-case environment names lowercased (`PRODUCT_URL` ->
/// `product_url`).
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct MonitorConfig {
    #[validate(url)]
    pub product_url: String,
    #[validate(length(min = 1))]
    pub sender_email: String,
    #[validate(length(min = 1))]
    pub recipient_email: String,
    #[serde(default)]
    pub skip_notification: Option<String>,

    #[serde(default = "default_max_attempts")]
    #[validate(range(min = 1, max = 10))]
    pub fetch_max_attempts: u32,
    #[serde(default = "default_backoff_secs")]
    pub fetch_backoff_secs: u64,
    #[serde(default = "default_timeout_secs")]
    #[validate(range(min = 1))]
    pub fetch_timeout_secs: u64,
    #[serde(default)]
    pub fetch_jitter: bool,
    #[serde(default)]
    pub fetch_user_agent: Option<String>,

    #[serde(default = "default_timeout_secs")]
    #[validate(range(min = 1))]
    pub mail_timeout_secs: u64,
    #[serde(default)]
    pub smtp_host: Option<String>,
    #[serde(default = "default_smtp_port")]
    #[validate(range(min = 1))]
    pub smtp_port: u16,
    #[serde(default)]
    pub smtp_username: Option<String>,
    #[serde(default)]
    pub smtp_password: Option<String>,
    #[serde(default = "default_true")]
    pub smtp_use_tls: bool,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_backoff_secs() -> u64 {
    5
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_smtp_port() -> u16 {
    587
}

fn default_true() -> bool {
    true
}

impl MonitorConfig {
    pub fn from_env() -> Result<Self> {
        // A missing .env file is normal outside local development
        let _ = dotenvy::dotenv();
        Self::from_environment(Environment::default())
    }

    /// Builds the config from an explicit environment source. Tests pass an
    /// `Environment` with a fixed map instead of touching the process env.
    pub fn from_environment(environment: Environment) -> Result<Self> {
        let s = Config::builder()
            .add_source(File::with_name("config/local").required(false))
            .add_source(environment)
            .build()?;

        let config: MonitorConfig = s.try_deserialize()?;
        config.validate_all()?;
        Ok(config)
    }

    pub fn validate_all(&self) -> Result<()> {
        self.validate()?;

        let url = Url::parse(&self.product_url)
            .map_err(|e| ConfigError::Message(format!("Invalid PRODUCT_URL: {}", e)))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ConfigError::Message("PRODUCT_URL must use http or https".into()).into());
        }

        for (key, value) in [
            ("SENDER_EMAIL", &self.sender_email),
            ("RECIPIENT_EMAIL", &self.recipient_email),
        ] {
            if value.parse::<Mailbox>().is_err() {
                return Err(AppError::Validation(format!(
                    "{} is not a valid email address: {}",
                    key, value
                )));
            }
        }

        if self.smtp_username.is_some() != self.smtp_password.is_some() {
            return Err(ConfigError::Message(
                "SMTP_USERNAME and SMTP_PASSWORD must be set together".into(),
            )
            .into());
        }

        Ok(())
    }

    /// Only a case-insensitive `"true"` suppresses mail.
    pub fn skip_notification(&self) -> bool {
        self.skip_notification
            .as_deref()
            .map(|v| v.trim().eq_ignore_ascii_case("true"))
            .unwrap_or(false)
    }

    pub fn retry_policy(&self) -> Result<RetryPolicy> {
        let policy = RetryPolicy::new(
            self.fetch_max_attempts,
            Duration::from_secs(self.fetch_backoff_secs),
        )?;
        Ok(policy.with_jitter(self.fetch_jitter))
    }

    pub fn fetch_request(&self) -> Result<FetchRequest> {
        Ok(FetchRequest::new(
            self.product_url.clone(),
            self.retry_policy()?,
            Duration::from_secs(self.fetch_timeout_secs),
        ))
    }

    pub fn mail_timeout(&self) -> Duration {
        Duration::from_secs(self.mail_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_from(pairs: &[(&str, &str)]) -> Environment {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Environment::default().source(Some(map))
    }

    fn required() -> Vec<(&'static str, &'static str)> {
        vec![
            ("PRODUCT_URL", "https://shop.example.com/item/123"),
            ("SENDER_EMAIL", "alerts@example.com"),
            ("RECIPIENT_EMAIL", "me@example.com"),
        ]
    }

    #[test]
    fn test_defaults_applied() {
        let config = MonitorConfig::from_environment(env_from(&required())).unwrap();

        assert_eq!(config.product_url, "https://shop.example.com/item/123");
        assert_eq!(config.fetch_max_attempts, 3);
        assert_eq!(config.fetch_backoff_secs, 5);
        assert_eq!(config.fetch_timeout_secs, 30);
        assert_eq!(config.smtp_port, 587);
        assert!(config.smtp_use_tls);
        assert!(config.smtp_host.is_none());
        assert!(!config.skip_notification());
    }

    #[test]
    fn test_missing_product_url_is_config_error() {
        let pairs: Vec<_> = required()
            .into_iter()
            .filter(|(k, _)| *k != "PRODUCT_URL")
            .collect();
        let err = MonitorConfig::from_environment(env_from(&pairs)).unwrap_err();

        assert!(err.is_configuration());
        assert!(err.to_string().contains("product_url"));
    }

    #[test]
    fn test_missing_recipient_is_config_error() {
        let pairs: Vec<_> = required()
            .into_iter()
            .filter(|(k, _)| *k != "RECIPIENT_EMAIL")
            .collect();
        let err = MonitorConfig::from_environment(env_from(&pairs)).unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_empty_product_url_rejected() {
        let mut pairs = required();
        pairs[0] = ("PRODUCT_URL", "");
        let err = MonitorConfig::from_environment(env_from(&pairs)).unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_non_http_url_rejected() {
        let mut pairs = required();
        pairs[0] = ("PRODUCT_URL", "ftp://shop.example.com/item");
        let err = MonitorConfig::from_environment(env_from(&pairs)).unwrap_err();
        assert!(err.to_string().contains("http or https"));
    }

    #[test]
    fn test_invalid_sender_rejected() {
        let mut pairs = required();
        pairs[1] = ("SENDER_EMAIL", "not an address");
        let err = MonitorConfig::from_environment(env_from(&pairs)).unwrap_err();
        assert!(err.to_string().contains("SENDER_EMAIL"));
    }

    #[test]
    fn test_zero_attempts_rejected() {
        let mut pairs = required();
        pairs.push(("FETCH_MAX_ATTEMPTS", "0"));
        let err = MonitorConfig::from_environment(env_from(&pairs)).unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_smtp_credentials_must_pair() {
        let mut pairs = required();
        pairs.push(("SMTP_USERNAME", "mailer"));
        let err = MonitorConfig::from_environment(env_from(&pairs)).unwrap_err();
        assert!(err.to_string().contains("must be set together"));
    }

    #[test]
    fn test_skip_notification_parsing() {
        for (raw, expected) in [("true", true), ("TRUE", true), (" True ", true), ("false", false), ("yes", false), ("", false)] {
            let mut pairs = required();
            pairs.push(("SKIP_NOTIFICATION", raw));
            let config = MonitorConfig::from_environment(env_from(&pairs)).unwrap();
            assert_eq!(config.skip_notification(), expected, "SKIP_NOTIFICATION={:?}", raw);
        }
    }

    #[test]
    fn test_fetch_request_from_config() {
        let mut pairs = required();
        pairs.push(("FETCH_MAX_ATTEMPTS", "4"));
        pairs.push(("FETCH_BACKOFF_SECS", "2"));
        pairs.push(("FETCH_TIMEOUT_SECS", "10"));
        let config = MonitorConfig::from_environment(env_from(&pairs)).unwrap();

        let request = config.fetch_request().unwrap();
        assert_eq!(request.url(), "https://shop.example.com/item/123");
        assert_eq!(request.policy().max_attempts(), 4);
        assert_eq!(request.policy().base_backoff(), Duration::from_secs(2));
        assert_eq!(request.timeout(), Duration::from_secs(10));
    }
}
