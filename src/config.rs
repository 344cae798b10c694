//! Configuration management for alertgate
//!
//! This module defines the main `Config` struct and its sub-structs. It uses
//! the `figment` crate to layer defaults, an `alertgate.toml` file,
//! `ALERTGATE_`-prefixed environment variables and command-line flags.
//!
//! Loading only checks the shape of the data. Channel-level validation (URLs,
//! addresses, chat ids, headers) happens when the notifier is built, see
//! [`crate::services::build_notifier`].

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment, Provider,
};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationSeconds};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Errors detected while validating alerting configuration.
///
/// Messages never contain passwords, tokens or full URLs.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{channel}: missing required field `{field}`")]
    MissingField {
        channel: &'static str,
        field: &'static str,
    },

    #[error("{channel}: invalid URL {url}: {reason}")]
    InvalidUrl {
        channel: &'static str,
        url: String,
        reason: String,
    },

    #[error("{channel}: `{field}` contains control characters")]
    ControlCharacters {
        channel: &'static str,
        field: String,
    },

    #[error("{channel}: invalid email address in `{field}`: {address}")]
    InvalidAddress {
        channel: &'static str,
        field: &'static str,
        address: String,
    },

    #[error("{channel}: invalid header name `{name}`")]
    InvalidHeaderName { channel: &'static str, name: String },

    #[error("{channel}: invalid chat id `{chat_id}`")]
    InvalidChatId {
        channel: &'static str,
        chat_id: String,
    },

    #[error("{channel}: invalid subject template: {reason}")]
    InvalidTemplate {
        channel: &'static str,
        reason: String,
    },

    #[error("{channel}: cannot set up TLS: {reason}")]
    InvalidTls {
        channel: &'static str,
        reason: String,
    },
}

/// The main configuration struct for the application.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct Config {
    /// The logging level for the application.
    pub log_level: String,
    /// Configuration for alert delivery.
    pub alerting: AlertingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            alerting: AlertingConfig::default(),
        }
    }
}

impl Config {
    /// Loads the configuration.
    ///
    /// Sources, lowest priority first: built-in defaults, the TOML file at
    /// `config_path` (if any), `ALERTGATE_` environment variables (use `__`
    /// to nest, e.g. `ALERTGATE_ALERTING__ENABLED=false`), then `overrides`.
    pub fn load(config_path: Option<&Path>, overrides: impl Provider) -> anyhow::Result<Self> {
        let mut figment = Figment::new().merge(Serialized::defaults(Config::default()));
        if let Some(path) = config_path {
            figment = figment.merge(Toml::file(path));
        }
        let config = figment
            .merge(Env::prefixed("ALERTGATE_").split("__"))
            .merge(overrides)
            .extract()?;
        Ok(config)
    }
}

/// Top-level alerting switches plus per-channel settings.
#[serde_as]
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct AlertingConfig {
    /// Master switch. When off, a no-op notifier is built.
    pub enabled: bool,
    /// Minimum time between two alerts with the same error code, in seconds.
    #[serde_as(as = "DurationSeconds<u64>")]
    pub rate_limit_window: Duration,
    pub email: Option<EmailConfig>,
    pub telegram: Option<TelegramConfig>,
    pub webhook: Option<WebhookConfig>,
    pub rules: RulesConfig,
}

impl Default for AlertingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            rate_limit_window: Duration::from_secs(300),
            email: None,
            telegram: None,
            webhook: None,
            rules: RulesConfig::default(),
        }
    }
}

/// Configuration for the SMTP email channel.
#[serde_as]
#[derive(Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct EmailConfig {
    pub enabled: bool,
    pub smtp_host: String,
    pub smtp_port: u16,
    pub username: String,
    pub password: String,
    pub from: String,
    pub to: Vec<String>,
    /// Use implicit TLS on port 465, or STARTTLS on any other port.
    pub use_tls: bool,
    /// Value of `{Prefix}` in the subject template.
    pub subject_prefix: String,
    /// Overrides the default `[{Prefix}] {ErrorCode}: {Command}` subject.
    pub subject_template: Option<String>,
    /// Timeout for the whole SMTP conversation, in seconds.
    #[serde_as(as = "DurationSeconds<u64>")]
    pub timeout: Duration,
}

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            smtp_host: String::new(),
            smtp_port: 587,
            username: String::new(),
            password: String::new(),
            from: String::new(),
            to: Vec::new(),
            use_tls: true,
            subject_prefix: "alertgate".to_string(),
            subject_template: None,
            timeout: Duration::from_secs(30),
        }
    }
}

impl fmt::Debug for EmailConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EmailConfig")
            .field("enabled", &self.enabled)
            .field("smtp_host", &self.smtp_host)
            .field("smtp_port", &self.smtp_port)
            .field("username", &self.username)
            .field("password", &redacted(&self.password))
            .field("from", &self.from)
            .field("to", &self.to)
            .field("use_tls", &self.use_tls)
            .field("subject_prefix", &self.subject_prefix)
            .field("subject_template", &self.subject_template)
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Configuration for the Telegram bot channel.
#[serde_as]
#[derive(Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct TelegramConfig {
    pub enabled: bool,
    pub bot_token: String,
    /// Numeric chat ids (negative for groups) or `@channel` usernames.
    pub chat_ids: Vec<String>,
    /// Base URL of the Bot API.
    pub api_url: String,
    #[serde_as(as = "DurationSeconds<u64>")]
    pub timeout: Duration,
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bot_token: String::new(),
            chat_ids: Vec::new(),
            api_url: "https://api.telegram.org".to_string(),
            timeout: Duration::from_secs(10),
        }
    }
}

impl fmt::Debug for TelegramConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TelegramConfig")
            .field("enabled", &self.enabled)
            .field("bot_token", &redacted(&self.bot_token))
            .field("chat_ids", &self.chat_ids)
            .field("api_url", &self.api_url)
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Configuration for the generic HTTP webhook channel.
#[serde_as]
#[derive(Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct WebhookConfig {
    pub enabled: bool,
    pub urls: Vec<String>,
    /// Extra headers sent with every request.
    pub headers: BTreeMap<String, String>,
    /// Additional attempts after a network error or 5xx response.
    pub max_retries: u32,
    #[serde_as(as = "DurationSeconds<u64>")]
    pub timeout: Duration,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            urls: Vec::new(),
            headers: BTreeMap::new(),
            max_retries: 3,
            timeout: Duration::from_secs(10),
        }
    }
}

// URLs and header values routinely carry tokens.
impl fmt::Debug for WebhookConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let urls: Vec<String> = self
            .urls
            .iter()
            .map(|u| crate::validation::mask_url(u))
            .collect();
        let headers: Vec<&String> = self.headers.keys().collect();
        f.debug_struct("WebhookConfig")
            .field("enabled", &self.enabled)
            .field("urls", &urls)
            .field("headers", &headers)
            .field("max_retries", &self.max_retries)
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Rule configuration: a global rule set plus per-channel overrides.
///
/// An entry under `channels` replaces the global rule set for that channel
/// entirely. Fields it leaves out are not inherited from the global set.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Default)]
#[serde(default)]
pub struct RulesConfig {
    #[serde(flatten)]
    pub global: RuleSetConfig,
    pub channels: HashMap<String, RuleSetConfig>,
}

/// One rule set in configuration form.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq, Default)]
#[serde(default)]
pub struct RuleSetConfig {
    /// `info`, `warning` or `critical`. Empty or unknown values mean `info`.
    pub min_severity: String,
    pub exclude_error_codes: Vec<String>,
    pub include_error_codes: Vec<String>,
    pub exclude_commands: Vec<String>,
    pub include_commands: Vec<String>,
}

fn redacted(secret: &str) -> &'static str {
    if secret.is_empty() {
        ""
    } else {
        "[REDACTED]"
    }
}
