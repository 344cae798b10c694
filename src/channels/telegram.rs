//! Alerts delivered through the Telegram Bot API.

use crate::{
    channels::read_body_limited,
    config::{ConfigError, TelegramConfig},
    core::{Alert, Channel, Severity},
    rate_limit::RateLimiter,
    validation::{has_control_chars, is_valid_chat_id, parse_http_url, redact},
};
use anyhow::Result;
use async_trait::async_trait;
use chrono::SecondsFormat;
use reqwest::{Client, Url};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

const CHANNEL: &str = "telegram";

/// Upper bound for a Bot API response body.
const MAX_RESPONSE_BYTES: usize = 64 * 1024;

/// Why a message did not reach one chat.
#[derive(Error, Debug)]
pub enum TelegramError {
    /// Transport failure. The text has the bot token redacted.
    #[error("request failed: {0}")]
    Transport(String),

    #[error("Bot API error {code}: {description}")]
    Api { code: i64, description: String },

    #[error("unexpected response (HTTP {status}): {reason}")]
    InvalidResponse { status: u16, reason: String },
}

#[derive(Serialize)]
struct SendMessage<'a> {
    chat_id: &'a str,
    text: &'a str,
    parse_mode: &'static str,
}

#[derive(Deserialize)]
struct ApiResponse {
    ok: bool,
    #[serde(default)]
    error_code: Option<i64>,
    #[serde(default)]
    description: Option<String>,
}

/// Sends Markdown-formatted alerts to one or more Telegram chats.
pub struct TelegramChannel {
    client: Client,
    endpoint: Url,
    token: String,
    chat_ids: Vec<String>,
    rate_limiter: Option<Arc<RateLimiter>>,
}

impl TelegramChannel {
    /// Creates a channel with its own HTTP client.
    pub fn new(config: TelegramConfig) -> Result<Self, ConfigError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| ConfigError::InvalidUrl {
                channel: CHANNEL,
                url: String::new(),
                reason: format!("failed to build HTTP client: {}", e.without_url()),
            })?;
        Self::with_client(config, client)
    }

    /// Creates a channel that sends through `client`.
    pub fn with_client(config: TelegramConfig, client: Client) -> Result<Self, ConfigError> {
        let token = config.bot_token.trim().to_string();
        if token.is_empty() {
            return Err(ConfigError::MissingField {
                channel: CHANNEL,
                field: "bot_token",
            });
        }
        if has_control_chars(&token) || token.contains(char::is_whitespace) {
            return Err(ConfigError::ControlCharacters {
                channel: CHANNEL,
                field: "bot_token".to_string(),
            });
        }
        if config.chat_ids.is_empty() {
            return Err(ConfigError::MissingField {
                channel: CHANNEL,
                field: "chat_ids",
            });
        }
        let chat_ids: Vec<String> = config.chat_ids.iter().map(|c| c.trim().to_string()).collect();
        if let Some(bad) = chat_ids.iter().find(|c| !is_valid_chat_id(c)) {
            return Err(ConfigError::InvalidChatId {
                channel: CHANNEL,
                chat_id: bad.clone(),
            });
        }

        let base = parse_http_url(CHANNEL, &config.api_url)?;
        let endpoint_str = format!(
            "{}/bot{}/sendMessage",
            base.as_str().trim_end_matches('/'),
            token
        );
        let endpoint = Url::parse(&endpoint_str).map_err(|e| ConfigError::InvalidUrl {
            channel: CHANNEL,
            url: crate::validation::mask_url(&config.api_url),
            reason: redact(&e.to_string(), &token),
        })?;

        Ok(Self {
            client,
            endpoint,
            token,
            chat_ids,
            rate_limiter: None,
        })
    }

    /// Applies a channel-local rate limit, for use outside a dispatcher.
    pub fn with_rate_limiter(mut self, rate_limiter: Arc<RateLimiter>) -> Self {
        self.rate_limiter = Some(rate_limiter);
        self
    }

    async fn send_to(&self, chat_id: &str, text: &str) -> Result<(), TelegramError> {
        let request = SendMessage {
            chat_id,
            text,
            parse_mode: "Markdown",
        };
        // reqwest errors quote the request URL, which contains the token.
        let response = self
            .client
            .post(self.endpoint.clone())
            .json(&request)
            .send()
            .await
            .map_err(|e| TelegramError::Transport(redact(&e.to_string(), &self.token)))?;

        let status = response.status();
        let body = read_body_limited(response, MAX_RESPONSE_BYTES).await;
        let parsed: ApiResponse =
            serde_json::from_slice(&body).map_err(|e| TelegramError::InvalidResponse {
                status: status.as_u16(),
                reason: e.to_string(),
            })?;

        if parsed.ok && status.is_success() {
            return Ok(());
        }
        Err(TelegramError::Api {
            code: parsed.error_code.unwrap_or(i64::from(status.as_u16())),
            description: redact(&parsed.description.unwrap_or_default(), &self.token),
        })
    }
}

#[async_trait]
impl Channel for TelegramChannel {
    #[instrument(skip_all, fields(channel = CHANNEL, error_code = %alert.error_code))]
    async fn send(&self, cancel: &CancellationToken, alert: &Alert) -> Result<()> {
        if let Some(limiter) = &self.rate_limiter {
            if !limiter.allow(&alert.error_code) {
                debug!("Telegram alert suppressed by rate limiter");
                return Ok(());
            }
        }

        let text = format_message(alert);
        let total = self.chat_ids.len();
        let mut succeeded = 0;

        for chat_id in &self.chat_ids {
            if cancel.is_cancelled() {
                debug!(succeeded, total, "Telegram delivery cancelled");
                return Ok(());
            }
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!(succeeded, total, "Telegram delivery cancelled");
                    return Ok(());
                }
                result = self.send_to(chat_id, &text) => result,
            };
            match result {
                Ok(()) => succeeded += 1,
                Err(e) => warn!(chat_id = %chat_id, error = %e, "Failed to send Telegram alert"),
            }
        }

        let failed = (total - succeeded) as u64;
        metrics::counter!("alert_deliveries_total", "channel" => CHANNEL, "outcome" => "success")
            .increment(succeeded as u64);
        metrics::counter!("alert_deliveries_total", "channel" => CHANNEL, "outcome" => "failure")
            .increment(failed);

        if succeeded == 0 {
            warn!(total, "Telegram alert was not delivered to any chat");
        } else {
            info!(succeeded, total, "Telegram alert sent");
        }
        Ok(())
    }
}

/// Formats an alert as a legacy-Markdown Telegram message.
pub fn format_message(alert: &Alert) -> String {
    let marker = match alert.severity {
        Severity::Info => "ℹ️",
        Severity::Warning => "⚠️",
        Severity::Critical => "🚨",
    };

    let mut text = format!(
        "{marker} *{} alert*\n\n*Error code:* {}\n*Severity:* {}\n*Command:* {}\n",
        alert.severity,
        escape_markdown(&alert.error_code),
        alert.severity,
        escape_markdown(&alert.command),
    );
    if let Some(infobase) = alert.infobase() {
        text.push_str(&format!("*Infobase:* {}\n", escape_markdown(infobase)));
    }
    text.push_str(&format!(
        "\n*Message:*\n{}\n\n*Trace ID:* {}\n*Time:* {}",
        escape_markdown(&alert.message),
        escape_markdown(&alert.trace_id),
        escape_markdown(&alert.timestamp.to_rfc3339_opts(SecondsFormat::Secs, true)),
    ));
    text
}

/// Escapes text for Telegram's Markdown parse mode. Backslashes go first so
/// that the escapes added afterwards are not doubled.
pub fn escape_markdown(text: &str) -> String {
    let mut out = text.replace('\\', "\\\\");
    for special in ['_', '*', '`', '[', ']', '(', ')', '>'] {
        out = out.replace(special, &format!("\\{special}"));
    }
    out
}
