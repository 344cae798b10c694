//! Generic JSON webhook delivery with retries.
//!
//! Network errors and 5xx responses are retried with exponential backoff;
//! 4xx responses are treated as permanent configuration problems.

use crate::{
    channels::read_body_limited,
    config::{ConfigError, WebhookConfig},
    core::{Alert, Channel, Severity, SOURCE_TAG},
    rate_limit::RateLimiter,
    validation::{has_header_control_chars, mask_url, parse_http_url},
};
use anyhow::Result;
use async_trait::async_trait;
use chrono::SecondsFormat;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use reqwest::{Client, Url};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

const CHANNEL: &str = "webhook";

/// Value of the `User-Agent` header.
pub const USER_AGENT: &str = concat!("alertgate/", env!("CARGO_PKG_VERSION"));

/// Body bytes read from a successful response before it is dropped.
const MAX_DRAIN_BYTES: usize = 64 * 1024;
/// Body bytes kept from an error response for diagnostics.
const MAX_ERROR_BODY_BYTES: usize = 1024;

const DEFAULT_INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const DEFAULT_MAX_BACKOFF: Duration = Duration::from_secs(4);

#[derive(Error, Debug)]
pub enum WebhookError {
    /// Connection, TLS or timeout failure. Never contains the URL.
    #[error("request failed: {0}")]
    Transport(String),

    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("delivery cancelled")]
    Cancelled,
}

impl WebhookError {
    /// Whether another attempt could succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            WebhookError::Transport(_) => true,
            WebhookError::Status { status, .. } => (500..600).contains(status),
            WebhookError::Cancelled => false,
        }
    }
}

/// JSON document posted to every webhook.
#[derive(Debug, Serialize)]
pub struct WebhookPayload<'a> {
    pub error_code: &'a str,
    pub message: &'a str,
    pub trace_id: &'a str,
    pub timestamp: String,
    pub command: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub infobase: Option<&'a str>,
    pub severity: Severity,
    pub source: &'static str,
    pub hostname: &'a str,
}

/// Posts alerts as JSON to one or more URLs.
pub struct WebhookChannel {
    client: Client,
    urls: Vec<Url>,
    headers: HeaderMap,
    max_retries: u32,
    initial_backoff: Duration,
    max_backoff: Duration,
    hostname: String,
    rate_limiter: Option<Arc<RateLimiter>>,
}

impl WebhookChannel {
    /// Creates a channel with its own HTTP client.
    pub fn new(config: WebhookConfig) -> Result<Self, ConfigError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| ConfigError::InvalidUrl {
                channel: CHANNEL,
                url: String::new(),
                reason: format!("failed to build HTTP client: {}", e.without_url()),
            })?;
        Self::with_client(config, client)
    }

    /// Creates a channel that sends through `client`.
    pub fn with_client(config: WebhookConfig, client: Client) -> Result<Self, ConfigError> {
        if config.urls.is_empty() {
            return Err(ConfigError::MissingField {
                channel: CHANNEL,
                field: "urls",
            });
        }
        let urls = config
            .urls
            .iter()
            .map(|raw| parse_http_url(CHANNEL, raw))
            .collect::<Result<Vec<_>, _>>()?;

        let mut headers = HeaderMap::new();
        for (name, value) in &config.headers {
            let header_name = HeaderName::from_bytes(name.as_bytes()).map_err(|_| {
                ConfigError::InvalidHeaderName {
                    channel: CHANNEL,
                    name: name.clone(),
                }
            })?;
            let control_chars = || ConfigError::ControlCharacters {
                channel: CHANNEL,
                field: format!("headers.{name}"),
            };
            if has_header_control_chars(value) {
                return Err(control_chars());
            }
            let header_value =
                HeaderValue::from_bytes(value.as_bytes()).map_err(|_| control_chars())?;
            if header_name == CONTENT_TYPE || header_name == reqwest::header::USER_AGENT {
                warn!(header = %name, "Ignoring custom webhook header that alertgate sets itself");
                continue;
            }
            headers.insert(header_name, header_value);
        }
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            reqwest::header::USER_AGENT,
            HeaderValue::from_static(USER_AGENT),
        );

        Ok(Self {
            client,
            urls,
            headers,
            max_retries: config.max_retries,
            initial_backoff: DEFAULT_INITIAL_BACKOFF,
            max_backoff: DEFAULT_MAX_BACKOFF,
            hostname: local_hostname(),
            rate_limiter: None,
        })
    }

    /// Overrides the retry delays.
    pub fn with_backoff(mut self, initial: Duration, max: Duration) -> Self {
        self.initial_backoff = initial;
        self.max_backoff = max;
        self
    }

    /// Applies a channel-local rate limit, for use outside a dispatcher.
    pub fn with_rate_limiter(mut self, rate_limiter: Arc<RateLimiter>) -> Self {
        self.rate_limiter = Some(rate_limiter);
        self
    }

    /// Builds the payload for an alert.
    pub fn payload<'a>(&'a self, alert: &'a Alert) -> WebhookPayload<'a> {
        WebhookPayload {
            error_code: &alert.error_code,
            message: &alert.message,
            trace_id: &alert.trace_id,
            timestamp: alert.timestamp.to_rfc3339_opts(SecondsFormat::Secs, true),
            command: &alert.command,
            infobase: alert.infobase(),
            severity: alert.severity,
            source: SOURCE_TAG,
            hostname: &self.hostname,
        }
    }

    /// Delivers `body` to one URL, retrying transient failures.
    async fn deliver(
        &self,
        cancel: &CancellationToken,
        url: &Url,
        body: &[u8],
    ) -> Result<u32, WebhookError> {
        let target = mask_url(url.as_str());
        let mut attempt = 0;
        loop {
            attempt += 1;
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(WebhookError::Cancelled),
                result = self.post(url, body) => result,
            };

            let error = match result {
                Ok(()) => return Ok(attempt),
                Err(e) => e,
            };
            if !error.is_retryable() || attempt > self.max_retries {
                return Err(error);
            }

            let delay = backoff_delay(attempt - 1, self.initial_backoff, self.max_backoff);
            debug!(
                url = %target,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "Webhook attempt failed; retrying"
            );
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(WebhookError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    async fn post(&self, url: &Url, body: &[u8]) -> Result<(), WebhookError> {
        let response = self
            .client
            .post(url.clone())
            .headers(self.headers.clone())
            .body(body.to_vec())
            .send()
            .await
            .map_err(|e| WebhookError::Transport(e.without_url().to_string()))?;

        let status = response.status();
        if status.is_success() {
            // Reading the body lets the connection go back to the pool.
            read_body_limited(response, MAX_DRAIN_BYTES).await;
            return Ok(());
        }

        let body = read_body_limited(response, MAX_ERROR_BODY_BYTES).await;
        Err(WebhookError::Status {
            status: status.as_u16(),
            body: String::from_utf8_lossy(&body).trim().to_string(),
        })
    }
}

#[async_trait]
impl Channel for WebhookChannel {
    #[instrument(skip_all, fields(channel = CHANNEL, error_code = %alert.error_code))]
    async fn send(&self, cancel: &CancellationToken, alert: &Alert) -> Result<()> {
        if let Some(limiter) = &self.rate_limiter {
            if !limiter.allow(&alert.error_code) {
                debug!("Webhook alert suppressed by rate limiter");
                return Ok(());
            }
        }

        let body = match serde_json::to_vec(&self.payload(alert)) {
            Ok(body) => body,
            Err(e) => {
                warn!(error = %e, "Failed to serialize webhook payload");
                return Ok(());
            }
        };

        let total = self.urls.len();
        let mut succeeded = 0;
        for url in &self.urls {
            if cancel.is_cancelled() {
                debug!(succeeded, total, "Webhook delivery cancelled");
                return Ok(());
            }
            match self.deliver(cancel, url, &body).await {
                Ok(attempts) => {
                    succeeded += 1;
                    debug!(url = %mask_url(url.as_str()), attempts, "Webhook delivered");
                }
                Err(WebhookError::Cancelled) => {
                    debug!(succeeded, total, "Webhook delivery cancelled");
                    return Ok(());
                }
                Err(e) => {
                    warn!(url = %mask_url(url.as_str()), error = %e, "Failed to deliver webhook");
                }
            }
        }

        metrics::counter!("alert_deliveries_total", "channel" => CHANNEL, "outcome" => "success")
            .increment(succeeded as u64);
        metrics::counter!("alert_deliveries_total", "channel" => CHANNEL, "outcome" => "failure")
            .increment((total - succeeded) as u64);

        if succeeded == 0 {
            warn!(total, "Webhook alert was not delivered to any URL");
        } else {
            info!(succeeded, total, "Webhook alert sent");
        }
        Ok(())
    }
}

/// Delay before retry number `retry` (zero-based): `initial * 2^retry`,
/// capped at `max`.
pub fn backoff_delay(retry: u32, initial: Duration, max: Duration) -> Duration {
    let factor = 2u32.checked_pow(retry).unwrap_or(u32::MAX);
    initial.checked_mul(factor).unwrap_or(max).min(max)
}

fn local_hostname() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| "unknown".to_string())
}
