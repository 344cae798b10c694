//! Input validation and log sanitisation helpers shared by the channels.

use crate::config::ConfigError;
use regex::Regex;
use reqwest::Url;
use std::sync::OnceLock;

/// Marker substituted for secrets in log output.
pub const REDACTED: &str = "[REDACTED]";

/// Returns `true` if `value` contains any control character.
pub fn has_control_chars(value: &str) -> bool {
    value.chars().any(char::is_control)
}

/// Returns `true` if `value` contains a control character other than a
/// horizontal tab. Used for HTTP header values.
pub fn has_header_control_chars(value: &str) -> bool {
    value.chars().any(|c| c.is_control() && c != '\t')
}

/// Parses and checks an outgoing `http`/`https` URL.
pub fn parse_http_url(channel: &'static str, raw: &str) -> Result<Url, ConfigError> {
    let invalid = |reason: &str| ConfigError::InvalidUrl {
        channel,
        url: mask_url(raw),
        reason: reason.to_string(),
    };

    if has_control_chars(raw) {
        return Err(invalid("contains control characters"));
    }
    let url = Url::parse(raw.trim()).map_err(|e| invalid(&e.to_string()))?;
    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(invalid("scheme must be http or https"));
    }
    match url.host_str() {
        Some(host) if !host.is_empty() => Ok(url),
        _ => Err(invalid("missing host")),
    }
}

/// Reduces a URL to `scheme://host[:port]` so that paths and query strings,
/// which often embed tokens, never reach the logs.
pub fn mask_url(raw: &str) -> String {
    match Url::parse(raw.trim()) {
        Ok(url) => match url.host_str() {
            Some(host) => match url.port() {
                Some(port) => format!("{}://{}:{}", url.scheme(), host, port),
                None => format!("{}://{}", url.scheme(), host),
            },
            None => format!("{}://", url.scheme()),
        },
        Err(_) => "<invalid url>".to_string(),
    }
}

/// Replaces every occurrence of `secret` in `text` with [`REDACTED`].
pub fn redact(text: &str, secret: &str) -> String {
    if secret.is_empty() {
        return text.to_string();
    }
    text.replace(secret, REDACTED)
}

/// Checks that a Telegram chat id is either numeric (optionally negative) or
/// an `@channel` username.
pub fn is_valid_chat_id(chat_id: &str) -> bool {
    static CHAT_ID: OnceLock<Regex> = OnceLock::new();
    let re = CHAT_ID.get_or_init(|| {
        Regex::new(r"^(-?[0-9]{1,20}|@[A-Za-z][A-Za-z0-9_]{3,31})$").expect("valid chat id regex")
    });
    re.is_match(chat_id)
}
