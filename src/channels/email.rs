//! Email alerts over SMTP.

use crate::{
    channels::mailer::{MailError, MailTransport, Security, SmtpMailer},
    config::{ConfigError, EmailConfig},
    core::{Alert, Channel},
    rate_limit::RateLimiter,
    validation::has_control_chars,
};
use anyhow::Result;
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use chrono::SecondsFormat;
use lettre::{
    message::{
        header::{ContentTransferEncoding, ContentType, HeaderName, HeaderValue},
        Body, Mailbox,
    },
    transport::smtp::authentication::Credentials,
    Message,
};
use regex::Regex;
use std::sync::{Arc, OnceLock};
use std::time::{Duration, SystemTime};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

const CHANNEL: &str = "email";

/// Subject used when no template is configured.
pub const DEFAULT_SUBJECT_TEMPLATE: &str = "[{Prefix}] {ErrorCode}: {Command}";

/// Raw bytes per RFC 2047 encoded word; keeps each word under 75 characters.
const ENCODED_WORD_CHUNK: usize = 45;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    Prefix,
    ErrorCode,
    Command,
    Severity,
    Infobase,
    Message,
    TraceId,
    Timestamp,
}

impl Field {
    fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "Prefix" => Field::Prefix,
            "ErrorCode" => Field::ErrorCode,
            "Command" => Field::Command,
            "Severity" => Field::Severity,
            "Infobase" => Field::Infobase,
            "Message" => Field::Message,
            "TraceID" => Field::TraceId,
            "Timestamp" => Field::Timestamp,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Field(Field),
}

/// A subject template compiled into literal and placeholder segments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubjectTemplate {
    segments: Vec<Segment>,
}

impl SubjectTemplate {
    /// Compiles `template`, rejecting unknown `{Placeholder}` names.
    pub fn compile(template: &str) -> Result<Self, ConfigError> {
        static PLACEHOLDER: OnceLock<Regex> = OnceLock::new();
        let re = PLACEHOLDER
            .get_or_init(|| Regex::new(r"\{([^{}]*)\}").expect("valid placeholder regex"));

        let mut segments = Vec::new();
        let mut last = 0;
        for captures in re.captures_iter(template) {
            let (Some(whole), Some(name)) = (captures.get(0), captures.get(1)) else {
                continue;
            };
            let field =
                Field::from_name(name.as_str()).ok_or_else(|| ConfigError::InvalidTemplate {
                    channel: CHANNEL,
                    reason: format!("unknown placeholder {}", whole.as_str()),
                })?;
            if whole.start() > last {
                segments.push(Segment::Literal(template[last..whole.start()].to_string()));
            }
            segments.push(Segment::Field(field));
            last = whole.end();
        }
        if last < template.len() {
            segments.push(Segment::Literal(template[last..].to_string()));
        }
        Ok(Self { segments })
    }

    /// Renders the subject. Control characters are replaced by spaces so that
    /// alert content cannot inject extra headers.
    pub fn render(&self, prefix: &str, alert: &Alert) -> String {
        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Field(field) => match field {
                    Field::Prefix => out.push_str(prefix),
                    Field::ErrorCode => out.push_str(&alert.error_code),
                    Field::Command => out.push_str(&alert.command),
                    Field::Severity => out.push_str(alert.severity.as_str()),
                    Field::Infobase => out.push_str(alert.infobase().unwrap_or_default()),
                    Field::Message => out.push_str(&alert.message),
                    Field::TraceId => out.push_str(&alert.trace_id),
                    Field::Timestamp => out.push_str(&format_timestamp(alert)),
                },
            }
        }
        out.chars()
            .map(|c| if c.is_control() { ' ' } else { c })
            .collect()
    }
}

/// Sends alerts as plain-text emails through an SMTP relay.
pub struct EmailChannel {
    host: String,
    port: u16,
    from: Mailbox,
    to: Vec<Mailbox>,
    prefix: String,
    subject: SubjectTemplate,
    timeout: Duration,
    transport: Arc<dyn MailTransport>,
    rate_limiter: Option<Arc<RateLimiter>>,
}

impl EmailChannel {
    /// Creates a channel that submits to the configured relay.
    ///
    /// With `use_tls` on a port other than 465 the relay must offer STARTTLS
    /// whenever credentials are configured; without credentials the session
    /// falls back to plain text.
    pub fn from_config(config: EmailConfig) -> Result<Self, ConfigError> {
        let host = check_host(&config.smtp_host)?;
        let credentials = credentials(&config);
        let security = Security::select(config.use_tls, config.smtp_port, credentials.is_some());
        match security {
            Security::Plain if credentials.is_some() => {
                warn!(%host, "use_tls is off; SMTP credentials will be sent unencrypted");
            }
            Security::StartTlsOpportunistic => {
                debug!(%host, "No SMTP credentials; STARTTLS will be used only if offered");
            }
            _ => {}
        }
        let mailer = SmtpMailer::new(
            &host,
            config.smtp_port,
            security,
            credentials,
            config.timeout,
        )?;
        Self::new(config, Arc::new(mailer))
    }

    /// Creates a channel that hands messages to `transport`.
    pub fn new(
        config: EmailConfig,
        transport: Arc<dyn MailTransport>,
    ) -> Result<Self, ConfigError> {
        let host = check_host(&config.smtp_host)?;
        if config.from.trim().is_empty() {
            return Err(missing("from"));
        }
        let from = parse_mailbox("from", config.from.trim())?;
        if config.to.is_empty() {
            return Err(missing("to"));
        }
        let to = config
            .to
            .iter()
            .map(|address| parse_mailbox("to", address.trim()))
            .collect::<Result<Vec<_>, _>>()?;
        if has_control_chars(&config.username) {
            return Err(control_chars("username"));
        }
        if has_control_chars(&config.subject_prefix) {
            return Err(control_chars("subject_prefix"));
        }
        if config.username.is_empty() != config.password.is_empty() {
            warn!("Only one of SMTP username and password is configured; skipping authentication");
        }

        let template = config
            .subject_template
            .as_deref()
            .filter(|t| !t.trim().is_empty())
            .unwrap_or(DEFAULT_SUBJECT_TEMPLATE);
        let subject = SubjectTemplate::compile(template)?;

        Ok(Self {
            host,
            port: config.smtp_port,
            from,
            to,
            prefix: config.subject_prefix,
            subject,
            timeout: config.timeout,
            transport,
            rate_limiter: None,
        })
    }

    /// Applies a channel-local rate limit, for use outside a dispatcher.
    pub fn with_rate_limiter(mut self, rate_limiter: Arc<RateLimiter>) -> Self {
        self.rate_limiter = Some(rate_limiter);
        self
    }

    /// Renders and, if needed, RFC 2047-encodes the subject for an alert.
    pub fn format_subject(&self, alert: &Alert) -> String {
        encode_header_value(&self.subject.render(&self.prefix, alert))
    }

    /// Builds the plain-text message: UTF-8, 8bit transfer encoding.
    pub fn build_message(&self, alert: &Alert) -> Result<Message, lettre::error::Error> {
        let subject = self.subject.render(&self.prefix, alert);
        let encoded = encode_header_value(&subject);
        let body = Body::new_with_encoding(format_body(alert), ContentTransferEncoding::EightBit)
            .unwrap_or_else(|raw| Body::new(String::from_utf8_lossy(&raw).into_owned()));

        let mut builder = Message::builder()
            .from(self.from.clone())
            .raw_header(HeaderValue::dangerous_new_pre_encoded(
                HeaderName::new_from_ascii_str("Subject"),
                subject,
                encoded,
            ))
            .date(SystemTime::from(alert.timestamp))
            .header(ContentType::TEXT_PLAIN);
        for recipient in &self.to {
            builder = builder.to(recipient.clone());
        }
        builder.body(body)
    }

    fn record(&self, outcome: &'static str) {
        metrics::counter!("alert_deliveries_total", "channel" => CHANNEL, "outcome" => outcome)
            .increment(1);
    }
}

#[async_trait]
impl Channel for EmailChannel {
    #[instrument(skip_all, fields(channel = CHANNEL, error_code = %alert.error_code))]
    async fn send(&self, cancel: &CancellationToken, alert: &Alert) -> Result<()> {
        if let Some(limiter) = &self.rate_limiter {
            if !limiter.allow(&alert.error_code) {
                debug!("Email alert suppressed by rate limiter");
                return Ok(());
            }
        }

        let message = match self.build_message(alert) {
            Ok(message) => message,
            Err(e) => {
                self.record("failure");
                error!(error = %e, "Failed to build email alert");
                return Ok(());
            }
        };

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(MailError::Cancelled),
            result = tokio::time::timeout(self.timeout, self.transport.send(message)) => {
                result.unwrap_or(Err(MailError::Timeout(self.timeout)))
            }
        };

        match outcome {
            Ok(()) => {
                self.record("success");
                info!(recipients = self.to.len(), "Email alert sent");
            }
            Err(MailError::Cancelled) => {
                debug!("Email delivery cancelled");
            }
            Err(MailError::Auth) => {
                self.record("failure");
                error!(
                    host = %self.host,
                    "SMTP authentication failed; check the configured username and password"
                );
            }
            Err(e) => {
                self.record("failure");
                error!(
                    host = %self.host,
                    port = self.port,
                    error = %e,
                    "Failed to send email alert"
                );
            }
        }
        Ok(())
    }
}

/// Plain-text body with CRLF line endings.
pub fn format_body(alert: &Alert) -> String {
    let body = format!(
        "Error code: {}\nSeverity: {}\nCommand: {}\nInfobase: {}\n\n\
         Message:\n{}\n\nTrace ID: {}\nTimestamp: {}\n",
        alert.error_code,
        alert.severity,
        alert.command,
        alert.infobase().unwrap_or("-"),
        alert.message,
        alert.trace_id,
        format_timestamp(alert),
    );
    body.replace("\r\n", "\n").replace('\r', "\n").replace('\n', "\r\n")
}

/// Returns ASCII input unchanged and encodes anything else as a sequence of
/// RFC 2047 `=?UTF-8?B?...?=` words, folded onto continuation lines.
pub fn encode_header_value(value: &str) -> String {
    if value.is_ascii() {
        return value.to_string();
    }

    let mut words = Vec::new();
    let mut chunk = String::new();
    for c in value.chars() {
        if chunk.len() + c.len_utf8() > ENCODED_WORD_CHUNK {
            words.push(encoded_word(&chunk));
            chunk.clear();
        }
        chunk.push(c);
    }
    if !chunk.is_empty() {
        words.push(encoded_word(&chunk));
    }
    words.join("\r\n ")
}

fn encoded_word(text: &str) -> String {
    format!("=?UTF-8?B?{}?=", BASE64.encode(text.as_bytes()))
}

fn format_timestamp(alert: &Alert) -> String {
    alert.timestamp.to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn missing(field: &'static str) -> ConfigError {
    ConfigError::MissingField {
        channel: CHANNEL,
        field,
    }
}

fn control_chars(field: &str) -> ConfigError {
    ConfigError::ControlCharacters {
        channel: CHANNEL,
        field: field.to_string(),
    }
}

fn check_host(host: &str) -> Result<String, ConfigError> {
    let host = host.trim();
    if host.is_empty() {
        return Err(missing("smtp_host"));
    }
    if has_control_chars(host) {
        return Err(control_chars("smtp_host"));
    }
    Ok(host.to_string())
}

/// Credentials are used only when both halves are configured.
fn credentials(config: &EmailConfig) -> Option<Credentials> {
    if config.username.is_empty() || config.password.is_empty() {
        return None;
    }
    Some(Credentials::new(
        config.username.clone(),
        config.password.clone(),
    ))
}

/// Accepts a bare `local@domain` address.
fn parse_mailbox(field: &'static str, address: &str) -> Result<Mailbox, ConfigError> {
    if has_control_chars(address) {
        return Err(control_chars(field));
    }
    let invalid = || ConfigError::InvalidAddress {
        channel: CHANNEL,
        field,
        address: address.to_string(),
    };
    let mailbox: Mailbox = address.parse().map_err(|_| invalid())?;
    if mailbox.name.is_some() {
        return Err(invalid());
    }
    Ok(mailbox)
}
