//! Core domain types and service traits for alertgate
//!
//! This module defines the alert record handed in by callers and the trait
//! contracts that connect the dispatcher to individual delivery channels.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio_util::sync::CancellationToken;

/// Product tag attached to outgoing payloads.
pub const SOURCE_TAG: &str = "alertgate";

/// Ordered alert severity.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    #[default]
    Info,
    Warning,
    Critical,
}

impl Severity {
    /// Wire name of the severity.
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "INFO",
            Severity::Warning => "WARNING",
            Severity::Critical => "CRITICAL",
        }
    }

    /// Parses a severity, case-insensitively.
    ///
    /// Empty and unrecognised strings map to [`Severity::Info`], the lowest
    /// level. A typo in a `min_severity` setting therefore lets everything
    /// through instead of failing; use [`Severity::parse_strict`] to detect that.
    pub fn parse_lenient(value: &str) -> Self {
        Self::parse_strict(value).unwrap_or(Severity::Info)
    }

    /// Parses a severity, returning `None` for empty or unknown names.
    pub fn parse_strict(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "info" => Some(Severity::Info),
            "warning" => Some(Severity::Warning),
            "critical" => Some(Severity::Critical),
            _ => None,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single noteworthy event that may be forwarded to external channels.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Alert {
    /// Machine-readable code; also the rate limiting and rule key.
    pub error_code: String,
    /// Free-form description.
    pub message: String,
    /// Correlation id for tracing the event across systems.
    pub trace_id: String,
    /// When the event happened.
    pub timestamp: DateTime<Utc>,
    /// The command that raised the alert.
    pub command: String,
    /// Optional infobase context.
    pub infobase: Option<String>,
    pub severity: Severity,
}

impl Alert {
    /// Creates an alert stamped with the current time.
    pub fn new(error_code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error_code: error_code.into(),
            message: message.into(),
            trace_id: String::new(),
            timestamp: Utc::now(),
            command: String::new(),
            infobase: None,
            severity: Severity::Info,
        }
    }

    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    pub fn with_command(mut self, command: impl Into<String>) -> Self {
        self.command = command.into();
        self
    }

    pub fn with_trace_id(mut self, trace_id: impl Into<String>) -> Self {
        self.trace_id = trace_id.into();
        self
    }

    pub fn with_infobase(mut self, infobase: impl Into<String>) -> Self {
        self.infobase = Some(infobase.into());
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// The infobase, if it is set and not blank.
    pub fn infobase(&self) -> Option<&str> {
        self.infobase.as_deref().filter(|ib| !ib.trim().is_empty())
    }
}

// =============================================================================
// Service Traits
// =============================================================================

/// Delivers alerts to one external destination.
#[async_trait]
pub trait Channel: Send + Sync {
    /// Formats and delivers an alert.
    ///
    /// Built-in channels log their own failures and return `Ok(())` so that a
    /// broken destination never reaches the caller. The error variant is kept
    /// for custom channels; the dispatcher logs and discards it.
    async fn send(&self, cancel: &CancellationToken, alert: &Alert) -> Result<()>;
}

/// The entry point used by the host application.
///
/// `send` has no failure outcome: every error is recovered and logged
/// internally so that an alerting outage cannot disturb the caller.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, cancel: &CancellationToken, alert: &Alert);
}

/// A notifier that drops every alert. Used when alerting is disabled.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopNotifier;

#[async_trait]
impl Notifier for NoopNotifier {
    async fn send(&self, _cancel: &CancellationToken, _alert: &Alert) {}
}
