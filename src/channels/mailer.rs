//! SMTP submission for the email channel, built on `lettre`.

use crate::{config::ConfigError, validation::has_control_chars};
use async_trait::async_trait;
use lettre::{
    transport::smtp::{
        authentication::{Credentials, Mechanism},
        client::{Tls, TlsParameters},
        extension::ClientId,
    },
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use std::time::Duration;
use thiserror::Error;

/// Port on which `use_tls` means TLS from the first byte.
pub const IMPLICIT_TLS_PORT: u16 = 465;

/// Reply codes that mean the server refused the credentials.
const AUTH_FAILURE_CODES: [&str; 3] = ["454", "534", "535"];

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MailError {
    /// Authentication was rejected. Carries no server text, which may quote
    /// the credentials.
    #[error("authentication failed")]
    Auth,

    #[error("{0}")]
    Delivery(String),

    #[error("SMTP conversation timed out after {0:?}")]
    Timeout(Duration),

    #[error("delivery cancelled")]
    Cancelled,
}

/// Hands a finished message to an SMTP server.
#[async_trait]
pub trait MailTransport: Send + Sync {
    async fn send(&self, message: Message) -> Result<(), MailError>;
}

/// How the connection to the relay is protected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Security {
    /// TLS from the first byte.
    ImplicitTls,
    /// STARTTLS must succeed; credentials never travel in plain text.
    StartTlsRequired,
    /// STARTTLS when the server offers it, plain text otherwise.
    StartTlsOpportunistic,
    Plain,
}

impl Security {
    pub fn select(use_tls: bool, port: u16, authenticated: bool) -> Self {
        match (use_tls, port == IMPLICIT_TLS_PORT, authenticated) {
            (false, _, _) => Security::Plain,
            (true, true, _) => Security::ImplicitTls,
            (true, false, true) => Security::StartTlsRequired,
            (true, false, false) => Security::StartTlsOpportunistic,
        }
    }
}

/// Sends through a real relay, one connection per message.
pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
}

impl SmtpMailer {
    pub fn new(
        host: &str,
        port: u16,
        security: Security,
        credentials: Option<Credentials>,
        timeout: Duration,
    ) -> Result<Self, ConfigError> {
        let tls = match security {
            Security::Plain => Tls::None,
            Security::ImplicitTls => Tls::Wrapper(tls_parameters(host)?),
            Security::StartTlsRequired => Tls::Required(tls_parameters(host)?),
            Security::StartTlsOpportunistic => Tls::Opportunistic(tls_parameters(host)?),
        };

        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(host)
            .port(port)
            .tls(tls)
            .timeout(Some(timeout))
            .hello_name(ClientId::Domain(local_hostname()));
        if let Some(credentials) = credentials {
            builder = builder
                .credentials(credentials)
                .authentication(vec![Mechanism::Plain]);
        }

        Ok(Self {
            transport: builder.build(),
        })
    }
}

#[async_trait]
impl MailTransport for SmtpMailer {
    async fn send(&self, message: Message) -> Result<(), MailError> {
        match self.transport.send(message).await {
            Ok(_) => Ok(()),
            Err(e) if is_auth_failure(&e) => Err(MailError::Auth),
            Err(e) => Err(MailError::Delivery(e.to_string())),
        }
    }
}

fn is_auth_failure(error: &lettre::transport::smtp::Error) -> bool {
    error
        .status()
        .is_some_and(|code| AUTH_FAILURE_CODES.contains(&code.to_string().as_str()))
}

fn tls_parameters(host: &str) -> Result<TlsParameters, ConfigError> {
    TlsParameters::new(host.to_string()).map_err(|e| ConfigError::InvalidTls {
        channel: "email",
        reason: e.to_string(),
    })
}

fn local_hostname() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .filter(|h| !h.is_empty() && !has_control_chars(h) && !h.contains(' '))
        .unwrap_or_else(|| "localhost".to_string())
}
