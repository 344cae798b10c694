//! In-memory fakes for exercising channels and the dispatcher without
//! network access.

use crate::{
    channels::mailer::{MailError, MailTransport},
    core::{Alert, Channel},
};
use async_trait::async_trait;
use lettre::Message;
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

/// A mail transport that keeps accepted messages in memory.
#[derive(Clone, Default)]
pub struct RecordingTransport {
    accepted: Arc<Mutex<Vec<Message>>>,
    failure: Option<MailError>,
    stall: bool,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rejects every message with `error`.
    pub fn failing_with(mut self, error: MailError) -> Self {
        self.failure = Some(error);
        self
    }

    /// Never completes a send, like a server that stops answering.
    pub fn stalled(mut self) -> Self {
        self.stall = true;
        self
    }

    /// Accepted messages, formatted as they would go over the wire.
    pub fn messages(&self) -> Vec<String> {
        self.accepted
            .lock()
            .unwrap()
            .iter()
            .map(|m| String::from_utf8_lossy(&m.formatted()).into_owned())
            .collect()
    }

    /// Envelope recipients of each accepted message.
    pub fn recipients(&self) -> Vec<Vec<String>> {
        self.accepted
            .lock()
            .unwrap()
            .iter()
            .map(|m| m.envelope().to().iter().map(ToString::to_string).collect())
            .collect()
    }
}

#[async_trait]
impl MailTransport for RecordingTransport {
    async fn send(&self, message: Message) -> Result<(), MailError> {
        if self.stall {
            std::future::pending::<()>().await;
        }
        if let Some(error) = &self.failure {
            return Err(error.clone());
        }
        self.accepted.lock().unwrap().push(message);
        Ok(())
    }
}

/// A channel that records the alerts it receives and can be told to fail.
#[derive(Clone, Default)]
pub struct RecordingChannel {
    received: Arc<Mutex<Vec<Alert>>>,
    fail: bool,
    cancel_after_send: Option<CancellationToken>,
}

impl RecordingChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// A channel whose `send` always returns an error.
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    /// Cancels `token` after recording an alert, simulating a caller that
    /// gives up half way through a fan-out.
    pub fn cancelling(token: CancellationToken) -> Self {
        Self {
            cancel_after_send: Some(token),
            ..Default::default()
        }
    }

    pub fn received(&self) -> Vec<Alert> {
        self.received.lock().unwrap().clone()
    }

    pub fn count(&self) -> usize {
        self.received.lock().unwrap().len()
    }
}

#[async_trait]
impl Channel for RecordingChannel {
    async fn send(&self, _cancel: &CancellationToken, alert: &Alert) -> anyhow::Result<()> {
        self.received.lock().unwrap().push(alert.clone());
        if let Some(token) = &self.cancel_after_send {
            token.cancel();
        }
        if self.fail {
            anyhow::bail!("simulated delivery failure");
        }
        Ok(())
    }
}
