//! Delivery channels.
//!
//! Each channel validates its configuration when it is built and then
//! formats and delivers alerts over its own transport. Delivery failures are
//! logged inside the channel; [`crate::core::Channel::send`] still returns `Ok`.

pub mod email;
pub mod mailer;
pub mod telegram;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
pub mod webhook;

pub use email::EmailChannel;
pub use telegram::TelegramChannel;
pub use webhook::WebhookChannel;

/// Name under which the email channel is registered.
pub const EMAIL: &str = "email";
/// Name under which the Telegram channel is registered.
pub const TELEGRAM: &str = "telegram";
/// Name under which the webhook channel is registered.
pub const WEBHOOK: &str = "webhook";

/// Reads at most `limit` bytes of a response body and drops the rest.
pub(crate) async fn read_body_limited(mut response: reqwest::Response, limit: usize) -> Vec<u8> {
    let mut body = Vec::new();
    while let Ok(Some(chunk)) = response.chunk().await {
        let remaining = limit - body.len();
        if chunk.len() >= remaining {
            body.extend_from_slice(&chunk[..remaining]);
            break;
        }
        body.extend_from_slice(&chunk);
    }
    body
}
