//! Fans a single alert out to every configured channel.

use crate::{
    core::{Alert, Channel, Notifier},
    rate_limit::RateLimiter,
    rules::RulesEngine,
};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Rate-limits alerts once, then sends them to each channel whose rules
/// allow it.
///
/// Channels are visited sequentially in name order.
pub struct Dispatcher {
    channels: BTreeMap<String, Arc<dyn Channel>>,
    rate_limiter: RateLimiter,
    rules: RulesEngine,
}

impl Dispatcher {
    pub fn new(
        channels: impl IntoIterator<Item = (String, Arc<dyn Channel>)>,
        rate_limiter: RateLimiter,
        rules: RulesEngine,
    ) -> Self {
        Self {
            channels: channels.into_iter().collect(),
            rate_limiter,
            rules,
        }
    }

    /// Registered channel names, in delivery order.
    pub fn channel_names(&self) -> impl Iterator<Item = &str> {
        self.channels.keys().map(String::as_str)
    }

    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.rate_limiter
    }
}

#[async_trait]
impl Notifier for Dispatcher {
    async fn send(&self, cancel: &CancellationToken, alert: &Alert) {
        if !self.rate_limiter.allow(&alert.error_code) {
            debug!(error_code = %alert.error_code, "Alert suppressed by rate limiter");
            metrics::counter!("alerts_rate_limited_total").increment(1);
            return;
        }

        let total = self.channels.len();
        let mut sent = 0;
        let mut failed = 0;
        let mut skipped = 0;
        for (name, channel) in &self.channels {
            if cancel.is_cancelled() {
                debug!(sent, failed, skipped, total, "Dispatch cancelled");
                return;
            }
            if !self.rules.evaluate(alert, name) {
                debug!(
                    channel = %name,
                    error_code = %alert.error_code,
                    "Alert filtered out by rules"
                );
                skipped += 1;
                continue;
            }
            match channel.send(cancel, alert).await {
                Ok(()) => sent += 1,
                Err(e) => {
                    debug!(channel = %name, error = %e, "Channel reported a delivery error");
                    failed += 1;
                }
            }
        }
        debug!(
            error_code = %alert.error_code,
            sent,
            failed,
            skipped,
            total,
            "Alert dispatched"
        );
    }
}
