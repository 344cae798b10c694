//! Builds the alert delivery pipeline from configuration.

use crate::{
    channels::{self, EmailChannel, TelegramChannel, WebhookChannel},
    config::{AlertingConfig, ConfigError},
    core::{Channel, NoopNotifier, Notifier},
    dispatcher::Dispatcher,
    rate_limit::RateLimiter,
    rules::RulesEngine,
};
use itertools::Itertools;
use std::sync::Arc;
use tracing::{info, warn};

/// Validates and constructs every enabled channel.
///
/// Channels with `enabled = false` are skipped without validation. The first
/// invalid channel aborts construction.
pub fn build_channels(
    config: &AlertingConfig,
) -> Result<Vec<(String, Arc<dyn Channel>)>, ConfigError> {
    let mut built: Vec<(String, Arc<dyn Channel>)> = Vec::new();

    if let Some(email) = config.email.as_ref().filter(|c| c.enabled) {
        let channel = EmailChannel::from_config(email.clone())?;
        built.push((channels::EMAIL.to_string(), Arc::new(channel)));
    }
    if let Some(telegram) = config.telegram.as_ref().filter(|c| c.enabled) {
        let channel = TelegramChannel::new(telegram.clone())?;
        built.push((channels::TELEGRAM.to_string(), Arc::new(channel)));
    }
    if let Some(webhook) = config.webhook.as_ref().filter(|c| c.enabled) {
        let channel = WebhookChannel::new(webhook.clone())?;
        built.push((channels::WEBHOOK.to_string(), Arc::new(channel)));
    }

    Ok(built)
}

/// Builds the notifier used by the rest of the application.
///
/// Returns a [`NoopNotifier`] when alerting is disabled or no channel is
/// enabled, and a [`Dispatcher`] otherwise.
pub fn build_notifier(config: &AlertingConfig) -> Result<Arc<dyn Notifier>, ConfigError> {
    if !config.enabled {
        info!("Alerting is disabled");
        return Ok(Arc::new(NoopNotifier));
    }

    let channels = build_channels(config)?;
    if channels.is_empty() {
        warn!("Alerting is enabled but no channel is configured; alerts will be dropped");
        return Ok(Arc::new(NoopNotifier));
    }

    let rules = RulesEngine::from_config(&config.rules);
    for name in rules.overridden_channels() {
        if !channels.iter().any(|(channel, _)| channel == name) {
            warn!(channel = %name, "Rule override refers to a channel that is not enabled");
        }
    }

    let dispatcher = Dispatcher::new(channels, RateLimiter::new(config.rate_limit_window), rules);
    info!(
        channels = %dispatcher.channel_names().join(", "),
        rate_limit_window_secs = config.rate_limit_window.as_secs(),
        "Alerting enabled"
    );
    Ok(Arc::new(dispatcher))
}
