//! Per-channel alert filtering.
//!
//! A [`RulesEngine`] holds one global [`RuleSet`] and optional per-channel
//! overrides. An override replaces the global set for that channel
//! completely: fields left unset in the override fall back to the permissive
//! defaults, not to the global values.

use crate::{
    config::{RuleSetConfig, RulesConfig},
    core::{Alert, Severity},
};
use std::collections::{HashMap, HashSet};
use tracing::warn;

/// A compiled set of filters applied to one channel.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuleSet {
    pub min_severity: Severity,
    pub exclude_error_codes: HashSet<String>,
    pub include_error_codes: HashSet<String>,
    pub exclude_commands: HashSet<String>,
    pub include_commands: HashSet<String>,
}

impl RuleSet {
    /// Compiles a rule set from its configuration form.
    pub fn from_config(config: &RuleSetConfig) -> Self {
        Self {
            min_severity: Severity::parse_lenient(&config.min_severity),
            exclude_error_codes: config.exclude_error_codes.iter().cloned().collect(),
            include_error_codes: config.include_error_codes.iter().cloned().collect(),
            exclude_commands: config.exclude_commands.iter().cloned().collect(),
            include_commands: config.include_commands.iter().cloned().collect(),
        }
    }

    /// Evaluates the rule set against an alert.
    pub fn is_match(&self, alert: &Alert) -> bool {
        if alert.severity < self.min_severity {
            return false;
        }
        passes_gate(&alert.error_code, &self.include_error_codes, &self.exclude_error_codes)
            && passes_gate(&alert.command, &self.include_commands, &self.exclude_commands)
    }
}

/// A non-empty include list wins over the exclude list.
fn passes_gate(value: &str, include: &HashSet<String>, exclude: &HashSet<String>) -> bool {
    if !include.is_empty() {
        return include.contains(value);
    }
    !exclude.contains(value)
}

/// Decides which channels an alert may reach.
#[derive(Debug, Clone, Default)]
pub struct RulesEngine {
    global: RuleSet,
    channels: HashMap<String, RuleSet>,
}

impl RulesEngine {
    pub fn new(global: RuleSet, channels: HashMap<String, RuleSet>) -> Self {
        Self { global, channels }
    }

    /// Builds the engine from configuration, warning about settings that
    /// silently widen what gets through.
    pub fn from_config(config: &RulesConfig) -> Self {
        warn_unknown_severity("global", &config.global.min_severity);

        let channels = config
            .channels
            .iter()
            .map(|(name, rule_set)| {
                if rule_set.min_severity.trim().is_empty() {
                    warn!(
                        channel = %name,
                        "Channel rule override has no min_severity; \
                         it replaces the global rules entirely and defaults to INFO"
                    );
                } else {
                    warn_unknown_severity(name, &rule_set.min_severity);
                }
                (name.clone(), RuleSet::from_config(rule_set))
            })
            .collect();

        Self {
            global: RuleSet::from_config(&config.global),
            channels,
        }
    }

    /// Returns `true` if `alert` should be delivered to `channel`.
    pub fn evaluate(&self, alert: &Alert, channel: &str) -> bool {
        self.rule_set_for(channel).is_match(alert)
    }

    /// The rule set in force for a channel.
    pub fn rule_set_for(&self, channel: &str) -> &RuleSet {
        self.channels.get(channel).unwrap_or(&self.global)
    }

    /// Names of channels that carry an override.
    pub fn overridden_channels(&self) -> impl Iterator<Item = &str> {
        self.channels.keys().map(String::as_str)
    }
}

fn warn_unknown_severity(scope: &str, value: &str) {
    if !value.trim().is_empty() && Severity::parse_strict(value).is_none() {
        warn!(
            scope,
            min_severity = value,
            "Unrecognised min_severity; treating it as INFO"
        );
    }
}
