//! Integration tests for building the notifier from configuration.

use alertgate::{
    config::{
        AlertingConfig, ConfigError, EmailConfig, RuleSetConfig, TelegramConfig, WebhookConfig,
    },
    services::{build_channels, build_notifier},
};
use std::collections::BTreeMap;
use tracing_test::traced_test;

fn email() -> EmailConfig {
    EmailConfig {
        smtp_host: "smtp.example.com".to_string(),
        from: "alerts@example.com".to_string(),
        to: vec!["ops@example.com".to_string()],
        ..Default::default()
    }
}

fn telegram() -> TelegramConfig {
    TelegramConfig {
        bot_token: "123456:ABC".to_string(),
        chat_ids: vec!["-100200300".to_string()],
        ..Default::default()
    }
}

fn webhook() -> WebhookConfig {
    WebhookConfig {
        urls: vec!["https://hooks.example.com/alerts".to_string()],
        ..Default::default()
    }
}

fn enabled() -> AlertingConfig {
    AlertingConfig {
        enabled: true,
        ..Default::default()
    }
}

#[test]
#[traced_test]
fn test_disabled_alerting_builds_noop_without_validation() {
    let config = AlertingConfig {
        enabled: false,
        webhook: Some(WebhookConfig {
            urls: vec!["not a url".to_string()],
            ..Default::default()
        }),
        ..Default::default()
    };
    assert!(build_notifier(&config).is_ok());
    assert!(logs_contain("Alerting is disabled"));
}

#[test]
#[traced_test]
fn test_enabled_without_channels_builds_noop() {
    assert!(build_notifier(&enabled()).is_ok());
    assert!(logs_contain("no channel is configured"));
}

#[test]
#[traced_test]
fn test_all_channels_are_built_in_order() {
    let config = AlertingConfig {
        webhook: Some(webhook()),
        telegram: Some(telegram()),
        email: Some(email()),
        ..enabled()
    };

    let channels = build_channels(&config).unwrap();
    let names: Vec<_> = channels.iter().map(|(name, _)| name.as_str()).collect();
    assert_eq!(names, vec!["email", "telegram", "webhook"]);

    assert!(build_notifier(&config).is_ok());
    assert!(logs_contain("Alerting enabled"));
    assert!(logs_contain("email, telegram, webhook"));
}

#[test]
#[traced_test]
fn test_override_for_unknown_channel_is_reported() {
    let mut config = AlertingConfig {
        webhook: Some(webhook()),
        ..enabled()
    };
    config
        .rules
        .channels
        .insert("telegram".to_string(), RuleSetConfig::default());

    assert!(build_notifier(&config).is_ok());
    assert!(logs_contain("Rule override refers to a channel that is not enabled"));
    assert!(logs_contain("replaces the global rules entirely"));
}

#[test]
fn test_validation_errors() {
    let cases: Vec<(AlertingConfig, ConfigError)> = vec![
        (
            AlertingConfig {
                email: Some(EmailConfig {
                    smtp_host: String::new(),
                    ..email()
                }),
                ..enabled()
            },
            ConfigError::MissingField {
                channel: "email",
                field: "smtp_host",
            },
        ),
        (
            AlertingConfig {
                email: Some(EmailConfig {
                    from: String::new(),
                    ..email()
                }),
                ..enabled()
            },
            ConfigError::MissingField {
                channel: "email",
                field: "from",
            },
        ),
        (
            AlertingConfig {
                telegram: Some(TelegramConfig {
                    bot_token: String::new(),
                    ..telegram()
                }),
                ..enabled()
            },
            ConfigError::MissingField {
                channel: "telegram",
                field: "bot_token",
            },
        ),
        (
            AlertingConfig {
                telegram: Some(TelegramConfig {
                    chat_ids: vec!["general".to_string()],
                    ..telegram()
                }),
                ..enabled()
            },
            ConfigError::InvalidChatId {
                channel: "telegram",
                chat_id: "general".to_string(),
            },
        ),
        (
            AlertingConfig {
                webhook: Some(WebhookConfig {
                    urls: Vec::new(),
                    ..webhook()
                }),
                ..enabled()
            },
            ConfigError::MissingField {
                channel: "webhook",
                field: "urls",
            },
        ),
        (
            AlertingConfig {
                webhook: Some(WebhookConfig {
                    headers: BTreeMap::from([("X-Api-Key".to_string(), "a\nb".to_string())]),
                    ..webhook()
                }),
                ..enabled()
            },
            ConfigError::ControlCharacters {
                channel: "webhook",
                field: "headers.X-Api-Key".to_string(),
            },
        ),
    ];

    for (config, expected) in cases {
        assert_eq!(build_notifier(&config).err(), Some(expected));
    }
}

#[test]
fn test_invalid_webhook_url_never_leaks_the_path() {
    let config = AlertingConfig {
        webhook: Some(WebhookConfig {
            urls: vec!["ftp://hooks.example.com/services/SECRET".to_string()],
            ..Default::default()
        }),
        ..enabled()
    };
    let err = build_notifier(&config).err().unwrap();
    assert!(matches!(err, ConfigError::InvalidUrl { .. }));
    assert!(!err.to_string().contains("SECRET"));
}
