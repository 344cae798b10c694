use alertgate::cli::Cli;
use alertgate::config::Config;
use alertgate::core::Severity;
use alertgate::rules::RulesEngine;
use clap::Parser;
use serial_test::serial;
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;
use tempfile::NamedTempFile;

/// A helper function to run a test with a temporary config file.
fn with_config_file<F>(toml_content: &str, test_fn: F)
where
    F: FnOnce(PathBuf),
{
    let mut file = NamedTempFile::new().unwrap();
    write!(file, "{}", toml_content).unwrap();
    let path = file.path().to_path_buf();
    test_fn(path);
}

fn load(path: &std::path::Path) -> anyhow::Result<Config> {
    Config::load(Some(path), Cli::default())
}

#[test]
#[serial]
fn test_defaults_without_file() {
    let config = Config::load(None, Cli::default()).unwrap();
    assert_eq!(config.log_level, "info");
    assert!(!config.alerting.enabled);
    assert_eq!(config.alerting.rate_limit_window, Duration::from_secs(300));
    assert!(config.alerting.email.is_none());
    assert!(config.alerting.telegram.is_none());
    assert!(config.alerting.webhook.is_none());
}

#[test]
#[serial]
fn test_load_full_valid_config() {
    let toml_content = r#"
        log_level = "debug"

        [alerting]
        enabled = true
        rate_limit_window = 120

        [alerting.email]
        smtp_host = "smtp.example.com"
        smtp_port = 465
        username = "alerts"
        password = "hunter2"
        from = "alerts@example.com"
        to = ["ops@example.com", "dba@example.com"]
        subject_template = "[{Prefix}] {Severity} {ErrorCode}"

        [alerting.telegram]
        bot_token = "123456:ABC"
        chat_ids = ["-1001234567890", "@ops_alerts"]

        [alerting.webhook]
        urls = ["https://hooks.example.com/a", "https://hooks.example.com/b"]
        max_retries = 5
        timeout = 3
        [alerting.webhook.headers]
        Authorization = "Bearer xyz"

        [alerting.rules]
        min_severity = "warning"
        exclude_error_codes = ["NOISY"]

        [alerting.rules.channels.telegram]
        min_severity = "critical"
    "#;

    with_config_file(toml_content, |path| {
        let config = load(&path).unwrap();
        assert_eq!(config.log_level, "debug");

        let alerting = &config.alerting;
        assert!(alerting.enabled);
        assert_eq!(alerting.rate_limit_window, Duration::from_secs(120));

        let email = alerting.email.as_ref().unwrap();
        assert!(email.enabled);
        assert_eq!(email.smtp_port, 465);
        assert!(email.use_tls);
        assert_eq!(email.to.len(), 2);
        assert_eq!(email.subject_prefix, "alertgate");
        assert_eq!(email.timeout, Duration::from_secs(30));

        let telegram = alerting.telegram.as_ref().unwrap();
        assert_eq!(telegram.api_url, "https://api.telegram.org");
        assert_eq!(telegram.chat_ids, vec!["-1001234567890", "@ops_alerts"]);

        let webhook = alerting.webhook.as_ref().unwrap();
        assert_eq!(webhook.max_retries, 5);
        assert_eq!(webhook.timeout, Duration::from_secs(3));
        assert_eq!(webhook.headers["Authorization"], "Bearer xyz");

        assert_eq!(alerting.rules.global.min_severity, "warning");
        assert_eq!(alerting.rules.global.exclude_error_codes, vec!["NOISY"]);

        let rules = RulesEngine::from_config(&alerting.rules);
        assert_eq!(rules.rule_set_for("email").min_severity, Severity::Warning);
        assert_eq!(rules.rule_set_for("telegram").min_severity, Severity::Critical);
        assert!(rules.rule_set_for("telegram").exclude_error_codes.is_empty());
    });
}

#[test]
#[serial]
fn test_env_overrides_file() {
    let toml_content = r#"
        [alerting]
        enabled = true
        rate_limit_window = 120
    "#;

    with_config_file(toml_content, |path| {
        std::env::set_var("ALERTGATE_ALERTING__RATE_LIMIT_WINDOW", "42");
        std::env::set_var("ALERTGATE_LOG_LEVEL", "warn");
        let config = load(&path);
        std::env::remove_var("ALERTGATE_ALERTING__RATE_LIMIT_WINDOW");
        std::env::remove_var("ALERTGATE_LOG_LEVEL");

        let config = config.unwrap();
        assert!(config.alerting.enabled);
        assert_eq!(config.alerting.rate_limit_window, Duration::from_secs(42));
        assert_eq!(config.log_level, "warn");
    });
}

#[test]
#[serial]
fn test_cli_flags_override_everything() {
    let toml_content = r#"
        log_level = "debug"
        [alerting]
        rate_limit_window = 120
    "#;

    with_config_file(toml_content, |path| {
        std::env::set_var("ALERTGATE_ALERTING__RATE_LIMIT_WINDOW", "42");
        let cli = Cli::try_parse_from([
            "alertgate",
            "--config",
            path.to_str().unwrap(),
            "--rate-limit-window",
            "7",
            "--log-level",
            "trace",
            "check",
        ])
        .unwrap();
        let config = Config::load(cli.config.as_deref(), cli.clone());
        std::env::remove_var("ALERTGATE_ALERTING__RATE_LIMIT_WINDOW");

        let config = config.unwrap();
        assert_eq!(config.alerting.rate_limit_window, Duration::from_secs(7));
        assert_eq!(config.log_level, "trace");
    });
}

#[test]
#[serial]
fn test_invalid_type_is_rejected() {
    let toml_content = r#"
        [alerting]
        rate_limit_window = "soon"
    "#;

    with_config_file(toml_content, |path| {
        assert!(load(&path).is_err());
    });
}

#[test]
#[serial]
fn test_debug_output_redacts_secrets() {
    let toml_content = r#"
        [alerting.email]
        password = "hunter2"
        [alerting.telegram]
        bot_token = "123456:SECRET"
        [alerting.webhook]
        urls = ["https://hooks.example.com/services/T000/SECRET"]
    "#;

    with_config_file(toml_content, |path| {
        let config = load(&path).unwrap();
        let debug = format!("{:?}", config);
        assert!(!debug.contains("hunter2"));
        assert!(!debug.contains("SECRET"));
        assert!(debug.contains("https://hooks.example.com"));
    });
}
