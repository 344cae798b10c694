//! alertgate - alert delivery from the command line
//!
//! Loads the alerting configuration, then either validates it (`check`) or
//! pushes a single alert through every active channel (`send`).

use alertgate::{
    cli::{Cli, Command, SendArgs},
    config::Config,
    core::{Alert, Severity},
    services::{build_channels, build_notifier},
};
use anyhow::{bail, Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Layer sources: defaults, file, environment, then CLI flags.
    let config = Config::load(cli.config.as_deref(), cli.clone())
        .context("failed to load configuration")?;

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    debug!(?config, "Configuration loaded");

    match cli.command.unwrap_or(Command::Check) {
        Command::Check => check(&config),
        Command::Send(args) => send(&config, args).await,
    }
}

fn check(config: &Config) -> Result<()> {
    let channels = build_channels(&config.alerting).context("invalid alerting configuration")?;
    let names: Vec<&str> = channels.iter().map(|(name, _)| name.as_str()).collect();

    if !config.alerting.enabled {
        println!("Configuration is valid; alerting is disabled");
    } else if names.is_empty() {
        println!("Configuration is valid; no channel is enabled");
    } else {
        println!("Configuration is valid; active channels: {}", names.join(", "));
    }
    Ok(())
}

async fn send(config: &Config, args: SendArgs) -> Result<()> {
    let Some(severity) = Severity::parse_strict(&args.severity) else {
        bail!("unknown severity `{}`; expected INFO, WARNING or CRITICAL", args.severity);
    };
    if !config.alerting.enabled {
        warn!("Alerting is disabled; the alert will not be delivered");
    }

    let notifier = build_notifier(&config.alerting).context("invalid alerting configuration")?;

    let mut alert = Alert::new(args.error_code, args.message)
        .with_severity(severity)
        .with_command(args.command)
        .with_trace_id(
            args.trace_id
                .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
        );
    if let Some(infobase) = args.infobase {
        alert = alert.with_infobase(infobase);
    }

    let cancel = CancellationToken::new();
    let ctrl_c = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Interrupted; abandoning delivery");
                cancel.cancel();
            }
        })
    };

    info!(error_code = %alert.error_code, trace_id = %alert.trace_id, "Sending alert");
    notifier.send(&cancel, &alert).await;
    ctrl_c.abort();
    Ok(())
}
