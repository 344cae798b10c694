//! Command-Line Interface (CLI) argument parsing.
//!
//! This module defines the command-line arguments for the application using the
//! `clap` crate. These arguments are parsed at startup and then merged with
//! the configuration from the `alertgate.toml` file and environment variables.

use clap::{Args, Parser, Subcommand};
use figment::{
    value::{Dict, Map, Value},
    Error, Metadata, Profile, Provider,
};
use std::path::PathBuf;

/// Validates alerting configuration and delivers alerts to email, Telegram
/// and webhook channels.
#[derive(Parser, Debug, Clone, Default)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long, value_name = "FILE", global = true)]
    pub config: Option<PathBuf>,

    /// Minimum seconds between two alerts with the same error code.
    #[arg(long, value_name = "SECONDS", global = true)]
    pub rate_limit_window: Option<u64>,

    /// Log level or `tracing` filter directive.
    #[arg(long, value_name = "LEVEL", global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Validate the configuration and list the active channels.
    Check,
    /// Send one alert through every active channel.
    Send(SendArgs),
}

#[derive(Args, Debug, Clone)]
pub struct SendArgs {
    #[arg(long)]
    pub error_code: String,

    #[arg(long)]
    pub message: String,

    /// INFO, WARNING or CRITICAL.
    #[arg(long, default_value = "INFO")]
    pub severity: String,

    /// Name of the command that raised the alert.
    #[arg(long, default_value = "")]
    pub command: String,

    #[arg(long)]
    pub infobase: Option<String>,

    /// Correlation id. A random one is generated when omitted.
    #[arg(long)]
    pub trace_id: Option<String>,
}

impl Provider for Cli {
    fn metadata(&self) -> Metadata {
        Metadata::named("Command-Line Arguments")
    }

    fn data(&self) -> Result<Map<Profile, Dict>, Error> {
        let mut dict = Dict::new();

        if let Some(level) = &self.log_level {
            dict.insert("log_level".into(), Value::from(level.clone()));
        }

        if let Some(window) = self.rate_limit_window {
            let mut alerting = Dict::new();
            alerting.insert("rate_limit_window".into(), Value::from(window));
            dict.insert("alerting".into(), Value::from(alerting));
        }

        let mut map = Map::new();
        map.insert(Profile::Default, dict);
        Ok(map)
    }
}
