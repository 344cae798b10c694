//! alertgate - alert delivery engine
//!
//! Decides whether a runtime alert should reach external channels (email,
//! Telegram, webhooks) and delivers it while keeping delivery failures away
//! from the caller. Start with [`services::build_notifier`].

pub mod channels;
pub mod cli;
pub mod clock;
pub mod config;
pub mod core;
pub mod dispatcher;
pub mod rate_limit;
pub mod rules;
pub mod services;
pub mod validation;

// Re-export core types for convenience
pub use crate::core::*;
