// src/observability.rs
//! Tracing initialization
//!
//! Installs a `tracing-subscriber` fmt layer filtered by `EnvFilter`.
//! `RUST_LOG` takes precedence over the configured level.

use crate::utils::config::LoggingConfig;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Install the global subscriber; returns `false` if one was already set
pub fn init_tracing(config: &LoggingConfig) -> bool {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    let installed = if config.json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json().with_thread_names(true))
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_thread_names(true))
            .try_init()
    };

    installed.is_ok()
}
