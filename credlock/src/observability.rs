//! Tracing setup

use tracing_subscriber::EnvFilter;

use crate::config::Settings;

/// Initialize JSON tracing output filtered by the configured log level
///
/// Only the first call installs a subscriber; later calls (tests, embedded
/// hosts that already set one up) are ignored.
pub fn init_tracing(settings: &Settings) {
    let log_level = settings.service.log_level.as_str();

    let installed = tracing_subscriber::fmt()
        .json()
        .with_env_filter(EnvFilter::try_new(log_level).unwrap_or_else(|_| EnvFilter::new("info")))
        .try_init()
        .is_ok();

    if installed {
        tracing::info!("Tracing initialized for service: {}", settings.service.name);
    }
}
