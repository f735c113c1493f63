//! Diagnostic output setup

use tracing_subscriber::EnvFilter;

use crate::config::LOG_ENV;

/// Install a stderr `fmt` subscriber
///
/// The filter comes from `LUA_HOOK_LOG` when set, otherwise from
/// `default_filter`. Does nothing if a global subscriber already exists, so
/// the host or an embedding test harness keeps its own.
pub fn init(default_filter: &str) {
    let filter = EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_new(default_filter))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .try_init();
}
