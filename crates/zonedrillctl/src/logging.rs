//! Tracing setup for zonedrillctl
//!
//! Logs go to stderr so `--json` output on stdout stays parseable.

use tracing_subscriber::EnvFilter;

/// Filter override, same syntax as RUST_LOG
pub const LOG_ENV: &str = "ZONEDRILL_LOG";

const VERBOSE_FILTER: &str = "info,zonedrill_common=debug,zonedrillctl=debug";

/// `--verbose` wins, then $ZONEDRILL_LOG, then the configured level
pub fn filter_for(configured: &str, verbose: bool) -> EnvFilter {
    if verbose {
        return EnvFilter::new(VERBOSE_FILTER);
    }
    EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(configured))
}

pub fn init(configured: &str, verbose: bool) {
    // A second init (tests) keeps the first subscriber
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter_for(configured, verbose))
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}
