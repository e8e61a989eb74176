//! Logging for the realtime client.
//!
//! The macros format eagerly and hand the message to `tracing` under one
//! target, so hosts can tune realtime noise on its own:
//! `RUST_LOG=shiftwire::realtime=debug`.

use tracing_subscriber::EnvFilter;

/// Target every realtime log line is emitted under.
pub const TARGET: &str = "shiftwire::realtime";

/// Filter used when `RUST_LOG` is unset.
pub const DEFAULT_FILTER: &str = "shiftwire=info,shiftwire_client=info";

pub fn log_info_impl(msg: &str) {
    tracing::info!(target: TARGET, "{}", msg);
}

pub fn log_error_impl(msg: &str) {
    tracing::error!(target: TARGET, "{}", msg);
}

pub fn log_warn_impl(msg: &str) {
    tracing::warn!(target: TARGET, "{}", msg);
}

pub fn log_debug_impl(msg: &str) {
    tracing::debug!(target: TARGET, "{}", msg);
}

/// Install a fmt subscriber filtered by `RUST_LOG`, falling back to
/// `default_filter`. Does nothing if a global subscriber is already set.
pub fn init_tracing(default_filter: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

/// Log an info message
#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => {
        $crate::logging::log_info_impl(&format!($($arg)*))
    };
}

/// Log an error message
#[macro_export]
macro_rules! log_error {
    ($($arg:tt)*) => {
        $crate::logging::log_error_impl(&format!($($arg)*))
    };
}

/// Log a warning message
#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => {
        $crate::logging::log_warn_impl(&format!($($arg)*))
    };
}

/// Log a debug message
#[macro_export]
macro_rules! log_debug {
    ($($arg:tt)*) => {
        $crate::logging::log_debug_impl(&format!($($arg)*))
    };
}
