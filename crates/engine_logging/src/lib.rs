#![deny(missing_docs)]
//! Shared logging utilities for the progress tracker workspace.
//!
//! This crate provides the `engine_*` logging macros used across the codebase
//! and a minimal test initializer for the global logger.
//!
//! Every macro also takes a leading `job: <id>,` which prefixes the line with
//! the shortened job id:
//!
//! ```
//! engine_logging::engine_info!(job: "3f2a9c1e-0000-4000", "completed in {} ms", 120);
//! ```

/// Logs a trace-level message using the global logging facade.
#[macro_export]
macro_rules! engine_trace {
    (job: $id:expr, $($arg:tt)*) => {{
        log::trace!("[{}] {}", $crate::short_id($id), format_args!($($arg)*));
    }};
    ($($arg:tt)*) => {{
        log::trace!($($arg)*);
    }};
}

/// Logs an info-level message using the global logging facade.
#[macro_export]
macro_rules! engine_info {
    (job: $id:expr, $($arg:tt)*) => {{
        log::info!("[{}] {}", $crate::short_id($id), format_args!($($arg)*));
    }};
    ($($arg:tt)*) => {{
        log::info!($($arg)*);
    }};
}

/// Logs a debug-level message using the global logging facade.
#[macro_export]
macro_rules! engine_debug {
    (job: $id:expr, $($arg:tt)*) => {{
        log::debug!("[{}] {}", $crate::short_id($id), format_args!($($arg)*));
    }};
    ($($arg:tt)*) => {{
        log::debug!($($arg)*);
    }};
}

/// Logs a warn-level message using the global logging facade.
#[macro_export]
macro_rules! engine_warn {
    (job: $id:expr, $($arg:tt)*) => {{
        log::warn!("[{}] {}", $crate::short_id($id), format_args!($($arg)*));
    }};
    ($($arg:tt)*) => {{
        log::warn!($($arg)*);
    }};
}

/// Logs an error-level message using the global logging facade.
#[macro_export]
macro_rules! engine_error {
    (job: $id:expr, $($arg:tt)*) => {{
        log::error!("[{}] {}", $crate::short_id($id), format_args!($($arg)*));
    }};
    ($($arg:tt)*) => {{
        log::error!($($arg)*);
    }};
}

/// Shortens a job id for log lines; progress ids are usually UUIDs.
pub fn short_id(job_id: &str) -> &str {
    match job_id.char_indices().nth(8) {
        Some((idx, _)) => &job_id[..idx],
        None => job_id,
    }
}

/// Environment variable that overrides the test log level (`trace`, `off`, ...).
pub const TEST_LOG_ENV: &str = "KBPROGRESS_TEST_LOG";

/// Initializes a simple terminal logger for use in unit tests.
///
/// This safely no-ops if another logger has already been initialized.
pub fn initialize_for_tests() {
    use simplelog::{ColorChoice, CombinedLogger, Config, TermLogger, TerminalMode};

    let level = std::env::var(TEST_LOG_ENV)
        .ok()
        .and_then(|raw| raw.parse().ok())
        .unwrap_or(log::LevelFilter::Debug);

    // Ignore the error if a logger was already set by another test.
    let _ = CombinedLogger::init(vec![TermLogger::new(
        level,
        Config::default(),
        TerminalMode::Mixed,
        ColorChoice::Auto,
    )]);
}
