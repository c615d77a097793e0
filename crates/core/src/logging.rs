//! Console logging bootstrap.
//!
//! By default the inference engine and ffmpeg stderr streams are noisy, so
//! their targets are quieted unless verbosity is raised explicitly. Filter
//! precedence: `--log-filter` flag, then `RUST_LOG`, then the `-v` count,
//! then the default.

use tracing_subscriber::EnvFilter;

pub const DEFAULT_LOG_FILTER: &str = "info";
pub const DEFAULT_NOISE_FILTER: &str = "ort=error,ffmpeg_stderr=error";

#[derive(Debug, Clone, Default)]
pub struct LoggingOptions {
    /// `-v` count: 0 = info, 1 = debug, 2+ = trace with engine logging.
    pub verbose: u8,
    /// Explicit filter string, wins over everything.
    pub cli_log_filter: Option<String>,
    /// `RUST_LOG`, if set.
    pub rust_log_env: Option<String>,
}

pub fn select_log_filter(options: &LoggingOptions) -> String {
    if let Some(filter) = &options.cli_log_filter {
        return filter.clone();
    }
    if let Some(filter) = &options.rust_log_env {
        if !filter.trim().is_empty() {
            return filter.clone();
        }
    }

    match options.verbose {
        0 => format!("{DEFAULT_LOG_FILTER},{DEFAULT_NOISE_FILTER}"),
        1 => format!("debug,{DEFAULT_NOISE_FILTER}"),
        _ => "trace".to_string(),
    }
}

/// Install the global console subscriber. Safe to call once per process.
pub fn init(options: &LoggingOptions) {
    let filter = EnvFilter::new(select_log_filter(options));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}
