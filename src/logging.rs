//! Logging and tracing initialization for deploy-sync.
//!
//! Console output is the tool's only user interface, so progress, per-file
//! failures and the final summary all go through `tracing`. Pretty output is
//! the default; JSON lines are available for log collectors.

use tracing::Level;
use tracing_subscriber::{
    EnvFilter,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

/// Configuration for the logging system.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogConfig {
    /// Output logs as JSON (for machine parsing)
    pub json: bool,
    /// Enable verbose logging (sets default level to DEBUG)
    pub verbose: bool,
}

/// Filter used when `RUST_LOG` is not set.
pub fn default_directive(verbose: bool) -> String {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    format!("deploy_sync={}", level.as_str().to_lowercase())
}

/// Initialize the tracing subscriber with the given configuration.
///
/// Call once, early in `main()`, after config is loaded. The log level can be
/// overridden at runtime via the `RUST_LOG` environment variable.
///
/// # Examples
///
/// ```ignore
/// deploy_sync::logging::init(LogConfig { verbose: true, ..Default::default() });
/// ```
pub fn init(config: LogConfig) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(config.verbose)));

    if config.json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                fmt::layer()
                    .json()
                    .with_span_events(FmtSpan::CLOSE)
                    .with_current_span(true)
                    .with_target(true),
            )
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .init();
    }
}
