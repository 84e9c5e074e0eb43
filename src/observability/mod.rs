//! Observability
//!
//! Structured logging through `tracing`. Logs always go to stderr: stdout
//! carries the completed-path records.

pub mod config;

pub use config::LogConfig;

use tracing_subscriber::EnvFilter;

/// Install the global subscriber. Fails if one is already installed or the
/// filter directives do not parse.
pub fn init_tracing(config: &LogConfig) -> Result<(), String> {
    let filter = EnvFilter::try_new(&config.filter)
        .map_err(|e| format!("invalid log filter '{}': {}", config.filter, e))?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);

    let result = if config.json {
        builder.json().try_init()
    } else {
        builder.with_ansi(config.ansi).try_init()
    };
    result.map_err(|e| format!("installing log subscriber: {}", e))
}
