//! Logging Configuration
//!
//! All settings are loaded from environment variables:
//! - `RUST_LOG`: tracing filter directives (default: `info`)
//! - `LOG_FORMAT`: `json` for one JSON object per line, anything else for text
//! - `LOG_ANSI`: `0` / `false` disables colored output

/// Default filter when `RUST_LOG` is unset or empty
pub const DEFAULT_FILTER: &str = "info";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogConfig {
    /// `EnvFilter` directives
    pub filter: String,
    /// Emit JSON lines instead of human-readable text
    pub json: bool,
    /// Colored output for text logs
    pub ansi: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        LogConfig {
            filter: DEFAULT_FILTER.to_string(),
            json: false,
            ansi: true,
        }
    }
}

impl LogConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        Self::from_vars(|name| std::env::var(name).ok())
    }

    fn from_vars(var: impl Fn(&str) -> Option<String>) -> Self {
        LogConfig {
            filter: var("RUST_LOG")
                .filter(|s| !s.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_FILTER.to_string()),
            json: var("LOG_FORMAT")
                .map(|v| v.eq_ignore_ascii_case("json"))
                .unwrap_or(false),
            ansi: var("LOG_ANSI")
                .map(|v| !(v == "0" || v.eq_ignore_ascii_case("false")))
                .unwrap_or(true),
        }
    }

    /// Raise the filter to `debug` for this crate, keeping other directives
    pub fn verbose(mut self) -> Self {
        self.filter = format!("{},tar_upload=debug", self.filter);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn vars(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = LogConfig::from_vars(vars(&[]));
        assert_eq!(config, LogConfig::default());
    }

    #[test]
    fn test_from_vars() {
        let config = LogConfig::from_vars(vars(&[
            ("RUST_LOG", "tar_upload=trace"),
            ("LOG_FORMAT", "JSON"),
            ("LOG_ANSI", "false"),
        ]));
        assert_eq!(config.filter, "tar_upload=trace");
        assert!(config.json);
        assert!(!config.ansi);
    }

    #[test]
    fn test_verbose() {
        let config = LogConfig::default().verbose();
        assert_eq!(config.filter, "info,tar_upload=debug");
    }
}
