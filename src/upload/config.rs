//! Configuration for the Upload Engine
//!
//! Loaded from an optional TOML file, then overridden by CLI flags.

use crate::store::UploadOptions;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

// TigerStyle: Explicit limits with _MAX suffix
pub const PARALLEL_MAX: usize = 256;
pub const RETRIES_MAX: u32 = 1_000;
pub const CHUNK_SIZE_MIN: usize = 4 * 1024;
pub const CHUNK_SIZE_MAX: usize = 16 * 1024 * 1024;

/// Invalid configuration
#[derive(Debug)]
pub enum ConfigError {
    /// A field is out of range
    Invalid { field: &'static str, reason: String },
    /// Header string not of the form `Name: value`
    Header(String),
    /// Config file unreadable
    Io(std::io::Error),
    /// Config file not valid TOML
    Parse(String),
    /// Endpoint not usable with this build
    Endpoint(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Invalid { field, reason } => write!(f, "invalid {}: {}", field, reason),
            ConfigError::Header(h) => write!(f, "invalid header '{}', expected 'Name: value'", h),
            ConfigError::Io(e) => write!(f, "reading config: {}", e),
            ConfigError::Parse(msg) => write!(f, "parsing config: {}", msg),
            ConfigError::Endpoint(msg) => write!(f, "unsupported endpoint: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        ConfigError::Io(e)
    }
}

/// One extra request header. Repeated names are all sent, in order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    pub name: String,
    pub value: String,
}

/// Main configuration for an upload run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadConfig {
    /// Concurrent scans in the initial fan-out (default: 4)
    pub parallel: usize,
    /// Retryable failures tolerated per entry (default: 3)
    pub retries: u32,
    /// Replica count requested from the store
    pub replication: Option<u16>,
    /// Extra request headers, in the order given
    pub headers: Vec<Header>,
    /// Replace files that already exist (default: true)
    pub overwrite: bool,
    /// Bytes per body chunk read from the archive (default: 64KB)
    pub chunk_size: usize,
    /// Chunks buffered ahead of the upload before parsing blocks (default: 4)
    pub chunk_queue_depth: usize,
    /// Per-request timeout for network stores (default: 60s)
    #[serde(with = "duration_millis")]
    pub request_timeout: Duration,
    /// `user.name` for WebHDFS simple auth
    pub user: Option<String>,
}

impl Default for UploadConfig {
    fn default() -> Self {
        UploadConfig {
            parallel: 4,
            retries: 3,
            replication: None,
            headers: Vec::new(),
            overwrite: true,
            chunk_size: 64 * 1024, // 64KB
            chunk_queue_depth: 4,
            request_timeout: Duration::from_secs(60),
            user: None,
        }
    }
}

impl UploadConfig {
    /// Configuration for tests (small chunks so bodies span several)
    pub fn test() -> Self {
        UploadConfig {
            parallel: 3,
            retries: 3,
            chunk_size: CHUNK_SIZE_MIN,
            chunk_queue_depth: 2,
            request_timeout: Duration::from_secs(5),
            ..Default::default()
        }
    }

    /// Load from a TOML file; missing fields take defaults
    pub fn from_toml_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        toml::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Add a header given as `Name: value`
    pub fn add_header(&mut self, raw: &str) -> Result<(), ConfigError> {
        let (name, value) = raw
            .split_once(':')
            .ok_or_else(|| ConfigError::Header(raw.to_string()))?;
        let name = name.trim();
        if name.is_empty() {
            return Err(ConfigError::Header(raw.to_string()));
        }
        self.headers.push(Header {
            name: name.to_string(),
            value: value.trim().to_string(),
        });
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.parallel == 0 || self.parallel > PARALLEL_MAX {
            return Err(ConfigError::Invalid {
                field: "parallel",
                reason: format!("must be in 1..={}, got {}", PARALLEL_MAX, self.parallel),
            });
        }
        if self.retries > RETRIES_MAX {
            return Err(ConfigError::Invalid {
                field: "retries",
                reason: format!("must be at most {}, got {}", RETRIES_MAX, self.retries),
            });
        }
        if self.replication == Some(0) {
            return Err(ConfigError::Invalid {
                field: "replication",
                reason: "must be at least 1".to_string(),
            });
        }
        if !(CHUNK_SIZE_MIN..=CHUNK_SIZE_MAX).contains(&self.chunk_size) {
            return Err(ConfigError::Invalid {
                field: "chunk_size",
                reason: format!(
                    "must be in {}..={}, got {}",
                    CHUNK_SIZE_MIN, CHUNK_SIZE_MAX, self.chunk_size
                ),
            });
        }
        if self.chunk_queue_depth == 0 {
            return Err(ConfigError::Invalid {
                field: "chunk_queue_depth",
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }

    /// Per-request options derived from this config
    pub fn upload_options(&self) -> UploadOptions {
        UploadOptions {
            replication: self.replication,
            headers: self
                .headers
                .iter()
                .map(|h| (h.name.clone(), h.value.clone()))
                .collect(),
            overwrite: self.overwrite,
        }
    }
}

/// Serde helper for Duration as milliseconds
mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = UploadConfig::default();
        config.validate().unwrap();
        assert_eq!(config.parallel, 4);
        assert_eq!(config.retries, 3);
        UploadConfig::test().validate().unwrap();
    }

    #[test]
    fn test_config_json_roundtrip_keeps_timeout() {
        let config = UploadConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let parsed: UploadConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(config.request_timeout, parsed.request_timeout);
    }

    #[test]
    fn test_from_toml_partial() {
        let config = UploadConfig::from_toml_str(
            r#"
            parallel = 8
            replication = 2
            request_timeout = 1500

            [[headers]]
            name = "X-Trace"
            value = "abc"
            "#,
        )
        .unwrap();
        assert_eq!(config.parallel, 8);
        assert_eq!(config.replication, Some(2));
        assert_eq!(config.retries, 3);
        assert_eq!(config.request_timeout, Duration::from_millis(1500));
        assert_eq!(
            config.headers,
            vec![Header {
                name: "X-Trace".to_string(),
                value: "abc".to_string()
            }]
        );
    }

    #[test]
    fn test_add_header() {
        let mut config = UploadConfig::default();
        config.add_header("Authorization: Bearer a:b").unwrap();
        assert_eq!(config.headers[0].name, "Authorization");
        assert_eq!(config.headers[0].value, "Bearer a:b");
        assert!(matches!(
            config.add_header("no-colon"),
            Err(ConfigError::Header(_))
        ));
        assert!(matches!(config.add_header(": x"), Err(ConfigError::Header(_))));
    }

    #[test]
    fn test_validate_rejects_out_of_range() {
        let config = UploadConfig {
            parallel: 0,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { field: "parallel", .. })
        ));

        let config = UploadConfig {
            replication: Some(0),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_upload_options() {
        let mut config = UploadConfig {
            replication: Some(3),
            ..Default::default()
        };
        config.add_header("X-A: 1").unwrap();
        let options = config.upload_options();
        assert_eq!(options.replication, Some(3));
        assert_eq!(options.headers, vec![("X-A".to_string(), "1".to_string())]);
        assert!(options.overwrite);
    }

    #[test]
    fn test_repeated_header_names_kept_in_order() {
        let mut config = UploadConfig::default();
        config.add_header("X-Tag: b").unwrap();
        config.add_header("X-Other: 1").unwrap();
        config.add_header("X-Tag: a").unwrap();

        let options = config.upload_options();
        assert_eq!(
            options.headers,
            vec![
                ("X-Tag".to_string(), "b".to_string()),
                ("X-Other".to_string(), "1".to_string()),
                ("X-Tag".to_string(), "a".to_string()),
            ]
        );
    }
}
