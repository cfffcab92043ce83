//! # Server Configuration
//!
//! Startup configuration, fixed once the server starts.
//!
//! Sources, later ones winning:
//!
//! 1. Built-in defaults
//! 2. A YAML file (`--config`)
//! 3. Environment variables
//! 4. Command-line flags
//!
//! ## Environment Variables
//!
//! | Variable | Field |
//! |----------|-------|
//! | `SCGI_MIN_WORKERS` | `min_workers` |
//! | `SCGI_MAX_WORKERS` | `max_workers` |
//! | `SCGI_IDLE_TIMEOUT_SECS` | `idle_timeout_secs` |
//! | `SCGI_BIND` | `bind` |
//! | `SCGI_PORT` | `port` |
//! | `SCGI_DEBUG` | `debug` (comma-separated tags) |
//! | `SCGI_STACK_SIZE` | `stack_size` (decimal or `0x` hex) |
//! | `SCGI_MAX_HEADER_BYTES` | `max_header_bytes` |
//! | `SCGI_MAX_BODY_BYTES` | `max_body_bytes` |
//!
//! ## Example
//!
//! ```yaml
//! min_workers: 2
//! max_workers: 32
//! idle_timeout_secs: 120
//! bind: 0.0.0.0
//! port: 4000
//! debug: [error]
//! ```

use crate::codec::{FrameLimits, DEFAULT_MAX_BODY_BYTES, DEFAULT_MAX_HEADER_BYTES};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Opaque debug tags enabled at startup
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DebugCriteria(BTreeSet<String>);

impl DebugCriteria {
    pub fn new<I, S>(tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(tags.into_iter().map(Into::into).collect())
    }

    /// Parse a comma-separated list, ignoring blanks
    #[must_use]
    pub fn parse_list(raw: &str) -> Self {
        Self::new(raw.split(',').map(str::trim).filter(|t| !t.is_empty()))
    }

    #[inline]
    #[must_use]
    pub fn is_enabled(&self, tag: &str) -> bool {
        self.0.contains(tag)
    }

    pub fn enable(&mut self, tag: impl Into<String>) {
        self.0.insert(tag.into());
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }
}

/// Configuration error
#[derive(Debug)]
pub enum ConfigError {
    /// The file could not be read
    Read { path: PathBuf, source: std::io::Error },
    /// The file is not valid YAML for [`ServerConfig`]
    Parse { path: PathBuf, source: serde_yaml::Error },
    /// An environment variable holds an unusable value
    Env { var: &'static str, value: String },
    /// The values are inconsistent
    Invalid(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Read { path, source } => {
                write!(f, "cannot read config '{}': {source}", path.display())
            }
            ConfigError::Parse { path, source } => {
                write!(f, "invalid config '{}': {source}", path.display())
            }
            ConfigError::Env { var, value } => write!(f, "invalid value '{value}' for {var}"),
            ConfigError::Invalid(msg) => write!(f, "invalid configuration: {msg}"),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Read { source, .. } => Some(source),
            ConfigError::Parse { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// Listener and worker pool settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    /// Workers kept alive even when idle
    pub min_workers: usize,
    /// Upper bound on concurrently served requests
    pub max_workers: usize,
    /// Idle time after which a worker above `min_workers` is torn down
    pub idle_timeout_secs: u64,
    pub bind: String,
    pub port: u16,
    pub debug: DebugCriteria,
    /// Coroutine stack size in bytes
    pub stack_size: usize,
    /// Largest accepted netstring header block
    pub max_header_bytes: usize,
    /// Largest accepted request body
    pub max_body_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            min_workers: 2,
            max_workers: 16,
            idle_timeout_secs: 60,
            bind: "127.0.0.1".to_string(),
            port: 4000,
            debug: DebugCriteria::default(),
            stack_size: 0x10000,
            max_header_bytes: DEFAULT_MAX_HEADER_BYTES,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        }
    }
}

/// Decimal or `0x`-prefixed hexadecimal
fn parse_size(val: &str) -> Option<usize> {
    match val.strip_prefix("0x") {
        Some(hex) => usize::from_str_radix(hex, 16).ok(),
        None => val.parse().ok(),
    }
}

fn env_parsed<T: std::str::FromStr>(
    var: &'static str,
    lookup: &dyn Fn(&str) -> Option<String>,
) -> Result<Option<T>, ConfigError> {
    match lookup(var) {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Env { var, value }),
    }
}

impl ServerConfig {
    /// Load from a YAML file; missing keys keep their defaults
    ///
    /// # Errors
    ///
    /// Unreadable file or invalid YAML.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_yaml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Apply `SCGI_*` overrides from the process environment
    ///
    /// # Errors
    ///
    /// A variable is set but does not parse.
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides(&|k| std::env::var(k).ok())
    }

    /// Apply overrides from any key/value lookup
    ///
    /// # Errors
    ///
    /// A key is set but does not parse.
    pub fn apply_overrides(
        &mut self,
        lookup: &dyn Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(v) = env_parsed("SCGI_MIN_WORKERS", lookup)? {
            self.min_workers = v;
        }
        if let Some(v) = env_parsed("SCGI_MAX_WORKERS", lookup)? {
            self.max_workers = v;
        }
        if let Some(v) = env_parsed("SCGI_IDLE_TIMEOUT_SECS", lookup)? {
            self.idle_timeout_secs = v;
        }
        if let Some(v) = lookup("SCGI_BIND") {
            self.bind = v;
        }
        if let Some(v) = env_parsed("SCGI_PORT", lookup)? {
            self.port = v;
        }
        if let Some(v) = lookup("SCGI_DEBUG") {
            self.debug = DebugCriteria::parse_list(&v);
        }
        if let Some(v) = lookup("SCGI_STACK_SIZE") {
            self.stack_size = parse_size(v.trim()).ok_or(ConfigError::Env {
                var: "SCGI_STACK_SIZE",
                value: v,
            })?;
        }
        if let Some(v) = env_parsed("SCGI_MAX_HEADER_BYTES", lookup)? {
            self.max_header_bytes = v;
        }
        if let Some(v) = env_parsed("SCGI_MAX_BODY_BYTES", lookup)? {
            self.max_body_bytes = v;
        }
        Ok(())
    }

    /// Check cross-field constraints
    ///
    /// # Errors
    ///
    /// [`ConfigError::Invalid`] naming the first violated constraint.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_workers == 0 {
            return Err(ConfigError::Invalid("max_workers must be at least 1".into()));
        }
        if self.max_workers < self.min_workers {
            return Err(ConfigError::Invalid(format!(
                "max_workers ({}) is below min_workers ({})",
                self.max_workers, self.min_workers
            )));
        }
        if self.idle_timeout_secs == 0 {
            return Err(ConfigError::Invalid("idle_timeout_secs must be positive".into()));
        }
        if self.bind.trim().is_empty() {
            return Err(ConfigError::Invalid("bind address is empty".into()));
        }
        Ok(())
    }

    #[must_use]
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    #[must_use]
    pub fn frame_limits(&self) -> FrameLimits {
        FrameLimits {
            max_header_bytes: self.max_header_bytes,
            max_body_bytes: self.max_body_bytes,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn defaults_are_valid() {
        ServerConfig::default().validate().unwrap();
    }

    #[test]
    fn overrides_apply() {
        let mut cfg = ServerConfig::default();
        let lookup = lookup_from(&[
            ("SCGI_MAX_WORKERS", "8"),
            ("SCGI_DEBUG", "error, request,"),
            ("SCGI_STACK_SIZE", "0x8000"),
            ("SCGI_MAX_BODY_BYTES", "1024"),
        ]);
        cfg.apply_overrides(&lookup).unwrap();
        assert_eq!(cfg.max_workers, 8);
        assert!(cfg.debug.is_enabled("error"));
        assert!(cfg.debug.is_enabled("request"));
        assert_eq!(cfg.stack_size, 0x8000);
        assert_eq!(cfg.frame_limits().max_body_bytes, 1024);
    }

    #[test]
    fn bad_override_is_reported() {
        let mut cfg = ServerConfig::default();
        let lookup = lookup_from(&[("SCGI_PORT", "http")]);
        match cfg.apply_overrides(&lookup) {
            Err(ConfigError::Env { var, value }) => {
                assert_eq!(var, "SCGI_PORT");
                assert_eq!(value, "http");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn max_below_min_rejected() {
        let cfg = ServerConfig {
            min_workers: 4,
            max_workers: 2,
            ..ServerConfig::default()
        };
        assert!(matches!(cfg.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn yaml_keeps_defaults() {
        let cfg: ServerConfig = serde_yaml::from_str("port: 9000\ndebug: [error]\n").unwrap();
        assert_eq!(cfg.port, 9000);
        assert_eq!(cfg.min_workers, 2);
        assert!(cfg.debug.is_enabled("error"));
    }

    #[test]
    fn yaml_rejects_unknown_keys() {
        assert!(serde_yaml::from_str::<ServerConfig>("workers: 3\n").is_err());
    }
}
