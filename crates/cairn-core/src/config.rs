//! TOML configuration for the artifact layer.
//!
//! Every section and field is optional. Raw values stay as written in the
//! file; the accessors on [`LayerConfig`] turn them into typed settings and
//! reject values that make no sense.

use std::path::{Path, PathBuf};
use std::time::Duration;

use cairn_backend::RetryPolicy;
use cairn_types::CacheMode;
use serde::Deserialize;

/// Errors raised while loading or interpreting a configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The config file could not be read.
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    /// The file is not valid TOML, or a field has the wrong type.
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// A field parsed but its value is out of range.
    #[error("invalid config value: {0}")]
    Invalid(String),
}

/// Top-level configuration, parsed from TOML.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct LayerConfig {
    /// Chunk cache sizing and persistence.
    pub cache: CacheSection,
    /// Backoff shape for backend calls.
    pub retry: RetrySection,
    /// Read-time verification.
    pub verify: VerifySection,
    /// Version index location.
    pub index: IndexSection,
    /// Logging configuration.
    pub log: LogSection,
}

/// `[cache]` section.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct CacheSection {
    /// Eviction threshold, e.g. `"256MB"`, `"1GB"` or raw bytes.
    pub capacity: String,
    /// `"memory"` (default) or `"disk"`.
    pub mode: String,
    /// Span directory for disk mode.
    pub dir: PathBuf,
}

impl Default for CacheSection {
    fn default() -> Self {
        let dir = dirs::home_dir()
            .map(|h| h.join(".cairn").join("cache"))
            .unwrap_or_else(|| PathBuf::from(".cairn/cache"));
        Self {
            capacity: "256MB".to_string(),
            mode: "memory".to_string(),
            dir,
        }
    }
}

/// `[retry]` section.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct RetrySection {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Delay before the first retry, in milliseconds.
    pub base_delay_ms: u64,
    /// Growth factor per retry.
    pub multiplier: f64,
    /// Cap on any single delay, in milliseconds.
    pub max_delay_ms: u64,
    /// Symmetric jitter as a fraction of the delay.
    pub jitter: f64,
    /// Per-attempt deadline in milliseconds. 0 disables it.
    pub attempt_timeout_ms: u64,
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay_ms: 100,
            multiplier: 2.0,
            max_delay_ms: 10_000,
            jitter: 0.2,
            attempt_timeout_ms: 30_000,
        }
    }
}

/// `[verify]` section.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct VerifySection {
    /// Re-hash cached bytes on every read instead of trusting them after the
    /// first successful verification.
    pub on_read: bool,
}

/// `[index]` section.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct IndexSection {
    /// Directory of the persistent version index. Omitted: a temporary index
    /// that disappears with the process.
    pub dir: Option<PathBuf>,
}

/// `[log]` section.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct LogSection {
    /// Log level filter (e.g. `"info"`, `"debug"`, `"warn"`).
    pub level: String,
}

impl Default for LogSection {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl LayerConfig {
    /// Load config from a TOML file, or defaults if no path is given.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(p) => {
                let content = std::fs::read_to_string(p)?;
                Self::from_toml(&content)
            }
            None => Ok(Self::default()),
        }
    }

    /// Parse and validate config from a TOML string.
    pub fn from_toml(s: &str) -> Result<Self, ConfigError> {
        let config: LayerConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Check every typed accessor once.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.cache_capacity_bytes()?;
        self.cache_mode()?;
        self.retry_policy()?;
        Ok(())
    }

    /// Cache eviction threshold in bytes.
    pub fn cache_capacity_bytes(&self) -> Result<u64, ConfigError> {
        parse_size(&self.cache.capacity)
    }

    /// Where cached spans live.
    pub fn cache_mode(&self) -> Result<CacheMode, ConfigError> {
        self.cache.mode.parse().map_err(ConfigError::Invalid)
    }

    /// Whether cached hits are re-verified on every read.
    pub fn verify_on_read(&self) -> bool {
        self.verify.on_read
    }

    /// Backoff policy for every backend call.
    pub fn retry_policy(&self) -> Result<RetryPolicy, ConfigError> {
        let r = &self.retry;
        if r.max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "retry.max_attempts must be at least 1".into(),
            ));
        }
        if r.multiplier.is_nan() || r.multiplier < 1.0 {
            return Err(ConfigError::Invalid(format!(
                "retry.multiplier must be >= 1.0, got {}",
                r.multiplier
            )));
        }
        if !(0.0..=1.0).contains(&r.jitter) {
            return Err(ConfigError::Invalid(format!(
                "retry.jitter must be within [0, 1], got {}",
                r.jitter
            )));
        }
        if r.max_delay_ms < r.base_delay_ms {
            return Err(ConfigError::Invalid(
                "retry.max_delay_ms is below retry.base_delay_ms".into(),
            ));
        }
        Ok(RetryPolicy {
            max_attempts: r.max_attempts,
            base_delay: Duration::from_millis(r.base_delay_ms),
            multiplier: r.multiplier,
            max_delay: Duration::from_millis(r.max_delay_ms),
            jitter: r.jitter,
            attempt_timeout: (r.attempt_timeout_ms > 0)
                .then(|| Duration::from_millis(r.attempt_timeout_ms)),
        })
    }
}

/// Parse a human-readable size into bytes.
///
/// Supports: `"256MB"`, `"1GB"`, `"512KB"`, `"1048576"` (raw bytes).
fn parse_size(s: &str) -> Result<u64, ConfigError> {
    let s = s.trim();
    let (num, unit) = if let Some(num) = s.strip_suffix("GB") {
        (num, 1_073_741_824)
    } else if let Some(num) = s.strip_suffix("MB") {
        (num, 1_048_576)
    } else if let Some(num) = s.strip_suffix("KB") {
        (num, 1_024)
    } else {
        (s, 1)
    };
    num.trim()
        .parse::<u64>()
        .ok()
        .and_then(|n| n.checked_mul(unit))
        .ok_or_else(|| ConfigError::Invalid(format!("bad size {s:?}")))
}
