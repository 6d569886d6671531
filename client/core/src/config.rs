//! Client Configuration
//!
//! Centralized configuration for the chat client, loaded with the following
//! priority (highest first):
//!
//! 1. Environment variables
//! 2. TOML configuration file
//! 3. Default values
//!
//! # XDG Base Directory Compliance
//!
//! The configuration file lives at `$XDG_CONFIG_HOME/tether/client.toml`
//! (typically `~/.config/tether/client.toml`).
//!
//! # Example Configuration
//!
//! ```toml
//! endpoint = "http://192.168.1.20:8000"
//! provider = "ollama"
//! system_prompt = "You are a concise assistant."
//!
//! [timeouts]
//! connect_ms = 5000
//! request_secs = 600
//!
//! [coalesce]
//! min_interval_ms = 80
//! min_chars = 48
//! ```
//!
//! # Snapshot Semantics
//!
//! Sessions take the configuration as an immutable snapshot at creation
//! time. Changing the endpoint mid-stream never affects an in-flight
//! session; callers re-create sessions (and re-probe) after a change.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Environment variable naming the relay endpoint
pub const ENDPOINT_ENV: &str = "TETHER_ENDPOINT";
/// Environment variable naming the provider hint
pub const PROVIDER_ENV: &str = "TETHER_PROVIDER";
/// Environment variable overriding the system prompt
pub const SYSTEM_PROMPT_ENV: &str = "TETHER_SYSTEM_PROMPT";

/// Default system instruction sent with every request
const DEFAULT_SYSTEM_PROMPT: &str =
    "You are a helpful assistant. Answer concisely and directly.";

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur when loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the config file
    #[error("failed to read config file at {path}: {source}")]
    Read {
        /// The path that was attempted
        path: PathBuf,
        /// The underlying IO error
        source: std::io::Error,
    },

    /// Failed to parse TOML
    #[error("failed to parse TOML config: {0}")]
    Parse(#[from] toml::de::Error),
}

// =============================================================================
// Coalescing Policy
// =============================================================================

/// Throttle policy for partial-update delivery
///
/// A partial update is emitted when either threshold is crossed since the
/// previous emission: enough wall time has passed, or enough new text has
/// accumulated. Bounds UI update frequency without bounding
/// latency-to-first-token.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CoalescePolicy {
    /// Minimum time between partial updates
    pub min_interval: Duration,
    /// Accumulated-character growth that forces an update regardless of time
    pub min_chars: usize,
}

impl Default for CoalescePolicy {
    fn default() -> Self {
        Self {
            min_interval: Duration::from_millis(80),
            min_chars: 48,
        }
    }
}

// =============================================================================
// Client Configuration
// =============================================================================

/// Configuration snapshot for the chat client
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClientConfig {
    /// Base URL of the relay server (e.g. `http://192.168.1.20:8000`).
    /// `None` means not yet configured; every request path reports
    /// [`crate::ChatError::NotConfigured`] until one is set.
    pub endpoint: Option<String>,
    /// Optional provider hint forwarded to the relay
    pub provider: Option<String>,
    /// System instruction prepended to every request
    pub system_prompt: String,
    /// Connection establishment timeout
    pub connect_timeout: Duration,
    /// Overall request timeout. Generous: model generation is slow, and the
    /// stream is expected to idle between tokens.
    pub request_timeout: Duration,
    /// Partial-update throttle policy
    pub coalesce: CoalescePolicy,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            provider: None,
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            connect_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(600),
            coalesce: CoalescePolicy::default(),
        }
    }
}

impl ClientConfig {
    /// Create a configuration pointing at an endpoint, defaults elsewhere
    pub fn with_endpoint(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: Some(endpoint.into()),
            ..Self::default()
        }
    }

    /// Load configuration from the default file location plus environment.
    ///
    /// A missing file is not an error; defaults apply.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = match default_config_path() {
            Some(path) if path.exists() => Self::load_from_path(&path)?,
            _ => Self::default(),
        };
        config.apply_env();
        Ok(config)
    }

    /// Load configuration from a specific TOML file (no environment applied)
    pub fn load_from_path(path: &std::path::Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let file: ConfigFile = toml::from_str(&raw)?;
        Ok(file.into())
    }

    /// Build configuration from environment variables over defaults
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env();
        config
    }

    /// Overlay environment variables onto this configuration
    fn apply_env(&mut self) {
        if let Ok(endpoint) = std::env::var(ENDPOINT_ENV) {
            if !endpoint.trim().is_empty() {
                self.endpoint = Some(endpoint);
            }
        }
        if let Ok(provider) = std::env::var(PROVIDER_ENV) {
            if !provider.trim().is_empty() {
                self.provider = Some(provider);
            }
        }
        if let Ok(prompt) = std::env::var(SYSTEM_PROMPT_ENV) {
            if !prompt.trim().is_empty() {
                self.system_prompt = prompt;
            }
        }
    }
}

/// Default config file path under XDG config home
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("tether").join("client.toml"))
}

// =============================================================================
// TOML File Shape
// =============================================================================

/// On-disk representation; every field optional so partial files work
#[derive(Debug, Default, Serialize, Deserialize)]
struct ConfigFile {
    endpoint: Option<String>,
    provider: Option<String>,
    system_prompt: Option<String>,
    #[serde(default)]
    timeouts: TimeoutsFile,
    #[serde(default)]
    coalesce: CoalesceFile,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct TimeoutsFile {
    connect_ms: Option<u64>,
    request_secs: Option<u64>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct CoalesceFile {
    min_interval_ms: Option<u64>,
    min_chars: Option<usize>,
}

impl From<ConfigFile> for ClientConfig {
    fn from(file: ConfigFile) -> Self {
        let defaults = Self::default();
        Self {
            endpoint: file.endpoint,
            provider: file.provider,
            system_prompt: file.system_prompt.unwrap_or(defaults.system_prompt),
            connect_timeout: file
                .timeouts
                .connect_ms
                .map_or(defaults.connect_timeout, Duration::from_millis),
            request_timeout: file
                .timeouts
                .request_secs
                .map_or(defaults.request_timeout, Duration::from_secs),
            coalesce: CoalescePolicy {
                min_interval: file
                    .coalesce
                    .min_interval_ms
                    .map_or(defaults.coalesce.min_interval, Duration::from_millis),
                min_chars: file.coalesce.min_chars.unwrap_or(defaults.coalesce.min_chars),
            },
        }
    }
}
