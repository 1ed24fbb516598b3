//! Tunnel configuration.
//!
//! Loaded from defaults, then an optional JSON file, then `QUEUE_TUNNEL_*`
//! environment variables.

use std::{path::Path, str::FromStr, time::Duration};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    ChunkCodec, SessionName,
    codec::{DEFAULT_BATCH_CAP, MAX_BATCH_CAP},
    traits::SessionNameError,
};

/// Environment variable naming an optional JSON config file.
pub const CONFIG_FILE_ENV: &str = "QUEUE_TUNNEL_CONFIG";

/// Configuration error.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config file: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("Invalid value for {key}: {value:?}")]
    InvalidValue { key: &'static str, value: String },
    #[error("No session name configured (set QUEUE_TUNNEL_SESSION)")]
    MissingSession,
    #[error("Invalid session name: {0}")]
    InvalidSession(#[from] SessionNameError),
    #[error("{0} must be greater than zero")]
    Zero(&'static str),
    #[error("Batch cap {0} out of range 1..={max}", max = MAX_BATCH_CAP)]
    BatchCap(usize),
}

/// Which chunking strategy to use.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CodecKind {
    PerByte,
    #[default]
    Batched,
}

impl FromStr for CodecKind {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "per-byte" | "per_byte" | "v1" => Ok(Self::PerByte),
            "batched" | "v2" => Ok(Self::Batched),
            _ => Err(()),
        }
    }
}

/// Configuration shared by both endpoints.
///
/// Both sides of a session must agree on `codec` and `batch_cap`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TunnelConfig {
    /// Session name; both endpoints must use the same one.
    pub session: Option<String>,
    pub codec: CodecKind,
    pub batch_cap: usize,
    /// Interval between polls of the inbound lane.
    pub poll_interval_ms: u64,
    /// Upper bound on a single wait for local input.
    pub read_timeout_ms: u64,
    /// Ceiling for transport retry backoff.
    pub max_backoff_ms: u64,
    /// Typing this on the client ends the session. Empty, the default,
    /// disables it.
    pub detach_sequence: String,
    /// Shell command line for the server; `$SHELL` when unset.
    pub shell: Option<String>,
    pub cols: u16,
    pub rows: u16,
    /// Base URL of the remote store.
    pub store_url: Option<String>,
    /// Pre-issued token passed to the store as `auth`.
    pub auth_token: Option<String>,
    pub request_timeout_ms: u64,
}

impl Default for TunnelConfig {
    fn default() -> Self {
        Self {
            session: None,
            codec: CodecKind::Batched,
            batch_cap: DEFAULT_BATCH_CAP,
            poll_interval_ms: 10,
            read_timeout_ms: 10,
            max_backoff_ms: 2_000,
            detach_sequence: String::new(),
            shell: None,
            cols: 100,
            rows: 30,
            store_url: None,
            auth_token: None,
            request_timeout_ms: 10_000,
        }
    }
}

impl TunnelConfig {
    /// Create a config for a named session with default settings.
    #[must_use]
    pub fn for_session(session: impl Into<String>) -> Self {
        Self {
            session: Some(session.into()),
            ..Self::default()
        }
    }

    /// Load from a JSON file. Missing fields keep their defaults.
    ///
    /// # Errors
    /// Returns error if the file cannot be read or parsed.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Load defaults, the file named by `QUEUE_TUNNEL_CONFIG` if set, then
    /// environment overrides.
    ///
    /// # Errors
    /// Returns error if the file or an environment value is invalid.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = match std::env::var_os(CONFIG_FILE_ENV) {
            Some(path) => {
                tracing::debug!(path = ?path, "Loading config file");
                Self::from_json_file(path)?
            }
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Apply `QUEUE_TUNNEL_*` overrides read through `lookup`.
    ///
    /// # Errors
    /// Returns error if a numeric or enum value does not parse.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("QUEUE_TUNNEL_SESSION") {
            self.session = Some(v);
        }
        if let Some(v) = lookup("QUEUE_TUNNEL_CODEC") {
            self.codec = v.parse().map_err(|()| ConfigError::InvalidValue {
                key: "QUEUE_TUNNEL_CODEC",
                value: v,
            })?;
        }
        if let Some(v) = lookup("QUEUE_TUNNEL_BATCH_CAP") {
            self.batch_cap = parse_num("QUEUE_TUNNEL_BATCH_CAP", v)?;
        }
        if let Some(v) = lookup("QUEUE_TUNNEL_POLL_MS") {
            self.poll_interval_ms = parse_num("QUEUE_TUNNEL_POLL_MS", v)?;
        }
        if let Some(v) = lookup("QUEUE_TUNNEL_READ_TIMEOUT_MS") {
            self.read_timeout_ms = parse_num("QUEUE_TUNNEL_READ_TIMEOUT_MS", v)?;
        }
        if let Some(v) = lookup("QUEUE_TUNNEL_MAX_BACKOFF_MS") {
            self.max_backoff_ms = parse_num("QUEUE_TUNNEL_MAX_BACKOFF_MS", v)?;
        }
        if let Some(v) = lookup("QUEUE_TUNNEL_DETACH") {
            self.detach_sequence = v;
        }
        if let Some(v) = lookup("QUEUE_TUNNEL_SHELL") {
            self.shell = Some(v);
        }
        if let Some(v) = lookup("QUEUE_TUNNEL_COLS") {
            self.cols = parse_num("QUEUE_TUNNEL_COLS", v)?;
        }
        if let Some(v) = lookup("QUEUE_TUNNEL_ROWS") {
            self.rows = parse_num("QUEUE_TUNNEL_ROWS", v)?;
        }
        if let Some(v) = lookup("QUEUE_TUNNEL_STORE_URL") {
            self.store_url = Some(v);
        }
        if let Some(v) = lookup("QUEUE_TUNNEL_AUTH") {
            self.auth_token = Some(v);
        }
        if let Some(v) = lookup("QUEUE_TUNNEL_REQUEST_TIMEOUT_MS") {
            self.request_timeout_ms = parse_num("QUEUE_TUNNEL_REQUEST_TIMEOUT_MS", v)?;
        }
        Ok(())
    }

    /// Check ranges and return the validated session name.
    ///
    /// # Errors
    /// Returns error on a missing or invalid session name, zero intervals,
    /// or a batch cap out of range.
    pub fn validate(&self) -> Result<SessionName, ConfigError> {
        if self.poll_interval_ms == 0 {
            return Err(ConfigError::Zero("poll_interval_ms"));
        }
        if self.read_timeout_ms == 0 {
            return Err(ConfigError::Zero("read_timeout_ms"));
        }
        if self.max_backoff_ms == 0 {
            return Err(ConfigError::Zero("max_backoff_ms"));
        }
        if self.codec == CodecKind::Batched && !(1..=MAX_BATCH_CAP).contains(&self.batch_cap) {
            return Err(ConfigError::BatchCap(self.batch_cap));
        }
        let name = self.session.as_deref().ok_or(ConfigError::MissingSession)?;
        Ok(SessionName::new(name)?)
    }

    /// The configured chunk codec.
    #[must_use]
    pub const fn chunk_codec(&self) -> ChunkCodec {
        match self.codec {
            CodecKind::PerByte => ChunkCodec::PerByte,
            CodecKind::Batched => ChunkCodec::Batched {
                cap: self.batch_cap,
            },
        }
    }

    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    #[must_use]
    pub const fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    #[must_use]
    pub const fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }

    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Detach sequence bytes, `None` when disabled.
    #[must_use]
    pub fn detach_bytes(&self) -> Option<&[u8]> {
        if self.detach_sequence.is_empty() {
            None
        } else {
            Some(self.detach_sequence.as_bytes())
        }
    }
}

fn parse_num<N: FromStr>(key: &'static str, value: String) -> Result<N, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidValue { key, value })
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_follow_batched_protocol() {
        let config = TunnelConfig::default();
        assert_eq!(config.chunk_codec(), ChunkCodec::Batched { cap: 128 });
        assert_eq!(config.poll_interval(), Duration::from_millis(10));
        assert_eq!(config.detach_bytes(), None);
    }

    #[test]
    fn test_env_overrides() {
        let mut config = TunnelConfig::default();
        config
            .apply_env(lookup(&[
                ("QUEUE_TUNNEL_SESSION", "demo-session"),
                ("QUEUE_TUNNEL_CODEC", "per-byte"),
                ("QUEUE_TUNNEL_POLL_MS", "100"),
                ("QUEUE_TUNNEL_DETACH", "..1"),
            ]))
            .unwrap();

        assert_eq!(config.validate().unwrap().as_str(), "demo-session");
        assert_eq!(config.chunk_codec(), ChunkCodec::PerByte);
        assert_eq!(config.poll_interval_ms, 100);
        assert_eq!(config.detach_bytes(), Some(&b"..1"[..]));
    }

    #[test]
    fn test_env_rejects_garbage() {
        let mut config = TunnelConfig::default();
        let err = config
            .apply_env(lookup(&[("QUEUE_TUNNEL_POLL_MS", "soon")]))
            .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidValue {
                key: "QUEUE_TUNNEL_POLL_MS",
                ..
            }
        ));

        let err = config
            .apply_env(lookup(&[("QUEUE_TUNNEL_CODEC", "zstd")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn test_validate() {
        assert!(matches!(
            TunnelConfig::default().validate(),
            Err(ConfigError::MissingSession)
        ));

        let mut config = TunnelConfig::for_session("s1");
        config.poll_interval_ms = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Zero(_))));

        let mut config = TunnelConfig::for_session("s1");
        config.batch_cap = 0;
        assert!(matches!(config.validate(), Err(ConfigError::BatchCap(0))));

        let config = TunnelConfig::for_session("bad/name");
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidSession(_))
        ));
    }

    #[test]
    fn test_json_partial_config() {
        let config: TunnelConfig =
            serde_json::from_str(r#"{"session":"s1","codec":"per-byte","rows":40}"#).unwrap();
        assert_eq!(config.codec, CodecKind::PerByte);
        assert_eq!(config.rows, 40);
        assert_eq!(config.cols, 100);
    }

    #[test]
    fn test_from_json_file() {
        let path = std::env::temp_dir().join(format!("queue-tunnel-config-{}.json", std::process::id()));
        std::fs::write(&path, r#"{"session":"from-file","batch_cap":64}"#).unwrap();

        let config = TunnelConfig::from_json_file(&path).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(config.session.as_deref(), Some("from-file"));
        assert_eq!(config.chunk_codec(), ChunkCodec::Batched { cap: 64 });
    }
}
