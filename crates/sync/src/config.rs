//! Engine configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

/// Environment variable overriding [`SyncConfig::fetch_timeout_ms`].
pub const FETCH_TIMEOUT_ENV: &str = "CAREBASE_FETCH_TIMEOUT_MS";
/// Environment variable overriding [`SyncConfig::refresh_timeout_ms`].
pub const REFRESH_TIMEOUT_ENV: &str = "CAREBASE_REFRESH_TIMEOUT_MS";

/// Errors that can occur when loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
	/// Error reading a configuration file.
	#[error("I/O error reading {path}: {error}")]
	Io {
		/// Path to the file that failed to read.
		path: PathBuf,
		/// The underlying I/O error.
		error: std::io::Error,
	},

	/// Error parsing TOML syntax or an unknown key.
	#[error("TOML parse error: {0}")]
	Toml(#[from] toml::de::Error),

	/// A value parsed but is out of range.
	#[error("invalid value for {field}: {reason}")]
	Invalid {
		/// The offending key.
		field: &'static str,
		/// Why it was rejected.
		reason: String,
	},
}

/// Result type for configuration operations.
pub type Result<T> = std::result::Result<T, ConfigError>;

/// Tunables for one [`SyncEngine`](crate::SyncEngine).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SyncConfig {
	/// Per-fetch timeout for plan orchestration.
	pub fetch_timeout_ms: u64,
	/// Per-refresh timeout for the mutation coordinator.
	pub refresh_timeout_ms: u64,
	/// Capacity of the notification broadcast channel.
	pub notification_buffer: usize,
	/// Capacity of the session watcher's ordered delivery channel.
	pub event_buffer: usize,
}

impl Default for SyncConfig {
	fn default() -> Self {
		Self {
			fetch_timeout_ms: 10_000,
			refresh_timeout_ms: 10_000,
			notification_buffer: 64,
			event_buffer: 32,
		}
	}
}

impl SyncConfig {
	/// Parses and validates a TOML document. Missing keys take their defaults.
	pub fn from_toml_str(input: &str) -> Result<Self> {
		let config: Self = toml::from_str(input)?;
		config.validate()?;
		Ok(config)
	}

	/// Reads `path`, applies environment overrides, and validates the result.
	pub fn load(path: &Path) -> Result<Self> {
		let content = std::fs::read_to_string(path).map_err(|error| ConfigError::Io {
			path: path.to_path_buf(),
			error,
		})?;
		let config: Self = toml::from_str(&content)?;
		let config = config.with_env_overrides()?;
		tracing::debug!(path = %path.display(), ?config, "sync.config.loaded");
		Ok(config)
	}

	/// Applies `CAREBASE_*` environment overrides and validates the result.
	pub fn with_env_overrides(self) -> Result<Self> {
		self.with_overrides(std::env::var(FETCH_TIMEOUT_ENV).ok(), std::env::var(REFRESH_TIMEOUT_ENV).ok())
	}

	fn with_overrides(mut self, fetch_timeout_ms: Option<String>, refresh_timeout_ms: Option<String>) -> Result<Self> {
		if let Some(raw) = fetch_timeout_ms {
			self.fetch_timeout_ms = parse_override("fetch_timeout_ms", &raw)?;
		}
		if let Some(raw) = refresh_timeout_ms {
			self.refresh_timeout_ms = parse_override("refresh_timeout_ms", &raw)?;
		}
		self.validate()?;
		Ok(self)
	}

	/// Rejects zero timeouts and zero-capacity channels.
	pub fn validate(&self) -> Result<()> {
		let checks: [(&'static str, u64); 4] = [
			("fetch_timeout_ms", self.fetch_timeout_ms),
			("refresh_timeout_ms", self.refresh_timeout_ms),
			("notification_buffer", self.notification_buffer as u64),
			("event_buffer", self.event_buffer as u64),
		];
		match checks.into_iter().find(|(_, value)| *value == 0) {
			Some((field, _)) => Err(ConfigError::Invalid {
				field,
				reason: "must be greater than zero".into(),
			}),
			None => Ok(()),
		}
	}

	pub fn fetch_timeout(&self) -> Duration {
		Duration::from_millis(self.fetch_timeout_ms)
	}

	pub fn refresh_timeout(&self) -> Duration {
		Duration::from_millis(self.refresh_timeout_ms)
	}
}

fn parse_override(field: &'static str, raw: &str) -> Result<u64> {
	raw.trim().parse::<u64>().map_err(|err| ConfigError::Invalid {
		field,
		reason: format!("{raw:?} is not a millisecond count ({err})"),
	})
}
