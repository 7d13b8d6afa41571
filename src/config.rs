//! JSON-backed application configuration.
//!
//! Settings live at `~/.humblebundle/config.json` alongside the download
//! ledger. A missing file means defaults; a present but malformed file is
//! an error, not a silent reset, so a typo never wipes user settings.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

/// Default concurrent download limit.
pub const DEFAULT_MAX_CONCURRENT: usize = 3;

/// Default admission wait before a queued request gives up, in seconds.
const DEFAULT_ADMISSION_TIMEOUT_SECS: u64 = 300;

/// Default shutdown grace period, in seconds.
const DEFAULT_SHUTDOWN_GRACE_SECS: u64 = 30;

/// Error type for configuration loading and saving.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The config file could not be read or written.
    #[error("failed to access config file {path}: {source}")]
    Io {
        /// Config file path.
        path: PathBuf,
        /// Underlying IO error.
        source: std::io::Error,
    },

    /// The config file exists but is not valid JSON for this schema.
    #[error("invalid config file {path}: {source}")]
    Parse {
        /// Config file path.
        path: PathBuf,
        /// Underlying JSON error.
        source: serde_json::Error,
    },

    /// A loaded value is outside its allowed range.
    #[error("invalid `max_concurrent_downloads`: {value} (expected 1..=10)")]
    InvalidConcurrency {
        /// The rejected value.
        value: usize,
    },

    /// No home directory to anchor the default config path.
    #[error("cannot determine home directory for config path")]
    NoHomeDir,
}

/// Application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Concurrent download limit (1..=10).
    pub max_concurrent_downloads: usize,
    /// How long a queued request waits for admission before giving up.
    pub admission_timeout_secs: u64,
    /// How long shutdown waits for in-flight downloads.
    pub shutdown_grace_secs: u64,
    /// Directory downloads are written into.
    pub output_dir: PathBuf,
    /// Ledger database path; `None` means the default location.
    pub database_path: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_concurrent_downloads: DEFAULT_MAX_CONCURRENT,
            admission_timeout_secs: DEFAULT_ADMISSION_TIMEOUT_SECS,
            shutdown_grace_secs: DEFAULT_SHUTDOWN_GRACE_SECS,
            output_dir: default_output_dir(),
            database_path: None,
        }
    }
}

impl Config {
    /// Loads configuration from `path`, falling back to defaults when the
    /// file does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when the file exists but cannot be read,
    /// parsed, or validated.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            debug!(path = %path.display(), "no config file; using defaults");
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self =
            serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        config.validate()?;
        debug!(path = %path.display(), "loaded config file");
        Ok(config)
    }

    /// Writes configuration to `path`, creating parent directories.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] when the file or its directory cannot
    /// be written.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let io_error = |source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        };

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(io_error)?;
        }
        let rendered = serde_json::to_string_pretty(self).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        std::fs::write(path, rendered).map_err(io_error)
    }

    /// Checks loaded values against their allowed ranges.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidConcurrency`] when the concurrency
    /// limit is outside `1..=10`.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=10).contains(&self.max_concurrent_downloads) {
            return Err(ConfigError::InvalidConcurrency {
                value: self.max_concurrent_downloads,
            });
        }
        Ok(())
    }

    /// Returns the admission wait as a [`Duration`].
    #[must_use]
    pub fn admission_timeout(&self) -> Duration {
        Duration::from_secs(self.admission_timeout_secs)
    }

    /// Returns the shutdown grace period as a [`Duration`].
    #[must_use]
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

/// Returns the default config file path (`~/.humblebundle/config.json`).
///
/// # Errors
///
/// Returns [`ConfigError::NoHomeDir`] when `$HOME` is unset.
pub fn default_config_path() -> Result<PathBuf, ConfigError> {
    let home = std::env::var_os("HOME").ok_or(ConfigError::NoHomeDir)?;
    Ok(PathBuf::from(home)
        .join(".humblebundle")
        .join("config.json"))
}

fn default_output_dir() -> PathBuf {
    match std::env::var_os("HOME") {
        Some(home) => PathBuf::from(home).join("humble-downloads"),
        None => PathBuf::from("humble-downloads"),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_yields_defaults() {
        let temp = tempfile::tempdir().unwrap();
        let config = Config::load(&temp.path().join("config.json")).unwrap();
        assert_eq!(config.max_concurrent_downloads, DEFAULT_MAX_CONCURRENT);
        assert!(config.database_path.is_none());
    }

    #[test]
    fn test_save_then_load_round_trip() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("nested").join("config.json");

        let config = Config {
            max_concurrent_downloads: 5,
            output_dir: PathBuf::from("/tmp/books"),
            ..Config::default()
        };
        config.save(&path).unwrap();

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded.max_concurrent_downloads, 5);
        assert_eq!(loaded.output_dir, PathBuf::from("/tmp/books"));
    }

    #[test]
    fn test_partial_file_fills_in_defaults() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("config.json");
        std::fs::write(&path, r#"{"max_concurrent_downloads": 7}"#).unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.max_concurrent_downloads, 7);
        assert_eq!(config.shutdown_grace_secs, DEFAULT_SHUTDOWN_GRACE_SECS);
    }

    #[test]
    fn test_malformed_file_is_an_error_not_a_reset() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("config.json");
        std::fs::write(&path, "{not json").unwrap();

        assert!(matches!(
            Config::load(&path),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn test_out_of_range_concurrency_rejected() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("config.json");
        std::fs::write(&path, r#"{"max_concurrent_downloads": 11}"#).unwrap();

        assert!(matches!(
            Config::load(&path),
            Err(ConfigError::InvalidConcurrency { value: 11 })
        ));
    }

    #[test]
    fn test_duration_accessors() {
        let config = Config {
            admission_timeout_secs: 10,
            shutdown_grace_secs: 2,
            ..Config::default()
        };
        assert_eq!(config.admission_timeout(), Duration::from_secs(10));
        assert_eq!(config.shutdown_grace(), Duration::from_secs(2));
    }
}
