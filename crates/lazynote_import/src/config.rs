//! Import run configuration.
//!
//! # Invariants
//! - Every field has a default, so an empty file is a valid config.
//! - Unknown keys are rejected to surface typos early.

use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_DECODE_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_PROGRESS_EVERY: u64 = 10;
pub const DEFAULT_DOWNLOAD_TIMEOUT_SECS: u64 = 15;
pub const DEFAULT_MAX_DOWNLOAD_BYTES: u64 = 25 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ImportConfig {
    /// Upper bound for one update-log decode.
    pub decode_timeout_secs: u64,
    /// Emit a running progress event every N items.
    pub progress_every: u64,
    /// Fetch remote images referenced by tree notes.
    pub remote_downloads: bool,
    pub download_timeout_secs: u64,
    pub max_download_bytes: u64,
    /// Cap runs of three or more breaks at two.
    pub collapse_breaks: bool,
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            decode_timeout_secs: DEFAULT_DECODE_TIMEOUT_SECS,
            progress_every: DEFAULT_PROGRESS_EVERY,
            remote_downloads: true,
            download_timeout_secs: DEFAULT_DOWNLOAD_TIMEOUT_SECS,
            max_download_bytes: DEFAULT_MAX_DOWNLOAD_BYTES,
            collapse_breaks: true,
        }
    }
}

impl ImportConfig {
    /// Parses TOML text.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        toml::from_str(text).map_err(|err| ConfigError::Parse {
            path: None,
            message: err.to_string(),
        })
    }

    /// Reads and parses a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|err| ConfigError::Io {
            path: path.to_path_buf(),
            source: err,
        })?;
        toml::from_str(&text).map_err(|err| ConfigError::Parse {
            path: Some(path.to_path_buf()),
            message: err.to_string(),
        })
    }

    pub fn decode_timeout(&self) -> Duration {
        Duration::from_secs(self.decode_timeout_secs.max(1))
    }

    pub fn download_timeout(&self) -> Duration {
        Duration::from_secs(self.download_timeout_secs.max(1))
    }
}

#[derive(Debug)]
pub enum ConfigError {
    Io { path: PathBuf, source: io::Error },
    Parse { path: Option<PathBuf>, message: String },
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io { path, source } => {
                write!(f, "cannot read config {}: {source}", path.display())
            }
            Self::Parse {
                path: Some(path),
                message,
            } => write!(f, "invalid config {}: {message}", path.display()),
            Self::Parse {
                path: None,
                message,
            } => write!(f, "invalid config: {message}"),
        }
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            Self::Parse { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{ConfigError, ImportConfig};
    use std::time::Duration;

    #[test]
    fn empty_text_gives_defaults() {
        let config = ImportConfig::from_toml_str("").unwrap();
        assert_eq!(config, ImportConfig::default());
        assert_eq!(config.decode_timeout(), Duration::from_secs(10));
        assert_eq!(config.progress_every, 10);
        assert!(config.remote_downloads);
    }

    #[test]
    fn partial_file_overrides_named_fields() {
        let config = ImportConfig::from_toml_str(
            "decode_timeout_secs = 3\nremote_downloads = false\n",
        )
        .unwrap();
        assert_eq!(config.decode_timeout_secs, 3);
        assert!(!config.remote_downloads);
        assert_eq!(config.max_download_bytes, 25 * 1024 * 1024);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let error = ImportConfig::from_toml_str("decode_timeout = 3").unwrap_err();
        assert!(matches!(error, ConfigError::Parse { path: None, .. }));
    }

    #[test]
    fn load_reports_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let error = ImportConfig::load(&dir.path().join("missing.toml")).unwrap_err();
        assert!(error.to_string().contains("cannot read config"));
    }
}
