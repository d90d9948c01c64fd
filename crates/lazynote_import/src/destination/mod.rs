//! Destination store contract.
//!
//! # Responsibility
//! - Define the narrow interface the orchestrator writes through.
//! - Ship a reference SQLite implementation.
//!
//! # Invariants
//! - `backup` runs before any write that replaces existing data.
//! - `import_from_json` replaces destination content atomically.

mod sqlite;

pub use sqlite::{SearchHit, SqliteDestination, BACKUP_FILE_NAME};

use crate::db::DbError;
use serde::Serialize;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::io;
use std::path::{Path, PathBuf};

pub type DestinationResult<T> = Result<T, DestinationError>;

/// Rows persisted by one import.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportCounts {
    pub stacks: u64,
    pub notebooks: u64,
    pub tags: u64,
    pub notes: u64,
    pub note_tags: u64,
    pub attachments: u64,
}

pub trait DestinationStore {
    /// Whether any notebook or note exists.
    fn has_existing_data(&self) -> DestinationResult<bool>;
    /// Snapshots current content into `dir` and returns the backup directory.
    fn backup(&self, dir: &Path) -> DestinationResult<PathBuf>;
    /// Replaces destination content with the package.
    fn import_from_json(
        &mut self,
        package_json: &str,
        assets_dir: &Path,
    ) -> DestinationResult<ImportCounts>;
    /// Rebuilds derived data (search index) after an import.
    fn backfill(&mut self) -> DestinationResult<()>;
    /// Replaces destination content with a backup taken by [`DestinationStore::backup`].
    fn restore(&mut self, backup_dir: &Path) -> DestinationResult<()>;
}

#[derive(Debug)]
pub enum DestinationError {
    Db(DbError),
    Package(serde_json::Error),
    Io { path: PathBuf, source: io::Error },
    BackupMissing(PathBuf),
    InvalidQuery { query: String, message: String },
}

impl Display for DestinationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Db(err) => write!(f, "{err}"),
            Self::Package(err) => write!(f, "invalid import package: {err}"),
            Self::Io { path, source } => write!(f, "{}: {source}", path.display()),
            Self::BackupMissing(path) => write!(f, "no backup found at {}", path.display()),
            Self::InvalidQuery { query, message } => {
                write!(f, "invalid full-text query `{query}`: {message}")
            }
        }
    }
}

impl Error for DestinationError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            Self::Package(err) => Some(err),
            Self::Io { source, .. } => Some(source),
            Self::BackupMissing(_) | Self::InvalidQuery { .. } => None,
        }
    }
}

impl From<DbError> for DestinationError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for DestinationError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

impl From<serde_json::Error> for DestinationError {
    fn from(value: serde_json::Error) -> Self {
        Self::Package(value)
    }
}
