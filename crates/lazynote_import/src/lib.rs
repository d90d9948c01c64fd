//! Note import pipeline for LazyNote.
//! Converts legacy stores and HTML/Markdown/text trees into canonical notes
//! and hands them to a destination store.

pub mod assets;
pub mod config;
pub mod db;
pub mod destination;
pub mod digest;
pub mod fs_probe;
pub mod import;
pub mod logging;
pub mod model;
pub mod source;
pub mod transcode;

pub use assets::{FetchError, HttpFetcher, OfflineFetcher, RemoteAsset, RemoteFetcher};
pub use config::{ConfigError, ImportConfig};
pub use destination::{
    DestinationError, DestinationResult, DestinationStore, ImportCounts, SqliteDestination,
};
pub use import::{
    run_import, ImportError, ImportOptions, ImportOutcome, ImportReport, ImportServices,
    ProgressEvent, Stage, StageState,
};
pub use logging::{default_log_level, init_logging, logging_status};
pub use model::source::{SourceKind, SourceSummary};
pub use source::scan_source;
pub use transcode::crdt::{
    DecodeError, DocumentRegions, JsonSnapshotDecoder, UpdateLogDecoder,
};

/// Returns the importer crate version.
pub fn import_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::import_version;

    #[test]
    fn version_is_not_empty() {
        assert!(!import_version().is_empty());
    }
}
