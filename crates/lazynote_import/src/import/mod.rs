//! Import run orchestration, progress and reporting.
//!
//! # Responsibility
//! - Sequence scan, extraction, asset copy, transcoding and persistence.
//! - Emit per-stage progress and write one structured report per run.
//!
//! # Invariants
//! - This is the only module that calls backup or write on a destination.

pub mod orchestrator;
pub mod package;
pub mod progress;
pub mod report;

pub use orchestrator::{run_import, ImportError, ImportOptions, ImportOutcome, ImportServices};
pub use package::ImportPackage;
pub use progress::{ProgressEvent, ProgressReporter, Stage, StageState};
pub use report::{ImportReport, ImportStats};
