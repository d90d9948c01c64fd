//! Import-run domain model.
//!
//! # Responsibility
//! - Define the records produced and consumed by pipeline stages.
//! - Keep serialized field names stable for the package and report files.
//!
//! # Invariants
//! - Every record is created fresh per import run; nothing here is cached
//!   across runs.
//! - Asset paths are a pure function of `(hash, extension)`.

pub mod asset;
pub mod note;
pub mod source;
pub mod time;
