//! Source scanning and record extraction.
//!
//! # Responsibility
//! - Validate and summarize candidate source roots (`scan`).
//! - Pull typed rows from legacy stores (`legacy`) and enumerate tree
//!   sources (`tree`).
//!
//! # Invariants
//! - Nothing in this module writes to the source.
//! - No content transformation happens here.

pub mod layout;
pub mod legacy;
pub mod scan;
pub mod tree;

pub use scan::scan_source;
