//! Asset resolution and placement.
//!
//! # Responsibility
//! - Find resource bytes across candidate roots.
//! - Place assets at sharded, content-addressed paths and copy them there.
//! - Download remote images through the [`remote::RemoteFetcher`] seam.
//!
//! # Invariants
//! - A failure to copy one asset never aborts the run; callers record it.

pub mod remote;
pub mod resolver;

pub use remote::{FetchError, HttpFetcher, OfflineFetcher, RemoteAsset, RemoteFetcher};
pub use resolver::{
    copy_asset, infer_extension, place, resolve_resource, write_asset, AssetError, CopyOutcome,
    ResourceLocation,
};
