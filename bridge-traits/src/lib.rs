//! # Host Bridge Traits
//!
//! Platform abstraction traits the photo library mirror depends on.
//!
//! ## Overview
//!
//! This crate defines the contract between the core crates and the
//! host-specific implementations. Each trait represents a capability the core
//! requires but that is provided differently per host (real disk, in-memory
//! fake, remote service client).
//!
//! ## Traits
//!
//! - [`RemoteCatalog`](catalog::RemoteCatalog) - Remote photo service: fetch, download, delete
//! - [`FileSystemAccess`](storage::FileSystemAccess) - File I/O, symlinks, timestamps
//! - [`LibraryLock`](lock::LibraryLock) - Exclusive process lock on the library
//!
//! ## Error Handling
//!
//! Local bridges use [`BridgeError`](error::BridgeError); the remote catalog
//! reports [`RemoteError`](catalog::RemoteError) so callers can tell transient
//! network trouble apart from permanent rejections.
//!
//! ## Thread Safety
//!
//! All bridge traits require `Send + Sync` bounds to support safe concurrent usage
//! across async tasks. Implementations must ensure thread safety.

pub mod catalog;
pub mod error;
pub mod lock;
pub mod storage;

pub use error::BridgeError;

// Re-export commonly used types
pub use catalog::{
    CatalogResult, RemoteAlbum, RemoteAssetBatch, RemoteAssetRecord, RemoteCatalog,
    RemoteDeleteOutcome, RemoteError, RemoteMaster, RemoteResource, RemoteZone,
};
pub use lock::{LibraryLock, LockStatus};
pub use storage::{FileMetadata, FileSystemAccess};
