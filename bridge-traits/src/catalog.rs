//! Remote Catalog Abstraction
//!
//! The remote photo service is the source of truth for the mirror. This
//! module defines the wire-level records the catalog hands back and the
//! [`RemoteCatalog`] trait the sync engine drives.

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors surfaced by a remote catalog implementation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RemoteError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("Quota exceeded: {0}")]
    Quota(String),

    #[error("Remote record not found: {0}")]
    NotFound(String),
}

impl RemoteError {
    /// Transient errors may succeed when the same request is repeated.
    pub fn is_transient(&self) -> bool {
        matches!(self, RemoteError::Network(_) | RemoteError::Quota(_))
    }
}

pub type CatalogResult<T> = std::result::Result<T, RemoteError>;

/// Remote zone a record lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemoteZone {
    Primary,
    Shared,
}

/// A downloadable file resource attached to a record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteResource {
    /// Content checksum; stable for the lifetime of the resource.
    pub checksum: String,
    pub size: u64,
    /// File extension without the leading dot (e.g. `jpg`, `mov`).
    pub extension: String,
}

/// Master record: owns the original file of a photo.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteMaster {
    pub record_name: String,
    /// Original filename without extension.
    pub filename: String,
    pub resource: RemoteResource,
    pub zone: RemoteZone,
}

/// Asset record: user-facing photo, references its master.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteAssetRecord {
    pub record_name: String,
    /// `record_name` of the master this asset belongs to.
    pub master_ref: String,
    pub favorite: bool,
    pub modified_ms: i64,
    /// Present when the photo has been edited remotely.
    pub edited_resource: Option<RemoteResource>,
    pub zone: RemoteZone,
}

/// Result of `fetch_all_assets`: asset records and their masters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteAssetBatch {
    pub assets: Vec<RemoteAssetRecord>,
    pub masters: Vec<RemoteMaster>,
}

/// Album or folder record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteAlbum {
    pub record_name: String,
    pub name: String,
    /// Raw album type as reported by the service (`0` album, `3` folder).
    pub album_type: i32,
    pub parent_id: Option<String>,
    /// Asset record names contained in the album.
    pub asset_records: Vec<String>,
}

/// Per-record outcome of a remote delete request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteDeleteOutcome {
    pub record_name: String,
    pub result: CatalogResult<()>,
}

/// Remote photo catalog
///
/// Implementations talk to the remote service. Every call may fail with a
/// [`RemoteError`]; the caller decides whether the failure is retried.
#[async_trait]
pub trait RemoteCatalog: Send + Sync {
    /// Fetch every asset record together with the master records they reference
    async fn fetch_all_assets(&self) -> CatalogResult<RemoteAssetBatch>;

    /// Fetch every album and folder record
    async fn fetch_all_albums(&self) -> CatalogResult<Vec<RemoteAlbum>>;

    /// Download the content of the resource with the given checksum
    async fn download_asset(&self, checksum: &str) -> CatalogResult<Bytes>;

    /// Delete the given asset records remotely
    ///
    /// Returns one outcome per requested record so callers can apply the
    /// operation on a best-effort basis.
    async fn delete_remote(&self, record_names: &[String])
        -> CatalogResult<Vec<RemoteDeleteOutcome>>;

    /// Re-establish the remote session before a retry
    async fn refresh_session(&self) -> CatalogResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(RemoteError::Network("reset".into()).is_transient());
        assert!(RemoteError::Quota("429".into()).is_transient());
        assert!(!RemoteError::Auth("expired".into()).is_transient());
        assert!(!RemoteError::NotFound("rec".into()).is_transient());
    }

    #[test]
    fn test_zone_serializes_snake_case() {
        let json = serde_json::to_string(&RemoteZone::Shared).unwrap();
        assert_eq!(json, "\"shared\"");
    }
}
