use bridge_traits::error::BridgeError;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LibraryError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Bridge error: {0}")]
    Bridge(#[from] BridgeError),

    #[error("Entity not found: {entity_type} with id {id}")]
    NotFound { entity_type: String, id: String },

    #[error("Invalid input: {field} - {message}")]
    InvalidInput { field: String, message: String },

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Index schema mismatch: expected version {expected}, found {}", .found.as_deref().unwrap_or("none"))]
    SchemaMismatch {
        expected: u32,
        found: Option<String>,
    },

    #[error("Corrupt index entry {id}: {reason}")]
    CorruptIndex { id: String, reason: String },

    #[error("Unresolved {kind} reference: {id}")]
    UnresolvedReference { kind: &'static str, id: String },

    #[error("Unsupported album type {album_type} for album {id}")]
    UnsupportedAlbumType { id: String, album_type: i32 },

    #[error("Album hierarchy contains a cycle at {album_id}")]
    TreeCycle { album_id: String },

    #[error("Album {album_id} references missing parent {parent_id}")]
    OrphanedAlbum { album_id: String, parent_id: String },

    #[error("Asset {asset_id} failed verification at {}", .path.display())]
    VerificationFailed { asset_id: String, path: PathBuf },

    #[error("Album directory {} holds unexpected entry {}", .path.display(), .entry.display())]
    AlbumNotEmpty { path: PathBuf, entry: PathBuf },

    #[error("Path already exists: {}", .0.display())]
    AlreadyExists(PathBuf),
}

impl LibraryError {
    /// Errors meaning the persisted index or on-disk tree is not in a state
    /// the library can reason about.
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            LibraryError::Migration(_)
                | LibraryError::SchemaMismatch { .. }
                | LibraryError::CorruptIndex { .. }
                | LibraryError::TreeCycle { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, LibraryError>;
