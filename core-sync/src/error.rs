use bridge_traits::catalog::RemoteError;
use bridge_traits::error::BridgeError;
use core_library::LibraryError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Remote catalog error: {0}")]
    Remote(#[from] RemoteError),

    #[error("Library error: {0}")]
    Library(#[from] LibraryError),

    #[error("Host bridge error: {0}")]
    Bridge(#[from] BridgeError),

    #[error("Configuration error: {0}")]
    Config(#[from] core_runtime::Error),

    #[error("Library is locked by process {pid}{}", if *.stale { " (stale, use force to clear)" } else { "" })]
    LockHeld { pid: u32, stale: bool },

    #[error("No album found at {}", .path.display())]
    AlbumNotFound { path: PathBuf },

    #[error("{count} albums match {}", .path.display())]
    AmbiguousAlbum { path: PathBuf, count: usize },

    #[error("Cannot archive {}: {reason}", .path.display())]
    InvalidArchiveTarget { path: PathBuf, reason: String },

    #[error("Album {album_id} is already archived")]
    AlreadyArchived { album_id: String },

    #[error("Album {album_id} is not archived")]
    NotArchived { album_id: String },

    #[error("Remote delete is disabled in the configuration")]
    RemoteDeleteDisabled,

    #[error("Invalid state transition from {from} to {to}: {reason}")]
    InvalidStateTransition {
        from: String,
        to: String,
        reason: String,
    },

    #[error("{failed} write operations failed")]
    PartialWrite { failed: usize },

    #[error("Giving up after {attempts} attempts: {last}")]
    MaxRetries { attempts: u32, last: Box<SyncError> },

    #[error("Sync timeout after {} seconds", .0.as_secs())]
    Timeout(Duration),

    #[error("Sync cancelled")]
    Cancelled,

    #[error("Write task failed: {0}")]
    Task(String),
}

/// Failure classes a run can end with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// Network trouble or throttling; the attempt is retried
    TransientRemote,
    /// Authentication failure or a record that is permanently gone
    PermanentRemote,
    /// Unreadable or mismatched index, broken album tree
    LocalStateCorruption,
    /// Library lock held by another process
    ConcurrencyConflict,
    /// Some write operations failed, the rest completed
    PartialWriteFailure,
    /// Bad input from the caller or configuration
    UserInput,
    /// Run timeout or cancellation
    Interrupted,
}

impl ErrorClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorClass::TransientRemote => "transient_remote",
            ErrorClass::PermanentRemote => "permanent_remote",
            ErrorClass::LocalStateCorruption => "local_state_corruption",
            ErrorClass::ConcurrencyConflict => "concurrency_conflict",
            ErrorClass::PartialWriteFailure => "partial_write_failure",
            ErrorClass::UserInput => "user_input",
            ErrorClass::Interrupted => "interrupted",
        }
    }
}

impl std::fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl SyncError {
    pub fn class(&self) -> ErrorClass {
        match self {
            SyncError::Remote(e) if e.is_transient() => ErrorClass::TransientRemote,
            SyncError::Remote(_) => ErrorClass::PermanentRemote,
            SyncError::Library(e) => match e {
                LibraryError::NotFound { .. }
                | LibraryError::InvalidInput { .. }
                | LibraryError::AlreadyExists(_)
                | LibraryError::AlbumNotEmpty { .. } => ErrorClass::UserInput,
                _ => ErrorClass::LocalStateCorruption,
            },
            SyncError::Bridge(BridgeError::Locked { .. }) | SyncError::LockHeld { .. } => {
                ErrorClass::ConcurrencyConflict
            }
            SyncError::Bridge(_) | SyncError::Task(_) => ErrorClass::LocalStateCorruption,
            SyncError::Config(_)
            | SyncError::AlbumNotFound { .. }
            | SyncError::AmbiguousAlbum { .. }
            | SyncError::InvalidArchiveTarget { .. }
            | SyncError::AlreadyArchived { .. }
            | SyncError::NotArchived { .. }
            | SyncError::RemoteDeleteDisabled
            | SyncError::InvalidStateTransition { .. } => ErrorClass::UserInput,
            SyncError::PartialWrite { .. } => ErrorClass::PartialWriteFailure,
            SyncError::MaxRetries { last, .. } => last.class(),
            SyncError::Timeout(_) | SyncError::Cancelled => ErrorClass::Interrupted,
        }
    }

    /// Whether a fresh attempt may succeed.
    ///
    /// [`SyncError::MaxRetries`] is terminal even though its cause was transient.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, SyncError::MaxRetries { .. }) && self.class() == ErrorClass::TransientRemote
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
