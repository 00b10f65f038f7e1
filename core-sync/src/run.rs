//! # Sync Run Results
//!
//! Identifiers and result types shared by the engine, the write pipeline and
//! the retry orchestrator.

use crate::error::{ErrorClass, Result, SyncError};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ============================================================================
// ID Types
// ============================================================================

/// Unique identifier for a sync run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SyncRunId(Uuid);

impl SyncRunId {
    /// Create a new random run ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SyncRunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SyncRunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for SyncRunId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

// ============================================================================
// Write Results
// ============================================================================

/// Kind of write operation the pipeline performs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteOperation {
    DeleteAsset,
    DeleteAlbum,
    AddAsset,
    AddAlbum,
    RefreshAlbum,
    ReleaseStash,
}

impl WriteOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            WriteOperation::DeleteAsset => "delete_asset",
            WriteOperation::DeleteAlbum => "delete_album",
            WriteOperation::AddAsset => "add_asset",
            WriteOperation::AddAlbum => "add_album",
            WriteOperation::RefreshAlbum => "refresh_album",
            WriteOperation::ReleaseStash => "release_stash",
        }
    }
}

/// One write operation that failed and was absorbed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteFailure {
    pub operation: WriteOperation,
    /// Stable id of the entity
    pub id: String,
    pub name: String,
    pub message: String,
}

/// What one pass of the write pipeline did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteReport {
    pub assets_deleted: usize,
    pub assets_downloaded: usize,
    /// Assets scheduled for add that were already present on disk
    pub assets_skipped: usize,
    pub albums_deleted: usize,
    pub albums_added: usize,
    pub albums_refreshed: usize,
    pub stash_released: usize,
    pub failures: Vec<WriteFailure>,
    /// Scheduling stopped early because the run was cancelled
    pub interrupted: bool,
}

impl WriteReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty() && !self.interrupted
    }
}

// ============================================================================
// Run Outcome
// ============================================================================

/// How a sync run ended
#[derive(Debug)]
pub enum RunOutcome {
    /// Every scheduled operation succeeded
    Success,
    /// The run completed, but these operations failed
    PartialFailure(Vec<WriteFailure>),
    /// Every attempt failed with a transient error
    RetriesExhausted { attempts: u32, last_error: SyncError },
    /// The run stopped on a non-retryable error
    Aborted { kind: ErrorClass, message: String },
}

impl RunOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, RunOutcome::Success)
    }

    /// Whether the write phase ran to completion
    pub fn is_completed(&self) -> bool {
        matches!(self, RunOutcome::Success | RunOutcome::PartialFailure(_))
    }

    pub fn failures(&self) -> &[WriteFailure] {
        match self {
            RunOutcome::PartialFailure(failures) => failures,
            _ => &[],
        }
    }

    /// Class of the terminal error, `None` on success
    pub fn class(&self) -> Option<ErrorClass> {
        match self {
            RunOutcome::Success => None,
            RunOutcome::PartialFailure(_) => Some(ErrorClass::PartialWriteFailure),
            RunOutcome::RetriesExhausted { last_error, .. } => Some(last_error.class()),
            RunOutcome::Aborted { kind, .. } => Some(*kind),
        }
    }

    /// Collapse into a `Result` for callers that only care about success.
    pub fn into_result(self) -> Result<()> {
        match self {
            RunOutcome::Success => Ok(()),
            RunOutcome::PartialFailure(failures) => Err(SyncError::PartialWrite {
                failed: failures.len(),
            }),
            RunOutcome::RetriesExhausted {
                attempts,
                last_error,
            } => Err(SyncError::MaxRetries {
                attempts,
                last: Box::new(last_error),
            }),
            RunOutcome::Aborted { kind, message } => match kind {
                ErrorClass::Interrupted => Err(SyncError::Cancelled),
                _ => Err(SyncError::Task(format!("{kind}: {message}"))),
            },
        }
    }
}

/// Result of a complete orchestrated run
#[derive(Debug)]
pub struct SyncReport {
    pub run_id: SyncRunId,
    /// Attempts started, including the successful one
    pub attempts: u32,
    pub outcome: RunOutcome,
    /// Last write report, if an attempt reached the write phase
    pub write: Option<WriteReport>,
}
