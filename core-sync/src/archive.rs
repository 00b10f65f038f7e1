//! # Archive Manager
//!
//! Detaches a live album from the synced tree into the archive stash and
//! brings it back.
//!
//! ## State Machine
//!
//! ```text
//! Live → Archiving → Archived → Unarchiving → Live
//!           ↓                        ↓
//!          Live                   Archived      (rolled back)
//! ```
//!
//! Archiving replaces the album's asset links with real copies, moves its
//! directory under `_Archive/.stash`, and moves the index row into the
//! stash in one transaction. Any failure rolls the filesystem back before
//! the error is returned. While stashed, the album and its assets are
//! invisible to sync runs.
//!
//! Deleting archived assets remotely is a separate step,
//! [`ArchiveManager::confirm_remote_delete`], gated by the configuration.

use crate::error::{Result, SyncError};
use crate::orchestrator::{acquire_lock, release_lock};
use bridge_traits::catalog::{RemoteCatalog, RemoteError};
use bridge_traits::lock::LibraryLock;
use chrono::Utc;
use core_library::layout::{ARCHIVE_DIR, ASSETS_DIR};
use core_library::models::{Album, AlbumId, AlbumKind, Asset, AssetId, StashEntry};
use core_library::{LibraryIndex, LibraryLayout, LocalLibrary};
use core_runtime::config::CoreConfig;
use core_runtime::events::{ArchiveEvent, EventSender};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::future::Future;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

// ============================================================================
// State Machine
// ============================================================================

/// Archive state of one album
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArchiveState {
    Live,
    Archiving,
    Archived,
    Unarchiving,
}

impl ArchiveState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArchiveState::Live => "live",
            ArchiveState::Archiving => "archiving",
            ArchiveState::Archived => "archived",
            ArchiveState::Unarchiving => "unarchiving",
        }
    }

    /// Move to `to`, or fail with [`SyncError::InvalidStateTransition`].
    pub fn transition(self, to: ArchiveState) -> Result<ArchiveState> {
        self.validate_transition(to)?;
        Ok(to)
    }

    fn validate_transition(&self, to: ArchiveState) -> Result<()> {
        let valid = match (self, to) {
            (ArchiveState::Live, ArchiveState::Archiving) => true,
            (ArchiveState::Archiving, ArchiveState::Archived) => true,
            // Rollback
            (ArchiveState::Archiving, ArchiveState::Live) => true,

            (ArchiveState::Archived, ArchiveState::Unarchiving) => true,
            (ArchiveState::Unarchiving, ArchiveState::Live) => true,
            // Rollback
            (ArchiveState::Unarchiving, ArchiveState::Archived) => true,

            _ => false,
        };

        if !valid {
            return Err(SyncError::InvalidStateTransition {
                from: self.as_str().to_string(),
                to: to.as_str().to_string(),
                reason: format!("Cannot transition from {} to {}", self.as_str(), to.as_str()),
            });
        }
        Ok(())
    }
}

// ============================================================================
// Reports
// ============================================================================

/// Result of archiving one album
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveReport {
    pub album_id: AlbumId,
    /// Visible path the album was archived from
    pub path: PathBuf,
    pub stash_path: PathBuf,
    /// Asset links replaced by real copies
    pub persisted: usize,
}

/// One record the remote delete could not remove
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteDeleteFailure {
    pub record_name: String,
    pub message: String,
}

/// Result of a confirmed remote delete
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoteDeleteReport {
    pub deleted: Vec<String>,
    pub failures: Vec<RemoteDeleteFailure>,
}

// ============================================================================
// Manager
// ============================================================================

/// Archives and restores albums of one library
pub struct ArchiveManager {
    library: LocalLibrary,
    index: Arc<dyn LibraryIndex>,
    catalog: Arc<dyn RemoteCatalog>,
    lock: Arc<dyn LibraryLock>,
    events: EventSender,
    remote_delete: bool,
    force_lock: bool,
}

impl ArchiveManager {
    pub fn new(
        config: &CoreConfig,
        index: Arc<dyn LibraryIndex>,
        catalog: Arc<dyn RemoteCatalog>,
        events: EventSender,
    ) -> Self {
        Self {
            library: LocalLibrary::new(
                Arc::clone(&config.file_system),
                LibraryLayout::new(config.data_dir.clone()),
            ),
            index,
            catalog,
            lock: Arc::clone(&config.library_lock),
            events,
            remote_delete: config.remote_delete,
            force_lock: config.force_lock,
        }
    }

    fn layout(&self) -> &LibraryLayout {
        self.library.layout()
    }

    async fn locked<T, F>(&self, operation: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        acquire_lock(self.lock.as_ref(), self.force_lock).await?;
        let result = operation.await;
        release_lock(self.lock.as_ref()).await;
        result
    }

    /// Move the album at `path` into the stash.
    ///
    /// `path` is the album's visible path, absolute under the library root or
    /// relative to it.
    #[instrument(skip(self), fields(path = %path.display()))]
    pub async fn archive(&self, path: &Path) -> Result<ArchiveReport> {
        self.locked(self.archive_locked(path)).await
    }

    async fn archive_locked(&self, path: &Path) -> Result<ArchiveReport> {
        let relative = self.user_path(path)?;
        let snapshot = self.index.load_snapshot().await?;
        let tree = snapshot.album_tree();

        let mut matches = Vec::new();
        for album in snapshot.albums.values() {
            if self.layout().display_path(album, &tree)? == relative {
                matches.push(album);
            }
        }
        let album = match matches.as_slice() {
            [album] => *album,
            [] => {
                let stash = self.index.list_stash().await?;
                return Err(match stash.iter().find(|e| e.original_path == relative) {
                    Some(entry) => SyncError::AlreadyArchived {
                        album_id: entry.album.id.to_string(),
                    },
                    None => SyncError::AlbumNotFound { path: relative },
                });
            }
            many => {
                return Err(SyncError::AmbiguousAlbum {
                    path: relative,
                    count: many.len(),
                })
            }
        };
        if album.kind != AlbumKind::Album {
            return Err(SyncError::InvalidArchiveTarget {
                path: relative,
                reason: "only albums can be archived, not folders".to_string(),
            });
        }

        let mut state = ArchiveState::Live.transition(ArchiveState::Archiving)?;
        self.events.archive(ArchiveEvent::Started {
            path: relative.display().to_string(),
        });
        info!(album_id = %album.id, "Archiving album");

        let assets = self.member_assets(album, &snapshot.assets).await?;
        let dir = self.layout().album_paths(album, &tree)?.dir;

        self.events.archive(ArchiveEvent::PersistingStarted {
            count: assets.len() as u64,
        });
        let persisted = self.library.persist_album_assets(&dir, album, &assets).await?;

        let stash_path = match self.library.stash_album(album, &tree).await {
            Ok(stash_path) => stash_path,
            Err(e) => {
                self.library.revert_persisted(&persisted).await;
                state = state.transition(ArchiveState::Live)?;
                debug!(state = state.as_str(), "Archive rolled back");
                return Err(e.into());
            }
        };

        let mut archived = album.clone();
        archived.kind = AlbumKind::Archived;
        let entry = StashEntry {
            album: archived,
            assets,
            original_path: relative.clone(),
            archived_at: Utc::now(),
        };
        if let Err(e) = self.index.stash_album(&entry).await {
            warn!(error = %e, "Index update failed, restoring album");
            match self.library.restore_album(album, &tree).await {
                Ok(_) => self.library.revert_persisted(&persisted).await,
                Err(restore) => warn!(error = %restore, "Failed to restore album directory"),
            }
            state = state.transition(ArchiveState::Live)?;
            debug!(state = state.as_str(), "Archive rolled back");
            return Err(e.into());
        }

        state = state.transition(ArchiveState::Archived)?;
        debug!(state = state.as_str(), "Album archived");
        self.events.archive(ArchiveEvent::Done {
            remote_delete_failures: 0,
        });

        Ok(ArchiveReport {
            album_id: album.id.clone(),
            path: relative,
            stash_path,
            persisted: persisted.len(),
        })
    }

    /// Delete the non-favorite assets of an archived album remotely.
    ///
    /// Each record is handled on its own: failures are collected and the
    /// rest of the batch proceeds. A deleted record's local asset file and
    /// index row are removed as well; the archived copy stays.
    #[instrument(skip(self), fields(album_id = %album_id))]
    pub async fn confirm_remote_delete(&self, album_id: &AlbumId) -> Result<RemoteDeleteReport> {
        if !self.remote_delete {
            return Err(SyncError::RemoteDeleteDisabled);
        }
        self.locked(self.remote_delete_locked(album_id)).await
    }

    async fn remote_delete_locked(&self, album_id: &AlbumId) -> Result<RemoteDeleteReport> {
        let entry = self
            .index
            .stash_entry(album_id)
            .await?
            .ok_or_else(|| SyncError::NotArchived {
                album_id: album_id.to_string(),
            })?;

        let mut by_record: HashMap<&str, Vec<&Asset>> = HashMap::new();
        for asset in entry.assets.iter().filter(|a| !a.favorite) {
            by_record.entry(asset.record_name.as_str()).or_default().push(asset);
        }
        let records: Vec<String> = by_record
            .keys()
            .map(|r| r.to_string())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        self.events.archive(ArchiveEvent::RemoteDeleteStarted {
            count: records.len() as u64,
        });
        let mut report = RemoteDeleteReport::default();
        if records.is_empty() {
            self.events.archive(ArchiveEvent::Done {
                remote_delete_failures: 0,
            });
            return Ok(report);
        }

        let outcomes = self.catalog.delete_remote(&records).await?;
        for outcome in outcomes {
            if let Err(e) = outcome.result {
                warn!(record = %outcome.record_name, error = %e, "Remote delete failed");
                report.failures.push(RemoteDeleteFailure {
                    record_name: outcome.record_name,
                    message: e.to_string(),
                });
                continue;
            }

            let assets = by_record
                .get(outcome.record_name.as_str())
                .cloned()
                .unwrap_or_default();
            match self.forget_assets(&assets).await {
                Ok(()) => report.deleted.push(outcome.record_name),
                Err(e) => report.failures.push(RemoteDeleteFailure {
                    record_name: outcome.record_name,
                    message: e.to_string(),
                }),
            }
        }

        let missing: Vec<&String> = records
            .iter()
            .filter(|r| {
                !report.deleted.contains(r) && !report.failures.iter().any(|f| &f.record_name == *r)
            })
            .collect();
        for record in missing {
            report.failures.push(RemoteDeleteFailure {
                record_name: record.clone(),
                message: RemoteError::NotFound("no outcome reported".to_string()).to_string(),
            });
        }

        info!(
            deleted = report.deleted.len(),
            failed = report.failures.len(),
            "Remote delete finished"
        );
        self.events.archive(ArchiveEvent::Done {
            remote_delete_failures: report.failures.len() as u64,
        });
        Ok(report)
    }

    async fn forget_assets(&self, assets: &[&Asset]) -> Result<()> {
        for asset in assets {
            self.library.delete_asset(asset).await?;
            self.index.remove_asset(&asset.id).await?;
        }
        Ok(())
    }

    /// Restore the archived album that was archived from `path`.
    #[instrument(skip(self), fields(path = %path.display()))]
    pub async fn unarchive(&self, path: &Path) -> Result<PathBuf> {
        self.locked(self.unarchive_locked(path)).await
    }

    async fn unarchive_locked(&self, path: &Path) -> Result<PathBuf> {
        let relative = self.user_path(path)?;
        let stash = self.index.list_stash().await?;
        let entry = match stash
            .iter()
            .filter(|e| e.original_path == relative)
            .collect::<Vec<_>>()
            .as_slice()
        {
            [entry] => (*entry).clone(),
            [] => {
                return Err(SyncError::NotArchived {
                    album_id: relative.display().to_string(),
                })
            }
            many => {
                return Err(SyncError::AmbiguousAlbum {
                    path: relative,
                    count: many.len(),
                })
            }
        };

        let mut state = ArchiveState::Archived.transition(ArchiveState::Unarchiving)?;
        self.events.archive(ArchiveEvent::UnarchiveStarted {
            path: relative.display().to_string(),
        });

        let snapshot = self.index.load_snapshot().await?;
        let tree = snapshot.album_tree();
        let mut album = entry.album.clone();
        album.kind = AlbumKind::Album;
        if album.parent.as_ref().is_some_and(|p| !tree.contains(p)) {
            warn!(album_id = %album.id, "Original parent is gone, restoring at the library root");
            album.parent = None;
        }

        let restored_path = self.layout().display_path(&album, &tree)?;
        let paths = self.library.restore_album(&album, &tree).await?;

        if let Err(e) = self.index.restore_stashed(&album, &restored_path).await {
            warn!(error = %e, "Index update failed, moving album back to the stash");
            if let Err(undo) = self.library.stash_album(&album, &tree).await {
                warn!(error = %undo, "Failed to move album back to the stash");
            }
            state = state.transition(ArchiveState::Archived)?;
            debug!(state = state.as_str(), "Unarchive rolled back");
            return Err(e.into());
        }

        match self
            .library
            .relink_album_assets(&paths.dir, &album, &entry.assets)
            .await
        {
            Ok(relinked) => debug!(relinked, "Relinked restored album"),
            Err(e) => warn!(error = %e, "Keeping persisted copies in restored album"),
        }

        state = state.transition(ArchiveState::Live)?;
        debug!(state = state.as_str(), "Album unarchived");
        self.events.archive(ArchiveEvent::UnarchiveDone {
            path: restored_path.display().to_string(),
        });
        Ok(restored_path)
    }

    /// Normalize a user path and reject paths the library generates itself.
    fn user_path(&self, path: &Path) -> Result<PathBuf> {
        let invalid = |reason: &str| SyncError::InvalidArchiveTarget {
            path: path.to_path_buf(),
            reason: reason.to_string(),
        };

        let relative = self
            .layout()
            .normalize_user_path(path)
            .ok_or_else(|| invalid("not a path inside the library"))?;

        let mut components = relative.components();
        if let Some(Component::Normal(first)) = components.next() {
            if first == ASSETS_DIR || first == ARCHIVE_DIR {
                return Err(invalid("path belongs to the library's own storage"));
            }
        }
        let hidden = relative.components().any(|c| match c {
            Component::Normal(part) => part.to_string_lossy().starts_with('.'),
            _ => false,
        });
        if hidden {
            return Err(invalid("hidden paths are generated by the library"));
        }
        Ok(relative)
    }

    /// Assets of `album`, from the live snapshot or another stash entry.
    async fn member_assets(
        &self,
        album: &Album,
        live: &HashMap<AssetId, Asset>,
    ) -> Result<Vec<Asset>> {
        let stash = self.index.list_stash().await?;
        let stashed: HashMap<&AssetId, &Asset> = stash
            .iter()
            .flat_map(|e| e.assets.iter().map(|a| (&a.id, a)))
            .collect();

        Ok(album
            .assets
            .keys()
            .filter_map(|id| live.get(id).or_else(|| stashed.get(id).copied()))
            .cloned()
            .collect())
    }
}
