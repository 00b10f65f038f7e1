//! # Write Pipeline
//!
//! Applies resolved processing queues to disk and index.
//!
//! ## Phases
//!
//! 1. Delete assets
//! 2. Delete albums, deepest level first
//! 3. Add assets (skipping files already present)
//! 4. Add albums, shallowest level first
//! 5. Refresh asset links of kept albums whose membership changed
//! 6. Release stash entries whose remote album is gone
//!
//! Every deletion completes before the first addition starts. Within a
//! phase, operations run on a bounded worker pool; a failed operation is
//! recorded and never cancels its siblings. Cancellation stops scheduling,
//! lets in-flight tasks finish, and skips the remaining phases.

use crate::diff::ProcessingQueue;
use crate::error::{Result, SyncError};
use crate::run::{WriteFailure, WriteOperation, WriteReport};
use bridge_traits::catalog::RemoteCatalog;
use core_library::models::{Album, AlbumId, AlbumTree, Asset, AssetId, Entity, StashEntry};
use core_library::{LibraryIndex, LocalLibrary};
use core_runtime::events::{EventSender, SyncEvent};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Everything one pipeline pass needs
#[derive(Debug, Clone, Default)]
pub struct WritePlan {
    pub assets: ProcessingQueue<Asset>,
    pub albums: ProcessingQueue<Album>,
    /// Local albums as loaded, used to locate albums being deleted
    pub local_albums: HashMap<AlbumId, Album>,
    /// Remote albums, used to place albums being created
    pub remote_albums: HashMap<AlbumId, Album>,
    /// Assets held by the stash: on disk, outside the diff
    pub pinned_assets: Vec<Asset>,
    /// Stash entries whose remote album no longer exists
    pub orphaned_stash: Vec<StashEntry>,
}

/// How a successful task left its entity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Applied {
    Written,
    AlreadyPresent,
}

/// Bounded-concurrency writer for one sync attempt
#[derive(Clone)]
pub struct WritePipeline {
    library: LocalLibrary,
    index: Arc<dyn LibraryIndex>,
    catalog: Arc<dyn RemoteCatalog>,
    events: EventSender,
    concurrency: usize,
}

impl WritePipeline {
    pub fn new(
        library: LocalLibrary,
        index: Arc<dyn LibraryIndex>,
        catalog: Arc<dyn RemoteCatalog>,
        events: EventSender,
        concurrency: usize,
    ) -> Self {
        Self {
            library,
            index,
            catalog,
            events,
            concurrency: concurrency.max(1),
        }
    }

    /// Apply `plan`, draining every phase before reporting.
    #[instrument(skip_all)]
    pub async fn run(&self, plan: WritePlan, cancel: &CancellationToken) -> WriteReport {
        let WritePlan {
            assets,
            albums,
            local_albums,
            remote_albums,
            pinned_assets,
            orphaned_stash,
        } = plan;
        let local_albums = Arc::new(local_albums);
        let remote_albums = Arc::new(remote_albums);
        let mut report = WriteReport::default();

        let (delete, add, keep) = assets.counts();
        self.events
            .sync(SyncEvent::WriteAssetsStarted { delete, add, keep });

        // Phase 1: Delete assets
        info!("Phase 1: Deleting {} assets", assets.to_delete.len());
        let deleted = self
            .run_phase(
                WriteOperation::DeleteAsset,
                assets.to_delete,
                cancel,
                &mut report,
                |asset: Asset| {
                    let ctx = self.clone();
                    async move { ctx.delete_asset(&asset).await }
                },
            )
            .await;
        report.assets_deleted = deleted.len();

        let (delete, add, keep) = albums.counts();
        self.events
            .sync(SyncEvent::WriteAlbumsStarted { delete, add, keep });

        // Phase 2: Delete albums, children before parents
        info!("Phase 2: Deleting {} albums", albums.to_delete.len());
        let delete_levels = by_depth(albums.to_delete, &AlbumTree::new(&local_albums));
        for (_, level) in delete_levels.into_iter().rev() {
            if report.interrupted {
                break;
            }
            let local = Arc::clone(&local_albums);
            let deleted = self
                .run_phase(
                    WriteOperation::DeleteAlbum,
                    level,
                    cancel,
                    &mut report,
                    |album: Album| {
                        let ctx = self.clone();
                        let local = Arc::clone(&local);
                        async move { ctx.delete_album(&album, &local).await }
                    },
                )
                .await;
            report.albums_deleted += deleted.len();
        }

        if report.interrupted || cancel.is_cancelled() {
            report.interrupted = true;
            warn!("Write pipeline interrupted after the delete phases");
            return report;
        }

        // Phase 3: Add assets
        info!("Phase 3: Adding {} assets", assets.to_add.len());
        let added = self
            .run_phase(
                WriteOperation::AddAsset,
                assets.to_add,
                cancel,
                &mut report,
                |asset: Asset| {
                    let ctx = self.clone();
                    async move { ctx.add_asset(&asset).await }
                },
            )
            .await;

        let mut added_ids = HashSet::new();
        let mut linkable: HashMap<AssetId, Asset> = HashMap::new();
        for (asset, applied) in added {
            match applied {
                Applied::Written => report.assets_downloaded += 1,
                Applied::AlreadyPresent => report.assets_skipped += 1,
            }
            added_ids.insert(asset.id.clone());
            linkable.insert(asset.id.clone(), asset);
        }
        for asset in assets.to_keep.into_iter().chain(pinned_assets) {
            linkable.entry(asset.id.clone()).or_insert(asset);
        }
        let linkable = Arc::new(linkable);
        let added_ids = Arc::new(added_ids);

        if report.interrupted {
            return report;
        }

        // Phase 4: Add albums, parents before children
        info!("Phase 4: Adding {} albums", albums.to_add.len());
        let add_levels = by_depth(albums.to_add, &AlbumTree::new(&remote_albums));
        let mut failed_albums: HashSet<AlbumId> = HashSet::new();
        for (_, level) in add_levels {
            if report.interrupted {
                break;
            }

            let (ready, blocked): (Vec<Album>, Vec<Album>) = level.into_iter().partition(|a| {
                a.parent
                    .as_ref()
                    .map_or(true, |parent| !failed_albums.contains(parent))
            });
            for album in blocked {
                report.failures.push(WriteFailure {
                    operation: WriteOperation::AddAlbum,
                    id: album.id.to_string(),
                    name: album.display_name(),
                    message: "parent album was not written".to_string(),
                });
                failed_albums.insert(album.id);
            }

            let scheduled: Vec<AlbumId> = ready.iter().map(|a| a.id.clone()).collect();
            let remote = Arc::clone(&remote_albums);
            let links = Arc::clone(&linkable);
            let written = self
                .run_phase(
                    WriteOperation::AddAlbum,
                    ready,
                    cancel,
                    &mut report,
                    |album: Album| {
                        let ctx = self.clone();
                        let remote = Arc::clone(&remote);
                        let links = Arc::clone(&links);
                        async move { ctx.add_album(&album, &remote, &links).await }
                    },
                )
                .await;

            let written: HashSet<AlbumId> = written.into_iter().map(|(a, _)| a.id).collect();
            report.albums_added += written.len();
            failed_albums.extend(scheduled.into_iter().filter(|id| !written.contains(id)));
        }

        if report.interrupted {
            return report;
        }

        // Phase 5: Refresh links of kept albums
        let stale: Vec<Album> = albums
            .to_keep
            .into_iter()
            .filter(|album| {
                local_albums.get(&album.id).is_some_and(|previous| {
                    previous.assets != album.assets
                        || album.assets.keys().any(|id| added_ids.contains(id))
                })
            })
            .collect();
        info!("Phase 5: Refreshing links of {} albums", stale.len());
        let refreshed = self
            .run_phase(
                WriteOperation::RefreshAlbum,
                stale,
                cancel,
                &mut report,
                |album: Album| {
                    let ctx = self.clone();
                    let local = Arc::clone(&local_albums);
                    let remote = Arc::clone(&remote_albums);
                    let links = Arc::clone(&linkable);
                    let added = Arc::clone(&added_ids);
                    async move {
                        ctx.refresh_album(&album, &local, &remote, &links, &added)
                            .await
                    }
                },
            )
            .await;
        report.albums_refreshed = refreshed.len();

        if report.interrupted {
            return report;
        }

        // Phase 6: Release orphaned stash entries
        info!("Phase 6: Releasing {} orphaned archives", orphaned_stash.len());
        for entry in orphaned_stash {
            if cancel.is_cancelled() {
                report.interrupted = true;
                break;
            }
            match self.release_entry(&entry).await {
                Ok(()) => {
                    report.stash_released += 1;
                    self.events.sync(SyncEvent::ItemWritten {
                        name: entry.album.display_name(),
                    });
                }
                Err(e) => {
                    warn!(album_id = %entry.album.id, error = %e, "Failed to release archive");
                    report.failures.push(WriteFailure {
                        operation: WriteOperation::ReleaseStash,
                        id: entry.album.id.to_string(),
                        name: entry.album.display_name(),
                        message: e.to_string(),
                    });
                }
            }
        }

        report
    }

    async fn delete_asset(&self, asset: &Asset) -> Result<Applied> {
        self.library.delete_asset(asset).await?;
        self.index.remove_asset(&asset.id).await?;
        Ok(Applied::Written)
    }

    async fn delete_album(&self, album: &Album, local: &HashMap<AlbumId, Album>) -> Result<Applied> {
        self.library
            .delete_album(album, &AlbumTree::new(local))
            .await?;
        self.index.remove_album(&album.id).await?;
        Ok(Applied::Written)
    }

    async fn add_album(
        &self,
        album: &Album,
        remote: &HashMap<AlbumId, Album>,
        links: &HashMap<AssetId, Asset>,
    ) -> Result<Applied> {
        let tree = AlbumTree::new(remote);
        self.library.write_album(album, &tree, links).await?;
        let relative = self.library.layout().display_path(album, &tree)?;
        self.index.upsert_album(album, &relative).await?;
        Ok(Applied::Written)
    }

    /// Members added in this run are relinked even if membership is unchanged,
    /// since their links may have been skipped while the file was missing.
    async fn refresh_album(
        &self,
        album: &Album,
        local: &HashMap<AlbumId, Album>,
        remote: &HashMap<AlbumId, Album>,
        links: &HashMap<AssetId, Asset>,
        added: &HashSet<AssetId>,
    ) -> Result<Applied> {
        let mut previous = local.get(&album.id).cloned().unwrap_or_else(|| album.clone());
        previous.assets.retain(|id, _| !added.contains(id));

        let tree = AlbumTree::new(remote);
        self.library
            .sync_album_links(album, &previous, &tree, links)
            .await?;
        let relative = self.library.layout().display_path(album, &tree)?;
        self.index.upsert_album(album, &relative).await?;
        Ok(Applied::Written)
    }

    async fn add_asset(&self, asset: &Asset) -> Result<Applied> {
        if self.library.verify_asset(asset).await? {
            debug!(asset_id = %asset.id, "Asset already present, skipping download");
            self.index.upsert_asset(asset).await?;
            return Ok(Applied::AlreadyPresent);
        }

        let data = self.catalog.download_asset(asset.id.as_str()).await?;
        self.library.write_asset(asset, data).await?;
        self.index.upsert_asset(asset).await?;
        Ok(Applied::Written)
    }

    async fn release_entry(&self, entry: &StashEntry) -> Result<()> {
        self.library.release_stashed(entry).await?;
        self.index.release_stash(&entry.album.id).await?;
        Ok(())
    }

    /// Run `task` for every item on the worker pool and wait for all of them.
    ///
    /// Returns the items whose task succeeded; failures land in `report`.
    async fn run_phase<T, F, Fut>(
        &self,
        operation: WriteOperation,
        items: Vec<T>,
        cancel: &CancellationToken,
        report: &mut WriteReport,
        task: F,
    ) -> Vec<(T, Applied)>
    where
        T: Entity,
        F: Fn(T) -> Fut,
        Fut: Future<Output = Result<Applied>> + Send + 'static,
    {
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut handles = Vec::with_capacity(items.len());

        for item in items {
            let permit = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                permit = Arc::clone(&semaphore).acquire_owned() => permit.ok(),
            };
            let Some(permit) = permit else {
                warn!(operation = operation.as_str(), "Stopped scheduling write tasks");
                report.interrupted = true;
                break;
            };

            let future = task(item.clone());
            let handle = tokio::spawn(async move {
                let result = future.await;
                drop(permit);
                result
            });
            handles.push((item, handle));
        }

        let mut applied = Vec::with_capacity(handles.len());
        for (item, handle) in handles {
            let result = match handle.await {
                Ok(result) => result,
                Err(e) => {
                    error!(error = %e, "Write task panicked");
                    Err(SyncError::Task(e.to_string()))
                }
            };

            match result {
                Ok(outcome) => {
                    self.events.sync(SyncEvent::ItemWritten {
                        name: item.display_name(),
                    });
                    applied.push((item, outcome));
                }
                Err(e) => {
                    warn!(
                        operation = operation.as_str(),
                        id = %item.id(),
                        error = %e,
                        "Write operation failed"
                    );
                    report.failures.push(WriteFailure {
                        operation,
                        id: item.id().to_string(),
                        name: item.display_name(),
                        message: e.to_string(),
                    });
                }
            }
        }
        applied
    }
}

/// Group albums by their depth in `tree`.
fn by_depth(albums: Vec<Album>, tree: &AlbumTree<'_>) -> BTreeMap<usize, Vec<Album>> {
    let mut levels: BTreeMap<usize, Vec<Album>> = BTreeMap::new();
    for album in albums {
        let depth = tree.depth(&album.id).unwrap_or_default();
        levels.entry(depth).or_default().push(album);
    }
    levels
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_library::models::AlbumKind;

    fn album(id: &str, parent: Option<&str>) -> Album {
        Album {
            id: AlbumId::new(id),
            name: id.to_string(),
            kind: AlbumKind::Folder,
            parent: parent.map(AlbumId::new),
            assets: Default::default(),
        }
    }

    #[test]
    fn test_by_depth_orders_levels() {
        let all = vec![album("root", None), album("mid", Some("root")), album("leaf", Some("mid"))];
        let map: HashMap<_, _> = all.iter().map(|a| (a.id.clone(), a.clone())).collect();

        let levels = by_depth(all, &AlbumTree::new(&map));
        let order: Vec<(usize, Vec<&str>)> = levels
            .iter()
            .map(|(d, albums)| (*d, albums.iter().map(|a| a.id.as_str()).collect()))
            .collect();
        assert_eq!(
            order,
            vec![(0, vec!["root"]), (1, vec!["mid"]), (2, vec!["leaf"])]
        );
    }
}
