//! # Sync Engine
//!
//! One attempt of the mirror: fetch both sides, exclude what the archive
//! stash owns, diff, resolve, and hand the queues to the write pipeline.
//! The engine keeps no state between attempts.

use crate::diff::diff;
use crate::error::{Result, SyncError};
use crate::pipeline::{WritePipeline, WritePlan};
use crate::resolver::resolve_albums;
use crate::run::WriteReport;
use bridge_traits::catalog::RemoteCatalog;
use core_library::conversion::{convert_albums, convert_assets};
use core_library::models::{Album, Asset, AssetId, LibrarySnapshot, StashEntry};
use core_library::{LibraryIndex, LocalLibrary};
use core_runtime::events::{EventSender, SyncEvent};
use std::collections::HashSet;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

/// Local and remote state with stash-owned entities removed
#[derive(Debug, Clone, Default)]
pub struct PreparedState {
    pub local: LibrarySnapshot,
    pub remote_assets: Vec<Asset>,
    pub remote_albums: Vec<Album>,
    /// Assets referenced by a stash entry
    pub pinned_assets: Vec<Asset>,
    /// Stash entries whose album is gone remotely
    pub orphaned_stash: Vec<StashEntry>,
}

/// Remove everything the stash owns from both sides of the diff.
///
/// Stashed albums are dropped from the remote set. Assets referenced by any
/// stash entry are dropped from both sides so they are neither fetched nor
/// deleted. `remote_album_ids` holds every album record the catalog
/// returned, converted or not; stash entries outside it are orphaned.
pub fn exclude_stashed(
    mut local: LibrarySnapshot,
    remote_assets: Vec<Asset>,
    remote_albums: Vec<Album>,
    stash: Vec<StashEntry>,
    remote_album_ids: &HashSet<String>,
) -> PreparedState {
    let stashed: HashSet<_> = stash.iter().map(|e| e.album.id.clone()).collect();
    let pinned: HashSet<AssetId> = stash.iter().flat_map(|e| e.asset_ids().cloned()).collect();

    local.assets.retain(|id, _| !pinned.contains(id));
    local.albums.retain(|id, _| !stashed.contains(id));
    let remote_assets = remote_assets
        .into_iter()
        .filter(|a| !pinned.contains(&a.id))
        .collect();
    let remote_albums = remote_albums
        .into_iter()
        .filter(|a| !stashed.contains(&a.id))
        .collect();

    let mut pinned_assets = Vec::new();
    let mut orphaned_stash = Vec::new();
    let mut seen = HashSet::new();
    for entry in stash {
        for asset in &entry.assets {
            if seen.insert(asset.id.clone()) {
                pinned_assets.push(asset.clone());
            }
        }
        if !remote_album_ids.contains(entry.album.id.as_str()) {
            orphaned_stash.push(entry);
        }
    }

    PreparedState {
        local,
        remote_assets,
        remote_albums,
        pinned_assets,
        orphaned_stash,
    }
}

/// Runs single fetch → diff → resolve → write attempts
#[derive(Clone)]
pub struct SyncEngine {
    library: LocalLibrary,
    index: Arc<dyn LibraryIndex>,
    catalog: Arc<dyn RemoteCatalog>,
    events: EventSender,
    concurrency: usize,
}

impl SyncEngine {
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

    /// Run one attempt.
    ///
    /// Errors before the write phase abort the attempt; write failures are
    /// absorbed into the returned report.
    #[instrument(skip_all)]
    pub async fn run_attempt(&self, cancel: &CancellationToken) -> Result<WriteReport> {
        // Phase 1: Fetch
        self.events.sync(SyncEvent::FetchStarted);
        info!("Phase 1: Fetching remote catalog and local snapshot");

        let fetch = async {
            tokio::try_join!(
                self.catalog.fetch_all_assets(),
                self.catalog.fetch_all_albums()
            )
        };
        let (batch, raw_albums) = tokio::select! {
            _ = cancel.cancelled() => return Err(SyncError::Cancelled),
            fetched = fetch => fetched?,
        };

        let mut snapshot = self.index.load_snapshot().await?;
        let stale = self
            .library
            .verify_snapshot(&mut snapshot, self.concurrency)
            .await;
        let stash = self.index.list_stash().await?;

        let assets = convert_assets(&batch);
        let albums = convert_albums(&raw_albums, &assets.items);
        debug!(
            skipped_assets = assets.skipped.len(),
            skipped_albums = albums.skipped.len(),
            stale_assets = stale.len(),
            "Converted remote records"
        );

        let remote_album_ids: HashSet<String> =
            raw_albums.iter().map(|a| a.record_name.clone()).collect();
        let state = exclude_stashed(snapshot, assets.items, albums.items, stash, &remote_album_ids);

        self.events.sync(SyncEvent::FetchCompleted {
            remote_assets: state.remote_assets.len() as u64,
            remote_albums: state.remote_albums.len() as u64,
            local_assets: state.local.assets.len() as u64,
            local_albums: state.local.albums.len() as u64,
        });

        // Phase 2: Diff and resolve
        self.events.sync(SyncEvent::DiffStarted);
        info!("Phase 2: Diffing library state");

        let PreparedState {
            local,
            remote_assets,
            remote_albums,
            pinned_assets,
            orphaned_stash,
        } = state;
        let asset_queue = diff(&local.assets, remote_assets);
        let album_queue = resolve_albums(diff(&local.albums, remote_albums.clone()), &local.albums)?;

        info!(
            assets_delete = asset_queue.to_delete.len(),
            assets_add = asset_queue.to_add.len(),
            albums_delete = album_queue.to_delete.len(),
            albums_add = album_queue.to_add.len(),
            "Diff completed"
        );
        self.events.sync(SyncEvent::DiffCompleted);

        if cancel.is_cancelled() {
            return Err(SyncError::Cancelled);
        }

        // Phase 3: Write
        self.events.sync(SyncEvent::WriteStarted);
        info!("Phase 3: Writing library state");

        let plan = WritePlan {
            assets: asset_queue,
            albums: album_queue,
            local_albums: local.albums,
            remote_albums: remote_albums
                .into_iter()
                .map(|a| (a.id.clone(), a))
                .collect(),
            pinned_assets,
            orphaned_stash,
        };
        let pipeline = WritePipeline::new(
            self.library.clone(),
            Arc::clone(&self.index),
            Arc::clone(&self.catalog),
            self.events.clone(),
            self.concurrency,
        );
        let report = pipeline.run(plan, cancel).await;
        self.events.sync(SyncEvent::WriteCompleted);

        if !report.interrupted {
            let generation = self.index.bump_generation().await?;
            info!(
                generation,
                failures = report.failures.len(),
                "Library state written"
            );
        }
        Ok(report)
    }
}
