//! Shared fixtures for the sync integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use bridge_desktop::{PidFileLock, TokioFileSystem};
use bridge_traits::catalog::{
    CatalogResult, RemoteAlbum, RemoteAssetBatch, RemoteAssetRecord, RemoteCatalog,
    RemoteDeleteOutcome, RemoteError, RemoteMaster, RemoteResource, RemoteZone,
};
use bytes::Bytes;
use core_library::{
    Album, AlbumId, Asset, AssetId, LibraryError, LibraryIndex, LibrarySnapshot,
    SqliteLibraryIndex, StashEntry,
};
use core_runtime::config::{CoreConfig, CoreConfigBuilder, LOCK_FILE_NAME};
use core_runtime::events::EventSender;
use core_sync::{open_index, ArchiveManager, SyncOrchestrator};
use std::collections::{HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::Mutex as AsyncMutex;

/// Modification time every fake photo carries
pub const MODIFIED_MS: i64 = 1_600_000_000_000;

pub const ALBUM: i32 = 0;
pub const FOLDER: i32 = 3;

// ============================================================================
// Fake Catalog
// ============================================================================

#[derive(Default)]
struct CatalogState {
    batch: RemoteAssetBatch,
    albums: Vec<RemoteAlbum>,
    fetch_errors: VecDeque<RemoteError>,
    failing_downloads: HashSet<String>,
    download_delay: Option<Duration>,
    failing_deletes: HashSet<String>,
    deleted: Vec<String>,
}

/// In-memory remote catalog with failure injection and call counters
#[derive(Default)]
pub struct FakeCatalog {
    state: AsyncMutex<CatalogState>,
    fetches: AtomicU32,
    refreshes: AtomicU32,
    downloads: AtomicU32,
}

impl FakeCatalog {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Add a photo: asset record `record`, master `m-{record}`, content
    /// checksum `checksum` of `size` bytes.
    pub async fn add_photo(&self, record: &str, filename: &str, checksum: &str, size: u64) {
        let mut state = self.state.lock().await;
        let master = format!("m-{record}");
        state.batch.masters.push(RemoteMaster {
            record_name: master.clone(),
            filename: filename.to_string(),
            resource: RemoteResource {
                checksum: checksum.to_string(),
                size,
                extension: "jpg".to_string(),
            },
            zone: RemoteZone::Primary,
        });
        state.batch.assets.push(RemoteAssetRecord {
            record_name: record.to_string(),
            master_ref: master,
            favorite: false,
            modified_ms: MODIFIED_MS,
            edited_resource: None,
            zone: RemoteZone::Primary,
        });
    }

    pub async fn set_favorite(&self, record: &str) {
        let mut state = self.state.lock().await;
        for asset in state.batch.assets.iter_mut().filter(|a| a.record_name == record) {
            asset.favorite = true;
        }
    }

    pub async fn remove_photo(&self, record: &str) {
        let mut state = self.state.lock().await;
        state.batch.assets.retain(|a| a.record_name != record);
        let master = format!("m-{record}");
        state.batch.masters.retain(|m| m.record_name != master);
        for album in &mut state.albums {
            album.asset_records.retain(|r| r != record);
        }
    }

    pub async fn add_album(
        &self,
        record: &str,
        name: &str,
        album_type: i32,
        parent: Option<&str>,
        members: &[&str],
    ) {
        self.state.lock().await.albums.push(RemoteAlbum {
            record_name: record.to_string(),
            name: name.to_string(),
            album_type,
            parent_id: parent.map(str::to_string),
            asset_records: members.iter().map(|m| m.to_string()).collect(),
        });
    }

    pub async fn rename_album(&self, record: &str, name: &str) {
        let mut state = self.state.lock().await;
        for album in state.albums.iter_mut().filter(|a| a.record_name == record) {
            album.name = name.to_string();
        }
    }

    pub async fn remove_album(&self, record: &str) {
        self.state.lock().await.albums.retain(|a| a.record_name != record);
    }

    /// Fail the next fetches with `errors`, one per fetch.
    pub async fn fail_fetches(&self, errors: Vec<RemoteError>) {
        self.state.lock().await.fetch_errors.extend(errors);
    }

    pub async fn fail_download(&self, checksum: &str) {
        self.state
            .lock()
            .await
            .failing_downloads
            .insert(checksum.to_string());
    }

    pub async fn clear_download_failures(&self) {
        self.state.lock().await.failing_downloads.clear();
    }

    pub async fn set_download_delay(&self, delay: Duration) {
        self.state.lock().await.download_delay = Some(delay);
    }

    pub async fn fail_delete(&self, record: &str) {
        self.state
            .lock()
            .await
            .failing_deletes
            .insert(record.to_string());
    }

    pub async fn deleted(&self) -> Vec<String> {
        self.state.lock().await.deleted.clone()
    }

    pub fn fetches(&self) -> u32 {
        self.fetches.load(Ordering::SeqCst)
    }

    pub fn refreshes(&self) -> u32 {
        self.refreshes.load(Ordering::SeqCst)
    }

    pub fn downloads(&self) -> u32 {
        self.downloads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RemoteCatalog for FakeCatalog {
    async fn fetch_all_assets(&self) -> CatalogResult<RemoteAssetBatch> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state.lock().await;
        if let Some(error) = state.fetch_errors.pop_front() {
            return Err(error);
        }
        Ok(state.batch.clone())
    }

    async fn fetch_all_albums(&self) -> CatalogResult<Vec<RemoteAlbum>> {
        Ok(self.state.lock().await.albums.clone())
    }

    async fn download_asset(&self, checksum: &str) -> CatalogResult<Bytes> {
        self.downloads.fetch_add(1, Ordering::SeqCst);
        let (delay, failing, size) = {
            let state = self.state.lock().await;
            let size = state
                .batch
                .masters
                .iter()
                .map(|m| &m.resource)
                .chain(state.batch.assets.iter().filter_map(|a| a.edited_resource.as_ref()))
                .find(|r| r.checksum == checksum)
                .map(|r| r.size);
            (
                state.download_delay,
                state.failing_downloads.contains(checksum),
                size,
            )
        };

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if failing {
            return Err(RemoteError::Network(format!("connection reset for {checksum}")));
        }
        let size = size.ok_or_else(|| RemoteError::NotFound(checksum.to_string()))?;
        Ok(Bytes::from(vec![0u8; size as usize]))
    }

    async fn delete_remote(
        &self,
        record_names: &[String],
    ) -> CatalogResult<Vec<RemoteDeleteOutcome>> {
        let mut state = self.state.lock().await;
        let mut outcomes = Vec::new();
        for record in record_names {
            let result = if state.failing_deletes.contains(record) {
                Err(RemoteError::Network("delete rejected".to_string()))
            } else {
                state.batch.assets.retain(|a| &a.record_name != record);
                state.deleted.push(record.clone());
                Ok(())
            };
            outcomes.push(RemoteDeleteOutcome {
                record_name: record.clone(),
                result,
            });
        }
        Ok(outcomes)
    }

    async fn refresh_session(&self) -> CatalogResult<()> {
        self.refreshes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

// ============================================================================
// Failing Index
// ============================================================================

/// Index that fails the stash transactions on request and delegates the rest
pub struct FailingIndex {
    inner: Arc<SqliteLibraryIndex>,
    pub fail_stash: bool,
    pub fail_restore: bool,
}

impl FailingIndex {
    pub fn new(inner: Arc<SqliteLibraryIndex>) -> Self {
        Self {
            inner,
            fail_stash: false,
            fail_restore: false,
        }
    }
}

fn injected() -> LibraryError {
    LibraryError::Database(sqlx::Error::PoolClosed)
}

#[async_trait]
impl LibraryIndex for FailingIndex {
    async fn check_schema(&self) -> core_library::Result<()> {
        self.inner.check_schema().await
    }

    async fn load_snapshot(&self) -> core_library::Result<LibrarySnapshot> {
        self.inner.load_snapshot().await
    }

    async fn upsert_asset(&self, asset: &Asset) -> core_library::Result<()> {
        self.inner.upsert_asset(asset).await
    }

    async fn remove_asset(&self, id: &AssetId) -> core_library::Result<bool> {
        self.inner.remove_asset(id).await
    }

    async fn upsert_album(&self, album: &Album, relative_path: &Path) -> core_library::Result<()> {
        self.inner.upsert_album(album, relative_path).await
    }

    async fn remove_album(&self, id: &AlbumId) -> core_library::Result<bool> {
        self.inner.remove_album(id).await
    }

    async fn generation(&self) -> core_library::Result<u64> {
        self.inner.generation().await
    }

    async fn bump_generation(&self) -> core_library::Result<u64> {
        self.inner.bump_generation().await
    }

    async fn stash_album(&self, entry: &StashEntry) -> core_library::Result<()> {
        if self.fail_stash {
            return Err(injected());
        }
        self.inner.stash_album(entry).await
    }

    async fn restore_stashed(
        &self,
        album: &Album,
        relative_path: &Path,
    ) -> core_library::Result<StashEntry> {
        if self.fail_restore {
            return Err(injected());
        }
        self.inner.restore_stashed(album, relative_path).await
    }

    async fn release_stash(&self, id: &AlbumId) -> core_library::Result<bool> {
        self.inner.release_stash(id).await
    }

    async fn stash_entry(&self, id: &AlbumId) -> core_library::Result<Option<StashEntry>> {
        self.inner.stash_entry(id).await
    }

    async fn list_stash(&self) -> core_library::Result<Vec<StashEntry>> {
        self.inner.list_stash().await
    }
}

// ============================================================================
// Test Library
// ============================================================================

/// A library in a temporary directory, driven by a [`FakeCatalog`]
pub struct TestLibrary {
    _dir: TempDir,
    pub root: PathBuf,
    pub catalog: Arc<FakeCatalog>,
    pub index: Arc<SqliteLibraryIndex>,
}

impl TestLibrary {
    pub async fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("library");
        let config = config_builder(&root).build().unwrap();
        let index = open_index(&config).await.unwrap();
        Self {
            _dir: dir,
            root,
            catalog: FakeCatalog::new(),
            index,
        }
    }

    /// Configuration builder preset for this library
    pub fn config(&self) -> CoreConfigBuilder {
        config_builder(&self.root)
    }

    pub fn orchestrator(&self) -> SyncOrchestrator {
        self.orchestrator_with(self.config().build().unwrap(), EventSender::disabled())
    }

    pub fn orchestrator_with(&self, config: CoreConfig, events: EventSender) -> SyncOrchestrator {
        SyncOrchestrator::new(config, self.index.clone(), self.catalog.clone(), events)
    }

    pub fn archive_manager(&self, remote_delete: bool) -> ArchiveManager {
        self.archive_manager_with(remote_delete, self.index.clone())
    }

    pub fn archive_manager_with(
        &self,
        remote_delete: bool,
        index: Arc<dyn LibraryIndex>,
    ) -> ArchiveManager {
        let config = self.config().remote_delete(remote_delete).build().unwrap();
        ArchiveManager::new(&config, index, self.catalog.clone(), EventSender::disabled())
    }

    /// Archive manager whose index fails the stash transactions as set
    pub fn failing_archive_manager(&self, fail_stash: bool, fail_restore: bool) -> ArchiveManager {
        let mut index = FailingIndex::new(self.index.clone());
        index.fail_stash = fail_stash;
        index.fail_restore = fail_restore;
        self.archive_manager_with(false, Arc::new(index))
    }

    pub async fn snapshot(&self) -> LibrarySnapshot {
        self.index.load_snapshot().await.unwrap()
    }

    /// Path of an asset file for a photo with the given checksum
    pub fn asset_file(&self, checksum: &str) -> PathBuf {
        self.root
            .join("_All-Photos")
            .join("primary")
            .join(format!("{checksum}.jpg"))
    }

    pub fn path(&self, relative: &str) -> PathBuf {
        self.root.join(relative)
    }
}

fn config_builder(root: &Path) -> CoreConfigBuilder {
    CoreConfig::builder()
        .data_dir(root)
        .max_attempts(3)
        .retry_backoff(Duration::from_millis(1))
        .file_system(Arc::new(TokioFileSystem::new()))
        .library_lock(Arc::new(PidFileLock::new(root.join(LOCK_FILE_NAME))))
}

/// Size of the file `path` resolves to, following links
pub async fn file_size(path: &Path) -> Option<u64> {
    tokio::fs::metadata(path).await.ok().map(|m| m.len())
}

pub async fn is_symlink(path: &Path) -> bool {
    tokio::fs::symlink_metadata(path)
        .await
        .map(|m| m.file_type().is_symlink())
        .unwrap_or(false)
}

pub async fn is_regular_file(path: &Path) -> bool {
    tokio::fs::symlink_metadata(path)
        .await
        .map(|m| m.file_type().is_file())
        .unwrap_or(false)
}

pub async fn exists(path: &Path) -> bool {
    tokio::fs::symlink_metadata(path).await.is_ok()
}
