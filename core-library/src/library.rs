//! Filesystem effects on the mirrored library
//!
//! [`LocalLibrary`] owns every mutation of the on-disk tree: asset files,
//! album directories and their links, and the archive stash. It never
//! touches the index; callers record an effect only after the method
//! performing it returned `Ok`.

use crate::error::{LibraryError, Result};
use crate::layout::{hidden_dir_name, AlbumPaths, LibraryLayout, SAFE_FILES};
use crate::models::{
    Album, AlbumKind, AlbumTree, Asset, AssetId, ContentSignature, LibrarySnapshot, StashEntry,
};
use bridge_traits::storage::FileSystemAccess;
use bytes::Bytes;
use futures::stream::{self, StreamExt};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// A link that was replaced by a real copy of its target
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistedFile {
    pub path: PathBuf,
    /// Original link target, used to restore the link
    pub target: PathBuf,
}

/// Mutations of the library tree rooted at a [`LibraryLayout`]
#[derive(Clone)]
pub struct LocalLibrary {
    fs: Arc<dyn FileSystemAccess>,
    layout: LibraryLayout,
}

impl LocalLibrary {
    pub fn new(fs: Arc<dyn FileSystemAccess>, layout: LibraryLayout) -> Self {
        Self { fs, layout }
    }

    pub fn layout(&self) -> &LibraryLayout {
        &self.layout
    }

    pub fn fs(&self) -> &Arc<dyn FileSystemAccess> {
        &self.fs
    }

    // ========================================================================
    // Assets
    // ========================================================================

    /// Whether the asset file exists and matches the asset's signature.
    pub async fn verify_asset(&self, asset: &Asset) -> Result<bool> {
        let path = self.layout.asset_path(asset);
        let metadata = match self.fs.metadata(&path).await {
            Ok(metadata) => metadata,
            Err(e) if e.is_not_found() => return Ok(false),
            Err(e) => return Err(e.into()),
        };

        let Some(modified_ms) = metadata.modified_at_ms else {
            return Ok(false);
        };
        Ok(!metadata.is_directory
            && asset.signature().matches(&ContentSignature {
                size: metadata.size,
                modified_ms,
            }))
    }

    /// Write downloaded asset content into place.
    ///
    /// The data lands in a hidden `.part` file next to the target and is
    /// renamed over it once the modification time is set, so a reader never
    /// sees a half-written asset.
    #[instrument(skip(self, asset, data), fields(asset_id = %asset.id, size = data.len()))]
    pub async fn write_asset(&self, asset: &Asset, data: Bytes) -> Result<PathBuf> {
        let path = self.layout.asset_path(asset);
        let dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.layout.assets_dir());
        let part = dir.join(format!(".{}.part", asset.file_name()));

        self.fs.create_dir_all(&dir).await?;
        if let Err(e) = self.place_part(&part, &path, asset, data).await {
            self.remove_quietly(&part).await;
            return Err(e);
        }

        if !self.verify_asset(asset).await? {
            self.remove_quietly(&path).await;
            return Err(LibraryError::VerificationFailed {
                asset_id: asset.id.to_string(),
                path,
            });
        }

        debug!(path = ?path, "Asset written");
        Ok(path)
    }

    async fn place_part(&self, part: &Path, path: &Path, asset: &Asset, data: Bytes) -> Result<()> {
        self.fs.write_file(part, data).await?;
        self.fs.set_modified(part, asset.modified_ms).await?;
        self.fs.rename(part, path).await?;
        Ok(())
    }

    /// Remove an asset file. A file that is already gone counts as removed.
    pub async fn delete_asset(&self, asset: &Asset) -> Result<()> {
        let path = self.layout.asset_path(asset);
        match self.fs.delete_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.is_not_found() => {
                debug!(path = ?path, "Asset file already absent");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Mark every asset whose file is missing or stale in `snapshot`.
    ///
    /// Marked assets stay in the snapshot so the diff deletes their file and
    /// index row, and downloads them again if the remote still has them.
    /// Returns the marked ids.
    pub async fn verify_snapshot(
        &self,
        snapshot: &mut LibrarySnapshot,
        concurrency: usize,
    ) -> Vec<AssetId> {
        let checks = stream::iter(snapshot.assets.values().cloned())
            .map(|asset| async move {
                let fresh = match self.verify_asset(&asset).await {
                    Ok(fresh) => fresh,
                    Err(e) => {
                        warn!(asset_id = %asset.id, error = %e, "Cannot verify asset file");
                        false
                    }
                };
                (asset.id, fresh)
            })
            .buffer_unordered(concurrency.max(1))
            .collect::<Vec<_>>()
            .await;

        let mut stale: Vec<AssetId> = checks
            .into_iter()
            .filter_map(|(id, fresh)| (!fresh).then_some(id))
            .collect();
        stale.sort();

        for id in &stale {
            if let Some(asset) = snapshot.assets.get_mut(id) {
                asset.mark_stale();
            }
        }
        if !stale.is_empty() {
            info!(count = stale.len(), "Marked stale assets in local snapshot");
        }
        stale
    }

    // ========================================================================
    // Albums
    // ========================================================================

    /// Create the album directory and its name link inside the parent.
    ///
    /// Leftovers of an interrupted run (the hidden directory, a link already
    /// pointing at it) are reused. A name link pointing anywhere else is
    /// another album's and yields [`LibraryError::AlreadyExists`].
    #[instrument(skip_all, fields(album_id = %album.id))]
    pub async fn write_album(
        &self,
        album: &Album,
        tree: &AlbumTree<'_>,
        assets: &HashMap<AssetId, Asset>,
    ) -> Result<AlbumPaths> {
        let paths = self.layout.album_paths(album, tree)?;
        self.fs.create_dir_all(&paths.dir).await?;
        self.ensure_name_link(album, &paths).await?;

        if album.kind == AlbumKind::Album {
            for (asset_id, name) in &album.assets {
                match assets.get(asset_id) {
                    Some(asset) => self.link_asset(&paths.dir, name, asset).await?,
                    None => warn!(asset_id = %asset_id, "Album member not present locally"),
                }
            }
        }

        debug!(dir = ?paths.dir, "Album written");
        Ok(paths)
    }

    async fn ensure_name_link(&self, album: &Album, paths: &AlbumPaths) -> Result<()> {
        let target = PathBuf::from(hidden_dir_name(&album.id));
        match self.fs.symlink_metadata(&paths.link).await {
            Ok(metadata) if metadata.is_symlink => {
                if self.fs.read_link(&paths.link).await? == target {
                    return Ok(());
                }
                Err(LibraryError::AlreadyExists(paths.link.clone()))
            }
            Ok(_) => Err(LibraryError::AlreadyExists(paths.link.clone())),
            Err(e) if e.is_not_found() => {
                self.fs.symlink(&target, &paths.link).await?;
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn link_asset(&self, dir: &Path, name: &str, asset: &Asset) -> Result<()> {
        let link = dir.join(name);
        if self.fs.exists(&link).await? {
            self.fs.delete_file(&link).await?;
        }
        let target = self.layout.asset_link_target(dir, asset);
        self.fs.symlink(&target, &link).await?;
        Ok(())
    }

    /// Bring the asset links of a kept album in line with its new membership.
    ///
    /// Only links are removed; real files left by an earlier archive are kept.
    pub async fn sync_album_links(
        &self,
        album: &Album,
        previous: &Album,
        tree: &AlbumTree<'_>,
        assets: &HashMap<AssetId, Asset>,
    ) -> Result<()> {
        if album.kind != AlbumKind::Album || album.assets == previous.assets {
            return Ok(());
        }
        let dir = self.layout.album_paths(album, tree)?.dir;

        for (asset_id, name) in &previous.assets {
            if album.assets.get(asset_id) == Some(name) {
                continue;
            }
            let link = dir.join(name);
            match self.fs.symlink_metadata(&link).await {
                Ok(metadata) if metadata.is_symlink => self.fs.delete_file(&link).await?,
                Ok(_) => debug!(path = ?link, "Keeping real file in album"),
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e.into()),
            }
        }

        for (asset_id, name) in &album.assets {
            if previous.assets.get(asset_id) == Some(name) {
                continue;
            }
            match assets.get(asset_id) {
                Some(asset) => self.link_asset(&dir, name, asset).await?,
                None => warn!(asset_id = %asset_id, "Album member not present locally"),
            }
        }
        Ok(())
    }

    /// Remove an album directory and its name link.
    ///
    /// The directory may only contain links and [`SAFE_FILES`]; anything else
    /// means user data and the album is left in place.
    #[instrument(skip_all, fields(album_id = %album.id))]
    pub async fn delete_album(&self, album: &Album, tree: &AlbumTree<'_>) -> Result<()> {
        let paths = self.layout.album_paths(album, tree)?;

        match self.fs.list_directory(&paths.dir).await {
            Ok(entries) => {
                for entry in entries {
                    let safe = entry
                        .file_name()
                        .and_then(|n| n.to_str())
                        .is_some_and(|n| SAFE_FILES.contains(&n));
                    if safe || self.fs.symlink_metadata(&entry).await?.is_symlink {
                        continue;
                    }
                    return Err(LibraryError::AlbumNotEmpty {
                        path: paths.dir.clone(),
                        entry,
                    });
                }
                self.fs.delete_dir_all(&paths.dir).await?;
            }
            Err(e) if e.is_not_found() => debug!(dir = ?paths.dir, "Album directory already absent"),
            Err(e) => return Err(e.into()),
        }

        self.remove_quietly(&paths.link).await;
        Ok(())
    }

    // ========================================================================
    // Archive
    // ========================================================================

    /// Replace the album's asset links with real copies of the asset files.
    ///
    /// Copies carry the asset's modification time. If any copy fails, the
    /// links already replaced are restored before the error is returned.
    pub async fn persist_album_assets(
        &self,
        dir: &Path,
        album: &Album,
        assets: &[Asset],
    ) -> Result<Vec<PersistedFile>> {
        let by_id: HashMap<&AssetId, &Asset> = assets.iter().map(|a| (&a.id, a)).collect();
        let mut persisted = Vec::new();

        for (asset_id, name) in &album.assets {
            let Some(asset) = by_id.get(asset_id) else {
                continue;
            };
            let link = dir.join(name);
            match self.fs.symlink_metadata(&link).await {
                Ok(metadata) if metadata.is_symlink => {}
                Ok(_) => continue,
                Err(e) if e.is_not_found() => continue,
                Err(e) => {
                    self.revert_persisted(&persisted).await;
                    return Err(e.into());
                }
            }
            if !self.verify_asset(asset).await.unwrap_or(false) {
                warn!(asset_id = %asset_id, "Asset file missing, leaving link in place");
                continue;
            }

            match self.persist_one(&link, name, asset).await {
                Ok(file) => persisted.push(file),
                Err(e) => {
                    self.revert_persisted(&persisted).await;
                    return Err(e);
                }
            }
        }

        debug!(count = persisted.len(), "Persisted album assets");
        Ok(persisted)
    }

    async fn persist_one(&self, link: &Path, name: &str, asset: &Asset) -> Result<PersistedFile> {
        let target = self.fs.read_link(link).await?;
        let dir = link.parent().unwrap_or(link);
        let tmp = dir.join(format!(".{name}.persist"));

        let copied = async {
            self.fs.copy_file(&self.layout.asset_path(asset), &tmp).await?;
            self.fs.set_modified(&tmp, asset.modified_ms).await?;
            self.fs.rename(&tmp, link).await
        }
        .await;
        if let Err(e) = copied {
            self.remove_quietly(&tmp).await;
            return Err(e.into());
        }

        Ok(PersistedFile {
            path: link.to_path_buf(),
            target,
        })
    }

    /// Turn persisted copies back into links. Best effort.
    pub async fn revert_persisted(&self, persisted: &[PersistedFile]) {
        for file in persisted {
            self.remove_quietly(&file.path).await;
            if let Err(e) = self.fs.symlink(&file.target, &file.path).await {
                warn!(path = ?file.path, error = %e, "Failed to restore album link");
            }
        }
    }

    /// Move the album directory into the stash and drop its name link.
    #[instrument(skip_all, fields(album_id = %album.id))]
    pub async fn stash_album(&self, album: &Album, tree: &AlbumTree<'_>) -> Result<PathBuf> {
        let paths = self.layout.album_paths(album, tree)?;
        let stash = self.layout.stash_path(&album.id);

        if self.fs.exists(&stash).await? {
            return Err(LibraryError::AlreadyExists(stash));
        }
        self.fs.create_dir_all(&self.layout.stash_dir()).await?;
        self.fs.rename(&paths.dir, &stash).await?;

        if let Err(e) = self.fs.delete_file(&paths.link).await {
            if !e.is_not_found() {
                if let Err(undo) = self.fs.rename(&stash, &paths.dir).await {
                    warn!(error = %undo, "Failed to move album back out of the stash");
                }
                return Err(e.into());
            }
        }

        debug!(stash = ?stash, "Album stashed");
        Ok(stash)
    }

    /// Move a stashed album directory back into the live tree.
    ///
    /// `album` carries the parent it is restored under.
    #[instrument(skip_all, fields(album_id = %album.id))]
    pub async fn restore_album(&self, album: &Album, tree: &AlbumTree<'_>) -> Result<AlbumPaths> {
        let paths = self.layout.album_paths(album, tree)?;
        let stash = self.layout.stash_path(&album.id);

        for path in [&paths.dir, &paths.link] {
            if self.fs.exists(path).await? {
                return Err(LibraryError::AlreadyExists(path.clone()));
            }
        }

        self.fs.create_dir_all(&paths.parent_dir).await?;
        self.fs.rename(&stash, &paths.dir).await?;
        let target = PathBuf::from(hidden_dir_name(&album.id));
        if let Err(e) = self.fs.symlink(&target, &paths.link).await {
            if let Err(undo) = self.fs.rename(&paths.dir, &stash).await {
                warn!(error = %undo, "Failed to move album back into the stash");
            }
            return Err(e.into());
        }

        debug!(dir = ?paths.dir, "Album restored");
        Ok(paths)
    }

    /// Replace persisted copies in a restored album with links, where the
    /// asset file is still present in the asset directory.
    pub async fn relink_album_assets(&self, dir: &Path, album: &Album, assets: &[Asset]) -> Result<usize> {
        let by_id: HashMap<&AssetId, &Asset> = assets.iter().map(|a| (&a.id, a)).collect();
        let mut relinked = 0;

        for (asset_id, name) in &album.assets {
            let Some(asset) = by_id.get(asset_id) else {
                continue;
            };
            let path = dir.join(name);
            match self.fs.symlink_metadata(&path).await {
                Ok(metadata) if !metadata.is_symlink && !metadata.is_directory => {}
                Ok(_) => continue,
                Err(e) if e.is_not_found() => continue,
                Err(e) => return Err(e.into()),
            }
            if !self.verify_asset(asset).await? {
                debug!(asset_id = %asset_id, "Keeping persisted copy");
                continue;
            }

            self.fs.delete_file(&path).await?;
            self.fs
                .symlink(&self.layout.asset_link_target(dir, asset), &path)
                .await?;
            relinked += 1;
        }
        Ok(relinked)
    }

    /// Hand a stashed album over to the user under `_Archive/<name>`.
    ///
    /// A `-N` suffix is added when the name is taken.
    #[instrument(skip_all, fields(album_id = %entry.album.id))]
    pub async fn release_stashed(&self, entry: &StashEntry) -> Result<PathBuf> {
        let stash = self.layout.stash_path(&entry.album.id);
        let archive = self.layout.archive_dir();
        let name = entry.album.sanitized_name();

        let mut target = archive.join(&name);
        let mut n = 1;
        while self.fs.exists(&target).await? {
            target = archive.join(format!("{name}-{n}"));
            n += 1;
        }

        self.fs.rename(&stash, &target).await?;
        info!(path = ?target, "Released archived album");
        Ok(target)
    }

    async fn remove_quietly(&self, path: &Path) {
        if let Err(e) = self.fs.delete_file(path).await {
            if !e.is_not_found() {
                warn!(path = ?path, error = %e, "Failed to remove file");
            }
        }
    }
}
