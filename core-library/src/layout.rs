//! On-disk layout of the mirrored library
//!
//! ```text
//! <root>/
//! ├── _All-Photos/
//! │   ├── primary/<asset file>
//! │   └── shared/<asset file>
//! ├── _Archive/
//! │   ├── .stash/.<album id>/      archived albums, owned by the index
//! │   └── <album name>[-N]/        released archives, user owned
//! ├── .<album id>/                 album directory
//! │   ├── .<child id>/
//! │   ├── <child name> -> .<child id>
//! │   └── <pretty name> -> ../_All-Photos/primary/<asset file>
//! └── <album name> -> .<album id>
//! ```

use crate::error::Result;
use crate::models::{Album, AlbumId, AlbumTree, Asset};
use std::path::{Component, Path, PathBuf};

pub const ASSETS_DIR: &str = "_All-Photos";
pub const PRIMARY_ZONE_DIR: &str = "primary";
pub const SHARED_ZONE_DIR: &str = "shared";
pub const ARCHIVE_DIR: &str = "_Archive";
pub const STASH_DIR: &str = ".stash";

/// Files that may sit in an album directory without blocking its deletion.
pub const SAFE_FILES: &[&str] = &[".DS_Store"];

/// Paths of one album inside its parent directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlbumPaths {
    /// Directory containing both the album directory and its name link
    pub parent_dir: PathBuf,
    /// Hidden `.<id>` directory
    pub dir: PathBuf,
    /// Visible symlink named after the album
    pub link: PathBuf,
}

/// Path arithmetic for a library rooted at `root`.
#[derive(Debug, Clone)]
pub struct LibraryLayout {
    root: PathBuf,
}

impl LibraryLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn assets_dir(&self) -> PathBuf {
        self.root.join(ASSETS_DIR)
    }

    pub fn asset_path(&self, asset: &Asset) -> PathBuf {
        self.root.join(asset.relative_path())
    }

    pub fn archive_dir(&self) -> PathBuf {
        self.root.join(ARCHIVE_DIR)
    }

    pub fn stash_dir(&self) -> PathBuf {
        self.archive_dir().join(STASH_DIR)
    }

    /// Where an archived album directory lives while stashed
    pub fn stash_path(&self, id: &AlbumId) -> PathBuf {
        self.stash_dir().join(hidden_dir_name(id))
    }

    /// Directory and link of `album`, placed under its parents in `tree`.
    pub fn album_paths(&self, album: &Album, tree: &AlbumTree<'_>) -> Result<AlbumPaths> {
        let mut parent_dir = self.root.clone();
        for ancestor in tree.lineage(album)? {
            parent_dir.push(hidden_dir_name(&ancestor.id));
        }

        Ok(AlbumPaths {
            dir: parent_dir.join(hidden_dir_name(&album.id)),
            link: parent_dir.join(album.sanitized_name()),
            parent_dir,
        })
    }

    /// Visible path of `album` relative to the root, e.g. `Trips/2019`.
    pub fn display_path(&self, album: &Album, tree: &AlbumTree<'_>) -> Result<PathBuf> {
        let mut path = PathBuf::new();
        for ancestor in tree.lineage(album)? {
            path.push(ancestor.sanitized_name());
        }
        path.push(album.sanitized_name());
        Ok(path)
    }

    /// Link target from inside `album_dir` to the asset file.
    ///
    /// Targets are relative so the library can be moved as a whole.
    pub fn asset_link_target(&self, album_dir: &Path, asset: &Asset) -> PathBuf {
        let depth = self.relative(album_dir).components().count();
        let mut target = PathBuf::new();
        for _ in 0..depth {
            target.push("..");
        }
        target.join(asset.relative_path())
    }

    /// `path` relative to the root; paths outside the root are returned as is.
    pub fn relative(&self, path: &Path) -> PathBuf {
        path.strip_prefix(&self.root)
            .map(Path::to_path_buf)
            .unwrap_or_else(|_| path.to_path_buf())
    }

    /// Normalizes a user supplied album path to a root-relative visible path.
    ///
    /// Absolute paths must live under the root. `.` components are dropped;
    /// `..` components are rejected.
    pub fn normalize_user_path(&self, input: &Path) -> Option<PathBuf> {
        let relative = if input.is_absolute() {
            input.strip_prefix(&self.root).ok()?.to_path_buf()
        } else {
            input.to_path_buf()
        };

        let mut normalized = PathBuf::new();
        for component in relative.components() {
            match component {
                Component::Normal(part) => normalized.push(part),
                Component::CurDir => {}
                _ => return None,
            }
        }
        (!normalized.as_os_str().is_empty()).then_some(normalized)
    }
}

/// Name of the hidden directory holding an album's content
pub fn hidden_dir_name(id: &AlbumId) -> String {
    format!(".{}", id.as_str().replace('/', "_"))
}
