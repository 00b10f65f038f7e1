//! Domain models for the mirrored photo library
//!
//! Assets and albums are identified by the stable id the remote catalog
//! assigns them. Each model knows how to compare its content with another
//! version of itself so the diff engine can tell "unchanged" apart from
//! "changed under the same id".

use crate::error::{LibraryError, Result};
use crate::layout::{ASSETS_DIR, PRIMARY_ZONE_DIR, SHARED_ZONE_DIR};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::hash::Hash;
use std::path::PathBuf;

/// Tolerance applied when comparing modification times.
pub const MTIME_TOLERANCE_MS: i64 = 1000;

/// Size sentinel of an asset whose file failed verification
const STALE_SIZE: u64 = u64::MAX;

// =============================================================================
// ID Types
// =============================================================================

/// Unique identifier for an asset (checksum of its file resource)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, sqlx::Type)]
#[sqlx(transparent)]
pub struct AssetId(pub String);

impl AssetId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AssetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for an album or folder
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, sqlx::Type)]
#[sqlx(transparent)]
pub struct AlbumId(pub String);

impl AlbumId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AlbumId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Reference from a remote asset record to its master record
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MasterRef(pub String);

impl fmt::Display for MasterRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// =============================================================================
// Entity
// =============================================================================

/// Behaviour shared by every entity the diff engine partitions.
pub trait Entity: Clone + Send + Sync + 'static {
    type Id: Clone + Eq + Hash + Ord + fmt::Display + Send + Sync + 'static;

    fn id(&self) -> &Self::Id;

    /// Same id, same content. Differences outside the content signature
    /// (e.g. favorite flag, album membership) do not count.
    fn content_equal(&self, other: &Self) -> bool;

    /// Name used in progress events and logs
    fn display_name(&self) -> String;
}

// =============================================================================
// Assets
// =============================================================================

/// Remote zone an asset belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Zone {
    Primary,
    Shared,
}

impl Zone {
    /// Directory name under the asset directory
    pub fn dir_name(&self) -> &'static str {
        match self {
            Zone::Primary => PRIMARY_ZONE_DIR,
            Zone::Shared => SHARED_ZONE_DIR,
        }
    }
}

/// Which file of a photo an asset represents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetVariant {
    Original,
    Edited,
}

/// Content signature used to decide whether two versions are equal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContentSignature {
    pub size: u64,
    pub modified_ms: i64,
}

impl ContentSignature {
    /// Exact size, modification time within [`MTIME_TOLERANCE_MS`].
    pub fn matches(&self, other: &ContentSignature) -> bool {
        self.size == other.size
            && (self.modified_ms - other.modified_ms).abs() <= MTIME_TOLERANCE_MS
    }
}

/// A single downloadable file of the remote library
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Asset {
    pub id: AssetId,
    /// Remote asset record; shared by the original and edited variants
    pub record_name: String,
    /// Original filename without extension
    pub filename: String,
    /// Extension without the leading dot
    pub extension: String,
    pub size: u64,
    pub modified_ms: i64,
    pub favorite: bool,
    pub variant: AssetVariant,
    pub zone: Zone,
}

impl Asset {
    pub fn signature(&self) -> ContentSignature {
        ContentSignature {
            size: self.size,
            modified_ms: self.modified_ms,
        }
    }

    /// Poison the signature so the asset never content-matches a remote one.
    ///
    /// A stale local asset then diffs as a delete, followed by an add when
    /// the remote still has it.
    pub fn mark_stale(&mut self) {
        self.size = STALE_SIZE;
    }

    pub fn is_stale(&self) -> bool {
        self.size == STALE_SIZE
    }

    /// On-disk file name: the id made filesystem safe, plus the extension.
    pub fn file_name(&self) -> String {
        let stem: String = self
            .id
            .as_str()
            .trim_end_matches('=')
            .chars()
            .map(|c| match c {
                '+' => '-',
                '/' => '_',
                other => other,
            })
            .collect();
        with_extension(&stem, &self.extension)
    }

    /// Human-facing name used for album links.
    pub fn pretty_name(&self) -> String {
        let mut stem = self.filename.replace('/', "_");
        if self.variant == AssetVariant::Edited {
            stem.push_str("-edited");
        }
        with_extension(&stem, &self.extension)
    }

    /// Path relative to the library root
    pub fn relative_path(&self) -> PathBuf {
        PathBuf::from(ASSETS_DIR)
            .join(self.zone.dir_name())
            .join(self.file_name())
    }
}

fn with_extension(stem: &str, extension: &str) -> String {
    if extension.is_empty() {
        stem.to_string()
    } else {
        format!("{stem}.{extension}")
    }
}

impl Entity for Asset {
    type Id = AssetId;

    fn id(&self) -> &AssetId {
        &self.id
    }

    fn content_equal(&self, other: &Self) -> bool {
        self.id == other.id && self.signature().matches(&other.signature())
    }

    fn display_name(&self) -> String {
        self.pretty_name()
    }
}

// =============================================================================
// Albums
// =============================================================================

/// Kind of an album node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlbumKind {
    /// Holds asset links
    Album,
    /// Holds other albums only
    Folder,
    /// Detached from the live tree and owned by the archive stash
    Archived,
}

/// An album or folder in the remote hierarchy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Album {
    pub id: AlbumId,
    pub name: String,
    pub kind: AlbumKind,
    /// `None` for top-level albums
    pub parent: Option<AlbumId>,
    /// Member assets and the link name used for each
    #[serde(default)]
    pub assets: BTreeMap<AssetId, String>,
}

impl Album {
    /// Display name made safe for use as a single path component.
    pub fn sanitized_name(&self) -> String {
        let name = self.name.replace('/', "_");
        match name.as_str() {
            "" | "." | ".." => format!("_{name}"),
            _ => name,
        }
    }
}

impl Entity for Album {
    type Id = AlbumId;

    fn id(&self) -> &AlbumId {
        &self.id
    }

    fn content_equal(&self, other: &Self) -> bool {
        self.id == other.id
            && self.sanitized_name() == other.sanitized_name()
            && self.kind == other.kind
            && self.parent == other.parent
    }

    fn display_name(&self) -> String {
        self.name.clone()
    }
}

/// Read-only view of an album hierarchy keyed by id.
#[derive(Debug, Clone, Copy)]
pub struct AlbumTree<'a> {
    albums: &'a HashMap<AlbumId, Album>,
}

impl<'a> AlbumTree<'a> {
    pub fn new(albums: &'a HashMap<AlbumId, Album>) -> Self {
        Self { albums }
    }

    pub fn get(&self, id: &AlbumId) -> Option<&'a Album> {
        self.albums.get(id)
    }

    pub fn contains(&self, id: &AlbumId) -> bool {
        self.albums.contains_key(id)
    }

    /// Ancestor ids, nearest parent first.
    ///
    /// The walk stops at the first parent that is not part of the tree. A
    /// parent chain that revisits an album is reported as
    /// [`LibraryError::TreeCycle`].
    pub fn ancestors(&self, id: &AlbumId) -> Result<Vec<AlbumId>> {
        let mut chain = Vec::new();
        let mut seen = HashSet::new();
        seen.insert(id.clone());

        let mut current = self.albums.get(id).and_then(|a| a.parent.as_ref());
        while let Some(parent_id) = current {
            if !seen.insert(parent_id.clone()) {
                return Err(LibraryError::TreeCycle {
                    album_id: parent_id.to_string(),
                });
            }
            chain.push(parent_id.clone());
            current = self.albums.get(parent_id).and_then(|a| a.parent.as_ref());
        }
        Ok(chain)
    }

    /// Ancestor albums, root first, requiring every parent to be present.
    ///
    /// `album` itself does not need to be part of the tree, so this also
    /// resolves the parents of an album that is about to be created.
    pub fn lineage(&self, album: &Album) -> Result<Vec<&'a Album>> {
        let mut lineage = Vec::new();
        let mut seen = HashSet::new();
        seen.insert(album.id.clone());

        let mut child = album.id.clone();
        let mut current = album.parent.clone();
        while let Some(parent_id) = current {
            if !seen.insert(parent_id.clone()) {
                return Err(LibraryError::TreeCycle {
                    album_id: parent_id.to_string(),
                });
            }
            let parent = self
                .albums
                .get(&parent_id)
                .ok_or_else(|| LibraryError::OrphanedAlbum {
                    album_id: child.to_string(),
                    parent_id: parent_id.to_string(),
                })?;
            lineage.push(parent);
            child = parent_id;
            current = parent.parent.clone();
        }

        lineage.reverse();
        Ok(lineage)
    }

    /// Number of ancestors within the tree.
    pub fn depth(&self, id: &AlbumId) -> Result<usize> {
        Ok(self.ancestors(id)?.len())
    }
}

// =============================================================================
// Snapshot & Stash
// =============================================================================

/// Complete local state loaded once per run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LibrarySnapshot {
    pub assets: HashMap<AssetId, Asset>,
    pub albums: HashMap<AlbumId, Album>,
    pub generation: u64,
}

impl LibrarySnapshot {
    pub fn album_tree(&self) -> AlbumTree<'_> {
        AlbumTree::new(&self.albums)
    }
}

/// An archived album detached from the live tree
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StashEntry {
    pub album: Album,
    /// Full records of the album's member assets at archive time
    pub assets: Vec<Asset>,
    /// Visible path (relative to the library root) the album was archived from
    pub original_path: PathBuf,
    pub archived_at: DateTime<Utc>,
}

impl StashEntry {
    pub fn asset_ids(&self) -> impl Iterator<Item = &AssetId> {
        self.assets.iter().map(|a| &a.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn asset(id: &str, size: u64, modified_ms: i64) -> Asset {
        Asset {
            id: AssetId::new(id),
            record_name: "rec-1".to_string(),
            filename: "IMG_0001".to_string(),
            extension: "jpg".to_string(),
            size,
            modified_ms,
            favorite: false,
            variant: AssetVariant::Original,
            zone: Zone::Primary,
        }
    }

    fn album(id: &str, name: &str, parent: Option<&str>) -> Album {
        Album {
            id: AlbumId::new(id),
            name: name.to_string(),
            kind: AlbumKind::Album,
            parent: parent.map(AlbumId::new),
            assets: BTreeMap::new(),
        }
    }

    #[test]
    fn test_asset_mtime_tolerance() {
        let base = asset("AQ==", 10, 1_000_000);
        assert!(base.content_equal(&asset("AQ==", 10, 1_001_000)));
        assert!(base.content_equal(&asset("AQ==", 10, 999_000)));
        assert!(!base.content_equal(&asset("AQ==", 10, 1_001_001)));
        assert!(!base.content_equal(&asset("AQ==", 11, 1_000_000)));
    }

    #[test]
    fn test_asset_names() {
        let mut a = asset("ab+c/d==", 1, 0);
        assert_eq!(a.file_name(), "ab-c_d.jpg");
        assert_eq!(a.pretty_name(), "IMG_0001.jpg");
        assert_eq!(
            a.relative_path(),
            PathBuf::from("_All-Photos/primary/ab-c_d.jpg")
        );

        a.variant = AssetVariant::Edited;
        a.zone = Zone::Shared;
        assert_eq!(a.pretty_name(), "IMG_0001-edited.jpg");
        assert_eq!(
            a.relative_path(),
            PathBuf::from("_All-Photos/shared/ab-c_d.jpg")
        );
    }

    #[test]
    fn test_stale_asset_never_matches() {
        let remote = asset("AQ==", 10, 1_000_000);
        let mut local = remote.clone();
        local.mark_stale();
        assert!(local.is_stale());
        assert!(!local.content_equal(&remote));
        assert!(!remote.is_stale());
    }

    #[test]
    fn test_favorite_is_not_content() {
        let a = asset("x", 1, 0);
        let mut b = a.clone();
        b.favorite = true;
        assert!(a.content_equal(&b));
    }

    #[test]
    fn test_album_content_equality() {
        let a = album("1", "Trips/2019", None);
        let mut b = a.clone();
        b.assets.insert(AssetId::new("x"), "x.jpg".to_string());
        assert!(a.content_equal(&b), "membership is not content");

        b.parent = Some(AlbumId::new("9"));
        assert!(!a.content_equal(&b));

        let mut c = a.clone();
        c.kind = AlbumKind::Folder;
        assert!(!a.content_equal(&c));
        assert_eq!(a.sanitized_name(), "Trips_2019");
    }

    #[test]
    fn test_degenerate_names_sanitized() {
        assert_eq!(album("1", "", None).sanitized_name(), "_");
        assert_eq!(album("1", "..", None).sanitized_name(), "_..");
    }

    #[test]
    fn test_tree_ancestors_and_depth() {
        let albums: HashMap<_, _> = [
            album("root", "Root", None),
            album("mid", "Mid", Some("root")),
            album("leaf", "Leaf", Some("mid")),
        ]
        .into_iter()
        .map(|a| (a.id.clone(), a))
        .collect();
        let tree = AlbumTree::new(&albums);

        assert_eq!(
            tree.ancestors(&AlbumId::new("leaf")).unwrap(),
            vec![AlbumId::new("mid"), AlbumId::new("root")]
        );
        assert_eq!(tree.depth(&AlbumId::new("root")).unwrap(), 0);

        let leaf = &albums[&AlbumId::new("leaf")];
        let names: Vec<_> = tree
            .lineage(leaf)
            .unwrap()
            .iter()
            .map(|a| a.name.as_str())
            .collect();
        assert_eq!(names, vec!["Root", "Mid"]);
    }

    #[test]
    fn test_tree_cycle_detected() {
        let albums: HashMap<_, _> = [album("a", "A", Some("b")), album("b", "B", Some("a"))]
            .into_iter()
            .map(|a| (a.id.clone(), a))
            .collect();
        let tree = AlbumTree::new(&albums);
        assert!(matches!(
            tree.ancestors(&AlbumId::new("a")),
            Err(LibraryError::TreeCycle { .. })
        ));
    }

    #[test]
    fn test_lineage_for_album_outside_tree() {
        let albums: HashMap<_, _> = [album("root", "Root", None)]
            .into_iter()
            .map(|a| (a.id.clone(), a))
            .collect();
        let tree = AlbumTree::new(&albums);

        let child = album("new", "New", Some("root"));
        let lineage = tree.lineage(&child).unwrap();
        assert_eq!(lineage.len(), 1);
        assert_eq!(lineage[0].id, AlbumId::new("root"));

        let orphan = album("lost", "Lost", Some("missing"));
        assert!(matches!(
            tree.lineage(&orphan),
            Err(LibraryError::OrphanedAlbum { .. })
        ));
    }
}
