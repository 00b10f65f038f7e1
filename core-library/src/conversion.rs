//! Remote record conversion
//!
//! Turns the catalog's wire records into library models. Records that
//! cannot be resolved are reported next to the converted entities instead
//! of failing the whole batch.

use crate::error::LibraryError;
use crate::models::{Album, AlbumId, AlbumKind, Asset, AssetId, AssetVariant, MasterRef, Zone};
use bridge_traits::catalog::{RemoteAlbum, RemoteAssetBatch, RemoteMaster, RemoteZone};
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::warn;

/// Raw album type of a regular album.
pub const REMOTE_ALBUM_TYPE_ALBUM: i32 = 0;
/// Raw album type of a folder.
pub const REMOTE_ALBUM_TYPE_FOLDER: i32 = 3;

/// Converted entities plus the records that were skipped.
#[derive(Debug)]
pub struct Converted<T> {
    pub items: Vec<T>,
    pub skipped: Vec<LibraryError>,
}

impl<T> Default for Converted<T> {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            skipped: Vec::new(),
        }
    }
}

impl<T> Converted<T> {
    fn skip(&mut self, error: LibraryError) {
        warn!(error = %error, "Skipping remote record");
        self.skipped.push(error);
    }
}

impl From<RemoteZone> for Zone {
    fn from(zone: RemoteZone) -> Self {
        match zone {
            RemoteZone::Primary => Zone::Primary,
            RemoteZone::Shared => Zone::Shared,
        }
    }
}

/// Pairs asset records with their masters.
///
/// Every resolved record yields an original asset, plus an edited asset when
/// the record carries an edit resource.
pub fn convert_assets(batch: &RemoteAssetBatch) -> Converted<Asset> {
    let masters: HashMap<MasterRef, &RemoteMaster> = batch
        .masters
        .iter()
        .map(|m| (MasterRef(m.record_name.clone()), m))
        .collect();

    let mut converted = Converted::default();
    for record in &batch.assets {
        let master_ref = MasterRef(record.master_ref.clone());
        let Some(master) = masters.get(&master_ref) else {
            converted.skip(LibraryError::UnresolvedReference {
                kind: "master",
                id: master_ref.to_string(),
            });
            continue;
        };

        let original = Asset {
            id: AssetId::new(master.resource.checksum.clone()),
            record_name: record.record_name.clone(),
            filename: master.filename.clone(),
            extension: master.resource.extension.clone(),
            size: master.resource.size,
            modified_ms: record.modified_ms,
            favorite: record.favorite,
            variant: AssetVariant::Original,
            zone: master.zone.into(),
        };

        if let Some(edit) = &record.edited_resource {
            converted.items.push(Asset {
                id: AssetId::new(edit.checksum.clone()),
                extension: edit.extension.clone(),
                size: edit.size,
                variant: AssetVariant::Edited,
                zone: record.zone.into(),
                ..original.clone()
            });
        }
        converted.items.push(original);
    }
    converted
}

/// Converts album records, resolving membership against `assets`.
///
/// Albums of an unknown type are skipped, and so is every album whose parent
/// chain does not resolve within the batch. Member records without a
/// converted asset are dropped from the membership.
pub fn convert_albums(albums: &[RemoteAlbum], assets: &[Asset]) -> Converted<Album> {
    let mut by_record: HashMap<&str, Vec<&Asset>> = HashMap::new();
    for asset in assets {
        by_record.entry(asset.record_name.as_str()).or_default().push(asset);
    }

    let mut converted = Converted::default();
    let mut candidates = Vec::with_capacity(albums.len());
    for remote in albums {
        let kind = match remote.album_type {
            REMOTE_ALBUM_TYPE_ALBUM => AlbumKind::Album,
            REMOTE_ALBUM_TYPE_FOLDER => AlbumKind::Folder,
            other => {
                converted.skip(LibraryError::UnsupportedAlbumType {
                    id: remote.record_name.clone(),
                    album_type: other,
                });
                continue;
            }
        };

        let mut members = BTreeMap::new();
        let mut used_names = HashSet::new();
        for record_name in &remote.asset_records {
            let Some(matches) = by_record.get(record_name.as_str()) else {
                converted.skip(LibraryError::UnresolvedReference {
                    kind: "asset",
                    id: record_name.clone(),
                });
                continue;
            };
            for asset in matches {
                let name = unique_link_name(&mut used_names, asset);
                members.insert(asset.id.clone(), name);
            }
        }

        candidates.push(Album {
            id: AlbumId::new(remote.record_name.clone()),
            name: remote.name.clone(),
            kind,
            parent: remote.parent_id.clone().map(AlbumId::new),
            assets: members,
        });
    }

    // Drop albums whose parent is gone, repeating until the set is closed.
    loop {
        let ids: HashSet<AlbumId> = candidates.iter().map(|a| a.id.clone()).collect();
        let (kept, orphaned): (Vec<Album>, Vec<Album>) = candidates
            .into_iter()
            .partition(|a| a.parent.as_ref().map_or(true, |p| ids.contains(p)));
        candidates = kept;
        if orphaned.is_empty() {
            break;
        }
        for album in orphaned {
            converted.skip(LibraryError::OrphanedAlbum {
                album_id: album.id.to_string(),
                parent_id: album.parent.map(|p| p.to_string()).unwrap_or_default(),
            });
        }
    }

    // Every parent now resolves, so an album that never reaches a root is
    // on a cycle or below one.
    let mut rooted: HashSet<AlbumId> = HashSet::new();
    loop {
        let before = rooted.len();
        for album in &candidates {
            if album.parent.as_ref().map_or(true, |p| rooted.contains(p)) {
                rooted.insert(album.id.clone());
            }
        }
        if rooted.len() == before {
            break;
        }
    }
    let (kept, cyclic): (Vec<Album>, Vec<Album>) = candidates
        .into_iter()
        .partition(|a| rooted.contains(&a.id));
    for album in cyclic {
        converted.skip(LibraryError::TreeCycle {
            album_id: album.id.to_string(),
        });
    }

    converted.items = kept;
    converted
}

fn unique_link_name(used: &mut HashSet<String>, asset: &Asset) -> String {
    let pretty = asset.pretty_name();
    if used.insert(pretty.clone()) {
        return pretty;
    }

    let (stem, ext) = match pretty.rsplit_once('.') {
        Some((stem, ext)) => (stem.to_string(), format!(".{ext}")),
        None => (pretty.clone(), String::new()),
    };
    let mut n = 1;
    loop {
        let candidate = format!("{stem}-{n}{ext}");
        if used.insert(candidate.clone()) {
            return candidate;
        }
        n += 1;
    }
}
