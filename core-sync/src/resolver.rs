//! # Hierarchical Resolver
//!
//! Flat diffing misses that deleting a folder takes every album below it
//! off disk, even when those albums are unchanged remotely. The resolver
//! cascades such deletions: a kept album with any ancestor in `to_delete`
//! moves to both `to_delete` (local version) and `to_add` (remote version).
//!
//! Ancestor chains are always walked in the local tree as it was before the
//! diff, and against the delete set the diff produced. Because the full
//! chain is inspected, one pass reaches the fixed point: any album below a
//! cascaded album shares its deleted ancestor.

use crate::diff::ProcessingQueue;
use crate::error::Result;
use core_library::models::{Album, AlbumId, AlbumTree};
use std::collections::HashMap;
use tracing::debug;

/// Cascade ancestor deletions onto kept albums.
///
/// # Errors
///
/// Returns [`LibraryError::TreeCycle`](core_library::LibraryError::TreeCycle)
/// if the local parent chain of a kept album loops.
pub fn resolve_albums(
    queue: ProcessingQueue<Album>,
    local: &HashMap<AlbumId, Album>,
) -> Result<ProcessingQueue<Album>> {
    let tree = AlbumTree::new(local);
    let deleted = queue.delete_ids();

    let ProcessingQueue {
        mut to_delete,
        mut to_add,
        to_keep,
    } = queue;
    let mut kept = Vec::with_capacity(to_keep.len());

    for album in to_keep {
        let ancestors = tree.ancestors(&album.id)?;
        match ancestors.iter().find(|id| deleted.contains(*id)) {
            Some(ancestor) => {
                debug!(album_id = %album.id, ancestor = %ancestor, "Cascading ancestor deletion");
                let previous = local.get(&album.id).cloned().unwrap_or_else(|| album.clone());
                to_delete.push(previous);
                to_add.push(album);
            }
            None => kept.push(album),
        }
    }

    let mut resolved = ProcessingQueue {
        to_delete,
        to_add,
        to_keep: kept,
    };
    resolved.sort();
    Ok(resolved)
}
