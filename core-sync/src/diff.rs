//! # Diff Engine
//!
//! Partitions a local and a remote entity set into the three queues the
//! write pipeline consumes.
//!
//! ```text
//!   local only ─────────────> to_delete
//!   remote only ────────────> to_add
//!   both, content equal ────> to_keep   (remote version)
//!   both, content changed ──> to_delete (local version) + to_add (remote version)
//! ```
//!
//! A changed entity is always delete + add; renames and moves are not
//! patched in place. Every queue is sorted by id.

use core_library::models::Entity;
use std::collections::{HashMap, HashSet};
use tracing::warn;

/// The {delete, add, keep} partition of one entity type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessingQueue<T: Entity> {
    /// Local versions of entities that must go
    pub to_delete: Vec<T>,
    /// Remote versions of entities that must be created
    pub to_add: Vec<T>,
    /// Remote versions of entities that are already in place
    pub to_keep: Vec<T>,
}

impl<T: Entity> Default for ProcessingQueue<T> {
    fn default() -> Self {
        Self {
            to_delete: Vec::new(),
            to_add: Vec::new(),
            to_keep: Vec::new(),
        }
    }
}

impl<T: Entity> ProcessingQueue<T> {
    /// Nothing to write
    pub fn is_noop(&self) -> bool {
        self.to_delete.is_empty() && self.to_add.is_empty()
    }

    pub fn delete_ids(&self) -> HashSet<T::Id> {
        self.to_delete.iter().map(|e| e.id().clone()).collect()
    }

    pub fn add_ids(&self) -> HashSet<T::Id> {
        self.to_add.iter().map(|e| e.id().clone()).collect()
    }

    pub fn keep_ids(&self) -> HashSet<T::Id> {
        self.to_keep.iter().map(|e| e.id().clone()).collect()
    }

    /// Queue sizes as (delete, add, keep)
    pub fn counts(&self) -> (u64, u64, u64) {
        (
            self.to_delete.len() as u64,
            self.to_add.len() as u64,
            self.to_keep.len() as u64,
        )
    }

    pub(crate) fn sort(&mut self) {
        self.to_delete.sort_by(|a, b| a.id().cmp(b.id()));
        self.to_add.sort_by(|a, b| a.id().cmp(b.id()));
        self.to_keep.sort_by(|a, b| a.id().cmp(b.id()));
    }
}

/// Compute the processing queue for `local` against `remote`.
///
/// When `remote` lists the same id twice, the first occurrence wins.
pub fn diff<T: Entity>(
    local: &HashMap<T::Id, T>,
    remote: impl IntoIterator<Item = T>,
) -> ProcessingQueue<T> {
    let mut queue = ProcessingQueue::default();
    let mut seen = HashSet::new();

    for entity in remote {
        if !seen.insert(entity.id().clone()) {
            warn!(id = %entity.id(), "Duplicate remote entity, keeping the first");
            continue;
        }

        match local.get(entity.id()) {
            None => queue.to_add.push(entity),
            Some(existing) if existing.content_equal(&entity) => queue.to_keep.push(entity),
            Some(existing) => {
                queue.to_delete.push(existing.clone());
                queue.to_add.push(entity);
            }
        }
    }

    queue.to_delete.extend(
        local
            .iter()
            .filter(|(id, _)| !seen.contains(*id))
            .map(|(_, entity)| entity.clone()),
    );

    queue.sort();
    queue
}
