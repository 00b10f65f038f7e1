//! Library index repository
//!
//! Persists the local snapshot (assets and albums keyed by their stable id),
//! the generation counter, the schema tag, and the archive stash.

use crate::error::{LibraryError, Result};
use crate::models::{Album, AlbumId, Asset, AssetId, LibrarySnapshot, StashEntry};
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use sqlx::{FromRow, SqlitePool};
use std::path::{Path, PathBuf};
use tracing::{debug, instrument};

/// Schema version this build reads and writes.
pub const LIBRARY_SCHEMA_VERSION: u32 = 1;

const KIND_ASSET: &str = "asset";
const KIND_ALBUM: &str = "album";

// ============================================================================
// Repository Trait
// ============================================================================

/// Persistent index of the mirrored library
///
/// Every write is issued only after the corresponding filesystem effect
/// succeeded, so the index never describes a file that was not written.
#[async_trait]
pub trait LibraryIndex: Send + Sync {
    /// Verify the stored schema tag matches [`LIBRARY_SCHEMA_VERSION`]
    ///
    /// # Errors
    ///
    /// Returns [`LibraryError::SchemaMismatch`] when the tag is missing or differs
    async fn check_schema(&self) -> Result<()>;

    /// Load every live asset and album
    async fn load_snapshot(&self) -> Result<LibrarySnapshot>;

    async fn upsert_asset(&self, asset: &Asset) -> Result<()>;

    /// Returns `true` if a row was removed
    async fn remove_asset(&self, id: &AssetId) -> Result<bool>;

    /// Insert or replace an album, recording its visible path
    async fn upsert_album(&self, album: &Album, relative_path: &Path) -> Result<()>;

    /// Returns `true` if a row was removed
    async fn remove_album(&self, id: &AlbumId) -> Result<bool>;

    async fn generation(&self) -> Result<u64>;

    /// Increment the generation counter and return the new value
    async fn bump_generation(&self) -> Result<u64>;

    /// Move a live album into the stash in one transaction
    ///
    /// # Errors
    ///
    /// Returns [`LibraryError::NotFound`] if the album is not live
    async fn stash_album(&self, entry: &StashEntry) -> Result<()>;

    /// Move a stashed album back into the live set in one transaction
    ///
    /// `album` is written as the live row, so a parent adjusted by the
    /// caller lands together with the stash removal.
    ///
    /// # Errors
    ///
    /// Returns [`LibraryError::NotFound`] if the album is not stashed
    async fn restore_stashed(&self, album: &Album, relative_path: &Path) -> Result<StashEntry>;

    /// Drop a stash entry without restoring it
    async fn release_stash(&self, id: &AlbumId) -> Result<bool>;

    async fn stash_entry(&self, id: &AlbumId) -> Result<Option<StashEntry>>;

    async fn list_stash(&self) -> Result<Vec<StashEntry>>;
}

// ============================================================================
// SQLite Implementation
// ============================================================================

/// SQLite-backed [`LibraryIndex`]
pub struct SqliteLibraryIndex {
    pool: SqlitePool,
}

impl SqliteLibraryIndex {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn upsert_entity(
        &self,
        kind: &str,
        id: &str,
        attributes: String,
        relative_path: &Path,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO library_entities (id, entity_kind, attributes, relative_path, updated_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT (entity_kind, id) DO UPDATE SET
                attributes = excluded.attributes,
                relative_path = excluded.relative_path,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(id)
        .bind(kind)
        .bind(attributes)
        .bind(path_to_string(relative_path))
        .bind(Utc::now().timestamp())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn remove_entity(&self, kind: &str, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM library_entities WHERE entity_kind = ? AND id = ?")
            .bind(kind)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[derive(Debug, FromRow)]
struct EntityRow {
    id: String,
    entity_kind: String,
    attributes: String,
}

#[derive(Debug, FromRow)]
struct StashRow {
    album_id: String,
    original_path: String,
    album: String,
    assets: String,
    archived_at: i64,
}

impl TryFrom<StashRow> for StashEntry {
    type Error = LibraryError;

    fn try_from(row: StashRow) -> Result<Self> {
        let album: Album = decode(&row.album_id, &row.album)?;
        let assets: Vec<Asset> = decode(&row.album_id, &row.assets)?;
        let archived_at = Utc
            .timestamp_opt(row.archived_at, 0)
            .single()
            .ok_or_else(|| LibraryError::CorruptIndex {
                id: row.album_id.clone(),
                reason: format!("invalid archived_at {}", row.archived_at),
            })?;

        Ok(StashEntry {
            album,
            assets,
            original_path: PathBuf::from(row.original_path),
            archived_at,
        })
    }
}

fn decode<T: serde::de::DeserializeOwned>(id: &str, json: &str) -> Result<T> {
    serde_json::from_str(json).map_err(|e| LibraryError::CorruptIndex {
        id: id.to_string(),
        reason: e.to_string(),
    })
}

fn encode<T: serde::Serialize>(id: &str, value: &T) -> Result<String> {
    serde_json::to_string(value).map_err(|e| LibraryError::InvalidInput {
        field: id.to_string(),
        message: e.to_string(),
    })
}

fn path_to_string(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

#[async_trait]
impl LibraryIndex for SqliteLibraryIndex {
    async fn check_schema(&self) -> Result<()> {
        let found: Option<(String,)> =
            sqlx::query_as("SELECT value FROM library_meta WHERE key = 'schema_version'")
                .fetch_optional(&self.pool)
                .await?;
        let found = found.map(|(value,)| value);

        match found.as_deref().map(str::parse::<u32>) {
            Some(Ok(version)) if version == LIBRARY_SCHEMA_VERSION => Ok(()),
            _ => Err(LibraryError::SchemaMismatch {
                expected: LIBRARY_SCHEMA_VERSION,
                found,
            }),
        }
    }

    #[instrument(skip(self))]
    async fn load_snapshot(&self) -> Result<LibrarySnapshot> {
        let rows: Vec<EntityRow> =
            sqlx::query_as("SELECT id, entity_kind, attributes FROM library_entities")
                .fetch_all(&self.pool)
                .await?;

        let mut snapshot = LibrarySnapshot {
            generation: self.generation().await?,
            ..LibrarySnapshot::default()
        };
        for row in rows {
            match row.entity_kind.as_str() {
                KIND_ASSET => {
                    let asset: Asset = decode(&row.id, &row.attributes)?;
                    snapshot.assets.insert(asset.id.clone(), asset);
                }
                KIND_ALBUM => {
                    let album: Album = decode(&row.id, &row.attributes)?;
                    snapshot.albums.insert(album.id.clone(), album);
                }
                other => {
                    return Err(LibraryError::CorruptIndex {
                        id: row.id,
                        reason: format!("unknown entity kind {other}"),
                    })
                }
            }
        }

        debug!(
            assets = snapshot.assets.len(),
            albums = snapshot.albums.len(),
            generation = snapshot.generation,
            "Loaded library snapshot"
        );
        Ok(snapshot)
    }

    async fn upsert_asset(&self, asset: &Asset) -> Result<()> {
        let attributes = encode(asset.id.as_str(), asset)?;
        self.upsert_entity(KIND_ASSET, asset.id.as_str(), attributes, &asset.relative_path())
            .await
    }

    async fn remove_asset(&self, id: &AssetId) -> Result<bool> {
        self.remove_entity(KIND_ASSET, id.as_str()).await
    }

    async fn upsert_album(&self, album: &Album, relative_path: &Path) -> Result<()> {
        let attributes = encode(album.id.as_str(), album)?;
        self.upsert_entity(KIND_ALBUM, album.id.as_str(), attributes, relative_path)
            .await
    }

    async fn remove_album(&self, id: &AlbumId) -> Result<bool> {
        self.remove_entity(KIND_ALBUM, id.as_str()).await
    }

    async fn generation(&self) -> Result<u64> {
        let (value,): (String,) =
            sqlx::query_as("SELECT value FROM library_meta WHERE key = 'generation'")
                .fetch_one(&self.pool)
                .await?;
        value.parse().map_err(|_| LibraryError::CorruptIndex {
            id: "generation".to_string(),
            reason: format!("not a number: {value}"),
        })
    }

    async fn bump_generation(&self) -> Result<u64> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "UPDATE library_meta SET value = CAST(CAST(value AS INTEGER) + 1 AS TEXT) \
             WHERE key = 'generation'",
        )
        .execute(&mut *tx)
        .await?;
        let (value,): (String,) =
            sqlx::query_as("SELECT value FROM library_meta WHERE key = 'generation'")
                .fetch_one(&mut *tx)
                .await?;
        tx.commit().await?;

        value.parse().map_err(|_| LibraryError::CorruptIndex {
            id: "generation".to_string(),
            reason: format!("not a number: {value}"),
        })
    }

    #[instrument(skip(self, entry), fields(album_id = %entry.album.id))]
    async fn stash_album(&self, entry: &StashEntry) -> Result<()> {
        let id = entry.album.id.as_str();
        let album = encode(id, &entry.album)?;
        let assets = encode(id, &entry.assets)?;

        let mut tx = self.pool.begin().await?;
        let removed = sqlx::query("DELETE FROM library_entities WHERE entity_kind = ? AND id = ?")
            .bind(KIND_ALBUM)
            .bind(id)
            .execute(&mut *tx)
            .await?;
        if removed.rows_affected() == 0 {
            return Err(LibraryError::NotFound {
                entity_type: "album".to_string(),
                id: id.to_string(),
            });
        }

        sqlx::query(
            r#"
            INSERT INTO archive_stash (album_id, original_path, album, assets, archived_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(id)
        .bind(path_to_string(&entry.original_path))
        .bind(album)
        .bind(assets)
        .bind(entry.archived_at.timestamp())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        debug!("Album moved to stash");
        Ok(())
    }

    #[instrument(skip(self, album), fields(album_id = %album.id))]
    async fn restore_stashed(&self, album: &Album, relative_path: &Path) -> Result<StashEntry> {
        let id = &album.id;
        let mut tx = self.pool.begin().await?;
        let row: Option<StashRow> = sqlx::query_as(
            "SELECT album_id, original_path, album, assets, archived_at \
             FROM archive_stash WHERE album_id = ?",
        )
        .bind(id.as_str())
        .fetch_optional(&mut *tx)
        .await?;
        let entry = StashEntry::try_from(row.ok_or_else(|| LibraryError::NotFound {
            entity_type: "stashed album".to_string(),
            id: id.to_string(),
        })?)?;

        sqlx::query("DELETE FROM archive_stash WHERE album_id = ?")
            .bind(id.as_str())
            .execute(&mut *tx)
            .await?;
        sqlx::query(
            r#"
            INSERT INTO library_entities (id, entity_kind, attributes, relative_path, updated_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(id.as_str())
        .bind(KIND_ALBUM)
        .bind(encode(id.as_str(), album)?)
        .bind(path_to_string(relative_path))
        .bind(Utc::now().timestamp())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        debug!("Album restored from stash");
        Ok(entry)
    }

    async fn release_stash(&self, id: &AlbumId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM archive_stash WHERE album_id = ?")
            .bind(id.as_str())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn stash_entry(&self, id: &AlbumId) -> Result<Option<StashEntry>> {
        let row: Option<StashRow> = sqlx::query_as(
            "SELECT album_id, original_path, album, assets, archived_at \
             FROM archive_stash WHERE album_id = ?",
        )
        .bind(id.as_str())
        .fetch_optional(&self.pool)
        .await?;
        row.map(StashEntry::try_from).transpose()
    }

    async fn list_stash(&self) -> Result<Vec<StashEntry>> {
        let rows: Vec<StashRow> = sqlx::query_as(
            "SELECT album_id, original_path, album, assets, archived_at \
             FROM archive_stash ORDER BY archived_at, album_id",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(StashEntry::try_from).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::create_test_pool;
    use crate::models::{AlbumKind, AssetVariant, Zone};
    use std::collections::BTreeMap;

    async fn index() -> SqliteLibraryIndex {
        SqliteLibraryIndex::new(create_test_pool().await.unwrap())
    }

    fn asset(id: &str) -> Asset {
        Asset {
            id: AssetId::new(id),
            record_name: format!("rec-{id}"),
            filename: format!("IMG_{id}"),
            extension: "jpg".to_string(),
            size: 42,
            modified_ms: 1_700_000_000_000,
            favorite: false,
            variant: AssetVariant::Original,
            zone: Zone::Primary,
        }
    }

    fn album(id: &str, members: &[&str]) -> Album {
        Album {
            id: AlbumId::new(id),
            name: format!("Album {id}"),
            kind: AlbumKind::Album,
            parent: None,
            assets: members
                .iter()
                .map(|m| (AssetId::new(*m), format!("IMG_{m}.jpg")))
                .collect::<BTreeMap<_, _>>(),
        }
    }

    #[tokio::test]
    async fn test_schema_check() {
        let index = index().await;
        index.check_schema().await.unwrap();

        sqlx::query("UPDATE library_meta SET value = '99' WHERE key = 'schema_version'")
            .execute(index.pool())
            .await
            .unwrap();
        let err = index.check_schema().await.unwrap_err();
        assert!(matches!(
            err,
            LibraryError::SchemaMismatch { expected: 1, ref found } if found.as_deref() == Some("99")
        ));
        assert!(err.is_corruption());
    }

    #[tokio::test]
    async fn test_snapshot_roundtrip() {
        let index = index().await;
        index.upsert_asset(&asset("a")).await.unwrap();
        index.upsert_asset(&asset("b")).await.unwrap();
        index
            .upsert_album(&album("x", &["a"]), Path::new("Album x"))
            .await
            .unwrap();

        let snapshot = index.load_snapshot().await.unwrap();
        assert_eq!(snapshot.assets.len(), 2);
        assert_eq!(snapshot.albums[&AlbumId::new("x")], album("x", &["a"]));

        assert!(index.remove_asset(&AssetId::new("a")).await.unwrap());
        assert!(!index.remove_asset(&AssetId::new("a")).await.unwrap());
        assert!(index.remove_album(&AlbumId::new("x")).await.unwrap());

        let snapshot = index.load_snapshot().await.unwrap();
        assert_eq!(snapshot.assets.len(), 1);
        assert!(snapshot.albums.is_empty());
    }

    #[tokio::test]
    async fn test_upsert_replaces_attributes() {
        let index = index().await;
        let mut a = asset("a");
        index.upsert_asset(&a).await.unwrap();
        a.size = 99;
        index.upsert_asset(&a).await.unwrap();

        let snapshot = index.load_snapshot().await.unwrap();
        assert_eq!(snapshot.assets[&AssetId::new("a")].size, 99);
    }

    #[tokio::test]
    async fn test_generation_is_monotonic() {
        let index = index().await;
        assert_eq!(index.generation().await.unwrap(), 0);
        assert_eq!(index.bump_generation().await.unwrap(), 1);
        assert_eq!(index.bump_generation().await.unwrap(), 2);
        assert_eq!(index.load_snapshot().await.unwrap().generation, 2);
    }

    #[tokio::test]
    async fn test_stash_and_restore() {
        let index = index().await;
        let live = album("x", &["a"]);
        index.upsert_album(&live, Path::new("Trips")).await.unwrap();

        let mut archived = live.clone();
        archived.kind = AlbumKind::Archived;
        let entry = StashEntry {
            album: archived,
            assets: vec![asset("a")],
            original_path: PathBuf::from("Trips"),
            archived_at: Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
        };
        index.stash_album(&entry).await.unwrap();

        assert!(index.load_snapshot().await.unwrap().albums.is_empty());
        assert_eq!(index.list_stash().await.unwrap(), vec![entry.clone()]);
        assert_eq!(
            index.stash_entry(&AlbumId::new("x")).await.unwrap(),
            Some(entry.clone())
        );

        let restored = index.restore_stashed(&live, Path::new("Trips")).await.unwrap();
        assert_eq!(restored, entry);
        assert!(index.list_stash().await.unwrap().is_empty());
        assert_eq!(
            index.load_snapshot().await.unwrap().albums[&AlbumId::new("x")],
            live
        );
    }

    #[tokio::test]
    async fn test_restore_writes_adjusted_album() {
        let index = index().await;
        let mut live = album("x", &["a"]);
        live.parent = Some(AlbumId::new("trips"));
        index.upsert_album(&live, Path::new("Trips/X")).await.unwrap();

        let mut archived = live.clone();
        archived.kind = AlbumKind::Archived;
        let entry = StashEntry {
            album: archived,
            assets: vec![asset("a")],
            original_path: PathBuf::from("Trips/X"),
            archived_at: Utc::now(),
        };
        index.stash_album(&entry).await.unwrap();

        let mut rooted = live.clone();
        rooted.parent = None;
        let restored = index.restore_stashed(&rooted, Path::new("X")).await.unwrap();

        assert_eq!(restored.album.parent, Some(AlbumId::new("trips")));
        let snapshot = index.load_snapshot().await.unwrap();
        assert_eq!(snapshot.albums[&AlbumId::new("x")].parent, None);
        assert_eq!(snapshot.albums[&AlbumId::new("x")].kind, AlbumKind::Album);
    }

    #[tokio::test]
    async fn test_restore_requires_stash_entry() {
        let index = index().await;
        let err = index
            .restore_stashed(&album("x", &[]), Path::new("X"))
            .await
            .unwrap_err();
        assert!(matches!(err, LibraryError::NotFound { .. }));
        assert!(index.load_snapshot().await.unwrap().albums.is_empty());
    }

    #[tokio::test]
    async fn test_stash_requires_live_album() {
        let index = index().await;
        let entry = StashEntry {
            album: album("ghost", &[]),
            assets: Vec::new(),
            original_path: PathBuf::from("Ghost"),
            archived_at: Utc::now(),
        };
        let err = index.stash_album(&entry).await.unwrap_err();
        assert!(matches!(err, LibraryError::NotFound { .. }));
        assert!(index.list_stash().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_release_stash() {
        let index = index().await;
        index.upsert_album(&album("x", &[]), Path::new("X")).await.unwrap();
        let entry = StashEntry {
            album: album("x", &[]),
            assets: Vec::new(),
            original_path: PathBuf::from("X"),
            archived_at: Utc::now(),
        };
        index.stash_album(&entry).await.unwrap();

        assert!(index.release_stash(&AlbumId::new("x")).await.unwrap());
        assert!(!index.release_stash(&AlbumId::new("x")).await.unwrap());
        assert!(index.load_snapshot().await.unwrap().albums.is_empty());
    }
}
