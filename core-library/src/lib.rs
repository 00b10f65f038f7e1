//! # Library Module
//!
//! Owns the local side of the mirror: the entity model, the persisted
//! index, the on-disk layout and every filesystem effect applied to it.
//!
//! ## Overview
//!
//! - [`models`]: assets, albums, the album tree and the local snapshot
//! - [`conversion`]: remote catalog records to library models
//! - [`db`] and [`repositories`]: SQLite index with embedded migrations
//! - [`layout`] and [`library`]: path arithmetic and filesystem mutations

pub mod conversion;
pub mod db;
pub mod error;
pub mod layout;
pub mod library;
pub mod models;
pub mod repositories;

pub use error::{LibraryError, Result};
pub use layout::LibraryLayout;
pub use library::{LocalLibrary, PersistedFile};
pub use models::{
    Album, AlbumId, AlbumKind, AlbumTree, Asset, AssetId, AssetVariant, Entity, LibrarySnapshot,
    StashEntry, Zone,
};
pub use repositories::{LibraryIndex, SqliteLibraryIndex, LIBRARY_SCHEMA_VERSION};
