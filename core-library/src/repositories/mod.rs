//! # Repository Pattern Implementation
//!
//! Traits define the persistence interface; SQLite implementations use sqlx
//! for async database access. The library has a single repository, the
//! index of mirrored entities and archived albums.

pub mod index;

pub use index::{LibraryIndex, SqliteLibraryIndex, LIBRARY_SCHEMA_VERSION};
