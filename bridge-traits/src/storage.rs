//! Storage and File System Abstractions
//!
//! Provides a platform-agnostic trait for the file operations the library
//! mirror needs: plain file I/O plus the symlink and timestamp primitives
//! used by the album layout.

use async_trait::async_trait;
use bytes::Bytes;
use std::path::{Path, PathBuf};

use crate::error::Result;

/// File metadata information
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileMetadata {
    pub size: u64,
    /// Modification time in milliseconds since the Unix epoch.
    pub modified_at_ms: Option<i64>,
    pub is_directory: bool,
    pub is_symlink: bool,
}

/// File system access trait
///
/// Abstracts file I/O operations so the library writer can run against the
/// real disk on desktop hosts and against in-memory fakes in tests.
///
/// # Example
///
/// ```ignore
/// use bridge_traits::storage::FileSystemAccess;
///
/// async fn place(fs: &dyn FileSystemAccess, dir: &Path, data: Bytes) -> Result<()> {
///     fs.create_dir_all(dir).await?;
///     fs.write_file(&dir.join("asset.jpg"), data).await?;
///     fs.symlink(Path::new("asset.jpg"), &dir.join("Pretty.jpg")).await
/// }
/// ```
#[async_trait]
pub trait FileSystemAccess: Send + Sync {
    /// Check if a file, directory or symlink exists (symlinks are not followed)
    async fn exists(&self, path: &Path) -> Result<bool>;

    /// Get metadata for a file or directory, following symlinks
    async fn metadata(&self, path: &Path) -> Result<FileMetadata>;

    /// Get metadata for the path itself without following symlinks
    async fn symlink_metadata(&self, path: &Path) -> Result<FileMetadata>;

    /// Create a directory and all parent directories if they don't exist
    async fn create_dir_all(&self, path: &Path) -> Result<()>;

    /// Read entire file contents into memory
    async fn read_file(&self, path: &Path) -> Result<Bytes>;

    /// Write data to a file, creating it if it doesn't exist
    async fn write_file(&self, path: &Path, data: Bytes) -> Result<()>;

    /// Delete a file or symlink
    async fn delete_file(&self, path: &Path) -> Result<()>;

    /// Delete a directory and all its contents
    async fn delete_dir_all(&self, path: &Path) -> Result<()>;

    /// List all entries in a directory
    async fn list_directory(&self, path: &Path) -> Result<Vec<PathBuf>>;

    /// Atomically move a file or directory
    async fn rename(&self, from: &Path, to: &Path) -> Result<()>;

    /// Copy file contents from `from` to `to`, following symlinks on `from`
    async fn copy_file(&self, from: &Path, to: &Path) -> Result<()>;

    /// Create a symlink at `link` pointing to `target`
    ///
    /// `target` is stored verbatim, so relative targets are resolved against
    /// the directory containing `link`.
    async fn symlink(&self, target: &Path, link: &Path) -> Result<()>;

    /// Read the target of a symlink
    async fn read_link(&self, path: &Path) -> Result<PathBuf>;

    /// Set the modification time (milliseconds since the Unix epoch)
    async fn set_modified(&self, path: &Path, modified_at_ms: i64) -> Result<()>;
}
