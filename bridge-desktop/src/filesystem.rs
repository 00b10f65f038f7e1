//! File System Access Implementation using Tokio

use async_trait::async_trait;
use bridge_traits::{
    error::{BridgeError, Result},
    storage::{FileMetadata, FileSystemAccess},
};
use bytes::Bytes;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::fs;
use tracing::debug;

/// Tokio-based file system implementation
///
/// Async file I/O on the local disk. Symlinks are created as real OS
/// symlinks; timestamps are written through `std::fs::File::set_modified`
/// on the blocking pool.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioFileSystem;

impl TokioFileSystem {
    pub fn new() -> Self {
        Self
    }

    /// Convert std::io::Error to BridgeError
    fn map_io_error(e: std::io::Error) -> BridgeError {
        BridgeError::Io(e)
    }

    fn to_metadata(metadata: std::fs::Metadata) -> FileMetadata {
        FileMetadata {
            size: metadata.len(),
            modified_at_ms: metadata
                .modified()
                .ok()
                .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
                .map(|d| d.as_millis() as i64),
            is_directory: metadata.is_dir(),
            is_symlink: metadata.file_type().is_symlink(),
        }
    }
}

/// Default location of the mirrored library on desktop hosts
pub fn default_library_dir() -> PathBuf {
    dirs::picture_dir()
        .or_else(dirs::data_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join("photo-mirror")
}

#[async_trait]
impl FileSystemAccess for TokioFileSystem {
    async fn exists(&self, path: &Path) -> Result<bool> {
        match fs::symlink_metadata(path).await {
            Ok(_) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(Self::map_io_error(e)),
        }
    }

    async fn metadata(&self, path: &Path) -> Result<FileMetadata> {
        let metadata = fs::metadata(path).await.map_err(Self::map_io_error)?;
        Ok(Self::to_metadata(metadata))
    }

    async fn symlink_metadata(&self, path: &Path) -> Result<FileMetadata> {
        let metadata = fs::symlink_metadata(path)
            .await
            .map_err(Self::map_io_error)?;
        Ok(Self::to_metadata(metadata))
    }

    async fn create_dir_all(&self, path: &Path) -> Result<()> {
        fs::create_dir_all(path)
            .await
            .map_err(Self::map_io_error)?;
        debug!(path = ?path, "Created directory");
        Ok(())
    }

    async fn read_file(&self, path: &Path) -> Result<Bytes> {
        let data = fs::read(path).await.map_err(Self::map_io_error)?;
        debug!(path = ?path, size = data.len(), "Read file");
        Ok(Bytes::from(data))
    }

    async fn write_file(&self, path: &Path, data: Bytes) -> Result<()> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            self.create_dir_all(parent).await?;
        }

        fs::write(path, data.as_ref())
            .await
            .map_err(Self::map_io_error)?;
        debug!(path = ?path, size = data.len(), "Wrote file");
        Ok(())
    }

    async fn delete_file(&self, path: &Path) -> Result<()> {
        fs::remove_file(path).await.map_err(Self::map_io_error)?;
        debug!(path = ?path, "Deleted file");
        Ok(())
    }

    async fn delete_dir_all(&self, path: &Path) -> Result<()> {
        fs::remove_dir_all(path)
            .await
            .map_err(Self::map_io_error)?;
        debug!(path = ?path, "Deleted directory");
        Ok(())
    }

    async fn list_directory(&self, path: &Path) -> Result<Vec<PathBuf>> {
        let mut entries = Vec::new();
        let mut read_dir = fs::read_dir(path).await.map_err(Self::map_io_error)?;

        while let Some(entry) = read_dir
            .next_entry()
            .await
            .map_err(Self::map_io_error)?
        {
            entries.push(entry.path());
        }

        debug!(path = ?path, count = entries.len(), "Listed directory");
        Ok(entries)
    }

    async fn rename(&self, from: &Path, to: &Path) -> Result<()> {
        if let Some(parent) = to.parent() {
            self.create_dir_all(parent).await?;
        }
        fs::rename(from, to).await.map_err(Self::map_io_error)?;
        debug!(from = ?from, to = ?to, "Moved path");
        Ok(())
    }

    async fn copy_file(&self, from: &Path, to: &Path) -> Result<()> {
        let copied = fs::copy(from, to).await.map_err(Self::map_io_error)?;
        debug!(from = ?from, to = ?to, size = copied, "Copied file");
        Ok(())
    }

    async fn symlink(&self, target: &Path, link: &Path) -> Result<()> {
        #[cfg(unix)]
        fs::symlink(target, link)
            .await
            .map_err(Self::map_io_error)?;

        #[cfg(windows)]
        fs::symlink_file(target, link)
            .await
            .map_err(Self::map_io_error)?;

        #[cfg(not(any(unix, windows)))]
        return Err(BridgeError::NotAvailable("symlinks".to_string()));

        debug!(target = ?target, link = ?link, "Created symlink");
        Ok(())
    }

    async fn read_link(&self, path: &Path) -> Result<PathBuf> {
        fs::read_link(path).await.map_err(Self::map_io_error)
    }

    async fn set_modified(&self, path: &Path, modified_at_ms: i64) -> Result<()> {
        let millis = u64::try_from(modified_at_ms).map_err(|_| {
            BridgeError::OperationFailed(format!(
                "Modification time before the Unix epoch: {modified_at_ms}"
            ))
        })?;
        let mtime = SystemTime::UNIX_EPOCH + Duration::from_millis(millis);
        let owned = path.to_path_buf();

        tokio::task::spawn_blocking(move || {
            let file = std::fs::OpenOptions::new().write(true).open(&owned)?;
            file.set_modified(mtime)
        })
        .await
        .map_err(|e| BridgeError::OperationFailed(format!("set_modified task failed: {e}")))?
        .map_err(Self::map_io_error)?;

        debug!(path = ?path, modified_at_ms, "Set modification time");
        Ok(())
    }
}
