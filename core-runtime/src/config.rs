//! # Core Configuration Module
//!
//! Provides configuration management for the photo library mirror.
//!
//! ## Overview
//!
//! The configuration system uses a builder pattern to construct a `CoreConfig`
//! instance holding the library location, the sync tuning knobs and the
//! bridges the core needs. It enforces fail-fast validation so a bad value is
//! reported before any remote call or filesystem write happens.
//!
//! ## Bridges (with platform defaults)
//!
//! - `FileSystemAccess` - File I/O (desktop default: tokio fs)
//! - `LibraryLock` - Process lock (desktop default: PID file in the library root)
//!
//! When the `desktop-shims` feature is enabled the defaults are injected
//! automatically if not provided.
//!
//! ## Usage
//!
//! ```ignore
//! use core_runtime::config::CoreConfig;
//! use std::time::Duration;
//!
//! let config = CoreConfig::builder()
//!     .data_dir("/srv/photos")
//!     .download_concurrency(8)
//!     .run_timeout(Duration::from_secs(1800))
//!     .build()
//!     .expect("Failed to build config");
//! ```
//!
//! ## Error Handling
//!
//! ```should_panic
//! use core_runtime::config::CoreConfig;
//!
//! // The data directory is required
//! let config = CoreConfig::builder()
//!     .download_concurrency(4)
//!     .build()
//!     .expect("Should fail - missing data directory");
//! ```

use crate::error::{Error, Result};
use crate::events::{event_channel, EventSender, EventStream, DEFAULT_EVENT_BUFFER_SIZE};
use bridge_traits::{FileSystemAccess, LibraryLock};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// File name of the PID lock inside the library root.
pub const LOCK_FILE_NAME: &str = ".library.lock";

/// File name of the SQLite index inside the library root.
pub const INDEX_FILE_NAME: &str = ".library.db";

pub const DEFAULT_DOWNLOAD_CONCURRENCY: usize = 4;
pub const MAX_DOWNLOAD_CONCURRENCY: usize = 64;
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_RUN_TIMEOUT: Duration = Duration::from_secs(3600);
pub const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_millis(2000);

/// Core configuration for the photo library mirror.
///
/// Use [`CoreConfigBuilder`] to construct instances.
#[derive(Clone)]
pub struct CoreConfig {
    /// Root directory of the mirrored library
    pub data_dir: PathBuf,

    /// Size of the write worker pool
    pub download_concurrency: usize,

    /// Attempts per sync run before giving up on transient failures
    pub max_attempts: u32,

    /// Upper bound for a whole sync run
    pub run_timeout: Duration,

    /// Base of the linear backoff between attempts (`attempt * base`)
    pub retry_backoff: Duration,

    /// Allow the archive manager to delete non-favorite assets remotely
    pub remote_delete: bool,

    /// Take the library lock even if another (possibly dead) process holds it
    pub force_lock: bool,

    /// Buffer size of the lifecycle event channel
    pub event_buffer_size: usize,

    /// File system access abstraction
    pub file_system: Arc<dyn FileSystemAccess>,

    /// Exclusive library lock
    pub library_lock: Arc<dyn LibraryLock>,
}

impl std::fmt::Debug for CoreConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoreConfig")
            .field("data_dir", &self.data_dir)
            .field("download_concurrency", &self.download_concurrency)
            .field("max_attempts", &self.max_attempts)
            .field("run_timeout", &self.run_timeout)
            .field("retry_backoff", &self.retry_backoff)
            .field("remote_delete", &self.remote_delete)
            .field("force_lock", &self.force_lock)
            .field("event_buffer_size", &self.event_buffer_size)
            .field("file_system", &"FileSystemAccess { ... }")
            .field("library_lock", &"LibraryLock { ... }")
            .finish()
    }
}

impl CoreConfig {
    /// Creates a new builder for constructing a `CoreConfig`.
    pub fn builder() -> CoreConfigBuilder {
        CoreConfigBuilder::default()
    }

    /// Path of the PID lock file; the default lock guards this path
    pub fn lock_path(&self) -> PathBuf {
        lock_path_in(&self.data_dir)
    }

    /// Path of the SQLite index
    pub fn index_path(&self) -> PathBuf {
        self.data_dir.join(INDEX_FILE_NAME)
    }

    /// Lifecycle channel sized by [`CoreConfig::event_buffer_size`]
    pub fn event_channel(&self) -> (EventSender, EventStream) {
        event_channel(self.event_buffer_size)
    }

    /// Validates the configuration and returns an error if invalid.
    pub fn validate(&self) -> Result<()> {
        if self.data_dir.as_os_str().is_empty() {
            return Err(Error::Config("Data directory cannot be empty".to_string()));
        }

        if self.download_concurrency == 0 || self.download_concurrency > MAX_DOWNLOAD_CONCURRENCY {
            return Err(Error::Config(format!(
                "Download concurrency must be between 1 and {MAX_DOWNLOAD_CONCURRENCY}, got {}",
                self.download_concurrency
            )));
        }

        if self.max_attempts == 0 {
            return Err(Error::Config(
                "Max attempts must be at least 1".to_string(),
            ));
        }

        if self.run_timeout.is_zero() {
            return Err(Error::Config(
                "Run timeout must be greater than zero".to_string(),
            ));
        }

        if self.event_buffer_size == 0 {
            return Err(Error::Config(
                "Event buffer size must be greater than zero".to_string(),
            ));
        }

        Ok(())
    }
}

fn lock_path_in(data_dir: &Path) -> PathBuf {
    data_dir.join(LOCK_FILE_NAME)
}

#[cfg(feature = "desktop-shims")]
fn provide_default_file_system() -> Result<Arc<dyn FileSystemAccess>> {
    Ok(Arc::new(bridge_desktop::TokioFileSystem::new()))
}

#[cfg(not(feature = "desktop-shims"))]
fn provide_default_file_system() -> Result<Arc<dyn FileSystemAccess>> {
    Err(Error::CapabilityMissing {
        capability: "FileSystemAccess".to_string(),
        message: "FileSystemAccess implementation is required to write the library. \
                 Desktop: ensure the 'desktop-shims' feature is enabled to use the default TokioFileSystem. \
                 Other hosts: inject a platform-native implementation."
            .to_string(),
    })
}

#[cfg(feature = "desktop-shims")]
fn provide_default_library_lock(data_dir: &Path) -> Result<Arc<dyn LibraryLock>> {
    Ok(Arc::new(bridge_desktop::PidFileLock::new(lock_path_in(
        data_dir,
    ))))
}

#[cfg(not(feature = "desktop-shims"))]
fn provide_default_library_lock(_data_dir: &Path) -> Result<Arc<dyn LibraryLock>> {
    Err(Error::CapabilityMissing {
        capability: "LibraryLock".to_string(),
        message: "LibraryLock implementation is required to guard the library. \
                 Desktop: ensure the 'desktop-shims' feature is enabled to use the default PidFileLock. \
                 Other hosts: inject a platform-native implementation."
            .to_string(),
    })
}

/// Builder for [`CoreConfig`].
#[derive(Default)]
pub struct CoreConfigBuilder {
    data_dir: Option<PathBuf>,
    download_concurrency: Option<usize>,
    max_attempts: Option<u32>,
    run_timeout: Option<Duration>,
    retry_backoff: Option<Duration>,
    remote_delete: bool,
    force_lock: bool,
    event_buffer_size: Option<usize>,
    file_system: Option<Arc<dyn FileSystemAccess>>,
    library_lock: Option<Arc<dyn LibraryLock>>,
}

impl CoreConfigBuilder {
    /// Sets the root directory of the mirrored library (required).
    pub fn data_dir<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.data_dir = Some(path.into());
        self
    }

    /// Sets the write worker pool size (default 4, max 64).
    pub fn download_concurrency(mut self, concurrency: usize) -> Self {
        self.download_concurrency = Some(concurrency);
        self
    }

    /// Sets the number of attempts per run (default 3).
    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = Some(attempts);
        self
    }

    pub fn run_timeout(mut self, timeout: Duration) -> Self {
        self.run_timeout = Some(timeout);
        self
    }

    pub fn retry_backoff(mut self, base: Duration) -> Self {
        self.retry_backoff = Some(base);
        self
    }

    /// Allows confirmed remote deletion of archived assets.
    pub fn remote_delete(mut self, enabled: bool) -> Self {
        self.remote_delete = enabled;
        self
    }

    /// Takes the library lock away from other processes, stale or not.
    pub fn force_lock(mut self, force: bool) -> Self {
        self.force_lock = force;
        self
    }

    pub fn event_buffer_size(mut self, size: usize) -> Self {
        self.event_buffer_size = Some(size);
        self
    }

    /// Injects a file system implementation.
    pub fn file_system(mut self, fs: Arc<dyn FileSystemAccess>) -> Self {
        self.file_system = Some(fs);
        self
    }

    /// Injects a library lock implementation.
    pub fn library_lock(mut self, lock: Arc<dyn LibraryLock>) -> Self {
        self.library_lock = Some(lock);
        self
    }

    /// Builds and validates the configuration.
    pub fn build(self) -> Result<CoreConfig> {
        let data_dir = self.data_dir.ok_or_else(|| {
            Error::Config("Data directory is required. Use .data_dir() to set it.".to_string())
        })?;

        let file_system = match self.file_system {
            Some(fs) => fs,
            None => provide_default_file_system()?,
        };

        let library_lock = match self.library_lock {
            Some(lock) => lock,
            None => provide_default_library_lock(&data_dir)?,
        };

        let config = CoreConfig {
            data_dir,
            download_concurrency: self
                .download_concurrency
                .unwrap_or(DEFAULT_DOWNLOAD_CONCURRENCY),
            max_attempts: self.max_attempts.unwrap_or(DEFAULT_MAX_ATTEMPTS),
            run_timeout: self.run_timeout.unwrap_or(DEFAULT_RUN_TIMEOUT),
            retry_backoff: self.retry_backoff.unwrap_or(DEFAULT_RETRY_BACKOFF),
            remote_delete: self.remote_delete,
            force_lock: self.force_lock,
            event_buffer_size: self
                .event_buffer_size
                .unwrap_or(DEFAULT_EVENT_BUFFER_SIZE),
            file_system,
            library_lock,
        };

        config.validate()?;

        Ok(config)
    }
}
