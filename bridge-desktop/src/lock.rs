//! PID-file library lock

use async_trait::async_trait;
use bridge_traits::{
    error::{BridgeError, Result},
    lock::{LibraryLock, LockStatus},
};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

/// Lock file holding the PID of the owning process.
///
/// A lock left behind by a dead process is reported as
/// [`LockStatus::Stale`] and only removed by a forced acquire or release.
#[derive(Debug, Clone)]
pub struct PidFileLock {
    path: PathBuf,
    pid: u32,
}

impl PidFileLock {
    /// Lock owned by the current process
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self::with_pid(path, std::process::id())
    }

    /// Lock owned by an explicit PID
    pub fn with_pid(path: impl Into<PathBuf>, pid: u32) -> Self {
        Self {
            path: path.into(),
            pid,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_owner(&self) -> Result<Option<u32>> {
        match fs::read_to_string(&self.path).await {
            // An unreadable PID cannot name a live process.
            Ok(content) => Ok(Some(content.trim().parse::<u32>().unwrap_or(0))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(BridgeError::Io(e)),
        }
    }

    async fn write_pid(&self, exclusive: bool) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let mut options = fs::OpenOptions::new();
        options.write(true);
        if exclusive {
            options.create_new(true);
        } else {
            options.create(true).truncate(true);
        }

        let mut file = match options.open(&self.path).await {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                let pid = self.read_owner().await?.unwrap_or(0);
                return Err(BridgeError::Locked {
                    pid,
                    stale: !process_alive(pid),
                });
            }
            Err(e) => return Err(BridgeError::Io(e)),
        };
        file.write_all(self.pid.to_string().as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }
}

#[cfg(target_os = "linux")]
fn process_alive(pid: u32) -> bool {
    pid != 0 && Path::new("/proc").join(pid.to_string()).exists()
}

// Without a cheap liveness probe every foreign PID counts as live.
#[cfg(not(target_os = "linux"))]
fn process_alive(pid: u32) -> bool {
    pid != 0
}

#[async_trait]
impl LibraryLock for PidFileLock {
    async fn status(&self) -> Result<LockStatus> {
        let status = match self.read_owner().await? {
            None => LockStatus::Free,
            Some(pid) if pid == self.pid => LockStatus::HeldByUs,
            Some(pid) if process_alive(pid) => LockStatus::HeldByOther { pid },
            Some(pid) => LockStatus::Stale { pid },
        };
        Ok(status)
    }

    async fn acquire(&self, force: bool) -> Result<()> {
        match self.status().await? {
            LockStatus::Free => self.write_pid(true).await?,
            LockStatus::HeldByUs => {}
            LockStatus::HeldByOther { pid } | LockStatus::Stale { pid } if force => {
                warn!(pid, path = ?self.path, "Forcing library lock away from another process");
                self.write_pid(false).await?;
            }
            LockStatus::HeldByOther { pid } => {
                return Err(BridgeError::Locked { pid, stale: false })
            }
            LockStatus::Stale { pid } => return Err(BridgeError::Locked { pid, stale: true }),
        }
        info!(pid = self.pid, path = ?self.path, "Acquired library lock");
        Ok(())
    }

    async fn release(&self, force: bool) -> Result<()> {
        match self.status().await? {
            LockStatus::Free => {
                debug!(path = ?self.path, "Library lock already free");
                return Ok(());
            }
            LockStatus::HeldByUs => {}
            LockStatus::HeldByOther { pid } | LockStatus::Stale { pid } if !force => {
                return Err(BridgeError::Locked {
                    pid,
                    stale: !process_alive(pid),
                });
            }
            LockStatus::HeldByOther { .. } | LockStatus::Stale { .. } => {
                warn!(path = ?self.path, "Forcing release of a foreign library lock");
            }
        }
        fs::remove_file(&self.path).await?;
        info!(pid = self.pid, path = ?self.path, "Released library lock");
        Ok(())
    }
}
