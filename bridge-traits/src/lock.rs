//! Library Lock Abstraction
//!
//! A sync run or archive operation holds an exclusive lock on the library so
//! two processes never mutate the same tree.

use async_trait::async_trait;

use crate::error::Result;

/// Observed state of the library lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockStatus {
    /// Nobody holds the lock.
    Free,
    /// The current process holds the lock.
    HeldByUs,
    /// Another live process holds the lock.
    HeldByOther { pid: u32 },
    /// The lock names a process that no longer exists.
    Stale { pid: u32 },
}

/// Exclusive library lock
///
/// Stale locks are reported but never cleared implicitly: only a forced
/// acquire or release removes a lock owned by another PID.
#[async_trait]
pub trait LibraryLock: Send + Sync {
    /// Inspect the lock without changing it
    async fn status(&self) -> Result<LockStatus>;

    /// Take the lock for the current process
    ///
    /// Fails with [`BridgeError::Locked`](crate::error::BridgeError::Locked)
    /// when another PID holds it, live or stale, unless `force` is set.
    async fn acquire(&self, force: bool) -> Result<()>;

    /// Give the lock up
    ///
    /// Releasing a lock owned by another PID requires `force`.
    async fn release(&self, force: bool) -> Result<()>;
}
