//! # Retry Orchestrator
//!
//! Runs a complete sync: takes the library lock, checks the index schema,
//! and drives engine attempts until one completes or the failure is not
//! worth retrying.
//!
//! ## Workflow
//!
//! 1. Acquire the library lock (forced only when configured)
//! 2. Verify the index schema tag
//! 3. Run attempts; between attempts wait `attempt * backoff` and refresh
//!    the remote session
//! 4. Classify the result, emit `Done` or `Error`, release the lock
//!
//! The run timeout cancels the attempt's token. Scheduling of new writes
//! stops, in-flight writes drain, and the run ends as interrupted.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use core_sync::SyncOrchestrator;
//!
//! let orchestrator = SyncOrchestrator::open(config, catalog, events).await?;
//! let report = orchestrator.run().await;
//! if !report.outcome.is_success() {
//!     eprintln!("sync ended with {:?}", report.outcome);
//! }
//! ```

use crate::engine::SyncEngine;
use crate::error::{ErrorClass, Result, SyncError};
use crate::run::{RunOutcome, SyncReport, SyncRunId, WriteReport};
use bridge_traits::catalog::RemoteCatalog;
use bridge_traits::error::BridgeError;
use bridge_traits::lock::LibraryLock;
use core_library::db::{create_pool, DatabaseConfig};
use core_library::{LibraryIndex, LibraryLayout, LocalLibrary, SqliteLibraryIndex};
use core_runtime::config::CoreConfig;
use core_runtime::events::{EventSender, SyncEvent};
use std::sync::Arc;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

/// Take the library lock, mapping a foreign holder to [`SyncError::LockHeld`].
pub(crate) async fn acquire_lock(lock: &dyn LibraryLock, force: bool) -> Result<()> {
    match lock.acquire(force).await {
        Ok(()) => Ok(()),
        Err(BridgeError::Locked { pid, stale }) => Err(SyncError::LockHeld { pid, stale }),
        Err(e) => Err(e.into()),
    }
}

pub(crate) async fn release_lock(lock: &dyn LibraryLock) {
    if let Err(e) = lock.release(false).await {
        warn!(error = %e, "Failed to release library lock");
    }
}

/// Open the SQLite index under the library root.
pub async fn open_index(config: &CoreConfig) -> Result<Arc<SqliteLibraryIndex>> {
    config.file_system.create_dir_all(&config.data_dir).await?;
    let pool = create_pool(DatabaseConfig::new(config.index_path())).await?;
    Ok(Arc::new(SqliteLibraryIndex::new(pool)))
}

/// Drives complete sync runs with lock, schema check and retries
pub struct SyncOrchestrator {
    config: CoreConfig,
    engine: SyncEngine,
    index: Arc<dyn LibraryIndex>,
    catalog: Arc<dyn RemoteCatalog>,
    events: EventSender,
}

impl SyncOrchestrator {
    pub fn new(
        config: CoreConfig,
        index: Arc<dyn LibraryIndex>,
        catalog: Arc<dyn RemoteCatalog>,
        events: EventSender,
    ) -> Self {
        let library = LocalLibrary::new(
            Arc::clone(&config.file_system),
            LibraryLayout::new(config.data_dir.clone()),
        );
        let engine = SyncEngine::new(
            library,
            Arc::clone(&index),
            Arc::clone(&catalog),
            events.clone(),
            config.download_concurrency,
        );
        Self {
            config,
            engine,
            index,
            catalog,
            events,
        }
    }

    /// Build an orchestrator over the SQLite index inside the data directory.
    pub async fn open(
        config: CoreConfig,
        catalog: Arc<dyn RemoteCatalog>,
        events: EventSender,
    ) -> Result<Self> {
        let index = open_index(&config).await?;
        Ok(Self::new(config, index, catalog, events))
    }

    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    /// Run a complete sync with a fresh cancellation token.
    pub async fn run(&self) -> SyncReport {
        self.run_with_cancel(CancellationToken::new()).await
    }

    /// Run a complete sync; cancelling `cancel` interrupts it gracefully.
    #[instrument(skip(self, cancel))]
    pub async fn run_with_cancel(&self, cancel: CancellationToken) -> SyncReport {
        let run_id = SyncRunId::new();
        info!(run_id = %run_id, "Starting sync run");
        self.events.sync(SyncEvent::Started {
            run_id: run_id.to_string(),
        });

        let lock = self.config.library_lock.as_ref();
        let (attempts, outcome, write) = match acquire_lock(lock, self.config.force_lock).await {
            Ok(()) => {
                let result = self.run_locked(&cancel).await;
                release_lock(lock).await;
                result
            }
            Err(e) => (0, aborted(&e), None),
        };

        match &outcome {
            RunOutcome::Success | RunOutcome::PartialFailure(_) => {
                self.events.sync(SyncEvent::Done {
                    run_id: run_id.to_string(),
                    failures: outcome.failures().len() as u64,
                });
            }
            RunOutcome::RetriesExhausted { last_error, .. } => {
                self.events.sync(SyncEvent::Error {
                    run_id: run_id.to_string(),
                    kind: last_error.class().to_string(),
                    message: format!("max retries exceeded: {last_error}"),
                });
            }
            RunOutcome::Aborted { kind, message } => {
                self.events.sync(SyncEvent::Error {
                    run_id: run_id.to_string(),
                    kind: kind.to_string(),
                    message: message.clone(),
                });
            }
        }

        info!(run_id = %run_id, attempts, outcome = ?outcome.class(), "Sync run finished");
        SyncReport {
            run_id,
            attempts,
            outcome,
            write,
        }
    }

    async fn run_locked(&self, cancel: &CancellationToken) -> (u32, RunOutcome, Option<WriteReport>) {
        if let Err(e) = self.index.check_schema().await {
            error!(error = %e, "Library index cannot be used");
            return (0, aborted(&SyncError::from(e)), None);
        }

        let attempts = self.attempt_loop(cancel);
        tokio::pin!(attempts);
        match timeout(self.config.run_timeout, &mut attempts).await {
            Ok(result) => result,
            Err(_) => {
                warn!(
                    timeout_secs = self.config.run_timeout.as_secs(),
                    "Run timeout reached, draining in-flight writes"
                );
                cancel.cancel();
                let (attempts, outcome, write) = attempts.await;
                let outcome = match outcome {
                    RunOutcome::Aborted {
                        kind: ErrorClass::Interrupted,
                        ..
                    } => aborted(&SyncError::Timeout(self.config.run_timeout)),
                    other => other,
                };
                (attempts, outcome, write)
            }
        }
    }

    async fn attempt_loop(&self, cancel: &CancellationToken) -> (u32, RunOutcome, Option<WriteReport>) {
        let max_attempts = self.config.max_attempts.max(1);
        let mut last_error = None;

        for attempt in 1..=max_attempts {
            if attempt > 1 {
                self.events.sync(SyncEvent::Retry { attempt });
                if let Err(e) = self.prepare_retry(attempt, cancel).await {
                    if !e.is_retryable() {
                        return (attempt, aborted(&e), None);
                    }
                    warn!(attempt, error = %e, "Session refresh failed");
                    last_error = Some(e);
                    continue;
                }
            }

            info!(attempt, max_attempts, "Starting sync attempt");
            match self.engine.run_attempt(cancel).await {
                Ok(report) if report.interrupted => {
                    return (attempt, aborted(&SyncError::Cancelled), Some(report));
                }
                Ok(report) if report.failures.is_empty() => {
                    return (attempt, RunOutcome::Success, Some(report));
                }
                Ok(report) => {
                    warn!(failures = report.failures.len(), "Sync completed with failures");
                    let failures = report.failures.clone();
                    return (attempt, RunOutcome::PartialFailure(failures), Some(report));
                }
                Err(e) if e.is_retryable() => {
                    warn!(attempt, error = %e, "Sync attempt failed, will retry");
                    last_error = Some(e);
                }
                Err(e) => {
                    error!(attempt, error = %e, class = %e.class(), "Sync attempt aborted");
                    return (attempt, aborted(&e), None);
                }
            }
        }

        let last_error =
            last_error.unwrap_or_else(|| SyncError::Task("no attempt was made".to_string()));
        error!(attempts = max_attempts, error = %last_error, "Giving up on sync");
        (
            max_attempts,
            RunOutcome::RetriesExhausted {
                attempts: max_attempts,
                last_error,
            },
            None,
        )
    }

    /// Linear backoff, then a fresh remote session.
    async fn prepare_retry(&self, attempt: u32, cancel: &CancellationToken) -> Result<()> {
        let delay = self.config.retry_backoff * (attempt - 1);
        tokio::select! {
            _ = cancel.cancelled() => return Err(SyncError::Cancelled),
            _ = sleep(delay) => {}
        }
        self.catalog.refresh_session().await?;
        Ok(())
    }
}

fn aborted(error: &SyncError) -> RunOutcome {
    RunOutcome::Aborted {
        kind: error.class(),
        message: error.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bridge_traits::error::Result as BridgeResult;
    use bridge_traits::lock::LockStatus;
    use mockall::mock;

    mock! {
        Lock {}

        #[async_trait]
        impl LibraryLock for Lock {
            async fn status(&self) -> BridgeResult<LockStatus>;
            async fn acquire(&self, force: bool) -> BridgeResult<()>;
            async fn release(&self, force: bool) -> BridgeResult<()>;
        }
    }

    #[tokio::test]
    async fn test_foreign_lock_maps_to_concurrency_conflict() {
        let mut lock = MockLock::new();
        lock.expect_acquire()
            .withf(|force| !*force)
            .times(1)
            .returning(|_| Err(BridgeError::Locked { pid: 42, stale: false }));

        let err = acquire_lock(&lock, false).await.unwrap_err();
        assert!(matches!(err, SyncError::LockHeld { pid: 42, stale: false }));
        assert_eq!(err.class(), ErrorClass::ConcurrencyConflict);
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_force_is_passed_through() {
        let mut lock = MockLock::new();
        lock.expect_acquire()
            .withf(|force| *force)
            .times(1)
            .returning(|_| Ok(()));
        lock.expect_release()
            .withf(|force| !*force)
            .times(1)
            .returning(|_| Err(BridgeError::Locked { pid: 7, stale: true }));

        acquire_lock(&lock, true).await.unwrap();
        // Release failures are logged, not returned
        release_lock(&lock).await;
    }

    #[test]
    fn test_aborted_carries_class_and_message() {
        match aborted(&SyncError::Timeout(std::time::Duration::from_secs(5))) {
            RunOutcome::Aborted { kind, message } => {
                assert_eq!(kind, ErrorClass::Interrupted);
                assert!(message.contains('5'));
            }
            other => panic!("unexpected outcome {other:?}"),
        }
    }
}
