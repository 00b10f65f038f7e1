//! # Lifecycle Event Channel
//!
//! Typed progress events for sync runs and archive operations, delivered
//! over an explicit `tokio::sync::mpsc` channel to exactly one observer.
//!
//! ## Overview
//!
//! - **Event Types**: Strongly-typed enum hierarchies per domain
//! - **EventSender**: Cloneable producer handle; emitting never blocks
//! - **EventStream**: The single consumer, with optional filtering
//! - **Observer Loop**: [`spawn_observer`] drives a handler until every sender is gone
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐    emit     ┌───────────┐
//! │ Orchestrator ├────────────>│           │
//! └──────────────┘             │   mpsc    │   recv    ┌──────────┐
//! ┌──────────────┐    emit     │  channel  ├──────────>│ Observer │
//! │   Pipeline   ├────────────>│           │           └──────────┘
//! └──────────────┘             └───────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust
//! use core_runtime::events::{event_channel, spawn_observer, CoreEvent, SyncEvent};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let (sender, stream) = event_channel(64);
//! let observer = spawn_observer(stream, |event| {
//!     println!("{}", event.description());
//! });
//!
//! sender.emit(CoreEvent::Sync(SyncEvent::FetchStarted));
//! drop(sender);
//! observer.await.unwrap();
//! # }
//! ```
//!
//! ## Backpressure
//!
//! The channel is bounded. When the observer falls behind and the buffer is
//! full, `emit` drops the event and logs a warning instead of stalling the
//! sync. Events emitted after the observer is gone are discarded silently.

use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Default buffer size for the event channel.
pub const DEFAULT_EVENT_BUFFER_SIZE: usize = 256;

// ============================================================================
// Core Event Types
// ============================================================================

/// Top-level event enum encompassing all event categories.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "payload")]
pub enum CoreEvent {
    /// Sync run lifecycle events
    Sync(SyncEvent),
    /// Archive manager events
    Archive(ArchiveEvent),
}

impl CoreEvent {
    /// Returns a human-readable description of the event.
    pub fn description(&self) -> &str {
        match self {
            CoreEvent::Sync(e) => e.description(),
            CoreEvent::Archive(e) => e.description(),
        }
    }

    /// Returns the severity level of the event.
    pub fn severity(&self) -> EventSeverity {
        match self {
            CoreEvent::Sync(SyncEvent::Error { .. }) => EventSeverity::Error,
            CoreEvent::Sync(SyncEvent::Retry { .. }) => EventSeverity::Warning,
            CoreEvent::Archive(ArchiveEvent::Done {
                remote_delete_failures,
            }) if *remote_delete_failures > 0 => EventSeverity::Warning,
            CoreEvent::Sync(SyncEvent::Started { .. })
            | CoreEvent::Sync(SyncEvent::Done { .. })
            | CoreEvent::Archive(ArchiveEvent::Done { .. })
            | CoreEvent::Archive(ArchiveEvent::UnarchiveDone { .. }) => EventSeverity::Info,
            _ => EventSeverity::Debug,
        }
    }
}

/// Event severity levels for filtering and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventSeverity {
    /// Debug-level events (verbose)
    Debug,
    /// Informational events
    Info,
    /// Warning events
    Warning,
    /// Error events
    Error,
}

// ============================================================================
// Sync Events
// ============================================================================

/// Ordered lifecycle of one sync run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum SyncEvent {
    /// Run initiated.
    Started {
        /// Unique identifier for this run.
        run_id: String,
    },
    /// Remote and local state are being loaded.
    FetchStarted,
    /// Remote and local state loaded.
    FetchCompleted {
        remote_assets: u64,
        remote_albums: u64,
        local_assets: u64,
        local_albums: u64,
    },
    DiffStarted,
    DiffCompleted,
    WriteStarted,
    /// Asset queues are about to be applied.
    WriteAssetsStarted { delete: u64, add: u64, keep: u64 },
    /// Album queues are about to be applied.
    WriteAlbumsStarted { delete: u64, add: u64, keep: u64 },
    /// A single entity finished writing.
    ItemWritten {
        /// Display name of the entity.
        name: String,
    },
    WriteCompleted,
    /// An attempt failed with a transient error and the run is retrying.
    Retry {
        /// The attempt number about to start (2-based).
        attempt: u32,
    },
    /// Run finished; `failures` counts absorbed per-entity write failures.
    Done { run_id: String, failures: u64 },
    /// Run terminated with an error.
    Error {
        run_id: String,
        /// Error class (e.g. `transient_remote`).
        kind: String,
        message: String,
    },
}

impl SyncEvent {
    fn description(&self) -> &str {
        match self {
            SyncEvent::Started { .. } => "Sync started",
            SyncEvent::FetchStarted => "Fetching remote and local state",
            SyncEvent::FetchCompleted { .. } => "Fetch completed",
            SyncEvent::DiffStarted => "Diffing library state",
            SyncEvent::DiffCompleted => "Diff completed",
            SyncEvent::WriteStarted => "Writing library state",
            SyncEvent::WriteAssetsStarted { .. } => "Writing assets",
            SyncEvent::WriteAlbumsStarted { .. } => "Writing albums",
            SyncEvent::ItemWritten { .. } => "Item written",
            SyncEvent::WriteCompleted => "Write completed",
            SyncEvent::Retry { .. } => "Retrying sync",
            SyncEvent::Done { .. } => "Sync finished",
            SyncEvent::Error { .. } => "Sync failed",
        }
    }
}

// ============================================================================
// Archive Events
// ============================================================================

/// Events emitted while archiving or unarchiving an album.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum ArchiveEvent {
    /// Archiving of the album at `path` started.
    Started { path: String },
    /// Asset links are being replaced by real copies.
    PersistingStarted { count: u64 },
    /// Confirmed remote deletion of non-favorite assets started.
    RemoteDeleteStarted { count: u64 },
    /// Archive operation finished.
    Done { remote_delete_failures: u64 },
    UnarchiveStarted { path: String },
    UnarchiveDone { path: String },
}

impl ArchiveEvent {
    fn description(&self) -> &str {
        match self {
            ArchiveEvent::Started { .. } => "Archiving album",
            ArchiveEvent::PersistingStarted { .. } => "Persisting album assets",
            ArchiveEvent::RemoteDeleteStarted { .. } => "Deleting archived assets remotely",
            ArchiveEvent::Done { .. } => "Archive finished",
            ArchiveEvent::UnarchiveStarted { .. } => "Unarchiving album",
            ArchiveEvent::UnarchiveDone { .. } => "Unarchive finished",
        }
    }
}

// ============================================================================
// Channel
// ============================================================================

/// Creates the lifecycle channel: any number of senders, one stream.
pub fn event_channel(capacity: usize) -> (EventSender, EventStream) {
    let (sender, receiver) = mpsc::channel(capacity.max(1));
    (
        EventSender {
            sender: Some(sender),
        },
        EventStream::new(receiver),
    )
}

/// Producer handle for lifecycle events.
#[derive(Clone)]
pub struct EventSender {
    sender: Option<mpsc::Sender<CoreEvent>>,
}

impl EventSender {
    /// A sender that discards every event.
    pub fn disabled() -> Self {
        Self { sender: None }
    }

    /// Publishes an event without waiting for the observer.
    ///
    /// Returns `true` when the event was queued.
    pub fn emit(&self, event: CoreEvent) -> bool {
        let Some(sender) = &self.sender else {
            return false;
        };

        match sender.try_send(event) {
            Ok(()) => true,
            Err(TrySendError::Full(event)) => {
                warn!(event = event.description(), "Event channel full, dropping event");
                false
            }
            Err(TrySendError::Closed(_)) => {
                debug!("Event observer gone, discarding event");
                false
            }
        }
    }

    /// Shorthand for `emit(CoreEvent::Sync(event))`.
    pub fn sync(&self, event: SyncEvent) -> bool {
        self.emit(CoreEvent::Sync(event))
    }

    /// Shorthand for `emit(CoreEvent::Archive(event))`.
    pub fn archive(&self, event: ArchiveEvent) -> bool {
        self.emit(CoreEvent::Archive(event))
    }
}

impl fmt::Debug for EventSender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventSender")
            .field("enabled", &self.sender.is_some())
            .finish()
    }
}

type EventFilter = Box<dyn Fn(&CoreEvent) -> bool + Send + Sync>;

/// The single consumer side of the lifecycle channel.
pub struct EventStream {
    receiver: mpsc::Receiver<CoreEvent>,
    filter: Option<EventFilter>,
}

impl EventStream {
    fn new(receiver: mpsc::Receiver<CoreEvent>) -> Self {
        Self {
            receiver,
            filter: None,
        }
    }

    /// Only events matching `predicate` are returned by `recv()`.
    pub fn filter<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&CoreEvent) -> bool + Send + Sync + 'static,
    {
        self.filter = Some(Box::new(predicate));
        self
    }

    /// Receives the next matching event, or `None` once every sender is dropped.
    pub async fn recv(&mut self) -> Option<CoreEvent> {
        loop {
            let event = self.receiver.recv().await?;
            match &self.filter {
                Some(filter) if !filter(&event) => continue,
                _ => return Some(event),
            }
        }
    }

    /// Receives a matching event if one is already queued.
    pub fn try_recv(&mut self) -> Option<CoreEvent> {
        loop {
            let event = self.receiver.try_recv().ok()?;
            match &self.filter {
                Some(filter) if !filter(&event) => continue,
                _ => return Some(event),
            }
        }
    }
}

impl fmt::Debug for EventStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventStream")
            .field("has_filter", &self.filter.is_some())
            .finish()
    }
}

/// Runs the observer loop on the current runtime.
///
/// Every event is traced at a level matching its severity before being
/// handed to `handler`. The task ends when all senders are dropped.
pub fn spawn_observer<F>(mut stream: EventStream, mut handler: F) -> JoinHandle<()>
where
    F: FnMut(CoreEvent) + Send + 'static,
{
    tokio::spawn(async move {
        while let Some(event) = stream.recv().await {
            match event.severity() {
                EventSeverity::Error => error!(event = ?event, "{}", event.description()),
                EventSeverity::Warning => warn!(event = ?event, "{}", event.description()),
                EventSeverity::Info => info!(event = ?event, "{}", event.description()),
                EventSeverity::Debug => debug!(event = ?event, "{}", event.description()),
            }
            handler(event);
        }
        debug!("Event observer stopped");
    })
}

// ============================================================================
// Tests
// ============================================================================
