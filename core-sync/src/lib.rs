//! # Sync Module
//!
//! Mirrors the remote photo catalog into the local library.
//!
//! ## Overview
//!
//! A run fetches the remote catalog and the local snapshot, diffs both
//! sides per entity kind, cascades folder deletions down the album tree,
//! and applies the result in dependency order with bounded concurrency.
//! Albums can be archived out of the synced tree; archived albums and
//! their assets are left alone by later runs.
//!
//! ## Components
//!
//! - **Diff** (`diff`): Partitions one entity kind into delete/add/keep
//! - **Resolver** (`resolver`): Cascades ancestor deletions onto kept albums
//! - **Write Pipeline** (`pipeline`): Ordered, concurrent filesystem and index writes
//! - **Engine** (`engine`): One fetch → diff → write attempt
//! - **Orchestrator** (`orchestrator`): Lock, schema check, retries and timeout
//! - **Archive** (`archive`): Archive, unarchive and confirmed remote delete

pub mod archive;
pub mod diff;
pub mod engine;
pub mod error;
pub mod orchestrator;
pub mod pipeline;
pub mod resolver;
pub mod run;

pub use archive::{
    ArchiveManager, ArchiveReport, ArchiveState, RemoteDeleteFailure, RemoteDeleteReport,
};
pub use diff::{diff, ProcessingQueue};
pub use engine::{exclude_stashed, PreparedState, SyncEngine};
pub use error::{ErrorClass, Result, SyncError};
pub use orchestrator::{open_index, SyncOrchestrator};
pub use pipeline::{WritePipeline, WritePlan};
pub use resolver::resolve_albums;
pub use run::{
    RunOutcome, SyncReport, SyncRunId, WriteFailure, WriteOperation, WriteReport,
};
