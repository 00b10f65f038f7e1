//! Workspace placeholder crate.
//!
//! This crate exists to expose shared feature flags that map to the individual
//! workspace crates (`core-sync`, `core-runtime`). Host applications can depend
//! on `photomirror-workspace` and enable `desktop-shims` to get the sync engine
//! wired against the desktop filesystem and lock bridges.

#[cfg(feature = "desktop-shims")]
pub use core_runtime;
#[cfg(feature = "desktop-shims")]
pub use core_sync;
