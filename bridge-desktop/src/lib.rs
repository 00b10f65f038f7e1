//! # Desktop Bridge Implementations
//!
//! Default implementations of bridge traits for desktop platforms
//! (macOS, Windows, Linux).
//!
//! ## Overview
//!
//! - `FileSystemAccess` using `tokio::fs`, with OS symlinks and mtime control
//! - `LibraryLock` using a PID file next to the library
//!
//! ## Usage
//!
//! ```ignore
//! use bridge_desktop::{PidFileLock, TokioFileSystem};
//!
//! let fs = TokioFileSystem::new();
//! let lock = PidFileLock::new(library_root.join(".library.lock"));
//! ```

mod filesystem;
mod lock;

pub use filesystem::{default_library_dir, TokioFileSystem};
pub use lock::PidFileLock;
