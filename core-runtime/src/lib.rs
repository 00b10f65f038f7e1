//! # Core Runtime Module
//!
//! Provides foundational runtime infrastructure for the photo library mirror:
//! - Logging and tracing infrastructure
//! - Configuration management
//! - Lifecycle event channel
//!
//! ## Overview
//!
//! This crate contains the runtime utilities the library and sync crates
//! depend on. It establishes the logging conventions, the validated
//! configuration, and the typed progress channel consumed by a single
//! observer.

pub mod config;
pub mod error;
pub mod events;
pub mod logging;

pub use error::{Error, Result};
