//! Hoist Core - Foundational Types
//!
//! This crate provides the error taxonomy, resolved builder configuration and
//! the per-build context object shared by the hoist image builder and its CLI.

pub mod config;
pub mod context;
pub mod error;

// Re-export commonly used types
pub use config::{BuilderConfig, ExtraTag, PushExtraTags};
pub use context::BuildContext;
pub use error::{HoistError, Result};

/// Hoist version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
