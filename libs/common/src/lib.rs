//! Shared service plumbing for the solar monitoring workspace
//!
//! Provides the pieces every service binary needs at startup:
//! - logging bootstrap (console, JSON, daily rolling files)
//! - configuration loading from YAML/TOML/JSON plus environment overrides
//! - graceful shutdown signal handling
//! - hex helpers for frame logging

pub mod config_loader;
pub mod error;
pub mod hex;
pub mod logging;
pub mod shutdown;

pub use error::{Error, Result};
pub use logging::{LogConfig, LogGuard};
