//! Telestream Core Library
//!
//! Shared functionality for telestream components:
//! - Device configuration files and config-file-list loading
//! - Tracing initialisation (plain or JSON, optional OTLP export)
//! - Common error types

pub mod config;
pub mod error;
#[cfg(feature = "metrics")]
pub mod metrics;
pub mod tracing_init;

pub use config::{ConfigFileList, DeviceConfig};
pub use error::{Error, Result};
