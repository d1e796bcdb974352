//! Core utilities for the framesync workspace.
//!
//! This crate provides foundational types and utilities used across the workspace:
//! - Error types and result aliases
//! - Logging initialization
//! - Environment-driven configuration

mod config;
mod error;
mod logging;

pub use config::FrameSyncConfig;
pub use error::{Error, Result};
pub use logging::init_logging;
