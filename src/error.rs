//! Error types for mapkv
//!
//! Provides a unified error type for all store operations.
//!
//! Two kinds of failure never reach callers as errors:
//! - a torn or corrupt tail found while rebuilding the index (the log is
//!   truncated to the last valid frame instead)
//! - an absent key (`get_bytes` returns `Ok(None)`)

use std::path::Path;
use std::time::Duration;

use thiserror::Error;

use crate::frame::DecodeError;

/// Result type alias using MapKvError
pub type Result<T> = std::result::Result<T, MapKvError>;

/// Unified error type for mapkv operations
#[derive(Debug, Error)]
pub enum MapKvError {
    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    /// Opening, growing, writing or renaming the backing file failed.
    /// The operation is not acknowledged as durable.
    #[error("Store unavailable: {0}")]
    StoreUnavailable(#[from] std::io::Error),

    #[error("Incompatible file format: {0}")]
    IncompatibleFormat(String),

    // -------------------------------------------------------------------------
    // Log Errors
    // -------------------------------------------------------------------------
    #[error("Frame decode failed: {0}")]
    Frame(#[from] DecodeError),

    #[error("Corrupted store: {0}")]
    Corrupted(String),

    // -------------------------------------------------------------------------
    // Concurrency Errors
    // -------------------------------------------------------------------------
    /// A lock could not be acquired in time. Nothing was written.
    #[error("Timed out after {waited:?} waiting for {operation} lock")]
    LockTimeout {
        operation: &'static str,
        waited: Duration,
    },

    // -------------------------------------------------------------------------
    // Lifecycle Errors
    // -------------------------------------------------------------------------
    #[error("Store is not ready")]
    StoreNotReady,

    #[error("Store is closed")]
    StoreClosed,

    // -------------------------------------------------------------------------
    // Caller Errors
    // -------------------------------------------------------------------------
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl MapKvError {
    /// Wrap an I/O error with the path it happened on.
    pub(crate) fn io_at(path: &Path, err: std::io::Error) -> Self {
        MapKvError::StoreUnavailable(std::io::Error::new(
            err.kind(),
            format!("{}: {}", path.display(), err),
        ))
    }

    /// True for errors that say nothing about the data, only that the
    /// operation could not run right now.
    pub fn is_transient(&self) -> bool {
        matches!(self, MapKvError::LockTimeout { .. })
    }
}
