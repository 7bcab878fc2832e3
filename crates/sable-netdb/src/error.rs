//! Error types for sable-netdb

use std::time::Duration;

use sable_storage::StorageError;
use thiserror::Error;

/// Errors surfaced by the network directory
#[derive(Debug, Error)]
pub enum DirectoryError {
    /// The initial load did not finish in time; the directory is unusable
    #[error("Directory load did not complete within {0:?}")]
    LoadTimeout(Duration),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Background task failed: {0}")]
    Task(String),
}

/// Errors from weighted selection
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum SelectionError {
    #[error("Selection pool is empty")]
    EmptyPool,
}

/// Result type for directory operations
pub type DirectoryResult<T> = Result<T, DirectoryError>;
