//! Store error types.

use thiserror::Error;

/// Errors surfaced by a Key-Value store driver.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Failed to open or reach the backing store.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// A read or write against the backing store failed.
    #[error("store operation failed: {0}")]
    Backend(String),

    /// A scan was resumed with a cursor the store did not issue.
    #[error("invalid scan cursor: {0}")]
    InvalidCursor(u64),
}
