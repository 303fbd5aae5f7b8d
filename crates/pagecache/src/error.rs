//! Cache error types.

use thiserror::Error;

use pagecache_store::StoreError;

/// Errors surfaced by the page cache.
#[derive(Error, Debug)]
pub enum CacheError {
    /// The backing store rejected an operation. Read failures never reach
    /// callers of `invoke` (they degrade to a miss); this variant carries
    /// invalidation and explicit-write failures.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The caller's render function failed; passed through untouched.
    #[error(transparent)]
    Render(#[from] anyhow::Error),
}
