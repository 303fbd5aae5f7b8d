//! Tag-indexed page cache.
//!
//! Memoizes rendered page content keyed by route and supports bulk
//! invalidation of many entries at once through opaque tags (product IDs,
//! category IDs, ...) instead of individual cache keys.
//!
//! This crate provides:
//! - `CacheConfig` / `QueryParamFilter` - the configuration surface
//! - `KeyBuilder` - canonical cache key construction with allow/deny
//!   query-parameter filtering
//! - `PageCache` - the request flow (`invoke`, `get`, `insert`,
//!   `invalidate`) over any [`pagecache_store::KeyValueStore`]
//!
//! # Example
//!
//! ```rust,ignore
//! use pagecache::prelude::*;
//! use pagecache_store::MemoryStore;
//!
//! let cache = PageCache::new(
//!     MemoryStore::new(),
//!     CacheConfig::new()
//!         .with_version("2024-06")
//!         .with_query_param_filter(
//!             QueryParamFilter::new().allow(["term", "sort"]).deny(["sc_src"]),
//!         ),
//! );
//!
//! // Serve from cache, rendering on a miss.
//! let ctx = RequestContext::new();
//! let html = cache
//!     .invoke("/p/42", &ctx, || async { render_page().await }, || {
//!         vec!["product-42".to_string()]
//!     })
//!     .await?;
//!
//! // A product changed: drop every page that showed it.
//! cache.invalidate(&["product-42".to_string()]).await?;
//! ```

mod cache;
mod config;
mod error;
mod key;

pub use cache::{PageCache, RequestContext, WILDCARD_TAG};
pub use config::{CacheConfig, QueryParamFilter, DEFAULT_SEGMENT};
pub use error::CacheError;
pub use key::{KeyBuilder, KeyOutcome};

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::{
        CacheConfig, CacheError, PageCache, QueryParamFilter, RequestContext, WILDCARD_TAG,
    };
}
