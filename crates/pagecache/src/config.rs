//! Cache configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default key segment between the version and the route.
pub const DEFAULT_SEGMENT: &str = "page";

/// Query-parameter filter for cache-key canonicalization.
///
/// The two lists name parameters that affect page content. Anything not
/// listed (tracking noise like `gclid` or `sc_src`) is stripped from the
/// key so equivalent pages share one entry. A deny-listed parameter marks
/// the whole request uncacheable.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct QueryParamFilter {
    /// Parameters kept in the key, in their original relative order.
    #[serde(alias = "whiteList")]
    pub allow_list: Vec<String>,
    /// Parameters whose presence makes the request uncacheable.
    #[serde(alias = "blackList")]
    pub deny_list: Vec<String>,
    /// Overrides the key segment (default `"page"`).
    pub tag_name: Option<String>,
}

impl QueryParamFilter {
    /// Create an empty filter.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the allow-list.
    pub fn allow(mut self, params: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.allow_list = params.into_iter().map(Into::into).collect();
        self
    }

    /// Set the deny-list.
    pub fn deny(mut self, params: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.deny_list = params.into_iter().map(Into::into).collect();
        self
    }

    /// Override the key segment.
    pub fn with_tag_name(mut self, name: impl Into<String>) -> Self {
        self.tag_name = Some(name.into());
        self
    }
}

/// Page cache configuration, resolved once at construction.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CacheConfig {
    /// Cache-format/generation discriminator folded into every key;
    /// changing it on redeploy is an instant logical flush of the whole
    /// cache. When omitted, a random per-instance value is generated and
    /// a warning logged: instances will not share entries.
    pub version: Option<String>,
    /// Include the request hostname in keys (multi-tenant serving).
    pub host_qualified: bool,
    /// Query-parameter canonicalization; `None` passes queries through.
    pub query_param_filter: Option<QueryParamFilter>,
    /// Expiry handed to the store for every entry; `None` means entries
    /// live until invalidated.
    pub default_ttl: Option<Duration>,
    /// Store namespace prefix, applied to entry keys and the tag index
    /// alike (connection passthrough, the store never sees it as config).
    pub key_prefix: String,
}

impl CacheConfig {
    /// Create a default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the cache version.
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    /// Qualify keys by request hostname.
    pub fn with_host_qualified(mut self) -> Self {
        self.host_qualified = true;
        self
    }

    /// Set the query-parameter filter.
    pub fn with_query_param_filter(mut self, filter: QueryParamFilter) -> Self {
        self.query_param_filter = Some(filter);
        self
    }

    /// Set the per-entry expiry.
    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = Some(ttl);
        self
    }

    /// Set the store namespace prefix.
    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }
}
