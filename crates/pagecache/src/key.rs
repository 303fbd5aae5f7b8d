//! Canonical cache key construction.

use tracing::warn;

use crate::config::{CacheConfig, QueryParamFilter, DEFAULT_SEGMENT};

/// Outcome of building a key for a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyOutcome {
    /// Cache under this canonical key.
    Store(String),
    /// Do not cache this request at all.
    Bypass,
}

impl KeyOutcome {
    /// Whether the request must bypass the cache.
    pub fn is_bypass(&self) -> bool {
        matches!(self, Self::Bypass)
    }

    /// The canonical key, if the request is cacheable.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Store(key) => Some(key),
            Self::Bypass => None,
        }
    }
}

/// Builds canonical cache keys of the form
/// `{prefix}{version}:{segment}:{hostname?}{route}`.
///
/// Pure and deterministic: the same inputs always produce the same key,
/// and rebuilding is idempotent. Query filtering and version/host
/// qualification compose; the filtered route is substituted into the base
/// form. Routes are normalized to begin with `/`, so a host-qualified key
/// can never collide with an unqualified one.
#[derive(Debug, Clone)]
pub struct KeyBuilder {
    version: String,
    segment: String,
    host_qualified: bool,
    filter: Option<QueryParamFilter>,
    key_prefix: String,
}

impl KeyBuilder {
    /// Resolve a builder from configuration.
    ///
    /// A missing `version` gets a random per-instance value, generated
    /// once here and threaded through every subsequent build. Such a
    /// cache is internally consistent but entries are not shared across
    /// instances, hence the warning.
    pub fn from_config(config: &CacheConfig) -> Self {
        let version = match &config.version {
            Some(version) => version.clone(),
            None => {
                let generated = random_version();
                warn!(
                    version = %generated,
                    "no cache version configured; using a random per-instance \
                     value, entries will not be shared across instances"
                );
                generated
            }
        };
        let segment = config
            .query_param_filter
            .as_ref()
            .and_then(|filter| filter.tag_name.clone())
            .unwrap_or_else(|| DEFAULT_SEGMENT.to_string());

        Self {
            version,
            segment,
            host_qualified: config.host_qualified,
            filter: config.query_param_filter.clone(),
            key_prefix: config.key_prefix.clone(),
        }
    }

    /// The resolved version (configured or generated).
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Build the canonical key for a route, or signal a bypass.
    ///
    /// Malformed input never fails; the worst case is a bypass for that
    /// request.
    pub fn build(&self, route: &str, hostname: Option<&str>) -> KeyOutcome {
        let host = if self.host_qualified {
            match hostname {
                Some(host) if !host.is_empty() => host,
                // Host-qualified keys without a hostname would collide
                // across tenants; degrade to uncacheable.
                _ => return KeyOutcome::Bypass,
            }
        } else {
            ""
        };

        let route = normalize_route(route);
        let canonical = match &self.filter {
            Some(filter) => match filter_route(&route, filter) {
                Some(filtered) => filtered,
                None => return KeyOutcome::Bypass,
            },
            None => route,
        };

        KeyOutcome::Store(format!(
            "{}{}:{}:{}{}",
            self.key_prefix, self.version, self.segment, host, canonical
        ))
    }
}

fn normalize_route(route: &str) -> String {
    let trimmed = route.trim();
    if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{trimmed}")
    }
}

/// Rebuild `route` keeping only allow-listed query parameters in their
/// original relative order, or return `None` when a deny-listed parameter
/// is present (the request must not be cached at all).
fn filter_route(route: &str, filter: &QueryParamFilter) -> Option<String> {
    let (path, query) = match route.split_once('?') {
        Some((path, query)) => (path, query),
        None => return Some(route.to_string()),
    };

    let mut kept = Vec::new();
    for param in query.split('&').filter(|p| !p.is_empty()) {
        let name = param.split('=').next().unwrap_or(param);
        if filter.deny_list.iter().any(|denied| denied == name) {
            return None;
        }
        if filter.allow_list.iter().any(|allowed| allowed == name) {
            kept.push(param);
        }
    }

    if kept.is_empty() {
        Some(path.to_string())
    } else {
        Some(format!("{path}?{}", kept.join("&")))
    }
}

fn random_version() -> String {
    use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
    use rand::Rng;

    let bytes: [u8; 9] = rand::thread_rng().gen();
    format!("gen_{}", URL_SAFE_NO_PAD.encode(bytes))
}
