//! The cache facade: memoized page rendering with tag-indexed invalidation.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use pagecache_store::{KeyValueStore, TagIndex, WriteBatch};

use crate::config::CacheConfig;
use crate::error::CacheError;
use crate::key::{KeyBuilder, KeyOutcome};

/// Wildcard invalidation marker: `invalidate(&["*".into()])` flushes every
/// tagged entry.
pub const WILDCARD_TAG: &str = "*";

/// Per-request context supplied by the host environment.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    /// Request hostname; consulted only when keys are host-qualified.
    pub hostname: Option<String>,
}

impl RequestContext {
    /// Create an empty context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the request hostname.
    pub fn with_hostname(mut self, hostname: impl Into<String>) -> Self {
        self.hostname = Some(hostname.into());
        self
    }
}

/// Tag-indexed page cache over a [`KeyValueStore`].
///
/// Coordinates the raw entry and the tag index so they never diverge: an
/// entry write and its tag registrations commit in one atomic batch, and
/// invalidation deletes entries before dropping index sets. There is no
/// in-process locking; the accepted races are a stale hit and a double
/// render, both of which converge.
pub struct PageCache<S> {
    store: Arc<S>,
    tags: TagIndex<S>,
    keys: KeyBuilder,
    default_ttl: Option<Duration>,
}

impl<S: KeyValueStore + 'static> PageCache<S> {
    /// Create a cache owning its store driver.
    pub fn new(store: S, config: CacheConfig) -> Self {
        Self::with_shared_store(Arc::new(store), config)
    }

    /// Create a cache over a store driver shared with other components.
    pub fn with_shared_store(store: Arc<S>, config: CacheConfig) -> Self {
        Self {
            tags: TagIndex::new(Arc::clone(&store), &config.key_prefix),
            keys: KeyBuilder::from_config(&config),
            default_ttl: config.default_ttl,
            store,
        }
    }

    /// The key builder this cache resolves routes with.
    pub fn key_builder(&self) -> &KeyBuilder {
        &self.keys
    }

    /// Serve `route` from cache, rendering on a miss.
    ///
    /// On a hit the stored content is returned and `render` is never
    /// invoked. On a miss, `render` runs, then `get_tags`; content that
    /// carries no tags is returned without being cached (it could never
    /// be invalidated later). Tagged content is written back by a
    /// detached task so the response path never waits on the store.
    ///
    /// Store read failures degrade to a miss and are logged; render
    /// errors propagate untouched.
    pub async fn invoke<F, Fut, G>(
        &self,
        route: &str,
        ctx: &RequestContext,
        render: F,
        get_tags: G,
    ) -> Result<String, CacheError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<String>>,
        G: FnOnce() -> Vec<String>,
    {
        let key = match self.keys.build(route, ctx.hostname.as_deref()) {
            KeyOutcome::Store(key) => key,
            KeyOutcome::Bypass => {
                debug!(route, "bypass: request is not cacheable");
                return Ok(render().await?);
            }
        };

        if let Some(content) = self.lookup(&key).await {
            return Ok(content);
        }

        let content = render().await?;
        let tags = get_tags();
        if tags.is_empty() {
            debug!(key, "rendered content carries no tags, not cached");
            return Ok(content);
        }

        self.spawn_write(key, content.clone(), tags);
        Ok(content)
    }

    /// Look up a route directly, without rendering.
    ///
    /// Applies the same read policy as [`invoke`](Self::invoke): bypass
    /// routes, store failures and non-UTF-8 payloads all read as `None`.
    pub async fn get(&self, route: &str, ctx: &RequestContext) -> Option<String> {
        match self.keys.build(route, ctx.hostname.as_deref()) {
            KeyOutcome::Store(key) => self.lookup(&key).await,
            KeyOutcome::Bypass => None,
        }
    }

    /// Store rendered content for a route under the given tags, awaiting
    /// the write. This is the explicit counterpart to the detached write
    /// inside [`invoke`](Self::invoke); failures surface to the caller.
    ///
    /// Untagged or bypass content is not written, matching `invoke`.
    pub async fn insert(
        &self,
        route: &str,
        ctx: &RequestContext,
        content: &str,
        tags: &[String],
    ) -> Result<(), CacheError> {
        let key = match self.keys.build(route, ctx.hostname.as_deref()) {
            KeyOutcome::Store(key) => key,
            KeyOutcome::Bypass => return Ok(()),
        };
        if tags.is_empty() {
            return Ok(());
        }
        let batch = self.tagged_write(&key, content, tags);
        Ok(self.store.commit(batch).await?)
    }

    /// Invalidate every entry carrying any of the given tags.
    ///
    /// The wildcard tag `"*"` anywhere in the list flushes all tagged
    /// entries through a streaming scan of the tag namespace; the call
    /// completes only once the deletions are acknowledged. Store errors
    /// surface on both paths, and work done before a wildcard-path error
    /// is not rolled back.
    ///
    /// Returns the number of entries targeted by the deletions (on the
    /// wildcard path a key can be counted once per scan sweep).
    pub async fn invalidate(&self, tags: &[String]) -> Result<u64, CacheError> {
        if tags.iter().any(|tag| tag == WILDCARD_TAG) {
            return Ok(self.tags.clear_all().await?);
        }
        Ok(self.tags.clear_tags(tags).await?)
    }

    async fn lookup(&self, key: &str) -> Option<String> {
        match self.store.get(key).await {
            Ok(Some(bytes)) => match String::from_utf8(bytes) {
                Ok(content) => {
                    debug!(key, "hit");
                    Some(content)
                }
                Err(_) => {
                    // Never serve a corrupt payload; a miss re-renders it.
                    warn!(key, "cached payload is not valid UTF-8, treating as a miss");
                    None
                }
            },
            Ok(None) => {
                debug!(key, "miss");
                None
            }
            Err(err) => {
                warn!(key, error = %err, "store read failed, treating as a miss");
                None
            }
        }
    }

    fn tagged_write(&self, key: &str, content: &str, tags: &[String]) -> WriteBatch {
        let mut batch = WriteBatch::new();
        batch.put(key, content.as_bytes().to_vec(), self.default_ttl);
        self.tags.register(key, tags, &mut batch);
        batch
    }

    /// Commit the entry write and its tag registrations in one atomic
    /// batch, detached from the response path. Failures are logged and
    /// dropped: a store outage degrades to "cache always misses", never
    /// to added response latency.
    fn spawn_write(&self, key: String, content: String, tags: Vec<String>) {
        let batch = self.tagged_write(&key, &content, &tags);
        let store = Arc::clone(&self.store);
        tokio::spawn(async move {
            if let Err(err) = store.commit(batch).await {
                warn!(key, error = %err, "background cache write failed");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use pagecache_store::{MemoryStore, ScanPage, StoreError};

    use super::*;
    use crate::config::QueryParamFilter;

    /// Store double whose every operation fails, standing in for a
    /// backing store outage.
    struct FailingStore;

    fn outage() -> StoreError {
        StoreError::Backend("connection reset".to_string())
    }

    #[async_trait::async_trait]
    impl KeyValueStore for FailingStore {
        async fn get(&self, _key: &str) -> Result<Option<Vec<u8>>, StoreError> {
            Err(outage())
        }

        async fn commit(&self, _batch: WriteBatch) -> Result<(), StoreError> {
            Err(outage())
        }

        async fn set_members(&self, _key: &str) -> Result<Vec<String>, StoreError> {
            Err(outage())
        }

        async fn scan(
            &self,
            _prefix: &str,
            _cursor: u64,
            _limit: usize,
        ) -> Result<ScanPage, StoreError> {
            Err(outage())
        }
    }

    fn cache(config: CacheConfig) -> PageCache<MemoryStore> {
        PageCache::new(MemoryStore::new(), config)
    }

    fn storefront() -> PageCache<MemoryStore> {
        cache(CacheConfig::new().with_version("v1").with_query_param_filter(
            QueryParamFilter::new()
                .allow(["term", "sort"])
                .deny(["sc_src", "itemsPerPage"]),
        ))
    }

    /// Let the detached write task run to completion on the test runtime.
    async fn settle() {
        for _ in 0..8 {
            tokio::task::yield_now().await;
        }
    }

    async fn render_counted<S: KeyValueStore + 'static>(
        cache: &PageCache<S>,
        route: &str,
        renders: &AtomicUsize,
        tags: &[&str],
    ) -> String {
        let ctx = RequestContext::new();
        let tags: Vec<String> = tags.iter().map(|t| t.to_string()).collect();
        cache
            .invoke(
                route,
                &ctx,
                || async {
                    renders.fetch_add(1, Ordering::SeqCst);
                    Ok(format!("<html>{route}</html>"))
                },
                || tags,
            )
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_second_invoke_is_a_hit_and_renders_once() {
        let cache = storefront();
        let renders = AtomicUsize::new(0);

        let first = render_counted(&cache, "/sale", &renders, &["sale"]).await;
        settle().await;
        let second = render_counted(&cache, "/sale", &renders, &["sale"]).await;

        assert_eq!(first, second);
        assert_eq!(renders.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_untagged_content_is_returned_but_never_cached() {
        let cache = storefront();
        let renders = AtomicUsize::new(0);

        let first = render_counted(&cache, "/account", &renders, &[]).await;
        settle().await;
        let second = render_counted(&cache, "/account", &renders, &[]).await;

        assert_eq!(first, second);
        assert_eq!(renders.load(Ordering::SeqCst), 2);
        assert!(cache.get("/account", &RequestContext::new()).await.is_none());
    }

    #[tokio::test]
    async fn test_deny_listed_param_bypasses_reads_and_writes() {
        let cache = storefront();
        let renders = AtomicUsize::new(0);
        let route = "/sale?sc_src=email_3757321&sort=price_ascending";

        render_counted(&cache, route, &renders, &["sale"]).await;
        settle().await;
        render_counted(&cache, route, &renders, &["sale"]).await;

        // Bypass renders every time and leaves no entry behind.
        assert_eq!(renders.load(Ordering::SeqCst), 2);
        assert!(cache.get(route, &RequestContext::new()).await.is_none());
    }

    #[tokio::test]
    async fn test_stripped_params_share_one_entry() {
        let cache = storefront();
        let renders = AtomicUsize::new(0);

        render_counted(&cache, "/search?term=dress&sort=asc&page=1", &renders, &["search"]).await;
        settle().await;
        // Same page identity once gclid/page noise is stripped.
        render_counted(&cache, "/search?term=dress&sort=asc&page=2", &renders, &["search"]).await;

        assert_eq!(renders.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_invalidate_by_tag_makes_entries_miss() {
        let cache = storefront();
        let renders = AtomicUsize::new(0);

        render_counted(&cache, "/p/1", &renders, &["product-1", "category-7"]).await;
        render_counted(&cache, "/p/2", &renders, &["product-2", "category-7"]).await;
        settle().await;

        let cleared = cache.invalidate(&["category-7".to_string()]).await.unwrap();
        assert_eq!(cleared, 2);

        let ctx = RequestContext::new();
        assert!(cache.get("/p/1", &ctx).await.is_none());
        assert!(cache.get("/p/2", &ctx).await.is_none());
    }

    #[tokio::test]
    async fn test_entry_with_two_tags_dies_when_either_is_cleared() {
        let cache = storefront();
        let renders = AtomicUsize::new(0);

        render_counted(&cache, "/p/1", &renders, &["a", "b"]).await;
        settle().await;

        cache.invalidate(&["a".to_string()]).await.unwrap();
        assert!(cache.get("/p/1", &RequestContext::new()).await.is_none());
    }

    #[tokio::test]
    async fn test_wildcard_invalidation_flushes_everything() {
        let cache = storefront();
        let renders = AtomicUsize::new(0);

        for i in 0..10 {
            let tag = format!("product-{i}");
            render_counted(&cache, &format!("/p/{i}"), &renders, &[tag.as_str()]).await;
        }
        settle().await;

        let cleared = cache.invalidate(&["*".to_string()]).await.unwrap();
        assert_eq!(cleared, 10);

        let ctx = RequestContext::new();
        for i in 0..10 {
            assert!(cache.get(&format!("/p/{i}"), &ctx).await.is_none());
        }
    }

    #[tokio::test]
    async fn test_wildcard_on_empty_cache_is_a_noop() {
        let cache = storefront();
        assert_eq!(cache.invalidate(&["*".to_string()]).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_render_error_propagates_and_caches_nothing() {
        let cache = storefront();
        let ctx = RequestContext::new();

        let result = cache
            .invoke(
                "/broken",
                &ctx,
                || async { Err(anyhow::anyhow!("upstream exploded")) },
                Vec::new,
            )
            .await;

        assert!(matches!(result, Err(CacheError::Render(_))));
        assert!(cache.get("/broken", &ctx).await.is_none());
    }

    #[tokio::test]
    async fn test_corrupt_payload_reads_as_miss_and_rerenders() {
        let store = Arc::new(MemoryStore::new());
        let cache = PageCache::with_shared_store(
            Arc::clone(&store),
            CacheConfig::new().with_version("v1"),
        );
        let ctx = RequestContext::new();

        // Plant invalid UTF-8 under the exact key /sale resolves to.
        let mut batch = WriteBatch::new();
        batch.put("v1:page:/sale", vec![0xff, 0xfe], None);
        store.commit(batch).await.unwrap();

        // Never served corrupt: the entry reads as a miss.
        assert!(cache.get("/sale", &ctx).await.is_none());

        let renders = AtomicUsize::new(0);
        let content = render_counted(&cache, "/sale", &renders, &["sale"]).await;
        assert_eq!(content, "<html>/sale</html>");
        assert_eq!(renders.load(Ordering::SeqCst), 1);

        // The re-render replaces the bad payload.
        settle().await;
        assert_eq!(cache.get("/sale", &ctx).await.as_deref(), Some("<html>/sale</html>"));
    }

    #[tokio::test]
    async fn test_store_read_failure_renders_through() {
        let cache = PageCache::new(FailingStore, CacheConfig::new().with_version("v1"));
        let ctx = RequestContext::new();
        let renders = AtomicUsize::new(0);

        // An outage degrades to "cache always misses", never to an error
        // on the request path.
        let first = render_counted(&cache, "/sale", &renders, &["sale"]).await;
        settle().await;
        let second = render_counted(&cache, "/sale", &renders, &["sale"]).await;

        assert_eq!(first, second);
        assert_eq!(renders.load(Ordering::SeqCst), 2);
        assert!(cache.get("/sale", &ctx).await.is_none());
    }

    #[tokio::test]
    async fn test_store_failure_surfaces_on_invalidate() {
        // Unlike reads, invalidation reports store errors to the caller.
        let cache = PageCache::new(FailingStore, CacheConfig::new().with_version("v1"));

        let explicit = cache.invalidate(&["sale".to_string()]).await;
        assert!(matches!(explicit, Err(CacheError::Store(_))));

        let wildcard = cache.invalidate(&["*".to_string()]).await;
        assert!(matches!(wildcard, Err(CacheError::Store(_))));
    }

    #[tokio::test]
    async fn test_insert_writes_through_and_is_readable() {
        let cache = storefront();
        let ctx = RequestContext::new();

        cache
            .insert("/p/1", &ctx, "<html>p1</html>", &["product-1".to_string()])
            .await
            .unwrap();

        assert_eq!(
            cache.get("/p/1", &ctx).await.as_deref(),
            Some("<html>p1</html>")
        );

        cache.invalidate(&["product-1".to_string()]).await.unwrap();
        assert!(cache.get("/p/1", &ctx).await.is_none());
    }

    #[tokio::test]
    async fn test_insert_skips_untagged_and_bypass_routes() {
        let cache = storefront();
        let ctx = RequestContext::new();

        cache.insert("/p/1", &ctx, "body", &[]).await.unwrap();
        assert!(cache.get("/p/1", &ctx).await.is_none());

        cache
            .insert("/p/1?sc_src=x", &ctx, "body", &["t".to_string()])
            .await
            .unwrap();
        assert!(cache.get("/p/1", &ctx).await.is_none());
    }

    #[tokio::test]
    async fn test_host_qualified_tenants_do_not_share_entries() {
        let cache = cache(CacheConfig::new().with_version("v1").with_host_qualified());
        let shop_a = RequestContext::new().with_hostname("a.example");
        let shop_b = RequestContext::new().with_hostname("b.example");

        cache
            .insert("/sale", &shop_a, "tenant a", &["sale".to_string()])
            .await
            .unwrap();

        assert_eq!(cache.get("/sale", &shop_a).await.as_deref(), Some("tenant a"));
        assert!(cache.get("/sale", &shop_b).await.is_none());
    }

    #[tokio::test]
    async fn test_changing_version_is_a_logical_flush() {
        let store = Arc::new(MemoryStore::new());
        let ctx = RequestContext::new();

        let old = PageCache::with_shared_store(
            Arc::clone(&store),
            CacheConfig::new().with_version("v1"),
        );
        old.insert("/sale", &ctx, "old body", &["sale".to_string()])
            .await
            .unwrap();

        let new = PageCache::with_shared_store(
            Arc::clone(&store),
            CacheConfig::new().with_version("v2"),
        );
        assert!(new.get("/sale", &ctx).await.is_none());
        assert_eq!(old.get("/sale", &ctx).await.as_deref(), Some("old body"));
    }
}
