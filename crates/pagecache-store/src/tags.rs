//! Tag index: the mapping from each tag to the cache keys carrying it.

use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::debug;

use crate::error::StoreError;
use crate::store::{KeyValueStore, WriteBatch};

/// Tags invalidated per sweep during a full flush. Bounds the memory a
/// flush holds regardless of how many tags the namespace has accumulated.
const FLUSH_BATCH: usize = 128;

/// Derived, per-tag index over a [`KeyValueStore`].
///
/// Index entries are extended in the same atomic batch as the cache write
/// they describe and shrunk only by invalidation sweeps. The index is a
/// conservative superset of live associations: it may still point at
/// TTL-expired entries (a lookup on a missing key is an ordinary miss),
/// but it never omits a key for a live, tagged entry.
pub struct TagIndex<S> {
    store: Arc<S>,
    namespace: String,
}

impl<S: KeyValueStore> TagIndex<S> {
    /// Create an index under `{key_prefix}tag:` in the store's keyspace.
    pub fn new(store: Arc<S>, key_prefix: &str) -> Self {
        Self {
            store,
            namespace: format!("{key_prefix}tag:"),
        }
    }

    fn tag_key(&self, tag: &str) -> String {
        format!("{}{}", self.namespace, tag)
    }

    /// Queue registration of `key` under every tag in `tags` onto `batch`,
    /// so the registrations commit atomically with the entry write itself.
    /// Union semantics: concurrent registrations of different keys under
    /// the same tag lose nothing.
    pub fn register(&self, key: &str, tags: &[String], batch: &mut WriteBatch) {
        for tag in tags {
            batch.add_to_set(self.tag_key(tag), vec![key.to_string()]);
        }
    }

    /// Union of all keys registered under any tag in `tags`. Unknown tags
    /// contribute nothing.
    pub async fn keys_for_tags(&self, tags: &[String]) -> Result<BTreeSet<String>, StoreError> {
        let mut keys = BTreeSet::new();
        for tag in tags {
            keys.extend(self.store.set_members(&self.tag_key(tag)).await?);
        }
        Ok(keys)
    }

    /// Delete every entry registered under the given tags, then drop the
    /// tag sets themselves. Entries go first: a concurrent reader sees the
    /// old entry or a clean miss, and a crash in between leaves only a
    /// dangling index entry, which self-heals as an ordinary miss.
    ///
    /// Returns the number of entries deleted.
    pub async fn clear_tags(&self, tags: &[String]) -> Result<u64, StoreError> {
        let keys = self.keys_for_tags(tags).await?;

        if !keys.is_empty() {
            let mut entries = WriteBatch::new();
            for key in &keys {
                entries.delete(key.clone());
            }
            self.store.commit(entries).await?;
        }

        let mut index = WriteBatch::new();
        for tag in tags {
            index.delete(self.tag_key(tag));
        }
        if !index.is_empty() {
            self.store.commit(index).await?;
        }

        debug!(tags = tags.len(), entries = keys.len(), "cleared tags");
        Ok(keys.len() as u64)
    }

    /// Discover every tracked tag by prefix scan and clear it, one bounded
    /// sweep at a time. Zero tags found is a no-op, not an error.
    ///
    /// Each sweep rescans from the start of the namespace because the
    /// previous sweep deleted everything it saw; the loop terminates once
    /// a scan comes back empty. Dropping the future cancels the flush
    /// between sweeps, and work already done is not rolled back.
    ///
    /// Returns the number of entries targeted across sweeps. A key whose
    /// tags land in different sweeps is targeted (and counted) once per
    /// sweep, so the total can exceed the number of distinct entries.
    pub async fn clear_all(&self) -> Result<u64, StoreError> {
        let mut cleared = 0u64;
        loop {
            let page = self.store.scan(&self.namespace, 0, FLUSH_BATCH).await?;
            if page.keys.is_empty() {
                break;
            }
            let tags: Vec<String> = page
                .keys
                .iter()
                .filter_map(|key| key.strip_prefix(&self.namespace))
                .map(str::to_string)
                .collect();
            cleared += self.clear_tags(&tags).await?;
        }
        debug!(entries = cleared, "flushed tag namespace");
        Ok(cleared)
    }
}
