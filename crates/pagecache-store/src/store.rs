//! Key-Value store abstraction.
//!
//! The cache pushes every coordination invariant into the store's atomic
//! primitives: an entry write and its tag registrations travel in one
//! [`WriteBatch`], and invalidation deletes entries before index sets so a
//! concurrent reader sees either the old entry or a clean miss.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::StoreError;

/// A single operation inside an atomic write batch.
#[derive(Debug, Clone)]
pub enum BatchOp {
    /// Store a value under a key, with optional expiry.
    Put {
        key: String,
        value: Vec<u8>,
        ttl: Option<Duration>,
    },
    /// Add members to the set stored at a key, creating it if absent.
    AddToSet { key: String, members: Vec<String> },
    /// Delete a key, whether it holds a value or a set.
    Delete { key: String },
}

/// An ordered group of operations the driver applies atomically.
#[derive(Debug, Clone, Default)]
pub struct WriteBatch {
    ops: Vec<BatchOp>,
}

impl WriteBatch {
    /// Create an empty batch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a value write.
    pub fn put(
        &mut self,
        key: impl Into<String>,
        value: Vec<u8>,
        ttl: Option<Duration>,
    ) -> &mut Self {
        self.ops.push(BatchOp::Put {
            key: key.into(),
            value,
            ttl,
        });
        self
    }

    /// Queue a set-union write.
    pub fn add_to_set(&mut self, key: impl Into<String>, members: Vec<String>) -> &mut Self {
        self.ops.push(BatchOp::AddToSet {
            key: key.into(),
            members,
        });
        self
    }

    /// Queue a deletion.
    pub fn delete(&mut self, key: impl Into<String>) -> &mut Self {
        self.ops.push(BatchOp::Delete { key: key.into() });
        self
    }

    /// Whether the batch contains no operations.
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Number of queued operations.
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    /// The queued operations, in commit order.
    pub fn ops(&self) -> &[BatchOp] {
        &self.ops
    }

    /// Consume the batch, yielding its operations.
    pub fn into_ops(self) -> Vec<BatchOp> {
        self.ops
    }
}

/// One page of a prefix scan.
#[derive(Debug, Clone)]
pub struct ScanPage {
    /// Keys matching the prefix in this page.
    pub keys: Vec<String>,
    /// Cursor for the next page; `None` when the scan is complete.
    pub cursor: Option<u64>,
}

/// A durable or shared mapping from string keys to opaque blobs, with
/// optional per-key expiry and atomic multi-key writes.
///
/// Implementations must apply a [`WriteBatch`] atomically: concurrent
/// readers observe all of its operations or none of them. These four
/// primitives are everything the cache needs from a backing store.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Point read. Expired entries behave as absent.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;

    /// Apply every operation in `batch` atomically, in order.
    async fn commit(&self, batch: WriteBatch) -> Result<(), StoreError>;

    /// Read the members of the set stored at `key`. A missing key reads
    /// as an empty set.
    async fn set_members(&self, key: &str) -> Result<Vec<String>, StoreError>;

    /// Enumerate keys starting with `prefix`, at most `limit` per page.
    /// Pass cursor `0` to start and follow [`ScanPage::cursor`] until it
    /// is `None`. A scan is restartable only from the beginning.
    async fn scan(&self, prefix: &str, cursor: u64, limit: usize)
        -> Result<ScanPage, StoreError>;
}
