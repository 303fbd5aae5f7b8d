//! In-memory store driver for development and tests.

use std::collections::{BTreeSet, HashMap};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Instant;

use async_trait::async_trait;

use crate::error::StoreError;
use crate::store::{BatchOp, KeyValueStore, ScanPage, WriteBatch};

/// A slot holds either an opaque value or a set of strings, mirroring the
/// two key shapes the cache uses (entries and tag index sets).
#[derive(Debug, Clone)]
enum Slot {
    Value {
        bytes: Vec<u8>,
        expires_at: Option<Instant>,
    },
    Set(BTreeSet<String>),
}

impl Slot {
    fn is_expired(&self, now: Instant) -> bool {
        match self {
            Slot::Value {
                expires_at: Some(at),
                ..
            } => *at <= now,
            _ => false,
        }
    }
}

/// HashMap-backed [`KeyValueStore`].
///
/// A batch commit holds the write lock for the whole batch, which gives
/// the atomicity the cache relies on. Expiry is lazy: expired values read
/// as absent and are replaced by the next write that touches their key.
///
/// Scan cursors are offsets into the sorted key list, so keys removed
/// between pages can shift later pages. Callers that delete what they
/// scan should restart from cursor `0` after each sweep (the tag index
/// does exactly that).
#[derive(Default)]
pub struct MemoryStore {
    slots: RwLock<HashMap<String, Slot>>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live keys, ignoring expiry.
    pub fn len(&self) -> usize {
        self.read().len()
    }

    /// Whether the store holds no keys.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // Lock poisoning only happens if a holder panicked; the map itself is
    // still usable, so recover the guard instead of propagating the panic.
    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Slot>> {
        self.slots.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, Slot>> {
        self.slots.write().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let slots = self.read();
        match slots.get(key) {
            Some(slot) if slot.is_expired(Instant::now()) => Ok(None),
            Some(Slot::Value { bytes, .. }) => Ok(Some(bytes.clone())),
            _ => Ok(None),
        }
    }

    async fn commit(&self, batch: WriteBatch) -> Result<(), StoreError> {
        let now = Instant::now();
        let mut slots = self.write();
        for op in batch.into_ops() {
            match op {
                BatchOp::Put { key, value, ttl } => {
                    slots.insert(
                        key,
                        Slot::Value {
                            bytes: value,
                            expires_at: ttl.map(|t| now + t),
                        },
                    );
                }
                BatchOp::AddToSet { key, members } => {
                    let slot = slots
                        .entry(key)
                        .or_insert_with(|| Slot::Set(BTreeSet::new()));
                    match slot {
                        Slot::Set(set) => set.extend(members),
                        // A value slot under a set key is a namespacing bug
                        // upstream; replacing it keeps the index authoritative.
                        other => *other = Slot::Set(members.into_iter().collect()),
                    }
                }
                BatchOp::Delete { key } => {
                    slots.remove(&key);
                }
            }
        }
        Ok(())
    }

    async fn set_members(&self, key: &str) -> Result<Vec<String>, StoreError> {
        let slots = self.read();
        match slots.get(key) {
            Some(Slot::Set(set)) => Ok(set.iter().cloned().collect()),
            _ => Ok(Vec::new()),
        }
    }

    async fn scan(
        &self,
        prefix: &str,
        cursor: u64,
        limit: usize,
    ) -> Result<ScanPage, StoreError> {
        let now = Instant::now();
        let slots = self.read();
        let mut matching: Vec<&String> = slots
            .iter()
            .filter(|(key, slot)| key.starts_with(prefix) && !slot.is_expired(now))
            .map(|(key, _)| key)
            .collect();
        matching.sort();

        let offset = usize::try_from(cursor).map_err(|_| StoreError::InvalidCursor(cursor))?;
        if offset > matching.len() {
            return Err(StoreError::InvalidCursor(cursor));
        }

        let end = matching.len().min(offset + limit.max(1));
        let keys = matching[offset..end].iter().map(|k| k.to_string()).collect();
        let cursor = if end < matching.len() {
            Some(end as u64)
        } else {
            None
        };
        Ok(ScanPage { keys, cursor })
    }
}
