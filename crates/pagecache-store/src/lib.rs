//! Key-Value store abstraction and tag index for the page cache.
//!
//! This crate defines the storage contract the cache facade builds on:
//!
//! - [`KeyValueStore`] - the four primitives a backing store must provide
//!   (point read, atomic batch write, set read, prefix scan)
//! - [`WriteBatch`] - an atomic multi-key write
//! - [`TagIndex`] - the per-tag mapping from tags to cache keys
//! - [`MemoryStore`] - an in-memory driver for development and tests
//!
//! Real deployments implement [`KeyValueStore`] over a shared store such
//! as Redis; the cache never talks to the network itself.

mod error;
mod memory;
mod store;
mod tags;

pub use error::StoreError;
pub use memory::MemoryStore;
pub use store::{BatchOp, KeyValueStore, ScanPage, WriteBatch};
pub use tags::TagIndex;
