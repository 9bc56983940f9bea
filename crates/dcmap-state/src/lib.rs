//! dcmap-state — persistent state store for the datacenter map.
//!
//! Keeps the datacenter/VM collection in memory behind a reader/writer lock
//! and mirrors it into [redb](https://docs.rs/redb). Migration records live
//! in a separate ledger table, one JSON record per key.
//!
//! # Architecture
//!
//! Mutations take the exclusive lock, change the in-memory collection,
//! serialize the whole collection and hand the bytes to a single writer
//! thread before releasing the lock. Callers observe success as soon as the
//! in-memory change is made; the durable write follows in capture order.
//! Durability failures are logged, never returned.
//!
//! On first start (no stored snapshot) the collection is seeded from an
//! explicit seed file, then from `datacenters.*` in the search directories,
//! then from a built-in sample dataset.
//!
//! [`Store`] is `Clone` + `Send` + `Sync` and is meant to be handed to every
//! collaborator (HTTP layer, VM watcher) explicitly.

/// Convert any `Display` error into a `StoreError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| $crate::error::StoreError::$variant(e.to_string())
    };
}

pub mod codec;
pub mod error;
mod journal;
mod ledger;
pub mod sample;
pub mod seed;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{StoreError, StoreResult};
pub use seed::{SeedOrigin, SeedSources, WatcherConfig};
pub use store::Store;
pub use types::*;
