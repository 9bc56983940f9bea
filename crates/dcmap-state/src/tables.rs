//! redb table definitions for the dcmap state store.
//!
//! Both tables use `&str` keys and `&[u8]` values holding JSON.

use redb::TableDefinition;

/// Whole-collection snapshot, stored under [`COLLECTION_KEY`].
pub const DATACENTERS: TableDefinition<&str, &[u8]> = TableDefinition::new("datacenters");

/// Migration ledger keyed by migration ID.
pub const MIGRATIONS: TableDefinition<&str, &[u8]> = TableDefinition::new("migrations");

/// The single key in [`DATACENTERS`].
pub const COLLECTION_KEY: &str = "collection";
