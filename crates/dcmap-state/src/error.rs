//! Error types for the dcmap state store.

use thiserror::Error;

/// Result type alias for state store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur during state store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to open database: {0}")]
    Open(String),

    #[error("table missing: {0}")]
    BucketMissing(String),

    #[error("transaction error: {0}")]
    Transaction(String),

    #[error("table error: {0}")]
    Table(String),

    #[error("read error: {0}")]
    Read(String),

    #[error("write error: {0}")]
    Write(String),

    #[error("serialization error: {0}")]
    Encode(String),

    #[error("deserialization error: {0}")]
    Decode(String),

    #[error("seed source error: {0}")]
    Seed(String),

    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("{kind} already exists: {id}")]
    AlreadyExists { kind: &'static str, id: String },

    #[error("store is closed")]
    Closed,

    #[error("timed out waiting for pending writes")]
    Timeout,
}

impl StoreError {
    pub(crate) fn datacenter_not_found(id: &str) -> Self {
        Self::NotFound {
            kind: "datacenter",
            id: id.to_string(),
        }
    }

    pub(crate) fn vm_not_found(id: &str) -> Self {
        Self::NotFound {
            kind: "vm",
            id: id.to_string(),
        }
    }

    pub(crate) fn migration_not_found(id: &str) -> Self {
        Self::NotFound {
            kind: "migration",
            id: id.to_string(),
        }
    }

    /// True for lookup misses, which callers are expected to handle.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// Map a redb table-open error, keeping a missing table distinguishable.
pub(crate) fn table_err(e: redb::TableError) -> StoreError {
    match e {
        redb::TableError::TableDoesNotExist(name) => StoreError::BucketMissing(name),
        other => StoreError::Table(other.to_string()),
    }
}
