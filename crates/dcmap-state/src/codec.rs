//! JSON encoding for collection snapshots and ledger records.

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::{StoreError, StoreResult};
use crate::types::{Datacenter, Migration};

/// Serialized form of the whole collection at one point in time.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot(Vec<u8>);

impl Snapshot {
    /// Serialize the collection. Called while the writer lock is held.
    pub fn capture(datacenters: &[Datacenter]) -> StoreResult<Self> {
        encode(&datacenters).map(Self)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    #[cfg(test)]
    fn restore(&self) -> StoreResult<Vec<Datacenter>> {
        decode_collection(&self.0)
    }
}

pub fn decode_collection(bytes: &[u8]) -> StoreResult<Vec<Datacenter>> {
    decode(bytes)
}

pub fn encode_migration(migration: &Migration) -> StoreResult<Vec<u8>> {
    encode(migration)
}

pub fn decode_migration(bytes: &[u8]) -> StoreResult<Migration> {
    decode(bytes)
}

fn encode<T: Serialize + ?Sized>(value: &T) -> StoreResult<Vec<u8>> {
    serde_json::to_vec(value).map_err(|e| StoreError::Encode(e.to_string()))
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> StoreResult<T> {
    serde_json::from_slice(bytes).map_err(|e| StoreError::Decode(e.to_string()))
}
