//! Domain types for the dcmap state store.
//!
//! Datacenters own their VMs; the whole list is persisted as one JSON
//! snapshot. Migrations live in their own table, one record per key.
//! Wire names are camelCase to match what the map UI consumes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Unique identifier for a datacenter.
pub type DatacenterId = String;

/// Unique identifier for a VM (unique across the whole collection).
pub type VmId = String;

/// Caller-assigned identifier for a migration record.
pub type MigrationId = String;

// ── Datacenter ────────────────────────────────────────────────────

/// Geographic position used to place a datacenter on the map.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Default)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinates {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }
}

/// A datacenter and the VMs currently placed in it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Datacenter {
    pub id: DatacenterId,
    pub name: String,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub coordinates: Coordinates,
    /// Names of the clusters backing this datacenter.
    #[serde(default)]
    pub clusters: Vec<String>,
    #[serde(default)]
    pub vms: Vec<Vm>,
}

impl Datacenter {
    pub(crate) fn vm_index(&self, vm_id: &str) -> Option<usize> {
        self.vms.iter().position(|vm| vm.id == vm_id)
    }
}

/// Partial update for a datacenter. `None` leaves the field untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DatacenterUpdate {
    pub name: Option<String>,
    pub location: Option<String>,
    pub coordinates: Option<Coordinates>,
}

impl DatacenterUpdate {
    pub(crate) fn apply(self, dc: &mut Datacenter) {
        if let Some(name) = self.name {
            dc.name = name;
        }
        if let Some(location) = self.location {
            dc.location = location;
        }
        if let Some(coordinates) = self.coordinates {
            dc.coordinates = coordinates;
        }
    }
}

// ── VM ────────────────────────────────────────────────────────────

/// Coarse lifecycle state shown on the map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum VmStatus {
    #[default]
    Running,
    Stopped,
    Starting,
    Migrating,
}

/// A virtual machine placed in a datacenter.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct Vm {
    pub id: VmId,
    pub name: String,
    #[serde(default)]
    pub status: VmStatus,
    /// CPU cores.
    #[serde(default)]
    pub cpu: u32,
    /// Memory in MB.
    #[serde(default)]
    pub memory: u64,
    /// Disk in GB.
    #[serde(default)]
    pub disk: u64,
    #[serde(default)]
    pub cluster: String,
    #[serde(default)]
    pub namespace: String,
    #[serde(default)]
    pub phase: String,
    #[serde(default)]
    pub ip: String,
    #[serde(default)]
    pub node_name: String,
    #[serde(default)]
    pub ready: bool,
    #[serde(default)]
    pub age: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_migrated_at: Option<DateTime<Utc>>,
}

/// Partial update for a VM. `None` leaves the field untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VmUpdate {
    pub name: Option<String>,
    pub status: Option<VmStatus>,
    pub cpu: Option<u32>,
    pub memory: Option<u64>,
    pub disk: Option<u64>,
    pub cluster: Option<String>,
    pub namespace: Option<String>,
    pub phase: Option<String>,
    pub ip: Option<String>,
    pub node_name: Option<String>,
    pub ready: Option<bool>,
    pub age: Option<String>,
}

impl VmUpdate {
    pub(crate) fn apply(self, vm: &mut Vm) {
        fn set<T>(slot: &mut T, value: Option<T>) {
            if let Some(value) = value {
                *slot = value;
            }
        }
        set(&mut vm.name, self.name);
        set(&mut vm.status, self.status);
        set(&mut vm.cpu, self.cpu);
        set(&mut vm.memory, self.memory);
        set(&mut vm.disk, self.disk);
        set(&mut vm.cluster, self.cluster);
        set(&mut vm.namespace, self.namespace);
        set(&mut vm.phase, self.phase);
        set(&mut vm.ip, self.ip);
        set(&mut vm.node_name, self.node_name);
        set(&mut vm.ready, self.ready);
        set(&mut vm.age, self.age);
    }
}

impl Vm {
    /// Overwrite every field except `id` from a full payload.
    ///
    /// A payload without `last_migrated_at` keeps the recorded one, since
    /// watcher payloads never carry it.
    pub(crate) fn replace_with(&mut self, payload: Vm) {
        let last_migrated_at = payload.last_migrated_at.or(self.last_migrated_at);
        let id = std::mem::take(&mut self.id);
        *self = Vm {
            id,
            last_migrated_at,
            ..payload
        };
    }
}

// ── Migration ─────────────────────────────────────────────────────

/// Lifecycle status of a simulated VM move.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MigrationStatus {
    #[default]
    Pending,
    Running,
    Succeeded,
    Failed,
}

/// Ledger record for one VM migration.
///
/// `status` and `completed` are set independently; nothing keeps them in
/// agreement.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct Migration {
    pub id: MigrationId,
    pub vm_name: String,
    #[serde(default)]
    pub datacenter_id: DatacenterId,
    #[serde(default)]
    pub source_datacenter: DatacenterId,
    #[serde(default)]
    pub target_datacenter: DatacenterId,
    #[serde(default)]
    pub status: MigrationStatus,
    /// Free-form progress label.
    #[serde(default)]
    pub phase: String,
    #[serde(default)]
    pub completed: bool,
    /// Human-readable duration (e.g. "42s").
    #[serde(default)]
    pub duration: String,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Migration {
    /// Whether this record concerns the given datacenter on either side.
    pub fn touches_datacenter(&self, datacenter_id: &str) -> bool {
        self.datacenter_id == datacenter_id
            || self.source_datacenter == datacenter_id
            || self.target_datacenter == datacenter_id
    }
}
