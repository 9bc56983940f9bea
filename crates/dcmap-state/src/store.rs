//! Store — the in-memory datacenter collection with write-through to redb.
//!
//! Every mutator follows the same discipline: take the exclusive lock,
//! change the collection, serialize it and queue the snapshot, release the
//! lock. The caller sees the result before the snapshot reaches disk.

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use chrono::Utc;
use redb::{Database, ReadableDatabase};
use tracing::{debug, error, info, warn};

use crate::codec::{Snapshot, decode_collection};
use crate::error::{StoreError, StoreResult, table_err};
use crate::journal::{Journal, JournalWorker, SnapshotSink, write_snapshot};
use crate::sample::sample_datacenters;
use crate::seed::{self, SeedOrigin, SeedSources, WatcherConfig};
use crate::tables::*;
use crate::types::*;

/// Shared handle on the state store.
#[derive(Clone)]
pub struct Store {
    inner: Arc<Inner>,
}

struct Inner {
    collection: RwLock<Collection>,
    worker: Mutex<Option<JournalWorker>>,
    /// Taken by `close`; ledger operations fail with `Closed` afterwards.
    db: RwLock<Option<Arc<Database>>>,
    seeded_from: Option<SeedOrigin>,
}

struct Collection {
    datacenters: Vec<Datacenter>,
    /// `None` once the store is closed.
    journal: Option<Journal>,
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Store {
    /// Open (or create) a persistent store at the given path, seeding it
    /// if it holds no collection yet.
    pub fn open(path: &Path, sources: &SeedSources) -> StoreResult<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(map_err!(Open))?;
        }
        let db = Database::create(path).map_err(map_err!(Open))?;
        debug!(?path, "database opened");
        Self::from_database(db, sources)
    }

    /// Create an ephemeral in-memory store (for testing).
    pub fn open_in_memory(sources: &SeedSources) -> StoreResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        debug!("in-memory database opened");
        Self::from_database(db, sources)
    }

    fn from_database(db: Database, sources: &SeedSources) -> StoreResult<Self> {
        ensure_tables(&db)?;

        let (datacenters, seeded_from) = match load_collection(&db)? {
            Some(datacenters) => {
                info!(count = datacenters.len(), "loaded stored collection");
                (datacenters, None)
            }
            None => {
                let (datacenters, origin) = seed::resolve(sources);
                write_snapshot(&db, &Snapshot::capture(&datacenters)?)?;
                info!(count = datacenters.len(), source = %origin, "store seeded");
                (datacenters, Some(origin))
            }
        };

        let db = Arc::new(db);
        Self::assemble(db.clone(), datacenters, seeded_from, db)
    }

    /// Wire the collection to a journal writing into `sink`.
    fn assemble(
        db: Arc<Database>,
        datacenters: Vec<Datacenter>,
        seeded_from: Option<SeedOrigin>,
        sink: impl SnapshotSink,
    ) -> StoreResult<Self> {
        let (journal, worker) = Journal::spawn(sink)?;
        Ok(Self {
            inner: Arc::new(Inner {
                collection: RwLock::new(Collection {
                    datacenters,
                    journal: Some(journal),
                }),
                worker: Mutex::new(Some(worker)),
                db: RwLock::new(Some(db)),
                seeded_from,
            }),
        })
    }

    /// The source that seeded this store, or `None` when an existing
    /// collection was loaded from disk.
    pub fn seeded_from(&self) -> Option<&SeedOrigin> {
        self.inner.seeded_from.as_ref()
    }

    pub(crate) fn db(&self) -> StoreResult<Arc<Database>> {
        read(&self.inner.db).clone().ok_or(StoreError::Closed)
    }

    /// Apply `op` under the exclusive lock and queue the resulting snapshot.
    ///
    /// The snapshot is queued before the lock is released so the writer sees
    /// snapshots in mutation order. A failed `op` queues nothing.
    fn mutate<T>(&self, op: impl FnOnce(&mut Vec<Datacenter>) -> StoreResult<T>) -> StoreResult<T> {
        let mut guard = write(&self.inner.collection);
        let Collection {
            datacenters,
            journal,
        } = &mut *guard;
        let journal = journal.as_ref().ok_or(StoreError::Closed)?;

        let result = op(datacenters)?;

        match Snapshot::capture(datacenters) {
            Ok(snapshot) => {
                if let Err(e) = journal.submit(snapshot) {
                    warn!(error = %e, "snapshot not queued");
                }
            }
            Err(e) => error!(error = %e, "snapshot capture failed"),
        }
        Ok(result)
    }

    // ── Datacenters ────────────────────────────────────────────────

    /// Owned copy of the whole collection.
    pub fn get_datacenters(&self) -> Vec<Datacenter> {
        read(&self.inner.collection).datacenters.clone()
    }

    /// Owned copy of one datacenter.
    pub fn get_datacenter(&self, id: &str) -> StoreResult<Datacenter> {
        read(&self.inner.collection)
            .datacenters
            .iter()
            .find(|dc| dc.id == id)
            .cloned()
            .ok_or_else(|| StoreError::datacenter_not_found(id))
    }

    /// Change name, location and/or coordinates of a datacenter.
    pub fn update_datacenter(&self, id: &str, update: DatacenterUpdate) -> StoreResult<Datacenter> {
        self.mutate(|dcs| {
            let dc = find_datacenter(dcs, id)?;
            update.apply(dc);
            debug!(%id, "datacenter updated");
            Ok(dc.clone())
        })
    }

    // ── VMs ────────────────────────────────────────────────────────

    /// Append a VM to a datacenter. VM IDs must be unique across all
    /// datacenters.
    pub fn add_vm(&self, datacenter_id: &str, vm: Vm) -> StoreResult<Vm> {
        self.mutate(|dcs| {
            find_datacenter(dcs, datacenter_id)?;
            if dcs.iter().any(|dc| dc.vm_index(&vm.id).is_some()) {
                return Err(StoreError::AlreadyExists {
                    kind: "vm",
                    id: vm.id,
                });
            }
            let dc = find_datacenter(dcs, datacenter_id)?;
            debug!(%datacenter_id, vm_id = %vm.id, "vm added");
            dc.vms.push(vm.clone());
            Ok(vm)
        })
    }

    pub fn remove_vm(&self, datacenter_id: &str, vm_id: &str) -> StoreResult<()> {
        self.mutate(|dcs| {
            let dc = find_datacenter(dcs, datacenter_id)?;
            let index = dc
                .vm_index(vm_id)
                .ok_or_else(|| StoreError::vm_not_found(vm_id))?;
            dc.vms.remove(index);
            debug!(%datacenter_id, %vm_id, "vm removed");
            Ok(())
        })
    }

    /// Apply a partial update to a VM.
    pub fn update_vm(&self, datacenter_id: &str, vm_id: &str, update: VmUpdate) -> StoreResult<Vm> {
        self.mutate(|dcs| {
            let vm = find_vm(dcs, datacenter_id, vm_id)?;
            update.apply(vm);
            Ok(vm.clone())
        })
    }

    /// Replace every field of a VM except its ID with the given payload.
    pub fn update_vm_complete(&self, datacenter_id: &str, vm_id: &str, payload: Vm) -> StoreResult<Vm> {
        self.mutate(|dcs| {
            let vm = find_vm(dcs, datacenter_id, vm_id)?;
            vm.replace_with(payload);
            Ok(vm.clone())
        })
    }

    /// Move a VM between datacenters and stamp `last_migrated_at`.
    ///
    /// Both ends are resolved before anything is touched: an unknown VM,
    /// source or target leaves the collection unchanged.
    pub fn migrate_vm(&self, vm_id: &str, from: &str, to: &str) -> StoreResult<Vm> {
        self.mutate(|dcs| {
            let mut source_seen = false;
            let mut source = None;
            let mut target = None;
            for (i, dc) in dcs.iter().enumerate() {
                if dc.id == from {
                    source_seen = true;
                    source = dc.vm_index(vm_id).map(|j| (i, j));
                }
                if dc.id == to {
                    target = Some(i);
                }
            }

            if !source_seen {
                return Err(StoreError::datacenter_not_found(from));
            }
            let (source_dc, vm_index) = source.ok_or_else(|| StoreError::vm_not_found(vm_id))?;
            let target_dc = target.ok_or_else(|| StoreError::datacenter_not_found(to))?;

            let mut vm = dcs[source_dc].vms.remove(vm_index);
            vm.last_migrated_at = Some(Utc::now());
            dcs[target_dc].vms.push(vm.clone());
            info!(%vm_id, %from, %to, "vm migrated");
            Ok(vm)
        })
    }

    // ── Bulk replacement ───────────────────────────────────────────

    /// Replace the collection with the built-in sample dataset.
    pub fn initialize_with_sample_data(&self) -> StoreResult<()> {
        self.mutate(|dcs| {
            *dcs = sample_datacenters();
            info!("collection reset to sample data");
            Ok(())
        })
    }

    /// Replace the collection with the datacenter skeleton described by a
    /// watcher config. The watcher fills in VMs afterwards.
    ///
    /// A config describing no datacenters is rejected and the collection
    /// is left as it was.
    pub fn initialize_from_watcher_config(&self, path: &Path) -> StoreResult<()> {
        let skeleton = WatcherConfig::from_file(path)?.into_skeleton();
        if skeleton.is_empty() {
            return Err(StoreError::Seed(format!(
                "{} describes no datacenters",
                path.display()
            )));
        }
        seed::validate_collection(&skeleton)?;
        self.mutate(|dcs| {
            info!(path = %path.display(), count = skeleton.len(), "collection initialized from watcher config");
            *dcs = skeleton;
            Ok(())
        })
    }

    // ── Lifecycle ──────────────────────────────────────────────────

    /// Block until every snapshot queued so far is on disk.
    pub fn flush(&self) -> StoreResult<()> {
        self.journal()?.flush(None)
    }

    /// Like [`flush`](Self::flush), giving up after `timeout`.
    pub fn flush_timeout(&self, timeout: Duration) -> StoreResult<()> {
        self.journal()?.flush(Some(timeout))
    }

    fn journal(&self) -> StoreResult<Journal> {
        read(&self.inner.collection)
            .journal
            .clone()
            .ok_or(StoreError::Closed)
    }

    /// Write pending snapshots, stop the writer and release the database.
    ///
    /// Reads keep working on the in-memory collection; mutations and ledger
    /// operations return [`StoreError::Closed`]. Closing twice is a no-op.
    pub fn close(&self) -> StoreResult<()> {
        let journal = write(&self.inner.collection).journal.take();
        let worker = lock(&self.inner.worker).take();
        if let (Some(journal), Some(worker)) = (journal, worker) {
            journal.shutdown(worker);
        }
        if write(&self.inner.db).take().is_some() {
            info!("store closed");
        }
        Ok(())
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        let journal = self
            .collection
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .journal
            .take();
        let worker = self
            .worker
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let (Some(journal), Some(worker)) = (journal, worker) {
            journal.shutdown(worker);
        }
    }
}

fn find_datacenter<'a>(dcs: &'a mut [Datacenter], id: &str) -> StoreResult<&'a mut Datacenter> {
    dcs.iter_mut()
        .find(|dc| dc.id == id)
        .ok_or_else(|| StoreError::datacenter_not_found(id))
}

fn find_vm<'a>(dcs: &'a mut [Datacenter], datacenter_id: &str, vm_id: &str) -> StoreResult<&'a mut Vm> {
    find_datacenter(dcs, datacenter_id)?
        .vms
        .iter_mut()
        .find(|vm| vm.id == vm_id)
        .ok_or_else(|| StoreError::vm_not_found(vm_id))
}

/// Create both tables if they don't exist yet.
fn ensure_tables(db: &Database) -> StoreResult<()> {
    let txn = db.begin_write().map_err(map_err!(Transaction))?;
    // Opening a table in a write transaction creates it if absent.
    txn.open_table(DATACENTERS).map_err(table_err)?;
    txn.open_table(MIGRATIONS).map_err(table_err)?;
    txn.commit().map_err(map_err!(Transaction))?;
    Ok(())
}

/// Read the stored collection. An undecodable snapshot counts as absent.
fn load_collection(db: &Database) -> StoreResult<Option<Vec<Datacenter>>> {
    let txn = db.begin_read().map_err(map_err!(Transaction))?;
    let table = txn.open_table(DATACENTERS).map_err(table_err)?;
    let Some(guard) = table.get(COLLECTION_KEY).map_err(map_err!(Read))? else {
        return Ok(None);
    };
    match decode_collection(guard.value()) {
        Ok(datacenters) => Ok(Some(datacenters)),
        Err(e) => {
            warn!(error = %e, "stored collection unreadable, reseeding");
            Ok(None)
        }
    }
}
