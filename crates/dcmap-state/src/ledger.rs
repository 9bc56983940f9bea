//! Migration ledger — one redb entry per migration, keyed by ID.
//!
//! The ledger is independent of the collection: it has no lock of its own
//! beyond redb's write serialization and is never updated by `migrate_vm`.
//! Pairing a VM move with its ledger record is the caller's job.

use chrono::Utc;
use redb::{ReadableDatabase, ReadableTable};
use tracing::{debug, warn};

use crate::codec::{decode_migration, encode_migration};
use crate::error::{StoreError, StoreResult, table_err};
use crate::store::Store;
use crate::tables::MIGRATIONS;
use crate::types::Migration;

impl Store {
    /// Insert a migration record, replacing any record with the same ID.
    ///
    /// Missing timestamps are stamped with the current time.
    pub fn add_migration(&self, mut migration: Migration) -> StoreResult<Migration> {
        let now = Utc::now();
        migration.created_at.get_or_insert(now);
        migration.updated_at.get_or_insert(now);
        self.put_migration(&migration)?;
        debug!(id = %migration.id, vm = %migration.vm_name, "migration added");
        Ok(migration)
    }

    /// Overwrite a migration record and stamp `updated_at`.
    ///
    /// Last write wins. A record that does not exist yet is created, and an
    /// unset `created_at` is carried over from the stored record.
    pub fn update_migration(&self, mut migration: Migration) -> StoreResult<Migration> {
        let db = self.db()?;
        let now = Utc::now();
        migration.updated_at = Some(now);

        let txn = db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(MIGRATIONS).map_err(table_err)?;
            if migration.created_at.is_none() {
                let previous = table
                    .get(migration.id.as_str())
                    .map_err(map_err!(Read))?
                    .and_then(|guard| decode_migration(guard.value()).ok());
                migration.created_at = Some(previous.and_then(|p| p.created_at).unwrap_or(now));
            }
            let value = encode_migration(&migration)?;
            table
                .insert(migration.id.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(id = %migration.id, status = ?migration.status, "migration updated");
        Ok(migration)
    }

    pub fn get_migration(&self, id: &str) -> StoreResult<Migration> {
        let db = self.db()?;
        let txn = db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(MIGRATIONS).map_err(table_err)?;
        match table.get(id).map_err(map_err!(Read))? {
            Some(guard) => decode_migration(guard.value()),
            None => Err(StoreError::migration_not_found(id)),
        }
    }

    /// All migration records, in key order. Undecodable records are skipped.
    pub fn get_all_migrations(&self) -> StoreResult<Vec<Migration>> {
        self.scan_migrations(|_| true)
    }

    /// Records whose datacenter, source or target is `datacenter_id`.
    pub fn get_migrations_by_datacenter(&self, datacenter_id: &str) -> StoreResult<Vec<Migration>> {
        self.scan_migrations(|m| m.touches_datacenter(datacenter_id))
    }

    pub fn get_migrations_by_vm(&self, vm_name: &str) -> StoreResult<Vec<Migration>> {
        self.scan_migrations(|m| m.vm_name == vm_name)
    }

    /// Records not marked completed, whatever their status says.
    pub fn get_active_migrations(&self) -> StoreResult<Vec<Migration>> {
        self.scan_migrations(|m| !m.completed)
    }

    pub fn remove_migration(&self, id: &str) -> StoreResult<()> {
        let db = self.db()?;
        let txn = db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut table = txn.open_table(MIGRATIONS).map_err(table_err)?;
            existed = table.remove(id).map_err(map_err!(Write))?.is_some();
        }
        txn.commit().map_err(map_err!(Transaction))?;
        if !existed {
            return Err(StoreError::migration_not_found(id));
        }
        debug!(%id, "migration removed");
        Ok(())
    }

    fn put_migration(&self, migration: &Migration) -> StoreResult<()> {
        let db = self.db()?;
        let value = encode_migration(migration)?;
        let txn = db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(MIGRATIONS).map_err(table_err)?;
            table
                .insert(migration.id.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    fn scan_migrations(&self, keep: impl Fn(&Migration) -> bool) -> StoreResult<Vec<Migration>> {
        let db = self.db()?;
        let txn = db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(MIGRATIONS).map_err(table_err)?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (key, value) = entry.map_err(map_err!(Read))?;
            match decode_migration(value.value()) {
                Ok(migration) if keep(&migration) => results.push(migration),
                Ok(_) => {}
                Err(e) => warn!(key = key.value(), error = %e, "skipping unreadable migration record"),
            }
        }
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::seed::SeedSources;
    use crate::tables::MIGRATIONS;
    use crate::types::MigrationStatus;

    fn test_store() -> Store {
        Store::open_in_memory(&SeedSources {
            seed_file: None,
            search_dirs: Vec::new(),
        })
        .unwrap()
    }

    fn test_migration(id: &str, vm: &str, from: &str, to: &str) -> Migration {
        Migration {
            id: id.to_string(),
            vm_name: vm.to_string(),
            datacenter_id: from.to_string(),
            source_datacenter: from.to_string(),
            target_datacenter: to.to_string(),
            ..Migration::default()
        }
    }

    #[test]
    fn add_and_get() {
        let store = test_store();
        let added = store
            .add_migration(test_migration("m-1", "web-frontend-1", "dc-stockholm-north", "dc-solna"))
            .unwrap();
        assert!(added.created_at.is_some());
        assert_eq!(added.created_at, added.updated_at);

        assert_eq!(store.get_migration("m-1").unwrap(), added);
        assert!(store.get_migration("m-2").unwrap_err().is_not_found());
    }

    #[test]
    fn add_with_same_id_overwrites() {
        let store = test_store();
        store
            .add_migration(test_migration("m-1", "first", "a", "b"))
            .unwrap();
        let mut second = test_migration("m-1", "second", "c", "d");
        second.phase = "copying disks".to_string();
        store.add_migration(second).unwrap();

        let got = store.get_migration("m-1").unwrap();
        assert_eq!(got.vm_name, "second");
        assert_eq!(got.phase, "copying disks");
        assert_eq!(store.get_all_migrations().unwrap().len(), 1);
    }

    #[test]
    fn update_stamps_and_keeps_creation_time() {
        let store = test_store();
        let added = store
            .add_migration(test_migration("m-1", "vm", "a", "b"))
            .unwrap();

        let mut changed = test_migration("m-1", "vm", "a", "b");
        changed.status = MigrationStatus::Running;
        let updated = store.update_migration(changed).unwrap();

        assert_eq!(updated.created_at, added.created_at);
        assert!(updated.updated_at >= added.updated_at);
        assert_eq!(store.get_migration("m-1").unwrap().status, MigrationStatus::Running);
    }

    #[test]
    fn filters_by_datacenter_and_vm() {
        let store = test_store();
        store.add_migration(test_migration("m-1", "web", "a", "b")).unwrap();
        store.add_migration(test_migration("m-2", "db", "b", "c")).unwrap();
        store.add_migration(test_migration("m-3", "web", "c", "a")).unwrap();

        let ids = |ms: Vec<Migration>| ms.into_iter().map(|m| m.id).collect::<Vec<_>>();
        assert_eq!(ids(store.get_migrations_by_datacenter("a").unwrap()), vec!["m-1", "m-3"]);
        assert_eq!(ids(store.get_migrations_by_datacenter("b").unwrap()), vec!["m-1", "m-2"]);
        assert_eq!(ids(store.get_migrations_by_vm("web").unwrap()), vec!["m-1", "m-3"]);
        assert!(store.get_migrations_by_vm("nope").unwrap().is_empty());
    }

    #[test]
    fn active_means_not_completed_regardless_of_status() {
        let store = test_store();
        let statuses = [
            MigrationStatus::Pending,
            MigrationStatus::Running,
            MigrationStatus::Succeeded,
            MigrationStatus::Failed,
        ];
        let mut expected = Vec::new();
        for (i, status) in statuses.iter().enumerate() {
            for completed in [false, true] {
                let id = format!("m-{i}-{completed}");
                let mut m = test_migration(&id, "vm", "a", "b");
                m.status = *status;
                m.completed = completed;
                store.add_migration(m).unwrap();
                if !completed {
                    expected.push(id);
                }
            }
        }

        let mut active: Vec<String> = store
            .get_active_migrations()
            .unwrap()
            .into_iter()
            .map(|m| m.id)
            .collect();
        active.sort();
        expected.sort();
        assert_eq!(active, expected);
        assert_eq!(active.len(), statuses.len());
    }

    #[test]
    fn remove() {
        let store = test_store();
        store.add_migration(test_migration("m-1", "vm", "a", "b")).unwrap();
        store.remove_migration("m-1").unwrap();
        assert!(store.get_migration("m-1").unwrap_err().is_not_found());
        assert!(store.remove_migration("m-1").unwrap_err().is_not_found());
    }

    #[test]
    fn corrupt_record_is_skipped_by_scans() {
        let store = test_store();
        store.add_migration(test_migration("m-1", "vm", "a", "b")).unwrap();
        store.add_migration(test_migration("m-3", "vm", "a", "b")).unwrap();

        let db = store.db().unwrap();
        let txn = db.begin_write().unwrap();
        {
            let mut table = txn.open_table(MIGRATIONS).unwrap();
            table.insert("m-2", b"{broken".as_slice()).unwrap();
        }
        txn.commit().unwrap();

        let all = store.get_all_migrations().unwrap();
        assert_eq!(all.iter().map(|m| m.id.as_str()).collect::<Vec<_>>(), vec!["m-1", "m-3"]);
        assert_eq!(store.get_active_migrations().unwrap().len(), 2);
        assert!(matches!(store.get_migration("m-2"), Err(StoreError::Decode(_))));
    }

    #[test]
    fn ledger_is_unavailable_after_close() {
        let store = test_store();
        store.close().unwrap();
        assert!(matches!(store.get_all_migrations(), Err(StoreError::Closed)));
        assert!(matches!(
            store.add_migration(test_migration("m-1", "vm", "a", "b")),
            Err(StoreError::Closed)
        ));
    }
}
