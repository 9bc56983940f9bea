//! Store integration tests: on-disk persistence, seeding precedence and
//! concurrent mutation.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::Barrier;
use std::thread;
use std::time::Duration;

use dcmap_state::*;

fn isolated_sources(dir: &Path) -> SeedSources {
    SeedSources {
        seed_file: None,
        search_dirs: vec![dir.join("nothing-here")],
    }
}

fn test_vm(id: &str) -> Vm {
    Vm {
        id: id.to_string(),
        name: format!("worker-{id}"),
        cpu: 2,
        memory: 2048,
        disk: 20,
        ..Vm::default()
    }
}

fn write_seed(path: &Path, dc_id: &str) {
    fs::write(
        path,
        format!(
            "datacenters:\n  - id: {dc_id}\n    name: {dc_id}\n    vms:\n      - id: {dc_id}-vm\n        name: seeded\n"
        ),
    )
    .unwrap();
}

// ── Seeding ────────────────────────────────────────────────────────

#[test]
fn explicit_seed_wins_over_discovered_config() {
    let dir = tempfile::tempdir().unwrap();
    let config_dir = dir.path().join("config");
    fs::create_dir_all(&config_dir).unwrap();
    write_seed(&config_dir.join("datacenters.yaml"), "dc-discovered");
    let seed = dir.path().join("operator-seed.yaml");
    write_seed(&seed, "dc-explicit");

    let store = Store::open(
        &dir.path().join("db/dcmap.redb"),
        &SeedSources {
            seed_file: Some(seed.clone()),
            search_dirs: vec![config_dir],
        },
    )
    .unwrap();

    let dcs = store.get_datacenters();
    assert_eq!(dcs.len(), 1);
    assert_eq!(dcs[0].id, "dc-explicit");
    assert_eq!(store.seeded_from(), Some(&SeedOrigin::SeedFile(seed)));
}

#[test]
fn discovered_config_used_without_seed_file() {
    let dir = tempfile::tempdir().unwrap();
    let frontend = dir.path().join("frontend/public");
    fs::create_dir_all(&frontend).unwrap();
    fs::write(
        frontend.join("datacenters.json"),
        r#"{"datacenters": [{"id": "dc-json", "name": "From JSON"}]}"#,
    )
    .unwrap();

    let store = Store::open(
        &dir.path().join("dcmap.redb"),
        &SeedSources {
            seed_file: None,
            search_dirs: vec![dir.path().join("config"), frontend.clone()],
        },
    )
    .unwrap();

    assert_eq!(store.get_datacenters()[0].id, "dc-json");
    assert_eq!(
        store.seeded_from(),
        Some(&SeedOrigin::Discovered(frontend.join("datacenters.json")))
    );
}

#[test]
fn nothing_to_discover_yields_sample_set() {
    let dir = tempfile::tempdir().unwrap();
    let store = Store::open(&dir.path().join("dcmap.redb"), &isolated_sources(dir.path())).unwrap();

    let dcs = store.get_datacenters();
    assert_eq!(dcs.len(), 2);
    assert_eq!(dcs[0].id, "dc-stockholm-north");
    assert_eq!(dcs[0].vms.len(), 3);
    assert_eq!(dcs[1].id, "dc-solna");
    assert_eq!(dcs[1].vms.len(), 2);
    let stopped = dcs[1]
        .vms
        .iter()
        .filter(|vm| vm.status == VmStatus::Stopped)
        .count();
    assert_eq!(stopped, 1);
}

#[test]
fn unopenable_path_is_an_open_error() {
    let dir = tempfile::tempdir().unwrap();
    let blocker = dir.path().join("file");
    fs::write(&blocker, "not a directory").unwrap();

    let result = Store::open(&blocker.join("dcmap.redb"), &isolated_sources(dir.path()));
    assert!(matches!(result, Err(StoreError::Open(_))));
}

// ── Persistence ────────────────────────────────────────────────────

#[test]
fn reopen_restores_state_without_reseeding() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("dcmap.redb");

    {
        let store = Store::open(&db_path, &isolated_sources(dir.path())).unwrap();
        store
            .migrate_vm("vm-002", "dc-stockholm-north", "dc-solna")
            .unwrap();
        store
            .add_migration(Migration {
                id: "m-1".to_string(),
                vm_name: "api-gateway".to_string(),
                source_datacenter: "dc-stockholm-north".to_string(),
                target_datacenter: "dc-solna".to_string(),
                completed: true,
                status: MigrationStatus::Succeeded,
                ..Migration::default()
            })
            .unwrap();
        store.close().unwrap();
    }

    // A seed file now present must not override stored data.
    let seed = dir.path().join("seed.yaml");
    write_seed(&seed, "dc-late");
    let store = Store::open(
        &db_path,
        &SeedSources {
            seed_file: Some(seed),
            search_dirs: Vec::new(),
        },
    )
    .unwrap();

    assert_eq!(store.seeded_from(), None);
    let solna = store.get_datacenter("dc-solna").unwrap();
    let moved = solna.vms.iter().find(|vm| vm.id == "vm-002").unwrap();
    assert!(moved.last_migrated_at.is_some());
    assert_eq!(store.get_migration("m-1").unwrap().status, MigrationStatus::Succeeded);
}

#[test]
fn unreadable_snapshot_triggers_reseed() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("dcmap.redb");
    {
        let db = redb::Database::create(&db_path).unwrap();
        let txn = db.begin_write().unwrap();
        {
            let mut table = txn.open_table(tables::DATACENTERS).unwrap();
            table
                .insert(tables::COLLECTION_KEY, b"not json".as_slice())
                .unwrap();
        }
        txn.commit().unwrap();
    }

    let store = Store::open(&db_path, &isolated_sources(dir.path())).unwrap();
    assert_eq!(store.seeded_from(), Some(&SeedOrigin::Sample));
    assert_eq!(store.get_datacenters().len(), 2);
}

#[test]
fn on_disk_snapshot_ends_at_latest_logical_state() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("dcmap.redb");

    let store = Store::open(&db_path, &isolated_sources(dir.path())).unwrap();
    for i in 0..200 {
        store
            .update_datacenter(
                "dc-solna",
                DatacenterUpdate {
                    name: Some(format!("Solna rev {i}")),
                    ..DatacenterUpdate::default()
                },
            )
            .unwrap();
    }
    store.flush_timeout(Duration::from_secs(10)).unwrap();
    store.close().unwrap();
    drop(store);

    let reopened = Store::open(&db_path, &isolated_sources(dir.path())).unwrap();
    assert_eq!(reopened.get_datacenter("dc-solna").unwrap().name, "Solna rev 199");
}

#[test]
fn concurrent_writers_never_regress_the_stored_snapshot() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("dcmap.redb");
    let store = Store::open(&db_path, &isolated_sources(dir.path())).unwrap();

    let threads: Vec<_> = (0..4)
        .map(|t| {
            let store = store.clone();
            thread::spawn(move || {
                for i in 0..50 {
                    store.add_vm("dc-solna", test_vm(&format!("vm-{t}-{i}"))).unwrap();
                }
            })
        })
        .collect();
    for handle in threads {
        handle.join().unwrap();
    }

    let in_memory = store.get_datacenters();
    store.close().unwrap();
    drop(store);

    let reopened = Store::open(&db_path, &isolated_sources(dir.path())).unwrap();
    assert_eq!(reopened.get_datacenters(), in_memory);
}

#[test]
fn watcher_config_replaces_skeleton() {
    let dir = tempfile::tempdir().unwrap();
    let store = Store::open(&dir.path().join("dcmap.redb"), &isolated_sources(dir.path())).unwrap();

    let watcher = dir.path().join("watcher.yaml");
    fs::write(
        &watcher,
        r#"
datacenters:
  - id: dc-kind-east
    name: Kind East
    location: Lab rack 1
    coordinates: { latitude: 59.33, longitude: 18.07 }
    clusters:
      - name: kind-east
        kubeconfig: /tmp/kind-east.yaml
"#,
    )
    .unwrap();

    store.initialize_from_watcher_config(&watcher).unwrap();
    let dcs = store.get_datacenters();
    assert_eq!(dcs.len(), 1);
    assert_eq!(dcs[0].clusters, vec!["kind-east"]);
    assert!(dcs[0].vms.is_empty());

    store.add_vm("dc-kind-east", test_vm("vm-k1")).unwrap();
    assert_eq!(store.get_datacenter("dc-kind-east").unwrap().vms.len(), 1);

    let missing: PathBuf = dir.path().join("missing.yaml");
    assert!(matches!(
        store.initialize_from_watcher_config(&missing),
        Err(StoreError::Seed(_))
    ));
    assert_eq!(store.get_datacenters().len(), 1);
}

// ── Concurrency ────────────────────────────────────────────────────

#[test]
fn parallel_add_vm_loses_no_updates() {
    const N: usize = 64;
    let dir = tempfile::tempdir().unwrap();
    let store = Store::open_in_memory(&isolated_sources(dir.path())).unwrap();
    let barrier = Arc::new(Barrier::new(N));

    let handles: Vec<_> = (0..N)
        .map(|i| {
            let store = store.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait();
                store.add_vm("dc-stockholm-north", test_vm(&format!("vm-par-{i}")))
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap().unwrap();
    }

    let dc = store.get_datacenter("dc-stockholm-north").unwrap();
    assert_eq!(dc.vms.len(), 3 + N);
    for i in 0..N {
        let id = format!("vm-par-{i}");
        assert!(dc.vms.iter().any(|vm| vm.id == id), "missing {id}");
    }
}

#[test]
fn readers_run_alongside_writers() {
    let dir = tempfile::tempdir().unwrap();
    let store = Store::open_in_memory(&isolated_sources(dir.path())).unwrap();

    let writer = {
        let store = store.clone();
        thread::spawn(move || {
            for i in 0..100 {
                store.add_vm("dc-solna", test_vm(&format!("vm-w-{i}"))).unwrap();
            }
        })
    };
    let reader = {
        let store = store.clone();
        thread::spawn(move || {
            let mut last = 0;
            for _ in 0..100 {
                let count = store.get_datacenter("dc-solna").unwrap().vms.len();
                assert!(count >= last, "VM count went backwards");
                last = count;
            }
        })
    };

    writer.join().unwrap();
    reader.join().unwrap();
    assert_eq!(store.get_datacenter("dc-solna").unwrap().vms.len(), 102);
}
