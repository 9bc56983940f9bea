//! Built-in demo dataset, the last resort of the seeding pipeline.

use crate::types::{Coordinates, Datacenter, Vm, VmStatus};

#[allow(clippy::too_many_arguments)]
fn vm(
    id: &str,
    name: &str,
    status: VmStatus,
    cpu: u32,
    memory: u64,
    disk: u64,
    cluster: &str,
    ip: &str,
    node_name: &str,
) -> Vm {
    let running = status == VmStatus::Running;
    Vm {
        id: id.to_string(),
        name: name.to_string(),
        status,
        cpu,
        memory,
        disk,
        cluster: cluster.to_string(),
        namespace: "default".to_string(),
        phase: if running { "Running" } else { "Stopped" }.to_string(),
        ip: ip.to_string(),
        node_name: node_name.to_string(),
        ready: running,
        age: "3d".to_string(),
        last_migrated_at: None,
    }
}

/// Two datacenters, five VMs, one of them stopped.
pub fn sample_datacenters() -> Vec<Datacenter> {
    vec![
        Datacenter {
            id: "dc-stockholm-north".to_string(),
            name: "Stockholm North".to_string(),
            location: "Kista, Stockholm".to_string(),
            coordinates: Coordinates::new(59.4036, 17.9441),
            clusters: vec!["sthlm-north-1".to_string()],
            vms: vec![
                vm(
                    "vm-001",
                    "web-frontend-1",
                    VmStatus::Running,
                    4,
                    8192,
                    100,
                    "sthlm-north-1",
                    "10.10.0.11",
                    "kista-node-1",
                ),
                vm(
                    "vm-002",
                    "api-gateway",
                    VmStatus::Running,
                    2,
                    4096,
                    50,
                    "sthlm-north-1",
                    "10.10.0.12",
                    "kista-node-1",
                ),
                vm(
                    "vm-003",
                    "postgres-primary",
                    VmStatus::Running,
                    8,
                    16384,
                    500,
                    "sthlm-north-1",
                    "10.10.0.13",
                    "kista-node-2",
                ),
            ],
        },
        Datacenter {
            id: "dc-solna".to_string(),
            name: "Solna".to_string(),
            location: "Solna, Stockholm".to_string(),
            coordinates: Coordinates::new(59.3600, 18.0009),
            clusters: vec!["solna-1".to_string()],
            vms: vec![
                vm(
                    "vm-004",
                    "batch-worker",
                    VmStatus::Running,
                    4,
                    8192,
                    200,
                    "solna-1",
                    "10.20.0.21",
                    "solna-node-1",
                ),
                vm(
                    "vm-005",
                    "legacy-reporting",
                    VmStatus::Stopped,
                    2,
                    2048,
                    80,
                    "solna-1",
                    "10.20.0.22",
                    "solna-node-2",
                ),
            ],
        },
    ]
}
