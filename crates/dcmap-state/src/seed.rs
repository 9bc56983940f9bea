//! Seeding pipeline: populates an empty store on first start.
//!
//! Sources are tried in order and the first one that yields a non-empty,
//! well-formed collection wins:
//!
//! 1. an explicit seed file given by the operator,
//! 2. `datacenters.{yaml,yml,json,toml}` in each search directory,
//! 3. the built-in sample dataset.
//!
//! Seed documents may be YAML, JSON or TOML. Field names are matched
//! case-insensitively with `_` and `-` ignored, so `node_name`, `NodeName`
//! and `nodeName` are all accepted.
//!
//! Datacenter fields of a seed document can be overridden from the
//! environment with `DCMAP_DATACENTERS__<ID>__<FIELD>[__<SUBFIELD>]`, for
//! example `DCMAP_DATACENTERS__DC_SOLNA__COORDINATES__LATITUDE=59.36`.

use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::error::{StoreError, StoreResult};
use crate::sample::sample_datacenters;
use crate::types::{Coordinates, Datacenter};

/// Base name looked up in every search directory.
pub const SEED_FILE_STEM: &str = "datacenters";

/// Extensions tried, in order, for discovered seed files.
pub const SEED_EXTENSIONS: &[&str] = &["yaml", "yml", "json", "toml"];

/// Prefix of environment variables overriding seed document fields.
pub const SEED_ENV_PREFIX: &str = "DCMAP_DATACENTERS__";

/// Conventional locations searched when no explicit seed file is given.
pub fn default_search_dirs() -> Vec<PathBuf> {
    vec![
        PathBuf::from("config"),
        PathBuf::from("frontend/public"),
        PathBuf::from("."),
    ]
}

/// Where to look for seed data.
#[derive(Debug, Clone)]
pub struct SeedSources {
    pub seed_file: Option<PathBuf>,
    pub search_dirs: Vec<PathBuf>,
}

impl Default for SeedSources {
    fn default() -> Self {
        Self {
            seed_file: None,
            search_dirs: default_search_dirs(),
        }
    }
}

/// Which source populated the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SeedOrigin {
    SeedFile(PathBuf),
    Discovered(PathBuf),
    Sample,
}

impl fmt::Display for SeedOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SeedFile(path) => write!(f, "seed file {}", path.display()),
            Self::Discovered(path) => write!(f, "discovered config {}", path.display()),
            Self::Sample => f.write_str("built-in sample data"),
        }
    }
}

/// Run the fallback chain. Never fails: the sample dataset is always there.
pub fn resolve(sources: &SeedSources) -> (Vec<Datacenter>, SeedOrigin) {
    if let Some(path) = &sources.seed_file {
        match load_seed_file(path) {
            Ok(datacenters) => {
                info!(path = %path.display(), count = datacenters.len(), "seeded from seed file");
                return (datacenters, SeedOrigin::SeedFile(path.clone()));
            }
            Err(e) => warn!(path = %path.display(), error = %e, "seed file unusable, falling back"),
        }
    }

    for candidate in discovery_candidates(&sources.search_dirs) {
        if !candidate.is_file() {
            continue;
        }
        match load_seed_file(&candidate) {
            Ok(datacenters) => {
                info!(path = %candidate.display(), count = datacenters.len(), "seeded from discovered config");
                return (datacenters, SeedOrigin::Discovered(candidate));
            }
            Err(e) => warn!(path = %candidate.display(), error = %e, "discovered config unusable"),
        }
    }

    info!("no seed source found, using built-in sample data");
    (sample_datacenters(), SeedOrigin::Sample)
}

fn discovery_candidates(search_dirs: &[PathBuf]) -> impl Iterator<Item = PathBuf> + '_ {
    search_dirs.iter().flat_map(|dir| {
        SEED_EXTENSIONS
            .iter()
            .map(move |ext| dir.join(format!("{SEED_FILE_STEM}.{ext}")))
    })
}

/// Load and validate a collection from a seed document.
pub fn load_seed_file(path: &Path) -> StoreResult<Vec<Datacenter>> {
    let vars = std::env::vars_os()
        .filter_map(|(key, value)| Some((key.into_string().ok()?, value.into_string().ok()?)));
    load_seed_file_with_env(path, vars)
}

fn load_seed_file_with_env(
    path: &Path,
    vars: impl IntoIterator<Item = (String, String)>,
) -> StoreResult<Vec<Datacenter>> {
    let document = read_document(path)?;
    let mut list = match document {
        Value::Object(mut map) if map.contains_key(SEED_FILE_STEM) => map
            .remove(SEED_FILE_STEM)
            .unwrap_or(Value::Array(Vec::new())),
        other => other,
    };
    apply_env_overrides(&mut list, vars);
    let datacenters: Vec<Datacenter> = from_value(list)?;
    if datacenters.is_empty() {
        return Err(StoreError::Seed(format!(
            "{} contains no datacenters",
            path.display()
        )));
    }
    validate_collection(&datacenters)?;
    debug!(path = %path.display(), count = datacenters.len(), "seed document decoded");
    Ok(datacenters)
}

/// Check the uniqueness invariants for datacenter and VM IDs.
pub fn validate_collection(datacenters: &[Datacenter]) -> StoreResult<()> {
    let mut dc_ids = HashSet::new();
    let mut vm_ids = HashSet::new();
    for dc in datacenters {
        if !dc_ids.insert(dc.id.as_str()) {
            return Err(StoreError::Decode(format!("duplicate datacenter id {}", dc.id)));
        }
        for vm in &dc.vms {
            if !vm_ids.insert(vm.id.as_str()) {
                return Err(StoreError::Decode(format!("duplicate vm id {}", vm.id)));
            }
        }
    }
    Ok(())
}

/// Overlay `DCMAP_DATACENTERS__*` variables onto the decoded document.
///
/// The first segment after the prefix selects a datacenter by ID, matched
/// the same way field names are. The remaining segments name a field path.
/// A value replacing a string stays a string; anything else is read as
/// JSON and falls back to a string.
fn apply_env_overrides(list: &mut Value, vars: impl IntoIterator<Item = (String, String)>) {
    let Value::Array(datacenters) = list else {
        return;
    };
    for (key, raw) in vars {
        let Some(rest) = key.strip_prefix(SEED_ENV_PREFIX) else {
            continue;
        };
        let mut segments = rest.split("__");
        let dc_id = fold(segments.next().unwrap_or_default());
        let field_path: Vec<String> = segments.map(|s| canonical_key(s.to_string())).collect();
        if field_path.is_empty() || !field_path.iter().all(|f| KNOWN_FIELDS.contains(&f.as_str())) {
            warn!(variable = %key, "environment override names no known field");
            continue;
        }
        let target = datacenters.iter_mut().find(|dc| {
            dc.get("id")
                .and_then(Value::as_str)
                .is_some_and(|id| fold(id) == dc_id)
        });
        match target.map(|dc| set_path(dc, &field_path, &raw)) {
            Some(true) => {
                debug!(variable = %key, "seed field overridden from environment");
            }
            _ => warn!(variable = %key, "environment override matches no datacenter"),
        }
    }
}

fn set_path(node: &mut Value, path: &[String], raw: &str) -> bool {
    let Value::Object(map) = node else {
        return false;
    };
    match path {
        [] => false,
        [field] => {
            let value = match map.get(field) {
                Some(Value::String(_)) => Value::String(raw.to_string()),
                _ => serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string())),
            };
            map.insert(field.clone(), value);
            true
        }
        [field, rest @ ..] => set_path(
            map.entry(field.clone())
                .or_insert_with(|| Value::Object(Map::new())),
            rest,
            raw,
        ),
    }
}

// ── Watcher configuration ─────────────────────────────────────────

/// Cluster layout used by the VM watcher: datacenters and the clusters
/// backing them, without any VMs.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct WatcherConfig {
    pub datacenters: Vec<WatcherDatacenter>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct WatcherDatacenter {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub coordinates: Coordinates,
    #[serde(default)]
    pub clusters: Vec<WatcherCluster>,
}

/// A cluster entry, either a bare name or a table with connection details.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum WatcherCluster {
    Name(String),
    Detailed {
        name: String,
        #[serde(default)]
        kubeconfig: Option<String>,
        #[serde(default)]
        context: Option<String>,
    },
}

impl WatcherCluster {
    pub fn name(&self) -> &str {
        match self {
            Self::Name(name) | Self::Detailed { name, .. } => name,
        }
    }
}

impl WatcherConfig {
    pub fn from_file(path: &Path) -> StoreResult<Self> {
        from_value(read_document(path)?)
    }

    /// Datacenters with deduplicated cluster names and empty VM lists.
    pub fn into_skeleton(self) -> Vec<Datacenter> {
        self.datacenters
            .into_iter()
            .map(|dc| {
                let mut clusters: Vec<String> = Vec::with_capacity(dc.clusters.len());
                for cluster in &dc.clusters {
                    if !clusters.iter().any(|c| c == cluster.name()) {
                        clusters.push(cluster.name().to_string());
                    }
                }
                Datacenter {
                    id: dc.id,
                    name: dc.name,
                    location: dc.location,
                    coordinates: dc.coordinates,
                    clusters,
                    vms: Vec::new(),
                }
            })
            .collect()
    }
}

// ── Format-agnostic document reader ───────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Format {
    Yaml,
    Json,
    Toml,
}

impl Format {
    /// Unknown extensions are read as YAML, which also accepts JSON.
    fn from_path(path: &Path) -> Self {
        match path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .as_deref()
        {
            Some("json") => Self::Json,
            Some("toml") => Self::Toml,
            _ => Self::Yaml,
        }
    }
}

fn read_document(path: &Path) -> StoreResult<Value> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| StoreError::Seed(format!("{}: {e}", path.display())))?;
    let parsed: Value = match Format::from_path(path) {
        Format::Json => serde_json::from_str(&content).map_err(|e| decode_err(path, e))?,
        Format::Yaml => serde_yaml::from_str(&content).map_err(|e| decode_err(path, e))?,
        Format::Toml => {
            let table: toml::Table = toml::from_str(&content).map_err(|e| decode_err(path, e))?;
            toml_to_json(toml::Value::Table(table))
        }
    };
    Ok(normalize_keys(parsed))
}

/// TOML datetimes become RFC 3339 strings, which is how timestamps are
/// read everywhere else.
fn toml_to_json(value: toml::Value) -> Value {
    match value {
        toml::Value::String(s) => Value::String(s),
        toml::Value::Integer(i) => Value::from(i),
        toml::Value::Float(f) => serde_json::Number::from_f64(f).map_or(Value::Null, Value::Number),
        toml::Value::Boolean(b) => Value::Bool(b),
        toml::Value::Datetime(dt) => Value::String(dt.to_string()),
        toml::Value::Array(items) => Value::Array(items.into_iter().map(toml_to_json).collect()),
        toml::Value::Table(table) => Value::Object(
            table
                .into_iter()
                .map(|(k, v)| (k, toml_to_json(v)))
                .collect::<Map<_, _>>(),
        ),
    }
}

fn decode_err(path: &Path, e: impl fmt::Display) -> StoreError {
    StoreError::Decode(format!("{}: {e}", path.display()))
}

fn from_value<T: DeserializeOwned>(value: Value) -> StoreResult<T> {
    serde_json::from_value(value).map_err(|e| StoreError::Decode(e.to_string()))
}

/// Every field name a seed or watcher document may carry, in wire form.
const KNOWN_FIELDS: &[&str] = &[
    "datacenters",
    "id",
    "name",
    "location",
    "coordinates",
    "latitude",
    "longitude",
    "clusters",
    "vms",
    "status",
    "cpu",
    "memory",
    "disk",
    "cluster",
    "namespace",
    "phase",
    "ip",
    "nodeName",
    "ready",
    "age",
    "lastMigratedAt",
    "kubeconfig",
    "context",
];

fn fold(key: &str) -> String {
    key.chars()
        .filter(char::is_ascii_alphanumeric)
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

fn canonical_key(key: String) -> String {
    let folded = fold(&key);
    KNOWN_FIELDS
        .iter()
        .find(|field| fold(field) == folded)
        .map(|field| field.to_string())
        .unwrap_or(key)
}

fn normalize_keys(value: Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(k, v)| (canonical_key(k), normalize_keys(v)))
                .collect::<Map<_, _>>(),
        ),
        Value::Array(items) => Value::Array(items.into_iter().map(normalize_keys).collect()),
        other => other,
    }
}
