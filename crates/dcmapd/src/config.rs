//! dcmapd.toml configuration.
//!
//! Values are layered: built-in defaults, then the TOML file (if any), then
//! `DCMAP_*` environment variables, then command-line flags.

use std::path::{Path, PathBuf};

use dcmap_state::SeedSources;
use dcmap_state::seed::default_search_dirs;
use serde::{Deserialize, Serialize};

pub const ENV_DATA_DIR: &str = "DCMAP_DATA_DIR";
pub const ENV_SEED_FILE: &str = "DCMAP_SEED_FILE";
pub const ENV_SEARCH_DIRS: &str = "DCMAP_SEARCH_DIRS";
pub const ENV_WATCHER_CONFIG: &str = "DCMAP_WATCHER_CONFIG";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DaemonConfig {
    /// Directory holding the database file.
    pub data_dir: PathBuf,
    /// Database file name inside `data_dir`.
    pub db_file: String,
    /// Operator-provided seed document, tried before discovery.
    pub seed_file: Option<PathBuf>,
    /// Directories searched for `datacenters.*`.
    pub search_dirs: Vec<PathBuf>,
    /// VM watcher layout applied after the store opens.
    pub watcher_config: Option<PathBuf>,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            db_file: "dcmap.redb".to_string(),
            seed_file: None,
            search_dirs: default_search_dirs(),
            watcher_config: None,
        }
    }
}

impl DaemonConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: DaemonConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Defaults or the given file, overlaid with the process environment.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Overlay values found through `lookup` (normally `std::env::var`).
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.is_empty());
        if let Some(dir) = non_empty(ENV_DATA_DIR) {
            self.data_dir = PathBuf::from(dir);
        }
        if let Some(seed) = non_empty(ENV_SEED_FILE) {
            self.seed_file = Some(PathBuf::from(seed));
        }
        if let Some(dirs) = non_empty(ENV_SEARCH_DIRS) {
            self.search_dirs = std::env::split_paths(&dirs).collect();
        }
        if let Some(watcher) = non_empty(ENV_WATCHER_CONFIG) {
            self.watcher_config = Some(PathBuf::from(watcher));
        }
    }

    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join(&self.db_file)
    }

    pub fn seed_sources(&self) -> SeedSources {
        SeedSources {
            seed_file: self.seed_file.clone(),
            search_dirs: self.search_dirs.clone(),
        }
    }
}
