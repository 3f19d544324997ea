//! YAML configuration: named clusters, migration defaults, gateway block.

use std::collections::HashMap;

use anyhow::{anyhow, Context, Result};
use esbridge_core::ClusterDescriptor;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct Config {
    pub clusters: HashMap<String, ClusterDescriptor>,
    #[serde(default)]
    pub migrate: MigrateSection,
    #[serde(default)]
    pub gateway: Option<GatewaySection>,
}

/// Migration defaults; zero values collapse to the engine defaults.
#[derive(Debug, Default, Deserialize)]
pub struct MigrateSection {
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub target: String,
    #[serde(default)]
    pub parallelism: usize,
    #[serde(default)]
    pub scroll_size: u32,
    #[serde(default)]
    pub scroll_time: u32,
    #[serde(default)]
    pub slice_size: u32,
    #[serde(default)]
    pub buffer_count: usize,
    #[serde(default)]
    pub write_parallel: usize,
    #[serde(default)]
    pub write_size: usize,
    #[serde(default)]
    pub compare_parallel: usize,
    #[serde(default = "default_true")]
    pub ignore_system_index: bool,
}

#[derive(Debug, Deserialize)]
pub struct GatewaySection {
    pub address: String,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub password: String,
    pub source: String,
    pub target: String,
    /// Name of the cluster that serves reads; must be `source` or `target`.
    pub master: String,
}

fn default_true() -> bool {
    true
}

impl Config {
    pub fn load(path: &std::path::Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let config: Config = serde_yaml::from_str(&raw)
            .with_context(|| format!("parsing config {}", path.display()))?;
        Ok(config)
    }

    pub fn cluster(&self, name: &str) -> Result<ClusterDescriptor> {
        self.clusters
            .get(name)
            .cloned()
            .ok_or_else(|| anyhow!("config has no cluster named {name}"))
    }
}
