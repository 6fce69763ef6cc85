use hearth_common::LEGACY_REGION_CACHE_SIZE;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Shows up in logs and errors.
    pub name:                  String,
    pub region:                hearth_region::Config,
    /// How many regions keep their legacy chunk flags in memory.
    pub legacy_cache_capacity: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            name:                  "chunk".to_string(),
            region:                hearth_region::Config::default(),
            legacy_cache_capacity: LEGACY_REGION_CACHE_SIZE as u64,
        }
    }
}

impl WorkerConfig {
    pub fn new<S: Into<String>>(name: S, region: hearth_region::Config) -> Self {
        Self {
            name: name.into(),
            region,
            ..Default::default()
        }
    }
}
