use std::{
    fmt::{Display, Formatter},
    path::{Path, PathBuf},
};

use hearth_common::{DEFAULT_REGION_EXTENSION, MAX_OPEN_REGIONS, REGION_FOLDER};
use serde::{Deserialize, Serialize};

use crate::codec::RegionCodec;

/// Labels a region storage in logs and error reports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegionStorageInfo {
    pub level:     String,
    pub dimension: String,
    /// What kind of data the regions hold, e.g. `chunk` or `entities`.
    pub kind:      String,
}

impl Default for RegionStorageInfo {
    fn default() -> Self {
        Self {
            level:     "world".to_string(),
            dimension: "overworld".to_string(),
            kind:      "chunk".to_string(),
        }
    }
}

impl Display for RegionStorageInfo {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.level, self.dimension, self.kind)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// The folder holding the region files, `<dimension-root>/region`.
    pub folder:           PathBuf,
    pub extension:        String,
    /// The codec for new writes, the process wide selection when unset.
    pub compression:      Option<RegionCodec>,
    /// Sync the data to the disk after every header update.
    pub sync_writes:      bool,
    /// How many region files can be open at the same time.
    pub max_open_regions: usize,
    pub info:             RegionStorageInfo,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            folder:           PathBuf::from("/tmp/hearth.world").join(REGION_FOLDER),
            extension:        DEFAULT_REGION_EXTENSION.to_string(),
            compression:      None,
            sync_writes:      false,
            max_open_regions: MAX_OPEN_REGIONS,
            info:             RegionStorageInfo::default(),
        }
    }
}

impl Config {
    /// A config storing regions under `<dimension_root>/region`.
    pub fn for_dimension<P: AsRef<Path>>(dimension_root: P) -> Self {
        Self {
            folder: dimension_root.as_ref().join(REGION_FOLDER),
            ..Default::default()
        }
    }

    pub fn with_compression(mut self, codec: RegionCodec) -> Self {
        self.compression = Some(codec);
        self
    }

    pub fn with_max_open_regions(mut self, max_open_regions: usize) -> Self {
        self.max_open_regions = max_open_regions;
        self
    }

    pub fn with_info(mut self, info: RegionStorageInfo) -> Self {
        self.info = info;
        self
    }

    pub fn codec(&self) -> RegionCodec { self.compression.unwrap_or_else(RegionCodec::selected) }
}
