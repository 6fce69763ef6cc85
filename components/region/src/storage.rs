// Copyright 2024 hearth
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::{
    fmt::{Debug, Formatter},
    fs,
    io::{self, Read},
    path::{Path, PathBuf},
};

use bytes::Bytes;
use hearth_common::{ChunkPos, RegionPos};
use snafu::{ensure, ResultExt};
use tracing::{debug, error, warn};

use crate::{
    cache::RecencyCache,
    codec::RegionCodec,
    config::{Config, RegionStorageInfo},
    err::{CloseRegionsSnafu, CreateRegionFolderSnafu, DecompressSnafu, Error, Result},
    region_file::RegionFile,
};

/// What to do with a chunk slot.
#[derive(Clone, PartialEq, Eq)]
pub enum WriteCommand {
    Write(Bytes),
    Delete,
}

impl WriteCommand {
    pub fn payload(&self) -> Option<&Bytes> {
        match self {
            WriteCommand::Write(data) => Some(data),
            WriteCommand::Delete => None,
        }
    }

    pub fn is_delete(&self) -> bool { matches!(self, WriteCommand::Delete) }
}

impl From<Option<Bytes>> for WriteCommand {
    fn from(value: Option<Bytes>) -> Self {
        value.map_or(WriteCommand::Delete, WriteCommand::Write)
    }
}

impl Debug for WriteCommand {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            WriteCommand::Write(data) => write!(f, "Write({} bytes)", data.len()),
            WriteCommand::Delete => write!(f, "Delete"),
        }
    }
}

/// The region files of one dimension folder, at most `max_open_regions` of
/// them open at a time.
pub struct RegionStorage {
    info:        RegionStorageInfo,
    folder:      PathBuf,
    extension:   String,
    /// `None` follows the process-wide selection at each region open.
    compression: Option<RegionCodec>,
    sync:        bool,
    regions:     RecencyCache<RegionPos, RegionFile>,
}

impl RegionStorage {
    pub fn new(config: &Config) -> Self {
        Self {
            info:        config.info.clone(),
            folder:      config.folder.clone(),
            extension:   config.extension.clone(),
            compression: config.compression,
            sync:        config.sync_writes,
            regions:     RecencyCache::new(config.max_open_regions.max(1)),
        }
    }

    pub fn info(&self) -> &RegionStorageInfo { &self.info }

    pub fn folder(&self) -> &Path { &self.folder }

    /// The codec a region file opened now would write with.
    pub fn codec(&self) -> RegionCodec { self.compression.unwrap_or_else(RegionCodec::selected) }

    pub fn open_region_count(&self) -> usize { self.regions.len() }

    /// Open regions from most to least recently used.
    pub fn open_regions(&self) -> Vec<RegionPos> { self.regions.keys_by_recency() }

    pub fn region_path(&self, region: RegionPos) -> PathBuf {
        self.folder.join(region.file_name(&self.extension))
    }

    /// Returns the region file of the chunk, opening or creating it.
    pub fn locate(&mut self, pos: ChunkPos) -> Result<&mut RegionFile> {
        let region = pos.region();
        let path = self.region_path(region);
        let folder = &self.folder;
        let (compression, sync) = (self.compression, self.sync);
        let info = &self.info;
        self.regions.get_or_try_insert_with(
            region,
            |evicted, file| {
                debug!("{} evicts region {}", info, evicted);
                file.close()
            },
            || {
                fs::create_dir_all(folder).context(CreateRegionFolderSnafu {
                    path: folder.clone(),
                })?;
                let codec = compression.unwrap_or_else(RegionCodec::selected);
                RegionFile::open(&path, folder, codec, sync)
            },
        )
    }

    /// Like [`RegionStorage::locate`], but never creates a missing file.
    fn locate_existing(&mut self, pos: ChunkPos) -> Result<Option<&mut RegionFile>> {
        let region = pos.region();
        if !self.regions.contains(&region) && !self.region_path(region).is_file() {
            return Ok(None);
        }
        self.locate(pos).map(Some)
    }

    pub fn read(&mut self, pos: ChunkPos) -> Result<Option<Bytes>> {
        let info = self.info.clone();
        let Some(region) = self.locate_existing(pos)? else {
            return Ok(None);
        };
        match region.read_chunk(pos) {
            Ok(data) => Ok(data.map(Bytes::from)),
            Err(e) => {
                error!("{} failed to read chunk {}: {}", info, pos, e);
                Err(e)
            }
        }
    }

    pub fn write(&mut self, pos: ChunkPos, command: &WriteCommand) -> Result<()> {
        match command {
            WriteCommand::Write(data) => self.locate(pos)?.write(pos, data),
            WriteCommand::Delete => match self.locate_existing(pos)? {
                Some(region) => region.clear(pos),
                None => Ok(()),
            },
        }
    }

    /// Hands a streaming reader over the chunk payload to `job`, or `None`
    /// when the chunk is absent.
    pub fn scan_chunk<F>(&mut self, pos: ChunkPos, job: F) -> Result<()>
    where
        F: FnOnce(Option<&mut dyn Read>) -> io::Result<()>,
    {
        let reader = match self.locate_existing(pos)? {
            Some(region) => region.chunk_data_reader(pos)?,
            None => None,
        };
        let res = match reader {
            Some(mut reader) => job(Some(reader.as_mut())),
            None => job(None),
        };
        res.context(DecompressSnafu { pos })
    }

    pub fn chunk_exists(&mut self, pos: ChunkPos) -> Result<bool> {
        Ok(match self.locate_existing(pos)? {
            Some(region) => region.chunk_exists(pos),
            None => false,
        })
    }

    /// Syncs every open region file.
    pub fn flush(&mut self) -> Result<()> {
        for region in self.regions.values_mut() {
            region.flush()?;
        }
        Ok(())
    }

    /// Closes every open region file, all of them are attempted even when
    /// some fail.
    pub fn close_all(&mut self) -> Result<()> {
        let mut errors: Vec<Error> = Vec::new();
        for (region, file) in self.regions.drain() {
            if let Err(e) = file.close() {
                warn!("{} failed to close region {}: {}", self.info, region, e);
                errors.push(e);
            }
        }
        ensure!(errors.is_empty(), CloseRegionsSnafu { errors });
        Ok(())
    }
}

impl Drop for RegionStorage {
    fn drop(&mut self) {
        if !self.regions.is_empty() {
            if let Err(e) = self.close_all() {
                error!("{} failed to close regions on drop: {}", self.info, e);
            }
        }
    }
}
