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

use std::fmt::{Display, Formatter};

/// The side length of a region in chunks.
pub const REGION_SIZE: i32 = 32;
pub const REGION_BITS: i32 = 5;
pub const REGION_MASK: i32 = REGION_SIZE - 1;
/// The number of chunks in a region.
pub const CHUNK_COUNT: usize = (REGION_SIZE * REGION_SIZE) as usize;

pub const SECTOR_BYTES: usize = 4096; // 4 KiB
pub const SECTOR_INTS: usize = SECTOR_BYTES / 4;
// offset table + timestamp table
pub const HEADER_BYTES: usize = SECTOR_BYTES * 2; // 8 KiB
pub const HEADER_SECTORS: u32 = 2;

/// Entry sub-header: u32 length + u8 codec id.
pub const CHUNK_HEADER_SIZE: usize = 5;
/// The sector count is stored in 8 bits, anything bigger lives in an
/// external file.
pub const MAX_INLINE_SECTORS: u32 = 255;

pub const DEFAULT_REGION_EXTENSION: &str = "mca";
pub const EXTERNAL_FILE_EXTENSION: &str = "mcc";
pub const REGION_FOLDER: &str = "region";

pub const MAX_OPEN_REGIONS: usize = 256;
pub const LEGACY_REGION_CACHE_SIZE: usize = 1024;

pub fn sectors_for(bytes: usize) -> u32 { bytes.div_ceil(SECTOR_BYTES) as u32 }

/// A chunk position in chunk coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChunkPos {
    pub x: i32,
    pub z: i32,
}

impl ChunkPos {
    pub const fn new(x: i32, z: i32) -> Self { Self { x, z } }

    pub const fn region_x(&self) -> i32 { self.x >> REGION_BITS }

    pub const fn region_z(&self) -> i32 { self.z >> REGION_BITS }

    pub const fn region(&self) -> RegionPos { RegionPos::new(self.region_x(), self.region_z()) }

    pub const fn region_local_x(&self) -> i32 { self.x & REGION_MASK }

    pub const fn region_local_z(&self) -> i32 { self.z & REGION_MASK }

    /// The slot of this chunk in its region's header tables, in [0, 1024).
    pub const fn region_local_index(&self) -> usize {
        (self.region_local_x() + self.region_local_z() * REGION_SIZE) as usize
    }

    /// The file name of the external file holding an oversized chunk.
    pub fn external_file_name(&self) -> String {
        format!("c.{}.{}.{}", self.x, self.z, EXTERNAL_FILE_EXTENSION)
    }
}

impl Display for ChunkPos {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}, {}]", self.x, self.z)
    }
}

/// A region position, every region holds a 32x32 grid of chunks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RegionPos {
    pub x: i32,
    pub z: i32,
}

impl RegionPos {
    pub const fn new(x: i32, z: i32) -> Self { Self { x, z } }

    pub const fn min_chunk(&self) -> ChunkPos {
        ChunkPos::new(self.x << REGION_BITS, self.z << REGION_BITS)
    }

    pub const fn max_chunk(&self) -> ChunkPos {
        ChunkPos::new(
            (self.x << REGION_BITS) + REGION_MASK,
            (self.z << REGION_BITS) + REGION_MASK,
        )
    }

    /// Converts a region-local index back to the world chunk position.
    pub const fn chunk_at(&self, index: usize) -> ChunkPos {
        let min = self.min_chunk();
        ChunkPos::new(
            min.x + (index as i32 & REGION_MASK),
            min.z + (index as i32 >> REGION_BITS),
        )
    }

    /// All chunks of the region in header order.
    pub fn chunks(&self) -> impl Iterator<Item = ChunkPos> + '_ {
        (0..CHUNK_COUNT).map(move |idx| self.chunk_at(idx))
    }

    pub fn file_name(&self, extension: &str) -> String {
        format!("r.{}.{}.{}", self.x, self.z, extension)
    }

    /// Parses names like `r.0.-1.mca`.
    pub fn from_file_name(name: &str, extension: &str) -> Option<Self> {
        let parts: Vec<&str> = name.split('.').collect();
        if parts.len() == 4 && parts[0] == "r" && parts[3] == extension {
            let x = parts[1].parse().ok()?;
            let z = parts[2].parse().ok()?;
            Some(Self::new(x, z))
        } else {
            None
        }
    }
}

impl Display for RegionPos {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "r.{}.{}", self.x, self.z)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_index() {
        let pos = ChunkPos::new(3, 5);
        assert_eq!(pos.region(), RegionPos::new(0, 0));
        assert_eq!(pos.region_local_index(), 163);

        let pos = ChunkPos::new(-1, -33);
        assert_eq!(pos.region(), RegionPos::new(-1, -2));
        assert_eq!(pos.region_local_x(), 31);
        assert_eq!(pos.region_local_z(), 31);
        assert_eq!(pos.region_local_index(), CHUNK_COUNT - 1);
    }

    #[test]
    fn region_bounds() {
        let region = RegionPos::new(-1, 2);
        assert_eq!(region.min_chunk(), ChunkPos::new(-32, 64));
        assert_eq!(region.max_chunk(), ChunkPos::new(-1, 95));
        for (idx, pos) in region.chunks().enumerate() {
            assert_eq!(pos.region(), region);
            assert_eq!(pos.region_local_index(), idx);
        }
    }

    #[test]
    fn file_names() {
        let region = RegionPos::new(0, -1);
        let name = region.file_name(DEFAULT_REGION_EXTENSION);
        assert_eq!(name, "r.0.-1.mca");
        assert_eq!(
            RegionPos::from_file_name(&name, DEFAULT_REGION_EXTENSION),
            Some(region)
        );
        assert_eq!(RegionPos::from_file_name("c.0.-1.mcc", "mca"), None);
        assert_eq!(ChunkPos::new(7, -9).external_file_name(), "c.7.-9.mcc");
    }

    #[test]
    fn sector_count() {
        assert_eq!(sectors_for(0), 0);
        assert_eq!(sectors_for(1), 1);
        assert_eq!(sectors_for(SECTOR_BYTES), 1);
        assert_eq!(sectors_for(10_005), 3);
    }
}
