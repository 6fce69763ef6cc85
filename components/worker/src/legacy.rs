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

//! Finding chunks written by an old format near a position.
//!
//! Every region is scanned at most once per cache lifetime: a cheap visitor
//! from the [`LegacyProbe`] runs over all 1024 chunks and the flagged ones
//! are kept as a bitmap. Concurrent lookups of the same region share one
//! scan.

use std::sync::Arc;

use hearth_common::{ChunkPos, RegionPos, CHUNK_COUNT};
use moka::policy::EvictionPolicy;

use crate::visitor::StreamVisitor;

/// A visitor that decides whether the chunk it saw is in a legacy format.
pub trait LegacyVisitor: StreamVisitor {
    fn is_legacy(&self) -> bool;
}

/// Hands out a fresh [`LegacyVisitor`] per chunk.
pub trait LegacyProbe: Send + Sync + 'static {
    fn visitor(&self) -> Box<dyn LegacyVisitor>;
}

impl<F> LegacyProbe for F
where
    F: Fn() -> Box<dyn LegacyVisitor> + Send + Sync + 'static,
{
    fn visitor(&self) -> Box<dyn LegacyVisitor> { self() }
}

const WORDS: usize = CHUNK_COUNT / 64;

/// One bit per chunk of a region, indexed by the region-local index.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LegacyBitmap {
    words: [u64; WORDS],
}

impl LegacyBitmap {
    pub fn set(&mut self, index: usize) { self.words[index / 64] |= 1 << (index % 64) }

    pub fn contains(&self, index: usize) -> bool { self.words[index / 64] & (1 << (index % 64)) != 0 }

    pub fn count(&self) -> u32 { self.words.iter().map(|w| w.count_ones()).sum() }

    pub fn is_empty(&self) -> bool { self.words.iter().all(|w| *w == 0) }

    /// Whether a flagged chunk of `region` lies in the square `[min, max]`.
    pub fn any_in_square(&self, region: RegionPos, min: ChunkPos, max: ChunkPos) -> bool {
        if self.is_empty() {
            return false;
        }
        let low = region.min_chunk();
        let high = region.max_chunk();
        let (x0, x1) = (min.x.max(low.x), max.x.min(high.x));
        let (z0, z1) = (min.z.max(low.z), max.z.min(high.z));
        (z0..=z1).any(|z| (x0..=x1).any(|x| self.contains(ChunkPos::new(x, z).region_local_index())))
    }
}

pub(crate) struct LegacyRegions {
    pub(crate) probe: Arc<dyn LegacyProbe>,
    pub(crate) cache: moka::future::Cache<RegionPos, Arc<LegacyBitmap>>,
}

impl LegacyRegions {
    pub(crate) fn new(probe: Arc<dyn LegacyProbe>, capacity: u64) -> Self {
        let cache = moka::future::Cache::builder()
            .max_capacity(capacity.max(1))
            .eviction_policy(EvictionPolicy::lru())
            .build();
        Self { probe, cache }
    }
}

/// The regions overlapping the square of chunks within `radius` of `pos`.
pub(crate) fn regions_around(pos: ChunkPos, radius: i32) -> (ChunkPos, ChunkPos, Vec<RegionPos>) {
    let radius = radius.max(0);
    let min = ChunkPos::new(pos.x.saturating_sub(radius), pos.z.saturating_sub(radius));
    let max = ChunkPos::new(pos.x.saturating_add(radius), pos.z.saturating_add(radius));
    let mut regions = Vec::new();
    for rz in min.region_z()..=max.region_z() {
        for rx in min.region_x()..=max.region_x() {
            regions.push(RegionPos::new(rx, rz));
        }
    }
    (min, max, regions)
}
