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

//! The pieces a [`crate::ChunkStorage`] is assembled from. None of them is
//! implemented here, the payload format and its migrations belong to the
//! caller.

use bytes::Bytes;
use hearth_common::ChunkPos;
use hearth_region::RegionStorageInfo;
use tracing::{error, warn};

use crate::err::BoxError;

/// Turns structured chunk values into payload bytes and back.
pub trait ValueCodec: Send + Sync + 'static {
    type Value: Send + 'static;

    fn encode(&self, value: &Self::Value) -> Result<Bytes, BoxError>;

    fn decode(&self, data: &[u8]) -> Result<Self::Value, BoxError>;

    /// The schema version stamped on the value, if any.
    fn data_version(&self, value: &Self::Value) -> Option<i32>;

    fn stamp_data_version(&self, value: &mut Self::Value, version: i32);

    /// The position the value claims to belong to.
    fn recorded_pos(&self, value: &Self::Value) -> Option<ChunkPos>;
}

/// Brings old values up to date.
pub trait DataUpgrader<V>: Send + Sync {
    /// Repairs values written before the legacy threshold, the result is
    /// treated as being at the threshold version.
    fn fix_legacy(&self, value: V) -> Result<V, BoxError>;

    fn migrate(&self, value: V, from: i32, to: i32) -> Result<V, BoxError>;
}

/// Told about chunks that could not be used as stored. Must never fail.
pub trait ErrorReporter: Send + Sync {
    fn report_load_failure(
        &self,
        info: &RegionStorageInfo,
        pos: ChunkPos,
        error: &(dyn std::error::Error + 'static),
    );

    fn report_save_failure(
        &self,
        info: &RegionStorageInfo,
        pos: ChunkPos,
        error: &(dyn std::error::Error + 'static),
    );

    /// The value stored at `pos` says it belongs to `recorded`.
    fn report_misplaced(&self, info: &RegionStorageInfo, pos: ChunkPos, recorded: ChunkPos);
}

/// Reports through the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingErrorReporter;

impl ErrorReporter for LoggingErrorReporter {
    fn report_load_failure(
        &self,
        info: &RegionStorageInfo,
        pos: ChunkPos,
        error: &(dyn std::error::Error + 'static),
    ) {
        error!("{} failed to load chunk {}: {}", info, pos, error);
    }

    fn report_save_failure(
        &self,
        info: &RegionStorageInfo,
        pos: ChunkPos,
        error: &(dyn std::error::Error + 'static),
    ) {
        error!("{} failed to save chunk {}: {}", info, pos, error);
    }

    fn report_misplaced(&self, info: &RegionStorageInfo, pos: ChunkPos, recorded: ChunkPos) {
        warn!(
            "{} chunk stored at {} records position {}, using it as {}",
            info, pos, recorded, pos
        );
    }
}
