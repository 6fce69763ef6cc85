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

use hearth_common::ChunkPos;
use hearth_region::WriteCommand;
use hearth_worker::IoWorker;
use serde::{Deserialize, Serialize};
use snafu::ResultExt;
use tracing::debug;

use crate::{
    collaborator::{DataUpgrader, ErrorReporter, LoggingErrorReporter, ValueCodec},
    err::{DecodeSnafu, EncodeSnafu, Error, FixLegacySnafu, MigrateSnafu, Result, WorkerSnafu},
};

/// Values without a stamped version are treated as this version.
pub const MISSING_VERSION: i32 = -1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UpgradeConfig {
    /// The version every value is brought to.
    pub target_version: i32,
    /// Values below this version need the legacy fix before migrating.
    pub legacy_version: i32,
}

impl Default for UpgradeConfig {
    fn default() -> Self {
        Self {
            target_version: 3953,
            legacy_version: 1493,
        }
    }
}

/// Structured chunk values on top of an [`IoWorker`], upgraded to the
/// target version on the way in.
pub struct ChunkStorage<C: ValueCodec> {
    worker:   IoWorker,
    codec:    C,
    upgrader: Box<dyn DataUpgrader<C::Value>>,
    reporter: Box<dyn ErrorReporter>,
    config:   UpgradeConfig,
}

impl<C: ValueCodec> ChunkStorage<C> {
    pub fn new<U>(worker: IoWorker, codec: C, upgrader: U, config: UpgradeConfig) -> Self
    where
        U: DataUpgrader<C::Value> + 'static,
    {
        Self {
            worker,
            codec,
            upgrader: Box::new(upgrader),
            reporter: Box::new(LoggingErrorReporter),
            config,
        }
    }

    pub fn with_reporter<R: ErrorReporter + 'static>(mut self, reporter: R) -> Self {
        self.reporter = Box::new(reporter);
        self
    }

    pub fn worker(&self) -> &IoWorker { &self.worker }

    pub fn config(&self) -> &UpgradeConfig { &self.config }

    /// Loads and decodes the value as stored.
    pub async fn read(&self, pos: ChunkPos) -> Result<Option<C::Value>> {
        let data = match self.worker.load(pos).await.context(WorkerSnafu) {
            Ok(Some(data)) => data,
            Ok(None) => return Ok(None),
            Err(e) => return Err(self.load_failed(pos, e)),
        };
        let value = match self.codec.decode(&data).context(DecodeSnafu { pos }) {
            Ok(value) => value,
            Err(e) => return Err(self.load_failed(pos, e)),
        };
        if let Some(recorded) = self.codec.recorded_pos(&value) {
            if recorded != pos {
                self.reporter
                    .report_misplaced(self.worker.info(), pos, recorded);
            }
        }
        Ok(Some(value))
    }

    /// Brings the value to the target version.
    pub fn upgrade(&self, value: C::Value) -> Result<C::Value> {
        let target = self.config.target_version;
        let version = self
            .codec
            .data_version(&value)
            .unwrap_or(MISSING_VERSION);
        if version == target {
            return Ok(value);
        }

        let mut value = if version < self.config.legacy_version {
            debug!("fix legacy chunk of version {}", version);
            let fixed = self.upgrader.fix_legacy(value).context(FixLegacySnafu)?;
            self.migrate(fixed, self.config.legacy_version, target)?
        } else {
            self.migrate(value, version, target)?
        };
        self.codec.stamp_data_version(&mut value, target);
        Ok(value)
    }

    fn migrate(&self, value: C::Value, from: i32, to: i32) -> Result<C::Value> {
        self.upgrader
            .migrate(value, from, to)
            .context(MigrateSnafu { from, to })
    }

    pub async fn read_upgraded(&self, pos: ChunkPos) -> Result<Option<C::Value>> {
        match self.read(pos).await? {
            Some(value) => match self.upgrade(value) {
                Ok(value) => Ok(Some(value)),
                Err(e) => Err(self.load_failed(pos, e)),
            },
            None => Ok(None),
        }
    }

    /// Stores the value, `None` deletes the chunk. Resolves once it is on
    /// disk.
    pub async fn write(&self, pos: ChunkPos, value: Option<&C::Value>) -> Result<()> {
        let command = match value {
            Some(value) => match self.codec.encode(value).context(EncodeSnafu { pos }) {
                Ok(data) => WriteCommand::Write(data),
                Err(e) => return Err(self.save_failed(pos, e)),
            },
            None => WriteCommand::Delete,
        };
        self.worker
            .store(pos, command)
            .await
            .context(WorkerSnafu)
            .map_err(|e| self.save_failed(pos, e))
    }

    /// Waits for every pending write and syncs the region files.
    pub async fn flush(&self) -> Result<()> { self.worker.synchronize(true).await.context(WorkerSnafu) }

    pub async fn close(&self) -> Result<()> { self.worker.close().await.context(WorkerSnafu) }

    pub async fn is_old_chunk_around(&self, pos: ChunkPos, radius: i32) -> Result<bool> {
        self.worker
            .is_old_chunk_around(pos, radius)
            .await
            .context(WorkerSnafu)
    }

    fn load_failed(&self, pos: ChunkPos, e: Error) -> Error {
        self.reporter
            .report_load_failure(self.worker.info(), pos, &e);
        e
    }

    fn save_failed(&self, pos: ChunkPos, e: Error) -> Error {
        self.reporter
            .report_save_failure(self.worker.info(), pos, &e);
        e
    }
}
