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
use hearth_common::{ChunkPos, RegionPos};
use snafu::{Location, Snafu};

#[derive(Snafu, Debug)]
#[snafu(visibility(pub))]
pub enum Error {
    #[snafu(display("failed to join handle"))]
    Join {
        #[snafu(source)]
        error:    tokio::task::JoinError,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("io worker {} is stopped", name))]
    WorkerStopped {
        name:     String,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("failed to store chunk {pos}: {error}"))]
    StoreFailed {
        pos:      ChunkPos,
        /// The storage error rendered once, every waiter of the slot gets a
        /// copy.
        error:    String,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("failed to visit pending chunk {pos}"))]
    Visit {
        pos:      ChunkPos,
        #[snafu(implicit)]
        location: Location,
        source:   std::io::Error,
    },
    #[snafu(display("failed to load legacy flags of region {region}: {error}"))]
    LegacyCache {
        region:   RegionPos,
        error:    String,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("region storage error: {source}"))]
    Region {
        #[snafu(implicit)]
        location: Location,
        source:   hearth_region::Error,
    },
}

impl Error {
    pub fn is_stopped(&self) -> bool { matches!(self, Error::WorkerStopped { .. }) }
}

pub type Result<T> = std::result::Result<T, Error>;
