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
use snafu::{Location, Snafu};

/// Errors raised by the value codec and the upgrader.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Snafu, Debug)]
#[snafu(visibility(pub))]
pub enum Error {
    #[snafu(display("failed to encode chunk {pos}"))]
    Encode {
        pos:      ChunkPos,
        #[snafu(implicit)]
        location: Location,
        source:   BoxError,
    },
    #[snafu(display("failed to decode chunk {pos}"))]
    Decode {
        pos:      ChunkPos,
        #[snafu(implicit)]
        location: Location,
        source:   BoxError,
    },
    #[snafu(display("failed to fix a legacy chunk"))]
    FixLegacy {
        #[snafu(implicit)]
        location: Location,
        source:   BoxError,
    },
    #[snafu(display("failed to migrate a chunk from version {from} to {to}"))]
    Migrate {
        from:     i32,
        to:       i32,
        #[snafu(implicit)]
        location: Location,
        source:   BoxError,
    },
    #[snafu(display("io worker error: {source}"))]
    Worker {
        #[snafu(implicit)]
        location: Location,
        source:   hearth_worker::Error,
    },
}

pub type Result<T> = std::result::Result<T, Error>;
