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

use std::path::PathBuf;

use hearth_common::ChunkPos;
use snafu::{Location, Snafu};

#[derive(Snafu, Debug)]
#[snafu(visibility(pub))]
pub enum Error {
    UnknownIOError {
        #[snafu(implicit)]
        location: Location,
        source:   std::io::Error,
    },

    #[snafu(display("failed to open region file {}", path.display()))]
    OpenRegion {
        path:     PathBuf,
        #[snafu(implicit)]
        location: Location,
        source:   std::io::Error,
    },

    #[snafu(display("failed to create region folder {}", path.display()))]
    CreateRegionFolder {
        path:     PathBuf,
        #[snafu(implicit)]
        location: Location,
        source:   std::io::Error,
    },

    #[snafu(display("failed to move external chunk file into {}", path.display()))]
    PersistExternal {
        path:     PathBuf,
        #[snafu(implicit)]
        location: Location,
        source:   tempfile::PersistError,
    },

    #[snafu(display("failed to decompress chunk {pos}"))]
    Decompress {
        pos:      ChunkPos,
        #[snafu(implicit)]
        location: Location,
        source:   std::io::Error,
    },

    #[snafu(display("failed to compress chunk {pos} with {codec}"))]
    Compress {
        pos:      ChunkPos,
        codec:    &'static str,
        #[snafu(implicit)]
        location: Location,
        source:   std::io::Error,
    },

    #[snafu(display("sector {sector} of {} does not fit in the offset table", path.display()))]
    SectorOutOfRange {
        path:     PathBuf,
        sector:   u32,
        #[snafu(implicit)]
        location: Location,
    },

    #[snafu(display("failed to close {} region files: {errors:?}", errors.len()))]
    CloseRegions {
        errors:   Vec<Error>,
        #[snafu(implicit)]
        location: Location,
    },
}

pub type Result<T> = std::result::Result<T, Error>;
