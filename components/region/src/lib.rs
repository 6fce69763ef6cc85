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
//! Sector-based region files and the cache of open ones.

pub mod cache;
pub mod codec;
pub mod config;
pub mod err;
pub mod region_file;
pub mod sector;
pub mod storage;

pub use codec::RegionCodec;
pub use config::{Config, RegionStorageInfo};
pub use err::{Error, Result};
pub use region_file::RegionFile;
pub use storage::{RegionStorage, WriteCommand};
