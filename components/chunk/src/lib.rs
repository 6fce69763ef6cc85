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


//! Versioned chunk values on top of the IO worker.

mod collaborator;
pub mod err;
mod storage;

pub use collaborator::{DataUpgrader, ErrorReporter, LoggingErrorReporter, ValueCodec};
pub use err::{BoxError, Error, Result};
pub use storage::{ChunkStorage, UpgradeConfig, MISSING_VERSION};
