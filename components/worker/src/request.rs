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

use std::io::{self, Read};

use bytes::Bytes;
use hearth_common::ChunkPos;
use hearth_region::WriteCommand;
use tokio::sync::oneshot;

use crate::err::Result;

pub(crate) type Reply<T> = oneshot::Sender<Result<T>>;

/// Produces the command on the worker, right before it is recorded.
pub(crate) type CommandSupplier = Box<dyn FnOnce() -> WriteCommand + Send>;

/// Runs against the payload stream, `None` when the chunk is absent.
pub(crate) type ScanJob = Box<dyn FnOnce(Option<&mut dyn Read>) -> io::Result<()> + Send>;

pub(crate) enum WorkerRequest {
    Store {
        pos:      ChunkPos,
        supplier: CommandSupplier,
        reply:    Reply<()>,
    },
    Load {
        pos:   ChunkPos,
        reply: Reply<Option<Bytes>>,
    },
    Scan {
        pos:   ChunkPos,
        job:   ScanJob,
        reply: Reply<()>,
    },
    Exists {
        pos:   ChunkPos,
        reply: Reply<bool>,
    },
    /// Subscribe to every slot pending right now.
    Synchronize {
        reply: Reply<Vec<oneshot::Receiver<Result<()>>>>,
    },
    /// Sync every open region file.
    Flush { reply: Reply<()> },
    /// Write the oldest pending slot.
    WritePending,
    /// Notify the worker to drain and stop.
    Stop { reply: Reply<()> },
}

impl WorkerRequest {
    pub(crate) fn name(&self) -> &'static str {
        match self {
            WorkerRequest::Store { .. } => "store",
            WorkerRequest::Load { .. } => "load",
            WorkerRequest::Scan { .. } => "scan",
            WorkerRequest::Exists { .. } => "exists",
            WorkerRequest::Synchronize { .. } => "synchronize",
            WorkerRequest::Flush { .. } => "flush",
            WorkerRequest::WritePending => "write-pending",
            WorkerRequest::Stop { .. } => "stop",
        }
    }
}
