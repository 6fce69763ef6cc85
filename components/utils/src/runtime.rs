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

use std::future::Future;

use once_cell::sync::Lazy;
use tokio::{runtime::Handle, task::JoinHandle};
use tracing::debug;

static IO_RUNTIME: Lazy<tokio::runtime::Runtime> = Lazy::new(|| {
    debug!("start hearth io runtime");
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .thread_name("hearth-io")
        .enable_all()
        .build()
        .expect("failed to build the hearth io runtime")
});

/// Returns the handle of the runtime we are running in, or the shared io
/// runtime when called from a plain thread.
pub fn handle() -> Handle { Handle::try_current().unwrap_or_else(|_| IO_RUNTIME.handle().clone()) }

pub fn spawn<F>(future: F) -> JoinHandle<F::Output>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    handle().spawn(future)
}

pub fn spawn_blocking<F, R>(func: F) -> JoinHandle<R>
where
    F: FnOnce() -> R + Send + 'static,
    R: Send + 'static,
{
    handle().spawn_blocking(func)
}

/// Blocks the current plain thread on the shared io runtime.
///
/// Must not be called from inside an async context.
pub fn block_on<F: Future>(future: F) -> F::Output { IO_RUNTIME.block_on(future) }
