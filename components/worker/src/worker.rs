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

use std::{
    io::Read,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use bytes::Bytes;
use hearth_common::{ChunkPos, RegionPos};
use hearth_region::{RegionStorage, RegionStorageInfo, WriteCommand};
use hearth_utils::runtime;
use snafu::{ensure, OptionExt, ResultExt};
use tokio::{
    sync::{oneshot, Mutex},
    task::JoinHandle,
};
use tracing::{debug, error, info, warn};

use crate::{
    config::WorkerConfig,
    err::{
        Error, JoinSnafu, LegacyCacheSnafu, RegionSnafu, Result, StoreFailedSnafu, VisitSnafu,
        WorkerStoppedSnafu,
    },
    legacy::{regions_around, LegacyBitmap, LegacyProbe, LegacyRegions},
    pending::{PendingStore, PendingWrites},
    request::{Reply, ScanJob, WorkerRequest},
    scheduler::{task_queue, Priority, TaskReceiver, TaskSender},
    visitor::StreamVisitor,
};

/// Worker start config.
pub struct IoWorkerBuilder {
    config: WorkerConfig,
    probe:  Option<Arc<dyn LegacyProbe>>,
}

impl IoWorkerBuilder {
    pub fn new(config: WorkerConfig) -> Self {
        Self {
            config,
            probe: None,
        }
    }

    pub fn name<S: Into<String>>(mut self, name: S) -> Self {
        self.config.name = name.into();
        self
    }

    pub fn region(mut self, region: hearth_region::Config) -> Self {
        self.config.region = region;
        self
    }

    pub fn legacy_probe<P: LegacyProbe>(mut self, probe: P) -> Self {
        self.probe = Some(Arc::new(probe));
        self
    }

    pub fn legacy_cache_capacity(mut self, capacity: u64) -> Self {
        self.config.legacy_cache_capacity = capacity;
        self
    }

    /// Starts the worker loop task.
    pub fn build(self) -> IoWorker {
        let (sender, receiver) = task_queue();
        let running = Arc::new(AtomicBool::new(true));
        let name = self.config.name.clone();

        let mut worker_loop = WorkerLoop {
            name: name.clone(),
            storage: Some(RegionStorage::new(&self.config.region)),
            sender: sender.clone(),
            receiver,
            running: running.clone(),
            pending: PendingWrites::default(),
            write_scheduled: false,
        };
        let handle = runtime::spawn(async move {
            worker_loop.run().await;
        });

        IoWorker {
            name,
            info: self.config.region.info.clone(),
            sender,
            handle: Mutex::new(Some(handle)),
            running,
            legacy: self
                .probe
                .map(|probe| LegacyRegions::new(probe, self.config.legacy_cache_capacity)),
        }
    }
}

/// The asynchronous front of one region storage.
///
/// Every request is a task for a single worker loop, so all disk access to
/// the storage is serialized. Stores are buffered per chunk and written in
/// the background, a later store of the same chunk replaces an earlier one
/// that has not reached the disk yet.
pub struct IoWorker {
    name:    String,
    info:    RegionStorageInfo,
    /// Request sender. Send to the worker loop.
    sender:  TaskSender<WorkerRequest>,
    /// Handle to the worker loop.
    handle:  Mutex<Option<JoinHandle<()>>>,
    /// Whether the worker accepts requests.
    running: Arc<AtomicBool>,
    legacy:  Option<LegacyRegions>,
}

impl IoWorker {
    pub fn name(&self) -> &str { &self.name }

    pub fn info(&self) -> &RegionStorageInfo { &self.info }

    /// Stores the command, resolving once it reached the disk.
    pub async fn store(&self, pos: ChunkPos, command: WriteCommand) -> Result<()> {
        self.store_with(pos, move || command).await
    }

    /// Like [`IoWorker::store`], but the command is produced on the worker.
    pub async fn store_with<F>(&self, pos: ChunkPos, supplier: F) -> Result<()>
    where
        F: FnOnce() -> WriteCommand + Send + 'static,
    {
        self.submit(Priority::Foreground, |reply| WorkerRequest::Store {
            pos,
            supplier: Box::new(supplier),
            reply,
        })
        .await
    }

    /// Returns the latest payload, pending writes included.
    pub async fn load(&self, pos: ChunkPos) -> Result<Option<Bytes>> {
        self.submit(Priority::Foreground, |reply| WorkerRequest::Load { pos, reply })
            .await
    }

    /// Streams the payload through the visitor and hands it back. The
    /// visitor is untouched when the chunk is absent.
    pub async fn scan<V: StreamVisitor>(&self, pos: ChunkPos, visitor: V) -> Result<V> {
        let (visited_tx, visited_rx) = oneshot::channel();
        let job: ScanJob = Box::new(move |input: Option<&mut dyn Read>| {
            let mut visitor = visitor;
            let res = match input {
                Some(input) => visitor.visit(input),
                None => Ok(()),
            };
            let _ = visited_tx.send(visitor);
            res
        });
        self.submit(Priority::Foreground, |reply| WorkerRequest::Scan { pos, job, reply })
            .await?;
        visited_rx.await.ok().context(WorkerStoppedSnafu {
            name: self.name.clone(),
        })
    }

    pub async fn chunk_exists(&self, pos: ChunkPos) -> Result<bool> {
        self.submit(Priority::Foreground, |reply| WorkerRequest::Exists { pos, reply })
            .await
    }

    /// Waits until every currently pending write reached the disk, then
    /// syncs the region files when `flush` is set.
    pub async fn synchronize(&self, flush: bool) -> Result<()> {
        let waiters = self
            .submit(Priority::Foreground, |reply| WorkerRequest::Synchronize { reply })
            .await?;
        let results = futures::future::join_all(waiters).await;
        let mut first_err = None;
        for res in results {
            let res = res.map_err(|_| self.stopped()).and_then(|r| r);
            if let Err(e) = res {
                first_err.get_or_insert(e);
            }
        }
        if flush {
            self.submit(Priority::Foreground, |reply| WorkerRequest::Flush { reply })
                .await?;
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Whether a chunk within `radius` of `pos` is flagged by the legacy
    /// probe. Always false without a probe.
    pub async fn is_old_chunk_around(&self, pos: ChunkPos, radius: i32) -> Result<bool> {
        let Some(legacy) = &self.legacy else {
            return Ok(false);
        };
        let (min, max, regions) = regions_around(pos, radius);
        for region in regions {
            let flags = self.legacy_flags(legacy, region).await?;
            if flags.any_in_square(region, min, max) {
                return Ok(true);
            }
        }
        Ok(false)
    }

    async fn legacy_flags(
        &self,
        legacy: &LegacyRegions,
        region: RegionPos,
    ) -> Result<Arc<LegacyBitmap>> {
        legacy
            .cache
            .try_get_with(region, async {
                let mut flags = LegacyBitmap::default();
                for (idx, pos) in region.chunks().enumerate() {
                    match self.scan(pos, legacy.probe.visitor()).await {
                        Ok(visitor) if visitor.is_legacy() => flags.set(idx),
                        Ok(_) => {}
                        Err(e) if e.is_stopped() => return Err(e),
                        Err(e) => warn!("{} failed to probe chunk {}: {}", self.name, pos, e),
                    }
                }
                debug!(
                    "{} found {} legacy chunks in {}",
                    self.name,
                    flags.count(),
                    region
                );
                Ok(Arc::new(flags)) as Result<Arc<LegacyBitmap>>
            })
            .await
            .map_err(|e| {
                LegacyCacheSnafu {
                    region,
                    error: e.to_string(),
                }
                .build()
            })
    }

    /// Stops the worker, writing out everything still pending first.
    ///
    /// This method waits until the worker loop exits.
    pub async fn close(&self) -> Result<()> {
        let handle = self.handle.lock().await.take();
        let Some(handle) = handle else {
            return Ok(());
        };
        info!("stop io worker {}", self.name);

        self.set_running(false);
        let (reply, closed) = oneshot::channel();
        let res = if self
            .sender
            .send(Priority::Shutdown, WorkerRequest::Stop { reply })
            .is_err()
        {
            warn!("io worker {} is already exited before stop", self.name);
            Ok(())
        } else {
            closed.await.unwrap_or_else(|_| Err(self.stopped()))
        };

        handle.await.context(JoinSnafu)?;
        res
    }

    pub fn is_running(&self) -> bool { self.running.load(Ordering::Relaxed) }

    fn set_running(&self, value: bool) { self.running.store(value, Ordering::Relaxed) }

    fn stopped(&self) -> Error {
        WorkerStoppedSnafu {
            name: self.name.clone(),
        }
        .build()
    }

    /// Submits a request and waits for its reply.
    async fn submit<T, F>(&self, priority: Priority, make: F) -> Result<T>
    where
        F: FnOnce(Reply<T>) -> WorkerRequest,
    {
        ensure!(
            self.is_running(),
            WorkerStoppedSnafu {
                name: self.name.clone(),
            }
        );
        let (reply, rx) = oneshot::channel();
        if self.sender.send(priority, make(reply)).is_err() {
            warn!(
                "io worker {} is already exited but the running flag is still true",
                self.name
            );
            // avoid printing more warning logs.
            self.set_running(false);
            return Err(self.stopped());
        }
        rx.await.unwrap_or_else(|_| Err(self.stopped()))
    }
}

impl Drop for IoWorker {
    fn drop(&mut self) {
        if self.is_running() {
            // nobody waits for the reply, the loop still drains and closes.
            self.set_running(false);
            let (reply, _) = oneshot::channel();
            let _ = self
                .sender
                .send(Priority::Shutdown, WorkerRequest::Stop { reply });
        }
    }
}

/// Background worker loop to handle requests.
struct WorkerLoop {
    name:     String,
    /// Moved onto the blocking pool for every disk operation.
    storage:  Option<RegionStorage>,
    /// Used to schedule the background writes.
    sender:   TaskSender<WorkerRequest>,
    receiver: TaskReceiver<WorkerRequest>,
    running:  Arc<AtomicBool>,
    pending:  PendingWrites,
    /// A background write is queued.
    write_scheduled: bool,
}

impl WorkerLoop {
    async fn run(&mut self) {
        info!("start io worker {}", self.name);

        while let Some((priority, request)) = self.receiver.recv().await {
            debug!("{} handles {} at {:?}", self.name, request.name(), priority);
            match request {
                WorkerRequest::Stop { reply } => {
                    let res = self.shutdown().await;
                    let _ = reply.send(res);
                    break;
                }
                request => self.handle_request(request).await,
            }
        }

        info!("exit io worker {}", self.name);
    }

    async fn handle_request(&mut self, request: WorkerRequest) {
        match request {
            WorkerRequest::Store {
                pos,
                supplier,
                reply,
            } => {
                let command = supplier();
                self.pending.submit(pos, command, reply);
                self.schedule_write();
            }
            WorkerRequest::Load { pos, reply } => {
                let res = match self.pending.get(&pos) {
                    Some(command) => Ok(command.payload().cloned()),
                    None => self.with_storage(move |s| s.read(pos)).await,
                };
                let _ = reply.send(res);
            }
            WorkerRequest::Scan { pos, job, reply } => {
                let res = match self.pending.get(&pos) {
                    Some(WriteCommand::Write(data)) => {
                        let mut input: &[u8] = data;
                        job(Some(&mut input)).context(VisitSnafu { pos })
                    }
                    Some(WriteCommand::Delete) => job(None).context(VisitSnafu { pos }),
                    None => self.with_storage(move |s| s.scan_chunk(pos, job)).await,
                };
                let _ = reply.send(res);
            }
            WorkerRequest::Exists { pos, reply } => {
                let res = match self.pending.get(&pos) {
                    Some(command) => Ok(!command.is_delete()),
                    None => self.with_storage(move |s| s.chunk_exists(pos)).await,
                };
                let _ = reply.send(res);
            }
            WorkerRequest::Synchronize { reply } => {
                let _ = reply.send(Ok(self.pending.subscribe_all()));
            }
            WorkerRequest::Flush { reply } => {
                let res = self.with_storage(|s| s.flush()).await;
                let _ = reply.send(res);
            }
            WorkerRequest::WritePending => {
                self.write_scheduled = false;
                if !self.running.load(Ordering::Relaxed) {
                    // the stop request writes what is left.
                    return;
                }
                if self.write_oldest().await {
                    self.schedule_write();
                }
            }
            WorkerRequest::Stop { .. } => unreachable!("stop is handled by the loop"),
        }
    }

    fn schedule_write(&mut self) {
        if self.write_scheduled {
            return;
        }
        self.write_scheduled = true;
        if self
            .sender
            .send(Priority::Background, WorkerRequest::WritePending)
            .is_err()
        {
            warn!("io worker {} can not schedule a background write", self.name);
        }
    }

    /// Writes the oldest pending slot and completes its waiters, returns
    /// whether more slots are pending.
    async fn write_oldest(&mut self) -> bool {
        let Some((pos, PendingStore { command, waiters })) = self.pending.pop_oldest() else {
            return false;
        };
        let res = self.with_storage(move |s| s.write(pos, &command)).await;
        match res {
            Ok(()) => {
                for waiter in waiters {
                    let _ = waiter.send(Ok(()));
                }
            }
            Err(e) => {
                error!("{} failed to store chunk {}: {}", self.name, pos, e);
                let error = e.to_string();
                for waiter in waiters {
                    let _ = waiter.send(
                        StoreFailedSnafu {
                            pos,
                            error: error.clone(),
                        }
                        .fail(),
                    );
                }
            }
        }
        !self.pending.is_empty()
    }

    async fn shutdown(&mut self) -> Result<()> {
        if !self.pending.is_empty() {
            info!(
                "{} writes {} pending chunks before stopping",
                self.name,
                self.pending.len()
            );
        }
        while self.write_oldest().await {}

        let Some(mut storage) = self.storage.take() else {
            return Ok(());
        };
        runtime::spawn_blocking(move || storage.close_all())
            .await
            .context(JoinSnafu)?
            .context(RegionSnafu)
    }

    /// Runs the closure on the blocking pool with the storage moved in, the
    /// loop awaits it so disk operations never overlap.
    async fn with_storage<T, F>(&mut self, f: F) -> Result<T>
    where
        F: FnOnce(&mut RegionStorage) -> hearth_region::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let mut storage = self.storage.take().context(WorkerStoppedSnafu {
            name: self.name.clone(),
        })?;
        let joined = runtime::spawn_blocking(move || {
            let res = f(&mut storage);
            (storage, res)
        })
        .await;
        match joined {
            Ok((storage, res)) => {
                self.storage = Some(storage);
                res.context(RegionSnafu)
            }
            Err(e) => {
                error!("{} lost its region storage: {}", self.name, e);
                Err(e).context(JoinSnafu)
            }
        }
    }
}
