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
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

/// The band a task is queued in. Lower bands always run first, tasks in the
/// same band run in submission order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Priority {
    Foreground,
    Background,
    Shutdown,
}

pub(crate) fn task_queue<T>() -> (TaskSender<T>, TaskReceiver<T>) {
    let (foreground, foreground_rx) = mpsc::unbounded_channel();
    let (background, background_rx) = mpsc::unbounded_channel();
    let (shutdown, shutdown_rx) = mpsc::unbounded_channel();
    (
        TaskSender {
            foreground,
            background,
            shutdown,
        },
        TaskReceiver {
            foreground: foreground_rx,
            background: background_rx,
            shutdown:   shutdown_rx,
        },
    )
}

pub(crate) struct TaskSender<T> {
    foreground: UnboundedSender<T>,
    background: UnboundedSender<T>,
    shutdown:   UnboundedSender<T>,
}

impl<T> Clone for TaskSender<T> {
    fn clone(&self) -> Self {
        Self {
            foreground: self.foreground.clone(),
            background: self.background.clone(),
            shutdown:   self.shutdown.clone(),
        }
    }
}

impl<T> TaskSender<T> {
    /// Queues the task, handing it back when the receiver is gone.
    pub(crate) fn send(&self, priority: Priority, task: T) -> Result<(), T> {
        let band = match priority {
            Priority::Foreground => &self.foreground,
            Priority::Background => &self.background,
            Priority::Shutdown => &self.shutdown,
        };
        band.send(task).map_err(|e| e.0)
    }
}

pub(crate) struct TaskReceiver<T> {
    foreground: UnboundedReceiver<T>,
    background: UnboundedReceiver<T>,
    shutdown:   UnboundedReceiver<T>,
}

impl<T> TaskReceiver<T> {
    /// Waits for the next task of the highest non-empty band, `None` once
    /// every sender is gone and the bands are drained.
    pub(crate) async fn recv(&mut self) -> Option<(Priority, T)> {
        tokio::select! {
            biased;
            Some(task) = self.foreground.recv() => Some((Priority::Foreground, task)),
            Some(task) = self.background.recv() => Some((Priority::Background, task)),
            Some(task) = self.shutdown.recv() => Some((Priority::Shutdown, task)),
            else => None,
        }
    }
}
