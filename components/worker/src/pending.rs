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

use std::collections::{hash_map::Entry, HashMap, VecDeque};

use hearth_common::ChunkPos;
use hearth_region::WriteCommand;
use tokio::sync::oneshot;

use crate::err::Result;

pub(crate) type Waiter = oneshot::Sender<Result<()>>;

/// The latest command for one chunk and everyone waiting for it to land.
pub(crate) struct PendingStore {
    pub(crate) command: WriteCommand,
    pub(crate) waiters: Vec<Waiter>,
}

/// Writes accepted but not yet on disk, flushed oldest slot first.
#[derive(Default)]
pub(crate) struct PendingWrites {
    order: VecDeque<ChunkPos>,
    slots: HashMap<ChunkPos, PendingStore>,
}

impl PendingWrites {
    /// Records the command. A newer command for a pending chunk replaces the
    /// old one but keeps its place in the flush order and its waiters.
    pub(crate) fn submit(&mut self, pos: ChunkPos, command: WriteCommand, waiter: Waiter) {
        match self.slots.entry(pos) {
            Entry::Occupied(mut e) => {
                let slot = e.get_mut();
                slot.command = command;
                slot.waiters.push(waiter);
            }
            Entry::Vacant(e) => {
                self.order.push_back(pos);
                e.insert(PendingStore {
                    command,
                    waiters: vec![waiter],
                });
            }
        }
    }

    pub(crate) fn get(&self, pos: &ChunkPos) -> Option<&WriteCommand> {
        self.slots.get(pos).map(|slot| &slot.command)
    }

    pub(crate) fn pop_oldest(&mut self) -> Option<(ChunkPos, PendingStore)> {
        while let Some(pos) = self.order.pop_front() {
            if let Some(slot) = self.slots.remove(&pos) {
                return Some((pos, slot));
            }
        }
        None
    }

    /// Adds a waiter to every pending slot.
    pub(crate) fn subscribe_all(&mut self) -> Vec<oneshot::Receiver<Result<()>>> {
        self.slots
            .values_mut()
            .map(|slot| {
                let (tx, rx) = oneshot::channel();
                slot.waiters.push(tx);
                rx
            })
            .collect()
    }

    pub(crate) fn len(&self) -> usize { self.slots.len() }

    pub(crate) fn is_empty(&self) -> bool { self.slots.is_empty() }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;

    fn write(data: &'static [u8]) -> WriteCommand { WriteCommand::Write(Bytes::from_static(data)) }

    #[test]
    fn overwrite_keeps_place_and_waiters() {
        let mut pending = PendingWrites::default();
        let a = ChunkPos::new(0, 0);
        let b = ChunkPos::new(1, 0);
        let (tx1, _rx1) = oneshot::channel();
        let (tx2, _rx2) = oneshot::channel();
        let (tx3, _rx3) = oneshot::channel();
        pending.submit(a, write(b"a1"), tx1);
        pending.submit(b, write(b"b1"), tx2);
        pending.submit(a, WriteCommand::Delete, tx3);
        assert_eq!(pending.len(), 2);
        assert_eq!(pending.get(&a), Some(&WriteCommand::Delete));

        let (pos, slot) = pending.pop_oldest().unwrap();
        assert_eq!(pos, a);
        assert!(slot.command.is_delete());
        assert_eq!(slot.waiters.len(), 2);
        let (pos, _) = pending.pop_oldest().unwrap();
        assert_eq!(pos, b);
        assert!(pending.pop_oldest().is_none());
        assert!(pending.is_empty());
    }

    #[tokio::test]
    async fn subscribers_see_completion() {
        let mut pending = PendingWrites::default();
        let (tx, _rx) = oneshot::channel();
        pending.submit(ChunkPos::new(4, 4), write(b"x"), tx);
        let mut subscribers = pending.subscribe_all();
        assert_eq!(subscribers.len(), 1);

        let (_, slot) = pending.pop_oldest().unwrap();
        for waiter in slot.waiters {
            let _ = waiter.send(Ok(()));
        }
        assert!(subscribers.pop().unwrap().await.unwrap().is_ok());
    }
}
