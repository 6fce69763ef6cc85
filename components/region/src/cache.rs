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

use std::{collections::HashMap, hash::Hash};

struct Slot<K, V> {
    key:   K,
    value: V,
    prev:  Option<usize>,
    next:  Option<usize>,
}

/// A bounded least-recently-used cache.
///
/// Entries live in a slot arena, the recency order is an intrusive doubly
/// linked list threaded through the slots, so promotion and eviction are O(1)
/// and never move values around.
pub struct RecencyCache<K, V> {
    capacity: usize,
    slots:    Vec<Option<Slot<K, V>>>,
    vacant:   Vec<usize>,
    index:    HashMap<K, usize>,
    /// most recently used
    head:     Option<usize>,
    /// least recently used
    tail:     Option<usize>,
}

impl<K, V> RecencyCache<K, V>
where
    K: Hash + Eq + Clone,
{
    pub fn new(capacity: usize) -> Self {
        debug_assert!(capacity > 0, "cache capacity must be positive");
        Self {
            capacity,
            slots: Vec::with_capacity(capacity),
            vacant: Vec::new(),
            index: HashMap::with_capacity(capacity),
            head: None,
            tail: None,
        }
    }

    pub fn len(&self) -> usize { self.index.len() }

    pub fn is_empty(&self) -> bool { self.index.is_empty() }

    pub fn contains(&self, key: &K) -> bool { self.index.contains_key(key) }

    /// Returns the value and marks it as the most recently used.
    pub fn get_mut(&mut self, key: &K) -> Option<&mut V> {
        let idx = *self.index.get(key)?;
        self.promote(idx);
        Some(&mut self.slot_mut(idx).value)
    }

    /// Inserts a value, returning the entry evicted to make room for it.
    ///
    /// An existing value under the same key is replaced and returned as the
    /// evicted entry.
    pub fn insert(&mut self, key: K, value: V) -> Option<(K, V)> {
        if let Some(&idx) = self.index.get(&key) {
            self.promote(idx);
            let old = std::mem::replace(&mut self.slot_mut(idx).value, value);
            return Some((key, old));
        }
        let evicted = if self.len() >= self.capacity {
            self.pop_lru()
        } else {
            None
        };
        self.push(key, value);
        evicted
    }

    /// Returns the cached value, creating it on a miss.
    ///
    /// When the cache is full, the least recently used entry is handed to
    /// `evict` before `create` runs, so the cache never holds more than its
    /// capacity.
    pub fn get_or_try_insert_with<E, Ev, Cr>(
        &mut self,
        key: K,
        evict: Ev,
        create: Cr,
    ) -> Result<&mut V, E>
    where
        Ev: FnOnce(K, V) -> Result<(), E>,
        Cr: FnOnce() -> Result<V, E>,
    {
        if let Some(&idx) = self.index.get(&key) {
            self.promote(idx);
            return Ok(&mut self.slot_mut(idx).value);
        }
        if self.len() >= self.capacity {
            if let Some((old_key, old_value)) = self.pop_lru() {
                evict(old_key, old_value)?;
            }
        }
        let value = create()?;
        let idx = self.push(key, value);
        Ok(&mut self.slot_mut(idx).value)
    }

    pub fn remove(&mut self, key: &K) -> Option<V> {
        let idx = self.index.remove(key)?;
        self.detach(idx);
        self.take(idx).map(|slot| slot.value)
    }

    pub fn pop_lru(&mut self) -> Option<(K, V)> {
        let idx = self.tail?;
        self.detach(idx);
        let slot = self.take(idx)?;
        self.index.remove(&slot.key);
        Some((slot.key, slot.value))
    }

    /// Removes every entry, most recently used first.
    pub fn drain(&mut self) -> Vec<(K, V)> {
        let mut out = Vec::with_capacity(self.len());
        let mut cursor = self.head;
        while let Some(idx) = cursor {
            cursor = self.slot(idx).next;
            if let Some(slot) = self.take(idx) {
                out.push((slot.key, slot.value));
            }
        }
        self.slots.clear();
        self.vacant.clear();
        self.index.clear();
        self.head = None;
        self.tail = None;
        out
    }

    /// Keys ordered from most to least recently used.
    pub fn keys_by_recency(&self) -> Vec<K> {
        let mut keys = Vec::with_capacity(self.len());
        let mut cursor = self.head;
        while let Some(idx) = cursor {
            let slot = self.slot(idx);
            keys.push(slot.key.clone());
            cursor = slot.next;
        }
        keys
    }

    /// Iterates the values without touching the recency order.
    pub fn values_mut(&mut self) -> impl Iterator<Item = &mut V> {
        self.slots.iter_mut().flatten().map(|slot| &mut slot.value)
    }

    fn push(&mut self, key: K, value: V) -> usize {
        let slot = Slot {
            key: key.clone(),
            value,
            prev: None,
            next: self.head,
        };
        let idx = match self.vacant.pop() {
            Some(idx) => {
                self.slots[idx] = Some(slot);
                idx
            }
            None => {
                self.slots.push(Some(slot));
                self.slots.len() - 1
            }
        };
        if let Some(head) = self.head {
            self.slot_mut(head).prev = Some(idx);
        }
        self.head = Some(idx);
        if self.tail.is_none() {
            self.tail = Some(idx);
        }
        self.index.insert(key, idx);
        idx
    }

    fn promote(&mut self, idx: usize) {
        if self.head == Some(idx) {
            return;
        }
        self.detach(idx);
        let old_head = self.head;
        {
            let slot = self.slot_mut(idx);
            slot.prev = None;
            slot.next = old_head;
        }
        if let Some(head) = old_head {
            self.slot_mut(head).prev = Some(idx);
        }
        self.head = Some(idx);
        if self.tail.is_none() {
            self.tail = Some(idx);
        }
    }

    fn detach(&mut self, idx: usize) {
        let (prev, next) = {
            let slot = self.slot(idx);
            (slot.prev, slot.next)
        };
        match prev {
            Some(prev) => self.slot_mut(prev).next = next,
            None => self.head = next,
        }
        match next {
            Some(next) => self.slot_mut(next).prev = prev,
            None => self.tail = prev,
        }
        let slot = self.slot_mut(idx);
        slot.prev = None;
        slot.next = None;
    }

    fn take(&mut self, idx: usize) -> Option<Slot<K, V>> {
        let slot = self.slots.get_mut(idx)?.take();
        if slot.is_some() {
            self.vacant.push(idx);
        }
        slot
    }

    fn slot(&self, idx: usize) -> &Slot<K, V> {
        self.slots[idx]
            .as_ref()
            .expect("recency list points at a vacant slot")
    }

    fn slot_mut(&mut self, idx: usize) -> &mut Slot<K, V> {
        self.slots[idx]
            .as_mut()
            .expect("recency list points at a vacant slot")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evicts_least_recently_used() {
        let mut cache = RecencyCache::new(3);
        assert!(cache.insert(1, "a").is_none());
        assert!(cache.insert(2, "b").is_none());
        assert!(cache.insert(3, "c").is_none());
        assert_eq!(cache.keys_by_recency(), vec![3, 2, 1]);

        // touching 1 makes 2 the eviction candidate.
        assert_eq!(cache.get_mut(&1), Some(&mut "a"));
        assert_eq!(cache.keys_by_recency(), vec![1, 3, 2]);
        assert_eq!(cache.insert(4, "d"), Some((2, "b")));
        assert_eq!(cache.len(), 3);
        assert!(!cache.contains(&2));
        assert_eq!(cache.keys_by_recency(), vec![4, 1, 3]);
    }

    #[test]
    fn replace_existing() {
        let mut cache = RecencyCache::new(2);
        cache.insert("k", 1);
        cache.insert("j", 2);
        assert_eq!(cache.insert("k", 3), Some(("k", 1)));
        assert_eq!(cache.keys_by_recency(), vec!["k", "j"]);
        assert_eq!(cache.get_mut(&"k"), Some(&mut 3));
    }

    #[test]
    fn evict_before_create() {
        let mut cache = RecencyCache::new(2);
        let mut evicted = Vec::new();
        for key in 0..5 {
            let value = cache
                .get_or_try_insert_with(
                    key,
                    |k, v| {
                        evicted.push((k, v));
                        Ok::<_, ()>(())
                    },
                    || Ok(key * 10),
                )
                .unwrap();
            assert_eq!(*value, key * 10);
        }
        assert_eq!(evicted, vec![(0, 0), (1, 10), (2, 20)]);
        assert_eq!(cache.keys_by_recency(), vec![4, 3]);

        // a hit never calls create.
        let hit = cache
            .get_or_try_insert_with(3, |_, _| Err("evict"), || Err("create"))
            .unwrap();
        assert_eq!(*hit, 30);
        assert_eq!(cache.keys_by_recency(), vec![3, 4]);
    }

    #[test]
    fn create_failure_leaves_cache_consistent() {
        let mut cache = RecencyCache::new(1);
        cache.insert(1, 1);
        let res = cache.get_or_try_insert_with(2, |_, _| Ok(()), || Err("boom"));
        assert_eq!(res.err(), Some("boom"));
        assert!(cache.is_empty());
        cache.insert(3, 3);
        assert_eq!(cache.keys_by_recency(), vec![3]);
    }

    #[test]
    fn remove_and_drain() {
        let mut cache = RecencyCache::new(4);
        for key in 0..4 {
            cache.insert(key, key);
        }
        assert_eq!(cache.remove(&2), Some(2));
        assert_eq!(cache.remove(&2), None);
        assert_eq!(cache.pop_lru(), Some((0, 0)));
        cache.insert(9, 9);
        assert_eq!(cache.values_mut().count(), 3);
        assert_eq!(cache.drain(), vec![(9, 9), (3, 3), (1, 1)]);
        assert!(cache.is_empty());
        assert_eq!(cache.pop_lru(), None);
    }
}
