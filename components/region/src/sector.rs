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

const WORD_BITS: u32 = u64::BITS;

/// Tracks which sectors of one region file are in use.
///
/// Allocation is first fit from sector 0. Freed runs are reused but never
/// compacted, so a long lived file keeps its holes.
#[derive(Debug, Default, Clone)]
pub struct SectorBitmap {
    words: Vec<u64>,
}

impl SectorBitmap {
    pub fn new() -> Self { Self::default() }

    /// Marks `[start, start + len)` as used.
    pub fn force(&mut self, start: u32, len: u32) { self.set_range(start, len, true) }

    /// Marks `[start, start + len)` as free.
    pub fn free(&mut self, start: u32, len: u32) { self.set_range(start, len, false) }

    /// Finds the first free run of at least `len` sectors, marks it used and
    /// returns its start.
    pub fn allocate(&mut self, len: u32) -> u32 {
        let mut from = 0;
        loop {
            let start = self.next_clear(from);
            match self.next_set(start) {
                Some(end) if end - start < len => from = end,
                _ => {
                    self.force(start, len);
                    return start;
                }
            }
        }
    }

    pub fn is_used(&self, sector: u32) -> bool {
        let (word, bit) = Self::locate(sector);
        self.words
            .get(word)
            .map(|w| w & (1 << bit) != 0)
            .unwrap_or(false)
    }

    pub fn used_count(&self) -> u32 { self.words.iter().map(|w| w.count_ones()).sum() }

    fn set_range(&mut self, start: u32, len: u32, used: bool) {
        if len == 0 {
            return;
        }
        let end = start + len;
        let (last_word, _) = Self::locate(end - 1);
        if used && last_word >= self.words.len() {
            self.words.resize(last_word + 1, 0);
        }
        for sector in start..end {
            let (word, bit) = Self::locate(sector);
            match self.words.get_mut(word) {
                Some(w) if used => *w |= 1 << bit,
                Some(w) => *w &= !(1 << bit),
                None => break,
            }
        }
    }

    fn next_clear(&self, from: u32) -> u32 {
        let mut sector = from;
        while self.is_used(sector) {
            sector += 1;
        }
        sector
    }

    fn next_set(&self, from: u32) -> Option<u32> {
        let limit = self.words.len() as u32 * WORD_BITS;
        (from..limit).find(|&sector| self.is_used(sector))
    }

    fn locate(sector: u32) -> (usize, u32) {
        ((sector / WORD_BITS) as usize, sector % WORD_BITS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_fit() {
        let mut bitmap = SectorBitmap::new();
        bitmap.force(0, 2);
        assert_eq!(bitmap.allocate(3), 2);
        assert_eq!(bitmap.allocate(1), 5);
        assert_eq!(bitmap.used_count(), 6);

        // a hole too small for 3 sectors is skipped, then reused for 1.
        bitmap.free(2, 2);
        assert_eq!(bitmap.allocate(3), 6);
        assert_eq!(bitmap.allocate(1), 2);
        assert_eq!(bitmap.allocate(1), 3);
        assert_eq!(bitmap.allocate(2), 9);
    }

    #[test]
    fn grows_across_words() {
        let mut bitmap = SectorBitmap::new();
        bitmap.force(0, 2);
        let start = bitmap.allocate(200);
        assert_eq!(start, 2);
        assert!(bitmap.is_used(201));
        assert!(!bitmap.is_used(202));
        assert_eq!(bitmap.allocate(1), 202);
    }

    #[test]
    fn free_outside_is_noop() {
        let mut bitmap = SectorBitmap::new();
        bitmap.free(1000, 10);
        assert_eq!(bitmap.used_count(), 0);
        assert_eq!(bitmap.allocate(4), 0);
    }

    #[test]
    fn no_overlap_after_interleaved_frees() {
        let mut bitmap = SectorBitmap::new();
        bitmap.force(0, 2);
        let mut live = Vec::new();
        for i in 0..64u32 {
            let len = i % 5 + 1;
            live.push((bitmap.allocate(len), len));
        }
        let mut kept = Vec::new();
        for (i, (start, len)) in live.into_iter().enumerate() {
            if i % 2 == 0 {
                bitmap.free(start, len);
            } else {
                kept.push((start, len));
            }
        }
        for len in 1..8 {
            let start = bitmap.allocate(len);
            assert!(start >= 2);
            for &(s, l) in &kept {
                assert!(start + len <= s || s + l <= start, "{start}+{len} overlaps {s}+{l}");
            }
            kept.push((start, len));
        }
    }
}
