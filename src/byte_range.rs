//! Bookkeeping of which byte ranges of an archive are in use.
//!
//! The whole file, from offset 0 to [`ByteRangeAllocator::size()`], is covered
//! by contiguous, non-overlapping ranges. Each is either used (and carries a
//! payload saying what lives there) or free. Free ranges are also indexed by
//! size so we can find the best place for new data quickly.
//!
//! Two free ranges are never adjacent: removing or extending always coalesces.
//! Placement also avoids leaving free ranges smaller than a configured minimum
//! (except the trailing one), since small gaps can't be covered with an
//! alignment segment in the following entry's extra field.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use log::*;

/// A range `[start, end)` of the file, with what lives there.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangeEntry<T> {
    start: u64,
    end: u64,
    payload: Option<T>,
}

impl<T> RangeEntry<T> {
    fn free(start: u64, end: u64) -> Self {
        Self {
            start,
            end,
            payload: None,
        }
    }

    pub fn start(&self) -> u64 {
        self.start
    }

    pub fn end(&self) -> u64 {
        self.end
    }

    pub fn size(&self) -> u64 {
        self.end - self.start
    }

    pub fn is_free(&self) -> bool {
        self.payload.is_none()
    }

    pub fn payload(&self) -> Option<&T> {
        self.payload.as_ref()
    }
}

/// How [`ByteRangeAllocator::locate_free()`] picks among free ranges.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlacementAlgorithm {
    /// The smallest free range that fits.
    BestFit,
    /// The free range with the lowest offset that fits.
    FirstFit,
}

#[derive(Debug, Clone)]
pub struct ByteRangeAllocator<T> {
    size: u64,
    by_start: BTreeMap<u64, RangeEntry<T>>,
    /// Free ranges as `(size, start)`
    free_by_size: BTreeSet<(u64, u64)>,
    free_by_start: BTreeSet<u64>,
    min_free_size: u64,
}

impl<T: Clone + PartialEq + fmt::Debug> ByteRangeAllocator<T> {
    /// Creates an allocator for a file of `size` bytes, all of them free.
    pub fn new(size: u64, min_free_size: u64) -> Self {
        let mut map = Self {
            size,
            by_start: BTreeMap::new(),
            free_by_size: BTreeSet::new(),
            free_by_start: BTreeSet::new(),
            min_free_size,
        };
        if size > 0 {
            map.internal_add(RangeEntry::free(0, size));
        }
        map
    }

    fn internal_add(&mut self, entry: RangeEntry<T>) {
        if entry.is_free() {
            self.free_by_size.insert((entry.size(), entry.start));
            self.free_by_start.insert(entry.start);
        }
        let previous = self.by_start.insert(entry.start, entry);
        debug_assert!(previous.is_none());
    }

    fn internal_remove(&mut self, start: u64) -> RangeEntry<T> {
        let entry = self
            .by_start
            .remove(&start)
            .unwrap_or_else(|| panic!("no range starts at {}", start));
        if entry.is_free() {
            self.free_by_size.remove(&(entry.size(), entry.start));
            self.free_by_start.remove(&entry.start);
        }
        entry
    }

    /// Marks `[start, end)` as used by `payload`.
    ///
    /// The range must lie entirely within a single free range;
    /// anything else is a bug in the caller.
    pub fn add(&mut self, start: u64, end: u64, payload: T) -> RangeEntry<T> {
        assert!(end > start, "empty range {}..{}", start, end);
        assert!(start < self.size, "range start {} >= size {}", start, self.size);
        assert!(end <= self.size, "range end {} > size {}", end, self.size);

        let container = self
            .floor(start)
            .unwrap_or_else(|| panic!("no range contains {}", start));
        assert!(
            container.is_free() && container.end >= end,
            "{}..{} isn't inside a free range (found {}..{})",
            start,
            end,
            container.start,
            container.end
        );
        let (far_start, far_end) = (container.start, container.end);

        self.internal_remove(far_start);
        if far_start < start {
            self.internal_add(RangeEntry::free(far_start, start));
        }
        let used = RangeEntry {
            start,
            end,
            payload: Some(payload),
        };
        self.internal_add(used.clone());
        if end < far_end {
            self.internal_add(RangeEntry::free(end, far_end));
        }
        used
    }

    /// Frees a range previously returned by [`add()`](Self::add).
    pub fn remove(&mut self, entry: &RangeEntry<T>) {
        assert!(!entry.is_free(), "can't remove a free range");
        assert!(
            self.by_start.get(&entry.start) == Some(entry),
            "{:?} isn't tracked",
            entry
        );

        self.internal_remove(entry.start);
        self.internal_add(RangeEntry::free(entry.start, entry.end));
        self.coalesce(entry.start);
    }

    /// Merges the free range at `start` with free neighbors, if any.
    fn coalesce(&mut self, start: u64) {
        let end = self.by_start[&start].end;

        let previous = self
            .by_start
            .range(..start)
            .next_back()
            .filter(|(_, e)| e.is_free())
            .map(|(s, _)| *s);
        let next = self
            .by_start
            .get(&end)
            .filter(|e| e.is_free())
            .map(|e| e.end);

        if previous.is_none() && next.is_none() {
            return;
        }

        let mut new_start = start;
        if let Some(p) = previous {
            self.internal_remove(p);
            new_start = p;
        }
        let mut new_end = end;
        if let Some(n) = next {
            self.internal_remove(end);
            new_end = n;
        }
        self.internal_remove(start);
        self.internal_add(RangeEntry::free(new_start, new_end));
    }

    /// Drops a trailing free range, if there is one, shrinking the map.
    pub fn truncate(&mut self) {
        let last = match self.by_start.values().next_back() {
            Some(l) if l.is_free() => l.start,
            _ => return,
        };
        self.internal_remove(last);
        self.size = last;
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    /// The size of the map if it were truncated.
    pub fn used_size(&self) -> u64 {
        match self.by_start.values().next_back() {
            Some(last) if last.is_free() => last.start,
            _ => self.size,
        }
    }

    /// Grows the map to `new_size`, the new space being free.
    pub fn extend(&mut self, new_size: u64) {
        assert!(new_size >= self.size, "can't extend to a smaller size");
        if new_size == self.size {
            return;
        }
        let old_size = self.size;
        self.internal_add(RangeEntry::free(old_size, new_size));
        self.size = new_size;
        self.coalesce(old_size);
    }

    /// Finds where a block of `size` bytes should go so that
    /// `(offset + align_offset) % align == 0`.
    ///
    /// If no free range fits, the returned offset is past the last used range,
    /// and the map must be [extended](Self::extend) before the block is added.
    pub fn locate_free(
        &self,
        size: u64,
        align_offset: u64,
        align: u64,
        algorithm: PlacementAlgorithm,
    ) -> u64 {
        assert!(size > 0, "can't place an empty block");
        let align = align.max(1);

        let candidates: Box<dyn Iterator<Item = &RangeEntry<T>> + '_> = match algorithm {
            PlacementAlgorithm::BestFit => Box::new(
                self.free_by_size
                    .range((size, 0)..)
                    .map(move |(_, start)| &self.by_start[start]),
            ),
            PlacementAlgorithm::FirstFit => {
                Box::new(self.free_by_start.iter().map(move |s| &self.by_start[s]))
            }
        };

        let mut best: Option<(&RangeEntry<T>, u64)> = None;
        for current in candidates {
            let extra = self.padding_for(current.start, align_offset, align);

            if current.size() < size + extra {
                continue;
            }

            // Don't leave a gap too small to cover, unless it runs into
            // another free range (or the end of the file) anyway.
            let left_over = current.size() - (size + extra);
            if left_over > 0 && left_over < self.min_free_size {
                match self.by_start.get(&current.end) {
                    Some(next) if !next.is_free() => continue,
                    _ => {}
                }
            }

            if let Some((b, _)) = best {
                if b.size() < current.size() {
                    continue;
                }
            }

            best = Some((current, extra));
            if algorithm == PlacementAlgorithm::FirstFit {
                break;
            }
        }

        match best {
            Some((range, extra)) => range.start + extra,
            None => {
                let first_free = self.used_size();
                first_free + self.padding_for(first_free, align_offset, align)
            }
        }
    }

    /// How far past `start` we must go to be aligned,
    /// bumped so the gap we leave behind is big enough to be covered.
    fn padding_for(&self, start: u64, align_offset: u64, align: u64) -> u64 {
        let mut extra = (align - ((start + align_offset) % align)) % align;
        if extra > 0 && extra < self.min_free_size {
            let blocks = (self.min_free_size - extra + align - 1) / align;
            extra += blocks * align;
        }
        extra
    }

    /// All free ranges except the trailing one.
    pub fn free_areas(&self) -> Vec<RangeEntry<T>> {
        self.free_by_start
            .iter()
            .map(|s| &self.by_start[s])
            .filter(|e| e.end != self.size)
            .cloned()
            .collect()
    }

    fn floor(&self, offset: u64) -> Option<&RangeEntry<T>> {
        self.by_start.range(..=offset).next_back().map(|(_, e)| e)
    }

    /// The range immediately before the one starting at `entry.start()`.
    pub fn before(&self, entry: &RangeEntry<T>) -> Option<&RangeEntry<T>> {
        self.by_start
            .range(..entry.start)
            .next_back()
            .map(|(_, e)| e)
    }

    /// The range immediately after the one starting at `entry.start()`.
    pub fn after(&self, entry: &RangeEntry<T>) -> Option<&RangeEntry<T>> {
        self.by_start
            .range(entry.start + 1..)
            .next()
            .map(|(_, e)| e)
    }

    /// The range containing `offset`, if `offset < size()`.
    pub fn at(&self, offset: u64) -> Option<&RangeEntry<T>> {
        if offset >= self.size {
            return None;
        }
        self.floor(offset)
    }

    /// Every range, in file order.
    pub fn iter(&self) -> impl Iterator<Item = &RangeEntry<T>> {
        self.by_start.values()
    }
}

impl<T: fmt::Debug> fmt::Display for ByteRangeAllocator<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, e) in self.by_start.values().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            match &e.payload {
                Some(p) => write!(f, "{} - {}: {:?}", e.start, e.end, p)?,
                None => write!(f, "{} - {}: free", e.start, e.end)?,
            }
        }
        Ok(())
    }
}

impl<T: Clone + PartialEq + fmt::Debug> ByteRangeAllocator<T> {
    /// Logs the whole map; handy when placement goes sideways.
    pub fn trace_layout(&self, what: &str) {
        if log_enabled!(Level::Trace) {
            trace!("{} layout: {}", what, self);
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    type Map = ByteRangeAllocator<&'static str>;

    /// Everything we promise about the ranges, checked the slow way.
    fn check_invariants(map: &Map) {
        let mut expected_start = 0;
        let mut previous_free = false;
        for e in map.iter() {
            assert_eq!(e.start(), expected_start, "gap or overlap in {}", map);
            assert!(e.end() > e.start());
            assert!(!(previous_free && e.is_free()), "adjacent free in {}", map);
            previous_free = e.is_free();
            expected_start = e.end();
        }
        assert_eq!(expected_start, map.size());

        let free: Vec<u64> = map.iter().filter(|e| e.is_free()).map(|e| e.start()).collect();
        let indexed: Vec<u64> = map.free_by_start.iter().copied().collect();
        assert_eq!(free, indexed);
        assert_eq!(map.free_by_size.len(), free.len());
    }

    #[test]
    fn add_splits_free_range() {
        let mut map = Map::new(100, 0);
        let e = map.add(10, 20, "a");
        check_invariants(&map);
        assert_eq!(map.at(0).unwrap().end(), 10);
        assert!(map.at(0).unwrap().is_free());
        assert_eq!(map.at(15).unwrap().payload(), Some(&"a"));
        assert!(map.after(&e).unwrap().is_free());
        assert_eq!(map.free_areas().len(), 1);
        assert_eq!(map.used_size(), 20);
    }

    #[test]
    fn remove_coalesces_both_sides() {
        let mut map = Map::new(30, 0);
        let a = map.add(0, 10, "a");
        let b = map.add(10, 20, "b");
        let c = map.add(20, 30, "c");
        map.remove(&a);
        map.remove(&c);
        check_invariants(&map);
        map.remove(&b);
        check_invariants(&map);
        assert_eq!(map.iter().count(), 1);
        assert!(map.at(29).unwrap().is_free());
    }

    #[test]
    #[should_panic]
    fn add_over_used_range_panics() {
        let mut map = Map::new(30, 0);
        map.add(0, 10, "a");
        map.add(5, 15, "b");
    }

    #[test]
    #[should_panic]
    fn remove_untracked_panics() {
        let mut map = Map::new(30, 0);
        let a = map.add(0, 10, "a");
        map.remove(&a);
        map.remove(&a);
    }

    #[test]
    fn extend_and_truncate() {
        let mut map = Map::new(0, 0);
        assert_eq!(map.size(), 0);
        map.extend(10);
        let a = map.add(0, 5, "a");
        map.extend(20);
        check_invariants(&map);
        assert_eq!(map.iter().count(), 2);
        map.truncate();
        assert_eq!(map.size(), 5);
        map.remove(&a);
        map.truncate();
        assert_eq!(map.size(), 0);
        check_invariants(&map);
    }

    #[test]
    fn best_fit_takes_smallest_range() {
        let mut map = Map::new(100, 0);
        map.add(0, 10, "a");
        // Free 10..30 (20 bytes)
        map.add(30, 40, "b");
        // Free 40..45 (5 bytes)
        map.add(45, 50, "c");
        // Free 50..100 (trailing)
        assert_eq!(map.locate_free(5, 0, 1, PlacementAlgorithm::BestFit), 40);
        assert_eq!(map.locate_free(5, 0, 1, PlacementAlgorithm::FirstFit), 10);
        assert_eq!(map.locate_free(30, 0, 1, PlacementAlgorithm::BestFit), 50);
    }

    #[test]
    fn alignment_pads_past_minimum_gap() {
        let mut map = Map::new(100, 6);
        map.add(0, 3, "a");
        // Aligning 3 + 4 to 4 needs one byte of padding,
        // which is smaller than 6, so we pad a whole extra block.
        let offset = map.locate_free(10, 4, 4, PlacementAlgorithm::FirstFit);
        assert_eq!((offset + 4) % 4, 0);
        assert!(offset - 3 >= 6);
        assert_eq!(offset, 12);
    }

    #[test]
    fn avoids_leaving_tiny_gap_before_used_range() {
        let mut map = Map::new(100, 6);
        map.add(0, 10, "a");
        // 10..22 free, 12 bytes
        map.add(22, 30, "b");
        // Placing 8 bytes would leave 4 behind before "b": too small.
        assert_eq!(map.locate_free(8, 0, 1, PlacementAlgorithm::FirstFit), 30);
        // Filling it exactly is fine.
        assert_eq!(map.locate_free(12, 0, 1, PlacementAlgorithm::FirstFit), 10);
    }

    #[test]
    fn falls_back_past_last_entry() {
        let mut map = Map::new(10, 0);
        map.add(0, 10, "a");
        let offset = map.locate_free(5, 0, 8, PlacementAlgorithm::BestFit);
        assert_eq!(offset, 16);
        map.extend(offset + 5);
        map.add(offset, offset + 5, "b");
        check_invariants(&map);
        assert_eq!(map.free_areas().len(), 1);
    }

    #[test]
    fn random_operations_keep_invariants() {
        // A tiny LCG is enough to shake things around deterministically.
        let mut seed: u64 = 0x2545_f491_4f6c_dd1d;
        let mut next = move |bound: u64| {
            seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            (seed >> 33) % bound
        };

        let mut map = Map::new(0, 6);
        let mut live: Vec<RangeEntry<&'static str>> = Vec::new();
        for _ in 0..2000 {
            match next(4) {
                0 | 1 => {
                    let size = next(50) + 1;
                    let align = [1, 2, 4, 8][next(4) as usize];
                    let algorithm = if next(2) == 0 {
                        PlacementAlgorithm::BestFit
                    } else {
                        PlacementAlgorithm::FirstFit
                    };
                    let start = map.locate_free(size, next(30), align, algorithm);
                    if start + size > map.size() {
                        map.extend(start + size);
                    }
                    live.push(map.add(start, start + size, "x"));
                }
                2 if !live.is_empty() => {
                    let i = next(live.len() as u64) as usize;
                    let e = live.swap_remove(i);
                    map.remove(&e);
                }
                _ => map.truncate(),
            }
            check_invariants(&map);
        }
    }
}
