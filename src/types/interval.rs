/// An inclusive block range `[start, end]`.
///
/// Interval sets throughout the sync engine are kept in normal form: sorted
/// by start, pairwise disjoint, and with no adjacent pairs (`[0,5],[6,9]`
/// collapses to `[0,9]`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Interval {
    pub start: u64,
    pub end: u64,
}

impl Interval {
    pub fn new(start: u64, end: u64) -> Self {
        debug_assert!(start <= end, "interval start must not exceed end");
        Self { start, end }
    }

    /// Number of blocks covered, inclusive of both ends.
    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }

    pub fn contains(&self, block: u64) -> bool {
        self.start <= block && block <= self.end
    }

    /// Clip to `[from, to]`, returning `None` when the result is empty.
    pub fn clip(&self, from: u64, to: u64) -> Option<Interval> {
        let start = self.start.max(from);
        let end = self.end.min(to);
        (start <= end).then_some(Interval { start, end })
    }

    fn overlaps_or_adjacent(&self, other: &Interval) -> bool {
        // Adjacent means end + 1 == other.start; saturate to avoid overflow
        // at u64::MAX.
        self.start <= other.end.saturating_add(1) && other.start <= self.end.saturating_add(1)
    }
}

/// Merge a list of intervals into normal form.
pub fn interval_union(intervals: &[Interval]) -> Vec<Interval> {
    if intervals.is_empty() {
        return Vec::new();
    }

    let mut sorted = intervals.to_vec();
    sorted.sort();

    let mut result: Vec<Interval> = Vec::with_capacity(sorted.len());
    for interval in sorted {
        match result.last_mut() {
            Some(last) if last.overlaps_or_adjacent(&interval) => {
                last.end = last.end.max(interval.end);
            }
            _ => result.push(interval),
        }
    }
    result
}

/// Subtract `remove` from `base`, returning the uncovered remainder in
/// normal form.
pub fn interval_difference(base: &[Interval], remove: &[Interval]) -> Vec<Interval> {
    let base = interval_union(base);
    let remove = interval_union(remove);

    let mut result = Vec::new();
    for interval in base {
        let mut cursor = interval.start;
        let mut exhausted = false;

        for r in &remove {
            if r.end < cursor {
                continue;
            }
            if r.start > interval.end {
                break;
            }
            if r.start > cursor {
                result.push(Interval::new(cursor, r.start - 1));
            }
            if r.end >= interval.end {
                exhausted = true;
                break;
            }
            cursor = r.end + 1;
        }

        if !exhausted && cursor <= interval.end {
            result.push(Interval::new(cursor, interval.end));
        }
    }
    result
}

/// Intersect several interval sets. The result covers exactly the blocks
/// present in every input set.
pub fn interval_intersection_many(sets: &[Vec<Interval>]) -> Vec<Interval> {
    let Some((first, rest)) = sets.split_first() else {
        return Vec::new();
    };

    let mut acc = interval_union(first);
    for set in rest {
        let set = interval_union(set);
        let mut next = Vec::new();
        let mut i = 0;
        let mut j = 0;
        while i < acc.len() && j < set.len() {
            let a = acc[i];
            let b = set[j];
            let start = a.start.max(b.start);
            let end = a.end.min(b.end);
            if start <= end {
                next.push(Interval::new(start, end));
            }
            if a.end < b.end {
                i += 1;
            } else {
                j += 1;
            }
        }
        acc = next;
        if acc.is_empty() {
            break;
        }
    }
    acc
}

/// Total number of blocks covered by a normalized set.
pub fn interval_sum(intervals: &[Interval]) -> u64 {
    interval_union(intervals).iter().map(Interval::len).sum()
}

/// Split an interval into chunks of at most `max_size` blocks.
pub fn interval_chunks(interval: Interval, max_size: u64) -> Vec<Interval> {
    debug_assert!(max_size > 0);
    let mut chunks = Vec::new();
    let mut start = interval.start;
    while start <= interval.end {
        let end = interval.end.min(start + max_size - 1);
        chunks.push(Interval::new(start, end));
        if end == u64::MAX {
            break;
        }
        start = end + 1;
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    fn iv(start: u64, end: u64) -> Interval {
        Interval::new(start, end)
    }

    #[test]
    fn union_merges_overlap_and_adjacency() {
        let merged = interval_union(&[iv(0, 10), iv(20, 30), iv(10, 20)]);
        assert_eq!(merged, vec![iv(0, 30)]);

        let merged = interval_union(&[iv(0, 5), iv(6, 9)]);
        assert_eq!(merged, vec![iv(0, 9)]);

        let merged = interval_union(&[iv(0, 5), iv(7, 9)]);
        assert_eq!(merged, vec![iv(0, 5), iv(7, 9)]);
    }

    #[test]
    fn union_is_idempotent() {
        let once = interval_union(&[iv(3, 7), iv(1, 2), iv(9, 12)]);
        let twice = interval_union(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn difference_carves_holes() {
        let remaining = interval_difference(&[iv(0, 100)], &[iv(10, 20), iv(50, 60)]);
        assert_eq!(remaining, vec![iv(0, 9), iv(21, 49), iv(61, 100)]);
    }

    #[test]
    fn difference_with_full_cover_is_empty() {
        assert!(interval_difference(&[iv(5, 10)], &[iv(0, 100)]).is_empty());
    }

    #[test]
    fn difference_with_no_overlap_is_identity() {
        let remaining = interval_difference(&[iv(5, 10)], &[iv(20, 30)]);
        assert_eq!(remaining, vec![iv(5, 10)]);
    }

    #[test]
    fn intersection_across_sets() {
        let result =
            interval_intersection_many(&[vec![iv(0, 100)], vec![iv(50, 200)]]);
        assert_eq!(result, vec![iv(50, 100)]);

        let result = interval_intersection_many(&[
            vec![iv(0, 50), iv(80, 120)],
            vec![iv(40, 100)],
        ]);
        assert_eq!(result, vec![iv(40, 50), iv(80, 100)]);
    }

    #[test]
    fn intersection_empty_when_disjoint() {
        assert!(interval_intersection_many(&[vec![iv(0, 10)], vec![iv(20, 30)]]).is_empty());
    }

    #[test]
    fn sum_counts_blocks() {
        assert_eq!(interval_sum(&[iv(0, 9), iv(20, 24)]), 15);
        assert_eq!(interval_sum(&[]), 0);
    }

    #[test]
    fn chunks_respect_max_size() {
        let chunks = interval_chunks(iv(0, 25), 10);
        assert_eq!(chunks, vec![iv(0, 9), iv(10, 19), iv(20, 25)]);

        let chunks = interval_chunks(iv(5, 5), 10);
        assert_eq!(chunks, vec![iv(5, 5)]);
    }

    #[test]
    fn clip_bounds() {
        assert_eq!(iv(0, 100).clip(50, 200), Some(iv(50, 100)));
        assert_eq!(iv(0, 100).clip(101, 200), None);
    }
}
