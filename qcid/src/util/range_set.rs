use std::ops::Range;

/// A set of u64 values stored as sorted, disjoint and non-adjacent ranges.
///
/// Adjacent or overlapping ranges are merged on insertion, so a run of
/// consecutive values costs a single entry. The number of entries is what
/// callers bound, see [`RangeSet::intervals`].
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RangeSet(Vec<Range<u64>>);

impl RangeSet {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn contains(&self, x: u64) -> bool {
        // index of the first range starting after x
        let idx = self.0.partition_point(|range| range.start <= x);
        idx > 0 && self.0[idx - 1].end > x
    }

    pub fn insert_one(&mut self, x: u64) {
        if let Some(end) = x.checked_add(1) {
            self.insert(x..end);
        }
    }

    fn insert(&mut self, range: Range<u64>) {
        if range.is_empty() {
            return;
        }
        // the first range that overlaps or touches the new one
        let first = self.0.partition_point(|r| r.end < range.start);
        // the first range entirely after the new one, not touching it
        let last = self.0.partition_point(|r| r.start <= range.end);

        if first == last {
            self.0.insert(first, range);
            return;
        }
        let start = self.0[first].start.min(range.start);
        let end = self.0[last - 1].end.max(range.end);
        self.0.splice(first..last, std::iter::once(start..end));
    }

    /// The number of disjoint ranges.
    pub fn intervals(&self) -> usize {
        self.0.len()
    }
}
