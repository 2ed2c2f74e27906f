//! Which parts of an object have been handed out since it was last verified.
//!
//! Coverage is independent of what the cache still holds: a range counts
//! once it was returned to a caller, even if its bytes were evicted since.

use std::collections::BTreeMap;

use cairn_types::ByteRange;

/// Disjoint, non-touching ranges keyed by start offset.
#[derive(Debug, Default)]
pub(crate) struct Coverage {
    ranges: BTreeMap<u64, u64>,
}

impl Coverage {
    /// Add `range`, merging it with every range it overlaps or abuts.
    pub(crate) fn insert(&mut self, range: ByteRange) {
        if range.is_empty() {
            return;
        }
        let mut start = range.start;
        let mut end = range.end;
        let touching: Vec<u64> = self
            .ranges
            .range(..=end)
            .filter(|(_, e)| **e >= start)
            .map(|(s, _)| *s)
            .collect();
        for s in touching {
            if let Some(e) = self.ranges.remove(&s) {
                start = start.min(s);
                end = end.max(e);
            }
        }
        self.ranges.insert(start, end);
    }

    /// Whether every byte of an object of `size` bytes is covered.
    pub(crate) fn is_complete(&self, size: u64) -> bool {
        self.ranges
            .first_key_value()
            .is_some_and(|(start, end)| *start == 0 && *end >= size)
    }

    pub(crate) fn covered_bytes(&self) -> u64 {
        self.ranges.iter().map(|(s, e)| e - s).sum()
    }
}
