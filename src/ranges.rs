//! Index-range windows over an externally ordered list.
//!
//! A client asks for one or more closed ranges `[start, end]` of list
//! positions. On every window change the gateway diffs the old and new
//! ranges to decide what to (re)send, then slices the ordered list to
//! materialize each window.

use std::collections::HashSet;

/// A closed, zero-based `[start, end]` index range.
pub type SliceRange = [i64; 2];

/// A list that can be cut into windows.
pub trait Subslicer {
    type Slice;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Closed-open `[start, end)`.
    fn subslice(&self, start: usize, end: usize) -> Self::Slice;
}

impl<'a, T> Subslicer for &'a [T] {
    type Slice = &'a [T];

    fn len(&self) -> usize {
        <[T]>::len(self)
    }

    fn subslice(&self, start: usize, end: usize) -> &'a [T] {
        let items: &'a [T] = self;
        &items[start..end]
    }
}

/// Result of [`SliceRanges::delta`]. Ordering inside each set is unspecified.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RangeDelta {
    pub added: SliceRanges,
    pub removed: SliceRanges,
    pub same: SliceRanges,
}

/// The ranges a client currently subscribes to.
///
/// Ranges are neither merged nor checked for overlap.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SliceRanges(pub Vec<SliceRange>);

impl SliceRanges {
    pub fn new(ranges: Vec<SliceRange>) -> Self {
        Self(ranges)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &SliceRange> {
        self.0.iter()
    }

    /// Every range goes forwards and starts at or after index 0.
    pub fn valid(&self) -> bool {
        self.0.iter().all(|&[start, end]| start >= 0 && end >= start)
    }

    /// Compare against the next requested window, treating both sides as
    /// sets of distinct ranges.
    pub fn delta(&self, next: &SliceRanges) -> RangeDelta {
        let olds: HashSet<SliceRange> = self.0.iter().copied().collect();
        let news: HashSet<SliceRange> = next.0.iter().copied().collect();

        let mut delta = RangeDelta::default();
        for old in &olds {
            if news.contains(old) {
                delta.same.0.push(*old);
            } else {
                delta.removed.0.push(*old);
            }
        }
        delta.added.0 = news.difference(&olds).copied().collect();
        delta
    }

    /// Cut `list` into one slice per range, in range order.
    ///
    /// Bounds past the end are clamped to the last index; an empty list
    /// yields an empty slice for every range. Call [`Self::valid`] first:
    /// negative bounds are treated as 0. Overlapping ranges produce
    /// overlapping slices.
    pub fn slice_into<S: Subslicer>(&self, list: S) -> Vec<S::Slice> {
        let len = list.len();
        self.0
            .iter()
            .map(|&[start, end]| {
                if len == 0 {
                    return list.subslice(0, 0);
                }
                let last = len - 1;
                let start = clamp_index(start, last);
                let end = clamp_index(end, last).max(start);
                list.subslice(start, end + 1)
            })
            .collect()
    }

    /// First range containing `index`, if any.
    pub fn inside(&self, index: i64) -> Option<SliceRange> {
        self.0
            .iter()
            .copied()
            .find(|&[start, end]| index >= start && index <= end)
    }

    /// Largest requested end index, capped at `max_index`.
    pub fn upper_clamp(&self, max_index: i64) -> Option<i64> {
        self.0
            .iter()
            .map(|&[_, end]| end.min(max_index))
            .max()
    }
}

impl From<Vec<SliceRange>> for SliceRanges {
    fn from(ranges: Vec<SliceRange>) -> Self {
        Self(ranges)
    }
}

fn clamp_index(index: i64, last: usize) -> usize {
    usize::try_from(index).unwrap_or(0).min(last)
}
