use serde::{Deserialize, Serialize};

use crate::instant::Instant;

/// A closed inclusive time range `[begin, end]`.
///
/// Construction enforces `begin <= end`; there is no empty `TimeInterval`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeInterval {
    begin: Instant,
    end: Instant,
}

impl TimeInterval {
    pub fn new(begin: Instant, end: Instant) -> Option<Self> {
        (begin <= end).then_some(Self { begin, end })
    }

    /// Constructs an interval without checking `begin <= end`. Callers must
    /// have already established the invariant (e.g. from a sorted timestamp
    /// vector's first/last element).
    pub fn new_unchecked(begin: Instant, end: Instant) -> Self {
        debug_assert!(begin <= end, "TimeInterval requires begin <= end");
        Self { begin, end }
    }

    pub fn begin(&self) -> Instant {
        self.begin
    }

    pub fn end(&self) -> Instant {
        self.end
    }

    pub fn intersects(&self, other: &TimeInterval) -> bool {
        self.begin <= other.end && other.begin <= self.end
    }

    pub fn disjoint(&self, other: &TimeInterval) -> bool {
        !self.intersects(other)
    }

    pub fn contains_point(&self, point: Instant) -> bool {
        self.begin <= point && point <= self.end
    }

    /// The smallest interval enclosing both `self` and `other`, i.e.
    /// `[min(begin), max(end)]`. Used for super-domain enclosing ranges,
    /// which need not be covered by the union of their members.
    pub fn enclosing(&self, other: &TimeInterval) -> TimeInterval {
        TimeInterval::new_unchecked(self.begin.min(other.begin), self.end.max(other.end))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(n: i128) -> Instant {
        Instant::from_nanos(n)
    }

    #[test]
    fn rejects_inverted_range() {
        assert!(TimeInterval::new(ts(10), ts(5)).is_none());
    }

    #[test]
    fn intersects_overlapping_and_touching() {
        let a = TimeInterval::new(ts(0), ts(10)).unwrap();
        let b = TimeInterval::new(ts(10), ts(20)).unwrap();
        let c = TimeInterval::new(ts(11), ts(20)).unwrap();
        assert!(a.intersects(&b));
        assert!(!a.intersects(&c));
        assert!(a.disjoint(&c));
    }

    #[test]
    fn enclosing_takes_min_and_max() {
        let a = TimeInterval::new(ts(5), ts(15)).unwrap();
        let b = TimeInterval::new(ts(0), ts(8)).unwrap();
        let e = a.enclosing(&b);
        assert_eq!(e.begin(), ts(0));
        assert_eq!(e.end(), ts(15));
    }
}
