use std::fmt::{Debug, Display, Write};

/// Closed range `[begin, end]` of code points.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct Interval {
    pub begin: u32,
    pub end: u32,
}

impl Interval {
    pub fn len(self) -> u64 {
        (self.end - self.begin) as u64 + 1
    }
    pub fn contains(self, point: u32) -> bool {
        self.begin <= point && point <= self.end
    }
    pub fn overlaps(self, other: Interval) -> bool {
        self.begin <= other.end && other.begin <= self.end
    }
}

/// A set of code points stored as sorted, disjoint and non-adjacent ranges.
#[derive(Clone, Default, PartialEq, Eq, Hash)]
pub struct IntervalSet {
    ranges: Vec<Interval>,
}

impl IntervalSet {
    pub fn new() -> IntervalSet {
        Self::default()
    }
    pub fn point(point: u32) -> IntervalSet {
        Self::range(point, point)
    }
    pub fn range(begin: u32, end: u32) -> IntervalSet {
        let mut set = Self::new();
        set.add_range(begin, end);
        set
    }

    pub fn add(&mut self, point: u32) {
        self.add_range(point, point);
    }
    /// Inserts `[begin, end]`, merging every range it overlaps or touches.
    /// An inverted range adds nothing.
    pub fn add_range(&mut self, mut begin: u32, mut end: u32) {
        if begin > end {
            return;
        }

        // leftmost range that overlaps or is adjacent from below
        let lo = self
            .ranges
            .partition_point(|r| r.end.saturating_add(1) < begin);
        // one past the rightmost range that overlaps or is adjacent from above
        let hi = self
            .ranges
            .partition_point(|r| r.begin <= end.saturating_add(1));

        if lo < hi {
            begin = begin.min(self.ranges[lo].begin);
            end = end.max(self.ranges[hi - 1].end);
        }

        self.ranges
            .splice(lo..hi, std::iter::once(Interval { begin, end }));
    }

    pub fn has(&self, point: u32) -> bool {
        let i = self.ranges.partition_point(|r| r.end < point);
        self.ranges.get(i).is_some_and(|r| r.contains(point))
    }

    pub fn union(&self, other: &IntervalSet) -> IntervalSet {
        let mut set = self.clone();
        for r in &other.ranges {
            set.add_range(r.begin, r.end);
        }
        set
    }

    /// Sweeps both range lists at once, so a wide range on either side is
    /// checked against every narrow range of the other.
    pub fn intersects(&self, other: &IntervalSet) -> bool {
        let mut a = self.ranges.iter().peekable();
        let mut b = other.ranges.iter().peekable();

        while let (Some(&&x), Some(&&y)) = (a.peek(), b.peek()) {
            if x.overlaps(y) {
                return true;
            }
            match x.end < y.end {
                true => a.next(),
                false => b.next(),
            };
        }

        false
    }

    /// Every point of `[0, bound]` missing from this set.
    pub fn complement(&self, bound: u32) -> IntervalSet {
        let mut ranges = Vec::new();
        let mut next = 0u64;

        for r in &self.ranges {
            if r.begin as u64 > bound as u64 {
                break;
            }
            if (r.begin as u64) > next {
                ranges.push(Interval {
                    begin: next as u32,
                    end: r.begin - 1,
                });
            }
            next = r.end as u64 + 1;
        }

        if next <= bound as u64 {
            ranges.push(Interval {
                begin: next as u32,
                end: bound,
            });
        }

        IntervalSet { ranges }
    }

    pub fn equal(&self, other: &IntervalSet) -> bool {
        self.len() == other.len() && self.ranges == other.ranges
    }

    /// Number of points in the set.
    pub fn len(&self) -> u64 {
        self.ranges.iter().map(|r| r.len()).sum()
    }
    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }
    /// Whether every point of this set is also in `other`.
    pub fn is_subset(&self, other: &IntervalSet) -> bool {
        self.ranges.iter().all(|r| {
            let i = other.ranges.partition_point(|o| o.end < r.begin);
            other
                .ranges
                .get(i)
                .is_some_and(|o| o.begin <= r.begin && r.end <= o.end)
        })
    }
    pub fn ranges(&self) -> &[Interval] {
        &self.ranges
    }
}

pub(crate) struct DisplayPoint(pub u32);

impl Display for DisplayPoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match char::from_u32(self.0) {
            Some(c) if !c.is_control() && c != '\'' && c != '\\' => f.write_char(c),
            _ => write!(f, "\\0x{:x}", self.0),
        }
    }
}

impl Debug for IntervalSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_char('[')?;
        for r in &self.ranges {
            match r.begin == r.end {
                true => write!(f, "{}", DisplayPoint(r.begin))?,
                false => write!(f, "{}-{}", DisplayPoint(r.begin), DisplayPoint(r.end))?,
            }
        }
        f.write_char(']')
    }
}
