use crate::core::types::{Extent, Offset};

/// The address ranges a user is allowed to see. Queries on behalf of a
/// restricted user wrap their operator trees in a restriction filter that
/// intersects results with these ranges; the extent algebra tracks
/// secure/almost-secure so the filter is applied exactly once per branch
/// that needs it.
#[derive(Debug, Clone, Default)]
pub struct VisibleExtents {
    /// Sorted, pairwise disjoint.
    extents: Vec<Extent>,
}

impl VisibleExtents {
    pub fn new(mut extents: Vec<Extent>) -> Self {
        extents.sort_by_key(|e| e.start);
        // Coalesce overlapping or touching ranges.
        let mut merged: Vec<Extent> = Vec::with_capacity(extents.len());
        for extent in extents {
            match merged.last_mut() {
                Some(last) if extent.start <= last.end + 1 => {
                    last.end = last.end.max(extent.end);
                }
                _ => merged.push(extent),
            }
        }
        VisibleExtents { extents: merged }
    }

    /// Everything visible: the identity filter.
    pub fn everything() -> Self {
        VisibleExtents {
            extents: vec![Extent::new(0, crate::core::types::MAX_OFFSET)],
        }
    }

    pub fn is_empty(&self) -> bool {
        self.extents.is_empty()
    }

    pub fn extents(&self) -> &[Extent] {
        &self.extents
    }

    /// True iff the extent lies fully inside one visible range.
    pub fn covers(&self, extent: &Extent) -> bool {
        match self.extents.partition_point(|e| e.start <= extent.start) {
            0 => false,
            index => self.extents[index - 1].end >= extent.end,
        }
    }

    /// True iff the single address is visible.
    pub fn covers_posting(&self, posting: Offset) -> bool {
        self.covers(&Extent::new(posting, posting))
    }
}

/// The inverse view: a deletion set. GC keeps a posting iff it is not in
/// any deleted range.
#[derive(Debug, Clone, Default)]
pub struct DeletedRanges {
    ranges: Vec<Extent>,
}

impl DeletedRanges {
    pub fn new() -> Self {
        DeletedRanges { ranges: Vec::new() }
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    pub fn ranges(&self) -> &[Extent] {
        &self.ranges
    }

    pub fn add(&mut self, start: Offset, end: Offset) {
        self.ranges.push(Extent::new(start, end));
        self.ranges.sort_by_key(|e| e.start);
        let mut merged: Vec<Extent> = Vec::with_capacity(self.ranges.len());
        for extent in self.ranges.drain(..) {
            match merged.last_mut() {
                Some(last) if extent.start <= last.end + 1 => {
                    last.end = last.end.max(extent.end);
                }
                _ => merged.push(extent),
            }
        }
        self.ranges = merged;
    }

    pub fn clear(&mut self) {
        self.ranges.clear();
    }

    pub fn contains(&self, posting: Offset) -> bool {
        match self.ranges.partition_point(|e| e.start <= posting) {
            0 => false,
            index => self.ranges[index - 1].end >= posting,
        }
    }

    /// Number of addresses of [start, end] that fall into deleted ranges.
    pub fn overlap(&self, start: Offset, end: Offset) -> u64 {
        self.ranges
            .iter()
            .map(|r| {
                let s = r.start.max(start);
                let e = r.end.min(end);
                if s <= e {
                    e - s + 1
                } else {
                    0
                }
            })
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_covers() {
        let visible = VisibleExtents::new(vec![Extent::new(10, 20), Extent::new(30, 40)]);
        assert!(visible.covers(&Extent::new(10, 20)));
        assert!(visible.covers(&Extent::new(12, 15)));
        assert!(!visible.covers(&Extent::new(5, 12)));
        assert!(!visible.covers(&Extent::new(18, 25)));
        assert!(!visible.covers(&Extent::new(21, 29)));
        assert!(visible.covers_posting(33));
        assert!(!visible.covers_posting(25));
    }

    #[test]
    fn test_ranges_coalesce() {
        let visible = VisibleExtents::new(vec![
            Extent::new(1, 5),
            Extent::new(6, 9),
            Extent::new(20, 22),
        ]);
        assert_eq!(visible.extents().len(), 2);
        assert!(visible.covers(&Extent::new(2, 8)));
    }

    #[test]
    fn test_deleted_ranges() {
        let mut deleted = DeletedRanges::new();
        deleted.add(1, 6);
        deleted.add(10, 12);
        assert!(deleted.contains(1));
        assert!(deleted.contains(6));
        assert!(!deleted.contains(7));
        assert_eq!(deleted.overlap(4, 11), 5);
        deleted.add(7, 9);
        assert_eq!(deleted.ranges().len(), 1);
    }
}
