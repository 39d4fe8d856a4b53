use std::sync::Arc;

use crate::core::types::{Extent, Offset, MAX_OFFSET};
use crate::gcl::list::ExtentList;
use crate::gcl::visible::VisibleExtents;

/// Materialized extent list; the short-list optimizations collapse small
/// operator trees into one of these. Starts and ends are parallel arrays,
/// both strictly increasing (generalized-concordance order).
#[derive(Debug)]
pub struct CachedList {
    starts: Vec<Offset>,
    ends: Vec<Offset>,
}

impl CachedList {
    /// Builds a cached list, dropping extents that would nest: an
    /// incoming extent replaces its predecessor when it ends no later.
    pub fn from_extents(extents: Vec<Extent>) -> Self {
        let mut starts: Vec<Offset> = Vec::with_capacity(extents.len());
        let mut ends: Vec<Offset> = Vec::with_capacity(extents.len());
        for extent in extents {
            while let (Some(&s), Some(&e)) = (starts.last(), ends.last()) {
                if extent.start >= s && extent.end <= e {
                    starts.pop();
                    ends.pop();
                } else {
                    break;
                }
            }
            if let Some(&e) = ends.last() {
                if extent.end <= e {
                    continue;
                }
                if extent.start <= *starts.last().unwrap() {
                    continue;
                }
            }
            starts.push(extent.start);
            ends.push(extent.end);
        }
        CachedList { starts, ends }
    }

    pub fn len(&self) -> usize {
        self.starts.len()
    }

    pub fn total_size(&self) -> u64 {
        self.starts
            .iter()
            .zip(&self.ends)
            .map(|(s, e)| e - s + 1)
            .sum()
    }

    fn extent(&self, index: usize) -> Extent {
        Extent::new(self.starts[index], self.ends[index])
    }

    pub fn first_start_at_least(&mut self, position: Offset) -> Option<Extent> {
        let index = self.starts.partition_point(|&s| s < position);
        (index < self.starts.len()).then(|| self.extent(index))
    }

    pub fn first_end_at_least(&mut self, position: Offset) -> Option<Extent> {
        let index = self.ends.partition_point(|&e| e < position);
        (index < self.ends.len()).then(|| self.extent(index))
    }

    pub fn last_start_at_most(&mut self, position: Offset) -> Option<Extent> {
        match self.starts.partition_point(|&s| s <= position) {
            0 => None,
            index => Some(self.extent(index - 1)),
        }
    }

    pub fn last_end_at_most(&mut self, position: Offset) -> Option<Extent> {
        match self.ends.partition_point(|&e| e <= position) {
            0 => None,
            index => Some(self.extent(index - 1)),
        }
    }
}

/// Single synthetic extent (a bare index address in a query).
#[derive(Debug)]
pub struct OneElementList {
    pub start: Offset,
    pub end: Offset,
}

impl OneElementList {
    pub fn new(start: Offset, end: Offset) -> Self {
        OneElementList { start, end }
    }

    pub fn first_start_at_least(&mut self, position: Offset) -> Option<Extent> {
        (self.start >= position).then(|| Extent::new(self.start, self.end))
    }

    pub fn first_end_at_least(&mut self, position: Offset) -> Option<Extent> {
        (self.end >= position).then(|| Extent::new(self.start, self.end))
    }

    pub fn last_start_at_most(&mut self, position: Offset) -> Option<Extent> {
        (self.start <= position).then(|| Extent::new(self.start, self.end))
    }

    pub fn last_end_at_most(&mut self, position: Offset) -> Option<Extent> {
        (self.end <= position).then(|| Extent::new(self.start, self.end))
    }
}

/// Every window of `width` consecutive addresses: (i, i+width-1).
#[derive(Debug)]
pub struct RangeList {
    pub width: Offset,
    pub max_offset: Offset,
}

impl RangeList {
    pub fn new(width: Offset, max_offset: Offset) -> Self {
        RangeList {
            width: width.max(1),
            max_offset,
        }
    }

    pub fn first_start_at_least(&mut self, position: Offset) -> Option<Extent> {
        let end = position.checked_add(self.width - 1)?;
        (end <= self.max_offset).then(|| Extent::new(position, end))
    }

    pub fn first_end_at_least(&mut self, position: Offset) -> Option<Extent> {
        let end = position.max(self.width - 1);
        (end <= self.max_offset).then(|| Extent::new(end - (self.width - 1), end))
    }

    pub fn last_start_at_most(&mut self, position: Offset) -> Option<Extent> {
        if self.max_offset < self.width - 1 {
            return None;
        }
        let start = position.min(self.max_offset - (self.width - 1));
        Some(Extent::new(start, start + self.width - 1))
    }

    pub fn last_end_at_most(&mut self, position: Offset) -> Option<Extent> {
        let end = position.min(self.max_offset);
        (end >= self.width - 1).then(|| Extent::new(end - (self.width - 1), end))
    }
}

/// Bigram lists hold the postings of a fused two-token term; the stored
/// posting addresses the first token, so every extent is widened by one.
#[derive(Debug)]
pub struct BigramList {
    pub inner: Box<ExtentList>,
}

impl BigramList {
    pub fn first_start_at_least(&mut self, position: Offset) -> Option<Extent> {
        let extent = self.inner.first_start_at_least(position)?;
        Some(Extent::new(extent.start, extent.end + 1))
    }

    pub fn first_end_at_least(&mut self, position: Offset) -> Option<Extent> {
        let extent = self.inner.first_end_at_least(position.saturating_sub(1))?;
        Some(Extent::new(extent.start, extent.end + 1))
    }

    pub fn last_start_at_most(&mut self, position: Offset) -> Option<Extent> {
        let extent = self.inner.last_start_at_most(position)?;
        Some(Extent::new(extent.start, extent.end + 1))
    }

    pub fn last_end_at_most(&mut self, position: Offset) -> Option<Extent> {
        if position == 0 {
            return None;
        }
        let extent = self.inner.last_end_at_most(position - 1)?;
        Some(Extent::new(extent.start, extent.end + 1))
    }
}

/// OR: of the children's candidates, the narrowest wins — smallest end,
/// ties broken towards the largest start.
#[derive(Debug)]
pub struct OrList {
    pub children: Vec<ExtentList>,
}

impl OrList {
    fn forward(
        &mut self,
        position: Offset,
        probe: impl Fn(&mut ExtentList, Offset) -> Option<Extent>,
    ) -> Option<Extent> {
        let mut best: Option<Extent> = None;
        for child in &mut self.children {
            let Some(candidate) = probe(child, position) else {
                continue;
            };
            best = Some(match best {
                None => candidate,
                Some(current) => {
                    if candidate.end < current.end
                        || (candidate.end == current.end && candidate.start > current.start)
                    {
                        candidate
                    } else {
                        current
                    }
                }
            });
        }
        best
    }

    fn backward(
        &mut self,
        position: Offset,
        probe: impl Fn(&mut ExtentList, Offset) -> Option<Extent>,
    ) -> Option<Extent> {
        let mut best: Option<Extent> = None;
        for child in &mut self.children {
            let Some(candidate) = probe(child, position) else {
                continue;
            };
            best = Some(match best {
                None => candidate,
                Some(current) => {
                    if candidate.start > current.start
                        || (candidate.start == current.start && candidate.end < current.end)
                    {
                        candidate
                    } else {
                        current
                    }
                }
            });
        }
        best
    }

    pub fn first_start_at_least(&mut self, position: Offset) -> Option<Extent> {
        self.forward(position, |child, p| child.first_start_at_least(p))
    }

    pub fn first_end_at_least(&mut self, position: Offset) -> Option<Extent> {
        self.forward(position, |child, p| child.first_end_at_least(p))
    }

    pub fn last_start_at_most(&mut self, position: Offset) -> Option<Extent> {
        self.backward(position, |child, p| child.last_start_at_most(p))
    }

    pub fn last_end_at_most(&mut self, position: Offset) -> Option<Extent> {
        self.backward(position, |child, p| child.last_end_at_most(p))
    }
}

/// AND: the candidate must cover one match of every child, so the result
/// spans from the earliest child start to the latest child end. A child
/// with no match ends the list.
#[derive(Debug)]
pub struct AndList {
    pub children: Vec<ExtentList>,
}

impl AndList {
    fn combine(
        &mut self,
        position: Offset,
        probe: impl Fn(&mut ExtentList, Offset) -> Option<Extent>,
    ) -> Option<Extent> {
        let mut start = MAX_OFFSET;
        let mut end = 0;
        for child in &mut self.children {
            let extent = probe(child, position)?;
            start = start.min(extent.start);
            end = end.max(extent.end);
        }
        Some(Extent::new(start, end))
    }

    pub fn first_start_at_least(&mut self, position: Offset) -> Option<Extent> {
        self.combine(position, |child, p| child.first_start_at_least(p))
    }

    pub fn first_end_at_least(&mut self, position: Offset) -> Option<Extent> {
        self.combine(position, |child, p| child.first_end_at_least(p))
    }

    pub fn last_start_at_most(&mut self, position: Offset) -> Option<Extent> {
        self.combine(position, |child, p| child.last_start_at_most(p))
    }

    pub fn last_end_at_most(&mut self, position: Offset) -> Option<Extent> {
        self.combine(position, |child, p| child.last_end_at_most(p))
    }
}

/// Containment covers all four arrow operators: ">" and "/>" return
/// container extents, "<" and "/<" return containee extents; `inverted`
/// flips the kept side of the test.
#[derive(Debug)]
pub struct ContainmentList {
    pub container: Box<ExtentList>,
    pub containee: Box<ExtentList>,
    pub return_container: bool,
    pub inverted: bool,
}

impl ContainmentList {
    /// Does the container side hold a match inside [start, end]?
    fn has_contained_match(&mut self, extent: &Extent) -> bool {
        match self.containee.first_start_at_least(extent.start) {
            Some(inner) => inner.end <= extent.end,
            None => false,
        }
    }

    /// Is the candidate extent inside some container match?
    fn is_contained(&mut self, extent: &Extent) -> bool {
        match self.container.last_start_at_most(extent.start) {
            Some(outer) => outer.end >= extent.end,
            None => false,
        }
    }

    pub fn first_start_at_least(&mut self, position: Offset) -> Option<Extent> {
        let mut position = position;
        loop {
            if self.return_container {
                let candidate = self.container.first_start_at_least(position)?;
                if self.has_contained_match(&candidate) != self.inverted {
                    return Some(candidate);
                }
                position = candidate.start.checked_add(1)?;
            } else {
                let candidate = self.containee.first_start_at_least(position)?;
                if self.is_contained(&candidate) != self.inverted {
                    return Some(candidate);
                }
                position = candidate.start.checked_add(1)?;
            }
        }
    }

    pub fn first_end_at_least(&mut self, position: Offset) -> Option<Extent> {
        let mut position = position;
        loop {
            let candidate = if self.return_container {
                self.container.first_end_at_least(position)?
            } else {
                self.containee.first_end_at_least(position)?
            };
            let keep = if self.return_container {
                self.has_contained_match(&candidate)
            } else {
                self.is_contained(&candidate)
            };
            if keep != self.inverted {
                return Some(candidate);
            }
            position = candidate.end.checked_add(1)?;
        }
    }

    pub fn last_start_at_most(&mut self, position: Offset) -> Option<Extent> {
        let mut position = position;
        loop {
            let candidate = if self.return_container {
                self.container.last_start_at_most(position)?
            } else {
                self.containee.last_start_at_most(position)?
            };
            let keep = if self.return_container {
                self.has_contained_match(&candidate)
            } else {
                self.is_contained(&candidate)
            };
            if keep != self.inverted {
                return Some(candidate);
            }
            position = candidate.start.checked_sub(1)?;
        }
    }

    pub fn last_end_at_most(&mut self, position: Offset) -> Option<Extent> {
        let mut position = position;
        loop {
            let candidate = if self.return_container {
                self.container.last_end_at_most(position)?
            } else {
                self.containee.last_end_at_most(position)?
            };
            let keep = if self.return_container {
                self.has_contained_match(&candidate)
            } else {
                self.is_contained(&candidate)
            };
            if keep != self.inverted {
                return Some(candidate);
            }
            position = candidate.end.checked_sub(1)?;
        }
    }
}

/// Sequence: strict adjacency across the children, spanning from the
/// first child's start to the last child's end. This is the phrase
/// operator.
#[derive(Debug)]
pub struct SequenceList {
    pub children: Vec<ExtentList>,
}

impl SequenceList {
    /// Forward chain from a first-child match; returns the sequence end
    /// on success, or the position to restart from on a mismatch.
    fn chain_forward(&mut self, first: Extent) -> Result<Offset, Option<Offset>> {
        let mut expected = first.end + 1;
        for child in self.children.iter_mut().skip(1) {
            match child.first_start_at_least(expected) {
                Some(extent) if extent.start == expected => expected = extent.end + 1,
                Some(_) => return Err(Some(first.start + 1)),
                None => return Err(None),
            }
        }
        Ok(expected - 1)
    }

    /// Backward chain from a last-child match; returns the sequence start.
    fn chain_backward(&mut self, last: Extent) -> Option<Offset> {
        let mut start = last.start;
        let count = self.children.len();
        for index in (0..count - 1).rev() {
            if start == 0 {
                return None;
            }
            match self.children[index].last_end_at_most(start - 1) {
                Some(extent) if extent.end == start - 1 => start = extent.start,
                _ => return None,
            }
        }
        Some(start)
    }

    pub fn first_start_at_least(&mut self, position: Offset) -> Option<Extent> {
        let mut position = position;
        loop {
            let first = self.children[0].first_start_at_least(position)?;
            match self.chain_forward(first) {
                Ok(end) => return Some(Extent::new(first.start, end)),
                Err(Some(next)) => position = next,
                Err(None) => return None,
            }
        }
    }

    pub fn first_end_at_least(&mut self, position: Offset) -> Option<Extent> {
        let mut position = position;
        let last_index = self.children.len() - 1;
        loop {
            let last = self.children[last_index].first_end_at_least(position)?;
            if let Some(start) = self.chain_backward(last) {
                return Some(Extent::new(start, last.end));
            }
            position = last.end.checked_add(1)?;
        }
    }

    pub fn last_start_at_most(&mut self, position: Offset) -> Option<Extent> {
        let mut position = position;
        loop {
            let first = self.children[0].last_start_at_most(position)?;
            match self.chain_forward(first) {
                Ok(end) => return Some(Extent::new(first.start, end)),
                _ => position = first.start.checked_sub(1)?,
            }
        }
    }

    pub fn last_end_at_most(&mut self, position: Offset) -> Option<Extent> {
        let mut position = position;
        let last_index = self.children.len() - 1;
        loop {
            let last = self.children[last_index].last_end_at_most(position)?;
            if let Some(start) = self.chain_backward(last) {
                return Some(Extent::new(start, last.end));
            }
            position = last.end.checked_sub(1)?;
        }
    }
}

/// "A .. B": spans from an A match to the next B match ending after it,
/// tightened so that starts and ends both stay strictly increasing.
#[derive(Debug)]
pub struct FromToList {
    pub from: Box<ExtentList>,
    pub to: Box<ExtentList>,
}

impl FromToList {
    /// Tightens a candidate by pulling the start to the last `from` match
    /// that still ends before the `to` match does.
    fn tighten(&mut self, to_extent: Extent) -> Option<Extent> {
        let from_extent = self.from.last_end_at_most(to_extent.end.checked_sub(1)?)?;
        Some(Extent::new(from_extent.start, to_extent.end))
    }

    pub fn first_start_at_least(&mut self, position: Offset) -> Option<Extent> {
        let from_extent = self.from.first_start_at_least(position)?;
        let to_extent = self.to.first_end_at_least(from_extent.end + 1)?;
        self.tighten(to_extent)
    }

    pub fn first_end_at_least(&mut self, position: Offset) -> Option<Extent> {
        let mut position = position;
        loop {
            let to_extent = self.to.first_end_at_least(position)?;
            if let Some(result) = self.tighten(to_extent) {
                return Some(result);
            }
            position = to_extent.end.checked_add(1)?;
        }
    }

    pub fn last_start_at_most(&mut self, position: Offset) -> Option<Extent> {
        let from_extent = self.from.last_start_at_most(position)?;
        let to_extent = self.to.first_end_at_least(from_extent.end + 1)?;
        let result = self.tighten(to_extent)?;
        if result.start <= position {
            Some(result)
        } else {
            None
        }
    }

    pub fn last_end_at_most(&mut self, position: Offset) -> Option<Extent> {
        let mut position = position;
        loop {
            let to_extent = self.to.last_end_at_most(position)?;
            if let Some(result) = self.tighten(to_extent) {
                return Some(result);
            }
            position = to_extent.end.checked_sub(1)?;
        }
    }
}

/// Fragments of one term across partitions, already sorted by address
/// range and pairwise disjoint; probes are routed to the owning fragment
/// directly instead of fanning out like OR.
#[derive(Debug)]
pub struct OrderedCombinationList {
    pub children: Vec<ExtentList>,
    /// (first, last) posting of each child, ascending and disjoint.
    pub ranges: Vec<(Offset, Offset)>,
}

impl OrderedCombinationList {
    pub fn first_start_at_least(&mut self, position: Offset) -> Option<Extent> {
        let mut index = self.ranges.partition_point(|&(_, last)| last < position);
        while index < self.children.len() {
            if let Some(extent) = self.children[index].first_start_at_least(position) {
                return Some(extent);
            }
            index += 1;
        }
        None
    }

    pub fn first_end_at_least(&mut self, position: Offset) -> Option<Extent> {
        self.first_start_at_least(position)
    }

    pub fn last_start_at_most(&mut self, position: Offset) -> Option<Extent> {
        let mut index = self.ranges.partition_point(|&(first, _)| first <= position);
        while index > 0 {
            if let Some(extent) = self.children[index - 1].last_start_at_most(position) {
                return Some(extent);
            }
            index -= 1;
        }
        None
    }

    pub fn last_end_at_most(&mut self, position: Offset) -> Option<Extent> {
        self.last_start_at_most(position)
    }
}

/// Restriction operator: passes through only extents fully inside the
/// user-visible address ranges.
#[derive(Debug)]
pub struct RestrictedList {
    pub child: Box<ExtentList>,
    pub visible: Arc<VisibleExtents>,
}

impl RestrictedList {
    pub fn first_start_at_least(&mut self, position: Offset) -> Option<Extent> {
        let mut position = position;
        loop {
            let extent = self.child.first_start_at_least(position)?;
            if self.visible.covers(&extent) {
                return Some(extent);
            }
            position = extent.start.checked_add(1)?;
        }
    }

    pub fn first_end_at_least(&mut self, position: Offset) -> Option<Extent> {
        let mut position = position;
        loop {
            let extent = self.child.first_end_at_least(position)?;
            if self.visible.covers(&extent) {
                return Some(extent);
            }
            position = extent.end.checked_add(1)?;
        }
    }

    pub fn last_start_at_most(&mut self, position: Offset) -> Option<Extent> {
        let mut position = position;
        loop {
            let extent = self.child.last_start_at_most(position)?;
            if self.visible.covers(&extent) {
                return Some(extent);
            }
            position = extent.start.checked_sub(1)?;
        }
    }

    pub fn last_end_at_most(&mut self, position: Offset) -> Option<Extent> {
        let mut position = position;
        loop {
            let extent = self.child.last_end_at_most(position)?;
            if self.visible.covers(&extent) {
                return Some(extent);
            }
            position = extent.end.checked_sub(1)?;
        }
    }
}
