use std::sync::Arc;

use crate::core::types::{Extent, Offset, MAX_OFFSET};
use crate::gcl::operators::{
    AndList, BigramList, CachedList, ContainmentList, FromToList, OneElementList,
    OrderedCombinationList, OrList, RangeList, RestrictedList, SequenceList,
};
use crate::gcl::posting_list::PostingList;
use crate::gcl::segmented::SegmentedPostingList;
use crate::gcl::visible::VisibleExtents;

/// The closed set of extent-algebra operators. Every variant implements
/// the four Clarke/Burkowski access functions; everything else (counting,
/// enumeration, materialization) derives from them. Operators are
/// stateful lazy iterators: probes with monotone positions are amortized
/// constant time.
#[derive(Debug)]
pub enum ExtentList {
    Empty,
    Postings(PostingList),
    Segmented(SegmentedPostingList),
    Cached(CachedList),
    OneElement(OneElementList),
    Range(RangeList),
    Bigram(BigramList),
    Or(OrList),
    And(AndList),
    Containment(ContainmentList),
    Sequence(SequenceList),
    FromTo(FromToList),
    OrderedCombination(OrderedCombinationList),
    Restricted(RestrictedList),
}

impl ExtentList {
    /// Smallest extent whose start is >= position (Clarke's Tau).
    pub fn first_start_at_least(&mut self, position: Offset) -> Option<Extent> {
        match self {
            ExtentList::Empty => None,
            ExtentList::Postings(list) => list.first_start_at_least(position),
            ExtentList::Segmented(list) => list.first_start_at_least(position),
            ExtentList::Cached(list) => list.first_start_at_least(position),
            ExtentList::OneElement(list) => list.first_start_at_least(position),
            ExtentList::Range(list) => list.first_start_at_least(position),
            ExtentList::Bigram(list) => list.first_start_at_least(position),
            ExtentList::Or(list) => list.first_start_at_least(position),
            ExtentList::And(list) => list.first_start_at_least(position),
            ExtentList::Containment(list) => list.first_start_at_least(position),
            ExtentList::Sequence(list) => list.first_start_at_least(position),
            ExtentList::FromTo(list) => list.first_start_at_least(position),
            ExtentList::OrderedCombination(list) => list.first_start_at_least(position),
            ExtentList::Restricted(list) => list.first_start_at_least(position),
        }
    }

    /// Smallest extent whose end is >= position (Clarke's Rho).
    pub fn first_end_at_least(&mut self, position: Offset) -> Option<Extent> {
        match self {
            ExtentList::Empty => None,
            ExtentList::Postings(list) => list.first_end_at_least(position),
            ExtentList::Segmented(list) => list.first_end_at_least(position),
            ExtentList::Cached(list) => list.first_end_at_least(position),
            ExtentList::OneElement(list) => list.first_end_at_least(position),
            ExtentList::Range(list) => list.first_end_at_least(position),
            ExtentList::Bigram(list) => list.first_end_at_least(position),
            ExtentList::Or(list) => list.first_end_at_least(position),
            ExtentList::And(list) => list.first_end_at_least(position),
            ExtentList::Containment(list) => list.first_end_at_least(position),
            ExtentList::Sequence(list) => list.first_end_at_least(position),
            ExtentList::FromTo(list) => list.first_end_at_least(position),
            ExtentList::OrderedCombination(list) => list.first_end_at_least(position),
            ExtentList::Restricted(list) => list.first_end_at_least(position),
        }
    }

    /// Largest extent whose start is <= position (Clarke's Rho').
    pub fn last_start_at_most(&mut self, position: Offset) -> Option<Extent> {
        match self {
            ExtentList::Empty => None,
            ExtentList::Postings(list) => list.last_start_at_most(position),
            ExtentList::Segmented(list) => list.last_start_at_most(position),
            ExtentList::Cached(list) => list.last_start_at_most(position),
            ExtentList::OneElement(list) => list.last_start_at_most(position),
            ExtentList::Range(list) => list.last_start_at_most(position),
            ExtentList::Bigram(list) => list.last_start_at_most(position),
            ExtentList::Or(list) => list.last_start_at_most(position),
            ExtentList::And(list) => list.last_start_at_most(position),
            ExtentList::Containment(list) => list.last_start_at_most(position),
            ExtentList::Sequence(list) => list.last_start_at_most(position),
            ExtentList::FromTo(list) => list.last_start_at_most(position),
            ExtentList::OrderedCombination(list) => list.last_start_at_most(position),
            ExtentList::Restricted(list) => list.last_start_at_most(position),
        }
    }

    /// Largest extent whose end is <= position (Clarke's Tau').
    pub fn last_end_at_most(&mut self, position: Offset) -> Option<Extent> {
        match self {
            ExtentList::Empty => None,
            ExtentList::Postings(list) => list.last_end_at_most(position),
            ExtentList::Segmented(list) => list.last_end_at_most(position),
            ExtentList::Cached(list) => list.last_end_at_most(position),
            ExtentList::OneElement(list) => list.last_end_at_most(position),
            ExtentList::Range(list) => list.last_end_at_most(position),
            ExtentList::Bigram(list) => list.last_end_at_most(position),
            ExtentList::Or(list) => list.last_end_at_most(position),
            ExtentList::And(list) => list.last_end_at_most(position),
            ExtentList::Containment(list) => list.last_end_at_most(position),
            ExtentList::Sequence(list) => list.last_end_at_most(position),
            ExtentList::FromTo(list) => list.last_end_at_most(position),
            ExtentList::OrderedCombination(list) => list.last_end_at_most(position),
            ExtentList::Restricted(list) => list.last_end_at_most(position),
        }
    }

    /// Up to `limit` extents that start at or after `from` and end at or
    /// before `to`.
    pub fn next_n(&mut self, from: Offset, to: Offset, limit: usize) -> Vec<Extent> {
        let mut results = Vec::new();
        let mut position = from;
        while results.len() < limit {
            match self.first_start_at_least(position) {
                Some(extent) if extent.end <= to => {
                    position = extent.start + 1;
                    results.push(extent);
                }
                _ => break,
            }
        }
        results
    }

    /// Number of extents starting at or after `start` and ending at or
    /// before `end`.
    pub fn count(&mut self, start: Offset, end: Offset) -> u64 {
        match self {
            ExtentList::Empty => 0,
            ExtentList::Postings(list) => list.count(start, end),
            ExtentList::Segmented(list) => list.count(start, end),
            _ => {
                let mut total = 0;
                let mut position = start;
                while let Some(extent) = self.first_start_at_least(position) {
                    if extent.end > end {
                        break;
                    }
                    total += 1;
                    position = extent.start + 1;
                }
                total
            }
        }
    }

    pub fn len(&mut self) -> u64 {
        match self {
            ExtentList::Empty => 0,
            ExtentList::Postings(list) => list.len() as u64,
            ExtentList::Segmented(list) => list.len(),
            ExtentList::Cached(list) => list.len() as u64,
            _ => self.count(0, MAX_OFFSET),
        }
    }

    pub fn is_empty(&mut self) -> bool {
        self.first_start_at_least(0).is_none()
    }

    /// Sum of the sizes of all extents in the list.
    pub fn total_size(&mut self) -> u64 {
        match self {
            ExtentList::Empty => 0,
            ExtentList::Postings(list) => list.len() as u64,
            ExtentList::Segmented(list) => list.len(),
            ExtentList::Cached(list) => list.total_size(),
            _ => {
                let mut total = 0;
                let mut position = 0;
                while let Some(extent) = self.first_start_at_least(position) {
                    total += extent.size();
                    position = extent.start + 1;
                }
                total
            }
        }
    }

    /// The n-th extent (zero-based).
    pub fn get_nth(&mut self, n: u64) -> Option<Extent> {
        let mut position = 0;
        let mut extent = None;
        for _ in 0..=n {
            extent = self.first_start_at_least(position);
            position = extent?.start + 1;
        }
        extent
    }

    /// Materializes the complete list.
    pub fn all_extents(&mut self) -> Vec<Extent> {
        let mut extents = Vec::new();
        let mut position = 0;
        while let Some(extent) = self.first_start_at_least(position) {
            extents.push(extent);
            position = extent.start + 1;
        }
        extents
    }

    /// A list is secure when every extent it can produce is guaranteed to
    /// lie inside the user's visible ranges.
    pub fn is_secure(&self) -> bool {
        match self {
            ExtentList::Empty | ExtentList::Restricted(_) => true,
            ExtentList::Or(list) => list.children.iter().all(|c| c.is_secure()),
            ExtentList::Sequence(list) => list.children.iter().all(|c| c.is_secure()),
            ExtentList::Containment(list) => list.return_container && list.container.is_secure(),
            _ => false,
        }
    }

    /// Almost secure: one application of the restriction operator makes
    /// the list secure.
    pub fn is_almost_secure(&self) -> bool {
        match self {
            ExtentList::Empty | ExtentList::Restricted(_) => true,
            ExtentList::Postings(_)
            | ExtentList::Segmented(_)
            | ExtentList::Cached(_)
            | ExtentList::OneElement(_)
            | ExtentList::Range(_)
            | ExtentList::Bigram(_)
            | ExtentList::OrderedCombination(_) => true,
            ExtentList::Or(list) => list.children.iter().all(|c| c.is_almost_secure()),
            ExtentList::And(list) => list.children.iter().all(|c| c.is_almost_secure()),
            ExtentList::Sequence(list) => list.children.iter().all(|c| c.is_almost_secure()),
            ExtentList::FromTo(list) => {
                list.from.is_almost_secure() && list.to.is_almost_secure()
            }
            ExtentList::Containment(list) => {
                list.return_container && list.container.is_almost_secure()
            }
        }
    }

    pub fn make_almost_secure(self, visible: &Arc<VisibleExtents>) -> ExtentList {
        if self.is_almost_secure() {
            self
        } else {
            ExtentList::Restricted(RestrictedList {
                child: Box::new(self),
                visible: Arc::clone(visible),
            })
        }
    }

    /// Applies the restriction operator exactly as often as needed.
    pub fn make_secure(self, visible: &Arc<VisibleExtents>) -> ExtentList {
        let list = self.make_almost_secure(visible);
        if list.is_secure() {
            list
        } else {
            ExtentList::Restricted(RestrictedList {
                child: Box::new(list),
                visible: Arc::clone(visible),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gcl::operators::{AndList, FromToList, OrList, SequenceList};

    fn postings(values: Vec<u64>) -> ExtentList {
        ExtentList::Postings(PostingList::new(values))
    }

    #[test]
    fn test_or_narrowest_wins() {
        let mut or = ExtentList::Or(OrList {
            children: vec![postings(vec![1, 5]), postings(vec![2, 6])],
        });
        let extents = or.all_extents();
        let values: Vec<u64> = extents.iter().map(|e| e.start).collect();
        assert_eq!(values, vec![1, 2, 5, 6]);
        assert_eq!(or.count(2, 5), 2);
    }

    #[test]
    fn test_and_spans_all_children() {
        // "the"^"mat" over the tiny corpus: the=[1,5], mat=[6].
        let mut and = ExtentList::And(AndList {
            children: vec![postings(vec![1, 5]), postings(vec![6])],
        });
        let extents = and.all_extents();
        assert_eq!(
            extents,
            vec![Extent::new(1, 6), Extent::new(5, 6)]
        );
    }

    #[test]
    fn test_sequence_phrase() {
        // new(1) york(2) times(3) new(4) york(5): "new york".
        let mut sequence = ExtentList::Sequence(SequenceList {
            children: vec![postings(vec![1, 4]), postings(vec![2, 5])],
        });
        assert_eq!(
            sequence.all_extents(),
            vec![Extent::new(1, 2), Extent::new(4, 5)]
        );
        assert_eq!(sequence.first_end_at_least(3), Some(Extent::new(4, 5)));
        assert_eq!(sequence.last_end_at_most(5), Some(Extent::new(4, 5)));
        assert_eq!(sequence.last_end_at_most(4), Some(Extent::new(1, 2)));
    }

    #[test]
    fn test_from_to() {
        // "cat".."mat" over the tiny corpus.
        let mut from_to = ExtentList::FromTo(FromToList {
            from: Box::new(postings(vec![2])),
            to: Box::new(postings(vec![6])),
        });
        assert_eq!(from_to.all_extents(), vec![Extent::new(2, 6)]);
    }

    #[test]
    fn test_containment_with_range() {
        // "the" < [3]: every occurrence of "the" within a width-3 window.
        let mut list = ExtentList::Containment(ContainmentList {
            container: Box::new(ExtentList::Range(RangeList::new(3, 1000))),
            containee: Box::new(postings(vec![1, 5])),
            return_container: false,
            inverted: false,
        });
        assert_eq!(
            list.all_extents(),
            vec![Extent::new(1, 1), Extent::new(5, 5)]
        );
    }

    #[test]
    fn test_containment_not_containing() {
        // Documents (1,4) and (6,9); only the first contains "cat" at 2.
        let doc_extents =
            CachedList::from_extents(vec![Extent::new(1, 4), Extent::new(6, 9)]);
        let mut list = ExtentList::Containment(ContainmentList {
            container: Box::new(ExtentList::Cached(doc_extents)),
            containee: Box::new(postings(vec![2])),
            return_container: true,
            inverted: true,
        });
        assert_eq!(list.all_extents(), vec![Extent::new(6, 9)]);
    }

    #[test]
    fn test_monotone_cursor_invariant() {
        let mut or = ExtentList::Or(OrList {
            children: vec![postings(vec![3, 9, 20]), postings(vec![5, 9, 21])],
        });
        let mut previous: Option<Extent> = None;
        for p in [0u64, 2, 4, 4, 8, 15, 21] {
            if let Some(extent) = or.first_start_at_least(p) {
                if let Some(prev) = previous {
                    assert!(extent.start >= prev.start);
                }
                previous = Some(extent);
            }
        }
    }

    #[test]
    fn test_empty_operators() {
        let mut and = ExtentList::And(AndList {
            children: vec![postings(vec![]), postings(vec![1])],
        });
        assert_eq!(and.first_start_at_least(0), None);
        assert_eq!(and.len(), 0);

        let mut or = ExtentList::Or(OrList {
            children: vec![postings(vec![]), ExtentList::Empty],
        });
        assert!(or.is_empty());
    }

    #[test]
    fn test_security_tracking() {
        let visible = Arc::new(VisibleExtents::new(vec![Extent::new(1, 4)]));
        let raw = postings(vec![1, 5]);
        assert!(!raw.is_secure());
        assert!(raw.is_almost_secure());
        let mut secured = raw.make_secure(&visible);
        assert!(secured.is_secure());
        assert_eq!(secured.all_extents(), vec![Extent::new(1, 1)]);
    }

    #[test]
    fn test_bigram_widens_extents() {
        let mut bigram = ExtentList::Bigram(BigramList {
            inner: Box::new(postings(vec![1, 4])),
        });
        assert_eq!(
            bigram.all_extents(),
            vec![Extent::new(1, 2), Extent::new(4, 5)]
        );
        assert_eq!(bigram.first_end_at_least(5), Some(Extent::new(4, 5)));
    }

    #[test]
    fn test_get_nth_and_total_size() {
        let mut list = postings(vec![2, 4, 8]);
        assert_eq!(list.get_nth(0), Some(Extent::new(2, 2)));
        assert_eq!(list.get_nth(2), Some(Extent::new(8, 8)));
        assert_eq!(list.get_nth(3), None);
        assert_eq!(list.total_size(), 3);
    }
}
