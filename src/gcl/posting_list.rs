use crate::core::types::{
    decode_doc_level_tf, encode_doc_level_tf, Extent, Offset, DOC_LEVEL_MAX_TF, DOC_LEVEL_SHIFT,
};

/// A fully materialized posting list with an internal cursor. The cursor
/// makes repeated positional probes with non-decreasing targets amortized
/// O(1): a short gallop forward from the last hit, then binary search.
#[derive(Debug)]
pub struct PostingList {
    postings: Vec<Offset>,
    cursor: usize,
}

impl PostingList {
    pub fn new(postings: Vec<Offset>) -> Self {
        debug_assert!(postings.windows(2).all(|w| w[0] < w[1]));
        PostingList {
            postings,
            cursor: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.postings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.postings.is_empty()
    }

    pub fn postings(&self) -> &[Offset] {
        &self.postings
    }

    /// Index of the first posting >= position.
    fn seek_forward(&mut self, position: Offset) -> usize {
        let n = self.postings.len();
        let mut low = if self.cursor < n && self.postings[self.cursor] < position {
            self.cursor
        } else {
            0
        };
        // Gallop to bracket the target, then binary search the bracket.
        let mut step = 1;
        let mut high = low;
        while high < n && self.postings[high] < position {
            low = high;
            high += step;
            step *= 2;
        }
        let high = high.min(n);
        low + self.postings[low..high].partition_point(|&p| p < position)
    }

    pub fn first_start_at_least(&mut self, position: Offset) -> Option<Extent> {
        let index = self.seek_forward(position);
        if index >= self.postings.len() {
            return None;
        }
        self.cursor = index;
        let posting = self.postings[index];
        Some(Extent::new(posting, posting))
    }

    pub fn first_end_at_least(&mut self, position: Offset) -> Option<Extent> {
        self.first_start_at_least(position)
    }

    pub fn last_start_at_most(&mut self, position: Offset) -> Option<Extent> {
        let index = self.postings.partition_point(|&p| p <= position);
        if index == 0 {
            return None;
        }
        self.cursor = index - 1;
        let posting = self.postings[index - 1];
        Some(Extent::new(posting, posting))
    }

    pub fn last_end_at_most(&mut self, position: Offset) -> Option<Extent> {
        self.last_start_at_most(position)
    }

    pub fn count(&self, start: Offset, end: Offset) -> u64 {
        let from = self.postings.partition_point(|&p| p < start);
        let to = self.postings.partition_point(|&p| p <= end);
        (to - from) as u64
    }
}

/// Merges document-level posting lists: postings addressing the same
/// document are folded into one by summing their decoded TFs and
/// re-encoding the total.
pub fn merge_document_level_lists(lists: Vec<Vec<Offset>>) -> Vec<Offset> {
    let mut all: Vec<Offset> = lists.into_iter().flatten().collect();
    all.sort_unstable();
    let mut merged: Vec<Offset> = Vec::with_capacity(all.len());
    for posting in all {
        match merged.last() {
            Some(&last) if last | DOC_LEVEL_MAX_TF == posting | DOC_LEVEL_MAX_TF => {
                let document = posting >> DOC_LEVEL_SHIFT;
                let tf = decode_doc_level_tf(last & DOC_LEVEL_MAX_TF)
                    + decode_doc_level_tf(posting & DOC_LEVEL_MAX_TF);
                *merged.last_mut().unwrap() =
                    (document << DOC_LEVEL_SHIFT) + encode_doc_level_tf(tf);
            }
            _ => merged.push(posting),
        }
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forward_probes() {
        let mut list = PostingList::new(vec![1, 5, 9, 100]);
        assert_eq!(list.first_start_at_least(0), Some(Extent::new(1, 1)));
        assert_eq!(list.first_start_at_least(5), Some(Extent::new(5, 5)));
        assert_eq!(list.first_start_at_least(6), Some(Extent::new(9, 9)));
        assert_eq!(list.first_start_at_least(101), None);
    }

    #[test]
    fn test_backward_probes() {
        let mut list = PostingList::new(vec![1, 5, 9]);
        assert_eq!(list.last_end_at_most(9), Some(Extent::new(9, 9)));
        assert_eq!(list.last_end_at_most(8), Some(Extent::new(5, 5)));
        assert_eq!(list.last_end_at_most(0), None);
    }

    #[test]
    fn test_monotone_probe_sequence() {
        let postings: Vec<u64> = (0..10_000).map(|i| i * 7 + 3).collect();
        let mut list = PostingList::new(postings.clone());
        let mut position = 0;
        for &expected in &postings {
            let extent = list.first_start_at_least(position).unwrap();
            assert_eq!(extent.start, expected);
            position = extent.start + 1;
        }
        assert_eq!(list.first_start_at_least(position), None);
    }

    #[test]
    fn test_count() {
        let list = PostingList::new(vec![1, 5, 9, 12]);
        assert_eq!(list.count(1, 12), 4);
        assert_eq!(list.count(2, 9), 2);
        assert_eq!(list.count(13, 20), 0);
    }

    #[test]
    fn test_document_level_merge_sums_tfs() {
        // Two fragments for the same document start (address 3).
        let a = vec![(3u64 << DOC_LEVEL_SHIFT) + 2, (9u64 << DOC_LEVEL_SHIFT) + 1];
        let b = vec![(3u64 << DOC_LEVEL_SHIFT) + 5];
        let merged = merge_document_level_lists(vec![a, b]);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0], (3u64 << DOC_LEVEL_SHIFT) + 7);
        assert_eq!(merged[1], (9u64 << DOC_LEVEL_SHIFT) + 1);
    }
}
