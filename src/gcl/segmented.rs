use std::sync::Arc;

use log::error;

use crate::cache::segment_cache::SegmentCache;
use crate::core::error::Result;
use crate::core::types::{Extent, Offset};
use crate::storage::partition::SegmentDescriptor;

/// Supplies a segment's compressed bytes from stable storage. Implemented
/// by the manager's partition handles and by the in-place index.
pub trait SegmentFetch: Send + Sync {
    fn fetch(&self, descriptor: &SegmentDescriptor) -> Result<Vec<u8>>;
    /// Called once when a read fails; the owner marks the index
    /// inconsistent so that further writes are refused.
    fn mark_corrupt(&self);
}

/// A posting list stored as a sequence of compressed segments, pulled
/// through a private two-tier cache. The iterator keeps the usual cursor
/// (current segment + position) so monotone probes stay cheap.
///
/// A failed segment read is reported through the fetch handle and the
/// list then behaves as exhausted; storage is trusted, queries are not
/// the place to surface I/O faults.
pub struct SegmentedPostingList {
    segments: Vec<SegmentDescriptor>,
    source: Arc<dyn SegmentFetch>,
    cache: SegmentCache,
    current_segment: usize,
    total_postings: u64,
}

impl std::fmt::Debug for SegmentedPostingList {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SegmentedPostingList")
            .field("segments", &self.segments)
            .field("cache", &self.cache)
            .field("current_segment", &self.current_segment)
            .field("total_postings", &self.total_postings)
            .finish()
    }
}

impl SegmentedPostingList {
    pub fn new(segments: Vec<SegmentDescriptor>, source: Arc<dyn SegmentFetch>) -> Self {
        let total_postings = segments
            .iter()
            .map(|s| s.header.posting_count as u64)
            .sum();
        SegmentedPostingList {
            segments,
            source,
            cache: SegmentCache::new(),
            current_segment: 0,
            total_postings,
        }
    }

    pub fn len(&self) -> u64 {
        self.total_postings
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn first_posting(&self) -> Option<Offset> {
        self.segments.first().map(|s| s.header.first_posting)
    }

    pub fn last_posting(&self) -> Option<Offset> {
        self.segments.last().map(|s| s.header.last_posting)
    }

    /// Decoded postings of one segment, by index.
    fn segment_postings(&mut self, segment: usize) -> Option<&[Offset]> {
        let segments = &self.segments;
        let source = &self.source;
        match self.cache.get(segment, segments.len(), |index| {
            source.fetch(&segments[index])
        }) {
            Ok(postings) => Some(postings),
            Err(err) => {
                error!("segment read failed: {}", err);
                self.source.mark_corrupt();
                None
            }
        }
    }

    pub fn first_start_at_least(&mut self, position: Offset) -> Option<Extent> {
        // Locate the first segment whose last posting reaches position.
        let mut segment = if self.current_segment < self.segments.len()
            && self.segments[self.current_segment]
                .header
                .last_posting
                >= position
            && (self.current_segment == 0
                || self.segments[self.current_segment - 1].header.last_posting < position)
        {
            self.current_segment
        } else {
            self.segments
                .partition_point(|s| s.header.last_posting < position)
        };
        if segment >= self.segments.len() {
            return None;
        }
        self.current_segment = segment;
        {
            let postings = self.segment_postings(segment)?;
            let index = postings.partition_point(|&p| p < position);
            if index < postings.len() {
                let posting = postings[index];
                return Some(Extent::new(posting, posting));
            }
        }
        // Only reachable if the segment decoded short; fall over to the
        // next one rather than give up.
        segment += 1;
        if segment >= self.segments.len() {
            return None;
        }
        self.current_segment = segment;
        let postings = self.segment_postings(segment)?;
        let posting = *postings.first()?;
        Some(Extent::new(posting, posting))
    }

    pub fn first_end_at_least(&mut self, position: Offset) -> Option<Extent> {
        self.first_start_at_least(position)
    }

    pub fn last_start_at_most(&mut self, position: Offset) -> Option<Extent> {
        // Locate the last segment whose first posting is <= position.
        let segment = self
            .segments
            .partition_point(|s| s.header.first_posting <= position);
        if segment == 0 {
            return None;
        }
        let segment = segment - 1;
        self.current_segment = segment;
        let postings = self.segment_postings(segment)?;
        let index = postings.partition_point(|&p| p <= position);
        if index == 0 {
            return None;
        }
        let posting = postings[index - 1];
        Some(Extent::new(posting, posting))
    }

    pub fn last_end_at_most(&mut self, position: Offset) -> Option<Extent> {
        self.last_start_at_most(position)
    }

    /// Number of postings in [start, end], using segment headers to skip
    /// whole segments where possible.
    pub fn count(&mut self, start: Offset, end: Offset) -> u64 {
        let mut total = 0;
        for segment in 0..self.segments.len() {
            let header = self.segments[segment].header;
            if header.last_posting < start {
                continue;
            }
            if header.first_posting > end {
                break;
            }
            if header.first_posting >= start && header.last_posting <= end {
                total += header.posting_count as u64;
                continue;
            }
            if let Some(postings) = self.segment_postings(segment) {
                let from = postings.partition_point(|&p| p < start);
                let to = postings.partition_point(|&p| p <= end);
                total += (to - from) as u64;
            }
        }
        total
    }

    /// Materializes the whole list; used by short-list optimizations and
    /// the document-level combination path.
    pub fn decode_all(&mut self) -> Vec<Offset> {
        let mut postings = Vec::with_capacity(self.total_postings as usize);
        for segment in 0..self.segments.len() {
            match self.segment_postings(segment) {
                Some(decoded) => postings.extend_from_slice(decoded),
                None => break,
            }
        }
        postings
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compression::codec::{self, CodecId};
    use crate::storage::partition::SegmentHeader;
    use parking_lot::Mutex;

    struct MemorySource {
        blocks: Vec<Vec<u8>>,
        corrupt: Mutex<bool>,
    }

    impl SegmentFetch for MemorySource {
        fn fetch(&self, descriptor: &SegmentDescriptor) -> Result<Vec<u8>> {
            Ok(self.blocks[descriptor.file_offset as usize].clone())
        }

        fn mark_corrupt(&self) {
            *self.corrupt.lock() = true;
        }
    }

    fn build_list(chunks: Vec<Vec<u64>>) -> SegmentedPostingList {
        let mut blocks = Vec::new();
        let mut segments = Vec::new();
        for (i, chunk) in chunks.iter().enumerate() {
            let block = codec::encode(CodecId::VByte, chunk).unwrap();
            segments.push(SegmentDescriptor {
                header: SegmentHeader {
                    byte_length: block.len() as u32,
                    posting_count: chunk.len() as u32,
                    first_posting: chunk[0],
                    last_posting: chunk[chunk.len() - 1],
                },
                file_offset: i as u64,
            });
            blocks.push(block);
        }
        SegmentedPostingList::new(
            segments,
            Arc::new(MemorySource {
                blocks,
                corrupt: Mutex::new(false),
            }),
        )
    }

    #[test]
    fn test_probes_across_segments() {
        let mut list = build_list(vec![vec![1, 5, 9], vec![20, 25], vec![100, 200, 300]]);
        assert_eq!(list.len(), 8);
        assert_eq!(list.first_start_at_least(0).unwrap().start, 1);
        assert_eq!(list.first_start_at_least(10).unwrap().start, 20);
        assert_eq!(list.first_start_at_least(26).unwrap().start, 100);
        assert_eq!(list.first_start_at_least(301), None);

        assert_eq!(list.last_end_at_most(99).unwrap().start, 25);
        assert_eq!(list.last_end_at_most(0), None);
    }

    #[test]
    fn test_count_uses_headers() {
        let mut list = build_list(vec![vec![1, 5, 9], vec![20, 25], vec![100, 200]]);
        assert_eq!(list.count(0, 1000), 7);
        assert_eq!(list.count(5, 25), 4);
        assert_eq!(list.count(21, 24), 0);
    }

    #[test]
    fn test_decode_all() {
        let mut list = build_list(vec![vec![1, 5], vec![9, 12]]);
        assert_eq!(list.decode_all(), vec![1, 5, 9, 12]);
    }
}
