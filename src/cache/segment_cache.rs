use std::num::NonZeroUsize;

use lru::LruCache;

use crate::compression::codec;
use crate::core::error::Result;
use crate::core::types::Offset;

/// Decoded segments held at once (L1).
pub const L1_SEGMENT_COUNT: usize = 2;

/// Compressed segments held at once (L2).
pub const L2_SEGMENT_COUNT: usize = 64;

/// Consecutive segments pre-fetched into L2 when a sequential scan misses.
pub const READ_AHEAD_SEGMENT_COUNT: usize = 60;

#[derive(Debug)]
struct DecodedSlot {
    segment: usize,
    postings: Vec<Offset>,
    stamp: u64,
}

/// Two-tier cache over the segments of one posting list. L1 keeps a couple
/// of fully decoded segments, L2 keeps raw compressed bytes under LRU.
/// Each iterator owns its own cache, so no lock is ever taken on a read.
#[derive(Debug)]
pub struct SegmentCache {
    decoded: Vec<DecodedSlot>,
    compressed: LruCache<usize, Vec<u8>>,
    access_counter: u64,
    last_requested: Option<usize>,
}

impl SegmentCache {
    pub fn new() -> Self {
        SegmentCache {
            decoded: Vec::with_capacity(L1_SEGMENT_COUNT),
            compressed: LruCache::new(NonZeroUsize::new(L2_SEGMENT_COUNT).unwrap()),
            access_counter: 0,
            last_requested: None,
        }
    }

    /// Decoded postings of the given segment. `fetch` reads a segment's
    /// compressed bytes from stable storage; it is also used for the
    /// read-ahead when the access pattern looks sequential.
    pub fn get(
        &mut self,
        segment: usize,
        segment_count: usize,
        mut fetch: impl FnMut(usize) -> Result<Vec<u8>>,
    ) -> Result<&[Offset]> {
        self.access_counter += 1;
        let stamp = self.access_counter;
        let sequential = self.last_requested == Some(segment.wrapping_sub(1));
        self.last_requested = Some(segment);

        if let Some(slot) = self.decoded.iter().position(|s| s.segment == segment) {
            self.decoded[slot].stamp = stamp;
            return Ok(&self.decoded[slot].postings);
        }

        let compressed = match self.compressed.get(&segment) {
            Some(bytes) => bytes.clone(),
            None => {
                let bytes = fetch(segment)?;
                self.compressed.put(segment, bytes.clone());
                if sequential {
                    let limit = segment_count.min(segment + 1 + READ_AHEAD_SEGMENT_COUNT);
                    for ahead in segment + 1..limit {
                        if self.compressed.peek(&ahead).is_none() {
                            let ahead_bytes = fetch(ahead)?;
                            self.compressed.put(ahead, ahead_bytes);
                        }
                    }
                }
                bytes
            }
        };

        let postings = codec::decode(&compressed)?;
        let slot = if self.decoded.len() < L1_SEGMENT_COUNT {
            self.decoded.push(DecodedSlot {
                segment,
                postings,
                stamp,
            });
            self.decoded.len() - 1
        } else {
            // Evict the least recently used decoded slot.
            let victim = self
                .decoded
                .iter()
                .enumerate()
                .min_by_key(|(_, s)| s.stamp)
                .map(|(i, _)| i)
                .unwrap_or(0);
            self.decoded[victim] = DecodedSlot {
                segment,
                postings,
                stamp,
            };
            victim
        };
        Ok(&self.decoded[slot].postings)
    }
}

impl Default for SegmentCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compression::codec::CodecId;
    use std::cell::RefCell;

    fn make_segments(count: usize) -> Vec<Vec<u8>> {
        (0..count)
            .map(|i| {
                let postings: Vec<u64> = (0..10u64).map(|j| (i as u64) * 100 + j + 1).collect();
                codec::encode(CodecId::VByte, &postings).unwrap()
            })
            .collect()
    }

    #[test]
    fn test_l1_hit_avoids_refetch() {
        let segments = make_segments(4);
        let fetches = RefCell::new(0usize);
        let mut cache = SegmentCache::new();
        for _ in 0..3 {
            let postings = cache
                .get(2, segments.len(), |i| {
                    *fetches.borrow_mut() += 1;
                    Ok(segments[i].clone())
                })
                .unwrap();
            assert_eq!(postings[0], 201);
        }
        assert_eq!(*fetches.borrow(), 1);
    }

    #[test]
    fn test_l2_hit_redecodes_without_fetch() {
        let segments = make_segments(4);
        let fetches = RefCell::new(0usize);
        let mut cache = SegmentCache::new();
        let read = |cache: &mut SegmentCache, segment: usize| {
            cache
                .get(segment, segments.len(), |i| {
                    *fetches.borrow_mut() += 1;
                    Ok(segments[i].clone())
                })
                .unwrap()
                .to_vec()
        };
        // Touch three segments; the first falls out of L1 but stays in L2.
        read(&mut cache, 0);
        read(&mut cache, 2);
        read(&mut cache, 3);
        let before = *fetches.borrow();
        read(&mut cache, 0);
        assert_eq!(*fetches.borrow(), before);
    }

    #[test]
    fn test_sequential_scan_reads_ahead() {
        let segments = make_segments(80);
        let fetches = RefCell::new(0usize);
        let mut cache = SegmentCache::new();
        let read = |cache: &mut SegmentCache, segment: usize| {
            cache
                .get(segment, segments.len(), |i| {
                    *fetches.borrow_mut() += 1;
                    Ok(segments[i].clone())
                })
                .unwrap();
        };
        read(&mut cache, 0);
        read(&mut cache, 1); // sequential miss triggers the read-ahead
        let after_two = *fetches.borrow();
        assert!(after_two > 2);
        // The following segments come from L2 without new fetches.
        for segment in 2..30 {
            read(&mut cache, segment);
        }
        assert_eq!(*fetches.borrow(), after_two);
    }
}
