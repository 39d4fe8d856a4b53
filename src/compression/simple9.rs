/// Simple-9 word-aligned coding: each 32-bit word packs a 4-bit selector
/// plus 28 data bits holding between 1 and 28 equally sized d-gaps.
/// Gaps wider than 28 bits do not fit; the codec dispatcher falls back to
/// vbyte for such lists, so `fits` must be checked before encoding.
pub struct Simple9;

/// (values per word, bits per value) for each selector.
const SELECTORS: [(u32, u32); 9] = [
    (28, 1),
    (14, 2),
    (9, 3),
    (7, 4),
    (5, 5),
    (4, 7),
    (3, 9),
    (2, 14),
    (1, 28),
];

const DATA_BITS: u32 = 28;

impl Simple9 {
    /// True iff every d-gap of the list is representable in 28 bits.
    pub fn fits(postings: &[u64]) -> bool {
        let mut previous = 0u64;
        for (i, &posting) in postings.iter().enumerate() {
            let gap = if i == 0 { posting } else { posting - previous - 1 };
            if gap >= (1u64 << DATA_BITS) {
                return false;
            }
            previous = posting;
        }
        true
    }

    pub fn encode(postings: &[u64]) -> Vec<u8> {
        let mut gaps = Vec::with_capacity(postings.len());
        let mut previous = 0u64;
        for (i, &posting) in postings.iter().enumerate() {
            let gap = if i == 0 { posting } else { posting - previous - 1 };
            debug_assert!(gap < (1u64 << DATA_BITS));
            gaps.push(gap as u32);
            previous = posting;
        }

        let mut output = Vec::new();
        let mut position = 0;
        while position < gaps.len() {
            let remaining = &gaps[position..];
            // Greedily pick the densest selector all pending values fit.
            let mut chosen = SELECTORS.len() - 1;
            for (index, &(count, bits)) in SELECTORS.iter().enumerate() {
                let take = (count as usize).min(remaining.len());
                if remaining[..take].iter().all(|&g| g < (1u32 << bits)) {
                    chosen = index;
                    break;
                }
            }
            let (count, bits) = SELECTORS[chosen];
            let take = (count as usize).min(remaining.len());
            let mut word = (chosen as u32) << DATA_BITS;
            for (slot, &gap) in remaining[..take].iter().enumerate() {
                word |= gap << (slot as u32 * bits);
            }
            output.extend_from_slice(&word.to_le_bytes());
            position += take;
        }
        output
    }

    pub fn decode(data: &[u8], count: usize) -> Vec<u64> {
        let mut postings = Vec::with_capacity(count);
        let mut previous = 0u64;
        for chunk in data.chunks_exact(4) {
            if postings.len() >= count {
                break;
            }
            let word = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
            let selector = (word >> DATA_BITS) as usize;
            if selector >= SELECTORS.len() {
                break;
            }
            let (slots, bits) = SELECTORS[selector];
            let mask = (1u64 << bits) - 1;
            for slot in 0..slots {
                if postings.len() >= count {
                    break;
                }
                let gap = ((word as u64) >> (slot * bits)) & mask;
                previous = if postings.is_empty() {
                    gap
                } else {
                    previous + gap + 1
                };
                postings.push(previous);
            }
        }
        postings
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip() {
        let postings: Vec<u64> = vec![1, 2, 3, 4, 10, 300, 301, 90_000, 90_001];
        assert!(Simple9::fits(&postings));
        let encoded = Simple9::encode(&postings);
        assert_eq!(Simple9::decode(&encoded, postings.len()), postings);
    }

    #[test]
    fn test_dense_run_packs_tightly() {
        let postings: Vec<u64> = (0..280).collect();
        let encoded = Simple9::encode(&postings);
        // 280 gap-zero values fit 28 per word.
        assert_eq!(encoded.len(), 40);
        assert_eq!(Simple9::decode(&encoded, postings.len()), postings);
    }

    #[test]
    fn test_wide_gap_rejected() {
        let postings = vec![0u64, 1u64 << 40];
        assert!(!Simple9::fits(&postings));
    }

    #[test]
    fn test_single_element() {
        let postings = vec![12345u64];
        let encoded = Simple9::encode(&postings);
        assert_eq!(Simple9::decode(&encoded, 1), postings);
    }
}
