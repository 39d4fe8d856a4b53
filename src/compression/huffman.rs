use std::collections::BinaryHeap;
use std::cmp::Reverse;

use crate::compression::bitio::{BitReader, BitWriter};

/// Length-limited Huffman coding over d-gap bit lengths ("LLRun"). One
/// pre-pass gathers a histogram of the gaps' binary magnitudes; the code
/// for a gap is the Huffman code of its bit length followed by the gap's
/// bits below the most significant one. The alphabet is tiny (65 symbols),
/// so a static per-block model beats per-gap universal codes on all but
/// the shortest lists.
pub struct LLRun;

/// Code lengths are canonicalised and capped at 12 bits.
const MAX_CODE_LENGTH: u32 = 12;
const SYMBOL_COUNT: usize = 65;

fn gap_symbol(gap: u64) -> usize {
    (64 - gap.leading_zeros()) as usize
}

/// Huffman code lengths for the given frequencies, capped at
/// MAX_CODE_LENGTH with a Kraft-sum repair pass.
fn build_code_lengths(freq: &[u64; SYMBOL_COUNT]) -> [u8; SYMBOL_COUNT] {
    let mut lengths = [0u8; SYMBOL_COUNT];
    let used: Vec<usize> = (0..SYMBOL_COUNT).filter(|&s| freq[s] > 0).collect();
    if used.is_empty() {
        return lengths;
    }
    if used.len() == 1 {
        lengths[used[0]] = 1;
        return lengths;
    }

    // Plain Huffman tree; depths become preliminary code lengths.
    struct Node {
        weight: u64,
        left: usize,
        right: usize,
        symbol: usize,
    }
    let mut nodes: Vec<Node> = used
        .iter()
        .map(|&s| Node {
            weight: freq[s],
            left: usize::MAX,
            right: usize::MAX,
            symbol: s,
        })
        .collect();
    let mut heap: BinaryHeap<Reverse<(u64, usize)>> = nodes
        .iter()
        .enumerate()
        .map(|(i, n)| Reverse((n.weight, i)))
        .collect();
    while heap.len() > 1 {
        let Reverse((w1, i1)) = heap.pop().unwrap();
        let Reverse((w2, i2)) = heap.pop().unwrap();
        nodes.push(Node {
            weight: w1 + w2,
            left: i1,
            right: i2,
            symbol: usize::MAX,
        });
        heap.push(Reverse((w1 + w2, nodes.len() - 1)));
    }
    let root = heap.pop().unwrap().0 .1;
    let mut stack = vec![(root, 0u8)];
    while let Some((node, depth)) = stack.pop() {
        let n = &nodes[node];
        if n.symbol != usize::MAX {
            lengths[n.symbol] = depth.max(1);
        } else {
            stack.push((n.left, depth + 1));
            stack.push((n.right, depth + 1));
        }
    }

    // Cap at MAX_CODE_LENGTH and repair the Kraft sum by lengthening the
    // shortest codes until the code space fits again.
    for &s in &used {
        if lengths[s] as u32 > MAX_CODE_LENGTH {
            lengths[s] = MAX_CODE_LENGTH as u8;
        }
    }
    let kraft = |lengths: &[u8; SYMBOL_COUNT]| -> u64 {
        used.iter()
            .map(|&s| 1u64 << (MAX_CODE_LENGTH - lengths[s] as u32))
            .sum()
    };
    while kraft(&lengths) > (1u64 << MAX_CODE_LENGTH) {
        let victim = used
            .iter()
            .copied()
            .filter(|&s| (lengths[s] as u32) < MAX_CODE_LENGTH)
            .min_by_key(|&s| lengths[s])
            .unwrap_or(used[0]);
        lengths[victim] += 1;
    }
    lengths
}

/// Canonical code assignment shared by encoder and decoder: symbols sorted
/// by (length, symbol value), codes assigned in increasing order.
struct CanonicalCodes {
    codes: [u32; SYMBOL_COUNT],
    lengths: [u8; SYMBOL_COUNT],
    first_code: [u32; (MAX_CODE_LENGTH + 1) as usize],
    count: [u32; (MAX_CODE_LENGTH + 1) as usize],
    sorted: Vec<usize>,
    index: [u32; (MAX_CODE_LENGTH + 1) as usize],
}

impl CanonicalCodes {
    fn new(lengths: [u8; SYMBOL_COUNT]) -> Self {
        let mut sorted: Vec<usize> = (0..SYMBOL_COUNT).filter(|&s| lengths[s] > 0).collect();
        sorted.sort_by_key(|&s| (lengths[s], s));

        let mut count = [0u32; (MAX_CODE_LENGTH + 1) as usize];
        for &s in &sorted {
            count[lengths[s] as usize] += 1;
        }
        let mut first_code = [0u32; (MAX_CODE_LENGTH + 1) as usize];
        let mut index = [0u32; (MAX_CODE_LENGTH + 1) as usize];
        let mut code = 0u32;
        let mut position = 0u32;
        for len in 1..=MAX_CODE_LENGTH as usize {
            first_code[len] = code;
            index[len] = position;
            code = (code + count[len]) << 1;
            position += count[len];
        }

        let mut codes = [0u32; SYMBOL_COUNT];
        let mut next = first_code;
        for &s in &sorted {
            let len = lengths[s] as usize;
            codes[s] = next[len];
            next[len] += 1;
        }
        CanonicalCodes {
            codes,
            lengths,
            first_code,
            count,
            sorted,
            index,
        }
    }

    fn write_symbol(&self, writer: &mut BitWriter, symbol: usize) {
        let length = self.lengths[symbol] as u32;
        let code = self.codes[symbol];
        for i in (0..length).rev() {
            writer.write_bits(((code >> i) & 1) as u64, 1);
        }
    }

    fn read_symbol(&self, reader: &mut BitReader) -> Option<usize> {
        let mut code = 0u32;
        for len in 1..=MAX_CODE_LENGTH as usize {
            code = (code << 1) | reader.read_bits(1) as u32;
            if self.count[len] > 0
                && code >= self.first_code[len]
                && code - self.first_code[len] < self.count[len]
            {
                let slot = self.index[len] + (code - self.first_code[len]);
                return Some(self.sorted[slot as usize]);
            }
        }
        None
    }
}

impl LLRun {
    pub fn encode(postings: &[u64]) -> Vec<u8> {
        let mut gaps = Vec::with_capacity(postings.len());
        let mut previous = 0u64;
        let mut freq = [0u64; SYMBOL_COUNT];
        for (i, &posting) in postings.iter().enumerate() {
            let gap = if i == 0 { posting } else { posting - previous - 1 };
            freq[gap_symbol(gap)] += 1;
            gaps.push(gap);
            previous = posting;
        }
        let lengths = build_code_lengths(&freq);
        let codes = CanonicalCodes::new(lengths);

        // Header: 65 code lengths, two per byte.
        let mut output = Vec::with_capacity(SYMBOL_COUNT / 2 + 1 + postings.len());
        for pair in lengths.chunks(2) {
            let high = if pair.len() > 1 { pair[1] } else { 0 };
            output.push(pair[0] | (high << 4));
        }

        let mut writer = BitWriter::new();
        for &gap in &gaps {
            let symbol = gap_symbol(gap);
            codes.write_symbol(&mut writer, symbol);
            if symbol > 1 {
                // The MSB is implied by the symbol.
                writer.write_bits_long(gap & !(1u64 << (symbol - 1)), symbol as u32 - 1);
            }
        }
        output.extend_from_slice(&writer.finish());
        output
    }

    pub fn decode(data: &[u8], count: usize) -> Vec<u64> {
        let header_bytes = SYMBOL_COUNT / 2 + 1;
        if data.len() < header_bytes {
            return Vec::new();
        }
        let mut lengths = [0u8; SYMBOL_COUNT];
        for symbol in 0..SYMBOL_COUNT {
            let byte = data[symbol / 2];
            lengths[symbol] = if symbol % 2 == 0 { byte & 15 } else { byte >> 4 };
        }
        let codes = CanonicalCodes::new(lengths);

        let mut reader = BitReader::new(&data[header_bytes..]);
        let mut postings = Vec::with_capacity(count);
        let mut previous = 0u64;
        for i in 0..count {
            let symbol = match codes.read_symbol(&mut reader) {
                Some(symbol) => symbol,
                None => break,
            };
            let gap = match symbol {
                0 => 0,
                1 => 1,
                _ => (1u64 << (symbol - 1)) | reader.read_bits_long(symbol as u32 - 1),
            };
            previous = if i == 0 { gap } else { previous + gap + 1 };
            postings.push(previous);
        }
        postings
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip() {
        let postings: Vec<u64> = vec![1, 2, 3, 10, 11, 500, 501, 502, 1_000_000];
        let encoded = LLRun::encode(&postings);
        assert_eq!(LLRun::decode(&encoded, postings.len()), postings);
    }

    #[test]
    fn test_uniform_gaps_single_symbol() {
        let postings: Vec<u64> = (0..1000).map(|i| i * 8).collect();
        let encoded = LLRun::encode(&postings);
        assert_eq!(LLRun::decode(&encoded, postings.len()), postings);
    }

    #[test]
    fn test_skewed_distribution() {
        // Mostly tiny gaps with a few huge outliers; the cap keeps every
        // codeword at 12 bits or less.
        let mut postings = Vec::new();
        let mut position = 1u64;
        for i in 0..2000u64 {
            position += if i % 97 == 0 { 1 << 33 } else { 1 + (i % 3) };
            postings.push(position);
        }
        let encoded = LLRun::encode(&postings);
        assert_eq!(LLRun::decode(&encoded, postings.len()), postings);
    }

    #[test]
    fn test_single_element() {
        let postings = vec![77u64];
        assert_eq!(LLRun::decode(&LLRun::encode(&postings), 1), postings);
    }
}
