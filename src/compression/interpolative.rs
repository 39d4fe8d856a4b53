use crate::compression::bitio::{BitReader, BitWriter};
use crate::compression::vbyte::VByte;

/// Binary interpolative coding. The list's first and last postings go into
/// the block header; interior postings are coded recursively, each with
/// just enough bits for the range its neighbours leave open. Strongest of
/// the stock codecs on clustered lists.
pub struct Interpolative;

fn write_minimal_binary(writer: &mut BitWriter, value: u64, range: u64) {
    // range >= 1; value in [0, range).
    if range <= 1 {
        return;
    }
    let bits = 64 - (range - 1).leading_zeros();
    let threshold = (1u64 << bits) - range;
    if value < threshold {
        writer.write_bits_long(value, bits - 1);
    } else {
        let code = value + threshold;
        writer.write_bits_long(code >> 1, bits - 1);
        writer.write_bits(code & 1, 1);
    }
}

fn read_minimal_binary(reader: &mut BitReader, range: u64) -> u64 {
    if range <= 1 {
        return 0;
    }
    let bits = 64 - (range - 1).leading_zeros();
    let threshold = (1u64 << bits) - range;
    let short = reader.read_bits_long(bits - 1);
    if short < threshold {
        short
    } else {
        ((short << 1) | reader.read_bits(1)) - threshold
    }
}

/// Encodes postings[first..=last] knowing every value lies in [lo, hi].
fn encode_range(writer: &mut BitWriter, postings: &[u64], lo: u64, hi: u64) {
    if postings.is_empty() {
        return;
    }
    let mid = postings.len() / 2;
    let value = postings[mid];
    // The middle value must leave room for its left and right neighbours.
    let value_lo = lo + mid as u64;
    let value_hi = hi - (postings.len() - 1 - mid) as u64;
    write_minimal_binary(writer, value - value_lo, value_hi - value_lo + 1);
    encode_range(writer, &postings[..mid], lo, value - 1);
    encode_range(writer, &postings[mid + 1..], value + 1, hi);
}

fn decode_range(reader: &mut BitReader, output: &mut [u64], lo: u64, hi: u64) {
    if output.is_empty() {
        return;
    }
    let mid = output.len() / 2;
    let value_lo = lo + mid as u64;
    let value_hi = hi - (output.len() - 1 - mid) as u64;
    let value = value_lo + read_minimal_binary(reader, value_hi - value_lo + 1);
    output[mid] = value;
    let (left, right) = output.split_at_mut(mid);
    decode_range(reader, left, lo, value - 1);
    decode_range(reader, &mut right[1..], value + 1, hi);
}

impl Interpolative {
    pub fn encode(postings: &[u64]) -> Vec<u8> {
        let mut header = Vec::new();
        VByte::encode_into(&mut header, postings[0]);
        if postings.len() == 1 {
            return header;
        }
        let last = postings[postings.len() - 1];
        VByte::encode_into(&mut header, last - postings[0]);
        let mut writer = BitWriter::new();
        encode_range(
            &mut writer,
            &postings[1..postings.len() - 1],
            postings[0] + 1,
            last - 1,
        );
        header.extend_from_slice(&writer.finish());
        header
    }

    pub fn decode(data: &[u8], count: usize) -> Vec<u64> {
        if count == 0 {
            return Vec::new();
        }
        let (first, consumed) = match VByte::decode_one(data) {
            Some(pair) => pair,
            None => return Vec::new(),
        };
        if count == 1 {
            return vec![first];
        }
        let (span, consumed2) = match VByte::decode_one(&data[consumed..]) {
            Some(pair) => pair,
            None => return Vec::new(),
        };
        let last = first + span;
        let mut postings = vec![0u64; count];
        postings[0] = first;
        postings[count - 1] = last;
        let mut reader = BitReader::new(&data[consumed + consumed2..]);
        decode_range(&mut reader, &mut postings[1..count - 1], first + 1, last - 1);
        postings
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip() {
        let postings = vec![2u64, 9, 12, 14, 50, 51, 52, 10_000];
        let encoded = Interpolative::encode(&postings);
        assert_eq!(Interpolative::decode(&encoded, postings.len()), postings);
    }

    #[test]
    fn test_consecutive_run_costs_no_interior_bits() {
        // A dense run needs only the header: every interior range is forced.
        let postings: Vec<u64> = (100..200).collect();
        let encoded = Interpolative::encode(&postings);
        assert_eq!(Interpolative::decode(&encoded, postings.len()), postings);
        assert!(encoded.len() <= 4);
    }

    #[test]
    fn test_tiny_lists() {
        for postings in [vec![7u64], vec![7u64, 8], vec![0u64, 1_000_000]] {
            let encoded = Interpolative::encode(&postings);
            assert_eq!(Interpolative::decode(&encoded, postings.len()), postings);
        }
    }
}
