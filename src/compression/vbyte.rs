/// Variable-byte encoding over 64-bit values: seven payload bits per byte,
/// high bit set on all but the final byte. The default posting codec and
/// the in-memory chunk format of the update lexicon.
pub struct VByte;

impl VByte {
    /// Worst-case encoded size of a single u64.
    pub const MAX_ENCODED_SIZE: usize = 10;

    pub fn encode_into(output: &mut Vec<u8>, mut value: u64) {
        while value >= 128 {
            output.push((value & 127) as u8 | 128);
            value >>= 7;
        }
        output.push(value as u8);
    }

    /// Number of bytes encode_into would emit for `value`.
    pub fn encoded_size(mut value: u64) -> usize {
        let mut size = 1;
        while value >= 128 {
            size += 1;
            value >>= 7;
        }
        size
    }

    /// Decodes one value, returning (value, bytes consumed). Returns None
    /// on a truncated buffer or a value overflowing 64 bits.
    pub fn decode_one(input: &[u8]) -> Option<(u64, usize)> {
        let mut value = 0u64;
        let mut shift = 0u32;
        for (i, &byte) in input.iter().enumerate() {
            if shift >= 64 {
                return None;
            }
            value |= ((byte & 127) as u64) << shift;
            if byte & 128 == 0 {
                return Some((value, i + 1));
            }
            shift += 7;
        }
        None
    }

    /// Delta-encodes a strictly increasing sequence; the first value is
    /// stored verbatim.
    pub fn encode_deltas(postings: &[u64]) -> Vec<u8> {
        let mut output = Vec::with_capacity(postings.len() * 2);
        let mut previous = 0u64;
        for (i, &posting) in postings.iter().enumerate() {
            if i == 0 {
                Self::encode_into(&mut output, posting);
            } else {
                Self::encode_into(&mut output, posting - previous);
            }
            previous = posting;
        }
        output
    }

    /// Inverse of encode_deltas for a known posting count.
    pub fn decode_deltas(data: &[u8], count: usize) -> Option<Vec<u64>> {
        let mut postings = Vec::with_capacity(count);
        let mut position = 0;
        let mut previous = 0u64;
        for i in 0..count {
            let (value, consumed) = Self::decode_one(&data[position..])?;
            position += consumed;
            previous = if i == 0 { value } else { previous + value };
            postings.push(previous);
        }
        Some(postings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_value_roundtrip() {
        for value in [0u64, 1, 127, 128, 16383, 16384, u32::MAX as u64, u64::MAX] {
            let mut buffer = Vec::new();
            VByte::encode_into(&mut buffer, value);
            assert_eq!(buffer.len(), VByte::encoded_size(value));
            let (decoded, consumed) = VByte::decode_one(&buffer).unwrap();
            assert_eq!(decoded, value);
            assert_eq!(consumed, buffer.len());
        }
    }

    #[test]
    fn test_delta_roundtrip() {
        let postings = vec![1u64, 5, 6, 1000, 1_000_000, u64::MAX / 2];
        let encoded = VByte::encode_deltas(&postings);
        let decoded = VByte::decode_deltas(&encoded, postings.len()).unwrap();
        assert_eq!(decoded, postings);
    }

    #[test]
    fn test_truncated_input() {
        assert!(VByte::decode_one(&[0x80]).is_none());
        assert!(VByte::decode_one(&[]).is_none());
    }
}
