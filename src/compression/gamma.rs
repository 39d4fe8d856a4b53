use crate::compression::bitio::{BitReader, BitWriter};

/// Elias gamma and delta codes over the d-gaps of a posting list. Both
/// code positive integers only, so gaps are shifted by one where needed
/// (the first posting is stored as posting + 1).
pub struct EliasGamma;
pub struct EliasDelta;

fn bit_length(value: u64) -> u32 {
    64 - value.leading_zeros()
}

fn write_gamma(writer: &mut BitWriter, value: u64) {
    debug_assert!(value >= 1);
    let bits = bit_length(value);
    writer.write_unary((bits - 1) as u64);
    // MSB is implied by the length, store the remainder.
    writer.write_bits_long(value & !(1u64 << (bits - 1)), bits - 1);
}

fn read_gamma(reader: &mut BitReader) -> u64 {
    let bits = reader.read_unary() as u32 + 1;
    let remainder = reader.read_bits_long(bits - 1);
    (1u64 << (bits - 1)) | remainder
}

fn write_delta(writer: &mut BitWriter, value: u64) {
    debug_assert!(value >= 1);
    let bits = bit_length(value);
    write_gamma(writer, bits as u64);
    writer.write_bits_long(value & !(1u64 << (bits - 1)), bits - 1);
}

fn read_delta(reader: &mut BitReader) -> u64 {
    let bits = read_gamma(reader) as u32;
    let remainder = reader.read_bits_long(bits - 1);
    (1u64 << (bits - 1)) | remainder
}

impl EliasGamma {
    pub fn encode(postings: &[u64]) -> Vec<u8> {
        let mut writer = BitWriter::new();
        let mut previous = 0u64;
        for (i, &posting) in postings.iter().enumerate() {
            let gap = if i == 0 { posting + 1 } else { posting - previous };
            write_gamma(&mut writer, gap);
            previous = posting;
        }
        writer.finish()
    }

    pub fn decode(data: &[u8], count: usize) -> Vec<u64> {
        let mut reader = BitReader::new(data);
        let mut postings = Vec::with_capacity(count);
        let mut previous = 0u64;
        for i in 0..count {
            let gap = read_gamma(&mut reader);
            previous = if i == 0 { gap - 1 } else { previous + gap };
            postings.push(previous);
        }
        postings
    }
}

impl EliasDelta {
    pub fn encode(postings: &[u64]) -> Vec<u8> {
        let mut writer = BitWriter::new();
        let mut previous = 0u64;
        for (i, &posting) in postings.iter().enumerate() {
            let gap = if i == 0 { posting + 1 } else { posting - previous };
            write_delta(&mut writer, gap);
            previous = posting;
        }
        writer.finish()
    }

    pub fn decode(data: &[u8], count: usize) -> Vec<u64> {
        let mut reader = BitReader::new(data);
        let mut postings = Vec::with_capacity(count);
        let mut previous = 0u64;
        for i in 0..count {
            let gap = read_delta(&mut reader);
            previous = if i == 0 { gap - 1 } else { previous + gap };
            postings.push(previous);
        }
        postings
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gamma_roundtrip() {
        let postings = vec![0u64, 1, 2, 100, 1000, 1_000_000, 1_000_001];
        let encoded = EliasGamma::encode(&postings);
        assert_eq!(EliasGamma::decode(&encoded, postings.len()), postings);
    }

    #[test]
    fn test_delta_roundtrip() {
        let postings = vec![5u64, 6, 700, 80_000, 9_000_000_000];
        let encoded = EliasDelta::encode(&postings);
        assert_eq!(EliasDelta::decode(&encoded, postings.len()), postings);
    }

    #[test]
    fn test_single_element() {
        let postings = vec![42u64];
        assert_eq!(
            EliasGamma::decode(&EliasGamma::encode(&postings), 1),
            postings
        );
        assert_eq!(
            EliasDelta::decode(&EliasDelta::encode(&postings), 1),
            postings
        );
    }
}
