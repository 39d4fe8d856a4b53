use crate::compression::bitio::{BitReader, BitWriter};
use crate::compression::vbyte::VByte;

/// Golomb and Rice codes over d-gaps. The divisor is derived from the mean
/// gap of the list (b ~ 0.69 * mean) and stored in front of the bitstream,
/// vbyte-coded, so decoding needs no external parameters.
pub struct Golomb;
pub struct Rice;

fn select_divisor(postings: &[u64]) -> u64 {
    if postings.is_empty() {
        return 1;
    }
    let span = postings[postings.len() - 1] + 1;
    let mean = span / postings.len() as u64;
    ((mean as f64 * 0.69) as u64).max(1)
}

/// Truncated binary code for remainder < divisor.
fn write_remainder(writer: &mut BitWriter, remainder: u64, divisor: u64) {
    if divisor == 1 {
        return;
    }
    let bits = 64 - (divisor - 1).leading_zeros();
    let threshold = (1u64 << bits) - divisor;
    if remainder < threshold {
        writer.write_bits_long(remainder, bits - 1);
    } else {
        // Long codewords carry their high bits first so that the decoder
        // can tell them apart from short ones after bits-1 bits.
        let code = remainder + threshold;
        writer.write_bits_long(code >> 1, bits - 1);
        writer.write_bits(code & 1, 1);
    }
}

fn read_remainder(reader: &mut BitReader, divisor: u64) -> u64 {
    if divisor == 1 {
        return 0;
    }
    let bits = 64 - (divisor - 1).leading_zeros();
    let threshold = (1u64 << bits) - divisor;
    let short = reader.read_bits_long(bits - 1);
    if short < threshold {
        short
    } else {
        ((short << 1) | reader.read_bits_long(1)) - threshold
    }
}

fn encode_with_divisor(postings: &[u64], divisor: u64) -> Vec<u8> {
    let mut header = Vec::new();
    VByte::encode_into(&mut header, divisor);
    let mut writer = BitWriter::new();
    let mut previous = 0u64;
    for (i, &posting) in postings.iter().enumerate() {
        let gap = if i == 0 { posting } else { posting - previous - 1 };
        writer.write_unary(gap / divisor);
        write_remainder(&mut writer, gap % divisor, divisor);
        previous = posting;
    }
    header.extend_from_slice(&writer.finish());
    header
}

fn decode_postings(data: &[u8], count: usize) -> Vec<u64> {
    let (divisor, consumed) = match VByte::decode_one(data) {
        Some(pair) => pair,
        None => return Vec::new(),
    };
    let mut reader = BitReader::new(&data[consumed..]);
    let mut postings = Vec::with_capacity(count);
    let mut previous = 0u64;
    for i in 0..count {
        let gap = reader.read_unary() * divisor + read_remainder(&mut reader, divisor);
        previous = if i == 0 { gap } else { previous + gap + 1 };
        postings.push(previous);
    }
    postings
}

impl Golomb {
    pub fn encode(postings: &[u64]) -> Vec<u8> {
        encode_with_divisor(postings, select_divisor(postings))
    }

    pub fn decode(data: &[u8], count: usize) -> Vec<u64> {
        decode_postings(data, count)
    }
}

impl Rice {
    pub fn encode(postings: &[u64]) -> Vec<u8> {
        // Round the Golomb divisor down to a power of two.
        let divisor = select_divisor(postings);
        let rice = 1u64 << (63 - divisor.leading_zeros().min(63));
        encode_with_divisor(postings, rice.max(1))
    }

    pub fn decode(data: &[u8], count: usize) -> Vec<u64> {
        decode_postings(data, count)
    }
}
