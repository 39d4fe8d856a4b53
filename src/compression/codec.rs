use serde::{Deserialize, Serialize};

use crate::compression::gamma::{EliasDelta, EliasGamma};
use crate::compression::golomb::{Golomb, Rice};
use crate::compression::huffman::LLRun;
use crate::compression::interpolative::Interpolative;
use crate::compression::simple9::Simple9;
use crate::compression::vbyte::VByte;
use crate::core::error::{Error, ErrorKind, Result};
use crate::core::types::{Offset, MAX_SEGMENT_SIZE};

/// Posting-list codecs. The discriminant doubles as the 1-byte method tag
/// in front of every compressed block and as the compression-mode field in
/// the partition trailer, so the values are part of the file format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum CodecId {
    Null = 0,
    VByte = 1,
    Gamma = 2,
    Delta = 3,
    Golomb = 4,
    Rice = 5,
    Interpolative = 6,
    Simple9 = 7,
    LLRun = 8,
}

impl CodecId {
    pub fn from_tag(tag: u8) -> Result<CodecId> {
        match tag {
            0 => Ok(CodecId::Null),
            1 => Ok(CodecId::VByte),
            2 => Ok(CodecId::Gamma),
            3 => Ok(CodecId::Delta),
            4 => Ok(CodecId::Golomb),
            5 => Ok(CodecId::Rice),
            6 => Ok(CodecId::Interpolative),
            7 => Ok(CodecId::Simple9),
            8 => Ok(CodecId::LLRun),
            other => Err(Error::new(
                ErrorKind::Parse,
                format!("unknown codec tag {}", other),
            )),
        }
    }
}

/// Compresses a strictly increasing posting sequence into a self-describing
/// block: method tag, vbyte posting count, codec payload.
pub fn encode(codec: CodecId, postings: &[Offset]) -> Result<Vec<u8>> {
    if postings.is_empty() || postings.len() > MAX_SEGMENT_SIZE {
        return Err(Error::new(
            ErrorKind::InvalidInput,
            format!("segment of {} postings out of range", postings.len()),
        ));
    }
    debug_assert!(postings.windows(2).all(|w| w[0] < w[1]));

    // Simple-9 cannot represent gaps wider than 28 bits; such lists take
    // the vbyte representation instead, which the tag makes transparent.
    let codec = if codec == CodecId::Simple9 && !Simple9::fits(postings) {
        CodecId::VByte
    } else {
        codec
    };

    let payload = match codec {
        CodecId::Null => {
            let mut raw = Vec::with_capacity(postings.len() * 8);
            for &posting in postings {
                raw.extend_from_slice(&posting.to_le_bytes());
            }
            raw
        }
        CodecId::VByte => VByte::encode_deltas(postings),
        CodecId::Gamma => EliasGamma::encode(postings),
        CodecId::Delta => EliasDelta::encode(postings),
        CodecId::Golomb => Golomb::encode(postings),
        CodecId::Rice => Rice::encode(postings),
        CodecId::Interpolative => Interpolative::encode(postings),
        CodecId::Simple9 => Simple9::encode(postings),
        CodecId::LLRun => LLRun::encode(postings),
    };

    let mut block = Vec::with_capacity(payload.len() + 4);
    block.push(codec as u8);
    VByte::encode_into(&mut block, postings.len() as u64);
    block.extend_from_slice(&payload);
    Ok(block)
}

/// Decompresses a block produced by `encode`. The single entry point for
/// all codecs; the method tag selects the decoder.
pub fn decode(block: &[u8]) -> Result<Vec<Offset>> {
    if block.is_empty() {
        return Err(Error::new(ErrorKind::Parse, "empty posting block".to_string()));
    }
    let codec = CodecId::from_tag(block[0])?;
    let (count, consumed) = VByte::decode_one(&block[1..])
        .ok_or_else(|| Error::new(ErrorKind::Parse, "truncated posting block".to_string()))?;
    let count = count as usize;
    let payload = &block[1 + consumed..];

    let postings = match codec {
        CodecId::Null => {
            if payload.len() < count * 8 {
                return Err(Error::new(
                    ErrorKind::Parse,
                    "raw posting block shorter than its count".to_string(),
                ));
            }
            payload
                .chunks_exact(8)
                .take(count)
                .map(|c| u64::from_le_bytes([c[0], c[1], c[2], c[3], c[4], c[5], c[6], c[7]]))
                .collect()
        }
        CodecId::VByte => VByte::decode_deltas(payload, count)
            .ok_or_else(|| Error::new(ErrorKind::Parse, "corrupt vbyte block".to_string()))?,
        CodecId::Gamma => EliasGamma::decode(payload, count),
        CodecId::Delta => EliasDelta::decode(payload, count),
        CodecId::Golomb => Golomb::decode(payload, count),
        CodecId::Rice => Rice::decode(payload, count),
        CodecId::Interpolative => Interpolative::decode(payload, count),
        CodecId::Simple9 => Simple9::decode(payload, count),
        CodecId::LLRun => LLRun::decode(payload, count),
    };
    if postings.len() != count {
        return Err(Error::new(
            ErrorKind::Parse,
            format!("block decoded to {} of {} postings", postings.len(), count),
        ));
    }
    Ok(postings)
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_CODECS: [CodecId; 9] = [
        CodecId::Null,
        CodecId::VByte,
        CodecId::Gamma,
        CodecId::Delta,
        CodecId::Golomb,
        CodecId::Rice,
        CodecId::Interpolative,
        CodecId::Simple9,
        CodecId::LLRun,
    ];

    #[test]
    fn test_every_codec_roundtrips() {
        let postings: Vec<u64> = vec![1, 5, 6, 7, 100, 10_000, 10_001, 1 << 35];
        for codec in ALL_CODECS {
            let block = encode(codec, &postings).unwrap();
            assert_eq!(decode(&block).unwrap(), postings, "{:?}", codec);
        }
    }

    #[test]
    fn test_single_posting() {
        for codec in ALL_CODECS {
            let block = encode(codec, &[9]).unwrap();
            assert_eq!(decode(&block).unwrap(), vec![9], "{:?}", codec);
        }
    }

    #[test]
    fn test_simple9_falls_back_on_wide_gaps() {
        let postings = vec![0u64, 1u64 << 40];
        let block = encode(CodecId::Simple9, &postings).unwrap();
        assert_eq!(block[0], CodecId::VByte as u8);
        assert_eq!(decode(&block).unwrap(), postings);
    }

    #[test]
    fn test_rejects_oversize_and_empty_input() {
        assert!(encode(CodecId::VByte, &[]).is_err());
        let too_many: Vec<u64> = (0..(MAX_SEGMENT_SIZE as u64 + 1)).collect();
        assert!(encode(CodecId::VByte, &too_many).is_err());
    }

    #[test]
    fn test_unknown_tag_rejected() {
        assert!(decode(&[200, 1, 0]).is_err());
    }
}
