use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::types::Offset;

/// Partition files are numbered index.NNN within the index directory.
pub type PartitionId = u32;

/// Fixed 24-byte per-segment header, little-endian on disk:
/// byte length, posting count, first posting, last posting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentHeader {
    pub byte_length: u32,
    pub posting_count: u32,
    pub first_posting: Offset,
    pub last_posting: Offset,
}

impl SegmentHeader {
    pub const SIZE: usize = 24;

    pub fn write_to(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.byte_length.to_le_bytes());
        out.extend_from_slice(&self.posting_count.to_le_bytes());
        out.extend_from_slice(&self.first_posting.to_le_bytes());
        out.extend_from_slice(&self.last_posting.to_le_bytes());
    }

    pub fn read_from(data: &[u8]) -> SegmentHeader {
        SegmentHeader {
            byte_length: u32::from_le_bytes([data[0], data[1], data[2], data[3]]),
            posting_count: u32::from_le_bytes([data[4], data[5], data[6], data[7]]),
            first_posting: u64::from_le_bytes([
                data[8], data[9], data[10], data[11], data[12], data[13], data[14], data[15],
            ]),
            last_posting: u64::from_le_bytes([
                data[16], data[17], data[18], data[19], data[20], data[21], data[22], data[23],
            ]),
        }
    }
}

/// Where one compressed segment lives inside its partition file.
#[derive(Debug, Clone, Copy)]
pub struct SegmentDescriptor {
    pub header: SegmentHeader,
    pub file_offset: u64,
}

/// Partition trailer, fixed 20 bytes at the end of the file:
/// int32 listCount, int32 termCount, int32 compressionMode,
/// int64 indexOffset.
#[derive(Debug, Clone, Copy)]
pub struct PartitionTrailer {
    pub list_count: u32,
    pub term_count: u32,
    pub compression_mode: u32,
    pub index_offset: u64,
}

impl PartitionTrailer {
    pub const SIZE: usize = 20;

    pub fn write_to(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.list_count.to_le_bytes());
        out.extend_from_slice(&self.term_count.to_le_bytes());
        out.extend_from_slice(&self.compression_mode.to_le_bytes());
        out.extend_from_slice(&self.index_offset.to_le_bytes());
    }

    pub fn read_from(data: &[u8]) -> PartitionTrailer {
        PartitionTrailer {
            list_count: u32::from_le_bytes([data[0], data[1], data[2], data[3]]),
            term_count: u32::from_le_bytes([data[4], data[5], data[6], data[7]]),
            compression_mode: u32::from_le_bytes([data[8], data[9], data[10], data[11]]),
            index_offset: u64::from_le_bytes([
                data[12], data[13], data[14], data[15], data[16], data[17], data[18], data[19],
            ]),
        }
    }
}

/// Active-set bookkeeping for one partition, persisted in index.list and
/// rewritten on every maintenance commit. The garbage ratio feeds the
/// merge and GC policies.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartitionMeta {
    pub id: PartitionId,
    pub first_posting: Offset,
    pub last_posting: Offset,
    pub posting_count: u64,
    pub deleted_posting_count: u64,
    pub term_count: u64,
    pub size_bytes: u64,
    pub created_at: DateTime<Utc>,
}

impl PartitionMeta {
    pub fn garbage_ratio(&self) -> f64 {
        if self.posting_count == 0 {
            0.0
        } else {
            self.deleted_posting_count as f64 / self.posting_count as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_segment_header_layout() {
        let header = SegmentHeader {
            byte_length: 1000,
            posting_count: 500,
            first_posting: 7,
            last_posting: 99_999,
        };
        let mut buffer = Vec::new();
        header.write_to(&mut buffer);
        assert_eq!(buffer.len(), SegmentHeader::SIZE);
        assert_eq!(SegmentHeader::read_from(&buffer), header);
    }

    #[test]
    fn test_trailer_roundtrip() {
        let trailer = PartitionTrailer {
            list_count: 12,
            term_count: 9,
            compression_mode: 1,
            index_offset: 123_456,
        };
        let mut buffer = Vec::new();
        trailer.write_to(&mut buffer);
        assert_eq!(buffer.len(), PartitionTrailer::SIZE);
        let back = PartitionTrailer::read_from(&buffer);
        assert_eq!(back.list_count, 12);
        assert_eq!(back.term_count, 9);
        assert_eq!(back.index_offset, 123_456);
    }

    #[test]
    fn test_garbage_ratio() {
        let mut meta = PartitionMeta {
            id: 0,
            first_posting: 1,
            last_posting: 100,
            posting_count: 200,
            deleted_posting_count: 50,
            term_count: 10,
            size_bytes: 4096,
            created_at: Utc::now(),
        };
        assert!((meta.garbage_ratio() - 0.25).abs() < 1e-9);
        meta.posting_count = 0;
        assert_eq!(meta.garbage_ratio(), 0.0);
    }
}
