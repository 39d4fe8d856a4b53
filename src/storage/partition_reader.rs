use std::fs::File;
use std::path::Path;

use memmap2::Mmap;

use crate::compression::codec::CodecId;
use crate::compression::vbyte::VByte;
use crate::core::error::{Error, ErrorKind, Result};
use crate::core::types::DICTIONARY_GROUP_SIZE;
use crate::storage::partition::{
    PartitionId, PartitionTrailer, SegmentDescriptor, SegmentHeader,
};

/// Random-access view of one immutable partition file, memory-mapped.
/// Term lookup binary-searches the sparse dictionary index to a group
/// leader, then walks the front-coded records from there.
pub struct PartitionReader {
    pub id: PartitionId,
    mmap: Mmap,
    codec: CodecId,
    term_count: u32,
    list_count: u32,
    records_end: u64,
    /// Sparse dictionary: (full term, record offset), ascending.
    dictionary: Vec<(Vec<u8>, u64)>,
}

impl PartitionReader {
    pub fn open(path: &Path, id: PartitionId) -> Result<Self> {
        let file = File::open(path)?;
        let mmap = unsafe { Mmap::map(&file)? };
        // Term lookups jump around; let the page cache know.
        let _ = mmap.advise(memmap2::Advice::Random);
        if mmap.len() < PartitionTrailer::SIZE {
            return Err(Error::new(
                ErrorKind::Inconsistent,
                format!("partition {:?} shorter than its trailer", path),
            ));
        }
        let trailer = PartitionTrailer::read_from(&mmap[mmap.len() - PartitionTrailer::SIZE..]);
        let codec = CodecId::from_tag(trailer.compression_mode as u8)?;
        let records_end = trailer.index_offset;
        if records_end as usize > mmap.len() {
            return Err(Error::new(
                ErrorKind::Inconsistent,
                format!("partition {:?} has an index offset past EOF", path),
            ));
        }

        // The dictionary index sits between the records and the trailer.
        let mut dictionary = Vec::new();
        let mut position = records_end as usize;
        let index_end = mmap.len() - PartitionTrailer::SIZE;
        while position < index_end {
            let term_length = mmap[position] as usize;
            position += 1;
            let term = mmap[position..position + term_length].to_vec();
            position += term_length;
            let (offset, consumed) = VByte::decode_one(&mmap[position..index_end])
                .ok_or_else(|| {
                    Error::new(ErrorKind::Inconsistent, "truncated dictionary index".to_string())
                })?;
            position += consumed;
            dictionary.push((term, offset));
        }

        Ok(PartitionReader {
            id,
            mmap,
            codec,
            term_count: trailer.term_count,
            list_count: trailer.list_count,
            records_end,
            dictionary,
        })
    }

    pub fn codec(&self) -> CodecId {
        self.codec
    }

    pub fn term_count(&self) -> u32 {
        self.term_count
    }

    pub fn list_count(&self) -> u32 {
        self.list_count
    }

    /// Raw bytes of one compressed segment.
    pub fn segment_bytes(&self, descriptor: &SegmentDescriptor) -> &[u8] {
        let start = descriptor.file_offset as usize;
        &self.mmap[start..start + descriptor.header.byte_length as usize]
    }

    /// Segment table for one term, or None if the partition has no
    /// postings for it.
    pub fn term_segments(&self, term: &str) -> Result<Option<Vec<SegmentDescriptor>>> {
        if self.term_count == 0 {
            return Ok(None);
        }
        let target = term.as_bytes();
        // Find the last dictionary entry <= target.
        let group = match self
            .dictionary
            .partition_point(|(entry, _)| entry.as_slice() <= target)
        {
            0 => return Ok(None),
            n => n - 1,
        };
        let mut cursor = RecordCursor::new(self, self.dictionary[group].1);
        while let Some(record) = cursor.next()? {
            if record.term.as_slice() == target {
                return Ok(Some(record.segments));
            }
            if record.term.as_slice() > target {
                return Ok(None);
            }
        }
        Ok(None)
    }

    /// Sequential walk over every (term, segment table) record, used by
    /// the merge engine.
    pub fn records(&self) -> RecordCursor<'_> {
        RecordCursor::new(self, 0)
    }
}

pub struct TermRecord {
    pub term: Vec<u8>,
    pub segments: Vec<SegmentDescriptor>,
}

/// Walks the front-coded record stream, reconstructing full terms.
pub struct RecordCursor<'a> {
    reader: &'a PartitionReader,
    position: u64,
    previous_term: Vec<u8>,
    /// Records seen since the walk's starting group leader; the stream
    /// start and every dictionary target are leaders, so front coding
    /// always resolves.
    records_seen: usize,
}

impl<'a> RecordCursor<'a> {
    fn new(reader: &'a PartitionReader, position: u64) -> Self {
        RecordCursor {
            reader,
            position,
            previous_term: Vec::new(),
            records_seen: 0,
        }
    }

    pub fn next(&mut self) -> Result<Option<TermRecord>> {
        if self.position >= self.reader.records_end {
            return Ok(None);
        }
        let data = &self.reader.mmap[..self.reader.records_end as usize];
        let mut position = self.position as usize;

        let leader = self.records_seen % DICTIONARY_GROUP_SIZE == 0;
        let term = if leader {
            let length = data[position] as usize;
            position += 1;
            let term = data[position..position + length].to_vec();
            position += length;
            term
        } else {
            let shared = data[position] as usize;
            let suffix_length = data[position + 1] as usize;
            position += 2;
            let mut term = self.previous_term[..shared].to_vec();
            term.extend_from_slice(&data[position..position + suffix_length]);
            position += suffix_length;
            term
        };

        let segment_count = u32::from_le_bytes([
            data[position],
            data[position + 1],
            data[position + 2],
            data[position + 3],
        ]) as usize;
        position += 4;
        let mut headers = Vec::with_capacity(segment_count);
        for _ in 0..segment_count {
            headers.push(SegmentHeader::read_from(&data[position..]));
            position += SegmentHeader::SIZE;
        }
        let mut segments = Vec::with_capacity(segment_count);
        for header in headers {
            segments.push(SegmentDescriptor {
                header,
                file_offset: position as u64,
            });
            position += header.byte_length as usize;
        }

        self.position = position as u64;
        self.previous_term = term.clone();
        self.records_seen += 1;
        Ok(Some(TermRecord { term, segments }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::partition_writer::PartitionWriter;
    use tempfile::TempDir;

    fn write_partition(terms: &[(&str, Vec<u64>)]) -> (TempDir, std::path::PathBuf) {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("index.000");
        let mut writer = PartitionWriter::create(&path, 0, CodecId::VByte).unwrap();
        for (term, postings) in terms {
            writer.add_list(term, postings).unwrap();
        }
        writer.finish().unwrap();
        (dir, path)
    }

    #[test]
    fn test_roundtrip_lookup() {
        let terms = vec![
            ("cat", vec![2u64, 8]),
            ("dog", vec![7u64]),
            ("the", vec![1u64, 5]),
        ];
        let (_dir, path) = write_partition(&terms);
        let reader = PartitionReader::open(&path, 0).unwrap();
        assert_eq!(reader.term_count(), 3);

        for (term, postings) in &terms {
            let segments = reader.term_segments(term).unwrap().unwrap();
            assert_eq!(segments.len(), 1);
            let decoded =
                crate::compression::codec::decode(reader.segment_bytes(&segments[0])).unwrap();
            assert_eq!(&decoded, postings);
        }
        assert!(reader.term_segments("aardvark").unwrap().is_none());
        assert!(reader.term_segments("zebra").unwrap().is_none());
        assert!(reader.term_segments("cats").unwrap().is_none());
    }

    #[test]
    fn test_front_coding_across_groups() {
        // Enough similar terms to span several dictionary groups.
        let mut terms: Vec<(String, Vec<u64>)> = (0..200)
            .map(|i| (format!("term{:04}", i), vec![i as u64 + 1]))
            .collect();
        terms.sort_by(|a, b| a.0.cmp(&b.0));
        let borrowed: Vec<(&str, Vec<u64>)> =
            terms.iter().map(|(t, p)| (t.as_str(), p.clone())).collect();
        let (_dir, path) = write_partition(&borrowed);
        let reader = PartitionReader::open(&path, 0).unwrap();

        for (term, postings) in &terms {
            let segments = reader.term_segments(term).unwrap().unwrap();
            let decoded =
                crate::compression::codec::decode(reader.segment_bytes(&segments[0])).unwrap();
            assert_eq!(&decoded, postings);
        }
    }

    #[test]
    fn test_maximum_length_term() {
        let term = "x".repeat(crate::core::types::MAX_TOKEN_LENGTH);
        let (_dir, path) = write_partition(&[(&term, vec![11u64, 99])]);
        let reader = PartitionReader::open(&path, 0).unwrap();
        let segments = reader.term_segments(&term).unwrap().unwrap();
        let decoded =
            crate::compression::codec::decode(reader.segment_bytes(&segments[0])).unwrap();
        assert_eq!(decoded, vec![11, 99]);
    }

    #[test]
    fn test_sequential_walk_sees_every_term() {
        let terms = vec![
            ("alpha", vec![1u64]),
            ("beta", vec![2u64]),
            ("gamma", vec![3u64]),
        ];
        let (_dir, path) = write_partition(&terms);
        let reader = PartitionReader::open(&path, 0).unwrap();
        let mut cursor = reader.records();
        let mut seen = Vec::new();
        while let Some(record) = cursor.next().unwrap() {
            seen.push(String::from_utf8(record.term).unwrap());
        }
        assert_eq!(seen, vec!["alpha", "beta", "gamma"]);
    }

    #[test]
    fn test_large_multisegment_list() {
        let postings: Vec<u64> = (1..100_000u64).collect();
        let (_dir, path) = write_partition(&[("big", postings.clone())]);
        let reader = PartitionReader::open(&path, 0).unwrap();
        let segments = reader.term_segments("big").unwrap().unwrap();
        assert!(segments.len() > 1);
        let mut decoded = Vec::new();
        for segment in &segments {
            decoded
                .extend(crate::compression::codec::decode(reader.segment_bytes(segment)).unwrap());
        }
        assert_eq!(decoded, postings);
        for segment in &segments {
            assert!(segment.header.posting_count as usize <= crate::core::types::MAX_SEGMENT_SIZE);
        }
    }
}
