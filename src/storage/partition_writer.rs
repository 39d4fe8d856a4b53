use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use chrono::Utc;
use log::debug;

use crate::compression::codec::{self, CodecId};
use crate::compression::vbyte::VByte;
use crate::core::error::{Error, ErrorKind, Result};
use crate::core::types::{
    Offset, DICTIONARY_GROUP_SIZE, DICTIONARY_INDEX_GRANULARITY, MAX_SEGMENT_SIZE,
    MIN_SEGMENT_SIZE, TARGET_SEGMENT_SIZE,
};
use crate::storage::partition::{PartitionId, PartitionMeta, PartitionTrailer, SegmentHeader};

/// Splits a posting list into segment-sized slices. Every slice except the
/// last holds TARGET_SEGMENT_SIZE postings; a too-small final slice is
/// balanced against its predecessor so that no segment falls below
/// MIN_SEGMENT_SIZE or grows past MAX_SEGMENT_SIZE.
pub fn segment_boundaries(count: usize) -> Vec<(usize, usize)> {
    if count == 0 {
        return Vec::new();
    }
    if count <= TARGET_SEGMENT_SIZE {
        return vec![(0, count)];
    }
    let mut boundaries = Vec::new();
    let mut start = 0;
    while count - start > TARGET_SEGMENT_SIZE {
        boundaries.push((start, start + TARGET_SEGMENT_SIZE));
        start += TARGET_SEGMENT_SIZE;
    }
    let tail = count - start;
    if tail >= MIN_SEGMENT_SIZE {
        boundaries.push((start, count));
    } else {
        // Merge the runt into the previous segment, splitting evenly if
        // the combination would overshoot the ceiling.
        let (previous_start, _) = boundaries.pop().unwrap();
        let combined = count - previous_start;
        if combined <= MAX_SEGMENT_SIZE {
            boundaries.push((previous_start, count));
        } else {
            let half = combined / 2;
            boundaries.push((previous_start, previous_start + half));
            boundaries.push((previous_start + half, count));
        }
    }
    boundaries
}

/// Append-only writer for one partition file. Terms must arrive in
/// ascending byte order; the writer front-codes them in groups of
/// DICTIONARY_GROUP_SIZE, emits the sparse dictionary index as it crosses
/// each 64 KiB boundary of record data, and closes with the fixed trailer
/// and an fsync.
pub struct PartitionWriter {
    id: PartitionId,
    out: BufWriter<File>,
    codec: CodecId,
    bytes_written: u64,

    term_count: u32,
    list_count: u32,
    previous_term: Vec<u8>,
    dictionary: Vec<(Vec<u8>, u64)>,
    next_index_boundary: u64,

    first_posting: Offset,
    last_posting: Offset,
    posting_count: u64,
}

impl PartitionWriter {
    pub fn create(path: &Path, id: PartitionId, codec: CodecId) -> Result<Self> {
        let file = File::create(path)?;
        Ok(PartitionWriter {
            id,
            out: BufWriter::new(file),
            codec,
            bytes_written: 0,
            term_count: 0,
            list_count: 0,
            previous_term: Vec::new(),
            dictionary: Vec::new(),
            next_index_boundary: 0,
            first_posting: 0,
            last_posting: 0,
            posting_count: 0,
        })
    }

    pub fn id(&self) -> PartitionId {
        self.id
    }

    pub fn posting_count(&self) -> u64 {
        self.posting_count
    }

    fn write(&mut self, data: &[u8]) -> Result<()> {
        self.out.write_all(data)?;
        self.bytes_written += data.len() as u64;
        Ok(())
    }

    /// Compresses and appends one complete posting list.
    pub fn add_list(&mut self, term: &str, postings: &[Offset]) -> Result<()> {
        if postings.is_empty() {
            return Ok(());
        }
        let mut segments = Vec::new();
        for (start, end) in segment_boundaries(postings.len()) {
            let slice = &postings[start..end];
            let block = codec::encode(self.codec, slice)?;
            segments.push((
                SegmentHeader {
                    byte_length: block.len() as u32,
                    posting_count: slice.len() as u32,
                    first_posting: slice[0],
                    last_posting: slice[slice.len() - 1],
                },
                block,
            ));
        }
        self.add_compressed_list(term, &segments)
    }

    /// Appends pre-compressed segments untouched; the merge engine uses
    /// this to concatenate segments without a decode pass.
    pub fn add_compressed_list(
        &mut self,
        term: &str,
        segments: &[(SegmentHeader, Vec<u8>)],
    ) -> Result<()> {
        if segments.is_empty() {
            return Ok(());
        }
        let term_bytes = term.as_bytes();
        if !self.previous_term.is_empty() && term_bytes <= self.previous_term.as_slice() {
            return Err(Error::new(
                ErrorKind::Internal,
                format!("term {:?} arrived out of order", term),
            ));
        }

        // Group leaders carry the full term and may enter the dictionary
        // index; followers carry (shared prefix length, suffix).
        let leader = self.term_count as usize % DICTIONARY_GROUP_SIZE == 0;
        let record_offset = self.bytes_written;
        if leader {
            if record_offset >= self.next_index_boundary {
                self.dictionary.push((term_bytes.to_vec(), record_offset));
                self.next_index_boundary =
                    record_offset + DICTIONARY_INDEX_GRANULARITY as u64;
            }
            self.write(&[term_bytes.len() as u8])?;
            self.write(term_bytes)?;
        } else {
            let shared = shared_prefix(&self.previous_term, term_bytes);
            let suffix = &term_bytes[shared..];
            self.write(&[shared as u8, suffix.len() as u8])?;
            self.write(suffix)?;
        }
        self.previous_term = term_bytes.to_vec();
        self.term_count += 1;

        self.write(&(segments.len() as u32).to_le_bytes())?;
        let mut header_bytes = Vec::with_capacity(segments.len() * SegmentHeader::SIZE);
        for (header, _) in segments {
            header.write_to(&mut header_bytes);
        }
        self.write(&header_bytes)?;
        for (header, block) in segments {
            self.write(block)?;
            self.list_count += 1;
            if self.posting_count == 0 {
                self.first_posting = header.first_posting;
            } else {
                self.first_posting = self.first_posting.min(header.first_posting);
            }
            self.last_posting = self.last_posting.max(header.last_posting);
            self.posting_count += header.posting_count as u64;
        }
        Ok(())
    }

    /// Writes the dictionary index and trailer, syncs, and returns the
    /// partition's bookkeeping record.
    pub fn finish(mut self) -> Result<PartitionMeta> {
        let index_offset = self.bytes_written;
        let mut index_bytes = Vec::new();
        for (term, offset) in std::mem::take(&mut self.dictionary) {
            index_bytes.push(term.len() as u8);
            index_bytes.extend_from_slice(&term);
            VByte::encode_into(&mut index_bytes, offset);
        }
        self.write(&index_bytes)?;

        let trailer = PartitionTrailer {
            list_count: self.list_count,
            term_count: self.term_count,
            compression_mode: self.codec as u32,
            index_offset,
        };
        let mut trailer_bytes = Vec::new();
        trailer.write_to(&mut trailer_bytes);
        self.write(&trailer_bytes)?;

        self.out.flush()?;
        self.out.get_ref().sync_all()?;
        debug!(
            "partition {} closed: {} terms, {} postings, {} bytes",
            self.id, self.term_count, self.posting_count, self.bytes_written
        );
        Ok(PartitionMeta {
            id: self.id,
            first_posting: self.first_posting,
            last_posting: self.last_posting,
            posting_count: self.posting_count,
            deleted_posting_count: 0,
            term_count: self.term_count as u64,
            size_bytes: self.bytes_written,
            created_at: Utc::now(),
        })
    }
}

pub fn shared_prefix(a: &[u8], b: &[u8]) -> usize {
    let limit = a.len().min(b.len()).min(255);
    let mut shared = 0;
    while shared < limit && a[shared] == b[shared] {
        shared += 1;
    }
    shared
}
