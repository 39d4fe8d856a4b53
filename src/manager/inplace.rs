use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};

use log::debug;
use roaring::RoaringBitmap;
use serde::{Deserialize, Serialize};

use crate::compression::codec::{self, CodecId};
use crate::core::error::{Error, ErrorKind, Result};
use crate::core::types::{Offset, MIN_SEGMENT_SIZE};
use crate::storage::partition::{SegmentDescriptor, SegmentHeader};
use crate::storage::partition_writer::segment_boundaries;

/// Allocation unit of the in-place file.
pub const BLOCK_SIZE: u64 = 1024 * 1024;

/// A term may grow by relocation up to this many contiguous blocks;
/// beyond that its new appends go to fresh runs instead (chaining).
pub const MAX_BLOCKS_PER_TERM: u64 = 64;

/// Per-term budget for buffered, not-yet-written segments.
pub const MAX_PENDING_DATA: usize = 2 * 1024 * 1024;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredSegment {
    byte_length: u32,
    posting_count: u32,
    first_posting: Offset,
    last_posting: Offset,
    file_offset: u64,
}

impl StoredSegment {
    fn descriptor(&self) -> SegmentDescriptor {
        SegmentDescriptor {
            header: SegmentHeader {
                byte_length: self.byte_length,
                posting_count: self.posting_count,
                first_posting: self.first_posting,
                last_posting: self.last_posting,
            },
            file_offset: self.file_offset,
        }
    }
}

/// One long list: its segment table, the block runs it occupies, and the
/// bitmask of merge partitions that still hold fragments of the term.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct TermDescriptor {
    segments: Vec<StoredSegment>,
    /// (first block, block count) of each run; one entry while the term
    /// is in contiguous mode, several once it chains.
    runs: Vec<(u64, u64)>,
    /// Bytes written into the final run.
    bytes_used_in_last_run: u64,
    partition_bitmask: u64,
    #[serde(skip)]
    pending: Vec<(Vec<u8>, SegmentHeader)>,
    #[serde(skip)]
    pending_bytes: usize,
}

impl TermDescriptor {
    fn last_run_capacity(&self) -> u64 {
        self.runs.last().map(|&(_, n)| n * BLOCK_SIZE).unwrap_or(0)
    }

    fn total_blocks(&self) -> u64 {
        self.runs.iter().map(|&(_, n)| n).sum()
    }
}

/// The long-list side file: posting lists too large for the merge stream,
/// kept under an append/relocate discipline in 1 MiB blocks. The term
/// table is written after the posting blocks on close and rebuilt from
/// there on open.
pub struct InPlaceIndex {
    file: File,
    path: PathBuf,
    codec: CodecId,
    /// Relocation disabled: appends always go to fresh aligned runs.
    append_only: bool,
    block_count: u64,
    free_blocks: RoaringBitmap,
    terms: HashMap<String, TermDescriptor>,
}

const FOOTER_SIZE: u64 = 24;

impl InPlaceIndex {
    pub fn create(path: &Path, codec: CodecId, append_only: bool) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        Ok(InPlaceIndex {
            file,
            path: path.to_path_buf(),
            codec,
            append_only,
            block_count: 0,
            free_blocks: RoaringBitmap::new(),
            terms: HashMap::new(),
        })
    }

    pub fn open(path: &Path, codec: CodecId, append_only: bool) -> Result<Self> {
        if !path.exists() {
            return Self::create(path, codec, append_only);
        }
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        let file_length = file.metadata()?.len();
        if file_length < FOOTER_SIZE {
            return Err(Error::new(
                ErrorKind::Inconsistent,
                "in-place index shorter than its footer".to_string(),
            ));
        }
        let mut footer = [0u8; FOOTER_SIZE as usize];
        file.read_exact_at(&mut footer, file_length - FOOTER_SIZE)?;
        let table_offset = u64::from_le_bytes([
            footer[0], footer[1], footer[2], footer[3], footer[4], footer[5], footer[6],
            footer[7],
        ]);
        let block_count = u64::from_le_bytes([
            footer[8], footer[9], footer[10], footer[11], footer[12], footer[13], footer[14],
            footer[15],
        ]);
        let table_length =
            u32::from_le_bytes([footer[16], footer[17], footer[18], footer[19]]) as usize;
        let checksum = u32::from_le_bytes([footer[20], footer[21], footer[22], footer[23]]);

        let mut table_bytes = vec![0u8; table_length];
        file.read_exact_at(&mut table_bytes, table_offset)?;
        if crc32fast::hash(&table_bytes) != checksum {
            return Err(Error::new(
                ErrorKind::Inconsistent,
                "in-place term table fails its checksum".to_string(),
            ));
        }
        let raw = lz4_flex::decompress_size_prepended(&table_bytes).map_err(|e| {
            Error::new(ErrorKind::Inconsistent, format!("in-place table: {}", e))
        })?;
        let terms: HashMap<String, TermDescriptor> = bincode::deserialize(&raw)?;

        // Every block not owned by some term is free.
        let mut free_blocks = RoaringBitmap::new();
        free_blocks.insert_range(0..block_count as u32);
        for descriptor in terms.values() {
            for &(start, count) in &descriptor.runs {
                free_blocks.remove_range(start as u32..(start + count) as u32);
            }
        }

        Ok(InPlaceIndex {
            file,
            path: path.to_path_buf(),
            codec,
            append_only,
            block_count,
            free_blocks,
            terms,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn term_count(&self) -> usize {
        self.terms.len()
    }

    pub fn has_term(&self, term: &str) -> bool {
        self.terms.contains_key(term)
    }

    pub fn posting_count(&self, term: &str) -> u64 {
        self.terms
            .get(term)
            .map(|d| {
                d.segments
                    .iter()
                    .map(|s| s.posting_count as u64)
                    .sum::<u64>()
                    + d.pending
                        .iter()
                        .map(|(_, h)| h.posting_count as u64)
                        .sum::<u64>()
            })
            .unwrap_or(0)
    }

    pub fn terms(&self) -> impl Iterator<Item = &str> {
        self.terms.keys().map(|s| s.as_str())
    }

    /// Marks/clears merge-partition membership for a term. Bits may lag
    /// behind reality as long as set bits are a superset of the truth.
    pub fn set_partition_bit(&mut self, term: &str, partition: u32, present: bool) {
        if let Some(descriptor) = self.terms.get_mut(term) {
            let bit = 1u64 << (partition % 64);
            if present {
                descriptor.partition_bitmask |= bit;
            } else {
                descriptor.partition_bitmask &= !bit;
            }
        }
    }

    pub fn partition_bitmask(&self, term: &str) -> u64 {
        self.terms
            .get(term)
            .map(|d| d.partition_bitmask)
            .unwrap_or(0)
    }

    /// Appends postings for a term, compressing them into target-sized
    /// segments first.
    pub fn add_postings(&mut self, term: &str, postings: &[Offset]) -> Result<()> {
        if postings.is_empty() {
            return Ok(());
        }
        let mut segments = Vec::new();
        for (start, end) in segment_boundaries(postings.len()) {
            let slice = &postings[start..end];
            let block = codec::encode(self.codec, slice)?;
            segments.push((
                block,
                SegmentHeader {
                    byte_length: 0, // fixed up below
                    posting_count: slice.len() as u32,
                    first_posting: slice[0],
                    last_posting: slice[slice.len() - 1],
                },
            ));
        }
        for (block, header) in &mut segments {
            header.byte_length = block.len() as u32;
        }
        self.append_segments(term, segments)
    }

    /// Buffers pre-compressed segments for a term, coalescing runt
    /// segments with their pending neighbour, and flushes the buffer once
    /// it outgrows MAX_PENDING_DATA.
    pub fn append_segments(
        &mut self,
        term: &str,
        segments: Vec<(Vec<u8>, SegmentHeader)>,
    ) -> Result<()> {
        {
            let descriptor = self.terms.entry(term.to_string()).or_default();
            for (block, header) in segments {
                // Coalesce when the previous pending segment is a runt.
                if let Some((last_block, last_header)) = descriptor.pending.last() {
                    let combined =
                        last_header.posting_count as usize + header.posting_count as usize;
                    if (last_header.posting_count as usize) < MIN_SEGMENT_SIZE
                        && combined <= crate::core::types::MAX_SEGMENT_SIZE
                    {
                        let mut merged = codec::decode(last_block)?;
                        merged.extend(codec::decode(&block)?);
                        let reencoded = codec::encode(self.codec, &merged)?;
                        let merged_header = SegmentHeader {
                            byte_length: reencoded.len() as u32,
                            posting_count: merged.len() as u32,
                            first_posting: merged[0],
                            last_posting: merged[merged.len() - 1],
                        };
                        descriptor.pending_bytes -= last_block.len();
                        descriptor.pending.pop();
                        descriptor.pending_bytes += reencoded.len();
                        descriptor.pending.push((reencoded, merged_header));
                        continue;
                    }
                }
                descriptor.pending_bytes += block.len();
                descriptor.pending.push((block, header));
            }
        }
        if self.terms[term].pending_bytes > MAX_PENDING_DATA {
            self.flush_pending(term)?;
        }
        Ok(())
    }

    /// Writes a term's pending segments into its block run, relocating or
    /// chaining when the run is out of slack.
    fn flush_pending(&mut self, term: &str) -> Result<()> {
        let (pending, needed) = {
            let descriptor = match self.terms.get_mut(term) {
                Some(d) => d,
                None => return Ok(()),
            };
            if descriptor.pending.is_empty() {
                return Ok(());
            }
            let pending = std::mem::take(&mut descriptor.pending);
            descriptor.pending_bytes = 0;
            let needed: u64 = pending.iter().map(|(b, _)| b.len() as u64).sum();
            (pending, needed)
        };
        self.ensure_capacity(term, needed)?;

        let descriptor = self.terms.get_mut(term).unwrap();
        let &(run_start, _) = descriptor.runs.last().unwrap();
        let mut write_offset = run_start * BLOCK_SIZE + descriptor.bytes_used_in_last_run;
        for (block, header) in pending {
            self.file.write_all_at(&block, write_offset)?;
            descriptor.segments.push(StoredSegment {
                byte_length: header.byte_length,
                posting_count: header.posting_count,
                first_posting: header.first_posting,
                last_posting: header.last_posting,
                file_offset: write_offset,
            });
            write_offset += block.len() as u64;
            descriptor.bytes_used_in_last_run += block.len() as u64;
        }
        Ok(())
    }

    /// Makes sure the term's final run has `needed` bytes of slack:
    /// contiguous terms relocate to a doubled run until
    /// MAX_BLOCKS_PER_TERM, after which fresh runs are chained on. In
    /// append-only mode nothing ever moves.
    fn ensure_capacity(&mut self, term: &str, needed: u64) -> Result<()> {
        let (slack, total_blocks, run_count) = {
            let descriptor = self.terms.get(term).unwrap();
            (
                descriptor.last_run_capacity() - descriptor.bytes_used_in_last_run,
                descriptor.total_blocks(),
                descriptor.runs.len(),
            )
        };
        if run_count > 0 && slack >= needed {
            return Ok(());
        }
        let needed_blocks = needed.div_ceil(BLOCK_SIZE).max(1);

        if run_count == 0 {
            let run = self.allocate_run(needed_blocks)?;
            let descriptor = self.terms.get_mut(term).unwrap();
            descriptor.runs.push(run);
            descriptor.bytes_used_in_last_run = 0;
            return Ok(());
        }

        let relocate =
            !self.append_only && run_count == 1 && total_blocks < MAX_BLOCKS_PER_TERM;
        if relocate {
            // Move the whole list into a doubled contiguous run.
            let new_blocks = (total_blocks * 2).max(total_blocks + needed_blocks);
            let (new_start, new_count) = self.allocate_run(new_blocks)?;
            let descriptor = self.terms.get_mut(term).unwrap();
            let (old_start, old_count) = descriptor.runs[0];
            let used = descriptor.bytes_used_in_last_run;

            let mut data = vec![0u8; used as usize];
            self.file.read_exact_at(&mut data, old_start * BLOCK_SIZE)?;
            self.file.write_all_at(&data, new_start * BLOCK_SIZE)?;

            let descriptor = self.terms.get_mut(term).unwrap();
            let shift = |offset: u64| offset - old_start * BLOCK_SIZE + new_start * BLOCK_SIZE;
            for segment in &mut descriptor.segments {
                segment.file_offset = shift(segment.file_offset);
            }
            descriptor.runs = vec![(new_start, new_count)];
            self.free_run(old_start, old_count);
            debug!(
                "relocated {} from {} blocks to {} blocks",
                term, old_count, new_count
            );
        } else {
            // Chain: a fresh run holds everything from here on.
            let run = self.allocate_run(needed_blocks)?;
            let descriptor = self.terms.get_mut(term).unwrap();
            descriptor.runs.push(run);
            descriptor.bytes_used_in_last_run = 0;
        }
        Ok(())
    }

    /// A run of `count` consecutive blocks, reusing freed blocks when a
    /// long-enough gap exists, extending the file otherwise.
    fn allocate_run(&mut self, count: u64) -> Result<(u64, u64)> {
        let mut run_start = None;
        let mut consecutive = 0u64;
        let mut previous: Option<u32> = None;
        for block in self.free_blocks.iter() {
            match previous {
                Some(p) if block == p + 1 => consecutive += 1,
                _ => consecutive = 1,
            }
            previous = Some(block);
            if consecutive == count {
                run_start = Some(block as u64 - (count - 1));
                break;
            }
        }
        let start = match run_start {
            Some(start) => {
                self.free_blocks
                    .remove_range(start as u32..(start + count) as u32);
                start
            }
            None => {
                let start = self.block_count;
                self.block_count += count;
                self.file.set_len(self.block_count * BLOCK_SIZE)?;
                start
            }
        };
        Ok((start, count))
    }

    fn free_run(&mut self, start: u64, count: u64) {
        self.free_blocks
            .insert_range(start as u32..(start + count) as u32);
    }

    /// Segment table for a term; pending data is flushed first so that
    /// every returned descriptor is backed by the file.
    pub fn term_segments(&mut self, term: &str) -> Result<Option<Vec<SegmentDescriptor>>> {
        if !self.terms.contains_key(term) {
            return Ok(None);
        }
        self.flush_pending(term)?;
        Ok(self
            .terms
            .get(term)
            .map(|d| d.segments.iter().map(StoredSegment::descriptor).collect()))
    }

    /// Raw compressed bytes for one of this file's segments.
    pub fn read_segment(&self, descriptor: &SegmentDescriptor) -> Result<Vec<u8>> {
        let mut buffer = vec![0u8; descriptor.header.byte_length as usize];
        self.file.read_exact_at(&mut buffer, descriptor.file_offset)?;
        Ok(buffer)
    }

    /// Flushes all pending data and persists the term table after the
    /// posting blocks: lz4-compressed bincode, a crc, and a fixed footer.
    pub fn close(&mut self) -> Result<()> {
        let terms: Vec<String> = self.terms.keys().cloned().collect();
        for term in terms {
            self.flush_pending(&term)?;
        }
        let raw = bincode::serialize(&self.terms)?;
        let table = lz4_flex::compress_prepend_size(&raw);
        let table_offset = self.block_count * BLOCK_SIZE;
        self.file.set_len(table_offset)?;
        self.file.write_all_at(&table, table_offset)?;

        let mut footer = Vec::with_capacity(FOOTER_SIZE as usize);
        footer.extend_from_slice(&table_offset.to_le_bytes());
        footer.extend_from_slice(&self.block_count.to_le_bytes());
        footer.extend_from_slice(&(table.len() as u32).to_le_bytes());
        footer.extend_from_slice(&crc32fast::hash(&table).to_le_bytes());
        self.file
            .write_all_at(&footer, table_offset + table.len() as u64)?;
        self.file.sync_all()?;
        Ok(())
    }
}
