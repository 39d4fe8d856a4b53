use std::cmp::Reverse;
use std::collections::BinaryHeap;

use log::debug;

use crate::compression::codec;
use crate::core::types::{
    Offset, DOC_LEVEL_PREFIX, DOC_LEVEL_SHIFT, MAX_SEGMENT_SIZE, MIN_SEGMENT_SIZE,
};
use crate::core::error::Result;
use crate::gcl::posting_list::merge_document_level_lists;
use crate::gcl::visible::DeletedRanges;
use crate::manager::inplace::InPlaceIndex;
use crate::storage::partition::SegmentHeader;
use crate::storage::partition_reader::{PartitionReader, RecordCursor, TermRecord};
use crate::storage::partition_writer::PartitionWriter;

/// What fed the merge and what to do with oversized lists.
pub struct MergeConfig<'a> {
    /// Deleted ranges to filter out (on-the-fly or dedicated GC).
    pub filter: Option<&'a DeletedRanges>,
    /// Lists reaching `long_list_threshold` postings leave the merge
    /// stream for the in-place index.
    pub long_list_threshold: Option<u64>,
}

/// Terms that were routed into the in-place index instead of the output
/// partition, with the postings they carried.
pub struct MergeOutcome {
    pub diverted_terms: Vec<String>,
    pub postings_written: u64,
    pub postings_dropped: u64,
}

/// Multi-way merge of partition record streams plus an optional
/// pre-sorted in-memory term list, producing one output partition.
/// Single-source terms are concatenated without a decode pass unless a
/// filter is active or their segments need re-balancing.
pub fn merge_partitions(
    partitions: &[&PartitionReader],
    memory: Vec<(String, Vec<Offset>)>,
    writer: &mut PartitionWriter,
    inplace: Option<&mut InPlaceIndex>,
    config: MergeConfig,
) -> Result<MergeOutcome> {
    let mut cursors: Vec<RecordCursor> = partitions.iter().map(|p| p.records()).collect();
    let mut current: Vec<Option<TermRecord>> = Vec::with_capacity(cursors.len());
    for cursor in &mut cursors {
        current.push(cursor.next()?);
    }
    let mut memory = memory.into_iter().peekable();

    let mut heap: BinaryHeap<Reverse<(Vec<u8>, usize)>> = BinaryHeap::new();
    for (index, record) in current.iter().enumerate() {
        if let Some(record) = record {
            heap.push(Reverse((record.term.clone(), index)));
        }
    }

    let mut outcome = MergeOutcome {
        diverted_terms: Vec::new(),
        postings_written: 0,
        postings_dropped: 0,
    };
    let mut inplace = inplace;

    loop {
        // The smallest pending term across all sources.
        let disk_min = heap.peek().map(|entry| entry.0 .0.clone());
        let memory_min = memory.peek().map(|(term, _)| term.as_bytes().to_vec());
        let term = match (disk_min, memory_min) {
            (None, None) => break,
            (Some(d), None) => d,
            (None, Some(m)) => m,
            (Some(d), Some(m)) => d.min(m),
        };

        // Gather every source currently holding this term.
        let mut disk_sources = Vec::new();
        while let Some(Reverse((top, _))) = heap.peek() {
            if *top != term {
                break;
            }
            let Reverse((_, index)) = heap.pop().unwrap();
            disk_sources.push(index);
        }
        let take_memory =
            matches!(memory.peek(), Some((m, _)) if m.as_bytes() == term.as_slice());
        let memory_postings = if take_memory {
            memory.next().map(|(_, postings)| postings)
        } else {
            None
        };

        let term_string = String::from_utf8_lossy(&term).into_owned();
        merge_one_term(
            &term_string,
            &disk_sources,
            &mut current,
            partitions,
            memory_postings,
            writer,
            &mut inplace,
            &config,
            &mut outcome,
        )?;

        // Advance the disk sources that contributed.
        for index in disk_sources {
            current[index] = cursors[index].next()?;
            if let Some(record) = &current[index] {
                heap.push(Reverse((record.term.clone(), index)));
            }
        }
    }
    debug!(
        "merge wrote {} postings, dropped {}, diverted {} terms",
        outcome.postings_written,
        outcome.postings_dropped,
        outcome.diverted_terms.len()
    );
    Ok(outcome)
}

fn merge_one_term(
    term: &str,
    disk_sources: &[usize],
    current: &mut [Option<TermRecord>],
    partitions: &[&PartitionReader],
    memory_postings: Option<Vec<Offset>>,
    writer: &mut PartitionWriter,
    inplace: &mut Option<&mut InPlaceIndex>,
    config: &MergeConfig,
    outcome: &mut MergeOutcome,
) -> Result<()> {
    let document_level = term.starts_with(DOC_LEVEL_PREFIX);

    let total_postings: u64 = disk_sources
        .iter()
        .map(|&index| {
            current[index]
                .as_ref()
                .map(|r| {
                    r.segments
                        .iter()
                        .map(|s| s.header.posting_count as u64)
                        .sum::<u64>()
                })
                .unwrap_or(0)
        })
        .sum::<u64>()
        + memory_postings.as_ref().map(|p| p.len() as u64).unwrap_or(0);

    let divert = match (&inplace, config.long_list_threshold) {
        (Some(_), Some(threshold)) => total_postings >= threshold,
        _ => false,
    };

    // Ordered-combination fast path: a single on-disk source, nothing to
    // filter, nothing to divert, and well-formed segment sizes.
    if !divert
        && config.filter.is_none()
        && memory_postings.is_none()
        && disk_sources.len() == 1
    {
        let index = disk_sources[0];
        let record = current[index].as_ref().unwrap();
        let balanced = record.segments.iter().enumerate().all(|(i, s)| {
            let count = s.header.posting_count as usize;
            count <= MAX_SEGMENT_SIZE
                && (count >= MIN_SEGMENT_SIZE || i == record.segments.len() - 1)
        });
        if balanced {
            let reader = partitions[index];
            let segments: Vec<(SegmentHeader, Vec<u8>)> = record
                .segments
                .iter()
                .map(|s| (s.header, reader.segment_bytes(s).to_vec()))
                .collect();
            outcome.postings_written += total_postings;
            return writer.add_compressed_list(term, &segments);
        }
    }

    // Decode every fragment.
    let mut fragments: Vec<Vec<Offset>> = Vec::new();
    for &index in disk_sources {
        let record = current[index].as_ref().unwrap();
        let reader = partitions[index];
        let mut postings = Vec::new();
        for segment in &record.segments {
            postings.extend(codec::decode(reader.segment_bytes(segment))?);
        }
        fragments.push(postings);
    }
    if let Some(postings) = memory_postings {
        fragments.push(postings);
    }

    let mut merged = if document_level {
        merge_document_level_lists(fragments)
    } else {
        let mut all: Vec<Offset> = fragments.into_iter().flatten().collect();
        all.sort_unstable();
        all.dedup();
        all
    };

    if let Some(deleted) = config.filter {
        let before = merged.len();
        if document_level {
            merged.retain(|&p| !deleted.contains(p >> DOC_LEVEL_SHIFT));
        } else {
            merged.retain(|&p| !deleted.contains(p));
        }
        outcome.postings_dropped += (before - merged.len()) as u64;
    }
    if merged.is_empty() {
        return Ok(());
    }

    if divert {
        if let Some(inplace) = inplace {
            inplace.add_postings(term, &merged)?;
            outcome.diverted_terms.push(term.to_string());
            outcome.postings_written += merged.len() as u64;
            return Ok(());
        }
    }
    outcome.postings_written += merged.len() as u64;
    writer.add_list(term, &merged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compression::codec::CodecId;
    use crate::core::types::doc_level_posting;
    use crate::storage::partition_reader::PartitionReader;
    use tempfile::TempDir;

    fn build_partition(
        dir: &TempDir,
        id: u32,
        terms: &[(&str, Vec<u64>)],
    ) -> PartitionReader {
        let path = dir.path().join(format!("index.{:03}", id));
        let mut writer = PartitionWriter::create(&path, id, CodecId::VByte).unwrap();
        for (term, postings) in terms {
            writer.add_list(term, postings).unwrap();
        }
        writer.finish().unwrap();
        PartitionReader::open(&path, id).unwrap()
    }

    fn read_term(reader: &PartitionReader, term: &str) -> Option<Vec<u64>> {
        reader.term_segments(term).unwrap().map(|segments| {
            segments
                .iter()
                .flat_map(|s| codec::decode(reader.segment_bytes(s)).unwrap())
                .collect()
        })
    }

    #[test]
    fn test_merge_equals_concatenate_and_resort() {
        let dir = TempDir::new().unwrap();
        let p1 = build_partition(
            &dir,
            0,
            &[("cat", vec![2]), ("the", vec![1, 5])],
        );
        let p2 = build_partition(&dir, 1, &[("cat", vec![8]), ("dog", vec![7])]);

        let out_path = dir.path().join("index.002");
        let mut writer = PartitionWriter::create(&out_path, 2, CodecId::VByte).unwrap();
        merge_partitions(
            &[&p1, &p2],
            Vec::new(),
            &mut writer,
            None,
            MergeConfig {
                filter: None,
                long_list_threshold: None,
            },
        )
        .unwrap();
        writer.finish().unwrap();

        let merged = PartitionReader::open(&out_path, 2).unwrap();
        assert_eq!(read_term(&merged, "cat").unwrap(), vec![2, 8]);
        assert_eq!(read_term(&merged, "dog").unwrap(), vec![7]);
        assert_eq!(read_term(&merged, "the").unwrap(), vec![1, 5]);
    }

    #[test]
    fn test_merge_with_memory_source() {
        let dir = TempDir::new().unwrap();
        let p1 = build_partition(&dir, 0, &[("alpha", vec![1, 9])]);
        let memory = vec![
            ("alpha".to_string(), vec![20u64]),
            ("beta".to_string(), vec![4u64]),
        ];
        let out_path = dir.path().join("index.001");
        let mut writer = PartitionWriter::create(&out_path, 1, CodecId::VByte).unwrap();
        merge_partitions(
            &[&p1],
            memory,
            &mut writer,
            None,
            MergeConfig {
                filter: None,
                long_list_threshold: None,
            },
        )
        .unwrap();
        writer.finish().unwrap();

        let merged = PartitionReader::open(&out_path, 1).unwrap();
        assert_eq!(read_term(&merged, "alpha").unwrap(), vec![1, 9, 20]);
        assert_eq!(read_term(&merged, "beta").unwrap(), vec![4]);
    }

    #[test]
    fn test_gc_filter_drops_deleted_ranges() {
        let dir = TempDir::new().unwrap();
        let p1 = build_partition(
            &dir,
            0,
            &[("cat", vec![2, 8]), ("dog", vec![7]), ("the", vec![1, 5])],
        );
        let mut deleted = DeletedRanges::new();
        deleted.add(1, 6);

        let out_path = dir.path().join("index.001");
        let mut writer = PartitionWriter::create(&out_path, 1, CodecId::VByte).unwrap();
        let outcome = merge_partitions(
            &[&p1],
            Vec::new(),
            &mut writer,
            None,
            MergeConfig {
                filter: Some(&deleted),
                long_list_threshold: None,
            },
        )
        .unwrap();
        writer.finish().unwrap();

        assert_eq!(outcome.postings_dropped, 4);
        let merged = PartitionReader::open(&out_path, 1).unwrap();
        assert_eq!(read_term(&merged, "cat").unwrap(), vec![8]);
        assert_eq!(read_term(&merged, "dog").unwrap(), vec![7]);
        assert_eq!(read_term(&merged, "the"), None);
    }

    #[test]
    fn test_document_level_duplicates_sum_tfs() {
        let dir = TempDir::new().unwrap();
        let doc_term = "<!>a";
        let p1 = build_partition(&dir, 0, &[(doc_term, vec![doc_level_posting(3, 2)])]);
        let p2 = build_partition(&dir, 1, &[(doc_term, vec![doc_level_posting(3, 4)])]);

        let out_path = dir.path().join("index.002");
        let mut writer = PartitionWriter::create(&out_path, 2, CodecId::VByte).unwrap();
        merge_partitions(
            &[&p1, &p2],
            Vec::new(),
            &mut writer,
            None,
            MergeConfig {
                filter: None,
                long_list_threshold: None,
            },
        )
        .unwrap();
        writer.finish().unwrap();

        let merged = PartitionReader::open(&out_path, 2).unwrap();
        assert_eq!(
            read_term(&merged, doc_term).unwrap(),
            vec![doc_level_posting(3, 6)]
        );
    }

    #[test]
    fn test_long_lists_divert_to_inplace() {
        let dir = TempDir::new().unwrap();
        let long: Vec<u64> = (1..=5000u64).collect();
        let p1 = build_partition(&dir, 0, &[("big", long.clone()), ("tiny", vec![9000])]);

        let mut inplace =
            InPlaceIndex::create(&dir.path().join("index.long"), CodecId::VByte, false).unwrap();
        let out_path = dir.path().join("index.001");
        let mut writer = PartitionWriter::create(&out_path, 1, CodecId::VByte).unwrap();
        let outcome = merge_partitions(
            &[&p1],
            Vec::new(),
            &mut writer,
            Some(&mut inplace),
            MergeConfig {
                filter: None,
                long_list_threshold: Some(1000),
            },
        )
        .unwrap();
        writer.finish().unwrap();

        assert_eq!(outcome.diverted_terms, vec!["big".to_string()]);
        let merged = PartitionReader::open(&out_path, 1).unwrap();
        assert_eq!(read_term(&merged, "big"), None);
        assert_eq!(read_term(&merged, "tiny").unwrap(), vec![9000]);
        let segments = inplace.term_segments("big").unwrap().unwrap();
        let mut postings = Vec::new();
        for segment in segments {
            postings.extend(codec::decode(&inplace.read_segment(&segment).unwrap()).unwrap());
        }
        assert_eq!(postings, long);
    }

    #[test]
    fn test_duplicate_postings_at_partition_boundary_dedup() {
        let dir = TempDir::new().unwrap();
        let p1 = build_partition(&dir, 0, &[("x", vec![5, 10])]);
        let p2 = build_partition(&dir, 1, &[("x", vec![10, 15])]);
        let out_path = dir.path().join("index.002");
        let mut writer = PartitionWriter::create(&out_path, 2, CodecId::VByte).unwrap();
        merge_partitions(
            &[&p1, &p2],
            Vec::new(),
            &mut writer,
            None,
            MergeConfig {
                filter: None,
                long_list_threshold: None,
            },
        )
        .unwrap();
        writer.finish().unwrap();
        let merged = PartitionReader::open(&out_path, 2).unwrap();
        assert_eq!(read_term(&merged, "x").unwrap(), vec![5, 10, 15]);
    }
}
