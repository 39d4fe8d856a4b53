use rayon::prelude::*;

use crate::analysis::stemmer;
use crate::compression::vbyte::VByte;
use crate::core::types::{doc_level_posting, Offset, DOC_LEVEL_PREFIX};
use crate::lexicon::chunks::{ChunkStore, NO_CHUNK};

/// Power-of-two hash table size; collisions chain through the entries.
const HASHTABLE_SIZE: usize = 1 << 18;

const NO_ENTRY: i32 = -1;

/// Stemming cross-reference states: not yet computed, computed with no
/// stemmable form, or the id of the "$stem" entry.
const STEM_UNRESOLVED: i32 = -2;
const STEM_NONE: i32 = -1;

fn hash_term(term: &str) -> u64 {
    // FNV-1a; cheap and good enough for short byte strings.
    let mut hash = 0xcbf29ce484222325u64;
    for &byte in term.as_bytes() {
        hash ^= byte as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash
}

struct TermEntry {
    term: String,
    hash: u64,
    /// Next entry in the hash-slot chain (move-to-front on lookup).
    next: i32,
    last_posting: Offset,
    posting_count: u32,
    first_chunk: u32,
    current_chunk: u32,
    /// Write offset inside the current chunk's payload.
    pos_in_chunk: u16,
    chunk_size: u16,
    /// Payload bytes allocated for this term across all its chunks. Also
    /// determines the size of the next chunk.
    memory_consumed: u32,
    /// Postings contributed to the currently open document (saturating).
    postings_in_doc: u16,
    stemmed_form: i32,
}

/// The in-memory update index: an append-only map from term to a chain of
/// compressed posting chunks, written by the single ingest thread and
/// snapshot-read by queries through the index manager's lock.
pub struct UpdateLexicon {
    entries: Vec<TermEntry>,
    hashtable: Vec<i32>,
    store: ChunkStore,

    document_level: bool,
    stemming_level: u32,
    /// Start address of the currently open document.
    current_doc_start: Offset,
    terms_in_current_document: Vec<u32>,

    total_postings: u64,
}

impl UpdateLexicon {
    pub fn new(document_level: bool, stemming_level: u32) -> Self {
        UpdateLexicon {
            entries: Vec::new(),
            hashtable: vec![NO_ENTRY; HASHTABLE_SIZE],
            store: ChunkStore::new(),
            document_level,
            stemming_level,
            current_doc_start: 0,
            terms_in_current_document: Vec::new(),
            total_postings: 0,
        }
    }

    pub fn term_count(&self) -> usize {
        self.entries.len()
    }

    pub fn posting_count(&self) -> u64 {
        self.total_postings
    }

    pub fn is_empty(&self) -> bool {
        self.total_postings == 0
    }

    /// Bytes held by containers, term entries and the hash table.
    pub fn memory_consumed(&self) -> usize {
        self.store.memory_consumed()
            + self.entries.len() * std::mem::size_of::<TermEntry>()
            + self.hashtable.len() * 4
    }

    /// Appends one posting for the given term, maintaining the stemming
    /// cross-reference and the document-level side channel.
    pub fn add_posting(&mut self, term: &str, posting: Offset) {
        let id = self.lookup_or_insert(term);
        self.append_to_entry(id, posting);

        let is_tag = term.starts_with('<');
        if !is_tag && !term.starts_with('$') {
            if self.stemming_level >= 1 {
                let stem_id = self.resolve_stemmed_form(id);
                if stem_id >= 0 {
                    self.append_to_entry(stem_id as u32, posting);
                }
            }
            if self.document_level {
                let entry = &mut self.entries[id as usize];
                if entry.postings_in_doc == 0 {
                    self.terms_in_current_document.push(id);
                }
                entry.postings_in_doc = entry.postings_in_doc.saturating_add(1);
            }
        } else if self.document_level {
            if term == "<doc>" {
                self.current_doc_start = posting;
                self.terms_in_current_document.clear();
            } else if term == "</doc>" {
                self.close_document();
            }
        }
    }

    /// On "</doc>": one synthesized document-level posting per term seen
    /// in the document, carrying the document start and the encoded TF.
    fn close_document(&mut self) {
        if self.current_doc_start == 0 {
            return;
        }
        let doc_start = self.current_doc_start;
        let terms = std::mem::take(&mut self.terms_in_current_document);
        for id in terms {
            let (tf, term) = {
                let entry = &mut self.entries[id as usize];
                let tf = entry.postings_in_doc as u64;
                entry.postings_in_doc = 0;
                (tf, entry.term.clone())
            };
            if tf == 0 {
                continue;
            }
            let doc_term = format!("{}{}", DOC_LEVEL_PREFIX, term);
            let doc_id = self.lookup_or_insert(&doc_term);
            self.append_to_entry(doc_id, doc_level_posting(doc_start, tf));
        }
        self.current_doc_start = 0;
    }

    fn resolve_stemmed_form(&mut self, id: u32) -> i32 {
        if self.entries[id as usize].stemmed_form != STEM_UNRESOLVED {
            return self.entries[id as usize].stemmed_form;
        }
        match stemmer::stem(&self.entries[id as usize].term) {
            Some(stem) => {
                let stem_term = format!("${}", stem);
                let stem_id = self.lookup_or_insert(&stem_term) as i32;
                self.entries[id as usize].stemmed_form = stem_id;
                stem_id
            }
            None => {
                self.entries[id as usize].stemmed_form = STEM_NONE;
                STEM_NONE
            }
        }
    }

    /// Hash lookup with move-to-front chaining; inserts a fresh entry on
    /// miss.
    fn lookup_or_insert(&mut self, term: &str) -> u32 {
        let hash = hash_term(term);
        let slot = (hash as usize) & (HASHTABLE_SIZE - 1);

        let mut previous = NO_ENTRY;
        let mut current = self.hashtable[slot];
        while current != NO_ENTRY {
            let (entry_hash, entry_next) = {
                let entry = &self.entries[current as usize];
                (entry.hash, entry.next)
            };
            if entry_hash == hash && self.entries[current as usize].term == term {
                if previous != NO_ENTRY {
                    // Promote the hit to the head of the chain.
                    self.entries[previous as usize].next = entry_next;
                    self.entries[current as usize].next = self.hashtable[slot];
                    self.hashtable[slot] = current;
                }
                return current as u32;
            }
            previous = current;
            current = entry_next;
        }

        let id = self.entries.len() as u32;
        let stemmable =
            self.stemming_level >= 1 && !term.starts_with('<') && !term.starts_with('$');
        self.entries.push(TermEntry {
            term: term.to_string(),
            hash,
            next: self.hashtable[slot],
            last_posting: 0,
            posting_count: 0,
            first_chunk: NO_CHUNK,
            current_chunk: NO_CHUNK,
            pos_in_chunk: 0,
            chunk_size: 0,
            memory_consumed: 0,
            postings_in_doc: 0,
            stemmed_form: if stemmable { STEM_UNRESOLVED } else { STEM_NONE },
        });
        self.hashtable[slot] = id as i32;
        id
    }

    fn append_to_entry(&mut self, id: u32, posting: Offset) {
        let (count, last) = {
            let entry = &self.entries[id as usize];
            (entry.posting_count, entry.last_posting)
        };
        if count > 0 && posting <= last {
            // Postings arrive in monotone order; anything else is dropped.
            return;
        }
        let delta = if count == 0 { posting } else { posting - last };
        let needed = VByte::encoded_size(delta);

        if self.entries[id as usize].first_chunk == NO_CHUNK {
            let size = ChunkSizes::sized(0);
            let chunk = self.store.allocate_chunk(size);
            let entry = &mut self.entries[id as usize];
            entry.first_chunk = chunk;
            entry.current_chunk = chunk;
            entry.chunk_size = size as u16;
            entry.pos_in_chunk = 0;
            entry.memory_consumed = size as u32;
        }

        let (pos, capacity, consumed, current) = {
            let entry = &self.entries[id as usize];
            (
                entry.pos_in_chunk as usize,
                entry.chunk_size as usize,
                entry.memory_consumed as usize,
                entry.current_chunk,
            )
        };
        if pos + needed > capacity {
            // Chunk full: grow the chain by roughly a quarter of what the
            // term already occupies.
            let size = ChunkSizes::sized(consumed);
            let chunk = self.store.allocate_chunk(size);
            self.store.write_successor(current, chunk);
            let entry = &mut self.entries[id as usize];
            entry.current_chunk = chunk;
            entry.chunk_size = size as u16;
            entry.pos_in_chunk = 0;
            entry.memory_consumed += size as u32;
        }

        let (current, pos) = {
            let entry = &self.entries[id as usize];
            (entry.current_chunk, entry.pos_in_chunk as usize)
        };
        let written = self.store.write_delta(current, pos, delta);
        let entry = &mut self.entries[id as usize];
        entry.pos_in_chunk += written as u16;
        entry.last_posting = posting;
        entry.posting_count += 1;
        self.total_postings += 1;
    }

    /// Decoded postings for one term, or None if the term is unknown.
    pub fn postings_for_term(&self, term: &str) -> Option<Vec<Offset>> {
        let hash = hash_term(term);
        let slot = (hash as usize) & (HASHTABLE_SIZE - 1);
        let mut current = self.hashtable[slot];
        while current != NO_ENTRY {
            let entry = &self.entries[current as usize];
            if entry.hash == hash && entry.term == term {
                return Some(self.decode_entry(current as u32));
            }
            current = entry.next;
        }
        None
    }

    fn decode_entry(&self, id: u32) -> Vec<Offset> {
        let entry = &self.entries[id as usize];
        let mut sizes = ChunkSizes::new();
        self.store
            .decode_chain(entry.first_chunk, entry.posting_count as usize, |_| {
                sizes.next()
            })
    }

    /// Term ids in lexicographic term order, for flushing.
    pub fn sorted_term_ids(&self) -> Vec<u32> {
        let mut ids: Vec<u32> = (0..self.entries.len() as u32).collect();
        ids.par_sort_unstable_by(|&a, &b| {
            self.entries[a as usize]
                .term
                .as_bytes()
                .cmp(self.entries[b as usize].term.as_bytes())
        });
        ids
    }

    pub fn term(&self, id: u32) -> &str {
        &self.entries[id as usize].term
    }

    pub fn term_posting_count(&self, id: u32) -> u64 {
        self.entries[id as usize].posting_count as u64
    }

    pub fn postings(&self, id: u32) -> Vec<Offset> {
        self.decode_entry(id)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.hashtable.fill(NO_ENTRY);
        self.store.clear();
        self.terms_in_current_document.clear();
        self.current_doc_start = 0;
        self.total_postings = 0;
    }

    /// Partial flush support: drops every term whose buffered posting
    /// count reaches `threshold`, keeping the rest. Returns the fraction
    /// of memory freed.
    pub fn clear_terms_above(&mut self, threshold: u64) -> f64 {
        let before = self.memory_consumed();
        let retained: Vec<(String, Vec<Offset>)> = (0..self.entries.len() as u32)
            .filter(|&id| self.term_posting_count(id) < threshold)
            .map(|id| (self.entries[id as usize].term.clone(), self.decode_entry(id)))
            .collect();
        let document_level = self.document_level;
        let stemming_level = self.stemming_level;
        self.clear();
        self.document_level = document_level;
        self.stemming_level = stemming_level;
        for (term, postings) in retained {
            let id = self.lookup_or_insert(&term);
            for posting in postings {
                self.append_to_entry(id, posting);
            }
        }
        let after = self.memory_consumed();
        if before == 0 {
            0.0
        } else {
            1.0 - (after as f64 / before as f64)
        }
    }
}

/// Deterministic chunk-size sequence shared by the writer and the chain
/// walker: each new chunk is a quarter of the payload already allocated,
/// clamped to [INITIAL_CHUNK_SIZE, MAX_CHUNK_SIZE].
struct ChunkSizes {
    consumed: usize,
}

impl ChunkSizes {
    fn new() -> Self {
        ChunkSizes { consumed: 0 }
    }

    fn next(&mut self) -> usize {
        let size = Self::sized(self.consumed);
        self.consumed += size;
        size
    }

    fn sized(consumed: usize) -> usize {
        use crate::lexicon::chunks::{INITIAL_CHUNK_SIZE, MAX_CHUNK_SIZE};
        (consumed / 4).clamp(INITIAL_CHUNK_SIZE, MAX_CHUNK_SIZE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_term_roundtrip() {
        let mut lexicon = UpdateLexicon::new(false, 0);
        let postings = vec![1u64, 5, 6, 300, 301, 1_000_000];
        for &posting in &postings {
            lexicon.add_posting("the", posting);
        }
        assert_eq!(lexicon.postings_for_term("the").unwrap(), postings);
        assert_eq!(lexicon.postings_for_term("cat"), None);
    }

    #[test]
    fn test_long_chain_grows_through_chunks() {
        let mut lexicon = UpdateLexicon::new(false, 0);
        let postings: Vec<u64> = (1..20_000u64).map(|i| i * 3).collect();
        for &posting in &postings {
            lexicon.add_posting("common", posting);
        }
        assert_eq!(lexicon.postings_for_term("common").unwrap(), postings);
    }

    #[test]
    fn test_non_monotone_posting_dropped() {
        let mut lexicon = UpdateLexicon::new(false, 0);
        lexicon.add_posting("a", 10);
        lexicon.add_posting("a", 10);
        lexicon.add_posting("a", 4);
        lexicon.add_posting("a", 11);
        assert_eq!(lexicon.postings_for_term("a").unwrap(), vec![10, 11]);
    }

    #[test]
    fn test_document_level_side_channel() {
        let mut lexicon = UpdateLexicon::new(true, 0);
        lexicon.add_posting("<doc>", 1);
        lexicon.add_posting("a", 2);
        lexicon.add_posting("a", 3);
        lexicon.add_posting("b", 4);
        lexicon.add_posting("</doc>", 5);
        lexicon.add_posting("<doc>", 6);
        lexicon.add_posting("a", 7);
        lexicon.add_posting("</doc>", 8);

        let doc_a = lexicon.postings_for_term("<!>a").unwrap();
        assert_eq!(doc_a, vec![1 * 64 + 2, 6 * 64 + 1]);
        let doc_b = lexicon.postings_for_term("<!>b").unwrap();
        assert_eq!(doc_b, vec![1 * 64 + 1]);
    }

    #[test]
    fn test_stemming_crossref() {
        let mut lexicon = UpdateLexicon::new(false, 1);
        lexicon.add_posting("running", 5);
        lexicon.add_posting("runs", 9);
        let stemmed = lexicon.postings_for_term("$run").unwrap();
        assert_eq!(stemmed, vec![5, 9]);
    }

    #[test]
    fn test_sorted_iteration() {
        let mut lexicon = UpdateLexicon::new(false, 0);
        for (term, posting) in [("zebra", 1), ("apple", 2), ("mango", 3)] {
            lexicon.add_posting(term, posting);
        }
        let terms: Vec<&str> = lexicon
            .sorted_term_ids()
            .into_iter()
            .map(|id| lexicon.term(id))
            .collect();
        assert_eq!(terms, vec!["apple", "mango", "zebra"]);
    }

    #[test]
    fn test_partial_clear_keeps_short_lists() {
        let mut lexicon = UpdateLexicon::new(false, 0);
        for i in 1..=100u64 {
            lexicon.add_posting("frequent", i * 2);
        }
        lexicon.add_posting("rare", 7);
        lexicon.clear_terms_above(50);
        assert_eq!(lexicon.postings_for_term("frequent"), None);
        assert_eq!(lexicon.postings_for_term("rare").unwrap(), vec![7]);
    }
}
