use std::collections::HashMap;
use std::fs::OpenOptions;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use log::{info, warn};
use parking_lot::Mutex;

use crate::analysis::stemmer;
use crate::analysis::tokenizer::Tokenizer;
use crate::core::config::IndexConfig;
use crate::core::error::{Error, ErrorKind, Result};
use crate::core::types::{Extent, Offset, FIRST_OFFSET, MAX_TOKEN_LENGTH};
use crate::gcl::list::ExtentList;
use crate::gcl::parser::{GclParser, PostingSource};
use crate::gcl::visible::VisibleExtents;
use crate::manager::manager::IndexManager;
use crate::storage::header::IndexHeader;
use crate::storage::layout::IndexLayout;

/// Filesystem events the engine consumes from watchers and front-ends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexEvent {
    Write(String),
    Append(String),
    Truncate(String),
    Rename(String, String),
    Unlink(String),
    Chmod(String),
    Mkdir(String),
    Rmdir(String),
}

#[derive(Debug, Clone)]
pub struct IndexSummary {
    pub partition_count: usize,
    pub posting_count: u64,
    pub deleted_posting_count: u64,
    pub used_address_space: Offset,
    pub update_memory_used: usize,
    pub garbage_ratio: f64,
}

/// The index facade: one directory, one linear address space, one writer.
/// Tokens stream into the update lexicon through here, queries leave as
/// extent iterators, and maintenance runs behind the manager's lock.
pub struct Index {
    config: IndexConfig,
    layout: IndexLayout,
    manager: Arc<IndexManager>,
    header: Mutex<IndexHeader>,
    /// Next unassigned address; address 0 stays reserved.
    next_offset: AtomicU64,
    /// Document name -> indexed address range, for deletion events.
    documents: Mutex<HashMap<String, Extent>>,
}

impl Index {
    /// Opens or creates the index in `config.directory`. An unclean
    /// consistency flag means a crash mid-update: recovery is by rebuild.
    pub fn open(mut config: IndexConfig) -> Result<Index> {
        config.validate()?;
        let layout = IndexLayout::new(&config.directory)?;

        let header_path = layout.header_path();
        let header = if header_path.exists() {
            let header = IndexHeader::load(&header_path)?;
            if !header.consistent {
                warn!("index {:?} is inconsistent, rebuilding", config.directory);
                layout.remove_all_index_files()?;
                // A crashed writer never released its lock.
                let _ = std::fs::remove_file(config.directory.join(".write_lock"));
                IndexHeader::from_config(&config)
            } else {
                // The on-disk header is authoritative for the settings
                // baked into the files.
                config.stemming_level = header.stemming_level;
                config.document_level = header.document_level;
                config.bigram_indexing = header.bigram_indexing;
                config.compression = header.compression;
                header
            }
        } else {
            IndexHeader::from_config(&config)
        };
        header.store(&header_path)?;

        if !config.read_only {
            acquire_write_lock(&config.directory)?;
        }

        let next_offset = header.used_address_space.max(FIRST_OFFSET - 1) + 1;
        let manager = IndexManager::new(config.clone(), layout.clone())?;
        Ok(Index {
            config,
            layout,
            manager,
            header: Mutex::new(header),
            next_offset: AtomicU64::new(next_offset),
            documents: Mutex::new(HashMap::new()),
        })
    }

    pub fn config(&self) -> &IndexConfig {
        &self.config
    }

    /// Clears the consistency flag ahead of the first mutation after a
    /// clean state; sync() sets it back.
    fn mark_dirty(&self) {
        let mut header = self.header.lock();
        if header.consistent {
            header.consistent = false;
            if let Err(err) = header.store(&self.layout.header_path()) {
                warn!("could not persist index header: {}", err);
            }
        }
    }

    // ----- ingest -----

    /// Tokenizes and indexes a stretch of text, returning the address
    /// range it received.
    pub fn index_text(&self, text: &str) -> Result<Extent> {
        self.mark_dirty();
        let first = self.next_offset.load(Ordering::SeqCst);
        let tokens = Tokenizer::tokenize(text, first);
        if tokens.is_empty() {
            return Ok(Extent::new(first, first));
        }
        let mut previous: Option<(String, Offset)> = None;
        let mut last = first;
        for token in &tokens {
            self.manager.add_posting(&token.term, token.posting)?;
            let is_tag = token.term.starts_with('<');
            if self.config.bigram_indexing && !is_tag {
                if let Some((previous_term, previous_posting)) = &previous {
                    if *previous_posting + 1 == token.posting {
                        let fused = format!("{}_{}", previous_term, token.term);
                        self.manager.add_posting(&fused, *previous_posting)?;
                    }
                }
                previous = Some((token.term.clone(), token.posting));
            } else if is_tag {
                previous = None;
            }
            last = token.posting;
        }
        self.next_offset.store(last + 1, Ordering::SeqCst);
        self.header.lock().updates_applied += 1;
        Ok(Extent::new(first, last))
    }

    /// Indexes one named document; its range is remembered so an UNLINK
    /// event can delete it later.
    pub fn index_document(&self, name: &str, text: &str) -> Result<Extent> {
        let extent = self.index_text(text)?;
        self.documents.lock().insert(name.to_string(), extent);
        Ok(extent)
    }

    /// Low-level ingestion of pre-assigned postings.
    pub fn add_postings(&self, term: &str, postings: &[Offset]) -> Result<()> {
        self.mark_dirty();
        self.manager.add_postings(term, postings)?;
        if let Some(&last) = postings.last() {
            self.next_offset.fetch_max(last + 1, Ordering::SeqCst);
        }
        Ok(())
    }

    // ----- queries -----

    /// The combined posting list of one term from all live fragments.
    pub fn get_postings(&self, term: &str) -> Result<ExtentList> {
        self.get_postings_filtered(term, true, true)
    }

    pub fn get_postings_filtered(
        &self,
        term: &str,
        from_disk: bool,
        from_memory: bool,
    ) -> Result<ExtentList> {
        if term.len() > MAX_TOKEN_LENGTH + 4 || term.is_empty() {
            return Ok(ExtentList::Empty);
        }
        let term = term.to_lowercase();
        // With full stemming, plain terms resolve through their stem.
        if self.config.stemming_level >= 2
            && !term.starts_with('<')
            && !term.starts_with('$')
        {
            if let Some(stem) = stemmer::stem(&term) {
                return self
                    .manager
                    .get_postings(&format!("${}", stem), from_disk, from_memory);
            }
        }
        self.manager.get_postings(&term, from_disk, from_memory)
    }

    /// Batched variant used by ranked query processors: one iterator per
    /// requested term, in order.
    pub fn get_postings_multi(&self, terms: &[&str]) -> Result<Vec<ExtentList>> {
        terms
            .iter()
            .map(|term| self.get_postings_filtered(term, true, true))
            .collect()
    }

    /// Parses and evaluates a GCL query string.
    pub fn query(&self, gcl: &str) -> Result<ExtentList> {
        GclParser::new(self).parse(gcl)
    }

    /// Same, restricted to the given visible ranges.
    pub fn query_visible(&self, gcl: &str, visible: &Arc<VisibleExtents>) -> Result<ExtentList> {
        let list = self.query(gcl)?;
        Ok(list.make_secure(visible))
    }

    // ----- reader registration -----

    pub fn register(&self, suggested_timestamp: i64) -> Result<i64> {
        self.manager.register(suggested_timestamp)
    }

    pub fn deregister(&self, timestamp: i64) {
        self.manager.deregister(timestamp)
    }

    pub fn timestamp(&self) -> i64 {
        self.manager.timestamp()
    }

    // ----- maintenance -----

    /// Flushes the update buffer and lets the merge policy reorganize.
    pub fn maintain(&self) -> Result<()> {
        self.mark_dirty();
        self.manager.reorganize()
    }

    /// Flush only: the buffer becomes a new partition, no merging.
    pub fn flush(&self) -> Result<()> {
        self.mark_dirty();
        self.manager.build_new_partition()
    }

    pub fn notify(&self, event: IndexEvent) -> Result<()> {
        match event {
            IndexEvent::Unlink(name)
            | IndexEvent::Truncate(name)
            | IndexEvent::Write(name) => {
                let range = self.documents.lock().remove(&name);
                if let Some(range) = range {
                    self.notify_address_range_deleted(range.start, range.end)?;
                }
                Ok(())
            }
            IndexEvent::Rename(from, to) => {
                let mut documents = self.documents.lock();
                if let Some(range) = documents.remove(&from) {
                    documents.insert(to, range);
                }
                Ok(())
            }
            IndexEvent::Append(_)
            | IndexEvent::Chmod(_)
            | IndexEvent::Mkdir(_)
            | IndexEvent::Rmdir(_) => Ok(()),
        }
    }

    /// Declares an address range dead; GC removes its postings when the
    /// garbage ratio warrants it.
    pub fn notify_address_range_deleted(&self, start: Offset, end: Offset) -> Result<()> {
        self.mark_dirty();
        self.manager.notify_address_range_deleted(start, end)?;
        self.header.lock().deleted_address_space += end - start + 1;
        Ok(())
    }

    /// Immediate full garbage collection.
    pub fn run_garbage_collection(&self) -> Result<()> {
        self.mark_dirty();
        self.manager.run_gc()
    }

    /// Flushes all state and sets the consistency flag.
    pub fn sync(&self) -> Result<()> {
        self.manager.sync()?;
        let mut header = self.header.lock();
        header.used_address_space = self.next_offset.load(Ordering::SeqCst) - 1;
        header.consistent = true;
        header.store(&self.layout.header_path())
    }

    pub fn summary(&self) -> IndexSummary {
        IndexSummary {
            partition_count: self.manager.partition_count(),
            posting_count: self.manager.posting_count(),
            deleted_posting_count: self.manager.deleted_posting_count(),
            used_address_space: self.next_offset.load(Ordering::SeqCst) - 1,
            update_memory_used: self.manager.update_memory_used(),
            garbage_ratio: self.manager.garbage_ratio(),
        }
    }
}

impl PostingSource for Index {
    fn get_postings(&self, term: &str) -> Result<ExtentList> {
        Index::get_postings(self, term)
    }

    fn bigram_enabled(&self) -> bool {
        self.config.bigram_indexing
    }

    fn biggest_offset(&self) -> Offset {
        let next = self.next_offset.load(Ordering::SeqCst);
        self.manager.biggest_offset().max(next.saturating_sub(1))
    }
}

impl Drop for Index {
    fn drop(&mut self) {
        if self.config.read_only {
            return;
        }
        if let Err(err) = self.manager.shutdown() {
            warn!("shutdown merge failed: {}", err);
        }
        let mut header = self.header.lock();
        header.used_address_space = self.next_offset.load(Ordering::SeqCst) - 1;
        header.consistent = true;
        if let Err(err) = header.store(&self.layout.header_path()) {
            warn!("could not persist index header: {}", err);
        }
        let _ = std::fs::remove_file(self.config.directory.join(".write_lock"));
        info!("index {:?} closed", self.config.directory);
    }
}

/// One writer per index directory; a second one is turned away.
fn acquire_write_lock(directory: &Path) -> Result<()> {
    match OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(directory.join(".write_lock"))
    {
        Ok(_) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => Err(Error::new(
            ErrorKind::ConcurrentUpdate,
            format!("index {:?} already has a writer", directory),
        )),
        Err(err) => Err(err.into()),
    }
}
