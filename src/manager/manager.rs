use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam::channel::{unbounded, Sender};
use log::{info, warn};
use parking_lot::{Condvar, Mutex, RwLock};

use crate::core::config::{IndexConfig, MAX_INDEX_COUNT, MIN_GARBAGE_COLLECTION_SIZE};
use crate::core::error::{Error, ErrorKind, Result};
use crate::core::types::{Offset, DOC_LEVEL_PREFIX};
use crate::gcl::list::ExtentList;
use crate::gcl::operators::OrderedCombinationList;
use crate::gcl::operators::OrList;
use crate::gcl::posting_list::{merge_document_level_lists, PostingList};
use crate::gcl::segmented::{SegmentFetch, SegmentedPostingList};
use crate::gcl::visible::DeletedRanges;
use crate::lexicon::lexicon::UpdateLexicon;
use crate::manager::inplace::InPlaceIndex;
use crate::manager::merge::{merge_partitions, MergeConfig};
use crate::manager::merge_policy::{select_partitions, MergeStrategy};
use crate::storage::layout::IndexLayout;
use crate::storage::partition::{PartitionId, PartitionMeta, SegmentDescriptor};
use crate::storage::partition_reader::PartitionReader;
use crate::storage::partition_writer::PartitionWriter;

/// An open, immutable partition shared between the active set and any
/// iterators still holding it after the set moved on.
pub struct PartitionHandle {
    pub reader: PartitionReader,
    corrupt: Arc<AtomicBool>,
}

impl SegmentFetch for PartitionHandle {
    fn fetch(&self, descriptor: &SegmentDescriptor) -> Result<Vec<u8>> {
        Ok(self.reader.segment_bytes(descriptor).to_vec())
    }

    fn mark_corrupt(&self) {
        self.corrupt.store(true, Ordering::SeqCst);
    }
}

/// Fetch adapter for segments living in the in-place file.
struct InPlaceFetch {
    inplace: Arc<Mutex<InPlaceIndex>>,
    corrupt: Arc<AtomicBool>,
}

impl SegmentFetch for InPlaceFetch {
    fn fetch(&self, descriptor: &SegmentDescriptor) -> Result<Vec<u8>> {
        self.inplace.lock().read_segment(descriptor)
    }

    fn mark_corrupt(&self) {
        self.corrupt.store(true, Ordering::SeqCst);
    }
}

#[derive(Clone)]
struct ActivePartition {
    meta: PartitionMeta,
    handle: Arc<PartitionHandle>,
}

struct ManagerState {
    /// The active set, ascending creation order.
    partitions: Vec<ActivePartition>,
    /// A replacement set prepared by a maintenance task, waiting for the
    /// readers that predate it to drain.
    staged: Option<(Vec<ActivePartition>, i64)>,
    /// Timestamps of currently registered readers.
    readers: Vec<i64>,
    /// Partition files owned by retired sets, deletable once every
    /// remaining reader is as new as the retirement stamp.
    retired: Vec<(PathBuf, i64)>,
    next_partition_id: PartitionId,
    deleted: DeletedRanges,
    last_partial_flush_pointless: bool,
}

enum MaintenanceTask {
    Merge {
        ids: Vec<PartitionId>,
        filter: bool,
    },
    GarbageCollect,
}

/// Owns the active partition set, the update lexicon, the optional
/// in-place index and the reader registry; runs the merge policies and
/// publishes every set change through a single swap under its lock.
pub struct IndexManager {
    config: IndexConfig,
    layout: IndexLayout,
    state: Mutex<ManagerState>,
    reader_gate: Condvar,
    lexicon: RwLock<UpdateLexicon>,
    inplace: Option<Arc<Mutex<InPlaceIndex>>>,
    current_timestamp: AtomicI64,
    shutdown: AtomicBool,
    /// Set while the shutdown sequence runs its final merges, so that
    /// internal writes pass the shutdown check that rejects callers.
    in_teardown: AtomicBool,
    corrupt: Arc<AtomicBool>,
    worker: Mutex<Option<(Sender<MaintenanceTask>, JoinHandle<()>)>>,
}

impl IndexManager {
    pub fn new(config: IndexConfig, layout: IndexLayout) -> Result<Arc<Self>> {
        config.validate()?;
        let corrupt = Arc::new(AtomicBool::new(false));

        // Reopen any partitions recorded by the last maintenance commit.
        let mut partitions = Vec::new();
        let mut next_partition_id = 0;
        if layout.list_path().exists() {
            let data = fs::read_to_string(layout.list_path())?;
            let metas: Vec<PartitionMeta> = serde_json::from_str(&data)?;
            for meta in metas {
                let reader = PartitionReader::open(&layout.partition_path(meta.id), meta.id)?;
                next_partition_id = next_partition_id.max(meta.id + 1);
                partitions.push(ActivePartition {
                    meta,
                    handle: Arc::new(PartitionHandle {
                        reader,
                        corrupt: Arc::clone(&corrupt),
                    }),
                });
            }
        }

        let inplace = if config.merge_strategy.uses_inplace_index() {
            Some(Arc::new(Mutex::new(InPlaceIndex::open(
                &layout.long_list_path(),
                config.compression,
                config.append_in_place,
            )?)))
        } else {
            None
        };

        let lexicon = UpdateLexicon::new(config.document_level, config.stemming_level);
        let manager = Arc::new(IndexManager {
            state: Mutex::new(ManagerState {
                partitions,
                staged: None,
                readers: Vec::new(),
                retired: Vec::new(),
                next_partition_id,
                deleted: DeletedRanges::new(),
                last_partial_flush_pointless: false,
            }),
            reader_gate: Condvar::new(),
            lexicon: RwLock::new(lexicon),
            inplace,
            current_timestamp: AtomicI64::new(1),
            shutdown: AtomicBool::new(false),
            in_teardown: AtomicBool::new(false),
            corrupt,
            worker: Mutex::new(None),
            config,
            layout,
        });

        if manager.config.async_maintenance {
            let (sender, receiver) = unbounded::<MaintenanceTask>();
            let background = Arc::clone(&manager);
            let handle = std::thread::spawn(move || {
                while let Ok(task) = receiver.recv() {
                    let result = match task {
                        MaintenanceTask::Merge { ids, filter } => {
                            background.run_merge(&ids, filter)
                        }
                        MaintenanceTask::GarbageCollect => background.run_gc(),
                    };
                    if let Err(err) = result {
                        warn!("background maintenance failed: {}", err);
                    }
                }
            });
            *manager.worker.lock() = Some((sender, handle));
        }
        Ok(manager)
    }

    pub fn config(&self) -> &IndexConfig {
        &self.config
    }

    pub fn is_corrupt(&self) -> bool {
        self.corrupt.load(Ordering::SeqCst)
    }

    fn check_writable(&self) -> Result<()> {
        if self.shutdown.load(Ordering::SeqCst) && !self.in_teardown.load(Ordering::SeqCst) {
            return Err(Error::new(
                ErrorKind::ShuttingDown,
                "index is shutting down".to_string(),
            ));
        }
        if self.config.read_only {
            return Err(Error::new(
                ErrorKind::ReadOnly,
                "index is read-only".to_string(),
            ));
        }
        if self.is_corrupt() {
            return Err(Error::new(
                ErrorKind::Inconsistent,
                "index marked inconsistent after an I/O failure".to_string(),
            ));
        }
        Ok(())
    }

    // ----- reader registration -----

    /// Registers a reader; its timestamp pins the partition-set version it
    /// observes. Blocks while MAX_USER_COUNT readers are active.
    pub fn register(&self, suggested: i64) -> Result<i64> {
        let mut state = self.state.lock();
        loop {
            if self.shutdown.load(Ordering::SeqCst) {
                return Err(Error::new(
                    ErrorKind::ShuttingDown,
                    "no new readers during shutdown".to_string(),
                ));
            }
            if state.readers.len() < self.config.max_user_count {
                break;
            }
            self.reader_gate.wait(&mut state);
        }
        let timestamp = self
            .current_timestamp
            .fetch_max(suggested, Ordering::SeqCst)
            .max(suggested);
        self.current_timestamp.fetch_add(1, Ordering::SeqCst);
        state.readers.push(timestamp);
        Ok(timestamp)
    }

    /// Removes a reader; if a staged set is no longer pinned by anyone
    /// older than it, this is where it becomes active.
    pub fn deregister(&self, timestamp: i64) {
        let mut state = self.state.lock();
        if let Some(position) = state.readers.iter().position(|&t| t == timestamp) {
            state.readers.swap_remove(position);
        }
        self.try_install_staged(&mut state);
        self.reap_retired(&mut state);
        drop(state);
        self.reader_gate.notify_all();
    }

    pub fn timestamp(&self) -> i64 {
        self.current_timestamp.load(Ordering::SeqCst)
    }

    pub fn reader_count(&self) -> usize {
        self.state.lock().readers.len()
    }

    fn try_install_staged(&self, state: &mut ManagerState) {
        let installable = match &state.staged {
            Some((_, staged_ts)) => state.readers.iter().all(|t| t >= staged_ts),
            None => false,
        };
        if !installable {
            return;
        }
        let (new_set, staged_ts) = state.staged.take().unwrap();
        let keep: Vec<PartitionId> = new_set.iter().map(|p| p.meta.id).collect();
        for old in &state.partitions {
            if !keep.contains(&old.meta.id) {
                state
                    .retired
                    .push((self.layout.partition_path(old.meta.id), staged_ts));
            }
        }
        state.partitions = new_set;
        if let Err(err) = self.persist_partition_list(state) {
            warn!("could not rewrite partition list: {}", err);
        }
        info!("partition set v{} installed", staged_ts);
    }

    fn reap_retired(&self, state: &mut ManagerState) {
        let oldest = state.readers.iter().min().copied();
        state.retired.retain(|(path, retired_ts)| {
            let deletable = oldest.map(|t| t >= *retired_ts).unwrap_or(true);
            if deletable {
                if let Err(err) = fs::remove_file(path) {
                    warn!("could not unlink {:?}: {}", path, err);
                }
            }
            !deletable
        });
    }

    fn persist_partition_list(&self, state: &ManagerState) -> Result<()> {
        let metas: Vec<&PartitionMeta> = state.partitions.iter().map(|p| &p.meta).collect();
        let data = serde_json::to_string_pretty(&metas)?;
        fs::write(self.layout.list_path(), data)?;
        Ok(())
    }

    /// Commits a replacement partition set: immediately when no reader is
    /// pinned to the old one, staged for the next deregistration
    /// otherwise.
    fn commit_set(&self, new_set: Vec<ActivePartition>) {
        let commit_ts = self.current_timestamp.fetch_add(1, Ordering::SeqCst) + 1;
        let mut state = self.state.lock();
        state.staged = Some((new_set, commit_ts));
        self.try_install_staged(&mut state);
        self.reap_retired(&mut state);
    }

    /// The set a maintenance task must build upon: staged if present.
    fn base_set(&self) -> Vec<ActivePartition> {
        let state = self.state.lock();
        match &state.staged {
            Some((set, _)) => set.clone(),
            None => state.partitions.clone(),
        }
    }

    // ----- ingest -----

    pub fn add_posting(&self, term: &str, posting: Offset) -> Result<()> {
        self.check_writable()?;
        self.lexicon.write().add_posting(term, posting);
        if self.lexicon.read().memory_consumed() > self.config.max_update_space {
            self.reorganize()?;
        }
        Ok(())
    }

    pub fn add_postings(&self, term: &str, postings: &[Offset]) -> Result<()> {
        self.check_writable()?;
        {
            let mut lexicon = self.lexicon.write();
            for &posting in postings {
                lexicon.add_posting(term, posting);
            }
        }
        if self.lexicon.read().memory_consumed() > self.config.max_update_space {
            self.reorganize()?;
        }
        Ok(())
    }

    pub fn update_memory_used(&self) -> usize {
        self.lexicon.read().memory_consumed()
    }

    // ----- query path -----

    /// All fragments of one term (memory, partitions, in-place) combined
    /// into a single logical iterator.
    pub fn get_postings(&self, term: &str, from_disk: bool, from_memory: bool) -> Result<ExtentList> {
        let mut fragments: Vec<ExtentList> = Vec::new();

        if from_disk {
            let (handles, inplace) = {
                let state = self.state.lock();
                (
                    state
                        .partitions
                        .iter()
                        .map(|p| Arc::clone(&p.handle))
                        .collect::<Vec<_>>(),
                    self.inplace.clone(),
                )
            };
            for handle in handles {
                if let Some(segments) = handle.reader.term_segments(term)? {
                    fragments.push(ExtentList::Segmented(SegmentedPostingList::new(
                        segments,
                        handle.clone(),
                    )));
                }
            }
            if let Some(inplace) = inplace {
                let segments = inplace.lock().term_segments(term)?;
                if let Some(segments) = segments {
                    let fetch = Arc::new(InPlaceFetch {
                        inplace: Arc::clone(&inplace),
                        corrupt: Arc::clone(&self.corrupt),
                    });
                    fragments.push(ExtentList::Segmented(SegmentedPostingList::new(
                        segments, fetch,
                    )));
                }
            }
        }
        if from_memory {
            if let Some(postings) = self.lexicon.read().postings_for_term(term) {
                fragments.push(ExtentList::Postings(PostingList::new(postings)));
            }
        }

        Ok(combine_fragments(term, fragments))
    }

    /// Largest address seen by any partition or the in-memory buffer.
    pub fn biggest_offset(&self) -> Offset {
        let state = self.state.lock();
        state
            .partitions
            .iter()
            .map(|p| p.meta.last_posting)
            .max()
            .unwrap_or(0)
    }

    // ----- maintenance -----

    /// Memory-pressure response: flush and/or merge per the policy. Runs
    /// on the calling (ingest) thread except for pure merges with async
    /// maintenance enabled.
    pub fn reorganize(&self) -> Result<()> {
        self.check_writable()?;
        let include_lexicon_in_merge = self.lexicon.read().memory_consumed()
            > (self.config.max_update_space as f64 * 0.4) as usize;

        let metas: Vec<PartitionMeta> = self.base_set().iter().map(|p| p.meta.clone()).collect();
        let selection = select_partitions(
            self.config.merge_strategy,
            &metas,
            self.config.max_update_space,
        );

        if !selection.is_empty() && include_lexicon_in_merge {
            let ids: Vec<PartitionId> = selection.iter().map(|&i| metas[i].id).collect();
            return self.run_merge(&ids, false);
        }

        self.build_new_partition()?;
        let metas: Vec<PartitionMeta> = self.base_set().iter().map(|p| p.meta.clone()).collect();
        let selection = select_partitions(
            self.config.merge_strategy,
            &metas,
            self.config.max_update_space,
        );
        if selection.is_empty() {
            return Ok(());
        }
        let ids: Vec<PartitionId> = selection.iter().map(|&i| metas[i].id).collect();
        let on_the_fly_gc = self.should_gc_on_the_fly(&metas, &selection);
        if self.config.async_maintenance {
            if let Some((sender, _)) = &*self.worker.lock() {
                let _ = sender.send(MaintenanceTask::Merge {
                    ids,
                    filter: on_the_fly_gc,
                });
                return Ok(());
            }
        }
        self.run_merge(&ids, on_the_fly_gc)
    }

    fn should_gc_on_the_fly(&self, metas: &[PartitionMeta], selection: &[usize]) -> bool {
        if !self.config.garbage_collection_allowed() {
            return false;
        }
        let postings: u64 = selection.iter().map(|&i| metas[i].posting_count).sum();
        let deleted: u64 = selection
            .iter()
            .map(|&i| metas[i].deleted_posting_count)
            .sum();
        postings > 0
            && deleted as f64 / postings as f64 > self.config.on_the_fly_garbage_threshold
    }

    fn allocate_partition_id(&self) -> Result<PartitionId> {
        let mut state = self.state.lock();
        if state.partitions.len() >= MAX_INDEX_COUNT {
            return Err(Error::new(
                ErrorKind::TooManyPartitions,
                format!("partition budget of {} exhausted", MAX_INDEX_COUNT),
            ));
        }
        let id = state.next_partition_id;
        state.next_partition_id += 1;
        Ok(id)
    }

    /// Flushes the update lexicon into a brand-new partition. With the
    /// in-place index active this is a partial flush: long lists go to
    /// the in-place file, short lists stay buffered unless the last
    /// partial flush freed too little.
    pub fn build_new_partition(&self) -> Result<()> {
        self.check_writable()?;
        if self.lexicon.read().is_empty() {
            return Ok(());
        }

        let partial = self.inplace.is_some()
            && !self.state.lock().last_partial_flush_pointless;

        let id = self.allocate_partition_id()?;
        let path = self.layout.partition_path(id);
        let mut writer = PartitionWriter::create(&path, id, self.config.compression)?;
        let mut wrote_partition = false;

        {
            let lexicon = self.lexicon.read();
            for term_id in lexicon.sorted_term_ids() {
                let term = lexicon.term(term_id);
                let count = lexicon.term_posting_count(term_id);
                let long = count >= self.config.long_list_threshold;
                match (&self.inplace, long) {
                    (Some(inplace), true) => {
                        inplace
                            .lock()
                            .add_postings(term, &lexicon.postings(term_id))?;
                    }
                    _ if partial => {
                        // Partial flush keeps the short lists in memory.
                    }
                    _ => {
                        writer.add_list(term, &lexicon.postings(term_id))?;
                        wrote_partition = true;
                    }
                }
            }
        }

        if wrote_partition {
            let meta = writer.finish()?;
            let handle = Arc::new(PartitionHandle {
                reader: PartitionReader::open(&path, id)?,
                corrupt: Arc::clone(&self.corrupt),
            });
            let mut new_set = self.base_set();
            new_set.push(ActivePartition { meta, handle });
            self.commit_set(new_set);
        } else {
            drop(writer);
            let _ = fs::remove_file(&path);
        }

        // Trim the buffer and track whether the partial flush was worth
        // anything; a pointless one forces a full flush next time.
        let mut lexicon = self.lexicon.write();
        if partial {
            let freed = lexicon.clear_terms_above(self.config.long_list_threshold);
            self.state.lock().last_partial_flush_pointless = freed < 0.15;
        } else {
            lexicon.clear();
            self.state.lock().last_partial_flush_pointless = false;
        }
        info!("update buffer flushed into partition {}", id);
        Ok(())
    }

    /// Merges the given partitions (plus the update lexicon when asked)
    /// into one, optionally collecting garbage along the way.
    fn run_merge(&self, ids: &[PartitionId], with_filter: bool) -> Result<()> {
        self.check_writable()?;
        let base = self.base_set();
        let inputs: Vec<ActivePartition> = base
            .iter()
            .filter(|p| ids.contains(&p.meta.id))
            .cloned()
            .collect();
        if inputs.is_empty() {
            return Ok(());
        }

        // The lexicon joins the merge when its memory use is substantial.
        let memory_terms: Vec<(String, Vec<Offset>)> = {
            let lexicon = self.lexicon.read();
            if lexicon.memory_consumed()
                > (self.config.max_update_space as f64 * 0.4) as usize
            {
                lexicon
                    .sorted_term_ids()
                    .into_iter()
                    .map(|id| (lexicon.term(id).to_string(), lexicon.postings(id)))
                    .collect()
            } else {
                Vec::new()
            }
        };
        let lexicon_included = !memory_terms.is_empty();

        let deleted = self.state.lock().deleted.clone();
        let filter = if with_filter && !deleted.is_empty() {
            Some(&deleted)
        } else {
            None
        };

        let id = self.allocate_partition_id()?;
        let path = self.layout.partition_path(id);
        let mut writer = PartitionWriter::create(&path, id, self.config.compression)?;
        let readers: Vec<&PartitionReader> =
            inputs.iter().map(|p| &p.handle.reader).collect();

        let outcome = {
            let mut inplace_guard = self.inplace.as_ref().map(|i| i.lock());
            merge_partitions(
                &readers,
                memory_terms,
                &mut writer,
                inplace_guard.as_deref_mut(),
                MergeConfig {
                    filter,
                    long_list_threshold: self
                        .inplace
                        .as_ref()
                        .map(|_| self.config.long_list_threshold),
                },
            )?
        };
        let meta = writer.finish()?;

        let merged_away: Vec<PartitionId> = inputs.iter().map(|p| p.meta.id).collect();
        let mut new_set: Vec<ActivePartition> = base
            .into_iter()
            .filter(|p| !merged_away.contains(&p.meta.id))
            .collect();
        if meta.posting_count > 0 {
            let mut meta = meta;
            if filter.is_none() {
                // Garbage carried through an ordinary merge stays counted.
                meta.deleted_posting_count = inputs
                    .iter()
                    .map(|p| p.meta.deleted_posting_count)
                    .sum();
            }
            let handle = Arc::new(PartitionHandle {
                reader: PartitionReader::open(&path, id)?,
                corrupt: Arc::clone(&self.corrupt),
            });
            new_set.push(ActivePartition { meta, handle });
        } else {
            let _ = fs::remove_file(&path);
        }

        // Keep the in-place bitmasks consistent with the swap: the merged
        // partitions are gone, the surviving fragments (if any) live in
        // the new partition.
        if let Some(inplace) = &self.inplace {
            let mut inplace = inplace.lock();
            for term in &outcome.diverted_terms {
                for &old in &merged_away {
                    inplace.set_partition_bit(term, old, false);
                }
            }
        }

        // Merged-away partitions that never made it into the active set
        // (created and consumed while staged) were never visible to any
        // reader; their files can go at once.
        let never_active: Vec<PartitionId> = {
            let state = self.state.lock();
            merged_away
                .iter()
                .copied()
                .filter(|id| !state.partitions.iter().any(|p| p.meta.id == *id))
                .collect()
        };
        self.commit_set(new_set);
        for id in never_active {
            let _ = fs::remove_file(self.layout.partition_path(id));
        }
        if lexicon_included {
            self.lexicon.write().clear();
        }
        Ok(())
    }

    // ----- garbage collection -----

    /// Records a deleted address range and re-estimates per-partition
    /// garbage. Ratios are proportional to address-space overlap; exact
    /// counts would need a scan.
    pub fn notify_address_range_deleted(&self, start: Offset, end: Offset) -> Result<()> {
        self.check_writable()?;
        if self.config.append_in_place {
            return Err(Error::new(
                ErrorKind::Config,
                "deletions are not supported in append-in-place mode".to_string(),
            ));
        }
        let should_gc = {
            let mut state = self.state.lock();
            state.deleted.add(start, end);
            let deleted = state.deleted.clone();
            for partition in &mut state.partitions {
                let meta = &mut partition.meta;
                let span = meta.last_posting - meta.first_posting + 1;
                let overlap = deleted.overlap(meta.first_posting, meta.last_posting);
                meta.deleted_posting_count =
                    (meta.posting_count as f64 * overlap as f64 / span as f64) as u64;
            }
            let total: u64 = state.partitions.iter().map(|p| p.meta.posting_count).sum();
            let dead: u64 = state
                .partitions
                .iter()
                .map(|p| p.meta.deleted_posting_count)
                .sum();
            total > 0
                && dead > MIN_GARBAGE_COLLECTION_SIZE
                && dead as f64 / total as f64 > self.config.garbage_threshold
        };
        if should_gc {
            if self.config.async_maintenance {
                if let Some((sender, _)) = &*self.worker.lock() {
                    let _ = sender.send(MaintenanceTask::GarbageCollect);
                    return Ok(());
                }
            }
            return self.run_gc();
        }
        Ok(())
    }

    /// Full garbage collection: merge everything with the deletion
    /// filter, then forget the collected ranges.
    pub fn run_gc(&self) -> Result<()> {
        self.check_writable()?;
        if !self.config.garbage_collection_allowed() {
            return Err(Error::new(
                ErrorKind::Config,
                "garbage collection is disabled in append-in-place mode".to_string(),
            ));
        }
        self.build_new_partition()?;
        let ids: Vec<PartitionId> = self.base_set().iter().map(|p| p.meta.id).collect();
        if ids.is_empty() {
            return Ok(());
        }
        self.run_merge(&ids, true)?;
        self.state.lock().deleted.clear();
        info!("garbage collection finished");
        Ok(())
    }

    pub fn garbage_ratio(&self) -> f64 {
        let state = self.state.lock();
        let total: u64 = state.partitions.iter().map(|p| p.meta.posting_count).sum();
        let dead: u64 = state
            .partitions
            .iter()
            .map(|p| p.meta.deleted_posting_count)
            .sum();
        if total == 0 {
            0.0
        } else {
            dead as f64 / total as f64
        }
    }

    // ----- statistics / shutdown -----

    pub fn partition_count(&self) -> usize {
        self.state.lock().partitions.len()
    }

    pub fn posting_count(&self) -> u64 {
        let on_disk: u64 = {
            let state = self.state.lock();
            state.partitions.iter().map(|p| p.meta.posting_count).sum()
        };
        on_disk + self.lexicon.read().posting_count()
    }

    pub fn deleted_posting_count(&self) -> u64 {
        let state = self.state.lock();
        state
            .partitions
            .iter()
            .map(|p| p.meta.deleted_posting_count)
            .sum()
    }

    /// Flushes all buffered state and rewrites the partition list.
    pub fn sync(&self) -> Result<()> {
        self.check_writable()?;
        self.build_new_partition()?;
        if let Some(inplace) = &self.inplace {
            inplace.lock().close()?;
        }
        let state = self.state.lock();
        self.persist_partition_list(&state)
    }

    /// Shutdown: refuse new readers, run the exit merge, persist
    /// everything. Readers already registered keep their snapshots.
    pub fn shutdown(&self) -> Result<()> {
        if self.shutdown.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.reader_gate.notify_all();
        if let Some((sender, handle)) = self.worker.lock().take() {
            drop(sender);
            let _ = handle.join();
        }
        if self.config.read_only || self.is_corrupt() {
            return Ok(());
        }
        self.in_teardown.store(true, Ordering::SeqCst);
        let result = (|| -> Result<()> {
            self.build_new_partition()?;
            let strategy = if self.config.merge_at_exit {
                MergeStrategy::Immediate
            } else {
                MergeStrategy::SmallMerge
            };
            let metas: Vec<PartitionMeta> =
                self.base_set().iter().map(|p| p.meta.clone()).collect();
            let selection =
                select_partitions(strategy, &metas, self.config.max_update_space);
            if !selection.is_empty() {
                let ids: Vec<PartitionId> =
                    selection.iter().map(|&i| metas[i].id).collect();
                self.run_merge(&ids, false)?;
            }
            if let Some(inplace) = &self.inplace {
                inplace.lock().close()?;
            }
            let state = self.state.lock();
            self.persist_partition_list(&state)
        })();
        self.in_teardown.store(false, Ordering::SeqCst);
        result
    }
}

/// One logical iterator over a term's fragments: the ordered combination
/// when address ranges are disjoint, a general OR otherwise, and a
/// TF-merging materialization for document-level lists.
fn combine_fragments(term: &str, mut fragments: Vec<ExtentList>) -> ExtentList {
    match fragments.len() {
        0 => ExtentList::Empty,
        1 => fragments.pop().unwrap(),
        _ => {
            if term.starts_with(DOC_LEVEL_PREFIX) {
                let lists: Vec<Vec<Offset>> = fragments
                    .iter_mut()
                    .map(|f| {
                        f.all_extents().into_iter().map(|e| e.start).collect::<Vec<_>>()
                    })
                    .collect();
                let merged = merge_document_level_lists(lists);
                return ExtentList::Postings(PostingList::new(merged));
            }
            let mut ranged: Vec<(Offset, Offset, ExtentList)> = Vec::new();
            for mut fragment in fragments {
                let first = fragment.first_start_at_least(0).map(|e| e.start);
                let last = fragment.last_end_at_most(crate::core::types::MAX_OFFSET);
                match (first, last) {
                    (Some(first), Some(last)) => ranged.push((first, last.end, fragment)),
                    _ => continue,
                }
            }
            ranged.sort_by_key(|&(first, _, _)| first);
            let disjoint = ranged
                .windows(2)
                .all(|w| w[0].1 < w[1].0);
            if disjoint {
                ExtentList::OrderedCombination(OrderedCombinationList {
                    ranges: ranged.iter().map(|&(f, l, _)| (f, l)).collect(),
                    children: ranged.into_iter().map(|(_, _, c)| c).collect(),
                })
            } else {
                ExtentList::Or(OrList {
                    children: ranged.into_iter().map(|(_, _, c)| c).collect(),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn manager_with(
        dir: &TempDir,
        strategy: MergeStrategy,
        long_list_threshold: u64,
    ) -> Arc<IndexManager> {
        let config = IndexConfig {
            directory: dir.path().to_path_buf(),
            merge_strategy: strategy,
            long_list_threshold,
            ..IndexConfig::default()
        };
        let layout = IndexLayout::new(dir.path()).unwrap();
        IndexManager::new(config, layout).unwrap()
    }

    fn starts(list: &mut ExtentList) -> Vec<Offset> {
        list.all_extents().iter().map(|e| e.start).collect()
    }

    #[test]
    fn test_register_timestamps_advance() {
        let dir = TempDir::new().unwrap();
        let manager = manager_with(&dir, MergeStrategy::NoMerge, u64::MAX);
        let a = manager.register(0).unwrap();
        let b = manager.register(0).unwrap();
        assert!(b > a);
        // A suggested timestamp ahead of the clock is honored.
        let c = manager.register(b + 10).unwrap();
        assert_eq!(c, b + 10);
        manager.deregister(a);
        manager.deregister(b);
        manager.deregister(c);
        assert_eq!(manager.reader_count(), 0);
    }

    #[test]
    fn test_register_refused_during_shutdown() {
        let dir = TempDir::new().unwrap();
        let manager = manager_with(&dir, MergeStrategy::NoMerge, u64::MAX);
        manager.shutdown().unwrap();
        let err = manager.register(0).unwrap_err();
        assert_eq!(err.kind, ErrorKind::ShuttingDown);
    }

    #[test]
    fn test_memory_and_disk_fragments_combine() {
        let dir = TempDir::new().unwrap();
        let manager = manager_with(&dir, MergeStrategy::NoMerge, u64::MAX);
        manager.add_postings("term", &[1, 5]).unwrap();
        manager.build_new_partition().unwrap();
        manager.add_postings("term", &[9, 12]).unwrap();

        let mut list = manager.get_postings("term", true, true).unwrap();
        assert_eq!(starts(&mut list), vec![1, 5, 9, 12]);

        // Disk-only and memory-only views stay separable.
        let mut disk = manager.get_postings("term", true, false).unwrap();
        assert_eq!(starts(&mut disk), vec![1, 5]);
        let mut memory = manager.get_postings("term", false, true).unwrap();
        assert_eq!(starts(&mut memory), vec![9, 12]);
    }

    #[test]
    fn test_staged_set_waits_for_old_readers() {
        let dir = TempDir::new().unwrap();
        let manager = manager_with(&dir, MergeStrategy::Immediate, u64::MAX);
        manager.add_postings("a", &[1]).unwrap();
        manager.build_new_partition().unwrap();
        assert_eq!(manager.partition_count(), 1);

        let reader = manager.register(0).unwrap();
        manager.add_postings("a", &[2]).unwrap();
        manager.reorganize().unwrap();
        // The merged set is staged, not active: the reader still pins v1.
        assert_eq!(manager.partition_count(), 1);
        manager.deregister(reader);
        assert_eq!(manager.partition_count(), 1);
        let mut list = manager.get_postings("a", true, false).unwrap();
        assert_eq!(starts(&mut list), vec![1, 2]);
    }

    #[test]
    fn test_logarithmic_reorganize_bounds_partition_count() {
        let dir = TempDir::new().unwrap();
        let manager = manager_with(&dir, MergeStrategy::Logarithmic, u64::MAX);
        for round in 0..6u64 {
            let postings: Vec<Offset> = (0..100).map(|i| round * 1000 + i + 1).collect();
            manager.add_postings("steady", &postings).unwrap();
            manager.reorganize().unwrap();
        }
        // Similar-sized flushes keep collapsing into one partition.
        assert!(manager.partition_count() <= 2);
        let mut list = manager.get_postings("steady", true, true).unwrap();
        assert_eq!(list.len(), 600);
    }

    #[test]
    fn test_inplace_strategy_diverts_long_lists() {
        let dir = TempDir::new().unwrap();
        let manager = manager_with(&dir, MergeStrategy::InPlace, 500);
        let long: Vec<Offset> = (1..=2000u64).collect();
        manager.add_postings("verbose", &long).unwrap();
        manager.add_postings("quiet", &[3000]).unwrap();
        manager.build_new_partition().unwrap();

        // The long list lives in index.long, the short one stays
        // buffered by the partial flush.
        let inplace = manager.inplace.as_ref().unwrap();
        assert!(inplace.lock().has_term("verbose"));
        assert_eq!(inplace.lock().posting_count("verbose"), 2000);
        assert_eq!(manager.partition_count(), 0);

        let mut list = manager.get_postings("verbose", true, true).unwrap();
        assert_eq!(list.len(), 2000);
        let mut quiet = manager.get_postings("quiet", false, true).unwrap();
        assert_eq!(starts(&mut quiet), vec![3000]);
    }

    #[test]
    fn test_on_the_fly_gc_threshold() {
        let dir = TempDir::new().unwrap();
        let manager = manager_with(&dir, MergeStrategy::Immediate, u64::MAX);
        let metas = vec![
            PartitionMeta {
                id: 0,
                first_posting: 1,
                last_posting: 100,
                posting_count: 100,
                deleted_posting_count: 30,
                term_count: 5,
                size_bytes: 1000,
                created_at: chrono::Utc::now(),
            },
            PartitionMeta {
                id: 1,
                first_posting: 101,
                last_posting: 200,
                posting_count: 100,
                deleted_posting_count: 0,
                term_count: 5,
                size_bytes: 1000,
                created_at: chrono::Utc::now(),
            },
        ];
        // 30 deleted of 200 postings: below the 0.25 default.
        assert!(!manager.should_gc_on_the_fly(&metas, &[0, 1]));
        // Restricted to the dirty partition alone it crosses it.
        assert!(manager.should_gc_on_the_fly(&metas, &[0]));
    }

    #[test]
    fn test_address_space_accounting() {
        let dir = TempDir::new().unwrap();
        let manager = manager_with(&dir, MergeStrategy::NoMerge, u64::MAX);
        manager.add_postings("a", &[1, 2, 3]).unwrap();
        manager.build_new_partition().unwrap();
        manager.add_postings("b", &[4, 5]).unwrap();
        assert_eq!(manager.posting_count(), 5);
        manager.build_new_partition().unwrap();
        assert_eq!(manager.posting_count(), 5);
        assert!(manager.deleted_posting_count() <= manager.posting_count());
    }
}
