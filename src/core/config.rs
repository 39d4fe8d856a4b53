use std::path::PathBuf;

use crate::compression::codec::CodecId;
use crate::core::error::{Error, ErrorKind, Result};
use crate::manager::merge_policy::MergeStrategy;

/// Per-index configuration. Everything here is captured into the on-disk
/// header when the index is created; no process-wide mutable state.
#[derive(Debug, Clone)]
pub struct IndexConfig {
    pub directory: PathBuf,

    /// 0 = no stemming, 1 = index stemmed variants alongside the originals,
    /// 2 = stem everything at indexing time.
    pub stemming_level: u32,
    /// Synthesize one "<!>term" posting per (term, document) pair.
    pub document_level: bool,
    /// Synthesize "a_b" terms for adjacent token pairs.
    pub bigram_indexing: bool,
    /// Codec applied to on-disk posting segments.
    pub compression: CodecId,

    /// Memory budget for the in-memory update index before a flush is forced.
    pub max_update_space: usize,
    pub merge_strategy: MergeStrategy,
    /// Run merge/GC tasks on a detached background thread.
    pub async_maintenance: bool,
    /// Merge everything down on shutdown instead of a small-merge.
    pub merge_at_exit: bool,

    /// Aggregate deleted/total ratio that triggers a dedicated GC run.
    pub garbage_threshold: f64,
    /// Input-partition ratio above which a merge collects garbage on the fly.
    pub on_the_fly_garbage_threshold: f64,

    /// Posting count above which a list is routed into the in-place index.
    pub long_list_threshold: u64,
    /// Append to in-place block runs at indexing time instead of relocating.
    /// Incompatible with garbage collection.
    pub append_in_place: bool,

    pub max_user_count: usize,
    pub read_only: bool,
}

impl Default for IndexConfig {
    fn default() -> Self {
        IndexConfig {
            directory: PathBuf::from("./index"),
            stemming_level: 0,
            document_level: false,
            bigram_indexing: false,
            compression: CodecId::VByte,
            max_update_space: 40 * 1024 * 1024,
            merge_strategy: MergeStrategy::Logarithmic,
            async_maintenance: false,
            merge_at_exit: false,
            garbage_threshold: 0.40,
            on_the_fly_garbage_threshold: 0.25,
            long_list_threshold: 2_000_000,
            append_in_place: false,
            max_user_count: MAX_USER_COUNT,
            read_only: false,
        }
    }
}

/// Maximum number of on-disk partitions per index.
pub const MAX_INDEX_COUNT: usize = 1000;

/// Maximum number of concurrently registered readers.
pub const MAX_USER_COUNT: usize = 16;

/// Aggregate deleted-posting count below which GC never triggers.
pub const MIN_GARBAGE_COLLECTION_SIZE: u64 = 16384;

impl IndexConfig {
    /// Rejects parameter combinations the engine cannot honor.
    pub fn validate(&self) -> Result<()> {
        if self.stemming_level > 2 {
            return Err(Error::new(
                ErrorKind::Config,
                format!("stemming level {} out of range", self.stemming_level),
            ));
        }
        if self.max_update_space < 1024 * 1024 {
            return Err(Error::new(
                ErrorKind::Config,
                "update buffer must be at least 1 MiB".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.garbage_threshold)
            || !(0.0..=1.0).contains(&self.on_the_fly_garbage_threshold)
        {
            return Err(Error::new(
                ErrorKind::Config,
                "garbage thresholds must lie in [0, 1]".to_string(),
            ));
        }
        if self.max_user_count == 0 || self.max_user_count > MAX_USER_COUNT {
            return Err(Error::new(
                ErrorKind::Config,
                format!("user count must lie in [1, {}]", MAX_USER_COUNT),
            ));
        }
        if self.long_list_threshold == 0 {
            return Err(Error::new(
                ErrorKind::Config,
                "long-list threshold must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Garbage collection rewrites the address space, which append-in-place
    /// mode cannot survive. The two are mutually exclusive.
    pub fn garbage_collection_allowed(&self) -> bool {
        !self.append_in_place
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(IndexConfig::default().validate().is_ok());
    }

    #[test]
    fn test_rejects_bad_parameters() {
        let mut config = IndexConfig::default();
        config.stemming_level = 7;
        assert_eq!(config.validate().unwrap_err().kind, ErrorKind::Config);

        let mut config = IndexConfig::default();
        config.garbage_threshold = 1.5;
        assert!(config.validate().is_err());

        let mut config = IndexConfig::default();
        config.max_user_count = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_append_mode_disables_gc() {
        let mut config = IndexConfig::default();
        assert!(config.garbage_collection_allowed());
        config.append_in_place = true;
        assert!(!config.garbage_collection_allowed());
    }
}
