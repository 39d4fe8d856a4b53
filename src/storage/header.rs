use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::compression::codec::CodecId;
use crate::core::config::IndexConfig;
use crate::core::error::Result;
use crate::core::types::Offset;

/// The "index" file: the key-value header capturing the per-index
/// configuration plus the consistency flag. The flag is cleared on the
/// first mutation after open and re-set only by an explicit sync or a
/// clean shutdown; finding it cleared at open means a crash.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexHeader {
    pub stemming_level: u32,
    pub document_level: bool,
    pub bigram_indexing: bool,
    pub compression: CodecId,
    /// Monotone count of update batches applied to this index.
    pub updates_applied: u64,
    /// Highest address handed out so far.
    pub used_address_space: Offset,
    pub deleted_address_space: u64,
    pub consistent: bool,
}

impl IndexHeader {
    pub fn from_config(config: &IndexConfig) -> Self {
        IndexHeader {
            stemming_level: config.stemming_level,
            document_level: config.document_level,
            bigram_indexing: config.bigram_indexing,
            compression: config.compression,
            updates_applied: 0,
            used_address_space: 0,
            deleted_address_space: 0,
            consistent: true,
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let data = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&data)?)
    }

    pub fn store(&self, path: &Path) -> Result<()> {
        let data = serde_json::to_string_pretty(self)?;
        fs::write(path, data)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_header_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("index");
        let mut header = IndexHeader::from_config(&IndexConfig::default());
        header.used_address_space = 42;
        header.consistent = false;
        header.store(&path).unwrap();

        let back = IndexHeader::load(&path).unwrap();
        assert_eq!(back.used_address_space, 42);
        assert!(!back.consistent);
        assert_eq!(back.compression, CodecId::VByte);
    }
}
