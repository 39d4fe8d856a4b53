use std::fs;
use std::path::{Path, PathBuf};

use crate::core::error::Result;
use crate::storage::partition::PartitionId;

/// File naming inside an index directory: "index" (header), "index.NNN"
/// (partitions), "index.list" (active set), "index.long" (in-place index).
#[derive(Debug, Clone)]
pub struct IndexLayout {
    pub directory: PathBuf,
}

impl IndexLayout {
    pub fn new(directory: &Path) -> Result<Self> {
        fs::create_dir_all(directory)?;
        Ok(IndexLayout {
            directory: directory.to_path_buf(),
        })
    }

    pub fn header_path(&self) -> PathBuf {
        self.directory.join("index")
    }

    pub fn partition_path(&self, id: PartitionId) -> PathBuf {
        self.directory.join(format!("index.{:03}", id))
    }

    pub fn list_path(&self) -> PathBuf {
        self.directory.join("index.list")
    }

    pub fn long_list_path(&self) -> PathBuf {
        self.directory.join("index.long")
    }

    /// Crash recovery is by rebuild: wipe every file the engine owns and
    /// start over.
    pub fn remove_all_index_files(&self) -> Result<()> {
        for entry in fs::read_dir(&self.directory)? {
            let entry = entry?;
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if name == "index" || name == "index.list" || name == "index.long" {
                fs::remove_file(entry.path())?;
            } else if name.starts_with("index.")
                && name[6..].chars().all(|c| c.is_ascii_digit())
            {
                fs::remove_file(entry.path())?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_paths() {
        let dir = TempDir::new().unwrap();
        let layout = IndexLayout::new(dir.path()).unwrap();
        assert!(layout.partition_path(7).ends_with("index.007"));
        assert!(layout.header_path().ends_with("index"));
    }

    #[test]
    fn test_remove_all_index_files() {
        let dir = TempDir::new().unwrap();
        let layout = IndexLayout::new(dir.path()).unwrap();
        fs::write(layout.header_path(), b"h").unwrap();
        fs::write(layout.partition_path(3), b"p").unwrap();
        fs::write(dir.path().join("unrelated.txt"), b"keep").unwrap();
        layout.remove_all_index_files().unwrap();
        assert!(!layout.header_path().exists());
        assert!(!layout.partition_path(3).exists());
        assert!(dir.path().join("unrelated.txt").exists());
    }
}
