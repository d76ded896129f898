//! File hasher double

use anidb_queue_core::Result;
use anidb_queue_core::commands::{FileHash, FileHasher};
use anidb_queue_core::error::IoError;
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Returns preset hashes; unknown paths fail with file-not-found
#[derive(Default)]
pub struct MockFileHasher {
    hashes: Mutex<HashMap<PathBuf, FileHash>>,
    calls: Mutex<Vec<PathBuf>>,
}

impl MockFileHasher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_file(self, path: impl Into<PathBuf>, size: u64, ed2k: &str) -> Self {
        self.hashes.lock().unwrap().insert(
            path.into(),
            FileHash {
                size,
                ed2k: ed2k.to_string(),
            },
        );
        self
    }

    pub fn calls(&self) -> Vec<PathBuf> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl FileHasher for MockFileHasher {
    async fn hash(&self, path: &Path) -> Result<FileHash> {
        self.calls.lock().unwrap().push(path.to_path_buf());
        self.hashes
            .lock()
            .unwrap()
            .get(path)
            .cloned()
            .ok_or_else(|| IoError::media_not_found(path).into())
    }
}
