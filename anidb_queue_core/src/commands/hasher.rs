//! File hashing collaborator used by `HashFile`

use crate::error::{IoError, IoTarget, Result};
use async_trait::async_trait;
use md4::{Digest, Md4};
use serde::{Deserialize, Serialize};
use std::io::Read;
use std::path::{Path, PathBuf};

/// Size and ED2K hash of a file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileHash {
    pub size: u64,
    pub ed2k: String,
}

#[async_trait]
pub trait FileHasher: Send + Sync {
    async fn hash(&self, path: &Path) -> Result<FileHash>;
}

/// ED2K over 9 500 KiB MD4 blocks
#[derive(Debug, Clone, Copy, Default)]
pub struct Ed2kHasher;

impl Ed2kHasher {
    pub const CHUNK_SIZE: usize = 9_728_000;

    /// Hash an in-memory buffer
    pub fn hash_bytes(data: &[u8]) -> String {
        let mut state = Ed2kState::default();
        state.update(data);
        state.finish()
    }

    fn hash_file(path: PathBuf) -> Result<FileHash> {
        let mut file = std::fs::File::open(&path).map_err(|e| IoError::from_std(e).at(IoTarget::MediaFile, &path))?;
        let mut state = Ed2kState::default();
        let mut buffer = vec![0u8; 1024 * 1024];

        loop {
            let read = file
                .read(&mut buffer)
                .map_err(|e| IoError::from_std(e).at(IoTarget::MediaFile, &path))?;
            if read == 0 {
                break;
            }
            state.update(&buffer[..read]);
        }

        Ok(FileHash {
            size: state.total as u64,
            ed2k: state.finish(),
        })
    }
}

#[async_trait]
impl FileHasher for Ed2kHasher {
    async fn hash(&self, path: &Path) -> Result<FileHash> {
        let path = path.to_path_buf();
        tokio::task::spawn_blocking(move || Self::hash_file(path))
            .await
            .map_err(|e| crate::error::InternalError::assertion(format!("hash task failed: {e}")))?
    }
}

#[derive(Default)]
struct Ed2kState {
    chunk: Md4,
    chunk_len: usize,
    chunk_hashes: Vec<u8>,
    total: usize,
}

impl Ed2kState {
    fn update(&mut self, mut data: &[u8]) {
        self.total += data.len();
        while !data.is_empty() {
            let take = data.len().min(Ed2kHasher::CHUNK_SIZE - self.chunk_len);
            self.chunk.update(&data[..take]);
            self.chunk_len += take;
            data = &data[take..];

            if self.chunk_len == Ed2kHasher::CHUNK_SIZE {
                let digest = std::mem::take(&mut self.chunk).finalize();
                self.chunk_hashes.extend_from_slice(&digest);
                self.chunk_len = 0;
            }
        }
    }

    fn finish(mut self) -> String {
        // Below one block the hash is the plain MD4 of the data
        if self.total < Ed2kHasher::CHUNK_SIZE {
            return format!("{:x}", self.chunk.finalize());
        }
        // Exactly one block: the block hash itself
        if self.total == Ed2kHasher::CHUNK_SIZE {
            return self.chunk_hashes.iter().map(|b| format!("{b:02x}")).collect();
        }

        // A trailing partial block, or an empty one for exact multiples
        let tail = self.chunk.finalize();
        self.chunk_hashes.extend_from_slice(&tail);
        format!("{:x}", Md4::digest(&self.chunk_hashes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::io::Write;

    #[test]
    fn test_small_inputs_are_plain_md4() {
        assert_eq!(
            Ed2kHasher::hash_bytes(b""),
            "31d6cfe0d16ae931b73c59d7e0c089c0"
        );
        assert_eq!(
            Ed2kHasher::hash_bytes(b"abc"),
            "a448017aaf21d8525fc10ae87aa6729d"
        );
    }

    #[test]
    fn test_exactly_one_block_is_block_hash() {
        let data = vec![0u8; Ed2kHasher::CHUNK_SIZE];
        let expected = format!("{:x}", Md4::digest(&data));
        assert_eq!(Ed2kHasher::hash_bytes(&data), expected);
    }

    #[test]
    fn test_multi_block_hashes_block_digests() {
        let data = vec![7u8; Ed2kHasher::CHUNK_SIZE + 10];
        let mut digests = Md4::digest(&data[..Ed2kHasher::CHUNK_SIZE]).to_vec();
        digests.extend_from_slice(&Md4::digest(&data[Ed2kHasher::CHUNK_SIZE..]));
        let expected = format!("{:x}", Md4::digest(&digests));
        assert_eq!(Ed2kHasher::hash_bytes(&data), expected);
    }

    #[tokio::test]
    async fn test_hash_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"abc").unwrap();

        let hash = Ed2kHasher.hash(file.path()).await.unwrap();
        assert_eq!(hash.size, 3);
        assert_eq!(hash.ed2k, "a448017aaf21d8525fc10ae87aa6729d");
    }

    #[tokio::test]
    async fn test_missing_file_is_io_error() {
        let result = Ed2kHasher.hash(Path::new("/no/such/episode.mkv")).await;
        match result {
            Err(crate::Error::Io(error)) => {
                assert_eq!(error.target, Some(IoTarget::MediaFile));
                assert!(error.is_permanent());
                assert!(error.to_string().starts_with("Cannot hash /no/such/episode.mkv"));
            }
            other => panic!("expected an I/O error, got {other:?}"),
        }
    }

    proptest! {
        #[test]
        fn test_hash_bytes_is_deterministic_hex(data: Vec<u8>) {
            let first = Ed2kHasher::hash_bytes(&data);
            prop_assert_eq!(first.len(), 32);
            prop_assert!(first.chars().all(|c| c.is_ascii_hexdigit()));
            prop_assert_eq!(first, Ed2kHasher::hash_bytes(&data));
        }
    }
}
