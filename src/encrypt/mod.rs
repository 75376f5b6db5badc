//! Self-encryption stream: chunked, convergently encrypted file content with a
//! usage-capped local cache.

pub mod chunk_cache;
pub mod data_map;
pub mod self_encryptor;

pub use chunk_cache::{ChunkCache, DiskUsage, MemoryUsage};
pub use data_map::{ChunkRef, DataMap, EncryptedChunk};
pub use self_encryptor::{Finalized, RetrievalFn, SelfEncryptor, DEFAULT_CHUNK_SIZE};

use thiserror::Error;

use crate::crypto::aes::AesError;
use crate::storage::StorageError;

#[derive(Debug, Error)]
pub enum EncryptError {
    #[error("Local cache capacity exceeded: requested {requested} bytes, {available} available")]
    CapacityExceeded { requested: u64, available: u64 },
    #[error("Offset {offset} plus {len} bytes exceeds the maximum stream size")]
    OutOfRange { offset: u64, len: u64 },
    #[error("Chunk retrieval failed")]
    Retrieval(#[from] StorageError),
    #[error("Chunk {0} does not match its content name")]
    CorruptChunk(String),
    #[error("Chunk cryptography failed")]
    Crypto(#[from] AesError),
    #[error("Cache I/O failed")]
    Io(#[from] std::io::Error),
}
