//! Encrypted virtual-drive storage engine.
//!
//! File sessions ([`File`]) buffer reads and writes through a self-encryption
//! stream, cap local caching by memory and disk usage, and persist changes in
//! the background after a period of inactivity. Persistence goes through a
//! [`Storage`] strategy: a direct key-value store or a callback-driven
//! distributed client. Directory listings are sealed and stored the same way.

pub mod config;
pub mod crypto;
pub mod directory;
pub mod drive;
pub mod encrypt;
pub mod error;
pub mod storage;
pub mod sync;

pub use config::{DriveConfig, SessionSettings};
pub use directory::{DirectoryError, DirectoryListing, DirectoryListingHandler, MoveStep};
pub use drive::{
    DirectoryId, File, FileContext, FileType, FlushTarget, Lineage, MetaData, SessionState,
};
pub use encrypt::{DataMap, DiskUsage, MemoryUsage, RetrievalFn, SelfEncryptor};
pub use error::DriveError;
pub use storage::{
    Completion, DirectStorage, DistributedClient, KeyValueStore, NotifyingStorage, Storage,
    StorageError,
};
pub use sync::TaskQueue;
