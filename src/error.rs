//! Caller-facing error taxonomy.

use thiserror::Error;

use crate::directory::DirectoryError;
use crate::encrypt::EncryptError;
use crate::storage::StorageError;

#[derive(Debug, Error)]
pub enum DriveError {
    #[error("File session is not open")]
    NotOpen,
    #[error("File session is already open")]
    AlreadyOpen,
    #[error("File session is not attached to a task queue")]
    NotAttached,
    #[error("{0} is a directory")]
    IsDirectory(String),
    #[error("{0} has no parent directory to persist into")]
    NoParent(String),
    #[error("Local cache capacity exceeded: requested {requested} bytes, {available} available")]
    CapacityExceeded { requested: u64, available: u64 },
    #[error("Self-encryption failed")]
    Encrypt(#[source] EncryptError),
    #[error("Storage operation failed")]
    Storage(#[from] StorageError),
    #[error("Directory operation failed")]
    Directory(#[from] DirectoryError),
}

impl From<EncryptError> for DriveError {
    fn from(e: EncryptError) -> Self {
        match e {
            EncryptError::CapacityExceeded {
                requested,
                available,
            } => DriveError::CapacityExceeded {
                requested,
                available,
            },
            other => DriveError::Encrypt(other),
        }
    }
}
