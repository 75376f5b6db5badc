//! Storage adapter: one capability, two call conventions.
//!
//! Directory persistence and the flush path are written once against
//! [`Storage`]. Which mechanism backs a call is fixed when the adapter is
//! constructed:
//!
//! - [`DirectStorage`] wraps a synchronous [`KeyValueStore`] and answers every
//!   call with an already-resolved [`Completion::Ready`].
//! - [`NotifyingStorage`] wraps a callback-based [`DistributedClient`], submits
//!   the request addressed by the owner's public-key identity, and hands back a
//!   [`Completion::Pending`] that the callback resolves later.
//!
//! Callers that need the result call [`Completion::wait`]; fire-and-forget
//! callers drop the completion.

pub mod direct;
pub mod local;
pub mod loopback;
pub mod memory;
pub mod notify;

pub use direct::{DirectStorage, KeyValueStore};
pub use local::LocalDiskStore;
pub use loopback::LoopbackNetwork;
pub use memory::MemoryStore;
pub use notify::{Authorization, DistributedClient, NotifyingStorage, ResponseFn};

use std::sync::mpsc;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Entry not found: {0}")]
    NotFound(String),
    #[error("Storage backend failed: {0}")]
    Backend(String),
    #[error("Request for {0} was not authorized by its owner")]
    Unauthorized(String),
    #[error("Completion channel closed before a result was delivered")]
    Disconnected,
    #[error("Timed out waiting for storage completion")]
    TimedOut,
    #[error("Storage I/O failed")]
    Io(#[from] std::io::Error),
}

/// Result of a storage call, either already known or delivered later.
#[derive(Debug)]
pub enum Completion<T> {
    /// Synchronous backends resolve before returning.
    Ready(Result<T, StorageError>),
    /// Asynchronous backends resolve through this channel.
    Pending(mpsc::Receiver<Result<T, StorageError>>),
}

impl<T> Completion<T> {
    /// Create a pending completion and the sender that resolves it.
    pub fn channel() -> (mpsc::Sender<Result<T, StorageError>>, Self) {
        let (tx, rx) = mpsc::channel();
        (tx, Completion::Pending(rx))
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, Completion::Ready(_))
    }

    /// Block the calling thread until the result is available.
    ///
    /// Must not be called from inside an async task on a current-thread
    /// runtime whose progress is needed to resolve the completion.
    pub fn wait(self) -> Result<T, StorageError> {
        match self {
            Completion::Ready(result) => result,
            Completion::Pending(rx) => rx.recv().map_err(|_| StorageError::Disconnected)?,
        }
    }

    /// `wait_timeout` when a bound is given, `wait` otherwise.
    pub fn wait_for(self, timeout: Option<Duration>) -> Result<T, StorageError> {
        match timeout {
            Some(timeout) => self.wait_timeout(timeout),
            None => self.wait(),
        }
    }

    /// Like `wait`, bounded by `timeout`.
    pub fn wait_timeout(self, timeout: Duration) -> Result<T, StorageError> {
        match self {
            Completion::Ready(result) => result,
            Completion::Pending(rx) => match rx.recv_timeout(timeout) {
                Ok(result) => result,
                Err(mpsc::RecvTimeoutError::Timeout) => Err(StorageError::TimedOut),
                Err(mpsc::RecvTimeoutError::Disconnected) => Err(StorageError::Disconnected),
            },
        }
    }
}

/// The storage capability consumed by directory persistence and flushes.
///
/// Names are content names (or listing names) chosen by the engine.
pub trait Storage: Send + Sync {
    fn put(&self, name: &str, bytes: Vec<u8>) -> Completion<()>;

    fn get(&self, name: &str) -> Completion<Vec<u8>>;

    fn delete(&self, name: &str) -> Completion<()>;
}

/// Wait for every completion, returning the first error after all settled.
///
/// `timeout` bounds each wait separately.
pub fn wait_all<I>(completions: I, timeout: Option<Duration>) -> Result<(), StorageError>
where
    I: IntoIterator<Item = Completion<()>>,
{
    let mut first_error = None;
    for completion in completions {
        if let Err(e) = completion.wait_for(timeout) {
            log::warn!("Storage completion failed: {}", e);
            first_error.get_or_insert(e);
        }
    }
    first_error.map_or(Ok(()), Err)
}
