//! File sessions and the metadata they maintain.

pub mod file;
pub mod file_context;
pub mod meta_data;
pub mod names;
#[cfg(test)]
mod tests;

pub use file::{File, FlushTarget, SessionState};
pub use file_context::{FileContext, Lineage, SharedContext};
pub use meta_data::{ContentHandle, DirectoryId, FileType, MetaData, DIRECTORY_SIZE};
pub use names::{excluded_filename, matches_mask, normalize, searches_mask};

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Lock ignoring poisoning; a panicked flush must not wedge the session.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
