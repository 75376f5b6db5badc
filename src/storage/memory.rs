//! In-process key-value store.
//!
//! Used as the simple synchronous backend and as the fixture for tests; it
//! counts calls and can be told to start failing puts or deletes.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

use super::{KeyValueStore, StorageError};

pub struct MemoryStore {
    entries: Mutex<HashMap<String, Vec<u8>>>,
    puts: AtomicUsize,
    gets: AtomicUsize,
    deletes: AtomicUsize,
    /// Remaining puts allowed before puts start failing; `usize::MAX` = never.
    puts_before_failure: AtomicUsize,
    fail_deletes: AtomicBool,
    failing_names: Mutex<HashSet<String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            puts: AtomicUsize::new(0),
            gets: AtomicUsize::new(0),
            deletes: AtomicUsize::new(0),
            puts_before_failure: AtomicUsize::new(usize::MAX),
            fail_deletes: AtomicBool::new(false),
            failing_names: Mutex::new(HashSet::new()),
        }
    }

    /// Let `remaining` more puts succeed, then fail every put.
    pub fn fail_puts_after(&self, remaining: usize) {
        self.puts_before_failure.store(remaining, Ordering::SeqCst);
    }

    pub fn set_fail_deletes(&self, fail: bool) {
        self.fail_deletes.store(fail, Ordering::SeqCst);
    }

    /// Fail every put of `name` until healed.
    pub fn fail_puts_for(&self, name: &str) {
        self.failing_names
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.to_string());
    }

    /// Clear any injected failures.
    pub fn heal(&self) {
        self.puts_before_failure.store(usize::MAX, Ordering::SeqCst);
        self.fail_deletes.store(false, Ordering::SeqCst);
        self.failing_names
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    pub fn put_count(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }

    pub fn get_count(&self) -> usize {
        self.gets.load(Ordering::SeqCst)
    }

    pub fn delete_count(&self) -> usize {
        self.deletes.load(Ordering::SeqCst)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries().contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }

    fn entries(&self) -> std::sync::MutexGuard<'_, HashMap<String, Vec<u8>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn take_put_permit(&self) -> bool {
        self.puts_before_failure
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| match left {
                usize::MAX => Some(usize::MAX),
                0 => None,
                n => Some(n - 1),
            })
            .is_ok()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyValueStore for MemoryStore {
    fn put(&self, name: &str, value: &[u8]) -> Result<(), StorageError> {
        self.puts.fetch_add(1, Ordering::SeqCst);
        let named_failure = self
            .failing_names
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(name);
        if named_failure || !self.take_put_permit() {
            return Err(StorageError::Backend(format!("injected put failure for {}", name)));
        }
        self.entries().insert(name.to_string(), value.to_vec());
        Ok(())
    }

    fn get(&self, name: &str) -> Result<Vec<u8>, StorageError> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        self.entries()
            .get(name)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(name.to_string()))
    }

    fn delete(&self, name: &str) -> Result<(), StorageError> {
        self.deletes.fetch_add(1, Ordering::SeqCst);
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(StorageError::Backend(format!("injected delete failure for {}", name)));
        }
        self.entries()
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| StorageError::NotFound(name.to_string()))
    }
}
