//! Direct-call strategy over a synchronous key-value store.

use std::sync::Arc;

use super::{Completion, Storage, StorageError};

/// A generic synchronous store: every call returns once the effect is durable
/// or has failed.
pub trait KeyValueStore: Send + Sync {
    fn put(&self, name: &str, value: &[u8]) -> Result<(), StorageError>;

    fn get(&self, name: &str) -> Result<Vec<u8>, StorageError>;

    fn delete(&self, name: &str) -> Result<(), StorageError>;
}

impl<S: KeyValueStore + ?Sized> KeyValueStore for Arc<S> {
    fn put(&self, name: &str, value: &[u8]) -> Result<(), StorageError> {
        (**self).put(name, value)
    }

    fn get(&self, name: &str) -> Result<Vec<u8>, StorageError> {
        (**self).get(name)
    }

    fn delete(&self, name: &str) -> Result<(), StorageError> {
        (**self).delete(name)
    }
}

/// [`Storage`] that calls the store directly and blocks until it answers.
pub struct DirectStorage<S> {
    store: S,
}

impl<S: KeyValueStore> DirectStorage<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }
}

impl<S: KeyValueStore> Storage for DirectStorage<S> {
    fn put(&self, name: &str, bytes: Vec<u8>) -> Completion<()> {
        Completion::Ready(self.store.put(name, &bytes))
    }

    fn get(&self, name: &str) -> Completion<Vec<u8>> {
        Completion::Ready(self.store.get(name))
    }

    fn delete(&self, name: &str) -> Completion<()> {
        Completion::Ready(self.store.delete(name))
    }
}
