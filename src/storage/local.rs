//! Local-directory key-value store.
//!
//! Each entry is a file under `root`, named by its (hex) key. Writes go to a
//! temp file first and are renamed into place so a crash never leaves a
//! half-written entry under its final name.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use super::{KeyValueStore, StorageError};

#[derive(Debug, Clone)]
pub struct LocalDiskStore {
    root: PathBuf,
}

impl LocalDiskStore {
    /// Open (and create if needed) a store rooted at `root`.
    pub fn new<P: AsRef<Path>>(root: P) -> Result<Self, StorageError> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, name: &str) -> Result<PathBuf, StorageError> {
        // Names are engine-generated hex; anything else could escape `root`.
        if name.is_empty() || !name.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_') {
            return Err(StorageError::Backend(format!("invalid entry name: {:?}", name)));
        }
        Ok(self.root.join(name))
    }
}

impl KeyValueStore for LocalDiskStore {
    fn put(&self, name: &str, value: &[u8]) -> Result<(), StorageError> {
        let path = self.path_for(name)?;
        let temp_path = self.root.join(format!(".{}.tmp", name));
        fs::write(&temp_path, value)?;
        fs::rename(&temp_path, &path)?;
        Ok(())
    }

    fn get(&self, name: &str) -> Result<Vec<u8>, StorageError> {
        let path = self.path_for(name)?;
        fs::read(&path).map_err(|e| match e.kind() {
            ErrorKind::NotFound => StorageError::NotFound(name.to_string()),
            _ => StorageError::Io(e),
        })
    }

    fn delete(&self, name: &str) -> Result<(), StorageError> {
        let path = self.path_for(name)?;
        fs::remove_file(&path).map_err(|e| match e.kind() {
            ErrorKind::NotFound => StorageError::NotFound(name.to_string()),
            _ => StorageError::Io(e),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_store_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalDiskStore::new(dir.path().join("store")).unwrap();

        store.put("abc123", b"bytes").unwrap();
        assert_eq!(store.get("abc123").unwrap(), b"bytes");

        store.put("abc123", b"replaced").unwrap();
        assert_eq!(store.get("abc123").unwrap(), b"replaced");

        store.delete("abc123").unwrap();
        assert!(matches!(store.get("abc123"), Err(StorageError::NotFound(_))));
    }

    #[test]
    fn test_local_store_rejects_path_names() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalDiskStore::new(dir.path()).unwrap();
        assert!(store.put("../escape", b"x").is_err());
        assert!(store.get("a/b").is_err());
        assert!(store.put("", b"x").is_err());
    }

    #[test]
    fn test_local_store_delete_missing() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalDiskStore::new(dir.path()).unwrap();
        assert!(matches!(store.delete("missing"), Err(StorageError::NotFound(_))));
    }
}
