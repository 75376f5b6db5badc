//! Usage-capped plaintext cache for one open stream.
//!
//! Chunks live in memory up to `memory_cap` bytes; beyond that they are
//! spilled to files under `<cache_root>/<stream id>/`, up to `disk_cap` bytes.
//! The cache is a hard cap, not an LRU: an insert that cannot fit fails and
//! the caller decides what to drop.
//!
//! Every insert is planned on a [`Ledger`] of entry lengths before any byte
//! moves, so a batch of inserts can be checked up front with exactly the
//! placement rules the inserts will follow.

use std::cmp::Reverse;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use zeroize::Zeroize;

use crate::crypto::utils::generate_random_bytes;

use super::EncryptError;

/// Ceiling on bytes held in process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryUsage(pub u64);

/// Ceiling on bytes spilled to the local cache directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiskUsage(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Placement {
    Memory,
    Disk,
}

/// Entry lengths and usage, without the bytes.
#[derive(Debug, Clone)]
struct Ledger {
    memory: HashMap<usize, u64>,
    disk: HashMap<usize, u64>,
    memory_used: u64,
    disk_used: u64,
    memory_cap: u64,
    disk_cap: u64,
}

impl Ledger {
    fn available(&self) -> u64 {
        (self.memory_cap + self.disk_cap).saturating_sub(self.memory_used + self.disk_used)
    }

    fn remove(&mut self, index: usize) {
        if let Some(len) = self.memory.remove(&index) {
            self.memory_used -= len;
        }
        if let Some(len) = self.disk.remove(&index) {
            self.disk_used -= len;
        }
    }

    /// Largest non-empty memory entry that fits on disk; ties go to the
    /// lowest index so plans are reproducible.
    fn spill_candidate(&self) -> Option<usize> {
        let disk_room = self.disk_cap.saturating_sub(self.disk_used);
        self.memory
            .iter()
            .filter(|(_, len)| **len > 0 && **len <= disk_room)
            .max_by_key(|(index, len)| (**len, Reverse(**index)))
            .map(|(index, _)| *index)
    }

    /// Record `len` bytes at `index`, replacing any previous entry. Returns
    /// the memory entries moved to disk to make room, and where the new entry
    /// went.
    fn place(&mut self, index: usize, len: u64) -> Result<(Vec<usize>, Placement), EncryptError> {
        let previous = self.memory.get(&index).or(self.disk.get(&index)).copied();
        let available = self.available() + previous.unwrap_or(0);
        if len > available {
            return Err(EncryptError::CapacityExceeded {
                requested: len,
                available,
            });
        }
        self.remove(index);

        let mut spilled = Vec::new();
        while self.memory_used + len > self.memory_cap {
            let Some(victim) = self.spill_candidate() else {
                break;
            };
            if let Some(victim_len) = self.memory.remove(&victim) {
                self.memory_used -= victim_len;
                self.disk_used += victim_len;
                self.disk.insert(victim, victim_len);
                spilled.push(victim);
            }
        }

        if self.memory_used + len <= self.memory_cap {
            self.memory_used += len;
            self.memory.insert(index, len);
            return Ok((spilled, Placement::Memory));
        }
        if self.disk_used + len <= self.disk_cap {
            self.disk_used += len;
            self.disk.insert(index, len);
            return Ok((spilled, Placement::Disk));
        }

        // Enough bytes in total, but no single place can hold the entry.
        Err(EncryptError::CapacityExceeded {
            requested: len,
            available: self
                .memory_cap
                .saturating_sub(self.memory_used)
                .max(self.disk_cap.saturating_sub(self.disk_used)),
        })
    }
}

pub struct ChunkCache {
    memory: HashMap<usize, Vec<u8>>,
    on_disk: HashMap<usize, u64>,
    memory_used: u64,
    disk_used: u64,
    memory_cap: u64,
    disk_cap: u64,
    spill_dir: PathBuf,
    spill_created: bool,
}

impl ChunkCache {
    pub fn new(memory_cap: MemoryUsage, disk_cap: DiskUsage, cache_root: &Path) -> Self {
        let stream_id = hex::encode(generate_random_bytes(8));
        Self {
            memory: HashMap::new(),
            on_disk: HashMap::new(),
            memory_used: 0,
            disk_used: 0,
            memory_cap: memory_cap.0,
            disk_cap: disk_cap.0,
            spill_dir: cache_root.join(stream_id),
            spill_created: false,
        }
    }

    pub fn memory_used(&self) -> u64 {
        self.memory_used
    }

    pub fn disk_used(&self) -> u64 {
        self.disk_used
    }

    pub fn spill_dir(&self) -> &Path {
        &self.spill_dir
    }

    /// Bytes still available across memory and disk.
    pub fn available(&self) -> u64 {
        (self.memory_cap + self.disk_cap).saturating_sub(self.memory_used + self.disk_used)
    }

    /// Whether `additional` more bytes fit in memory without spilling.
    pub fn fits_in_memory(&self, additional: u64) -> bool {
        self.memory_used + additional <= self.memory_cap
    }

    /// Whether inserting `entries` (index, length) in order would succeed.
    ///
    /// Nothing is changed either way; the error is the one the failing
    /// insert would return.
    pub fn can_hold(&self, entries: &[(usize, u64)]) -> Result<(), EncryptError> {
        let mut ledger = self.ledger();
        for &(index, len) in entries {
            ledger.place(index, len)?;
        }
        Ok(())
    }

    pub fn contains(&self, index: usize) -> bool {
        self.memory.contains_key(&index) || self.on_disk.contains_key(&index)
    }

    /// Bytes held for `index`, 0 if absent.
    pub fn len_of(&self, index: usize) -> u64 {
        if let Some(data) = self.memory.get(&index) {
            data.len() as u64
        } else {
            self.on_disk.get(&index).copied().unwrap_or(0)
        }
    }

    /// Copy of the cached bytes for `index`.
    pub fn get(&self, index: usize) -> Result<Option<Vec<u8>>, EncryptError> {
        if let Some(data) = self.memory.get(&index) {
            return Ok(Some(data.clone()));
        }
        if self.on_disk.contains_key(&index) {
            return Ok(Some(fs::read(self.spill_path(index))?));
        }
        Ok(None)
    }

    /// Store `data` for `index`, replacing any previous entry.
    ///
    /// Fails with `CapacityExceeded` without touching the cache when neither
    /// memory (after spilling other entries) nor disk can hold `data`.
    pub fn insert(&mut self, index: usize, data: Vec<u8>) -> Result<(), EncryptError> {
        let (spilled, placement) = self.ledger().place(index, data.len() as u64)?;

        self.remove(index)?;
        for victim in spilled {
            self.spill(victim)?;
        }
        match placement {
            Placement::Memory => {
                self.memory_used += data.len() as u64;
                self.memory.insert(index, data);
            }
            Placement::Disk => self.write_spill(index, &data)?,
        }
        Ok(())
    }

    /// Drop the entry for `index`, if any.
    pub fn remove(&mut self, index: usize) -> Result<(), EncryptError> {
        if let Some(mut data) = self.memory.remove(&index) {
            self.memory_used -= data.len() as u64;
            data.zeroize();
        }
        if let Some(len) = self.on_disk.remove(&index) {
            self.disk_used -= len;
            fs::remove_file(self.spill_path(index))?;
        }
        Ok(())
    }

    fn ledger(&self) -> Ledger {
        Ledger {
            memory: self
                .memory
                .iter()
                .map(|(index, data)| (*index, data.len() as u64))
                .collect(),
            disk: self.on_disk.clone(),
            memory_used: self.memory_used,
            disk_used: self.disk_used,
            memory_cap: self.memory_cap,
            disk_cap: self.disk_cap,
        }
    }

    fn spill(&mut self, index: usize) -> Result<(), EncryptError> {
        if let Some(mut data) = self.memory.remove(&index) {
            self.memory_used -= data.len() as u64;
            let written = self.write_spill(index, &data);
            data.zeroize();
            written?;
            log::debug!("Spilled chunk {} to {}", index, self.spill_dir.display());
        }
        Ok(())
    }

    fn write_spill(&mut self, index: usize, data: &[u8]) -> Result<(), EncryptError> {
        if !self.spill_created {
            fs::create_dir_all(&self.spill_dir)?;
            self.spill_created = true;
        }
        fs::write(self.spill_path(index), data)?;
        self.disk_used += data.len() as u64;
        self.on_disk.insert(index, data.len() as u64);
        Ok(())
    }

    fn spill_path(&self, index: usize) -> PathBuf {
        self.spill_dir.join(format!("{:08}", index))
    }
}

impl Drop for ChunkCache {
    fn drop(&mut self) {
        for data in self.memory.values_mut() {
            data.zeroize();
        }
        if self.spill_created {
            if let Err(e) = fs::remove_dir_all(&self.spill_dir) {
                log::warn!(
                    "Failed to remove cache directory {}: {}",
                    self.spill_dir.display(),
                    e
                );
            }
        }
    }
}
