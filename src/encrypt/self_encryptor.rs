//! Chunked, convergently encrypted content stream.
//!
//! Content is split into fixed-size slots. Only slots with content are
//! tracked; every other index is a hole that reads as zeros and is stored as
//! nothing, so sparse streams cost nothing for their gaps. A tracked slot is
//! either:
//!
//! - stored: backed by a `ChunkRef` and fetched through the retrieval
//!   callback the first time it is read;
//! - local: its plaintext sits in the `ChunkCache`.
//!
//! Only slots that are local and clean may be evicted; dirty data always has
//! a local copy or can be rebuilt from its backing chunk.

use std::collections::BTreeMap;
use std::ops::RangeInclusive;
use std::path::Path;
use std::sync::Arc;

use crate::crypto::aes::{decrypt_chunk, encrypt_chunk};
use crate::crypto::utils::{content_name, verify_content_name};
use crate::storage::StorageError;

use super::chunk_cache::{ChunkCache, DiskUsage, MemoryUsage};
use super::data_map::{ChunkRef, DataMap, EncryptedChunk};
use super::EncryptError;

/// Default plaintext chunk size (1 MiB).
pub const DEFAULT_CHUNK_SIZE: u64 = 1024 * 1024;

/// Fetches the stored bytes for a content name.
pub type RetrievalFn = Arc<dyn Fn(&str) -> Result<Vec<u8>, StorageError> + Send + Sync>;

#[derive(Debug, Clone, Default)]
struct Slot {
    backing: Option<ChunkRef>,
    local: bool,
    dirty: bool,
    generation: u64,
}

/// Output of [`SelfEncryptor::finalize`].
#[derive(Debug, Clone)]
pub struct Finalized {
    pub data_map: DataMap,
    /// Chunks not yet known to be stored.
    pub chunks: Vec<EncryptedChunk>,
    generations: Vec<(usize, u64, ChunkRef)>,
}

pub struct SelfEncryptor {
    chunk_size: u64,
    size: u64,
    persisted_size: u64,
    slots: BTreeMap<usize, Slot>,
    cache: ChunkCache,
    retrieval: RetrievalFn,
    next_generation: u64,
}

fn slot_count(size: u64, chunk_size: u64) -> usize {
    size.div_ceil(chunk_size) as usize
}

fn slot_len(size: u64, chunk_size: u64, index: usize) -> u64 {
    let start = index as u64 * chunk_size;
    size.saturating_sub(start).min(chunk_size)
}

impl SelfEncryptor {
    /// Open a stream over `data_map`.
    ///
    /// `chunk_size` only applies to maps that never held data; existing maps
    /// keep the layout they were written with.
    pub fn new(
        data_map: &DataMap,
        retrieval: RetrievalFn,
        memory_cap: MemoryUsage,
        disk_cap: DiskUsage,
        cache_root: &Path,
        chunk_size: u64,
    ) -> Self {
        let chunk_size = if data_map.chunk_size > 0 {
            data_map.chunk_size
        } else {
            chunk_size.max(1)
        };
        let count = slot_count(data_map.size, chunk_size) as u64;
        let slots = data_map
            .chunks
            .iter()
            .filter(|chunk| chunk.index < count)
            .map(|chunk| {
                let slot = Slot {
                    backing: Some(chunk.clone()),
                    ..Slot::default()
                };
                (chunk.index as usize, slot)
            })
            .collect();

        Self {
            chunk_size,
            size: data_map.size,
            persisted_size: data_map.size,
            slots,
            cache: ChunkCache::new(memory_cap, disk_cap, cache_root),
            retrieval,
            next_generation: 1,
        }
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn chunk_size(&self) -> u64 {
        self.chunk_size
    }

    pub fn cache(&self) -> &ChunkCache {
        &self.cache
    }

    /// Whether the content differs from what was last persisted.
    pub fn is_dirty(&self) -> bool {
        self.size != self.persisted_size || self.slots.values().any(|s| s.dirty)
    }

    /// Read up to `buffer.len()` bytes at `offset`. Returns 0 at or past the end.
    pub fn read(&mut self, buffer: &mut [u8], offset: u64) -> Result<usize, EncryptError> {
        if offset >= self.size || buffer.is_empty() {
            return Ok(0);
        }
        let count = (buffer.len() as u64).min(self.size - offset) as usize;
        let end = offset + count as u64;
        let first = (offset / self.chunk_size) as usize;
        let last = ((end - 1) / self.chunk_size) as usize;

        for i in first..=last {
            let slot_start = i as u64 * self.chunk_size;
            let from = offset.max(slot_start);
            let to = end.min(slot_start + self.chunk_size);
            let target = &mut buffer[(from - offset) as usize..(to - offset) as usize];
            if self.slots.contains_key(&i) {
                let data = self.read_slot(i)?;
                target.copy_from_slice(&data[(from - slot_start) as usize..(to - slot_start) as usize]);
            } else {
                target.fill(0);
            }
        }
        Ok(count)
    }

    /// Write `data` at `offset`, growing the stream if needed.
    ///
    /// Fails with `CapacityExceeded` before changing anything if the affected
    /// chunks can't be placed in the cache, even after dropping clean chunks.
    pub fn write(&mut self, data: &[u8], offset: u64) -> Result<usize, EncryptError> {
        if data.is_empty() {
            return Ok(0);
        }
        let len = data.len() as u64;
        let end = offset
            .checked_add(len)
            .ok_or(EncryptError::OutOfRange { offset, len })?;
        let new_size = self.size.max(end);
        let first = (offset / self.chunk_size) as usize;
        let last = ((end - 1) / self.chunk_size) as usize;

        let mut staged = Vec::with_capacity(last - first + 1);
        for i in first..=last {
            let slot_start = i as u64 * self.chunk_size;
            let slot_len = slot_len(new_size, self.chunk_size, i);
            let from = offset.max(slot_start);
            let to = end.min(slot_start + slot_len);
            // A fully overwritten slot needs none of its old bytes.
            let mut buf = if from == slot_start && to == slot_start + slot_len {
                Vec::new()
            } else {
                self.load(i)?
            };
            buf.resize(slot_len as usize, 0);
            buf[(from - slot_start) as usize..(to - slot_start) as usize]
                .copy_from_slice(&data[(from - offset) as usize..(to - offset) as usize]);
            staged.push((i, buf));
        }

        let lengths: Vec<(usize, u64)> = staged
            .iter()
            .map(|(i, buf)| (*i, buf.len() as u64))
            .collect();
        self.make_room(&lengths, first..=last)?;

        self.resize(new_size)?;
        for (i, buf) in staged {
            self.cache.insert(i, buf)?;
            self.mark_written(i);
        }
        Ok(data.len())
    }

    /// Shrink or zero-extend the stream to `new_size`.
    pub fn truncate(&mut self, new_size: u64) -> Result<(), EncryptError> {
        self.resize(new_size)
    }

    /// Encrypt every dirty slot and describe the resulting content.
    ///
    /// Nothing is marked clean here; call [`mark_persisted`](Self::mark_persisted)
    /// once the returned chunks are stored.
    pub fn finalize(&self) -> Result<Finalized, EncryptError> {
        let mut chunks: Vec<EncryptedChunk> = Vec::new();
        let mut refs = Vec::with_capacity(self.slots.len());
        let mut generations = Vec::new();

        for (&i, slot) in &self.slots {
            if !slot.dirty {
                refs.extend(slot.backing.clone());
                continue;
            }
            let plaintext = self.load(i)?;
            let (key, ciphertext) = encrypt_chunk(&plaintext)?;
            let name = content_name(&ciphertext);
            let already_stored = slot.backing.as_ref().is_some_and(|b| b.name == name);
            if !already_stored && !chunks.iter().any(|c| c.name == name) {
                chunks.push(EncryptedChunk {
                    name: name.clone(),
                    bytes: ciphertext,
                });
            }
            let reference = ChunkRef {
                index: i as u64,
                name,
                key,
                size: plaintext.len() as u64,
            };
            generations.push((i, slot.generation, reference.clone()));
            refs.push(reference);
        }

        Ok(Finalized {
            data_map: DataMap {
                chunk_size: self.chunk_size,
                size: self.size,
                chunks: refs,
            },
            chunks,
            generations,
        })
    }

    /// Mark the slots captured by `finalized` clean. Slots changed since then
    /// stay dirty.
    pub fn mark_persisted(&mut self, finalized: &Finalized) {
        for (i, generation, reference) in &finalized.generations {
            if let Some(slot) = self.slots.get_mut(i) {
                if slot.generation == *generation {
                    slot.backing = Some(reference.clone());
                    slot.dirty = false;
                }
            }
        }
        self.persisted_size = finalized.data_map.size;
    }

    fn bump_generation(&mut self) -> u64 {
        let generation = self.next_generation;
        self.next_generation += 1;
        generation
    }

    /// Record new local content for slot `i`.
    fn mark_written(&mut self, i: usize) {
        let generation = self.bump_generation();
        let slot = self.slots.entry(i).or_default();
        slot.local = true;
        slot.dirty = true;
        slot.generation = generation;
    }

    /// Current plaintext of slot `i`, exactly as long as the slot.
    fn load(&self, i: usize) -> Result<Vec<u8>, EncryptError> {
        let mut data = match self.slots.get(&i) {
            Some(slot) if slot.local => self.cache.get(i)?.unwrap_or_default(),
            Some(Slot {
                backing: Some(chunk),
                ..
            }) => self.fetch(chunk)?,
            _ => Vec::new(),
        };
        data.resize(slot_len(self.size, self.chunk_size, i) as usize, 0);
        Ok(data)
    }

    /// Like `load`, but keeps a fetched chunk if memory has room for it.
    fn read_slot(&mut self, i: usize) -> Result<Vec<u8>, EncryptError> {
        let data = self.load(i)?;
        let fetched = self
            .slots
            .get(&i)
            .is_some_and(|slot| !slot.local && slot.backing.is_some());
        if fetched && self.cache.fits_in_memory(data.len() as u64) {
            self.cache.insert(i, data.clone())?;
            if let Some(slot) = self.slots.get_mut(&i) {
                slot.local = true;
            }
        }
        Ok(data)
    }

    fn fetch(&self, chunk: &ChunkRef) -> Result<Vec<u8>, EncryptError> {
        log::debug!("Fetching chunk {}", chunk.name);
        let bytes = (self.retrieval)(&chunk.name)?;
        if !verify_content_name(&chunk.name, &bytes) {
            return Err(EncryptError::CorruptChunk(chunk.name.clone()));
        }
        Ok(decrypt_chunk(&bytes, &chunk.key)?)
    }

    /// Ensure `entries` can be inserted, dropping clean local slots outside
    /// `keep` if needed.
    fn make_room(
        &mut self,
        entries: &[(usize, u64)],
        keep: RangeInclusive<usize>,
    ) -> Result<(), EncryptError> {
        if self.cache.can_hold(entries).is_ok() {
            return Ok(());
        }
        let clean: Vec<usize> = self
            .slots
            .iter()
            .filter(|(i, slot)| slot.local && !slot.dirty && !keep.contains(*i))
            .map(|(i, _)| *i)
            .collect();
        for i in clean {
            self.cache.remove(i)?;
            if let Some(slot) = self.slots.get_mut(&i) {
                slot.local = false;
            }
            log::debug!("Evicted clean chunk {}", i);
            if self.cache.can_hold(entries).is_ok() {
                return Ok(());
            }
        }
        self.cache.can_hold(entries)
    }

    fn resize(&mut self, new_size: u64) -> Result<(), EncryptError> {
        if new_size == self.size {
            return Ok(());
        }
        let count = slot_count(new_size, self.chunk_size);

        if new_size < self.size && count > 0 {
            // The new last slot keeps only a prefix; cut it locally so a
            // later grow can't bring the old tail back from its backing chunk.
            let boundary = count - 1;
            let len = slot_len(new_size, self.chunk_size, boundary);
            if len < slot_len(self.size, self.chunk_size, boundary)
                && self.slots.contains_key(&boundary)
            {
                let mut data = self.load(boundary)?;
                data.truncate(len as usize);
                self.cache.insert(boundary, data)?;
                self.mark_written(boundary);
            }
        }

        let dropped = self.slots.split_off(&count);
        for i in dropped.keys() {
            self.cache.remove(*i)?;
        }

        if new_size > self.size && self.size > 0 {
            let old_last = slot_count(self.size, self.chunk_size) - 1;
            let grew = slot_len(new_size, self.chunk_size, old_last)
                != slot_len(self.size, self.chunk_size, old_last);
            if grew && self.slots.contains_key(&old_last) {
                let generation = self.bump_generation();
                if let Some(slot) = self.slots.get_mut(&old_last) {
                    slot.dirty = true;
                    slot.generation = generation;
                }
            }
        }
        self.size = new_size;
        Ok(())
    }
}
