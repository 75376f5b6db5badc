//! Keeps directory listings in storage and applies entry changes to them.
//!
//! The listing holding an entry is addressed by the entry's [`Lineage`]: it is
//! the listing of `lineage.parent`, stored under `lineage.grandparent`. The
//! root listing lives under the drive id.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::drive::{
    excluded_filename, lock, matches_mask, searches_mask, DirectoryId, FileContext, FlushTarget, Lineage,
    MetaData,
};
use crate::encrypt::{EncryptedChunk, RetrievalFn};
use crate::error::DriveError;
use crate::storage::{wait_all, Storage, StorageError};

use super::listing::{listing_name, DirectoryListing};
use super::{DirectoryError, MoveStep};

pub struct DirectoryListingHandler {
    storage: Arc<dyn Storage>,
    drive_id: DirectoryId,
    root_id: DirectoryId,
    cache: Mutex<HashMap<Lineage, DirectoryListing>>,
    /// Held across read-modify-store of any listing.
    mutation: Mutex<()>,
    /// Bound on each storage wait; `None` waits indefinitely.
    timeout: Option<Duration>,
}

impl DirectoryListingHandler {
    /// Create a new drive with an empty root listing.
    pub fn create(storage: Arc<dyn Storage>) -> Result<Self, DirectoryError> {
        let handler = Self::with_ids(storage, DirectoryId::generate(), DirectoryId::generate());
        let root = handler.root_lineage();
        handler.store(&root, DirectoryListing::new(root.parent))?;
        log::info!("Created drive {} with root {}", handler.drive_id, handler.root_id);
        Ok(handler)
    }

    /// Open an existing drive, loading its root listing.
    pub fn open(
        storage: Arc<dyn Storage>,
        drive_id: DirectoryId,
        root_id: DirectoryId,
    ) -> Result<Self, DirectoryError> {
        let handler = Self::with_ids(storage, drive_id, root_id);
        handler.listing(&handler.root_lineage())?;
        Ok(handler)
    }

    fn with_ids(storage: Arc<dyn Storage>, drive_id: DirectoryId, root_id: DirectoryId) -> Self {
        Self {
            storage,
            drive_id,
            root_id,
            cache: Mutex::new(HashMap::new()),
            mutation: Mutex::new(()),
            timeout: None,
        }
    }

    /// Bound every storage wait made by this handler, including retrievals.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn drive_id(&self) -> DirectoryId {
        self.drive_id
    }

    pub fn root_id(&self) -> DirectoryId {
        self.root_id
    }

    /// Lineage of entries in the root directory.
    pub fn root_lineage(&self) -> Lineage {
        Lineage::new(self.drive_id, self.root_id)
    }

    /// Storage name of the listing addressed by `lineage`.
    pub fn listing_name(&self, lineage: &Lineage) -> String {
        listing_name(&lineage.grandparent, &lineage.parent)
    }

    /// The retrieval callback to open files of this drive with.
    pub fn retrieval(&self) -> RetrievalFn {
        let storage = self.storage.clone();
        let timeout = self.timeout;
        Arc::new(move |name: &str| storage.get(name).wait_for(timeout))
    }

    /// The listing addressed by `lineage`, from cache or storage.
    pub fn listing(&self, lineage: &Lineage) -> Result<DirectoryListing, DirectoryError> {
        if let Some(listing) = lock(&self.cache).get(lineage) {
            return Ok(listing.clone());
        }
        let name = self.listing_name(lineage);
        let bytes = match self.storage.get(&name).wait_for(self.timeout) {
            Ok(bytes) => bytes,
            Err(StorageError::NotFound(_)) => {
                return Err(DirectoryError::NotFound(lineage.parent.to_string()))
            }
            Err(e) => return Err(e.into()),
        };
        let listing = DirectoryListing::unseal(&bytes, &lineage.grandparent, &lineage.parent)?;
        lock(&self.cache).insert(*lineage, listing.clone());
        Ok(listing)
    }

    /// Context for the entry `name` in the listing at `lineage`.
    pub fn file_context(&self, lineage: &Lineage, name: &str) -> Result<FileContext, DirectoryError> {
        let listing = self.listing(lineage)?;
        let meta_data = listing
            .get(name)
            .cloned()
            .ok_or_else(|| DirectoryError::NotFound(name.to_string()))?;
        Ok(FileContext::from_meta_data(meta_data).with_lineage(*lineage))
    }

    /// Entries of the listing at `lineage` whose names match a `*`/`?` mask.
    pub fn find_entries(&self, lineage: &Lineage, mask: &str) -> Result<Vec<MetaData>, DirectoryError> {
        let listing = self.listing(lineage)?;
        Ok(listing
            .children()
            .filter(|child| matches_mask(mask, child.name()))
            .cloned()
            .collect())
    }

    /// Entries of the listing at `lineage` containing a `*`/`?` mask anywhere
    /// in their names.
    pub fn search_entries(&self, lineage: &Lineage, mask: &str) -> Result<Vec<MetaData>, DirectoryError> {
        let listing = self.listing(lineage)?;
        Ok(listing
            .children()
            .filter(|child| searches_mask(mask, child.name()))
            .cloned()
            .collect())
    }

    /// Add a new entry. A directory entry gets its own empty listing.
    pub fn add_entry(&self, lineage: &Lineage, meta_data: MetaData) -> Result<(), DirectoryError> {
        if excluded_filename(meta_data.name()) {
            return Err(DirectoryError::InvalidName(meta_data.name().to_string()));
        }
        let _guard = lock(&self.mutation);
        let mut listing = self.listing(lineage)?;
        let child = meta_data.directory_id();
        listing.insert(meta_data)?;

        if let Some(child_id) = child {
            self.store(&lineage.descend(child_id), DirectoryListing::new(child_id))?;
        }
        self.store(lineage, listing)
    }

    /// Remove an entry. Directories must be empty.
    pub fn remove_entry(&self, lineage: &Lineage, name: &str) -> Result<MetaData, DirectoryError> {
        let _guard = lock(&self.mutation);
        let mut listing = self.listing(lineage)?;
        let removed = listing.remove(name)?;

        let child_lineage = removed.directory_id().map(|id| lineage.descend(id));
        if let Some(child_lineage) = &child_lineage {
            if !self.listing(child_lineage)?.is_empty() {
                return Err(DirectoryError::NotEmpty(name.to_string()));
            }
        }

        self.store(lineage, listing)?;
        if let Some(child_lineage) = child_lineage {
            self.delete_listing(&child_lineage);
        }
        Ok(removed)
    }

    /// Replace an existing entry's record.
    pub fn update_entry(&self, lineage: &Lineage, meta_data: MetaData) -> Result<(), DirectoryError> {
        let _guard = lock(&self.mutation);
        let mut listing = self.listing(lineage)?;
        if !listing.contains(meta_data.name()) {
            return Err(DirectoryError::NotFound(meta_data.name().to_string()));
        }
        listing.upsert(meta_data);
        self.store(lineage, listing)
    }

    /// Insert or replace an entry's record.
    pub fn upsert_entry(&self, lineage: &Lineage, meta_data: MetaData) -> Result<(), DirectoryError> {
        if excluded_filename(meta_data.name()) {
            return Err(DirectoryError::InvalidName(meta_data.name().to_string()));
        }
        let _guard = lock(&self.mutation);
        let mut listing = self.listing(lineage)?;
        listing.upsert(meta_data);
        self.store(lineage, listing)
    }

    /// Rename or move an entry, returning its updated record.
    ///
    /// A move between listings runs three steps: re-home the entry (for a
    /// directory, store its listing at the new address), store the destination
    /// listing, then store the source listing. If a step fails after an earlier
    /// one succeeded, the earlier steps are undone and the failure is reported
    /// as `PartialMoveFailure`.
    pub fn rename_entry(
        &self,
        old_lineage: &Lineage,
        old_name: &str,
        new_lineage: &Lineage,
        new_name: &str,
    ) -> Result<MetaData, DirectoryError> {
        if excluded_filename(new_name) {
            return Err(DirectoryError::InvalidName(new_name.to_string()));
        }
        let _guard = lock(&self.mutation);
        let mut old_listing = self.listing(old_lineage)?;
        let mut moved = old_listing.remove(old_name)?;
        moved.set_name(new_name);
        moved.touch_status();

        if old_lineage == new_lineage {
            old_listing.insert(moved.clone())?;
            self.store(old_lineage, old_listing)?;
            log::debug!("Renamed {} to {}", old_name, new_name);
            return Ok(moved);
        }

        if let Some(id) = moved.directory_id() {
            if new_lineage.parent == id
                || new_lineage.grandparent == id
                || self.subtree_contains(old_lineage.descend(id), new_lineage)?
            {
                return Err(DirectoryError::InvalidMove(old_name.to_string()));
            }
        }
        let original_new_listing = self.listing(new_lineage)?;
        let mut new_listing = original_new_listing.clone();
        new_listing.insert(moved.clone())?;

        // (a) A directory's own listing is addressed by its parent, so it moves too.
        let relocated = moved
            .directory_id()
            .map(|id| (old_lineage.descend(id), new_lineage.descend(id)));
        if let Some((from, to)) = &relocated {
            let listing = self.listing(from)?;
            self.store(to, listing)?;
        }

        // (b)
        if let Err(e) = self.store(new_lineage, new_listing) {
            let rolled_back = match &relocated {
                Some((_, to)) => self.undo_relocation(to),
                None => true,
            };
            return Err(partial_move(MoveStep::PersistNewListing, rolled_back, e));
        }

        // (c)
        if let Err(e) = self.store(old_lineage, old_listing) {
            let restored = self.store(new_lineage, original_new_listing).is_ok();
            let rolled_back = match &relocated {
                Some((_, to)) => self.undo_relocation(to) && restored,
                None => restored,
            };
            return Err(partial_move(MoveStep::UpdateOldListing, rolled_back, e));
        }

        if let Some((from, _)) = &relocated {
            self.delete_listing(from);
        }
        log::debug!(
            "Moved {} from {} to {} as {}",
            old_name,
            old_lineage.parent,
            new_lineage.parent,
            new_name
        );
        Ok(moved)
    }

    /// Whether `target` addresses a listing below the one at `top`.
    fn subtree_contains(&self, top: Lineage, target: &Lineage) -> Result<bool, DirectoryError> {
        let mut pending = vec![top];
        while let Some(lineage) = pending.pop() {
            for child in self.listing(&lineage)?.children() {
                let Some(id) = child.directory_id() else {
                    continue;
                };
                let below = lineage.descend(id);
                if below == *target {
                    return Ok(true);
                }
                pending.push(below);
            }
        }
        Ok(false)
    }

    fn undo_relocation(&self, to: &Lineage) -> bool {
        let name = self.listing_name(to);
        lock(&self.cache).remove(to);
        match self.storage.delete(&name).wait_for(self.timeout) {
            Ok(()) => true,
            Err(e) => {
                log::warn!("Failed to undo listing relocation {}: {}", name, e);
                false
            }
        }
    }

    fn store(&self, lineage: &Lineage, listing: DirectoryListing) -> Result<(), DirectoryError> {
        let sealed = listing.seal(&lineage.grandparent)?;
        self.storage
            .put(&self.listing_name(lineage), sealed)
            .wait_for(self.timeout)?;
        lock(&self.cache).insert(*lineage, listing);
        Ok(())
    }

    /// Best effort: a stale listing left behind is unreachable.
    fn delete_listing(&self, lineage: &Lineage) {
        lock(&self.cache).remove(lineage);
        let name = self.listing_name(lineage);
        if let Err(e) = self.storage.delete(&name).wait_for(self.timeout) {
            log::warn!("Failed to delete stale listing {}: {}", name, e);
        }
    }
}

fn partial_move(step: MoveStep, rolled_back: bool, source: DirectoryError) -> DirectoryError {
    log::error!(
        "Move failed at step '{}' (rolled back: {}): {}",
        step,
        rolled_back,
        source
    );
    DirectoryError::PartialMoveFailure {
        step,
        rolled_back,
        source: Box::new(source),
    }
}

impl FlushTarget for DirectoryListingHandler {
    fn persist(
        &self,
        meta_data: &MetaData,
        lineage: &Lineage,
        chunks: &[EncryptedChunk],
    ) -> Result<(), DriveError> {
        let completions: Vec<_> = chunks
            .iter()
            .map(|chunk| self.storage.put(&chunk.name, chunk.bytes.clone()))
            .collect();
        wait_all(completions, self.timeout)?;
        self.upsert_entry(lineage, meta_data.clone())?;
        Ok(())
    }
}
