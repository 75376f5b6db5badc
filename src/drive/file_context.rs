//! Live state of one file or directory entry.

use std::sync::{Arc, Mutex};

use crate::encrypt::SelfEncryptor;

use super::meta_data::{DirectoryId, MetaData};

/// The two nearest ancestor listings of an entry: the listing holding the
/// entry is addressed by `parent` under `grandparent`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Lineage {
    pub grandparent: DirectoryId,
    pub parent: DirectoryId,
}

impl Lineage {
    pub fn new(grandparent: DirectoryId, parent: DirectoryId) -> Self {
        Self {
            grandparent,
            parent,
        }
    }

    /// Lineage of the entries inside `child`, a directory listed under `self`.
    pub fn descend(&self, child: DirectoryId) -> Self {
        Self::new(self.parent, child)
    }
}

pub struct FileContext {
    pub meta_data: MetaData,
    /// Present while the file is open.
    pub self_encryptor: Option<SelfEncryptor>,
    pub content_changed: bool,
    pub grandparent_directory_id: Option<DirectoryId>,
    pub parent_directory_id: Option<DirectoryId>,
}

/// A context shared between a session and the tasks it schedules.
pub type SharedContext = Arc<Mutex<FileContext>>;

impl FileContext {
    /// A new entry. Files start dirty so they get persisted; directories don't.
    pub fn new(name: impl Into<String>, is_directory: bool) -> Self {
        Self {
            meta_data: MetaData::new(name, is_directory),
            self_encryptor: None,
            content_changed: !is_directory,
            grandparent_directory_id: None,
            parent_directory_id: None,
        }
    }

    /// Context for an entry loaded from a listing.
    pub fn from_meta_data(meta_data: MetaData) -> Self {
        Self {
            meta_data,
            self_encryptor: None,
            content_changed: false,
            grandparent_directory_id: None,
            parent_directory_id: None,
        }
    }

    pub fn with_lineage(mut self, lineage: Lineage) -> Self {
        self.set_lineage(lineage);
        self
    }

    pub fn set_lineage(&mut self, lineage: Lineage) {
        self.grandparent_directory_id = Some(lineage.grandparent);
        self.parent_directory_id = Some(lineage.parent);
    }

    pub fn lineage(&self) -> Option<Lineage> {
        Some(Lineage::new(
            self.grandparent_directory_id?,
            self.parent_directory_id?,
        ))
    }

    pub fn is_open(&self) -> bool {
        self.self_encryptor.is_some()
    }

    pub fn into_shared(self) -> SharedContext {
        Arc::new(Mutex::new(self))
    }
}

impl Default for FileContext {
    fn default() -> Self {
        Self::from_meta_data(MetaData::new(String::new(), false))
    }
}
