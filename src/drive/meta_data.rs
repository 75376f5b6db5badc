//! Per-entry metadata record.

use std::fmt;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};

use crate::crypto::utils::generate_id;
use crate::encrypt::DataMap;
use crate::error::DriveError;

/// Size reported for every directory.
pub const DIRECTORY_SIZE: u64 = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FileType {
    RegularFile,
    Directory,
}

/// Identifier of a directory listing.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DirectoryId([u8; 32]);

impl DirectoryId {
    pub fn generate() -> Self {
        Self(generate_id())
    }

    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for DirectoryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Short form is enough to tell listings apart in logs.
        write!(f, "{}", &self.to_hex()[..12])
    }
}

impl fmt::Debug for DirectoryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DirectoryId({})", self)
    }
}

impl TryFrom<String> for DirectoryId {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        let bytes = hex::decode(&value).map_err(|e| e.to_string())?;
        let bytes: [u8; 32] = bytes
            .try_into()
            .map_err(|_| "directory id must be 32 bytes".to_string())?;
        Ok(Self(bytes))
    }
}

impl From<DirectoryId> for String {
    fn from(id: DirectoryId) -> Self {
        id.to_hex()
    }
}

/// What an entry's content is stored as. The variant fixes the file type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "camelCase")]
pub enum ContentHandle {
    DataMap(DataMap),
    Directory(DirectoryId),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetaData {
    name: String,
    size: u64,
    allocation_size: u64,
    creation_time: SystemTime,
    last_status_time: SystemTime,
    last_write_time: SystemTime,
    last_access_time: SystemTime,
    content: ContentHandle,
}

impl MetaData {
    /// A fresh record: all four timestamps equal, a new directory id for
    /// directories, an empty data map for files.
    pub fn new(name: impl Into<String>, is_directory: bool) -> Self {
        let content = if is_directory {
            ContentHandle::Directory(DirectoryId::generate())
        } else {
            ContentHandle::DataMap(DataMap::default())
        };
        Self::with_content(name, content)
    }

    /// A directory record for an existing listing.
    pub fn directory(name: impl Into<String>, id: DirectoryId) -> Self {
        Self::with_content(name, ContentHandle::Directory(id))
    }

    fn with_content(name: impl Into<String>, content: ContentHandle) -> Self {
        let now = SystemTime::now();
        let size = match content {
            ContentHandle::Directory(_) => DIRECTORY_SIZE,
            ContentHandle::DataMap(ref map) => map.size,
        };
        Self {
            name: name.into(),
            size,
            allocation_size: size,
            creation_time: now,
            last_status_time: now,
            last_write_time: now,
            last_access_time: now,
            content,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    pub fn file_type(&self) -> FileType {
        match self.content {
            ContentHandle::DataMap(_) => FileType::RegularFile,
            ContentHandle::Directory(_) => FileType::Directory,
        }
    }

    pub fn is_directory(&self) -> bool {
        self.file_type() == FileType::Directory
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn allocation_size(&self) -> u64 {
        self.allocation_size
    }

    pub fn creation_time(&self) -> SystemTime {
        self.creation_time
    }

    pub fn last_status_time(&self) -> SystemTime {
        self.last_status_time
    }

    pub fn last_write_time(&self) -> SystemTime {
        self.last_write_time
    }

    pub fn last_access_time(&self) -> SystemTime {
        self.last_access_time
    }

    pub fn content(&self) -> &ContentHandle {
        &self.content
    }

    pub fn data_map(&self) -> Option<&DataMap> {
        match &self.content {
            ContentHandle::DataMap(map) => Some(map),
            ContentHandle::Directory(_) => None,
        }
    }

    pub fn directory_id(&self) -> Option<DirectoryId> {
        match self.content {
            ContentHandle::Directory(id) => Some(id),
            ContentHandle::DataMap(_) => None,
        }
    }

    pub fn touch_access(&mut self) {
        self.last_access_time = later(SystemTime::now(), self.last_access_time);
    }

    /// Record a content change that left the file `new_size` bytes long.
    ///
    /// A write is also an access, so all three mutable times move together.
    pub fn touch_write(&mut self, new_size: u64) {
        self.size = new_size;
        self.allocation_size = new_size;
        let now = [
            self.last_write_time,
            self.last_status_time,
            self.last_access_time,
        ]
        .into_iter()
        .fold(SystemTime::now(), later);
        self.last_write_time = now;
        self.last_status_time = now;
        self.last_access_time = now;
    }

    /// Record a metadata-only change such as a rename.
    pub fn touch_status(&mut self) {
        self.last_status_time = later(SystemTime::now(), self.last_status_time);
    }

    /// Replace the content of a regular file.
    pub fn set_data_map(&mut self, map: DataMap) -> Result<(), DriveError> {
        match &mut self.content {
            ContentHandle::DataMap(current) => {
                *current = map;
                Ok(())
            }
            ContentHandle::Directory(_) => Err(DriveError::IsDirectory(self.name.clone())),
        }
    }
}

fn later(a: SystemTime, b: SystemTime) -> SystemTime {
    a.max(b)
}
