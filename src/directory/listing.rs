//! Directory listing and its sealed storage form.
//!
//! A listing is serialized to JSON, sealed with AES-256-GCM under a key
//! derived from `(parent id, directory id)`, and stored as
//! `{ "iv": "<hex>", "data": "<base64>" }` under a name derived from the same
//! pair.

use std::collections::BTreeMap;

use base64::Engine;
use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

use crate::crypto::aes::{seal_aes_gcm, unseal_aes_gcm, AES_IV_SIZE};
use crate::crypto::hkdf::derive_listing_key;
use crate::crypto::utils::content_name;
use crate::drive::{normalize, DirectoryId, MetaData};

use super::DirectoryError;

pub const LISTING_VERSION: &str = "v1";

/// Storage name of the listing of `directory_id` under `parent_id`.
pub fn listing_name(parent_id: &DirectoryId, directory_id: &DirectoryId) -> String {
    let mut address = Vec::with_capacity(64);
    address.extend_from_slice(parent_id.as_bytes());
    address.extend_from_slice(directory_id.as_bytes());
    content_name(&address)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectoryListing {
    version: String,
    directory_id: DirectoryId,
    /// Keyed by NFC-normalized name.
    children: BTreeMap<String, MetaData>,
}

#[derive(Serialize, Deserialize)]
struct SealedListing {
    /// Hex-encoded 12-byte IV.
    iv: String,
    /// Base64-encoded ciphertext with auth tag.
    data: String,
}

impl DirectoryListing {
    pub fn new(directory_id: DirectoryId) -> Self {
        Self {
            version: LISTING_VERSION.to_string(),
            directory_id,
            children: BTreeMap::new(),
        }
    }

    pub fn directory_id(&self) -> DirectoryId {
        self.directory_id
    }

    pub fn get(&self, name: &str) -> Option<&MetaData> {
        self.children.get(&normalize(name))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.children.contains_key(&normalize(name))
    }

    pub fn len(&self) -> usize {
        self.children.len()
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    /// Children in name order.
    pub fn children(&self) -> impl Iterator<Item = &MetaData> {
        self.children.values()
    }

    pub fn insert(&mut self, meta_data: MetaData) -> Result<(), DirectoryError> {
        let key = normalize(meta_data.name());
        if self.children.contains_key(&key) {
            return Err(DirectoryError::AlreadyExists(meta_data.name().to_string()));
        }
        self.children.insert(key, meta_data);
        Ok(())
    }

    /// Insert or replace; returns the replaced record.
    pub fn upsert(&mut self, meta_data: MetaData) -> Option<MetaData> {
        self.children.insert(normalize(meta_data.name()), meta_data)
    }

    pub fn remove(&mut self, name: &str) -> Result<MetaData, DirectoryError> {
        self.children
            .remove(&normalize(name))
            .ok_or_else(|| DirectoryError::NotFound(name.to_string()))
    }

    /// Seal for storage under `parent_id`.
    pub fn seal(&self, parent_id: &DirectoryId) -> Result<Vec<u8>, DirectoryError> {
        let key = derive_listing_key(parent_id.as_bytes(), self.directory_id.as_bytes())?;
        let mut json = serde_json::to_vec(self).map_err(|e| {
            log::error!("Listing serialization failed: {}", e);
            DirectoryError::Serialization
        })?;
        let sealed = seal_aes_gcm(&json, &key);
        json.zeroize();
        let sealed = sealed?;

        let envelope = SealedListing {
            iv: hex::encode(&sealed[..AES_IV_SIZE]),
            data: base64::engine::general_purpose::STANDARD.encode(&sealed[AES_IV_SIZE..]),
        };
        serde_json::to_vec(&envelope).map_err(|_| DirectoryError::Serialization)
    }

    /// Open a listing stored for `directory_id` under `parent_id`.
    pub fn unseal(
        bytes: &[u8],
        parent_id: &DirectoryId,
        directory_id: &DirectoryId,
    ) -> Result<Self, DirectoryError> {
        let envelope: SealedListing = serde_json::from_slice(bytes).map_err(|e| {
            log::error!("Failed to parse sealed listing: {}", e);
            DirectoryError::Deserialization
        })?;
        let iv = hex::decode(&envelope.iv).map_err(|_| DirectoryError::Deserialization)?;
        if iv.len() != AES_IV_SIZE {
            log::error!("Invalid listing IV length: {} (expected {})", iv.len(), AES_IV_SIZE);
            return Err(DirectoryError::Deserialization);
        }
        let ciphertext = base64::engine::general_purpose::STANDARD
            .decode(&envelope.data)
            .map_err(|_| DirectoryError::Deserialization)?;

        let mut sealed = Vec::with_capacity(iv.len() + ciphertext.len());
        sealed.extend_from_slice(&iv);
        sealed.extend_from_slice(&ciphertext);

        let key = derive_listing_key(parent_id.as_bytes(), directory_id.as_bytes())?;
        let mut json = unseal_aes_gcm(&sealed, &key)?;
        let parsed: Result<Self, _> = serde_json::from_slice(&json);
        json.zeroize();

        let listing = parsed.map_err(|e| {
            log::error!("Listing deserialization failed: {}", e);
            DirectoryError::Deserialization
        })?;
        if listing.version != LISTING_VERSION {
            log::error!("Unsupported listing version: {}", listing.version);
            return Err(DirectoryError::Deserialization);
        }
        if listing.directory_id != *directory_id {
            log::error!("Listing belongs to {}, expected {}", listing.directory_id, directory_id);
            return Err(DirectoryError::Deserialization);
        }
        Ok(listing)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> (DirectoryId, DirectoryListing) {
        let parent = DirectoryId::generate();
        let mut listing = DirectoryListing::new(DirectoryId::generate());
        listing.insert(MetaData::new("notes.txt", false)).unwrap();
        listing.insert(MetaData::new("photos", true)).unwrap();
        (parent, listing)
    }

    #[test]
    fn test_seal_unseal_roundtrip() {
        let (parent, listing) = sample();
        let sealed = listing.seal(&parent).unwrap();

        let envelope: serde_json::Value = serde_json::from_slice(&sealed).unwrap();
        assert_eq!(envelope["iv"].as_str().unwrap().len(), 24);
        assert!(envelope["data"].is_string());

        let opened = DirectoryListing::unseal(&sealed, &parent, &listing.directory_id()).unwrap();
        assert_eq!(opened, listing);
    }

    #[test]
    fn test_unseal_under_other_parent_fails() {
        let (parent, listing) = sample();
        let sealed = listing.seal(&parent).unwrap();
        let other = DirectoryId::generate();
        assert!(DirectoryListing::unseal(&sealed, &other, &listing.directory_id()).is_err());
    }

    #[test]
    fn test_unseal_garbage_fails() {
        let id = DirectoryId::generate();
        assert!(matches!(
            DirectoryListing::unseal(b"not json", &id, &id),
            Err(DirectoryError::Deserialization)
        ));
    }

    #[test]
    fn test_names_are_normalized() {
        let mut listing = DirectoryListing::new(DirectoryId::generate());
        listing.insert(MetaData::new("caf\u{e9}", false)).unwrap();
        assert!(listing.contains("cafe\u{301}"));
        assert!(matches!(
            listing.insert(MetaData::new("cafe\u{301}", false)),
            Err(DirectoryError::AlreadyExists(_))
        ));
        assert!(listing.remove("cafe\u{301}").is_ok());
        assert!(listing.is_empty());
    }

    #[test]
    fn test_upsert_replaces() {
        let mut listing = DirectoryListing::new(DirectoryId::generate());
        assert!(listing.upsert(MetaData::new("a", false)).is_none());
        let mut updated = MetaData::new("a", false);
        updated.touch_write(9);
        assert!(listing.upsert(updated).is_some());
        assert_eq!(listing.get("a").unwrap().size(), 9);
        assert_eq!(listing.len(), 1);
    }

    #[test]
    fn test_listing_name_depends_on_parent() {
        let dir = DirectoryId::generate();
        assert_ne!(
            listing_name(&DirectoryId::generate(), &dir),
            listing_name(&DirectoryId::generate(), &dir)
        );
    }
}
