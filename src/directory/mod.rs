//! Directory persistence: sealed listings and the handler that keeps them in
//! storage.

pub mod handler;
pub mod listing;

pub use handler::DirectoryListingHandler;
pub use listing::{listing_name, DirectoryListing, LISTING_VERSION};

use std::fmt;

use thiserror::Error;

use crate::crypto::aes::AesError;
use crate::crypto::hkdf::HkdfError;
use crate::storage::StorageError;

/// The steps of moving an entry between listings, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveStep {
    /// Re-home the moved entry under its new lineage.
    UpdateLineage,
    /// Store the destination listing with the entry added.
    PersistNewListing,
    /// Store the source listing with the entry removed.
    UpdateOldListing,
}

impl fmt::Display for MoveStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let step = match self {
            MoveStep::UpdateLineage => "update lineage",
            MoveStep::PersistNewListing => "persist new listing",
            MoveStep::UpdateOldListing => "update old listing",
        };
        f.write_str(step)
    }
}

#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("No entry named {0}")]
    NotFound(String),
    #[error("An entry named {0} already exists")]
    AlreadyExists(String),
    #[error("Directory {0} is not empty")]
    NotEmpty(String),
    #[error("{0} is not a directory")]
    NotADirectory(String),
    #[error("Invalid entry name {0:?}")]
    InvalidName(String),
    #[error("Cannot move {0} into itself")]
    InvalidMove(String),
    #[error("Listing encryption failed")]
    Encryption(#[from] AesError),
    #[error("Listing key derivation failed")]
    KeyDerivation(#[from] HkdfError),
    #[error("Listing serialization failed")]
    Serialization,
    #[error("Listing deserialization failed")]
    Deserialization,
    #[error("Listing storage failed")]
    Storage(#[from] StorageError),
    #[error("Move failed at step '{step}' (rolled back: {rolled_back})")]
    PartialMoveFailure {
        step: MoveStep,
        rolled_back: bool,
        #[source]
        source: Box<DirectoryError>,
    },
}
