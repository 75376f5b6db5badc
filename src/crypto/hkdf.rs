//! HKDF-SHA256 derivation of directory listing keys.
//!
//! A listing is sealed under a key that depends on where it lives in the tree:
//!
//!   parent directory id (salt) + directory id (ikm)
//!     -> HKDF-SHA256(info="cipherbox-drive-listing-v1")
//!     -> 32-byte AES-256-GCM key
//!
//! Moving a directory therefore changes both its storage name and its key.

use hkdf::Hkdf;
use sha2::Sha256;
use thiserror::Error;
use zeroize::Zeroizing;

use super::aes::AES_KEY_SIZE;

/// HKDF info for listing key derivation.
const LISTING_HKDF_INFO: &[u8] = b"cipherbox-drive-listing-v1";

#[derive(Debug, Error)]
pub enum HkdfError {
    #[error("HKDF derivation failed")]
    DerivationFailed,
}

/// Derive the AES key sealing the listing of `directory_id` under `parent_id`.
pub fn derive_listing_key(
    parent_id: &[u8; 32],
    directory_id: &[u8; 32],
) -> Result<Zeroizing<[u8; AES_KEY_SIZE]>, HkdfError> {
    let hk = Hkdf::<Sha256>::new(Some(parent_id), directory_id);
    let mut okm = Zeroizing::new([0u8; AES_KEY_SIZE]);
    hk.expand(LISTING_HKDF_INFO, &mut okm[..])
        .map_err(|_| HkdfError::DerivationFailed)?;
    Ok(okm)
}
