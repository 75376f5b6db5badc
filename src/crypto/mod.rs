//! Cryptographic primitives for the drive.
//!
//! Chunk encryption is convergent so identical content deduplicates; listings
//! are sealed under keys derived from their position in the tree; the
//! distributed storage strategy signs with the owner's Ed25519 identity.

pub mod aes;
pub mod ed25519;
pub mod hkdf;
pub mod utils;

pub use aes::{decrypt_chunk, encrypt_chunk, seal_aes_gcm, unseal_aes_gcm, AesError};
pub use ed25519::{verify_signature, OwnerIdentity};
pub use hkdf::{derive_listing_key, HkdfError};
pub use utils::{content_name, generate_id, generate_iv, verify_content_name};
