//! Ed25519 owner identity for the distributed storage strategy.
//!
//! Entries in a distributed store are addressed by the owner's public key
//! material: the owner name is the content name of the 32-byte public key,
//! and every mutation carries a signature over `name || payload`.

use ed25519_dalek::{Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use thiserror::Error;
use zeroize::Zeroize;

use super::utils::content_name;

/// Ed25519 public key size in bytes.
pub const ED25519_PUBLIC_KEY_SIZE: usize = 32;

/// Ed25519 private key size in bytes.
pub const ED25519_PRIVATE_KEY_SIZE: usize = 32;

/// Ed25519 signature size in bytes.
pub const ED25519_SIGNATURE_SIZE: usize = 64;

#[derive(Debug, Error)]
pub enum Ed25519Error {
    #[error("Invalid private key size")]
    InvalidPrivateKeySize,
}

/// Signing identity of a drive owner.
pub struct OwnerIdentity {
    signing_key: SigningKey,
}

impl OwnerIdentity {
    /// Generate a fresh identity.
    pub fn generate() -> Self {
        Self {
            signing_key: SigningKey::generate(&mut OsRng),
        }
    }

    /// Restore an identity from a 32-byte private key.
    pub fn from_private_key(private_key: &[u8]) -> Result<Self, Ed25519Error> {
        let mut key_bytes: [u8; ED25519_PRIVATE_KEY_SIZE] = private_key
            .try_into()
            .map_err(|_| Ed25519Error::InvalidPrivateKeySize)?;
        let signing_key = SigningKey::from_bytes(&key_bytes);
        key_bytes.zeroize();
        Ok(Self { signing_key })
    }

    pub fn public_key(&self) -> [u8; ED25519_PUBLIC_KEY_SIZE] {
        self.signing_key.verifying_key().to_bytes()
    }

    /// Storage-facing owner name derived from the public key.
    pub fn owner_name(&self) -> String {
        owner_name_for(&self.public_key())
    }

    /// Sign `entry_name || payload`.
    pub fn sign(&self, entry_name: &str, payload: &[u8]) -> Vec<u8> {
        let message = signed_message(entry_name, payload);
        self.signing_key.sign(&message).to_bytes().to_vec()
    }
}

impl std::fmt::Debug for OwnerIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OwnerIdentity")
            .field("owner", &self.owner_name())
            .finish()
    }
}

/// Owner name for a raw public key.
pub fn owner_name_for(public_key: &[u8; ED25519_PUBLIC_KEY_SIZE]) -> String {
    content_name(public_key)
}

fn signed_message(entry_name: &str, payload: &[u8]) -> Vec<u8> {
    let mut message = Vec::with_capacity(entry_name.len() + payload.len());
    message.extend_from_slice(entry_name.as_bytes());
    message.extend_from_slice(payload);
    message
}

/// Verify a signature made by `OwnerIdentity::sign`.
///
/// Returns true if valid, false otherwise. Never panics.
pub fn verify_signature(
    entry_name: &str,
    payload: &[u8],
    signature: &[u8],
    public_key: &[u8],
) -> bool {
    let Ok(sig_bytes) = <[u8; ED25519_SIGNATURE_SIZE]>::try_from(signature) else {
        return false;
    };
    let Ok(key_bytes) = <[u8; ED25519_PUBLIC_KEY_SIZE]>::try_from(public_key) else {
        return false;
    };
    let Ok(verifying_key) = VerifyingKey::from_bytes(&key_bytes) else {
        return false;
    };

    let sig = ed25519_dalek::Signature::from_bytes(&sig_bytes);
    verifying_key
        .verify(&signed_message(entry_name, payload), &sig)
        .is_ok()
}
