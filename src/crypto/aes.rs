//! AES-256-GCM sealing for listings and convergent encryption for chunks.
//!
//! Sealed format: IV (12 bytes) || Ciphertext || Auth Tag (16 bytes).
//!
//! Chunks use convergent encryption: the key is the SHA-256 of the plaintext
//! and the nonce is derived from the key, so identical plaintext always yields
//! identical ciphertext (and therefore the same content name).

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use sha2::{Digest, Sha256};
use thiserror::Error;

use super::utils::generate_iv;

/// AES-256-GCM key size in bytes (256 bits).
pub const AES_KEY_SIZE: usize = 32;

/// AES-GCM IV size in bytes (96 bits).
pub const AES_IV_SIZE: usize = 12;

/// AES-GCM authentication tag size in bytes (128 bits).
pub const AES_TAG_SIZE: usize = 16;

/// Minimum sealed data size: IV + auth tag (empty plaintext).
const MIN_SEALED_SIZE: usize = AES_IV_SIZE + AES_TAG_SIZE;

/// Domain separator for convergent nonce derivation.
const CHUNK_NONCE_INFO: &[u8] = b"cipherbox-drive-chunk-nonce-v1";

#[derive(Debug, Error)]
pub enum AesError {
    #[error("Encryption failed")]
    EncryptionFailed,
    #[error("Decryption failed")]
    DecryptionFailed,
}

/// Encrypt data using AES-256-GCM.
///
/// Returns ciphertext with the 16-byte auth tag appended.
pub fn encrypt_aes_gcm(
    plaintext: &[u8],
    key: &[u8; AES_KEY_SIZE],
    iv: &[u8; AES_IV_SIZE],
) -> Result<Vec<u8>, AesError> {
    let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| AesError::EncryptionFailed)?;
    let nonce = Nonce::from_slice(iv);

    cipher
        .encrypt(nonce, plaintext)
        .map_err(|_| AesError::EncryptionFailed)
}

/// Decrypt data using AES-256-GCM.
///
/// Expects ciphertext with the 16-byte auth tag appended.
pub fn decrypt_aes_gcm(
    ciphertext: &[u8],
    key: &[u8; AES_KEY_SIZE],
    iv: &[u8; AES_IV_SIZE],
) -> Result<Vec<u8>, AesError> {
    let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| AesError::DecryptionFailed)?;
    let nonce = Nonce::from_slice(iv);

    cipher
        .decrypt(nonce, ciphertext)
        .map_err(|_| AesError::DecryptionFailed)
}

/// Seal data using AES-256-GCM with a random IV.
///
/// Returns: IV (12 bytes) || Ciphertext || Auth Tag (16 bytes)
pub fn seal_aes_gcm(plaintext: &[u8], key: &[u8; AES_KEY_SIZE]) -> Result<Vec<u8>, AesError> {
    let iv = generate_iv();
    let ciphertext = encrypt_aes_gcm(plaintext, key, &iv)?;

    let mut sealed = Vec::with_capacity(AES_IV_SIZE + ciphertext.len());
    sealed.extend_from_slice(&iv);
    sealed.extend_from_slice(&ciphertext);
    Ok(sealed)
}

/// Unseal data produced by `seal_aes_gcm`.
pub fn unseal_aes_gcm(sealed: &[u8], key: &[u8; AES_KEY_SIZE]) -> Result<Vec<u8>, AesError> {
    if sealed.len() < MIN_SEALED_SIZE {
        return Err(AesError::DecryptionFailed);
    }

    let iv: [u8; AES_IV_SIZE] = sealed[..AES_IV_SIZE]
        .try_into()
        .map_err(|_| AesError::DecryptionFailed)?;
    let ciphertext = &sealed[AES_IV_SIZE..];

    decrypt_aes_gcm(ciphertext, key, &iv)
}

/// Derive the convergent key for a chunk: SHA-256 of its plaintext.
pub fn convergent_key(plaintext: &[u8]) -> [u8; AES_KEY_SIZE] {
    Sha256::digest(plaintext).into()
}

fn convergent_nonce(key: &[u8; AES_KEY_SIZE]) -> [u8; AES_IV_SIZE] {
    let mut hasher = Sha256::new();
    hasher.update(CHUNK_NONCE_INFO);
    hasher.update(key);
    let digest = hasher.finalize();

    let mut nonce = [0u8; AES_IV_SIZE];
    nonce.copy_from_slice(&digest[..AES_IV_SIZE]);
    nonce
}

/// Encrypt a chunk convergently. Returns `(key, ciphertext)`.
pub fn encrypt_chunk(plaintext: &[u8]) -> Result<([u8; AES_KEY_SIZE], Vec<u8>), AesError> {
    let key = convergent_key(plaintext);
    let nonce = convergent_nonce(&key);
    let ciphertext = encrypt_aes_gcm(plaintext, &key, &nonce)?;
    Ok((key, ciphertext))
}

/// Decrypt a chunk produced by `encrypt_chunk`.
///
/// Also checks that the plaintext hashes back to `key`, so a chunk decrypted
/// under the wrong reference is rejected rather than returned.
pub fn decrypt_chunk(ciphertext: &[u8], key: &[u8; AES_KEY_SIZE]) -> Result<Vec<u8>, AesError> {
    let nonce = convergent_nonce(key);
    let plaintext = decrypt_aes_gcm(ciphertext, key, &nonce)?;
    if convergent_key(&plaintext) != *key {
        return Err(AesError::DecryptionFailed);
    }
    Ok(plaintext)
}
