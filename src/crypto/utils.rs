//! Utility functions for cryptographic operations and content naming.

use multihash::Multihash;
use rand::RngCore;
use sha2::{Digest, Sha256};

use super::aes::AES_IV_SIZE;

/// Multicodec code for SHA2-256.
const SHA2_256_CODE: u64 = 0x12;

/// Generate cryptographically secure random bytes.
pub fn generate_random_bytes(len: usize) -> Vec<u8> {
    let mut buf = vec![0u8; len];
    rand::rngs::OsRng.fill_bytes(&mut buf);
    buf
}

/// Generate a random 32-byte identifier (directory ids, drive ids).
pub fn generate_id() -> [u8; 32] {
    let mut id = [0u8; 32];
    rand::rngs::OsRng.fill_bytes(&mut id);
    id
}

/// Generate a random 12-byte IV.
pub fn generate_iv() -> [u8; AES_IV_SIZE] {
    let mut iv = [0u8; AES_IV_SIZE];
    rand::rngs::OsRng.fill_bytes(&mut iv);
    iv
}

/// Content name for a blob: hex-encoded SHA2-256 multihash of its bytes.
///
/// Chunks are named by their ciphertext, so the name doubles as an integrity
/// check on retrieval.
pub fn content_name(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    // A 32-byte digest always fits a 64-byte multihash.
    match Multihash::<64>::wrap(SHA2_256_CODE, &digest) {
        Ok(mh) => hex::encode(mh.to_bytes()),
        Err(_) => hex::encode(digest),
    }
}

/// Whether `bytes` hash to `name` (see `content_name`).
pub fn verify_content_name(name: &str, bytes: &[u8]) -> bool {
    content_name(bytes) == name
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_name_is_multihash_hex() {
        let name = content_name(b"hello");
        // 0x12 code, 0x20 length, 32 digest bytes
        assert!(name.starts_with("1220"));
        assert_eq!(name.len(), 68);
    }

    #[test]
    fn test_verify_content_name() {
        let name = content_name(b"chunk");
        assert!(verify_content_name(&name, b"chunk"));
        assert!(!verify_content_name(&name, b"chunk!"));
    }

    #[test]
    fn test_generate_id_is_random() {
        assert_ne!(generate_id(), generate_id());
        assert_eq!(generate_random_bytes(5).len(), 5);
    }
}
