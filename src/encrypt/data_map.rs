//! Data map: the durable pointer to a file's encrypted content.

use serde::{Deserialize, Serialize};

/// Reference to one stored chunk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkRef {
    /// Position of the chunk in the file, in units of the map's chunk size.
    pub index: u64,
    /// Content name of the ciphertext.
    pub name: String,
    /// Convergent key (SHA-256 of the plaintext).
    #[serde(with = "hex_key")]
    pub key: [u8; 32],
    /// Plaintext length.
    pub size: u64,
}

/// Chunk references for a file, ordered by index. Indices missing from
/// `chunks` are holes: all-zero ranges that were never stored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataMap {
    /// Chunk layout the map was written with; 0 for a map that never held data.
    pub chunk_size: u64,
    pub size: u64,
    pub chunks: Vec<ChunkRef>,
}

impl DataMap {
    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// Names of every stored chunk, in order.
    pub fn chunk_names(&self) -> impl Iterator<Item = &str> {
        self.chunks.iter().map(|c| c.name.as_str())
    }
}

/// A chunk produced by finalizing a stream that still has to be stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedChunk {
    pub name: String,
    pub bytes: Vec<u8>,
}

mod hex_key {
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(key: &[u8; 32], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(key))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<[u8; 32], D::Error> {
        let s = String::deserialize(deserializer)?;
        let bytes = hex::decode(&s).map_err(D::Error::custom)?;
        bytes
            .try_into()
            .map_err(|_| D::Error::custom("chunk key must be 32 bytes"))
    }
}
