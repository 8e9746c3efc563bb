//! Content-address primitives: a SHA-256 hash newtype shared by blobs, versions, and branch ids.
//!
//! `ObjectHash` always hashes uncompressed bytes; on-disk compression is applied underneath
//! and never changes identity (see [`crate::internal::object::store`]).

use std::{fmt::Display, io, str::FromStr};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Hex length of a full SHA-256 hash.
pub const HEX_LEN: usize = 64;
/// Minimum prefix length accepted for short-hash resolution (see §4.G).
pub const MIN_SHORT_HASH_LEN: usize = 4;

/// A SHA-256 content hash, used for both `blob_hash` and `version_hash`.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize, Serialize)]
pub struct ObjectHash([u8; 32]);

impl Default for ObjectHash {
    fn default() -> Self {
        ObjectHash([0u8; 32])
    }
}

impl Display for ObjectHash {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl std::fmt::Debug for ObjectHash {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "ObjectHash({})", hex::encode(self.0))
    }
}

impl AsRef<[u8]> for ObjectHash {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl FromStr for ObjectHash {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != HEX_LEN {
            return Err(format!("invalid hash length: got {}, expected {HEX_LEN}", s.len()));
        }
        let bytes = hex::decode(s).map_err(|e| e.to_string())?;
        let mut h = [0u8; 32];
        h.copy_from_slice(&bytes);
        Ok(ObjectHash(h))
    }
}

impl ObjectHash {
    /// Hash of the empty byte string, the canonical empty-blob identity (see §8 boundary cases).
    pub fn empty() -> ObjectHash {
        ObjectHash::of(&[])
    }

    /// Compute the hash of raw content.
    pub fn of(data: &[u8]) -> ObjectHash {
        let mut hasher = Sha256::new();
        hasher.update(data);
        let digest = hasher.finalize();
        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(&digest);
        ObjectHash(bytes)
    }

    /// Compute a `version_hash` by canonically serialising the event tuple described in §4.E
    /// step 5: `(blob_hash, parent_version_hash, timestamp, branch_id, path)`.
    ///
    /// The serialisation is delimited with NUL bytes and length-prefixed strings so that no
    /// combination of field boundaries can collide.
    pub fn for_version_event(
        blob_hash: &ObjectHash,
        parent_version_hash: Option<&ObjectHash>,
        timestamp_millis: i64,
        branch_id: &str,
        file_path: &str,
    ) -> ObjectHash {
        let mut buf = Vec::with_capacity(128);
        buf.extend_from_slice(blob_hash.as_ref());
        match parent_version_hash {
            Some(p) => {
                buf.push(1);
                buf.extend_from_slice(p.as_ref());
            }
            None => buf.push(0),
        }
        buf.push(0);
        buf.extend_from_slice(&timestamp_millis.to_be_bytes());
        buf.push(0);
        buf.extend_from_slice(&(branch_id.len() as u32).to_be_bytes());
        buf.extend_from_slice(branch_id.as_bytes());
        buf.push(0);
        buf.extend_from_slice(&(file_path.len() as u32).to_be_bytes());
        buf.extend_from_slice(file_path.as_bytes());
        ObjectHash::of(&buf)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<ObjectHash, String> {
        if bytes.len() != 32 {
            return Err(format!("invalid byte length: got {}, expected 32", bytes.len()));
        }
        let mut h = [0u8; 32];
        h.copy_from_slice(bytes);
        Ok(ObjectHash(h))
    }

    pub fn from_stream(data: &mut impl io::Read) -> io::Result<ObjectHash> {
        let mut h = [0u8; 32];
        data.read_exact(&mut h)?;
        Ok(ObjectHash(h))
    }

    pub fn to_data(self) -> Vec<u8> {
        self.0.to_vec()
    }

    /// Fan-out directory pair used by the object store: first two hex chars, remaining hex.
    pub fn fanout(&self) -> (String, String) {
        let full = self.to_string();
        (full[..2].to_string(), full[2..].to_string())
    }

    /// Whether `prefix` (lowercased hex) is a prefix of this hash's hex form.
    pub fn has_prefix(&self, prefix: &str) -> bool {
        self.to_string().starts_with(&prefix.to_ascii_lowercase())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hashes_known_vector() {
        let h = ObjectHash::of(b"Hello, world!");
        assert_eq!(
            h.to_string(),
            "315f5bdb76d078c43b8ac0064e4a0164612b1fce77c869345bfc94c75894edd3"
        );
    }

    #[test]
    fn empty_blob_has_canonical_hash() {
        assert_eq!(
            ObjectHash::empty().to_string(),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn roundtrips_through_hex() {
        let h = ObjectHash::of(b"roundtrip");
        let parsed: ObjectHash = h.to_string().parse().unwrap();
        assert_eq!(h, parsed);
    }

    #[test]
    fn rejects_wrong_length() {
        assert!("abcd".parse::<ObjectHash>().is_err());
    }

    #[test]
    fn version_event_hash_is_sensitive_to_every_field() {
        let blob = ObjectHash::of(b"content");
        let a = ObjectHash::for_version_event(&blob, None, 1000, "main", "a.txt");
        let b = ObjectHash::for_version_event(&blob, None, 1000, "main", "b.txt");
        assert_ne!(a, b);
    }

    #[test]
    fn fanout_splits_first_two_chars() {
        let h = ObjectHash::of(b"x");
        let (dir, rest) = h.fanout();
        assert_eq!(dir.len(), 2);
        assert_eq!(rest.len(), 62);
        assert_eq!(format!("{dir}{rest}"), h.to_string());
    }
}
