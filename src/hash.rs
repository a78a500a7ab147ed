use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

use crate::types::Xattr;
use crate::Error;

/// SHA-256 hash used for content addressing
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Hash([u8; 32]);

impl Hash {
    /// zero hash (useful as sentinel)
    pub const ZERO: Hash = Hash([0u8; 32]);

    /// hash arbitrary bytes (trees and commits are addressed this way)
    pub fn digest(data: &[u8]) -> Self {
        Self(Sha256::digest(data).into())
    }

    /// parse from hex string
    pub fn from_hex(s: &str) -> crate::Result<Self> {
        let bytes = hex::decode(s).map_err(|_| Error::InvalidHashHex(s.to_string()))?;
        let arr: [u8; 32] = bytes
            .try_into()
            .map_err(|_| Error::InvalidHashHex(s.to_string()))?;
        Ok(Self(arr))
    }

    /// is this string a full hex object id
    pub fn looks_like_hex(s: &str) -> bool {
        s.len() == 64 && s.chars().all(|c| c.is_ascii_hexdigit())
    }

    /// get raw bytes
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// convert to hex string
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// first 12 hex chars, for log lines
    pub fn short(&self) -> String {
        self.to_hex()[..12].to_string()
    }

    /// split into path components for object store
    /// returns (first 2 hex chars, remaining 62 hex chars)
    pub fn to_path_components(&self) -> (String, String) {
        let hex = self.to_hex();
        (hex[..2].to_string(), hex[2..].to_string())
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash({})", self.short())
    }
}

impl Serialize for Hash {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Hash {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

/// symlink mode constant for deterministic hashing
pub const SYMLINK_MODE: u32 = 0o120777;

/// compute blob hash over (uid, gid, mode, xattrs, content)
///
/// format:
///   uid: 4 bytes LE
///   gid: 4 bytes LE
///   mode: 4 bytes LE
///   xattr_count: 4 bytes LE
///   for each xattr (sorted by name):
///     name_len: 4 bytes LE
///     name: bytes
///     value_len: 4 bytes LE
///     value: bytes
///   content: bytes
pub fn compute_blob_hash(uid: u32, gid: u32, mode: u32, xattrs: &[Xattr], content: &[u8]) -> Hash {
    let mut hasher = BlobHasher::new(uid, gid, mode, xattrs);
    hasher.update(content);
    hasher.finalize()
}

/// incremental blob hasher, fed while streaming file content into the store
pub struct BlobHasher {
    hasher: Sha256,
}

impl BlobHasher {
    /// create new hasher, writing header and xattrs immediately
    pub fn new(uid: u32, gid: u32, mode: u32, xattrs: &[Xattr]) -> Self {
        let mut hasher = Sha256::new();

        hasher.update(uid.to_le_bytes());
        hasher.update(gid.to_le_bytes());
        hasher.update(mode.to_le_bytes());

        let mut sorted: Vec<_> = xattrs.iter().collect();
        sorted.sort_by(|a, b| a.name.as_bytes().cmp(b.name.as_bytes()));

        hasher.update((sorted.len() as u32).to_le_bytes());
        for xattr in sorted {
            hasher.update((xattr.name.len() as u32).to_le_bytes());
            hasher.update(xattr.name.as_bytes());
            hasher.update((xattr.value.len() as u32).to_le_bytes());
            hasher.update(&xattr.value);
        }

        Self { hasher }
    }

    pub fn update(&mut self, data: &[u8]) {
        self.hasher.update(data);
    }

    pub fn finalize(self) -> Hash {
        Hash(self.hasher.finalize().into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "abcdef0123456789abcdef0123456789abcdef0123456789abcdef0123456789";

    #[test]
    fn test_hash_hex_roundtrip() {
        let original = Hash::from_hex(SAMPLE).unwrap();
        assert_eq!(original.to_hex(), SAMPLE);
        assert_eq!(original.short(), "abcdef012345");
    }

    #[test]
    fn test_hash_invalid_hex() {
        assert!(Hash::from_hex("not valid hex").is_err());
        assert!(Hash::from_hex("abcd").is_err());
        assert!(Hash::from_hex(&format!("{}ff", SAMPLE)).is_err());
    }

    #[test]
    fn test_looks_like_hex() {
        assert!(Hash::looks_like_hex(SAMPLE));
        assert!(!Hash::looks_like_hex("ocilayer/abc"));
        assert!(!Hash::looks_like_hex(&SAMPLE[1..]));
    }

    #[test]
    fn test_hash_path_components() {
        let h = Hash::from_hex(SAMPLE).unwrap();
        let (dir, file) = h.to_path_components();
        assert_eq!(dir, "ab");
        assert_eq!(file, &SAMPLE[2..]);
    }

    #[test]
    fn test_blob_hash_covers_metadata() {
        let base = compute_blob_hash(0, 0, 0o644, &[], b"hello");
        assert_eq!(base, compute_blob_hash(0, 0, 0o644, &[], b"hello"));
        assert_ne!(base, compute_blob_hash(1, 0, 0o644, &[], b"hello"));
        assert_ne!(base, compute_blob_hash(0, 1, 0o644, &[], b"hello"));
        assert_ne!(base, compute_blob_hash(0, 0, 0o755, &[], b"hello"));
        assert_ne!(base, compute_blob_hash(0, 0, 0o644, &[], b"world"));
    }

    #[test]
    fn test_blob_hash_label_changes_identity() {
        let label = vec![Xattr::new(
            "security.selinux",
            b"system_u:object_r:bin_t:s0".to_vec(),
        )];
        let plain = compute_blob_hash(0, 0, 0o755, &[], b"#!/bin/sh");
        let labeled = compute_blob_hash(0, 0, 0o755, &label, b"#!/bin/sh");
        assert_ne!(plain, labeled);
    }

    #[test]
    fn test_blob_hash_xattr_ordering() {
        let x1 = vec![Xattr::new("user.a", vec![1]), Xattr::new("user.b", vec![2])];
        let x2 = vec![Xattr::new("user.b", vec![2]), Xattr::new("user.a", vec![1])];

        assert_eq!(
            compute_blob_hash(0, 0, 0o644, &x1, b"hello"),
            compute_blob_hash(0, 0, 0o644, &x2, b"hello")
        );
    }

    #[test]
    fn test_streaming_hasher_matches_direct() {
        let direct = compute_blob_hash(0, 0, 0o644, &[], b"helloworld");

        let mut streaming = BlobHasher::new(0, 0, 0o644, &[]);
        streaming.update(b"hello");
        streaming.update(b"world");

        assert_eq!(direct, streaming.finalize());
    }

    #[test]
    fn test_hash_serde_json() {
        let h = Hash::from_hex(SAMPLE).unwrap();
        let json = serde_json::to_string(&h).unwrap();
        assert_eq!(json, format!("\"{}\"", SAMPLE));
        let parsed: Hash = serde_json::from_str(&json).unwrap();
        assert_eq!(h, parsed);
    }
}
