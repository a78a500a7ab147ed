use std::collections::HashMap;
use std::fs;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};

use crate::fs::FileMetadata;
use crate::hash::Hash;
use crate::types::Xattr;

/// what a materialized file was when it came out of the store
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlobIdentity {
    pub hash: Hash,
    pub uid: u32,
    pub gid: u32,
    pub mode: u32,
    pub xattrs: Vec<Xattr>,
    pub size: u64,
    pub mtime: (i64, i64),
}

impl BlobIdentity {
    /// identity of the file at `meta`, holding blob `hash` with `xattrs`
    pub fn new(hash: Hash, meta: &FileMetadata, xattrs: Vec<Xattr>) -> Self {
        Self {
            hash,
            uid: meta.uid,
            gid: meta.gid,
            mode: meta.mode,
            xattrs,
            size: meta.size,
            mtime: meta.mtime,
        }
    }

    /// the file still hashes to `self.hash` if it is about to be stored with
    /// these attributes and has not been written to since checkout
    pub fn still_matches(&self, meta: &FileMetadata, xattrs: &[Xattr]) -> bool {
        self.uid == meta.uid
            && self.gid == meta.gid
            && self.mode == meta.mode
            && self.size == meta.size
            && self.mtime == meta.mtime
            && self.xattrs == xattrs
    }
}

/// per-run cache shared by every layer checkout and the final commit
///
/// `files` maps the (dev, ino) of each file materialized in the scratch
/// root to the blob it came from, so the commit can skip re-hashing it.
/// `copies` maps a blob to a copy already made in the scratch root, so a
/// copy-mode checkout links repeated blobs instead of copying them again.
#[derive(Debug, Default)]
pub struct DevInoCache {
    files: HashMap<(u64, u64), BlobIdentity>,
    copies: HashMap<Hash, (PathBuf, u64, u64)>,
}

impl DevInoCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, dev: u64, ino: u64, identity: BlobIdentity) {
        self.files.insert((dev, ino), identity);
    }

    pub fn lookup(&self, dev: u64, ino: u64) -> Option<&BlobIdentity> {
        self.files.get(&(dev, ino))
    }

    /// whether the inode was materialized by a checkout in this run
    ///
    /// such inodes are shared by every path that held the same blob, so their
    /// link count says nothing about hardlinks in the merged tree.
    pub fn contains(&self, dev: u64, ino: u64) -> bool {
        self.files.contains_key(&(dev, ino))
    }

    pub fn record_copy(&mut self, hash: Hash, path: PathBuf, dev: u64, ino: u64) {
        self.copies.insert(hash, (path, dev, ino));
    }

    /// a live copy of `hash` in the scratch root
    ///
    /// the path is re-checked, since later layers may have removed or
    /// replaced it.
    pub fn find_copy(&self, hash: &Hash) -> Option<&Path> {
        let (path, dev, ino) = self.copies.get(hash)?;
        let meta = fs::symlink_metadata(path).ok()?;
        (meta.is_file() && meta.dev() == *dev && meta.ino() == *ino).then_some(path.as_path())
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_identity_matches_until_changed() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("file");
        fs::write(&path, "content").unwrap();

        let meta = FileMetadata::from_path(&path).unwrap();
        let identity = BlobIdentity::new(Hash::ZERO, &meta, vec![]);

        assert!(identity.still_matches(&meta, &[]));
        assert!(!identity.still_matches(&meta, &[Xattr::new("user.x", b"1".to_vec())]));

        fs::write(&path, "longer content").unwrap();
        let changed = FileMetadata::from_path(&path).unwrap();
        assert!(!identity.still_matches(&changed, &[]));
    }

    #[test]
    fn test_record_and_lookup() {
        let mut cache = DevInoCache::new();
        assert!(cache.is_empty());

        let dir = tempdir().unwrap();
        let path = dir.path().join("file");
        fs::write(&path, "x").unwrap();
        let meta = FileMetadata::from_path(&path).unwrap();

        cache.record(meta.dev, meta.ino, BlobIdentity::new(Hash::ZERO, &meta, vec![]));
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.lookup(meta.dev, meta.ino).unwrap().hash, Hash::ZERO);
        assert!(cache.lookup(meta.dev, meta.ino + 1).is_none());
        assert!(cache.contains(meta.dev, meta.ino));
        assert!(!cache.contains(meta.dev, meta.ino + 1));
    }

    #[test]
    fn test_find_copy_revalidates() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("copy");
        fs::write(&path, "x").unwrap();
        let meta = FileMetadata::from_path(&path).unwrap();

        let mut cache = DevInoCache::new();
        cache.record_copy(Hash::ZERO, path.clone(), meta.dev, meta.ino);
        assert_eq!(cache.find_copy(&Hash::ZERO), Some(path.as_path()));

        fs::remove_file(&path).unwrap();
        assert!(cache.find_copy(&Hash::ZERO).is_none());
    }
}
