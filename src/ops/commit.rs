use std::collections::HashMap;
use std::fs;
use std::path::Path;

use walkdir::WalkDir;

use crate::error::{IoResultExt, Result};
use crate::fs::{read_symlink_target, read_xattrs, FileMetadata, FileType, HardlinkTracker};
use crate::hash::{Hash, SYMLINK_MODE};
use crate::label::NoLabels;
use crate::repo::Repo;
use crate::store::CommitModifier;
use crate::txn::Transaction;
use crate::types::{Commit, EntryKind, Tree, TreeEntry, Xattr};

/// author recorded on commits this crate creates
pub const COMMIT_AUTHOR: &str = "ocizub";

/// commit a directory tree to a ref
pub fn commit(
    repo: &Repo,
    source: &Path,
    ref_name: &str,
    message: Option<&str>,
    author: Option<&str>,
) -> Result<Hash> {
    commit_with_metadata(repo, source, ref_name, message, author, &[])
}

/// commit a directory tree to a ref with custom metadata
///
/// the previous value of the ref, if any, becomes the parent.
pub fn commit_with_metadata(
    repo: &Repo,
    source: &Path,
    ref_name: &str,
    message: Option<&str>,
    author: Option<&str>,
    metadata: &[(&str, &str)],
) -> Result<Hash> {
    let modifier = CommitModifier {
        labeler: &NoLabels,
        xattrs: repo.config().xattrs,
        devino: None,
    };

    let mut txn = Transaction::begin(repo)?;
    let tree_hash = write_tree_from_directory(&mut txn, source, &modifier)?;
    let parents = txn.ref_value(ref_name)?.into_iter().collect();

    let mut commit = Commit::new(
        tree_hash,
        parents,
        author.unwrap_or(COMMIT_AUTHOR),
        message.unwrap_or(""),
    );
    for (key, value) in metadata {
        commit = commit.with_metadata(*key, *value);
    }

    let commit_hash = txn.write_commit(&commit)?;
    txn.set_ref(ref_name, &commit_hash)?;
    txn.commit()?;

    tracing::info!(ref_name, commit = %commit_hash.short(), "committed {}", source.display());
    Ok(commit_hash)
}

/// write a directory into the store as a tree, returning the root tree hash
///
/// the directory itself carries no entry; everything below it is recorded
/// with ownership, mode and the xattrs the modifier selects.
pub fn write_tree_from_directory(
    txn: &mut Transaction<'_>,
    dir: &Path,
    modifier: &CommitModifier<'_>,
) -> Result<Hash> {
    let mut writer = TreeWriter {
        txn,
        modifier,
        hardlinks: HardlinkTracker::new(),
        relabeled: HashMap::new(),
        reused: 0,
    };
    let hash = writer.write_dir(dir, "")?;

    if writer.reused > 0 {
        tracing::debug!(reused = writer.reused, "blobs reused from checkout cache");
    }
    Ok(hash)
}

struct TreeWriter<'t, 'r, 'm> {
    txn: &'t mut Transaction<'r>,
    modifier: &'m CommitModifier<'m>,
    hardlinks: HardlinkTracker,
    relabeled: HashMap<(u64, u64), Vec<(Vec<Xattr>, Hash)>>,
    reused: usize,
}

impl TreeWriter<'_, '_, '_> {
    fn write_dir(&mut self, dir: &Path, prefix: &str) -> Result<Hash> {
        let mut dir_entries: Vec<_> = fs::read_dir(dir)
            .with_path(dir)?
            .collect::<std::io::Result<Vec<_>>>()
            .with_path(dir)?;
        dir_entries.sort_by_key(|e| e.file_name());

        let mut entries = Vec::with_capacity(dir_entries.len());
        for entry in dir_entries {
            let path = entry.path();
            let name = entry.file_name().to_string_lossy().into_owned();
            let logical_path = if prefix.is_empty() {
                name.clone()
            } else {
                format!("{}/{}", prefix, name)
            };

            let meta = FileMetadata::from_path(&path)?;
            let xattrs = self.entry_xattrs(&path, &logical_path, meta.mode)?;

            let kind = match meta.file_type {
                FileType::Regular => self.regular(&path, &logical_path, &meta, &xattrs)?,

                FileType::Symlink => {
                    let target = read_symlink_target(&path)?;
                    let hash = self.txn.write_blob(
                        target.as_bytes(),
                        meta.uid,
                        meta.gid,
                        SYMLINK_MODE,
                        &xattrs,
                    )?;
                    EntryKind::symlink(hash)
                }

                FileType::Directory => {
                    let subtree = self.write_dir(&path, &logical_path)?;
                    EntryKind::directory(subtree, meta.uid, meta.gid, meta.mode, xattrs)
                }

                FileType::BlockDevice => {
                    let (major, minor) = meta.rdev.unwrap_or((0, 0));
                    EntryKind::BlockDevice {
                        major,
                        minor,
                        uid: meta.uid,
                        gid: meta.gid,
                        mode: meta.mode,
                        xattrs,
                    }
                }

                FileType::CharDevice => {
                    let (major, minor) = meta.rdev.unwrap_or((0, 0));
                    EntryKind::CharDevice {
                        major,
                        minor,
                        uid: meta.uid,
                        gid: meta.gid,
                        mode: meta.mode,
                        xattrs,
                    }
                }

                FileType::Fifo => EntryKind::Fifo {
                    uid: meta.uid,
                    gid: meta.gid,
                    mode: meta.mode,
                    xattrs,
                },

                FileType::Socket => EntryKind::Socket {
                    uid: meta.uid,
                    gid: meta.gid,
                    mode: meta.mode,
                    xattrs,
                },
            };

            entries.push(TreeEntry::new(name, kind));
        }

        let tree = Tree::new(entries)?;
        self.txn.write_tree(&tree)
    }

    fn regular(
        &mut self,
        path: &Path,
        logical_path: &str,
        meta: &FileMetadata,
        xattrs: &[Xattr],
    ) -> Result<EntryKind> {
        let cached = self
            .modifier
            .devino
            .and_then(|cache| cache.lookup(meta.dev, meta.ino))
            .filter(|identity| identity.still_matches(meta, xattrs));
        if let Some(identity) = cached {
            self.reused += 1;
            return Ok(EntryKind::regular(identity.hash, meta.size));
        }

        let from_checkout = self
            .modifier
            .devino
            .is_some_and(|cache| cache.contains(meta.dev, meta.ino));
        if from_checkout {
            return self.relabeled(path, meta, xattrs);
        }

        if meta.could_be_hardlink() {
            if let Some(target) = self.hardlinks.check(meta.dev, meta.ino, logical_path) {
                return Ok(EntryKind::hardlink(target));
            }
        }

        let hash = self
            .txn
            .write_blob_from_file(path, meta.uid, meta.gid, meta.mode, xattrs)?;
        Ok(EntryKind::regular(hash, meta.size))
    }

    /// a checked-out file whose attributes no longer match its blob
    ///
    /// every path stays a regular entry with its own xattrs; paths sharing the
    /// inode and ending up with the same xattrs are hashed once.
    fn relabeled(
        &mut self,
        path: &Path,
        meta: &FileMetadata,
        xattrs: &[Xattr],
    ) -> Result<EntryKind> {
        let key = (meta.dev, meta.ino);
        let known = self
            .relabeled
            .get(&key)
            .and_then(|seen| seen.iter().find(|(known, _)| known.as_slice() == xattrs))
            .map(|(_, hash)| *hash);
        if let Some(hash) = known {
            self.reused += 1;
            return Ok(EntryKind::regular(hash, meta.size));
        }

        let hash = self
            .txn
            .write_blob_from_file(path, meta.uid, meta.gid, meta.mode, xattrs)?;
        self.relabeled
            .entry(key)
            .or_default()
            .push((xattrs.to_vec(), hash));
        Ok(EntryKind::regular(hash, meta.size))
    }

    /// on-disk xattrs when preserved, with the policy label merged in
    fn entry_xattrs(&self, path: &Path, logical_path: &str, mode: u32) -> Result<Vec<Xattr>> {
        let mut xattrs = if self.modifier.xattrs.preserves() {
            read_xattrs(path)?
        } else {
            Vec::new()
        };

        if let Some(label) = self.modifier.labeler.label(Path::new(logical_path), mode)? {
            Xattr::upsert(&mut xattrs, label);
        }
        Ok(xattrs)
    }
}

/// count regular files below a directory
pub fn count_files(path: &Path) -> usize {
    WalkDir::new(path)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::XattrMode;
    use crate::fs::{BlobIdentity, DevInoCache};
    use crate::label::Labeler;
    use crate::object::{blob_exists, read_commit, read_tree};
    use crate::refs::resolve_ref;
    use std::os::unix::fs::symlink;
    use tempfile::tempdir;

    fn test_repo() -> (tempfile::TempDir, Repo) {
        let dir = tempdir().unwrap();
        let repo = Repo::init(&dir.path().join("repo")).unwrap();
        (dir, repo)
    }

    fn root_tree(repo: &Repo, commit: &Hash) -> Tree {
        let commit = read_commit(repo, commit).unwrap();
        read_tree(repo, &commit.tree).unwrap()
    }

    struct UserLabels;

    impl Labeler for UserLabels {
        fn label(&self, path: &Path, _mode: u32) -> Result<Option<Xattr>> {
            Ok(Some(Xattr::new("user.label", path.to_string_lossy().as_bytes().to_vec())))
        }
    }

    #[test]
    fn test_commit_single_file() {
        let (dir, repo) = test_repo();

        let source = dir.path().join("source");
        fs::create_dir(&source).unwrap();
        fs::write(source.join("hello.txt"), "world").unwrap();

        let hash = commit(&repo, &source, "ocilayer/abc", Some("test commit"), None).unwrap();

        assert_eq!(resolve_ref(&repo, "ocilayer/abc").unwrap(), hash);
        let tree = root_tree(&repo, &hash);
        assert_eq!(tree.len(), 1);
        assert!(tree.get("hello.txt").unwrap().kind.is_regular());
        assert_eq!(count_files(&source), 1);
    }

    #[test]
    fn test_commit_nested_directories() {
        let (dir, repo) = test_repo();

        let source = dir.path().join("source");
        fs::create_dir_all(source.join("a/b/c")).unwrap();
        fs::write(source.join("a/b/c/file.txt"), "deep").unwrap();
        fs::write(source.join("top.txt"), "top").unwrap();

        let hash = commit(&repo, &source, "nested", None, None).unwrap();
        let tree = root_tree(&repo, &hash);

        let Some(EntryKind::Directory { hash: sub, .. }) = tree.get("a").map(|e| &e.kind) else {
            panic!("expected directory");
        };
        assert!(read_tree(&repo, sub).unwrap().get("b").is_some());
    }

    #[test]
    fn test_commit_symlink_and_hardlink() {
        let (dir, repo) = test_repo();

        let source = dir.path().join("source");
        fs::create_dir(&source).unwrap();
        symlink("/target/path", source.join("link")).unwrap();
        fs::write(source.join("original"), "content").unwrap();
        fs::hard_link(source.join("original"), source.join("twin")).unwrap();

        let hash = commit(&repo, &source, "links", None, None).unwrap();
        let tree = root_tree(&repo, &hash);

        assert!(tree.get("link").unwrap().kind.is_symlink());
        assert!(tree.get("original").unwrap().kind.is_regular());
        assert_eq!(tree.get("twin").unwrap().kind, EntryKind::hardlink("original"));
    }

    #[test]
    fn test_commit_links_parent() {
        let (dir, repo) = test_repo();

        let source = dir.path().join("source");
        fs::create_dir(&source).unwrap();
        fs::write(source.join("file.txt"), "v1").unwrap();
        let first = commit(&repo, &source, "versioned", Some("v1"), None).unwrap();

        fs::write(source.join("file.txt"), "v2").unwrap();
        let second = commit(&repo, &source, "versioned", Some("v2"), None).unwrap();

        let commit2 = read_commit(&repo, &second).unwrap();
        assert_eq!(commit2.parents, vec![first]);
        assert_eq!(commit2.author, COMMIT_AUTHOR);
    }

    #[test]
    fn test_commit_empty_directory() {
        let (dir, repo) = test_repo();

        let source = dir.path().join("source");
        fs::create_dir(&source).unwrap();

        let hash = commit(&repo, &source, "empty", None, None).unwrap();
        assert!(root_tree(&repo, &hash).is_empty());
    }

    #[test]
    fn test_labels_are_recorded_on_entries() {
        let (dir, repo) = test_repo();

        let source = dir.path().join("source");
        fs::create_dir_all(source.join("etc")).unwrap();
        fs::write(source.join("etc/hosts"), "127.0.0.1").unwrap();

        let modifier = CommitModifier {
            labeler: &UserLabels,
            xattrs: XattrMode::Skip,
            devino: None,
        };
        let mut txn = Transaction::begin(&repo).unwrap();
        let root = write_tree_from_directory(&mut txn, &source, &modifier).unwrap();
        txn.commit().unwrap();

        let tree = read_tree(&repo, &root).unwrap();
        let EntryKind::Directory { hash, xattrs, .. } = &tree.get("etc").unwrap().kind else {
            panic!("expected directory");
        };
        assert_eq!(xattrs, &vec![Xattr::new("user.label", b"etc".to_vec())]);

        let etc = read_tree(&repo, hash).unwrap();
        let EntryKind::Regular { hash: blob, .. } = &etc.get("hosts").unwrap().kind else {
            panic!("expected regular file");
        };
        let (uid, gid) = (nix::unistd::getuid().as_raw(), nix::unistd::getgid().as_raw());
        let meta = FileMetadata::from_path(&source.join("etc/hosts")).unwrap();
        let expected = crate::hash::compute_blob_hash(
            uid,
            gid,
            meta.mode,
            &[Xattr::new("user.label", b"etc/hosts".to_vec())],
            b"127.0.0.1",
        );
        assert_eq!(blob, &expected);
    }

    #[test]
    fn test_devino_cache_hit_skips_rehash() {
        let (dir, repo) = test_repo();

        let source = dir.path().join("source");
        fs::create_dir(&source).unwrap();
        fs::write(source.join("big"), "pretend this is large").unwrap();

        // a cached identity with a hash that is not the content hash proves
        // the content was not read again
        let meta = FileMetadata::from_path(&source.join("big")).unwrap();
        let sentinel = Hash::from_hex(&"5".repeat(64)).unwrap();
        let mut cache = DevInoCache::new();
        cache.record(meta.dev, meta.ino, BlobIdentity::new(sentinel, &meta, vec![]));

        let modifier = CommitModifier {
            labeler: &NoLabels,
            xattrs: XattrMode::Skip,
            devino: Some(&cache),
        };
        let mut txn = Transaction::begin(&repo).unwrap();
        let root = write_tree_from_directory(&mut txn, &source, &modifier).unwrap();
        txn.commit().unwrap();

        let tree = read_tree(&repo, &root).unwrap();
        assert_eq!(tree.get("big").unwrap().kind, EntryKind::regular(sentinel, meta.size));
        assert!(!blob_exists(&repo, &sentinel));
    }

    #[test]
    fn test_devino_cache_miss_after_modification() {
        let (dir, repo) = test_repo();

        let source = dir.path().join("source");
        fs::create_dir(&source).unwrap();
        fs::write(source.join("file"), "before").unwrap();

        let meta = FileMetadata::from_path(&source.join("file")).unwrap();
        let sentinel = Hash::from_hex(&"6".repeat(64)).unwrap();
        let mut cache = DevInoCache::new();
        cache.record(meta.dev, meta.ino, BlobIdentity::new(sentinel, &meta, vec![]));

        fs::write(source.join("file"), "after, and longer").unwrap();

        let modifier = CommitModifier {
            labeler: &NoLabels,
            xattrs: XattrMode::Skip,
            devino: Some(&cache),
        };
        let mut txn = Transaction::begin(&repo).unwrap();
        let root = write_tree_from_directory(&mut txn, &source, &modifier).unwrap();
        txn.commit().unwrap();

        let tree = read_tree(&repo, &root).unwrap();
        let hash = *tree.get("file").unwrap().kind.hash().unwrap();
        assert_ne!(hash, sentinel);
        assert!(blob_exists(&repo, &hash));
    }

    #[test]
    fn test_shared_checkout_inode_keeps_per_path_labels() {
        let (dir, repo) = test_repo();

        // two paths sharing one checked-out inode, as a hardlink checkout of
        // two layers holding the same blob leaves them
        let source = dir.path().join("source");
        fs::create_dir_all(source.join("etc")).unwrap();
        fs::create_dir_all(source.join("var")).unwrap();
        fs::write(source.join("etc/a"), "same").unwrap();
        fs::hard_link(source.join("etc/a"), source.join("var/b")).unwrap();
        fs::write(source.join("var/c"), "same").unwrap();
        fs::hard_link(source.join("var/c"), source.join("var/d")).unwrap();

        let meta = FileMetadata::from_path(&source.join("etc/a")).unwrap();
        let sentinel = Hash::from_hex(&"7".repeat(64)).unwrap();
        let mut cache = DevInoCache::new();
        cache.record(meta.dev, meta.ino, BlobIdentity::new(sentinel, &meta, vec![]));

        let modifier = CommitModifier {
            labeler: &UserLabels,
            xattrs: XattrMode::Skip,
            devino: Some(&cache),
        };
        let mut txn = Transaction::begin(&repo).unwrap();
        let root = write_tree_from_directory(&mut txn, &source, &modifier).unwrap();
        txn.commit().unwrap();

        let tree = read_tree(&repo, &root).unwrap();
        let blob_of = |dir: &str, name: &str| {
            let hash = *tree.get(dir).unwrap().kind.hash().unwrap();
            let sub = read_tree(&repo, &hash).unwrap();
            match &sub.get(name).unwrap().kind {
                EntryKind::Regular { hash, .. } => *hash,
                other => panic!("{}/{} is not a regular file: {:?}", dir, name, other),
            }
        };

        let labeled = |path: &str| {
            crate::hash::compute_blob_hash(
                meta.uid,
                meta.gid,
                meta.mode,
                &[Xattr::new("user.label", path.as_bytes().to_vec())],
                b"same",
            )
        };
        assert_eq!(blob_of("etc", "a"), labeled("etc/a"));
        assert_eq!(blob_of("var", "b"), labeled("var/b"));
        assert_ne!(blob_of("etc", "a"), blob_of("var", "b"));

        // links that did not come from a checkout are still recorded as links
        let var = read_tree(&repo, tree.get("var").unwrap().kind.hash().unwrap()).unwrap();
        assert_eq!(var.get("d").unwrap().kind, EntryKind::hardlink("var/c"));
    }

    #[test]
    fn test_shared_checkout_inode_with_equal_labels_hashed_once() {
        let (dir, repo) = test_repo();

        let source = dir.path().join("source");
        fs::create_dir(&source).unwrap();
        fs::write(source.join("one"), "same").unwrap();
        fs::hard_link(source.join("one"), source.join("two")).unwrap();

        let meta = FileMetadata::from_path(&source.join("one")).unwrap();
        let stale = Hash::from_hex(&"8".repeat(64)).unwrap();
        let mut cache = DevInoCache::new();
        cache.record(
            meta.dev,
            meta.ino,
            BlobIdentity::new(stale, &meta, vec![Xattr::new("user.label", b"old".to_vec())]),
        );

        let modifier = CommitModifier {
            labeler: &NoLabels,
            xattrs: XattrMode::Skip,
            devino: Some(&cache),
        };
        let mut txn = Transaction::begin(&repo).unwrap();
        let root = write_tree_from_directory(&mut txn, &source, &modifier).unwrap();
        txn.commit().unwrap();

        let tree = read_tree(&repo, &root).unwrap();
        let one = tree.get("one").unwrap().kind.clone();
        assert!(one.is_regular());
        assert_eq!(tree.get("two").unwrap().kind, one);
        assert_ne!(*one.hash().unwrap(), stale);
    }
}
