use std::fs::{self, File, Permissions};
use std::io::{Read, Write};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use nix::unistd::{Gid, Uid};

use crate::error::{Error, IoResultExt, Result};
use crate::hash::{compute_blob_hash, BlobHasher, Hash};
use crate::object::{fanout_path, install, not_found_or_io, Written};
use crate::repo::Repo;
use crate::types::Xattr;

/// write a blob from memory
///
/// the blob file itself carries uid/gid/mode/xattrs, so a hardlink to it
/// is a complete checkout of the file.
pub fn write_blob(
    repo: &Repo,
    content: &[u8],
    uid: u32,
    gid: u32,
    mode: u32,
    xattrs: &[Xattr],
) -> Result<Written> {
    let hash = compute_blob_hash(uid, gid, mode, xattrs, content);

    let path = blob_path(repo, &hash);
    if path.exists() {
        return Ok(Written::existing(hash));
    }

    let tmp_path = repo.tmp_path().join(uuid::Uuid::new_v4().to_string());
    {
        let mut tmp_file = File::create(&tmp_path).with_path(&tmp_path)?;
        tmp_file.write_all(content).with_path(&tmp_path)?;
        tmp_file.sync_all().with_path(&tmp_path)?;
    }

    finish_blob(&tmp_path, &path, uid, gid, mode, xattrs)?;
    Ok(Written::created(hash, path))
}

/// write a blob by streaming a file's content, hashing as it is copied
pub fn write_blob_from_file(
    repo: &Repo,
    source: &Path,
    uid: u32,
    gid: u32,
    mode: u32,
    xattrs: &[Xattr],
) -> Result<Written> {
    let tmp_path = repo.tmp_path().join(uuid::Uuid::new_v4().to_string());

    let mut hasher = BlobHasher::new(uid, gid, mode, xattrs);
    {
        let mut reader = File::open(source).with_path(source)?;
        let mut tmp_file = File::create(&tmp_path).with_path(&tmp_path)?;
        let mut buf = [0u8; 64 * 1024];
        loop {
            let n = reader.read(&mut buf).with_path(source)?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
            tmp_file.write_all(&buf[..n]).with_path(&tmp_path)?;
        }
        tmp_file.sync_all().with_path(&tmp_path)?;
    }

    let hash = hasher.finalize();
    let path = blob_path(repo, &hash);

    if path.exists() {
        fs::remove_file(&tmp_path).with_path(&tmp_path)?;
        return Ok(Written::existing(hash));
    }

    if let Err(e) = finish_blob(&tmp_path, &path, uid, gid, mode, xattrs) {
        let _ = fs::remove_file(&tmp_path);
        return Err(e);
    }
    Ok(Written::created(hash, path))
}

/// apply blob metadata to the temp file, then move it into place
fn finish_blob(
    tmp_path: &Path,
    path: &Path,
    uid: u32,
    gid: u32,
    mode: u32,
    xattrs: &[Xattr],
) -> Result<()> {
    // permissions before chown, so we still have write access
    fs::set_permissions(tmp_path, Permissions::from_mode(mode & 0o7777)).with_path(tmp_path)?;

    // skip chown when it already matches, so unprivileged imports work
    let current_uid = nix::unistd::getuid().as_raw();
    let current_gid = nix::unistd::getgid().as_raw();
    if uid != current_uid || gid != current_gid {
        nix::unistd::chown(tmp_path, Some(Uid::from_raw(uid)), Some(Gid::from_raw(gid)))
            .map_err(|e| Error::Io {
                path: tmp_path.to_path_buf(),
                source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, e),
            })?;
    }

    for xattr in xattrs {
        xattr::set(tmp_path, &xattr.name, &xattr.value).map_err(|e| Error::Xattr {
            path: tmp_path.to_path_buf(),
            message: format!("failed to set {}: {}", xattr.name, e),
        })?;
    }

    install(tmp_path, path)
}

/// get the filesystem path to a blob
pub fn blob_path(repo: &Repo, hash: &Hash) -> PathBuf {
    fanout_path(&repo.blobs_path(), hash)
}

pub fn blob_exists(repo: &Repo, hash: &Hash) -> bool {
    blob_path(repo, hash).exists()
}

/// read blob content
pub fn read_blob(repo: &Repo, hash: &Hash) -> Result<Vec<u8>> {
    let path = blob_path(repo, hash);
    fs::read(&path).map_err(|e| not_found_or_io(e, hash, &path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::MetadataExt;
    use tempfile::tempdir;

    fn test_repo() -> (tempfile::TempDir, Repo) {
        let dir = tempdir().unwrap();
        let repo = Repo::init(&dir.path().join("repo")).unwrap();
        (dir, repo)
    }

    fn current_ids() -> (u32, u32) {
        (nix::unistd::getuid().as_raw(), nix::unistd::getgid().as_raw())
    }

    #[test]
    fn test_write_and_read_blob() {
        let (_dir, repo) = test_repo();
        let (uid, gid) = current_ids();

        let written = write_blob(&repo, b"hello, world!", uid, gid, 0o644, &[]).unwrap();

        assert!(blob_exists(&repo, &written.hash));
        assert_eq!(read_blob(&repo, &written.hash).unwrap(), b"hello, world!");

        let meta = fs::metadata(blob_path(&repo, &written.hash)).unwrap();
        assert_eq!(meta.mode() & 0o777, 0o644);
    }

    #[test]
    fn test_blob_deduplication() {
        let (_dir, repo) = test_repo();
        let (uid, gid) = current_ids();

        let first = write_blob(&repo, b"duplicate", uid, gid, 0o644, &[]).unwrap();
        let second = write_blob(&repo, b"duplicate", uid, gid, 0o644, &[]).unwrap();

        assert_eq!(first.hash, second.hash);
        assert!(first.created.is_some());
        assert!(second.created.is_none());
    }

    #[test]
    fn test_different_mode_different_blob() {
        let (_dir, repo) = test_repo();
        let (uid, gid) = current_ids();

        let h1 = write_blob(&repo, b"same", uid, gid, 0o644, &[]).unwrap().hash;
        let h2 = write_blob(&repo, b"same", uid, gid, 0o755, &[]).unwrap().hash;

        assert_ne!(h1, h2);
    }

    #[test]
    fn test_blob_from_file_matches_memory_write() {
        let (dir, repo) = test_repo();
        let (uid, gid) = current_ids();

        let source = dir.path().join("source");
        fs::write(&source, b"streamed content").unwrap();

        let streamed = write_blob_from_file(&repo, &source, uid, gid, 0o600, &[]).unwrap();
        let direct = write_blob(&repo, b"streamed content", uid, gid, 0o600, &[]).unwrap();

        assert_eq!(streamed.hash, direct.hash);
        assert!(direct.created.is_none());
    }

    #[test]
    fn test_blob_from_file_dedup_cleans_tmp() {
        let (dir, repo) = test_repo();
        let (uid, gid) = current_ids();

        let source = dir.path().join("source");
        fs::write(&source, b"abc").unwrap();

        write_blob_from_file(&repo, &source, uid, gid, 0o644, &[]).unwrap();
        write_blob_from_file(&repo, &source, uid, gid, 0o644, &[]).unwrap();

        assert_eq!(fs::read_dir(repo.tmp_path()).unwrap().count(), 0);
    }

    #[test]
    fn test_read_nonexistent_blob() {
        let (_dir, repo) = test_repo();
        assert!(matches!(
            read_blob(&repo, &Hash::ZERO),
            Err(Error::ObjectNotFound(_))
        ));
    }

    #[test]
    fn test_blob_with_xattrs() {
        let (_dir, repo) = test_repo();
        let (uid, gid) = current_ids();

        let xattrs = vec![Xattr::new("user.test", vec![1, 2, 3])];
        let h1 = write_blob(&repo, b"content", uid, gid, 0o644, &xattrs).unwrap().hash;
        let h2 = write_blob(&repo, b"content", uid, gid, 0o644, &[]).unwrap().hash;
        assert_ne!(h1, h2);

        let stored = xattr::get(blob_path(&repo, &h1), "user.test").unwrap();
        assert_eq!(stored, Some(vec![1, 2, 3]));
    }
}
