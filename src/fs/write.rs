use std::ffi::CString;
use std::fs::{self, Permissions};
use std::os::unix::fs::{symlink, PermissionsExt};
use std::path::Path;

use nix::libc;
use nix::sys::stat::{makedev, mknod, Mode, SFlag};
use nix::unistd::{chown, Gid, Uid};

use crate::error::{Error, IoResultExt, Result};
use crate::types::Xattr;

/// create a symlink, replacing whatever is at `path`
pub fn create_symlink(
    path: &Path,
    target: &str,
    uid: u32,
    gid: u32,
    xattrs: &[Xattr],
) -> Result<()> {
    remove_path(path)?;
    symlink(target, path).with_path(path)?;

    // symlinks have no mode of their own, only ownership
    if !is_current_owner(uid, gid) {
        let c_path = CString::new(path.as_os_str().as_encoded_bytes()).map_err(|_| Error::Io {
            path: path.to_path_buf(),
            source: std::io::Error::new(std::io::ErrorKind::InvalidInput, "invalid path"),
        })?;
        let ret = unsafe { libc::lchown(c_path.as_ptr(), uid, gid) };
        if ret != 0 {
            return Err(Error::Io {
                path: path.to_path_buf(),
                source: std::io::Error::last_os_error(),
            });
        }
    }

    // linux refuses user.* on symlinks; the entry is still usable without them
    for xattr in xattrs {
        if let Err(e) = xattr::set(path, &xattr.name, &xattr.value) {
            tracing::warn!(path = %path.display(), xattr = %xattr.name, "cannot set xattr on symlink: {}", e);
        }
    }

    Ok(())
}

pub fn create_block_device(
    path: &Path,
    major: u32,
    minor: u32,
    uid: u32,
    gid: u32,
    mode: u32,
    xattrs: &[Xattr],
) -> Result<()> {
    create_device_node(path, SFlag::S_IFBLK, major, minor, uid, gid, mode, xattrs)
}

pub fn create_char_device(
    path: &Path,
    major: u32,
    minor: u32,
    uid: u32,
    gid: u32,
    mode: u32,
    xattrs: &[Xattr],
) -> Result<()> {
    create_device_node(path, SFlag::S_IFCHR, major, minor, uid, gid, mode, xattrs)
}

pub fn create_fifo(path: &Path, uid: u32, gid: u32, mode: u32, xattrs: &[Xattr]) -> Result<()> {
    remove_path(path)?;

    nix::unistd::mkfifo(path, Mode::from_bits_truncate(mode)).map_err(|e| Error::Io {
        path: path.to_path_buf(),
        source: std::io::Error::from(e),
    })?;

    apply_metadata(path, uid, gid, mode, xattrs)
}

/// sockets cannot be recreated without binding; mknod one when privileged, else skip
pub fn create_socket_placeholder(
    path: &Path,
    uid: u32,
    gid: u32,
    mode: u32,
    xattrs: &[Xattr],
) -> Result<()> {
    remove_path(path)?;

    match mknod(path, SFlag::S_IFSOCK, Mode::from_bits_truncate(mode), makedev(0, 0)) {
        Ok(()) => apply_metadata(path, uid, gid, mode, xattrs),
        Err(nix::errno::Errno::EPERM) => {
            tracing::warn!(path = %path.display(), "cannot create socket without privileges, skipping");
            Ok(())
        }
        Err(e) => Err(Error::Io {
            path: path.to_path_buf(),
            source: std::io::Error::from(e),
        }),
    }
}

/// hardlink `link_path` to `target_path`, replacing whatever is at `link_path`
pub fn create_hardlink(link_path: &Path, target_path: &Path) -> Result<()> {
    remove_path(link_path)?;
    fs::hard_link(target_path, link_path).with_path(link_path)
}

/// set xattrs, ownership and mode on an existing path, in that order
pub fn apply_metadata(path: &Path, uid: u32, gid: u32, mode: u32, xattrs: &[Xattr]) -> Result<()> {
    // xattrs first, while we still have write permission
    for xattr in xattrs {
        xattr::set(path, &xattr.name, &xattr.value).map_err(|e| Error::Xattr {
            path: path.to_path_buf(),
            message: format!("failed to set {}: {}", xattr.name, e),
        })?;
    }

    // unprivileged runs can only keep their own ownership
    if !is_current_owner(uid, gid) {
        chown(path, Some(Uid::from_raw(uid)), Some(Gid::from_raw(gid))).map_err(|e| Error::Io {
            path: path.to_path_buf(),
            source: std::io::Error::from(e),
        })?;
    }

    fs::set_permissions(path, Permissions::from_mode(mode & 0o7777)).with_path(path)
}

/// remove a file, symlink or whole directory tree; missing paths are fine
pub fn remove_path(path: &Path) -> Result<()> {
    match fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => fs::remove_dir_all(path).with_path(path),
        Ok(_) => fs::remove_file(path).with_path(path),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(Error::Io {
            path: path.to_path_buf(),
            source: e,
        }),
    }
}

/// remove every child of a directory, keeping the directory itself
pub fn clear_directory(path: &Path) -> Result<()> {
    for entry in fs::read_dir(path).with_path(path)? {
        let entry = entry.with_path(path)?;
        remove_path(&entry.path())?;
    }
    Ok(())
}

/// make sure the owner can add and remove entries in a directory
///
/// lower layers may ship read-only directories; the final mode is
/// restored by `apply_metadata` once the directory is populated.
pub fn ensure_writable_dir(path: &Path) -> Result<()> {
    let meta = fs::metadata(path).with_path(path)?;
    let mode = meta.permissions().mode();
    if mode & 0o700 != 0o700 {
        fs::set_permissions(path, Permissions::from_mode((mode | 0o700) & 0o7777))
            .with_path(path)?;
    }
    Ok(())
}

fn is_current_owner(uid: u32, gid: u32) -> bool {
    uid == nix::unistd::getuid().as_raw() && gid == nix::unistd::getgid().as_raw()
}

#[allow(clippy::too_many_arguments)]
fn create_device_node(
    path: &Path,
    sflag: SFlag,
    major: u32,
    minor: u32,
    uid: u32,
    gid: u32,
    mode: u32,
    xattrs: &[Xattr],
) -> Result<()> {
    remove_path(path)?;

    let dev = makedev(major as u64, minor as u64);
    mknod(path, sflag, Mode::from_bits_truncate(mode), dev).map_err(|e| {
        if e == nix::errno::Errno::EPERM {
            Error::DeviceNodePermission(path.to_path_buf())
        } else {
            Error::Io {
                path: path.to_path_buf(),
                source: std::io::Error::from(e),
            }
        }
    })?;

    apply_metadata(path, uid, gid, mode, xattrs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::{FileTypeExt, MetadataExt};
    use tempfile::tempdir;

    fn current_ids() -> (u32, u32) {
        (nix::unistd::getuid().as_raw(), nix::unistd::getgid().as_raw())
    }

    #[test]
    fn test_create_symlink_replaces_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("link");
        let (uid, gid) = current_ids();
        fs::write(&path, "was a file").unwrap();

        create_symlink(&path, "/target/path", uid, gid, &[]).unwrap();

        assert!(path.symlink_metadata().unwrap().file_type().is_symlink());
        assert_eq!(fs::read_link(&path).unwrap().to_string_lossy(), "/target/path");
    }

    #[test]
    fn test_create_fifo() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("fifo");
        let (uid, gid) = current_ids();

        create_fifo(&path, uid, gid, 0o644, &[]).unwrap();

        assert!(fs::metadata(&path).unwrap().file_type().is_fifo());
    }

    #[test]
    fn test_create_hardlink_replaces_directory() {
        let dir = tempdir().unwrap();
        let original = dir.path().join("original");
        let link = dir.path().join("link");
        fs::write(&original, "content").unwrap();
        fs::create_dir_all(link.join("nested")).unwrap();

        create_hardlink(&link, &original).unwrap();

        let orig_meta = fs::metadata(&original).unwrap();
        let link_meta = fs::metadata(&link).unwrap();
        assert_eq!(orig_meta.ino(), link_meta.ino());
    }

    #[test]
    fn test_apply_metadata_mode() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("file");
        let (uid, gid) = current_ids();
        fs::write(&path, "content").unwrap();

        apply_metadata(&path, uid, gid, 0o100600, &[]).unwrap();

        assert_eq!(fs::metadata(&path).unwrap().mode() & 0o777, 0o600);
    }

    #[test]
    fn test_remove_path_variants() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("file");
        let tree = dir.path().join("tree");
        fs::write(&file, "x").unwrap();
        fs::create_dir_all(tree.join("a/b")).unwrap();
        fs::write(tree.join("a/b/c"), "y").unwrap();

        remove_path(&file).unwrap();
        remove_path(&tree).unwrap();
        remove_path(&dir.path().join("missing")).unwrap();

        assert!(!file.exists());
        assert!(!tree.exists());
    }

    #[test]
    fn test_clear_directory() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("target");
        fs::create_dir_all(target.join("sub")).unwrap();
        fs::write(target.join("file"), "x").unwrap();

        clear_directory(&target).unwrap();

        assert!(target.is_dir());
        assert_eq!(fs::read_dir(&target).unwrap().count(), 0);
    }

    #[test]
    fn test_ensure_writable_dir() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("ro");
        fs::create_dir(&target).unwrap();
        fs::set_permissions(&target, Permissions::from_mode(0o555)).unwrap();

        ensure_writable_dir(&target).unwrap();

        assert_eq!(fs::metadata(&target).unwrap().mode() & 0o777, 0o755);
    }
}
