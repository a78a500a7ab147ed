use std::fs::{self, Metadata};
use std::os::unix::fs::{FileTypeExt, MetadataExt};
use std::path::Path;

use nix::libc;

use crate::error::{Error, IoResultExt, Result};
use crate::types::Xattr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    Regular,
    Directory,
    Symlink,
    BlockDevice,
    CharDevice,
    Fifo,
    Socket,
}

impl FileType {
    pub fn from_metadata(meta: &Metadata) -> Self {
        let ft = meta.file_type();
        if ft.is_dir() {
            FileType::Directory
        } else if ft.is_symlink() {
            FileType::Symlink
        } else if ft.is_block_device() {
            FileType::BlockDevice
        } else if ft.is_char_device() {
            FileType::CharDevice
        } else if ft.is_fifo() {
            FileType::Fifo
        } else if ft.is_socket() {
            FileType::Socket
        } else {
            FileType::Regular
        }
    }
}

/// stat of a filesystem entry, as far as the store cares about it
#[derive(Debug, Clone)]
pub struct FileMetadata {
    pub file_type: FileType,
    pub uid: u32,
    pub gid: u32,
    /// full st_mode, including the file type bits
    pub mode: u32,
    pub size: u64,
    /// device major/minor for block/char devices
    pub rdev: Option<(u32, u32)>,
    pub ino: u64,
    pub dev: u64,
    pub nlink: u64,
    /// modification time as (seconds, nanoseconds)
    pub mtime: (i64, i64),
}

impl FileMetadata {
    /// stat without following symlinks
    pub fn from_path(path: &Path) -> Result<Self> {
        let meta = fs::symlink_metadata(path).with_path(path)?;
        Ok(Self::from_std_metadata(&meta))
    }

    pub fn from_std_metadata(meta: &Metadata) -> Self {
        let rdev = if meta.file_type().is_block_device() || meta.file_type().is_char_device() {
            let rdev = meta.rdev();
            Some((
                nix::sys::stat::major(rdev) as u32,
                nix::sys::stat::minor(rdev) as u32,
            ))
        } else {
            None
        };

        Self {
            file_type: FileType::from_metadata(meta),
            uid: meta.uid(),
            gid: meta.gid(),
            mode: meta.mode(),
            size: meta.len(),
            rdev,
            ino: meta.ino(),
            dev: meta.dev(),
            nlink: meta.nlink(),
            mtime: (meta.mtime(), meta.mtime_nsec()),
        }
    }

    /// regular file with more than one name
    pub fn could_be_hardlink(&self) -> bool {
        self.file_type == FileType::Regular && self.nlink > 1
    }
}

/// read all extended attributes of a path (not following symlinks), sorted by name
pub fn read_xattrs(path: &Path) -> Result<Vec<Xattr>> {
    let names: Vec<_> = match xattr::list(path) {
        Ok(iter) => iter.collect(),
        Err(e)
            if e.raw_os_error() == Some(libc::ENOTSUP)
                || e.raw_os_error() == Some(libc::EOPNOTSUPP)
                || e.raw_os_error() == Some(libc::ENODATA) =>
        {
            return Ok(vec![]);
        }
        Err(e) => {
            return Err(Error::Xattr {
                path: path.to_path_buf(),
                message: format!("failed to list: {}", e),
            })
        }
    };

    let mut xattrs = Vec::with_capacity(names.len());
    for name in names {
        let name_str = name.to_string_lossy().into_owned();
        match xattr::get(path, &name) {
            Ok(Some(value)) => xattrs.push(Xattr::new(name_str, value)),
            // removed between list and get
            Ok(None) => {}
            Err(e) if e.raw_os_error() == Some(libc::ENODATA) => {}
            Err(e) => {
                tracing::warn!(path = %path.display(), xattr = %name_str, "skipping unreadable xattr: {}", e);
            }
        }
    }

    xattrs.sort();
    Ok(xattrs)
}

pub fn read_symlink_target(path: &Path) -> Result<String> {
    let target = fs::read_link(path).with_path(path)?;
    Ok(target.to_string_lossy().into_owned())
}
