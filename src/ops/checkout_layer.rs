use std::fs::{self, Permissions};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use crate::config::{CheckoutMode, Config, XattrMode};
use crate::error::{Error, IoResultExt, Result};
use crate::fs::{
    apply_metadata, clear_directory, create_block_device, create_char_device, create_fifo,
    create_hardlink, create_socket_placeholder, create_symlink, ensure_writable_dir, read_xattrs,
    remove_path, BlobIdentity, CheckoutHardlinkTracker, DevInoCache, FileMetadata,
};
use crate::hash::Hash;
use crate::object::{blob_path, read_blob, read_commit, read_tree};
use crate::refs::resolve_ref;
use crate::repo::Repo;
use crate::types::{EntryKind, Tree, TreeEntry, Xattr};

/// aufs-style whiteout prefix: `.wh.<name>` deletes `<name>`
const WHITEOUT_PREFIX: &str = ".wh.";

/// aufs-style metadata prefix; `.wh..wh..opq` is the only one with a meaning
const WHITEOUT_META_PREFIX: &str = ".wh..wh.";

/// marks a directory as opaque: lower layers' content is hidden
const OPAQUE_MARKER: &str = ".wh..wh..opq";

/// overlayfs opaque directory xattr
const OVERLAY_OPAQUE_XATTR: &str = "trusted.overlay.opaque";

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LayerCheckoutOptions {
    pub mode: CheckoutMode,
    pub xattrs: XattrMode,
}

impl LayerCheckoutOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            mode: config.import.checkout,
            xattrs: config.xattrs,
        }
    }
}

/// check a commit out on top of whatever `dest` already holds
///
/// entries overwrite same-path entries from earlier checkouts, directories
/// merge, and whiteout markers delete paths instead of being written.
pub fn checkout_layer(
    repo: &Repo,
    rev: &Hash,
    dest: &Path,
    cache: &mut DevInoCache,
    opts: &LayerCheckoutOptions,
) -> Result<()> {
    let commit = read_commit(repo, rev)?;
    let tree = read_tree(repo, &commit.tree)?;

    fs::create_dir_all(dest).with_path(dest)?;

    let mut layer = LayerCheckout {
        repo,
        opts,
        root: dest,
        cache,
        links: CheckoutHardlinkTracker::new(),
    };
    layer.checkout_dir(&tree, dest, "")?;
    layer.link_deferred()
}

/// check a ref out into an empty (or missing) directory
pub fn checkout(repo: &Repo, ref_name: &str, target: &Path, opts: &LayerCheckoutOptions) -> Result<()> {
    let rev = resolve_ref(repo, ref_name)?;

    if target.exists() {
        let is_empty = target.read_dir().with_path(target)?.next().is_none();
        if !is_empty {
            return Err(Error::TargetNotEmpty(target.to_path_buf()));
        }
    }

    checkout_layer(repo, &rev, target, &mut DevInoCache::new(), opts)
}

enum Whiteout<'a> {
    Opaque,
    Remove(&'a str),
    /// aufs bookkeeping entries, never materialized
    Ignore,
}

fn whiteout_of(entry: &TreeEntry) -> Option<Whiteout<'_>> {
    let name = entry.name.as_str();
    if name == OPAQUE_MARKER {
        return Some(Whiteout::Opaque);
    }
    if name.starts_with(WHITEOUT_META_PREFIX) {
        return Some(Whiteout::Ignore);
    }
    if let Some(target) = name.strip_prefix(WHITEOUT_PREFIX) {
        return Some(match target {
            "" | "." | ".." => Whiteout::Ignore,
            target => Whiteout::Remove(target),
        });
    }
    entry.kind.is_overlay_whiteout().then_some(Whiteout::Remove(name))
}

fn is_opaque_dir(xattrs: &[Xattr]) -> bool {
    xattrs
        .iter()
        .any(|x| x.name == OVERLAY_OPAQUE_XATTR && x.value == b"y")
}

struct LayerCheckout<'a> {
    repo: &'a Repo,
    opts: &'a LayerCheckoutOptions,
    root: &'a Path,
    cache: &'a mut DevInoCache,
    links: CheckoutHardlinkTracker,
}

impl LayerCheckout<'_> {
    fn checkout_dir(&mut self, tree: &Tree, target: &Path, prefix: &str) -> Result<()> {
        ensure_writable_dir(target)?;

        // whiteouts only ever hide lower layers, so they go before this layer's entries
        for entry in tree.entries() {
            match whiteout_of(entry) {
                Some(Whiteout::Opaque) => {
                    tracing::debug!(dir = %target.display(), "opaque directory");
                    clear_directory(target)?;
                }
                Some(Whiteout::Remove(name)) => {
                    tracing::debug!(path = %target.join(name).display(), "whiteout");
                    remove_path(&target.join(name))?;
                }
                Some(Whiteout::Ignore) | None => {}
            }
        }

        for entry in tree.entries() {
            if whiteout_of(entry).is_some() {
                continue;
            }

            let entry_path = target.join(&entry.name);
            let logical_path = if prefix.is_empty() {
                entry.name.clone()
            } else {
                format!("{}/{}", prefix, entry.name)
            };

            match &entry.kind {
                EntryKind::Hardlink { target_path } => {
                    self.links.defer(entry_path, target_path);
                }

                EntryKind::Regular { hash, .. } => {
                    self.checkout_file(&entry_path, hash)?;
                    self.links.record(&logical_path, entry_path);
                }

                EntryKind::Symlink { hash } => {
                    self.checkout_symlink(&entry_path, hash)?;
                    self.links.record(&logical_path, entry_path);
                }

                EntryKind::Directory {
                    hash,
                    uid,
                    gid,
                    mode,
                    xattrs,
                } => {
                    self.prepare_dir(&entry_path, is_opaque_dir(xattrs))?;

                    let subtree = read_tree(self.repo, hash)?;
                    self.checkout_dir(&subtree, &entry_path, &logical_path)?;

                    let kept: Vec<Xattr> = self
                        .kept_xattrs(xattrs)
                        .iter()
                        .filter(|x| x.name != OVERLAY_OPAQUE_XATTR)
                        .cloned()
                        .collect();
                    apply_metadata(&entry_path, *uid, *gid, *mode, &kept)?;
                }

                EntryKind::BlockDevice {
                    major,
                    minor,
                    uid,
                    gid,
                    mode,
                    xattrs,
                } => skip_unprivileged(create_block_device(
                    &entry_path,
                    *major,
                    *minor,
                    *uid,
                    *gid,
                    *mode,
                    self.kept_xattrs(xattrs),
                ))?,

                EntryKind::CharDevice {
                    major,
                    minor,
                    uid,
                    gid,
                    mode,
                    xattrs,
                } => skip_unprivileged(create_char_device(
                    &entry_path,
                    *major,
                    *minor,
                    *uid,
                    *gid,
                    *mode,
                    self.kept_xattrs(xattrs),
                ))?,

                EntryKind::Fifo {
                    uid,
                    gid,
                    mode,
                    xattrs,
                } => create_fifo(&entry_path, *uid, *gid, *mode, self.kept_xattrs(xattrs))?,

                EntryKind::Socket {
                    uid,
                    gid,
                    mode,
                    xattrs,
                } => create_socket_placeholder(
                    &entry_path,
                    *uid,
                    *gid,
                    *mode,
                    self.kept_xattrs(xattrs),
                )?,
            }
        }

        Ok(())
    }

    /// make `path` a directory, keeping a lower layer's directory unless it is opaque
    fn prepare_dir(&self, path: &Path, opaque: bool) -> Result<()> {
        match fs::symlink_metadata(path) {
            Ok(meta) if meta.is_dir() => {
                if opaque {
                    ensure_writable_dir(path)?;
                    clear_directory(path)?;
                }
                Ok(())
            }
            Ok(_) => {
                remove_path(path)?;
                fs::create_dir(path).with_path(path)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                fs::create_dir(path).with_path(path)
            }
            Err(e) => Err(Error::Io {
                path: path.to_path_buf(),
                source: e,
            }),
        }
    }

    fn kept_xattrs<'x>(&self, xattrs: &'x [Xattr]) -> &'x [Xattr] {
        if self.opts.xattrs.preserves() {
            xattrs
        } else {
            &[]
        }
    }

    fn checkout_file(&mut self, dest: &Path, hash: &Hash) -> Result<()> {
        remove_path(dest)?;
        let blob = blob_path(self.repo, hash);

        match self.opts.mode {
            CheckoutMode::Hardlink => match fs::hard_link(&blob, dest) {
                Ok(()) => {}
                Err(e) if is_cross_device(&e) => {
                    tracing::debug!(path = %dest.display(), "store is on another filesystem, copying");
                    self.copy_or_link(&blob, dest, hash)?;
                }
                Err(e) => return Err(e).with_path(dest),
            },
            CheckoutMode::Copy => self.copy_or_link(&blob, dest, hash)?,
        }

        let meta = FileMetadata::from_path(dest)?;
        let known = self
            .cache
            .lookup(meta.dev, meta.ino)
            .is_some_and(|identity| identity.hash == *hash);
        if !known {
            let xattrs = read_xattrs(&blob)?;
            self.cache.record(meta.dev, meta.ino, BlobIdentity::new(*hash, &meta, xattrs));
        }
        Ok(())
    }

    /// copy a blob, or link to the copy an earlier entry already made
    fn copy_or_link(&mut self, blob: &Path, dest: &Path, hash: &Hash) -> Result<()> {
        match self.cache.find_copy(hash) {
            Some(existing) => {
                let existing = existing.to_path_buf();
                tracing::debug!(path = %dest.display(), copy = %existing.display(), "linking to earlier copy");
                fs::hard_link(&existing, dest).with_path(dest)?;
            }
            None => {
                self.copy_blob(blob, dest)?;
                let meta = FileMetadata::from_path(dest)?;
                self.cache.record_copy(*hash, dest.to_path_buf(), meta.dev, meta.ino);
            }
        }
        Ok(())
    }

    /// copy blob content and the metadata it carries
    fn copy_blob(&self, blob: &Path, dest: &Path) -> Result<()> {
        let blob_meta = FileMetadata::from_path(blob)?;
        fs::copy(blob, dest).with_path(dest)?;
        // writable while xattrs go on; apply_metadata sets the real mode last
        fs::set_permissions(dest, Permissions::from_mode(0o600)).with_path(dest)?;

        let xattrs = if self.opts.xattrs.preserves() {
            read_xattrs(blob)?
        } else {
            Vec::new()
        };
        apply_metadata(dest, blob_meta.uid, blob_meta.gid, blob_meta.mode, &xattrs)
    }

    fn checkout_symlink(&self, dest: &Path, hash: &Hash) -> Result<()> {
        let target_bytes = read_blob(self.repo, hash)?;
        let target = String::from_utf8_lossy(&target_bytes);

        let blob = blob_path(self.repo, hash);
        let blob_meta = FileMetadata::from_path(&blob)?;
        let xattrs = if self.opts.xattrs.preserves() {
            read_xattrs(&blob)?
        } else {
            Vec::new()
        };

        create_symlink(dest, &target, blob_meta.uid, blob_meta.gid, &xattrs)
    }

    /// recreate this layer's hardlinks once all of its files exist
    fn link_deferred(&mut self) -> Result<()> {
        for (link_path, target) in self.links.take_pending() {
            let target_fs_path = match self.links.get(&target) {
                Some(path) => path.to_path_buf(),
                None => self.lower_layer_file(&target)?,
            };
            create_hardlink(&link_path, &target_fs_path)?;
        }
        Ok(())
    }

    /// a hardlink may point at a file an earlier layer left in the root
    fn lower_layer_file(&self, target: &str) -> Result<PathBuf> {
        let path = self.root.join(target);
        match fs::symlink_metadata(&path) {
            Ok(meta) if meta.is_file() => Ok(path),
            _ => Err(Error::HardlinkTargetNotFound(target.to_string())),
        }
    }
}

fn skip_unprivileged(result: Result<()>) -> Result<()> {
    match result {
        Err(Error::DeviceNodePermission(path)) => {
            tracing::warn!(path = %path.display(), "cannot create device node without privileges, skipping");
            Ok(())
        }
        other => other,
    }
}

/// a hardlink failed because source and destination are on different filesystems
fn is_cross_device(err: &std::io::Error) -> bool {
    err.raw_os_error() == Some(nix::libc::EXDEV)
}
