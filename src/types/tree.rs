use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::hash::Hash;
use crate::types::Xattr;

/// a directory tree - collection of entries sorted by name
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tree {
    entries: Vec<TreeEntry>,
}

impl Tree {
    /// create a new tree, validating and sorting entries
    pub fn new(mut entries: Vec<TreeEntry>) -> Result<Self> {
        for entry in &entries {
            validate_entry_name(&entry.name)?;
        }

        // byte-wise order keeps serialization deterministic
        entries.sort_by(|a, b| a.name.as_bytes().cmp(b.name.as_bytes()));

        for window in entries.windows(2) {
            if window[0].name == window[1].name {
                return Err(Error::DuplicateEntryName(window[0].name.clone()));
            }
        }

        Ok(Self { entries })
    }

    /// create an empty tree
    pub fn empty() -> Self {
        Self { entries: vec![] }
    }

    /// get entries slice
    pub fn entries(&self) -> &[TreeEntry] {
        &self.entries
    }

    /// look up entry by name
    pub fn get(&self, name: &str) -> Option<&TreeEntry> {
        self.entries
            .binary_search_by(|e| e.name.as_bytes().cmp(name.as_bytes()))
            .ok()
            .map(|i| &self.entries[i])
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn validate_entry_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::InvalidEntryName("empty name".to_string()));
    }
    if name.contains('/') {
        return Err(Error::InvalidEntryName(format!("name contains '/': {}", name)));
    }
    if name.contains('\0') {
        return Err(Error::InvalidEntryName(format!(
            "name contains null byte: {}",
            name
        )));
    }
    if name == "." || name == ".." {
        return Err(Error::InvalidEntryName(format!("reserved name: {}", name)));
    }
    Ok(())
}

/// a single entry in a tree
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeEntry {
    pub name: String,
    pub kind: EntryKind,
}

impl TreeEntry {
    pub fn new(name: impl Into<String>, kind: EntryKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }
}

/// kind of tree entry with associated metadata
///
/// regular files and symlinks carry their ownership and mode inside the blob
/// they point at; every other kind records it inline.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EntryKind {
    Regular {
        hash: Hash,
        size: u64,
    },

    Symlink {
        hash: Hash,
    },

    Directory {
        hash: Hash,
        uid: u32,
        gid: u32,
        mode: u32,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        xattrs: Vec<Xattr>,
    },

    BlockDevice {
        major: u32,
        minor: u32,
        uid: u32,
        gid: u32,
        mode: u32,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        xattrs: Vec<Xattr>,
    },

    CharDevice {
        major: u32,
        minor: u32,
        uid: u32,
        gid: u32,
        mode: u32,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        xattrs: Vec<Xattr>,
    },

    Fifo {
        uid: u32,
        gid: u32,
        mode: u32,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        xattrs: Vec<Xattr>,
    },

    Socket {
        uid: u32,
        gid: u32,
        mode: u32,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        xattrs: Vec<Xattr>,
    },

    /// hardlink to another file in the same tree
    Hardlink {
        /// path relative to tree root
        target_path: String,
    },
}

impl EntryKind {
    /// get the type name for error messages
    pub fn type_name(&self) -> &'static str {
        match self {
            EntryKind::Regular { .. } => "regular",
            EntryKind::Symlink { .. } => "symlink",
            EntryKind::Directory { .. } => "directory",
            EntryKind::BlockDevice { .. } => "block_device",
            EntryKind::CharDevice { .. } => "char_device",
            EntryKind::Fifo { .. } => "fifo",
            EntryKind::Socket { .. } => "socket",
            EntryKind::Hardlink { .. } => "hardlink",
        }
    }

    pub fn is_directory(&self) -> bool {
        matches!(self, EntryKind::Directory { .. })
    }

    pub fn is_regular(&self) -> bool {
        matches!(self, EntryKind::Regular { .. })
    }

    pub fn is_symlink(&self) -> bool {
        matches!(self, EntryKind::Symlink { .. })
    }

    /// overlayfs whiteout: a 0:0 character device
    pub fn is_overlay_whiteout(&self) -> bool {
        matches!(
            self,
            EntryKind::CharDevice {
                major: 0,
                minor: 0,
                ..
            }
        )
    }

    /// get the hash if this entry has one (files, symlinks, directories)
    pub fn hash(&self) -> Option<&Hash> {
        match self {
            EntryKind::Regular { hash, .. } => Some(hash),
            EntryKind::Symlink { hash } => Some(hash),
            EntryKind::Directory { hash, .. } => Some(hash),
            _ => None,
        }
    }

    pub fn regular(hash: Hash, size: u64) -> Self {
        Self::Regular { hash, size }
    }

    pub fn symlink(hash: Hash) -> Self {
        Self::Symlink { hash }
    }

    pub fn directory(hash: Hash, uid: u32, gid: u32, mode: u32, xattrs: Vec<Xattr>) -> Self {
        Self::Directory {
            hash,
            uid,
            gid,
            mode,
            xattrs,
        }
    }

    pub fn hardlink(target_path: impl Into<String>) -> Self {
        Self::Hardlink {
            target_path: target_path.into(),
        }
    }
}
