//! on-disk object store: blobs, trees and commits under `objects/`

mod blob;
mod commit;
mod tree;

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{Error, IoResultExt, Result};
use crate::hash::Hash;
use crate::repo::Repo;

pub use blob::{blob_exists, blob_path, read_blob, write_blob, write_blob_from_file};
pub use commit::{commit_exists, commit_path, read_commit, write_commit};
pub use tree::{read_tree, tree_exists, tree_path, write_tree};

/// outcome of storing an object
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Written {
    pub hash: Hash,
    /// path of the object file when this write created it (None if deduplicated)
    pub created: Option<PathBuf>,
}

impl Written {
    fn existing(hash: Hash) -> Self {
        Self {
            hash,
            created: None,
        }
    }

    fn created(hash: Hash, path: PathBuf) -> Self {
        Self {
            hash,
            created: Some(path),
        }
    }
}

/// object path inside a fan-out directory: `<base>/<2 hex>/<62 hex>`
fn fanout_path(base: &Path, hash: &Hash) -> PathBuf {
    let (dir, file) = hash.to_path_components();
    base.join(dir).join(file)
}

/// serialize as CBOR then zstd; the hash is taken over the compressed bytes
fn write_encoded<T: Serialize>(repo: &Repo, base: &Path, value: &T) -> Result<Written> {
    let mut cbor_bytes = Vec::new();
    ciborium::into_writer(value, &mut cbor_bytes)?;

    // level 3: fast, reasonable ratio
    let compressed = zstd::encode_all(&cbor_bytes[..], 3).with_path("<zstd>")?;
    let hash = Hash::digest(&compressed);

    let path = fanout_path(base, &hash);
    if path.exists() {
        return Ok(Written::existing(hash));
    }

    let tmp_path = repo.tmp_path().join(uuid::Uuid::new_v4().to_string());
    {
        let mut tmp_file = File::create(&tmp_path).with_path(&tmp_path)?;
        tmp_file.write_all(&compressed).with_path(&tmp_path)?;
        tmp_file.sync_all().with_path(&tmp_path)?;
    }
    install(&tmp_path, &path)?;

    Ok(Written::created(hash, path))
}

fn read_encoded<T: DeserializeOwned>(base: &Path, hash: &Hash) -> Result<T> {
    let path = fanout_path(base, hash);

    let compressed = fs::read(&path).map_err(|e| not_found_or_io(e, hash, &path))?;

    if Hash::digest(&compressed) != *hash {
        return Err(Error::CorruptObject(*hash));
    }

    let cbor_bytes = zstd::decode_all(&compressed[..]).with_path(&path)?;
    Ok(ciborium::from_reader(&cbor_bytes[..])?)
}

/// rename a fully written temp file into place and fsync the parent
fn install(tmp_path: &Path, path: &Path) -> Result<()> {
    let Some(parent) = path.parent() else {
        return Err(Error::Io {
            path: path.to_path_buf(),
            source: std::io::Error::new(std::io::ErrorKind::InvalidInput, "object path has no parent"),
        });
    };
    fs::create_dir_all(parent).with_path(parent)?;
    fs::rename(tmp_path, path).with_path(path)?;
    File::open(parent)
        .and_then(|dir| dir.sync_all())
        .with_path(parent)
}

fn not_found_or_io(e: std::io::Error, hash: &Hash, path: &Path) -> Error {
    if e.kind() == std::io::ErrorKind::NotFound {
        Error::ObjectNotFound(*hash)
    } else {
        Error::Io {
            path: path.to_path_buf(),
            source: e,
        }
    }
}
