use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::{Error, IoResultExt, Result};
use crate::hash::Hash;
use crate::repo::Repo;

/// write a ref (create or update) with temp + fsync + rename
///
/// callers outside a transaction should go through `Transaction::set_ref`
/// instead; this is the primitive the transaction commits with.
pub fn write_ref(repo: &Repo, ref_name: &str, hash: &Hash) -> Result<()> {
    validate_ref_name(ref_name)?;

    let path = ref_path(repo, ref_name);
    let parent = path
        .parent()
        .ok_or_else(|| Error::InvalidRef(ref_name.to_string()))?;
    fs::create_dir_all(parent).with_path(parent)?;

    let tmp_path = repo.tmp_path().join(uuid::Uuid::new_v4().to_string());
    {
        let mut tmp_file = File::create(&tmp_path).with_path(&tmp_path)?;
        writeln!(tmp_file, "{}", hash.to_hex()).with_path(&tmp_path)?;
        tmp_file.sync_all().with_path(&tmp_path)?;
    }

    if let Err(e) = fs::rename(&tmp_path, &path) {
        let _ = fs::remove_file(&tmp_path);
        return Err(Error::Io { path, source: e });
    }
    File::open(parent)
        .and_then(|dir| dir.sync_all())
        .with_path(parent)
}

/// read a ref
pub fn read_ref(repo: &Repo, ref_name: &str) -> Result<Hash> {
    read_ref_opt(repo, ref_name)?.ok_or_else(|| Error::RefNotFound(ref_name.to_string()))
}

/// read a ref, returning None when it does not exist
pub fn read_ref_opt(repo: &Repo, ref_name: &str) -> Result<Option<Hash>> {
    validate_ref_name(ref_name)?;
    let path = ref_path(repo, ref_name);

    match fs::read_to_string(&path) {
        Ok(content) => Hash::from_hex(content.trim()).map(Some),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        // a ref name that is a prefix of other refs is a directory, not a ref
        Err(_) if path.is_dir() => Ok(None),
        Err(e) => Err(Error::Io { path, source: e }),
    }
}

/// delete a ref
pub fn delete_ref(repo: &Repo, ref_name: &str) -> Result<()> {
    validate_ref_name(ref_name)?;
    let path = ref_path(repo, ref_name);

    fs::remove_file(&path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            Error::RefNotFound(ref_name.to_string())
        } else {
            Error::Io { path, source: e }
        }
    })
}

/// resolve a ref or hash string to a hash
///
/// 64 hex chars are taken as a commit hash, anything else as a ref name.
pub fn resolve_ref(repo: &Repo, ref_or_hash: &str) -> Result<Hash> {
    if Hash::looks_like_hex(ref_or_hash) {
        return Hash::from_hex(ref_or_hash);
    }
    read_ref(repo, ref_or_hash)
}

/// list all refs, sorted
pub fn list_refs(repo: &Repo) -> Result<Vec<String>> {
    let refs_dir = repo.refs_path();
    let mut refs = Vec::new();

    if refs_dir.exists() {
        collect_refs(&refs_dir, &refs_dir, &mut refs)?;
    }

    refs.sort();
    Ok(refs)
}

/// list refs matching a glob pattern (e.g. `ociimage/*`)
pub fn list_refs_matching(repo: &Repo, pattern: &str) -> Result<Vec<String>> {
    let glob = glob::Pattern::new(pattern).map_err(|e| Error::InvalidRef(e.to_string()))?;
    Ok(list_refs(repo)?
        .into_iter()
        .filter(|r| glob.matches(r))
        .collect())
}

pub fn ref_exists(repo: &Repo, ref_name: &str) -> bool {
    matches!(read_ref_opt(repo, ref_name), Ok(Some(_)))
}

fn ref_path(repo: &Repo, ref_name: &str) -> PathBuf {
    repo.refs_path().join(ref_name)
}

fn collect_refs(base: &Path, dir: &Path, refs: &mut Vec<String>) -> Result<()> {
    for entry in fs::read_dir(dir).with_path(dir)? {
        let path = entry.with_path(dir)?.path();

        if path.is_dir() {
            collect_refs(base, &path, refs)?;
        } else if let Ok(rel) = path.strip_prefix(base) {
            refs.push(rel.to_string_lossy().into_owned());
        }
    }
    Ok(())
}

/// ref names are relative paths below refs/heads without traversal
pub(crate) fn validate_ref_name(name: &str) -> Result<()> {
    let reason = if name.is_empty() {
        Some("empty ref name")
    } else if name.starts_with('/') || name.ends_with('/') {
        Some("ref name cannot start or end with '/'")
    } else if name.contains("//") {
        Some("ref name cannot contain '//'")
    } else if name.contains('\0') {
        Some("ref name cannot contain null byte")
    } else if name.split('/').any(|c| c == "." || c == "..") {
        Some("ref name cannot contain '.' or '..' components")
    } else {
        None
    };

    match reason {
        Some(reason) => Err(Error::InvalidRef(format!("{}: {:?}", reason, name))),
        None => Ok(()),
    }
}
