//! store transactions
//!
//! a transaction holds the repository lock for its whole lifetime. objects
//! are written straight into `objects/` (they are immutable and content
//! addressed), but every object file the transaction creates is remembered,
//! and refs are only staged. `commit` moves the staged refs; dropping or
//! aborting the transaction deletes the objects it created instead, so an
//! abandoned run leaves the store as it found it.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::hash::Hash;
use crate::object::{self, Written};
use crate::refs::{delete_ref, read_ref_opt, validate_ref_name, write_ref};
use crate::repo::{Repo, RepoLock};
use crate::types::{Commit, Tree, Xattr};

pub struct Transaction<'r> {
    repo: &'r Repo,
    _lock: RepoLock,
    created: Vec<PathBuf>,
    staged_refs: Vec<(String, Hash)>,
    finished: bool,
}

impl<'r> Transaction<'r> {
    /// take the repository lock and start a transaction
    pub fn begin(repo: &'r Repo) -> Result<Self> {
        let lock = repo.lock()?;
        tracing::debug!(repo = %repo.path().display(), "transaction started");
        Ok(Self {
            repo,
            _lock: lock,
            created: Vec::new(),
            staged_refs: Vec::new(),
            finished: false,
        })
    }

    pub fn repo(&self) -> &'r Repo {
        self.repo
    }

    /// number of object files created so far
    pub fn created_objects(&self) -> usize {
        self.created.len()
    }

    fn track(&mut self, written: Written) -> Result<Hash> {
        if self.finished {
            return Err(Error::TransactionFinished);
        }
        if let Some(path) = written.created {
            self.created.push(path);
        }
        Ok(written.hash)
    }

    pub fn write_blob(
        &mut self,
        content: &[u8],
        uid: u32,
        gid: u32,
        mode: u32,
        xattrs: &[Xattr],
    ) -> Result<Hash> {
        let written = object::write_blob(self.repo, content, uid, gid, mode, xattrs)?;
        self.track(written)
    }

    pub fn write_blob_from_file(
        &mut self,
        source: &Path,
        uid: u32,
        gid: u32,
        mode: u32,
        xattrs: &[Xattr],
    ) -> Result<Hash> {
        let written = object::write_blob_from_file(self.repo, source, uid, gid, mode, xattrs)?;
        self.track(written)
    }

    pub fn write_tree(&mut self, tree: &Tree) -> Result<Hash> {
        let written = object::write_tree(self.repo, tree)?;
        self.track(written)
    }

    pub fn write_commit(&mut self, commit: &Commit) -> Result<Hash> {
        let written = object::write_commit(self.repo, commit)?;
        self.track(written)
    }

    /// current value of a ref, as seen under the lock
    pub fn ref_value(&self, ref_name: &str) -> Result<Option<Hash>> {
        read_ref_opt(self.repo, ref_name)
    }

    /// stage a ref update; nothing is written until `commit`
    pub fn set_ref(&mut self, ref_name: &str, hash: &Hash) -> Result<()> {
        if self.finished {
            return Err(Error::TransactionFinished);
        }
        validate_ref_name(ref_name)?;
        self.staged_refs.retain(|(name, _)| name != ref_name);
        self.staged_refs.push((ref_name.to_string(), *hash));
        Ok(())
    }

    /// write the staged refs and keep every object written
    ///
    /// if a ref cannot be written, refs already moved are put back and the
    /// transaction's objects are removed.
    pub fn commit(mut self) -> Result<()> {
        if self.finished {
            return Err(Error::TransactionFinished);
        }

        let staged = std::mem::take(&mut self.staged_refs);
        let mut moved: Vec<(String, Option<Hash>)> = Vec::with_capacity(staged.len());

        for (name, hash) in &staged {
            let result = read_ref_opt(self.repo, name).and_then(|previous| {
                write_ref(self.repo, name, hash)?;
                Ok(previous)
            });
            match result {
                Ok(previous) => moved.push((name.clone(), previous)),
                Err(e) => {
                    self.restore_refs(&moved);
                    return Err(Error::Transaction(Box::new(e)));
                }
            }
        }

        for (name, hash) in &staged {
            tracing::debug!(ref_name = %name, commit = %hash.short(), "ref updated");
        }
        self.created.clear();
        self.finished = true;
        Ok(())
    }

    /// drop every staged ref and delete the objects this transaction created
    pub fn abort(mut self) {
        self.rollback();
    }

    fn restore_refs(&self, moved: &[(String, Option<Hash>)]) {
        for (name, previous) in moved.iter().rev() {
            let result = match previous {
                Some(hash) => write_ref(self.repo, name, hash),
                None => delete_ref(self.repo, name),
            };
            if let Err(e) = result {
                tracing::warn!(ref_name = %name, "failed to restore ref: {}", e);
            }
        }
    }

    fn rollback(&mut self) {
        if self.finished {
            return;
        }
        self.finished = true;
        self.staged_refs.clear();

        if !self.created.is_empty() {
            tracing::debug!(objects = self.created.len(), "transaction aborted, removing new objects");
        }
        for path in self.created.drain(..).rev() {
            if let Err(e) = fs::remove_file(&path) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!(path = %path.display(), "failed to remove object: {}", e);
                }
            }
        }
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        self.rollback();
    }
}
