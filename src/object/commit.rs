use std::path::PathBuf;

use crate::error::Result;
use crate::hash::Hash;
use crate::object::{fanout_path, read_encoded, write_encoded, Written};
use crate::repo::Repo;
use crate::types::Commit;

/// write a commit to the object store
pub fn write_commit(repo: &Repo, commit: &Commit) -> Result<Written> {
    write_encoded(repo, &repo.commits_path(), commit)
}

/// read a commit, verifying its hash
pub fn read_commit(repo: &Repo, hash: &Hash) -> Result<Commit> {
    read_encoded(&repo.commits_path(), hash)
}

pub fn commit_path(repo: &Repo, hash: &Hash) -> PathBuf {
    fanout_path(&repo.commits_path(), hash)
}

pub fn commit_exists(repo: &Repo, hash: &Hash) -> bool {
    commit_path(repo, hash).exists()
}
