use std::path::PathBuf;

use crate::error::Result;
use crate::hash::Hash;
use crate::object::{fanout_path, read_encoded, write_encoded, Written};
use crate::repo::Repo;
use crate::types::Tree;

/// write a tree to the object store
pub fn write_tree(repo: &Repo, tree: &Tree) -> Result<Written> {
    write_encoded(repo, &repo.trees_path(), tree)
}

/// read a tree, verifying its hash
pub fn read_tree(repo: &Repo, hash: &Hash) -> Result<Tree> {
    read_encoded(&repo.trees_path(), hash)
}

pub fn tree_path(repo: &Repo, hash: &Hash) -> PathBuf {
    fanout_path(&repo.trees_path(), hash)
}

pub fn tree_exists(repo: &Repo, hash: &Hash) -> bool {
    tree_path(repo, hash).exists()
}
