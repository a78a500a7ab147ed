//! the store interface the import pipeline is written against

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::config::{CheckoutMode, XattrMode};
use crate::error::Result;
use crate::fs::DevInoCache;
use crate::hash::Hash;
use crate::label::Labeler;
use crate::object::read_commit;
use crate::ops::{checkout_layer, write_tree_from_directory, LayerCheckoutOptions};
use crate::refs::read_ref_opt;
use crate::repo::Repo;
use crate::txn::Transaction;
use crate::types::Commit;

/// how a directory is turned into a tree
#[derive(Clone, Copy)]
pub struct CommitModifier<'a> {
    /// label policy applied to every entry below the root
    pub labeler: &'a dyn Labeler,
    /// whether on-disk xattrs are recorded
    pub xattrs: XattrMode,
    /// files checked out in this run, whose blobs need not be re-hashed
    pub devino: Option<&'a DevInoCache>,
}

/// read side of a content store, plus the entry point for mutating it
pub trait ContentStore {
    type Transaction<'a>: StoreTransaction
    where
        Self: 'a;

    /// repository location, as handed to the image copy step
    fn path(&self) -> &Path;

    /// where scratch roots go (must share a filesystem with the objects)
    fn scratch_parent(&self) -> PathBuf;

    /// xattr mode used by both checkout and commit
    fn xattr_mode(&self) -> XattrMode;

    /// how layers are materialized when nothing forces a copy
    fn checkout_mode(&self) -> CheckoutMode;

    /// commit a ref points at, if it exists
    fn resolve_ref(&self, ref_name: &str) -> Result<Option<Hash>>;

    /// check a commit out on top of `dest` with whiteout handling
    fn checkout_union(
        &self,
        rev: &Hash,
        dest: &Path,
        mode: CheckoutMode,
        cache: &mut DevInoCache,
    ) -> Result<()>;

    /// take the store's write lock and open a transaction
    fn begin_transaction(&self) -> Result<Self::Transaction<'_>>;

    fn read_commit_metadata(&self, rev: &Hash) -> Result<BTreeMap<String, String>>;
}

/// a pending, all-or-nothing set of store writes
pub trait StoreTransaction {
    fn write_tree_from_directory(&mut self, dir: &Path, modifier: &CommitModifier<'_>)
        -> Result<Hash>;

    fn write_commit(&mut self, commit: &Commit) -> Result<Hash>;

    /// value of a ref as of this transaction
    fn ref_value(&self, ref_name: &str) -> Result<Option<Hash>>;

    fn set_ref(&mut self, ref_name: &str, rev: &Hash) -> Result<()>;

    fn commit(self) -> Result<()>;

    fn abort(self);
}

impl ContentStore for Repo {
    type Transaction<'a> = Transaction<'a>;

    fn path(&self) -> &Path {
        Repo::path(self)
    }

    fn scratch_parent(&self) -> PathBuf {
        Repo::scratch_parent(self)
    }

    fn xattr_mode(&self) -> XattrMode {
        self.config().xattrs
    }

    fn checkout_mode(&self) -> CheckoutMode {
        self.config().import.checkout
    }

    fn resolve_ref(&self, ref_name: &str) -> Result<Option<Hash>> {
        read_ref_opt(self, ref_name)
    }

    fn checkout_union(
        &self,
        rev: &Hash,
        dest: &Path,
        mode: CheckoutMode,
        cache: &mut DevInoCache,
    ) -> Result<()> {
        let opts = LayerCheckoutOptions {
            mode,
            xattrs: self.config().xattrs,
        };
        checkout_layer(self, rev, dest, cache, &opts)
    }

    fn begin_transaction(&self) -> Result<Transaction<'_>> {
        Transaction::begin(self)
    }

    fn read_commit_metadata(&self, rev: &Hash) -> Result<BTreeMap<String, String>> {
        Ok(read_commit(self, rev)?.metadata)
    }
}

impl StoreTransaction for Transaction<'_> {
    fn write_tree_from_directory(
        &mut self,
        dir: &Path,
        modifier: &CommitModifier<'_>,
    ) -> Result<Hash> {
        write_tree_from_directory(self, dir, modifier)
    }

    fn write_commit(&mut self, commit: &Commit) -> Result<Hash> {
        Transaction::write_commit(self, commit)
    }

    fn ref_value(&self, ref_name: &str) -> Result<Option<Hash>> {
        Transaction::ref_value(self, ref_name)
    }

    fn set_ref(&mut self, ref_name: &str, rev: &Hash) -> Result<()> {
        Transaction::set_ref(self, ref_name, rev)
    }

    fn commit(self) -> Result<()> {
        Transaction::commit(self)
    }

    fn abort(self) {
        Transaction::abort(self)
    }
}
