use std::path::Path;

use crate::error::{Error, Result};
use crate::hash::Hash;
use crate::ops::commit::COMMIT_AUTHOR;
use crate::store::{CommitModifier, ContentStore, StoreTransaction};
use crate::types::{Commit, ImportMetadata, MANIFEST_KEY};

/// write a merged root into the store as one commit carrying `metadata`
///
/// labels and the xattr policy come from `modifier`. store failures are
/// reported as `Error::Commit`; labeling failures keep their own variant.
pub fn assemble<T: StoreTransaction>(
    txn: &mut T,
    root: &Path,
    modifier: &CommitModifier<'_>,
    metadata: &ImportMetadata,
    parent: Option<Hash>,
) -> Result<Hash> {
    let tree = txn
        .write_tree_from_directory(root, modifier)
        .map_err(commit_error)?;

    let mut commit = Commit::new(
        tree,
        parent.into_iter().collect(),
        COMMIT_AUTHOR,
        format!("import {}", metadata.source_title),
    );
    for (key, value) in metadata.entries() {
        commit = commit.with_metadata(key, value);
    }

    let hash = txn.write_commit(&commit).map_err(commit_error)?;
    tracing::info!(
        source = %metadata.source_title,
        tree = %tree.short(),
        commit = %hash.short(),
        "assembled commit"
    );
    Ok(hash)
}

fn commit_error(e: Error) -> Error {
    match e {
        Error::Labeling { .. } | Error::Commit(_) => e,
        other => Error::Commit(Box::new(other)),
    }
}

/// provenance recorded on an imported commit
pub fn commit_metadata<S: ContentStore>(store: &S, rev: &Hash) -> Result<ImportMetadata> {
    let metadata = store.read_commit_metadata(rev)?;
    ImportMetadata::from_map(&metadata).ok_or_else(|| Error::ManifestMissing {
        ref_name: rev.to_hex(),
        key: MANIFEST_KEY.to_string(),
    })
}
