use crate::error::{Error, Result};
use crate::hash::Hash;
use crate::store::{ContentStore, StoreTransaction};

/// run `action` inside one store transaction and point `ref_name` at its result
///
/// either `ref_name` moves to the commit `action` returns, or the store is
/// left as it was: on any error the transaction is aborted, which discards
/// everything `action` wrote.
pub fn run_transaction<'s, S, F>(store: &'s S, ref_name: &str, action: F) -> Result<Hash>
where
    S: ContentStore,
    F: FnOnce(&mut S::Transaction<'s>) -> Result<Hash>,
{
    let mut txn = store.begin_transaction()?;

    let commit = match action(&mut txn) {
        Ok(commit) => commit,
        Err(e) => {
            tracing::debug!(ref_name, "aborting transaction: {}", e);
            txn.abort();
            return Err(e);
        }
    };

    if let Err(e) = txn.set_ref(ref_name, &commit) {
        txn.abort();
        return Err(Error::Transaction(Box::new(e)));
    }
    txn.commit().map_err(|e| match e {
        Error::Transaction(_) => e,
        other => Error::Transaction(Box::new(other)),
    })?;

    tracing::info!(ref_name, commit = %commit.short(), "ref updated");
    Ok(commit)
}
