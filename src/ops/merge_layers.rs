use std::path::Path;

use crate::config::CheckoutMode;
use crate::error::{Error, Result};
use crate::fs::DevInoCache;
use crate::hash::Hash;
use crate::manifest::LayerList;
use crate::refcodec::layer_ref;
use crate::store::ContentStore;

/// a layer that made it into the scratch root
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AppliedLayer {
    pub digest: String,
    pub ref_name: String,
    pub revision: Hash,
}

/// check every layer out into `dest`, bottom layer first
///
/// all layer refs are resolved before anything is checked out, so a missing
/// layer fails the run with `dest` untouched. a failed checkout leaves the
/// layers before it in place; discarding `dest` is up to the caller.
pub fn merge_layers<S: ContentStore>(
    store: &S,
    layers: &LayerList,
    dest: &Path,
    mode: CheckoutMode,
    cache: &mut DevInoCache,
) -> Result<Vec<AppliedLayer>> {
    let mut resolved = Vec::with_capacity(layers.len());
    for digest in layers {
        let ref_name = layer_ref(digest);
        let revision = store
            .resolve_ref(&ref_name)?
            .ok_or_else(|| Error::LayerNotFound {
                digest: digest.clone(),
                ref_name: ref_name.clone(),
            })?;
        resolved.push(AppliedLayer {
            digest: digest.clone(),
            ref_name,
            revision,
        });
    }

    let total = resolved.len();
    for (index, layer) in resolved.iter().enumerate() {
        store
            .checkout_union(&layer.revision, dest, mode, cache)
            .map_err(|e| Error::Checkout {
                layer: layer.digest.clone(),
                source: Box::new(e),
            })?;
        tracing::info!(
            layer = %layer.digest,
            revision = %layer.revision.short(),
            "applied layer {}/{}",
            index + 1,
            total
        );
    }

    Ok(resolved)
}
