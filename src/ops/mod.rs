//! high-level operations: seeding the store, merging layers, importing images

mod assemble;
mod checkout_layer;
mod commit;
mod import;
mod merge_layers;
mod transaction;

pub use assemble::{assemble, commit_metadata};
pub use checkout_layer::{checkout, checkout_layer, LayerCheckoutOptions};
pub use commit::{commit, commit_with_metadata, count_files, write_tree_from_directory, COMMIT_AUTHOR};
pub use import::{
    import_image, merge_image, merge_manifest, CommandImageCopy, CommandPostprocess, ImageCopy,
    ImportConfig, ImportHooks, ImportOutcome, NoPostprocess, Postprocess, ScratchRoot,
};
pub use merge_layers::{merge_layers, AppliedLayer};
pub use transaction::run_transaction;
