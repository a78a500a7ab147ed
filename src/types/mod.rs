mod commit;
mod metadata;
mod tree;

pub use commit::{Commit, ImportMetadata, IMAGE_MANIFEST_KEY, MANIFEST_KEY, SOURCE_TITLE_KEY};
pub use metadata::Xattr;
pub use tree::{EntryKind, Tree, TreeEntry};
