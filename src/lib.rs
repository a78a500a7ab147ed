//! ocizub - container image layers to a single store commit
//!
//! merges the layers of an OCI/Docker image, each already committed to a
//! content-addressed store under its own ref, into one deduplicated tree and
//! commits it atomically under the image's ref.
//!
//! # Pipeline
//!
//! - **manifest**: ordered layer list, oldest first, whatever the manifest shape
//! - **merge**: layers checked out one over the other into a scratch root,
//!   honoring whiteouts (`.wh.<name>`, `.wh..wh..opq`, overlay char devices)
//! - **assemble**: the scratch root written back as a tree with security
//!   labels, reusing blob hashes of files that came straight from the store
//! - **transaction**: the commit and its ref move land together or not at all
//!
//! # Store
//!
//! blob hash = SHA256(uid | gid | mode | xattr_count | xattrs... | content)
//!
//! trees and commits are CBOR + zstd, refs live under `refs/heads/`.
//!
//! # Example usage
//!
//! ```no_run
//! use ocizub::{ops, Repo};
//! use std::path::Path;
//!
//! let repo = Repo::open(Path::new("/var/lib/ocizub")).unwrap();
//!
//! let outcome = ops::merge_image(
//!     &repo,
//!     "quay.io/fedora/fedora:40",
//!     &ops::ImportConfig::from_defaults(&repo.config().import),
//!     &ops::ImportHooks::default(),
//! )
//! .unwrap();
//! println!("{} -> {}", outcome.ref_name, outcome.commit);
//! ```

mod config;
mod error;
mod hash;
mod object;
mod refs;
mod repo;

pub mod fs;
pub mod label;
pub mod manifest;
pub mod ops;
pub mod refcodec;
pub mod store;
pub mod txn;
pub mod types;

pub use config::{CheckoutMode, Config, ImportDefaults, XattrMode};
pub use error::{Error, Result};
pub use hash::{compute_blob_hash, Hash};
pub use manifest::{extract_layers, LayerList, ManifestShape};
pub use object::{blob_exists, read_blob, read_commit, read_tree};
pub use refcodec::{image_ref, image_ref_for, layer_ref, ImageName};
pub use refs::{list_refs, list_refs_matching, read_ref, read_ref_opt, ref_exists, resolve_ref};
pub use repo::Repo;
pub use store::{CommitModifier, ContentStore, StoreTransaction};
pub use types::{Commit, EntryKind, ImportMetadata, Tree, TreeEntry, Xattr};
