use std::path::PathBuf;

use crate::Hash;

/// error type for ocizub operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("repository not found at {0}")]
    NoRepo(PathBuf),

    #[error("repository already exists at {0}")]
    RepoExists(PathBuf),

    #[error("ref not found: {0}")]
    RefNotFound(String),

    #[error("invalid ref name: {0}")]
    InvalidRef(String),

    #[error("object not found: {0}")]
    ObjectNotFound(Hash),

    #[error("corrupt object: hash mismatch for {0}")]
    CorruptObject(Hash),

    #[error("checkout target not empty: {0}")]
    TargetNotEmpty(PathBuf),

    #[error("lock contention on repository")]
    LockContention,

    #[error("invalid tree entry name: {0}")]
    InvalidEntryName(String),

    #[error("duplicate tree entry name: {0}")]
    DuplicateEntryName(String),

    #[error("hardlink target not found: {0}")]
    HardlinkTargetNotFound(String),

    #[error("cannot create device node without privileges: {0}")]
    DeviceNodePermission(PathBuf),

    #[error("manifest is not valid json: {0}")]
    ManifestParse(#[from] serde_json::Error),

    #[error("manifest has no fsLayers, layers or Layers field")]
    ManifestShape,

    #[error("manifest metadata key {key} missing on {ref_name}")]
    ManifestMissing { ref_name: String, key: String },

    #[error("layer {digest} not found in store (expected ref {ref_name})")]
    LayerNotFound { digest: String, ref_name: String },

    #[error("checkout of layer {layer} failed: {source}")]
    Checkout {
        layer: String,
        #[source]
        source: Box<Error>,
    },

    #[error("security labeling failed at {path}: {message}")]
    Labeling { path: PathBuf, message: String },

    #[error("commit rejected by store: {0}")]
    Commit(#[source] Box<Error>),

    #[error("transaction failed: {0}")]
    Transaction(#[source] Box<Error>),

    #[error("transaction already finished")]
    TransactionFinished,

    #[error("{program} failed: {message}")]
    External { program: String, message: String },

    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cbor serialization error: {0}")]
    CborEncode(#[from] ciborium::ser::Error<std::io::Error>),

    #[error("cbor deserialization error: {0}")]
    CborDecode(#[from] ciborium::de::Error<std::io::Error>),

    #[error("config error: {0}")]
    Config(#[from] toml::de::Error),

    #[error("config serialization error: {0}")]
    ConfigSerialize(#[from] toml::ser::Error),

    #[error("invalid hash hex: {0}")]
    InvalidHashHex(String),

    #[error("xattr error on {path}: {message}")]
    Xattr { path: PathBuf, message: String },

    #[error("invalid file_contexts rule at line {line}: {message}")]
    InvalidContextRule { line: usize, message: String },
}

pub type Result<T> = std::result::Result<T, Error>;

/// helper to wrap io errors with path context
pub trait IoResultExt<T> {
    fn with_path(self, path: impl Into<PathBuf>) -> Result<T>;
}

impl<T> IoResultExt<T> for std::io::Result<T> {
    fn with_path(self, path: impl Into<PathBuf>) -> Result<T> {
        self.map_err(|source| Error::Io {
            path: path.into(),
            source,
        })
    }
}
