use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::hash::Hash;

/// metadata key recording where an imported tree came from
pub const SOURCE_TITLE_KEY: &str = "source-title";

/// metadata key holding the raw image manifest
pub const MANIFEST_KEY: &str = "manifest";

/// metadata key under which the image copy step stores the manifest on the image ref
pub const IMAGE_MANIFEST_KEY: &str = "docker.manifest";

/// a commit object pointing to a tree with metadata
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Commit {
    /// root tree hash
    pub tree: Hash,
    /// parent commit hashes (empty for the first commit on a ref)
    pub parents: Vec<Hash>,
    pub author: String,
    /// unix timestamp (seconds since epoch)
    pub timestamp: i64,
    pub message: String,
    /// BTreeMap keeps serialization deterministic
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
}

impl Commit {
    pub fn new(
        tree: Hash,
        parents: Vec<Hash>,
        author: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        let timestamp = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);
        Self::with_timestamp(tree, parents, author, timestamp, message)
    }

    pub fn with_timestamp(
        tree: Hash,
        parents: Vec<Hash>,
        author: impl Into<String>,
        timestamp: i64,
        message: impl Into<String>,
    ) -> Self {
        Self {
            tree,
            parents,
            author: author.into(),
            timestamp,
            message: message.into(),
            metadata: BTreeMap::new(),
        }
    }

    /// add metadata key-value pair
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// provenance of an imported commit, if it carries one
    pub fn import_metadata(&self) -> Option<ImportMetadata> {
        ImportMetadata::from_map(&self.metadata)
    }
}

/// provenance attached to every commit produced by an image import
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ImportMetadata {
    /// human-readable source identity (usually the image reference)
    pub source_title: String,
    /// manifest text exactly as it was read
    pub manifest: String,
}

impl ImportMetadata {
    pub fn new(source_title: impl Into<String>, manifest: impl Into<String>) -> Self {
        Self {
            source_title: source_title.into(),
            manifest: manifest.into(),
        }
    }

    /// read back from a commit's metadata map
    pub fn from_map(metadata: &BTreeMap<String, String>) -> Option<Self> {
        let source_title = metadata.get(SOURCE_TITLE_KEY)?;
        let manifest = metadata.get(MANIFEST_KEY)?;
        Some(Self::new(source_title.clone(), manifest.clone()))
    }

    /// metadata entries as stored on the commit
    pub fn entries(&self) -> [(&'static str, &str); 2] {
        [
            (SOURCE_TITLE_KEY, self.source_title.as_str()),
            (MANIFEST_KEY, self.manifest.as_str()),
        ]
    }
}
