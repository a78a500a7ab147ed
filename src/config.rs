use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{IoResultExt, Result};

/// repository configuration stored in config.toml
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// whether extended attributes are stored with objects
    #[serde(default)]
    pub xattrs: XattrMode,
    /// defaults for image imports into this repository
    #[serde(default)]
    pub import: ImportDefaults,
}

impl Config {
    /// load config from file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).with_path(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// save config to file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).with_path(path)?;
        Ok(())
    }
}

/// how extended attributes travel between disk and the store
///
/// checkout and commit both read this from the repository config, so the
/// two sides of an import always agree.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum XattrMode {
    /// store xattrs verbatim and restore them on checkout
    #[default]
    Preserve,
    /// ignore on-disk xattrs; only policy labels are recorded
    Skip,
}

impl XattrMode {
    pub fn preserves(self) -> bool {
        self == XattrMode::Preserve
    }
}

/// how regular files are materialized during checkout
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckoutMode {
    /// hardlink straight from the blob store (files share inodes with objects)
    #[default]
    Hardlink,
    /// copy blob content; repeated blobs within a run are hardlinked to the first copy
    Copy,
}

/// `[import]` section
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportDefaults {
    #[serde(default)]
    pub keep_scratch_on_failure: bool,
    #[serde(default)]
    pub checkout: CheckoutMode,
    /// selinux file_contexts used to label committed trees
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_contexts: Option<PathBuf>,
    /// parent directory for scratch roots (defaults to the repository tmp dir)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scratch_dir: Option<PathBuf>,
}
