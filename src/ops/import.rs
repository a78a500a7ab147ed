//! the import pipeline: manifest -> merged scratch root -> one commit
//!
//! fetching the image and rewriting the merged root happen outside this
//! crate, behind the `ImageCopy` and `Postprocess` traits.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use uuid::Uuid;

use crate::config::{CheckoutMode, ImportDefaults};
use crate::error::{Error, IoResultExt, Result};
use crate::fs::{ensure_writable_dir, DevInoCache};
use crate::hash::Hash;
use crate::label::{Labeler, NoLabels};
use crate::manifest::extract_layers;
use crate::ops::assemble::assemble;
use crate::ops::merge_layers::{merge_layers, AppliedLayer};
use crate::ops::transaction::run_transaction;
use crate::refcodec::{image_ref, image_ref_for, ImageName};
use crate::store::{CommitModifier, ContentStore, StoreTransaction};
use crate::types::{ImportMetadata, IMAGE_MANIFEST_KEY, MANIFEST_KEY};

/// per-run import settings
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ImportConfig {
    /// leave the scratch root on disk when the run fails
    pub keep_scratch_on_failure: bool,
    /// image name the result is stored under, instead of the source name
    pub destination_image_name: Option<String>,
    /// parent for the scratch root; the store's default when unset
    pub scratch_dir: Option<PathBuf>,
}

impl ImportConfig {
    pub fn from_defaults(defaults: &ImportDefaults) -> Self {
        Self {
            keep_scratch_on_failure: defaults.keep_scratch_on_failure,
            destination_image_name: None,
            scratch_dir: defaults.scratch_dir.clone(),
        }
    }

    /// ref the merged commit is written to
    pub fn destination_ref(&self, source: &str) -> String {
        let name = self.destination_image_name.as_deref().unwrap_or(source);
        image_ref(&ImageName::parse(name))
    }
}

/// directory the layers are merged into, removed on drop unless retained
pub struct ScratchRoot {
    path: PathBuf,
    retain: bool,
}

impl ScratchRoot {
    pub fn create(parent: &Path) -> Result<Self> {
        fs::create_dir_all(parent).with_path(parent)?;
        let path = parent.join(format!("import-{}", Uuid::new_v4()));
        fs::create_dir(&path).with_path(&path)?;
        tracing::debug!(path = %path.display(), "created scratch root");
        Ok(Self {
            path,
            retain: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// keep the directory when this guard is dropped
    pub fn retain(&mut self) {
        self.retain = true;
    }
}

impl Drop for ScratchRoot {
    fn drop(&mut self) {
        if self.retain {
            tracing::warn!(path = %self.path.display(), "keeping scratch root");
            return;
        }
        // layers may leave read-only directories behind
        let result = make_removable(&self.path)
            .and_then(|()| fs::remove_dir_all(&self.path).with_path(&self.path));
        if let Err(e) = result {
            tracing::warn!(path = %self.path.display(), "failed to remove scratch root: {}", e);
        }
    }
}

fn make_removable(dir: &Path) -> Result<()> {
    ensure_writable_dir(dir)?;
    for entry in fs::read_dir(dir).with_path(dir)? {
        let entry = entry.with_path(dir)?;
        let file_type = entry.file_type().with_path(entry.path())?;
        if file_type.is_dir() {
            make_removable(&entry.path())?;
        }
    }
    Ok(())
}

/// fetches an image into the store under `dest_ref`
pub trait ImageCopy {
    fn copy(&self, source: &str, repo: &Path, dest_ref: &str) -> Result<()>;
}

/// rewrites a merged root before it is committed
pub trait Postprocess {
    fn postprocess(&self, root: &Path) -> Result<()>;

    /// whether the root may be written to
    ///
    /// a root that is written to is checked out as copies, so files never
    /// share an inode with a store blob.
    fn modifies_root(&self) -> bool {
        true
    }
}

/// leaves the merged root as it is
#[derive(Clone, Copy, Debug, Default)]
pub struct NoPostprocess;

impl Postprocess for NoPostprocess {
    fn postprocess(&self, _root: &Path) -> Result<()> {
        Ok(())
    }

    fn modifies_root(&self) -> bool {
        false
    }
}

/// runs `program [args...] <source> <repo> <dest_ref>`
#[derive(Clone, Debug)]
pub struct CommandImageCopy {
    pub program: String,
    pub args: Vec<String>,
}

impl ImageCopy for CommandImageCopy {
    fn copy(&self, source: &str, repo: &Path, dest_ref: &str) -> Result<()> {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args).arg(source).arg(repo).arg(dest_ref);
        run_command(&self.program, cmd)
    }
}

/// runs `program [args...] <root>`
#[derive(Clone, Debug)]
pub struct CommandPostprocess {
    pub program: String,
    pub args: Vec<String>,
}

impl Postprocess for CommandPostprocess {
    fn postprocess(&self, root: &Path) -> Result<()> {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args).arg(root);
        run_command(&self.program, cmd)
    }
}

fn run_command(program: &str, mut cmd: Command) -> Result<()> {
    tracing::debug!(?cmd, "running");
    let output = cmd.output().map_err(|e| Error::External {
        program: program.to_string(),
        message: e.to_string(),
    })?;
    if output.status.success() {
        return Ok(());
    }

    let stderr = String::from_utf8_lossy(&output.stderr);
    let message = match stderr.trim() {
        "" => output.status.to_string(),
        text => format!("{}: {}", output.status, text),
    };
    Err(Error::External {
        program: program.to_string(),
        message,
    })
}

/// collaborators consulted while merging and committing
#[derive(Clone, Copy)]
pub struct ImportHooks<'a> {
    pub postprocess: &'a dyn Postprocess,
    pub labeler: &'a dyn Labeler,
}

impl Default for ImportHooks<'_> {
    fn default() -> Self {
        Self {
            postprocess: &NoPostprocess,
            labeler: &NoLabels,
        }
    }
}

/// what a successful import produced
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ImportOutcome {
    pub source: String,
    pub ref_name: String,
    pub commit: Hash,
    pub layers: Vec<AppliedLayer>,
}

/// fetch `source` into the store, then merge it
pub fn import_image<S: ContentStore>(
    store: &S,
    copier: &dyn ImageCopy,
    source: &str,
    config: &ImportConfig,
    hooks: &ImportHooks<'_>,
) -> Result<ImportOutcome> {
    let fetched_ref = image_ref_for(source);
    tracing::info!(source, ref_name = %fetched_ref, "copying image");
    copier.copy(source, store.path(), &fetched_ref)?;
    merge_image(store, source, config, hooks)
}

/// merge an image whose ref and layers are already in the store
pub fn merge_image<S: ContentStore>(
    store: &S,
    source: &str,
    config: &ImportConfig,
    hooks: &ImportHooks<'_>,
) -> Result<ImportOutcome> {
    let fetched_ref = image_ref_for(source);
    let rev = store
        .resolve_ref(&fetched_ref)?
        .ok_or_else(|| Error::RefNotFound(fetched_ref.clone()))?;

    // a ref already holding a merged commit carries the manifest it was built from
    let metadata = store.read_commit_metadata(&rev)?;
    let manifest = metadata
        .get(IMAGE_MANIFEST_KEY)
        .or_else(|| metadata.get(MANIFEST_KEY))
        .ok_or_else(|| Error::ManifestMissing {
            ref_name: fetched_ref.clone(),
            key: IMAGE_MANIFEST_KEY.to_string(),
        })?;

    merge_manifest(store, source, manifest, config, hooks)
}

/// how layers are materialized for a run with this postprocess
fn merge_checkout_mode<S: ContentStore>(store: &S, postprocess: &dyn Postprocess) -> CheckoutMode {
    let configured = store.checkout_mode();
    if configured == CheckoutMode::Hardlink && postprocess.modifies_root() {
        tracing::debug!("postprocess may write to the root, checking layers out as copies");
        return CheckoutMode::Copy;
    }
    configured
}

/// merge the layers `manifest` lists into one commit on the destination ref
///
/// the destination ref either moves to the new commit or is left untouched.
pub fn merge_manifest<S: ContentStore>(
    store: &S,
    source: &str,
    manifest: &str,
    config: &ImportConfig,
    hooks: &ImportHooks<'_>,
) -> Result<ImportOutcome> {
    let layers = extract_layers(manifest)?;
    let ref_name = config.destination_ref(source);

    let parent = config
        .scratch_dir
        .clone()
        .unwrap_or_else(|| store.scratch_parent());
    let mut scratch = ScratchRoot::create(&parent)?;
    let root = scratch.path().to_path_buf();

    let mode = merge_checkout_mode(store, hooks.postprocess);
    let mut cache = DevInoCache::new();
    let result = merge_layers(store, &layers, &root, mode, &mut cache).and_then(|applied| {
        hooks.postprocess.postprocess(&root)?;

        let metadata = ImportMetadata::new(source, manifest);
        let modifier = CommitModifier {
            labeler: hooks.labeler,
            xattrs: store.xattr_mode(),
            devino: Some(&cache),
        };
        let commit = run_transaction(store, &ref_name, |txn| {
            let parent = txn.ref_value(&ref_name)?;
            assemble(txn, &root, &modifier, &metadata, parent)
        })?;
        Ok((applied, commit))
    });

    match result {
        Ok((layers, commit)) => {
            tracing::info!(
                source,
                ref_name = %ref_name,
                commit = %commit.short(),
                layers = layers.len(),
                "import finished"
            );
            Ok(ImportOutcome {
                source: source.to_string(),
                ref_name,
                commit,
                layers,
            })
        }
        Err(e) => {
            if config.keep_scratch_on_failure {
                scratch.retain();
            }
            Err(e)
        }
    }
}
