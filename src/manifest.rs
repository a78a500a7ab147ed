//! layer order from image manifests
//!
//! three manifest shapes are understood:
//! - legacy schema 1: `fsLayers[].blobSum`, newest first
//! - docker v2 / oci: `layers[].digest`, oldest first
//! - flat: `Layers[]` of digest strings, oldest first (what `skopeo inspect` prints)

use serde_json::Value;

use crate::error::{Error, Result};

/// the recognised shape of a manifest, with digests in document order
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ManifestShape {
    Legacy(Vec<String>),
    OciLayers(Vec<String>),
    Flat(Vec<String>),
}

impl ManifestShape {
    /// detect the shape: `fsLayers`, then `layers`, then `Layers`
    pub fn detect(manifest: &Value) -> Result<Self> {
        if let Some(entries) = manifest.get("fsLayers").and_then(Value::as_array) {
            return digests_of(entries, Some("blobSum")).map(ManifestShape::Legacy);
        }
        if let Some(entries) = manifest.get("layers").and_then(Value::as_array) {
            return digests_of(entries, Some("digest")).map(ManifestShape::OciLayers);
        }
        if let Some(entries) = manifest.get("Layers").and_then(Value::as_array) {
            return digests_of(entries, None).map(ManifestShape::Flat);
        }
        Err(Error::ManifestShape)
    }

    /// normalize to oldest-first
    pub fn into_layers(self) -> LayerList {
        match self {
            ManifestShape::Legacy(mut digests) => {
                digests.reverse();
                LayerList(digests)
            }
            ManifestShape::OciLayers(digests) | ManifestShape::Flat(digests) => LayerList(digests),
        }
    }
}

fn digests_of(entries: &[Value], field: Option<&str>) -> Result<Vec<String>> {
    entries
        .iter()
        .map(|entry| {
            let value = match field {
                Some(field) => entry.get(field),
                None => Some(entry),
            };
            value
                .and_then(Value::as_str)
                .map(str::to_string)
                .ok_or(Error::ManifestShape)
        })
        .collect()
}

/// layer digests in stacking order: first is the bottom layer, last wins
///
/// only built through `ManifestShape::into_layers`, so a legacy manifest
/// can never reach the checkout engine un-reversed.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LayerList(Vec<String>);

impl LayerList {
    pub fn iter(&self) -> std::slice::Iter<'_, String> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_slice(&self) -> &[String] {
        &self.0
    }
}

impl<'a> IntoIterator for &'a LayerList {
    type Item = &'a String;
    type IntoIter = std::slice::Iter<'a, String>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// parse manifest text and return its layers, oldest first
pub fn extract_layers(manifest: &str) -> Result<LayerList> {
    let value: Value = serde_json::from_str(manifest)?;
    extract_layers_from_value(&value)
}

/// layers of an already parsed manifest, oldest first
pub fn extract_layers_from_value(manifest: &Value) -> Result<LayerList> {
    Ok(ManifestShape::detect(manifest)?.into_layers())
}
