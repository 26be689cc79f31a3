//! Gallery store — identity name to enrolled descriptors, persisted as JSON.
//!
//! The whole gallery is loaded before each operation and rewritten after
//! each mutation. Writes go to a sibling temp file which is renamed over the
//! target, so readers only ever observe a complete gallery.

use crate::types::Descriptor;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("identity name must not be empty")]
    InvalidName,
    #[error("descriptor dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("descriptor contains a non-finite value")]
    NonFinite,
    #[error("failed to serialize gallery: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("failed to write gallery {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// On-disk value for one identity.
///
/// Older galleries stored a single bare descriptor per name; current ones
/// store a list. Both are accepted on read, only `Many` is ever written.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum StoredRecord {
    Many(Vec<Descriptor>),
    Single(Descriptor),
}

/// In-memory gallery: identity name → ordered descriptors.
///
/// Every name present holds at least one descriptor.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Gallery {
    records: BTreeMap<String, Vec<Descriptor>>,
}

impl Gallery {
    pub fn new() -> Self {
        Self::default()
    }

    /// Normalize the on-disk shape into the canonical in-memory one.
    fn from_stored(stored: BTreeMap<String, StoredRecord>) -> Self {
        let mut records = BTreeMap::new();
        for (name, record) in stored {
            let descriptors = match record {
                StoredRecord::Many(list) => list,
                StoredRecord::Single(descriptor) => {
                    tracing::debug!(name = %name, "upgraded legacy single-descriptor record");
                    vec![descriptor]
                }
            };
            if descriptors.is_empty() {
                tracing::warn!(name = %name, "dropping stored identity with no descriptors");
                continue;
            }
            records.insert(name, descriptors);
        }
        Self { records }
    }

    fn to_stored(&self) -> BTreeMap<&str, &[Descriptor]> {
        self.records
            .iter()
            .map(|(name, list)| (name.as_str(), list.as_slice()))
            .collect()
    }

    /// Descriptor length shared by every entry, or `None` for an empty gallery.
    pub fn dimension(&self) -> Option<usize> {
        self.records
            .values()
            .flat_map(|list| list.first())
            .map(Descriptor::dim)
            .next()
    }

    /// Append descriptors to `name`, creating the identity if needed.
    ///
    /// Returns the number added. Adding zero descriptors never creates an
    /// identity. The whole batch is validated before anything is inserted.
    pub fn enroll(&mut self, name: &str, descriptors: Vec<Descriptor>) -> Result<usize, StoreError> {
        if name.trim().is_empty() {
            return Err(StoreError::InvalidName);
        }
        // NaN/inf cannot be written as JSON and would corrupt the file.
        if descriptors
            .iter()
            .any(|d| d.as_slice().iter().any(|v| !v.is_finite()))
        {
            return Err(StoreError::NonFinite);
        }

        let expected = self
            .dimension()
            .or_else(|| descriptors.first().map(Descriptor::dim));
        if let Some(expected) = expected {
            if let Some(bad) = descriptors.iter().find(|d| d.dim() != expected) {
                return Err(StoreError::DimensionMismatch {
                    expected,
                    actual: bad.dim(),
                });
            }
        }

        let added = descriptors.len();
        if added > 0 {
            self.records
                .entry(name.to_string())
                .or_default()
                .extend(descriptors);
        }
        Ok(added)
    }

    /// Remove an identity. Returns whether it was present.
    pub fn delete(&mut self, name: &str) -> bool {
        self.records.remove(name).is_some()
    }

    pub fn names(&self) -> Vec<String> {
        self.records.keys().cloned().collect()
    }

    pub fn counts(&self) -> BTreeMap<String, usize> {
        self.records
            .iter()
            .map(|(name, list)| (name.clone(), list.len()))
            .collect()
    }

    pub fn get(&self, name: &str) -> Option<&[Descriptor]> {
        self.records.get(name).map(Vec::as_slice)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[Descriptor])> {
        self.records
            .iter()
            .map(|(name, list)| (name.as_str(), list.as_slice()))
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Backing file for a [`Gallery`].
#[derive(Debug, Clone)]
pub struct GalleryFile {
    path: PathBuf,
}

impl GalleryFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the gallery, recovering from a missing, empty or corrupt file.
    ///
    /// Recovery replaces the file with an empty gallery so the next load
    /// reads a well-formed file. Never fails.
    pub fn load(&self) -> Gallery {
        match std::fs::read(&self.path) {
            Ok(bytes) if !bytes.is_empty() => {
                match serde_json::from_slice::<BTreeMap<String, StoredRecord>>(&bytes) {
                    Ok(stored) => {
                        let gallery = Gallery::from_stored(stored);
                        tracing::debug!(
                            path = %self.path.display(),
                            identities = gallery.len(),
                            "gallery loaded"
                        );
                        return gallery;
                    }
                    Err(e) => tracing::warn!(
                        path = %self.path.display(),
                        error = %e,
                        "gallery file is corrupt; replacing with an empty gallery"
                    ),
                }
            }
            Ok(_) => tracing::warn!(
                path = %self.path.display(),
                "gallery file is empty; initializing"
            ),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => tracing::warn!(
                path = %self.path.display(),
                "gallery file does not exist; creating"
            ),
            Err(e) => tracing::warn!(
                path = %self.path.display(),
                error = %e,
                "gallery file unreadable; replacing with an empty gallery"
            ),
        }

        let gallery = Gallery::new();
        if let Err(e) = self.save(&gallery) {
            tracing::error!(error = %e, "failed to write empty gallery");
        }
        gallery
    }

    /// Serialize the full gallery and atomically replace the backing file.
    pub fn save(&self, gallery: &Gallery) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec(&gallery.to_stored())?;
        let write_err = |source: std::io::Error| StoreError::Write {
            path: self.path.clone(),
            source,
        };

        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&dir).map_err(write_err)?;

        let file_name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "gallery".to_string());
        let tmp_path = dir.join(format!(".{file_name}.{}.tmp", uuid::Uuid::new_v4()));

        let write_tmp = || -> std::io::Result<()> {
            let mut file = std::fs::File::create(&tmp_path)?;
            file.write_all(&bytes)?;
            file.sync_all()
        };
        if let Err(e) = write_tmp() {
            let _ = std::fs::remove_file(&tmp_path);
            return Err(write_err(e));
        }

        if let Err(e) = std::fs::rename(&tmp_path, &self.path) {
            let _ = std::fs::remove_file(&tmp_path);
            return Err(write_err(e));
        }

        tracing::debug!(
            path = %self.path.display(),
            identities = gallery.len(),
            "gallery saved"
        );
        Ok(())
    }
}
