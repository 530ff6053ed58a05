//! Versioned on-disk release manifests
//!
//! Layout: `<root>/<component>/<version>/*.yaml`, e.g.
//! `/var/run/ko/knative-serving/0.16.0/serving-core.yaml`. Files are read in
//! file-name order and may hold several YAML documents each.

use std::cmp::Ordering;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;
use serde::Deserialize;
use tracing::{debug, info};

use super::ManifestSet;
use crate::controller::error::{Error, Result};
use crate::crd::ComponentKind;

const MANIFEST_EXTENSIONS: &[&str] = &["yaml", "yml", "json"];

/// Resolves component versions to release manifests, memoizing each release.
///
/// Releases are immutable once published, so entries are never invalidated.
/// Concurrent first resolutions of the same release may both read the disk;
/// the last insert wins and both results are identical.
#[derive(Debug)]
pub struct ManifestStore {
    root: PathBuf,
    cache: DashMap<(ComponentKind, String), Arc<ManifestSet>>,
}

impl ManifestStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            cache: DashMap::new(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding one release of a component
    pub fn manifest_path(&self, kind: ComponentKind, version: &str) -> PathBuf {
        self.root.join(kind.path_element()).join(version)
    }

    /// Whether a release has already been loaded
    pub fn is_cached(&self, kind: ComponentKind, version: &str) -> bool {
        self.cache.contains_key(&(kind, version.to_string()))
    }

    /// Resolve the manifest of a release.
    ///
    /// The returned set is shared with every other caller; derive a new set
    /// (append, filter, transform) rather than mutating it.
    pub fn resolve(&self, kind: ComponentKind, version: &str) -> Result<Arc<ManifestSet>> {
        if !is_single_segment(version) {
            return Err(Error::InvalidVersion {
                kind,
                version: version.to_string(),
            });
        }
        let key = (kind, version.to_string());
        if let Some(cached) = self.cache.get(&key) {
            return Ok(Arc::clone(cached.value()));
        }

        let path = self.manifest_path(kind, version);
        if !path.is_dir() {
            return Err(Error::ManifestNotFound {
                kind,
                version: version.to_string(),
                path,
            });
        }

        let manifest = load_directory(&path)?;
        if manifest.is_empty() {
            return Err(Error::EmptyManifest {
                kind,
                version: version.to_string(),
            });
        }

        info!(
            kind = %kind,
            version = %version,
            resources = manifest.len(),
            "Loaded release manifest"
        );
        let manifest = Arc::new(manifest);
        self.cache.insert(key, Arc::clone(&manifest));
        Ok(manifest)
    }

    /// Versions available for a component, newest first
    pub fn list_available_versions(&self, kind: ComponentKind) -> Result<Vec<String>> {
        let path = self.root.join(kind.path_element());
        let entries = std::fs::read_dir(&path).map_err(|source| Error::Io {
            path: path.clone(),
            source,
        })?;

        let mut versions = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| Error::Io {
                path: path.clone(),
                source,
            })?;
            let file_type = entry.file_type().map_err(|source| Error::Io {
                path: entry.path(),
                source,
            })?;
            if file_type.is_dir() {
                versions.push(entry.file_name().to_string_lossy().into_owned());
            }
        }

        if versions.is_empty() {
            return Err(Error::NoVersionsAvailable { kind, path });
        }

        versions.sort_by(|a, b| compare_versions(b, a));
        Ok(versions)
    }

    /// Newest available version of a component
    pub fn latest_version(&self, kind: ComponentKind) -> Result<String> {
        let versions = self.list_available_versions(kind)?;
        versions
            .into_iter()
            .next()
            .ok_or_else(|| Error::NoVersionsAvailable {
                kind,
                path: self.root.join(kind.path_element()),
            })
    }
}

fn load_directory(path: &Path) -> Result<ManifestSet> {
    let entries = std::fs::read_dir(path).map_err(|source| Error::Io {
        path: path.to_path_buf(),
        source,
    })?;

    let mut files = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|source| Error::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let file = entry.path();
        let is_manifest = file
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| MANIFEST_EXTENSIONS.contains(&ext));
        if file.is_file() && is_manifest {
            files.push(file);
        }
    }
    files.sort();

    let mut documents = Vec::new();
    for file in &files {
        let content = std::fs::read_to_string(file).map_err(|source| Error::Io {
            path: file.clone(),
            source,
        })?;
        let parsed = parse_documents(&content)?;
        debug!(file = %file.display(), documents = parsed.len(), "Read manifest file");
        documents.extend(parsed);
    }

    ManifestSet::from_values(documents)
}

/// Parse a multi-document YAML (or JSON) stream, skipping empty documents
pub fn parse_documents(content: &str) -> Result<Vec<serde_json::Value>> {
    let mut documents = Vec::new();
    for document in serde_yaml::Deserializer::from_str(content) {
        let value = serde_json::Value::deserialize(document)?;
        if !value.is_null() {
            documents.push(value);
        }
    }
    Ok(documents)
}

/// A version names exactly one directory below the component root
fn is_single_segment(version: &str) -> bool {
    let mut components = Path::new(version).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    )
}

/// Compare version strings segment by segment, numerically where both
/// segments are numbers. A leading "v" is ignored.
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    let segments = |v: &str| -> Vec<String> {
        v.trim_start_matches('v')
            .split(['.', '-'])
            .map(str::to_string)
            .collect()
    };
    let (left, right) = (segments(a), segments(b));

    for (l, r) in left.iter().zip(right.iter()) {
        let ordering = match (l.parse::<u64>(), r.parse::<u64>()) {
            (Ok(l), Ok(r)) => l.cmp(&r),
            _ => l.cmp(r),
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    left.len().cmp(&right.len())
}
