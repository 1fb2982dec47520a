//! The per-run artifact catalog and its JSON persistence.
//!
//! Each kind is stored as an array of records in `<work>/<Label>.json`. A
//! non-empty file short-circuits discovery for its kind; a missing or empty
//! one triggers live discovery when a device is available.

use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

use crate::artifact::{Artifact, ArtifactKind, BytecodeArtifact, ElfArtifact, PackageArtifact};
use crate::device::DeviceError;
use crate::discovery::Discovery;
use crate::layout::WorkLayout;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("Failed to access catalog {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Malformed catalog {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("Discovery failed: {0}")]
    Discovery(#[from] DeviceError),
}

/// Write `artifacts` as a pretty-printed JSON array.
pub fn save_artifacts<T: Serialize>(path: &Path, artifacts: &[T]) -> Result<(), CatalogError> {
    let body = serde_json::to_string_pretty(artifacts)
        .map_err(|source| CatalogError::Json { path: path.to_path_buf(), source })?;
    fs::write(path, body).map_err(|source| CatalogError::Io { path: path.to_path_buf(), source })
}

pub fn load_artifacts<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>, CatalogError> {
    let body =
        fs::read(path).map_err(|source| CatalogError::Io { path: path.to_path_buf(), source })?;
    serde_json::from_slice(&body).map_err(|source| CatalogError::Json { path: path.to_path_buf(), source })
}

/// Load a persisted catalog, or `None` if the file is absent or empty.
pub fn load_cached<T: DeserializeOwned>(path: &Path) -> Result<Option<Vec<T>>, CatalogError> {
    match fs::metadata(path) {
        Ok(meta) if meta.len() > 0 => load_artifacts(path).map(Some),
        Ok(_) => Ok(None),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(source) => Err(CatalogError::Io { path: path.to_path_buf(), source }),
    }
}

/// Immutable record of every artifact known to a run.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    elfs: Vec<ElfArtifact>,
    bytecode: Vec<BytecodeArtifact>,
    packages: Vec<PackageArtifact>,
}

impl Catalog {
    /// Build a catalog; artifacts repeating an earlier path are dropped.
    pub fn new(
        elfs: Vec<ElfArtifact>,
        bytecode: Vec<BytecodeArtifact>,
        packages: Vec<PackageArtifact>,
    ) -> Self {
        Self { elfs: dedupe(elfs), bytecode: dedupe(bytecode), packages: dedupe(packages) }
    }

    pub fn elfs(&self) -> &[ElfArtifact] {
        &self.elfs
    }

    pub fn bytecode(&self) -> &[BytecodeArtifact] {
        &self.bytecode
    }

    pub fn packages(&self) -> &[PackageArtifact] {
        &self.packages
    }

    pub fn count(&self, kind: ArtifactKind) -> usize {
        match kind {
            ArtifactKind::Elf => self.elfs.len(),
            ArtifactKind::Bytecode => self.bytecode.len(),
            ArtifactKind::Package => self.packages.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        ArtifactKind::ALL.iter().all(|kind| self.count(*kind) == 0)
    }

    /// Load the persisted catalogs under `layout`; missing kinds are empty.
    pub fn load(layout: &WorkLayout) -> Result<Self, CatalogError> {
        Self::load_or_discover(layout, None)
    }

    /// Load each kind from disk, discovering (and persisting) the ones that are missing.
    pub fn load_or_discover(
        layout: &WorkLayout,
        discovery: Option<&Discovery<'_>>,
    ) -> Result<Self, CatalogError> {
        let elfs = load_kind(layout, ArtifactKind::Elf, discovery.map(|d| {
            move || d.discover_elfs(layout.staging_root(ArtifactKind::Elf))
        }))?;
        let bytecode = load_kind(layout, ArtifactKind::Bytecode, discovery.map(|d| {
            move || d.discover_bytecode(layout.staging_root(ArtifactKind::Bytecode))
        }))?;
        let packages = load_kind(layout, ArtifactKind::Package, discovery.map(|d| {
            move || d.discover_packages(layout.staging_root(ArtifactKind::Package))
        }))?;
        Ok(Self::new(elfs, bytecode, packages))
    }

    /// Persist every kind under `layout`.
    pub fn save(&self, layout: &WorkLayout) -> Result<(), CatalogError> {
        save_artifacts(&layout.catalog_file(ArtifactKind::Elf), &self.elfs)?;
        save_artifacts(&layout.catalog_file(ArtifactKind::Bytecode), &self.bytecode)?;
        save_artifacts(&layout.catalog_file(ArtifactKind::Package), &self.packages)
    }
}

fn load_kind<T, F>(
    layout: &WorkLayout,
    kind: ArtifactKind,
    discover: Option<F>,
) -> Result<Vec<T>, CatalogError>
where
    T: Serialize + DeserializeOwned,
    F: FnOnce() -> Result<Vec<T>, DeviceError>,
{
    let path = layout.catalog_file(kind);
    if let Some(cached) = load_cached(&path)? {
        info!(kind = kind.label(), count = cached.len(), "loaded persisted catalog");
        return Ok(cached);
    }
    match discover {
        Some(discover) => {
            let found = discover()?;
            save_artifacts(&path, &found)?;
            Ok(found)
        }
        None => {
            warn!(kind = kind.label(), path = %path.display(), "no persisted catalog");
            Ok(Vec::new())
        }
    }
}

fn dedupe<A: Artifact>(artifacts: Vec<A>) -> Vec<A> {
    let mut seen = HashSet::new();
    artifacts.into_iter().filter(|a| seen.insert(a.path().to_string())).collect()
}
