//! Artifact model: the binary units discovered on a device during one run.
//!
//! Three kinds exist and the set is closed:
//! - `ElfArtifact`: shared libraries and executables.
//! - `BytecodeArtifact`: vdex/odex containers.
//! - `PackageArtifact`: installed apks.
//!
//! Paths are device paths with the leading slash stripped once at creation, so
//! `path` can be joined onto a local staging root and compared as plain text.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use serde::{Deserialize, Serialize};

use crate::elf::{probe_architecture, ArtifactError};

/// Closed set of artifact kinds handled by a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ArtifactKind {
    Elf,
    Bytecode,
    Package,
}

impl ArtifactKind {
    pub const ALL: [ArtifactKind; 3] =
        [ArtifactKind::Elf, ArtifactKind::Bytecode, ArtifactKind::Package];

    /// Label used for the catalog file name and the staging directory.
    pub fn label(self) -> &'static str {
        match self {
            ArtifactKind::Elf => "Elf",
            ArtifactKind::Bytecode => "Vdex",
            ArtifactKind::Package => "Apk",
        }
    }

    /// File name of the persisted catalog for this kind (e.g. `Elf.json`).
    pub fn catalog_file_name(self) -> String {
        format!("{}.json", self.label())
    }
}

/// Machine kind and bit width of an ELF binary.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Architecture {
    pub machine: String,
    pub bits: u8,
}

impl Architecture {
    pub fn new(machine: impl Into<String>, bits: u8) -> Self {
        Self { machine: machine.into(), bits }
    }

    pub fn is_64_bit(&self) -> bool {
        self.bits == 64
    }
}

/// Strip surrounding whitespace and the leading slash of a device path.
pub fn normalize_path(path: &str) -> String {
    path.trim().trim_start_matches('/').to_string()
}

/// Last path component of a normalized path.
pub fn file_name_of(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// Behavior shared by every artifact kind.
pub trait Artifact {
    const KIND: ArtifactKind;

    /// Display label.
    fn name(&self) -> &str;

    /// Run-relative path (device path without the leading slash).
    fn path(&self) -> &str;

    /// Local root under which the artifact's bytes are staged.
    fn work_root(&self) -> &Path;

    /// Absolute device path the artifact was discovered at.
    fn device_path(&self) -> String {
        format!("/{}", self.path())
    }

    /// Location of the staged copy on the local filesystem.
    fn local_path(&self) -> PathBuf {
        self.work_root().join(self.path())
    }

    fn file_name(&self) -> &str {
        file_name_of(self.path())
    }
}

/// A shared library or executable.
///
/// The architecture is read lazily from the staged bytes the first time it is
/// needed and cached for the rest of the run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "ElfRecord", into = "ElfRecord")]
pub struct ElfArtifact {
    pub name: String,
    pub path: String,
    pub work_root: PathBuf,
    architecture: OnceLock<Architecture>,
}

/// Persisted form of an `ElfArtifact`.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ElfRecord {
    name: String,
    path: String,
    work_root: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    architecture: Option<Architecture>,
}

impl From<ElfRecord> for ElfArtifact {
    fn from(record: ElfRecord) -> Self {
        let artifact = ElfArtifact::new(record.name, &record.path, record.work_root);
        match record.architecture {
            Some(arch) => artifact.with_architecture(arch),
            None => artifact,
        }
    }
}

impl From<ElfArtifact> for ElfRecord {
    fn from(artifact: ElfArtifact) -> Self {
        let architecture = artifact.architecture.get().cloned();
        ElfRecord {
            name: artifact.name,
            path: artifact.path,
            work_root: artifact.work_root,
            architecture,
        }
    }
}

impl ElfArtifact {
    pub fn new(name: impl Into<String>, path: &str, work_root: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            path: normalize_path(path),
            work_root: work_root.into(),
            architecture: OnceLock::new(),
        }
    }

    /// Build from a device path, naming the artifact after its file name.
    pub fn from_device_path(device_path: &str, work_root: impl Into<PathBuf>) -> Self {
        let path = normalize_path(device_path);
        let name = file_name_of(&path).to_string();
        Self::new(name, &path, work_root)
    }

    /// Seed the architecture cache (used when loading persisted catalogs).
    pub fn with_architecture(self, architecture: Architecture) -> Self {
        let _ = self.architecture.set(architecture);
        self
    }

    /// Architecture if it has already been resolved.
    pub fn cached_architecture(&self) -> Option<&Architecture> {
        self.architecture.get()
    }

    /// Resolve the architecture, reading the staged ELF header on first use.
    ///
    /// A failed read is not cached; a successful one is never re-derived.
    pub fn architecture(&self) -> Result<&Architecture, ArtifactError> {
        if let Some(arch) = self.architecture.get() {
            return Ok(arch);
        }
        let probed = probe_architecture(&self.local_path())?;
        Ok(self.architecture.get_or_init(|| probed))
    }

    /// True only when the architecture is known to be 64-bit.
    pub fn is_64_bit(&self) -> bool {
        self.architecture().map(Architecture::is_64_bit).unwrap_or(false)
    }
}

impl Artifact for ElfArtifact {
    const KIND: ArtifactKind = ArtifactKind::Elf;

    fn name(&self) -> &str {
        &self.name
    }

    fn path(&self) -> &str {
        &self.path
    }

    fn work_root(&self) -> &Path {
        &self.work_root
    }
}

/// A vdex or odex bytecode container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BytecodeArtifact {
    pub name: String,
    pub path: String,
    pub work_root: PathBuf,
}

impl BytecodeArtifact {
    pub fn new(name: impl Into<String>, path: &str, work_root: impl Into<PathBuf>) -> Self {
        Self { name: name.into(), path: normalize_path(path), work_root: work_root.into() }
    }

    pub fn from_device_path(device_path: &str, work_root: impl Into<PathBuf>) -> Self {
        let path = normalize_path(device_path);
        let name = file_name_of(&path).to_string();
        Self::new(name, &path, work_root)
    }

    pub fn is_vdex(&self) -> bool {
        self.path.ends_with(".vdex")
    }

    /// Path without the container extension; keys the per-artifact output directories.
    pub fn stem_path(&self) -> &str {
        match self.path.rfind('.') {
            Some(idx) if !self.path[idx..].contains('/') => &self.path[..idx],
            _ => &self.path,
        }
    }
}

impl Artifact for BytecodeArtifact {
    const KIND: ArtifactKind = ArtifactKind::Bytecode;

    fn name(&self) -> &str {
        &self.name
    }

    fn path(&self) -> &str {
        &self.path
    }

    fn work_root(&self) -> &Path {
        &self.work_root
    }
}

/// An installed package, named after its package name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageArtifact {
    pub name: String,
    pub path: String,
    pub work_root: PathBuf,
}

impl PackageArtifact {
    pub fn new(package_name: impl Into<String>, path: &str, work_root: impl Into<PathBuf>) -> Self {
        Self { name: package_name.into(), path: normalize_path(path), work_root: work_root.into() }
    }
}

impl Artifact for PackageArtifact {
    const KIND: ArtifactKind = ArtifactKind::Package;

    fn name(&self) -> &str {
        &self.name
    }

    fn path(&self) -> &str {
        &self.path
    }

    fn work_root(&self) -> &Path {
        &self.work_root
    }
}
