use std::path::{Path, PathBuf};

use crate::artifact::ArtifactKind;

/// Logical layout of a run's working directory.
///
/// This is derived from a chosen root path. It does *not* perform any IO itself;
/// the pipeline is responsible for creating directories and files based on it.
#[derive(Debug, Clone)]
pub struct WorkLayout {
    /// Root of the working directory.
    pub root: PathBuf,
    /// Staging root for ELF bytes (Elf).
    pub elf_dir: PathBuf,
    /// Staging root for bytecode containers (Vdex).
    pub bytecode_dir: PathBuf,
    /// Staging root for packages (Apk).
    pub package_dir: PathBuf,
    /// Normalized bytecode output, one directory per container (vdex2dex).
    pub normalized_dir: PathBuf,
    /// Decompiled sources, one directory per container (jadx_source).
    pub sources_dir: PathBuf,
    /// Graph description handed to the renderer.
    pub dot_path: PathBuf,
    /// Unflattened graph description.
    pub flat_dot_path: PathBuf,
    /// Rendered image.
    pub image_path: PathBuf,
    /// Export view as JSON.
    pub export_json_path: PathBuf,
    /// Run report.
    pub report_path: PathBuf,
}

impl WorkLayout {
    /// Compute the layout for a working directory rooted at `root`.
    ///
    /// This does *not* touch the filesystem.
    pub fn new(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref().to_path_buf();
        let elf_dir = root.join(ArtifactKind::Elf.label());
        let bytecode_dir = root.join(ArtifactKind::Bytecode.label());
        let package_dir = root.join(ArtifactKind::Package.label());
        let normalized_dir = root.join("vdex2dex");
        let sources_dir = root.join("jadx_source");
        let dot_path = root.join("deps.dot");
        let flat_dot_path = root.join("deps_flat.dot");
        let image_path = root.join("deps.png");
        let export_json_path = root.join("deps.json");
        let report_path = root.join("run.json");

        Self {
            root,
            elf_dir,
            bytecode_dir,
            package_dir,
            normalized_dir,
            sources_dir,
            dot_path,
            flat_dot_path,
            image_path,
            export_json_path,
            report_path,
        }
    }

    /// Persisted catalog file for one artifact kind (e.g. `<root>/Elf.json`).
    pub fn catalog_file(&self, kind: ArtifactKind) -> PathBuf {
        self.root.join(kind.catalog_file_name())
    }

    /// Local staging root for one artifact kind.
    pub fn staging_root(&self, kind: ArtifactKind) -> &Path {
        match kind {
            ArtifactKind::Elf => &self.elf_dir,
            ArtifactKind::Bytecode => &self.bytecode_dir,
            ArtifactKind::Package => &self.package_dir,
        }
    }

    /// Normalization output directory for a container keyed by its stem path.
    pub fn normalized_output(&self, stem_path: &str) -> PathBuf {
        self.normalized_dir.join(stem_path)
    }

    /// Decompiled source directory for a container keyed by its stem path.
    pub fn source_output(&self, stem_path: &str) -> PathBuf {
        self.sources_dir.join(stem_path)
    }
}
