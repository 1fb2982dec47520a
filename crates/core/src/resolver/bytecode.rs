//! Dependency inference for vdex/odex containers.
//!
//! A container is normalized to dex, decompiled to Java sources, and the
//! sources are searched for HIDL service factory calls and JNI library loads.

use std::fs;
use std::path::PathBuf;
use std::sync::LazyLock;

use regex::Regex;
use tracing::{debug, instrument, warn};
use walkdir::WalkDir;

use crate::artifact::{Artifact, BytecodeArtifact, ElfArtifact};
use crate::decompiler::Decompiler;
use crate::layout::WorkLayout;
use crate::resolver::{is_system_path, sorted_candidates, DependencyHint, Provenance};

/// Boot class path containers; every app links against them.
pub const BOOTSTRAP_CONTAINERS: [&str; 2] = ["base.vdex", "base.odex"];

static HW_SERVICE_FACTORY: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"HwServiceFactory\.getHw(\w+?)Service\(\)").ok());

static LOAD_LIBRARY: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r#"System\.loadLibrary\("([^"]+)"\)"#).ok());

const SERVICE_SUFFIX: &str = "-service";

pub struct BytecodeResolver<'a> {
    elf_catalog: &'a [ElfArtifact],
    decompiler: &'a dyn Decompiler,
    layout: &'a WorkLayout,
}

impl<'a> BytecodeResolver<'a> {
    pub fn new(
        elf_catalog: &'a [ElfArtifact],
        decompiler: &'a dyn Decompiler,
        layout: &'a WorkLayout,
    ) -> Self {
        Self { elf_catalog, decompiler, layout }
    }

    #[instrument(skip_all, fields(artifact = %container.path))]
    pub fn resolve(&self, container: &BytecodeArtifact) -> Vec<DependencyHint> {
        if BOOTSTRAP_CONTAINERS.contains(&container.file_name()) {
            return Vec::new();
        }
        let Some(source_dir) = self.stage_sources(container) else {
            return Vec::new();
        };

        let mut hints = Vec::new();
        let files = WalkDir::new(&source_dir)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            .filter_map(Result::ok)
            .filter(|entry| entry.file_type().is_file());
        for entry in files {
            match fs::read(entry.path()) {
                Ok(bytes) => {
                    hints.extend(self.scan_sources(container, &String::from_utf8_lossy(&bytes)))
                }
                Err(e) => debug!(file = %entry.path().display(), error = %e, "unreadable source"),
            }
        }
        debug!(count = hints.len(), "resolved hints");
        hints
    }

    /// Run the decompiler pipeline; `None` if the source directory never materializes.
    fn stage_sources(&self, container: &BytecodeArtifact) -> Option<PathBuf> {
        let normalized_dir = self.layout.normalized_output(container.stem_path());
        let source_dir = self.layout.source_output(container.stem_path());

        match self.decompiler.normalize_bytecode(&container.local_path(), &normalized_dir) {
            Ok(dex) => {
                if let Err(e) = self.decompiler.decompile_to_source(&dex, &source_dir) {
                    warn!(error = %e, "decompilation failed");
                }
            }
            Err(e) => warn!(error = %e, "normalization failed"),
        }
        source_dir.is_dir().then_some(source_dir)
    }

    /// Hints found in one chunk of decompiled source text.
    pub fn scan_sources(&self, container: &BytecodeArtifact, text: &str) -> Vec<DependencyHint> {
        let mut hints = Vec::new();

        if let Some(pattern) = HW_SERVICE_FACTORY.as_ref() {
            for caps in pattern.captures_iter(text) {
                let service = caps[1].to_lowercase();
                if let Some(path) = self.service_binary(&service) {
                    hints.push(DependencyHint::new(path, Provenance::SourceHeuristic));
                }
            }
        }

        if let Some(pattern) = LOAD_LIBRARY.as_ref() {
            for caps in pattern.captures_iter(text) {
                if let Some(path) = self.native_library(&caps[1], &container.path) {
                    hints.push(DependencyHint::new(path, Provenance::SourceHeuristic));
                }
            }
        }

        hints
    }

    /// The single `-service` binary whose path mentions `service`.
    fn service_binary(&self, service: &str) -> Option<String> {
        let candidates = sorted_candidates(self.elf_catalog, |c| {
            c.path.ends_with(SERVICE_SUFFIX) && c.path.contains(service)
        });
        match candidates.as_slice() {
            [only] => Some(only.path.clone()),
            _ => None,
        }
    }

    /// The JNI library loaded as `name` by a container at `container_path`.
    fn native_library(&self, name: &str, container_path: &str) -> Option<String> {
        let mut candidates = sorted_candidates(self.elf_catalog, |c| {
            c.path.ends_with(".so") && c.path.contains(name)
        });
        if candidates.len() > 1 {
            let wide = container_path.contains("arm64");
            candidates.retain(|c| c.path.contains("64") == wide);
            let system = candidates.iter().copied().find(|c| is_system_path(&c.path));
            return system.or_else(|| candidates.first().copied()).map(|c| c.path.clone());
        }
        candidates.first().map(|c| c.path.clone())
    }
}
