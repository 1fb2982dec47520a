use anyhow::{Context, Result};
use revdep_core::artifact::{Artifact, ArtifactKind};
use revdep_core::catalog::Catalog;
use revdep_core::layout::WorkLayout;
use serde::Serialize;

use crate::canonicalize_or_current;

#[derive(Debug, Serialize)]
pub struct CatalogSummary {
    pub work_dir: String,
    pub elf_count: usize,
    pub bytecode_count: usize,
    pub package_count: usize,
    /// ELF binaries whose architecture is recorded in the catalog.
    pub elf_with_architecture: usize,
}

impl CatalogSummary {
    pub fn from_catalog(layout: &WorkLayout, catalog: &Catalog) -> Self {
        Self {
            work_dir: layout.root.display().to_string(),
            elf_count: catalog.count(ArtifactKind::Elf),
            bytecode_count: catalog.count(ArtifactKind::Bytecode),
            package_count: catalog.count(ArtifactKind::Package),
            elf_with_architecture: catalog
                .elfs()
                .iter()
                .filter(|elf| elf.cached_architecture().is_some())
                .count(),
        }
    }
}

/// Summarize the persisted catalogs under `work_dir`.
pub fn catalog_command(work_dir: &str, json: bool) -> Result<()> {
    let root = canonicalize_or_current(work_dir)?;
    let layout = WorkLayout::new(&root);
    let catalog = Catalog::load(&layout)
        .with_context(|| format!("Failed to load catalogs from {}", root.display()))?;
    let summary = CatalogSummary::from_catalog(&layout, &catalog);

    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    println!("Catalog: {}", summary.work_dir);
    println!("- ELF binaries: {}", summary.elf_count);
    println!("- Bytecode containers: {}", summary.bytecode_count);
    println!("- Packages: {}", summary.package_count);
    if catalog.is_empty() {
        println!("(no persisted catalogs)");
        return Ok(());
    }
    println!("Libraries:");
    for elf in catalog.elfs().iter().filter(|elf| elf.file_name().ends_with(".so")) {
        println!("  {}", elf.device_path());
    }
    Ok(())
}
