//! End-to-end orchestration of one run.
//!
//! A run prepares the work directory, captures the device context, loads or
//! discovers the catalog, stages artifact bytes, resolves dependencies on the
//! shared pool, assembles the graph, extracts the closure of the target and
//! exports it. Only environment-level problems abort a run.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::artifact::{normalize_path, ArtifactKind};
use crate::catalog::Catalog;
use crate::config::RunConfig;
use crate::decompiler::{Decompiler, ExternalDecompiler};
use crate::device::{Device, DeviceContext};
use crate::discovery::Discovery;
use crate::export::{edge_count, export_graph, GraphvizRenderer};
use crate::graph::{DependencyGraph, ExportView};
use crate::layout::WorkLayout;
use crate::resolver::{BytecodeResolver, ElfResolver, RawDependencies};
use crate::scheduler::TaskPool;

const TEMP_PREFIX: &str = "revdep_";

/// Summary of a run, written to `run.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunReport {
    pub target: String,
    pub work_dir: PathBuf,
    pub offline: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub platform: String,
    pub brand: String,
    pub fingerprint: String,
    pub elf_count: usize,
    pub bytecode_count: usize,
    pub package_count: usize,
    pub closure_size: usize,
    pub edge_count: usize,
}

#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub view: ExportView,
    pub report: RunReport,
}

pub struct DependencyFinder {
    config: RunConfig,
    target: String,
    layout: WorkLayout,
    pool: TaskPool,
}

impl DependencyFinder {
    /// Validate the configuration and prepare the work directory.
    pub fn new(config: RunConfig) -> Result<Self> {
        let target = config
            .target
            .as_deref()
            .map(normalize_path)
            .filter(|t| !t.is_empty())
            .context("No target library given")?;
        let root = prepare_work_dir(config.work_dir.as_deref())?;
        let layout = WorkLayout::new(&root);
        for kind in ArtifactKind::ALL {
            let dir = layout.staging_root(kind);
            fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create staging dir: {}", dir.display()))?;
        }
        let pool = TaskPool::new(config.threads).context("Failed to build worker pool")?;
        info!(target = %target, work_dir = %root.display(), threads = pool.threads(), "run prepared");
        Ok(Self { config, target, layout, pool })
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn layout(&self) -> &WorkLayout {
        &self.layout
    }

    pub fn pool(&self) -> &TaskPool {
        &self.pool
    }

    /// Full run against a live device.
    pub fn run_with_device(&self, device: &dyn Device) -> Result<RunOutcome> {
        let started_at = Utc::now();
        let context = DeviceContext::capture(device).context("Failed to read device properties")?;

        let discovery = Discovery::new(device, &self.pool, &self.config);
        let catalog = Catalog::load_or_discover(&self.layout, Some(&discovery))
            .context("Failed to build artifact catalog")?;

        discovery.stage(catalog.elfs());
        if self.config.include_bytecode {
            discovery.stage(catalog.bytecode());
            discovery.stage(catalog.packages());
        }

        self.finish(&catalog, context, started_at, false)
    }

    /// Rebuild the graph from persisted catalogs and already staged bytes.
    pub fn run_offline(&self, context: DeviceContext) -> Result<RunOutcome> {
        let started_at = Utc::now();
        let catalog = Catalog::load(&self.layout).context("Failed to load artifact catalog")?;
        if catalog.elfs().is_empty() {
            bail!(
                "No ELF catalog under {}; run against a device first",
                self.layout.root.display()
            );
        }
        self.finish(&catalog, context, started_at, true)
    }

    fn finish(
        &self,
        catalog: &Catalog,
        context: DeviceContext,
        started_at: DateTime<Utc>,
        offline: bool,
    ) -> Result<RunOutcome> {
        let decompiler = self
            .config
            .include_bytecode
            .then(|| ExternalDecompiler::from_tools(&self.config.tools));
        let (view, closure_size) = self.closure_view(
            catalog,
            &context,
            decompiler.as_ref().map(|d| d as &dyn Decompiler),
        );

        let renderer = GraphvizRenderer::from_config(&self.config);
        export_graph(&view, &self.layout, Some(&renderer)).with_context(|| {
            format!("Failed to write graph export: {}", self.layout.root.display())
        })?;

        let report = RunReport {
            target: self.target.clone(),
            work_dir: self.layout.root.clone(),
            offline,
            started_at,
            finished_at: Utc::now(),
            platform: context.platform,
            brand: context.brand,
            fingerprint: context.fingerprint,
            elf_count: catalog.count(ArtifactKind::Elf),
            bytecode_count: catalog.count(ArtifactKind::Bytecode),
            package_count: catalog.count(ArtifactKind::Package),
            closure_size,
            edge_count: edge_count(&view),
        };
        let json = serde_json::to_string_pretty(&report)?;
        fs::write(&self.layout.report_path, json).with_context(|| {
            format!("Failed to write run report: {}", self.layout.report_path.display())
        })?;
        info!(closure = closure_size, edges = report.edge_count, "run finished");

        Ok(RunOutcome { view, report })
    }

    /// Resolve every artifact, assemble the graph and return the target's export view.
    pub fn build_dependency_graph(
        &self,
        catalog: &Catalog,
        context: &DeviceContext,
        decompiler: Option<&dyn Decompiler>,
    ) -> ExportView {
        self.closure_view(catalog, context, decompiler).0
    }

    fn closure_view(
        &self,
        catalog: &Catalog,
        context: &DeviceContext,
        decompiler: Option<&dyn Decompiler>,
    ) -> (ExportView, usize) {
        let results = self.resolve_all(catalog, context, decompiler);
        let graph = DependencyGraph::assemble(&results, catalog.elfs());
        let closure = graph.closure(&self.target);
        (closure.export_view(), closure.len())
    }

    fn resolve_all(
        &self,
        catalog: &Catalog,
        context: &DeviceContext,
        decompiler: Option<&dyn Decompiler>,
    ) -> Vec<RawDependencies> {
        let mut results = Vec::new();
        for kind in ArtifactKind::ALL {
            match kind {
                ArtifactKind::Elf => {
                    info!(count = catalog.elfs().len(), "resolving ELF dependencies");
                    let resolver = ElfResolver::new(catalog.elfs(), context);
                    results.extend(self.pool.resolve_batch(catalog.elfs(), |a| resolver.resolve(a)));
                }
                ArtifactKind::Bytecode => {
                    let Some(decompiler) = decompiler else {
                        continue;
                    };
                    info!(count = catalog.bytecode().len(), "resolving bytecode dependencies");
                    let resolver = BytecodeResolver::new(catalog.elfs(), decompiler, &self.layout);
                    results.extend(
                        self.pool.resolve_batch(catalog.bytecode(), |c| resolver.resolve(c)),
                    );
                }
                ArtifactKind::Package => {}
            }
        }
        results
    }
}

/// Use `dir` (created if needed, must be writable) or a fresh `revdep_` temp dir.
pub fn prepare_work_dir(dir: Option<&Path>) -> Result<PathBuf> {
    match dir {
        Some(dir) => {
            fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create work dir: {}", dir.display()))?;
            tempfile::tempfile_in(dir)
                .with_context(|| format!("Work dir is not writable: {}", dir.display()))?;
            Ok(dir.to_path_buf())
        }
        None => {
            let temp = tempfile::Builder::new()
                .prefix(TEMP_PREFIX)
                .tempdir()
                .context("Failed to create temporary work dir")?;
            Ok(temp.keep())
        }
    }
}
