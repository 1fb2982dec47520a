use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use revdep_core::config::RunConfig;
use revdep_core::graph::ExportView;
use revdep_core::layout::WorkLayout;
use revdep_core::pipeline::RunOutcome;

use crate::canonicalize_or_current;

/// Load the run configuration file if one was given, else defaults.
pub fn load_run_config(config: Option<&str>) -> Result<RunConfig> {
    let path = config.map(PathBuf::from);
    RunConfig::load_or_default(path.as_deref()).with_context(|| match &path {
        Some(p) => format!("Failed to load run config: {}", p.display()),
        None => "Failed to build default run config".to_string(),
    })
}

/// Absolute form of an optional work dir argument.
pub fn resolve_work_dir(work_dir: Option<&str>) -> Result<Option<PathBuf>> {
    work_dir.map(canonicalize_or_current).transpose()
}

/// Render the export view as pretty JSON.
pub fn view_json(view: &ExportView) -> Result<String> {
    serde_json::to_string_pretty(view).context("Failed to serialize export view")
}

/// Human-readable summary of a finished run.
pub fn print_outcome(outcome: &RunOutcome) {
    let report = &outcome.report;
    println!("Dependency graph for {}", report.target);
    println!("  Work dir: {}", report.work_dir.display());
    println!(
        "  Catalog: {} ELF, {} bytecode, {} packages",
        report.elf_count, report.bytecode_count, report.package_count
    );
    println!("  Closure: {} nodes, {} edges", report.closure_size, report.edge_count);
    let layout = WorkLayout::new(&report.work_dir);
    print_output("DOT", &layout.dot_path);
    print_output("JSON", &layout.export_json_path);
    print_output("Image", &layout.image_path);
    print_output("Report", &layout.report_path);
}

fn print_output(label: &str, path: &Path) {
    let state = if path.is_file() { "written" } else { "not produced" };
    println!("  {label}: {} ({state})", path.display());
}
