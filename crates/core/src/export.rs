//! Graph export: DOT text, JSON export view and an optional rendered image.

use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use thiserror::Error;
use tracing::{info, warn};

use crate::config::RunConfig;
use crate::graph::ExportView;
use crate::layout::WorkLayout;

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("Failed to spawn {tool}: {source}")]
    Spawn {
        tool: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{tool} exited with {status}: {stderr}")]
    Status { tool: String, status: std::process::ExitStatus, stderr: String },
}

/// Turns a DOT file into an image.
pub trait GraphRenderer {
    fn render(&self, dot: &Path, flat_dot: &Path, image: &Path) -> Result<(), RenderError>;
}

/// `unflatten` followed by `dot -Tpng`.
#[derive(Debug, Clone)]
pub struct GraphvizRenderer {
    unflatten: PathBuf,
    dot: PathBuf,
    stagger: u32,
}

impl GraphvizRenderer {
    pub fn new(unflatten: impl Into<PathBuf>, dot: impl Into<PathBuf>, stagger: u32) -> Self {
        Self { unflatten: unflatten.into(), dot: dot.into(), stagger }
    }

    pub fn from_config(config: &RunConfig) -> Self {
        Self::new(&config.tools.unflatten, &config.tools.dot, config.unflatten_stagger)
    }
}

impl GraphRenderer for GraphvizRenderer {
    fn render(&self, dot: &Path, flat_dot: &Path, image: &Path) -> Result<(), RenderError> {
        run_tool(
            Command::new(&self.unflatten)
                .arg("-l")
                .arg(self.stagger.to_string())
                .arg("-f")
                .arg("-o")
                .arg(flat_dot)
                .arg(dot),
        )?;
        let mut image_arg = std::ffi::OsString::from("-o");
        image_arg.push(image);
        run_tool(Command::new(&self.dot).arg("-Tpng").arg(flat_dot).arg(image_arg))
    }
}

fn run_tool(command: &mut Command) -> Result<(), RenderError> {
    let tool = command.get_program().to_string_lossy().to_string();
    let output = command
        .output()
        .map_err(|source| RenderError::Spawn { tool: tool.clone(), source })?;
    if !output.status.success() {
        return Err(RenderError::Status {
            tool,
            status: output.status,
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    Ok(())
}

/// DOT description with one `"dependency" -> "dependent";` statement per edge.
pub fn render_dot(view: &ExportView) -> String {
    let mut out = String::from("digraph DependencyTree {\n");
    for (dependency, dependents) in view {
        for dependent in dependents {
            let _ = writeln!(out, "  \"{}\" -> \"{}\";", escape(dependency), escape(dependent));
        }
    }
    out.push_str("}\n");
    out
}

fn escape(label: &str) -> String {
    label.replace('\\', "\\\\").replace('"', "\\\"")
}

/// Write `deps.dot` and `deps.json`, then render the image if a renderer is given.
///
/// Renderer failures are logged and do not fail the export.
pub fn export_graph(
    view: &ExportView,
    layout: &WorkLayout,
    renderer: Option<&dyn GraphRenderer>,
) -> std::io::Result<()> {
    fs::write(&layout.dot_path, render_dot(view))?;
    let json = serde_json::to_string_pretty(view).map_err(std::io::Error::other)?;
    fs::write(&layout.export_json_path, json)?;
    info!(dot = %layout.dot_path.display(), edges = edge_count(view), "graph exported");

    if let Some(renderer) = renderer {
        match renderer.render(&layout.dot_path, &layout.flat_dot_path, &layout.image_path) {
            Ok(()) => info!(image = %layout.image_path.display(), "graph rendered"),
            Err(e) => warn!(error = %e, "graph rendering failed"),
        }
    }
    Ok(())
}

pub fn edge_count(view: &ExportView) -> usize {
    view.values().map(Vec::len).sum()
}
