//! Bytecode decompilation through external tools.
//!
//! Both steps are idempotent: an output directory that already has entries is
//! treated as done and the tool is not invoked again.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use thiserror::Error;
use tracing::{debug, warn};

use crate::config::ToolPaths;

/// Fallback name of the dex file produced for a container.
const DEFAULT_DEX_NAME: &str = "classes.dex";

#[derive(Debug, Error)]
pub enum DecompileError {
    #[error("Failed to spawn {tool}: {source}")]
    Spawn {
        tool: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{tool} failed: {reason}")]
    Tool { tool: String, reason: String },
    #[error("Failed to prepare {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Converts bytecode containers into searchable source text.
pub trait Decompiler: Send + Sync {
    /// Normalize a container into a dex file under `out_dir` and return its path.
    fn normalize_bytecode(&self, container: &Path, out_dir: &Path)
        -> Result<PathBuf, DecompileError>;

    /// Decompile a dex file into sources under `out_dir`.
    fn decompile_to_source(&self, intermediate: &Path, out_dir: &Path)
        -> Result<(), DecompileError>;
}

/// True when `dir` exists and has at least one entry.
pub fn is_populated(dir: &Path) -> bool {
    fs::read_dir(dir).map(|mut entries| entries.next().is_some()).unwrap_or(false)
}

/// First `*.dex` file in `dir` (by name), falling back to `classes.dex`.
pub fn dex_in(dir: &Path) -> PathBuf {
    let mut dex_files: Vec<PathBuf> = fs::read_dir(dir)
        .into_iter()
        .flatten()
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|path| path.extension().is_some_and(|ext| ext == "dex"))
        .collect();
    dex_files.sort();
    dex_files.into_iter().next().unwrap_or_else(|| dir.join(DEFAULT_DEX_NAME))
}

/// vdexExtractor + jadx.
#[derive(Debug, Clone)]
pub struct ExternalDecompiler {
    vdex_extractor: PathBuf,
    jadx: PathBuf,
}

impl ExternalDecompiler {
    pub fn new(vdex_extractor: impl Into<PathBuf>, jadx: impl Into<PathBuf>) -> Self {
        Self { vdex_extractor: vdex_extractor.into(), jadx: jadx.into() }
    }

    pub fn from_tools(tools: &ToolPaths) -> Self {
        Self::new(&tools.vdex_extractor, &tools.jadx)
    }
}

impl Decompiler for ExternalDecompiler {
    fn normalize_bytecode(
        &self,
        container: &Path,
        out_dir: &Path,
    ) -> Result<PathBuf, DecompileError> {
        // odex containers already hold dex bytecode.
        if container.extension().and_then(|ext| ext.to_str()) != Some("vdex") {
            return Ok(container.to_path_buf());
        }
        if is_populated(out_dir) {
            debug!(out = %out_dir.display(), "normalized output present; skipping");
            return Ok(dex_in(out_dir));
        }
        fs::create_dir_all(out_dir)
            .map_err(|source| DecompileError::Io { path: out_dir.to_path_buf(), source })?;

        let tool = self.vdex_extractor.display().to_string();
        let output = Command::new(&self.vdex_extractor)
            .arg(format!("--input={}", container.display()))
            .arg(format!("--output={}", out_dir.display()))
            .args(["--deps", "--dis"])
            .output()
            .map_err(|source| DecompileError::Spawn { tool: tool.clone(), source })?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        if let Some(line) = stdout.lines().find(|line| line.starts_with("[ERROR]")) {
            return Err(DecompileError::Tool { tool, reason: line.to_string() });
        }
        if !output.status.success() {
            return Err(DecompileError::Tool { tool, reason: format!("exited with {}", output.status) });
        }
        Ok(dex_in(out_dir))
    }

    fn decompile_to_source(
        &self,
        intermediate: &Path,
        out_dir: &Path,
    ) -> Result<(), DecompileError> {
        if is_populated(out_dir) {
            debug!(out = %out_dir.display(), "sources present; skipping");
            return Ok(());
        }
        let tool = self.jadx.display().to_string();
        let output = Command::new(&self.jadx)
            .args(["-Pdex-input.verify-checksum=no", "--no-res", "--escape-unicode", "--show-bad-code"])
            .arg("-ds")
            .arg(out_dir)
            .arg(intermediate)
            .output()
            .map_err(|source| DecompileError::Spawn { tool: tool.clone(), source })?;
        // jadx exits non-zero whenever a single class fails; partial output is still useful.
        if !output.status.success() {
            warn!(
                input = %intermediate.display(),
                status = %output.status,
                "decompiler reported errors"
            );
        }
        Ok(())
    }
}
