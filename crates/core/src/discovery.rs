//! Live discovery of artifacts on a device, and staging of their bytes.
//!
//! Top-level directories are listed once, filtered against the skip list, and
//! each surviving directory is scanned as a separate task on the shared pool.

use std::fs;
use std::path::Path;

use tracing::{debug, info, warn};

use crate::artifact::{Artifact, BytecodeArtifact, ElfArtifact, PackageArtifact};
use crate::config::RunConfig;
use crate::device::{Device, DeviceError};
use crate::scheduler::TaskPool;

/// Directory under which Magisk keeps its mirrors; never catalogued.
const MAGISK_MARKER: &str = ".magisk";
const PACKAGE_PREFIX: &str = "package:";

pub struct Discovery<'a> {
    device: &'a dyn Device,
    pool: &'a TaskPool,
    skip_dirs: &'a [String],
    path_filters: &'a [String],
}

impl<'a> Discovery<'a> {
    pub fn new(device: &'a dyn Device, pool: &'a TaskPool, config: &'a RunConfig) -> Self {
        Self { device, pool, skip_dirs: &config.skip_dirs, path_filters: &config.path_filters }
    }

    pub fn device(&self) -> &'a dyn Device {
        self.device
    }

    /// Top-level directories worth scanning.
    pub fn scan_roots(&self) -> Result<Vec<String>, DeviceError> {
        let entries: Vec<String> = self
            .device
            .list_directory("/")?
            .into_iter()
            .filter(|entry| !self.skip_dirs.iter().any(|skip| skip == entry))
            .collect();
        let is_dir = self.pool.run_batch("stat", &entries, |entry| self.is_directory(entry));
        let roots: Vec<String> = entries
            .into_iter()
            .zip(is_dir)
            .filter_map(|(entry, dir)| dir.then_some(entry))
            .collect();
        debug!(roots = ?roots, "scan roots");
        Ok(roots)
    }

    fn is_directory(&self, path: &str) -> bool {
        match self.device.run_privileged_shell(&["stat", "-c", "%F", path]) {
            Ok(kind) => kind.trim() == "directory",
            Err(e) => {
                warn!(path, error = %e, "stat failed");
                false
            }
        }
    }

    pub fn discover_elfs(&self, work_root: &Path) -> Result<Vec<ElfArtifact>, DeviceError> {
        let roots = self.scan_roots()?;
        let found = self.pool.run_batch("elf-scan", &roots, |dir| {
            let script = format!(
                "for node in `find {dir} -type f`; do echo -n \"$node: \"; \
                 dd if=$node bs=1 count=4 2>/dev/null | grep -q 'ELF'; echo $?; done"
            );
            match self.device.run_privileged_shell(&[script.as_str()]) {
                Ok(output) => parse_elf_scan(&output),
                Err(e) => {
                    warn!(dir = %dir, error = %e, "elf scan failed");
                    Vec::new()
                }
            }
        });
        let elfs: Vec<ElfArtifact> = found
            .into_iter()
            .flatten()
            .map(|path| ElfArtifact::from_device_path(&path, work_root))
            .collect();
        info!(count = elfs.len(), "discovered ELF binaries");
        Ok(elfs)
    }

    pub fn discover_bytecode(&self, work_root: &Path) -> Result<Vec<BytecodeArtifact>, DeviceError> {
        let roots = self.scan_roots()?;
        let found = self.pool.run_batch("bytecode-scan", &roots, |dir| {
            let command = format!("find {dir} -type f -iname \"*.?dex\"");
            match self.device.run_privileged_shell(&[command.as_str()]) {
                Ok(output) => parse_bytecode_scan(&output, self.path_filters),
                Err(e) => {
                    warn!(dir = %dir, error = %e, "bytecode scan failed");
                    Vec::new()
                }
            }
        });
        let containers: Vec<BytecodeArtifact> = found
            .into_iter()
            .flatten()
            .map(|path| BytecodeArtifact::from_device_path(&path, work_root))
            .collect();
        info!(count = containers.len(), "discovered bytecode containers");
        Ok(containers)
    }

    pub fn discover_packages(&self, work_root: &Path) -> Result<Vec<PackageArtifact>, DeviceError> {
        let listing = self.device.run_privileged_shell(&["pm", "list", "packages"])?;
        let names = parse_package_list(&listing);
        let paths = self.pool.run_batch("pm-path", &names, |name| {
            match self.device.run_privileged_shell(&["pm", "path", name.as_str()]) {
                Ok(output) => parse_package_list(&output).into_iter().next().unwrap_or_default(),
                Err(e) => {
                    warn!(package = %name, error = %e, "pm path failed");
                    String::new()
                }
            }
        });
        let packages: Vec<PackageArtifact> = names
            .into_iter()
            .zip(paths)
            .filter(|(_, path)| !path.is_empty())
            .map(|(name, path)| PackageArtifact::new(name, &path, work_root))
            .collect();
        info!(count = packages.len(), "discovered packages");
        Ok(packages)
    }

    /// Pull every artifact not yet present locally. Returns the number pulled.
    pub fn stage<A>(&self, artifacts: &[A]) -> usize
    where
        A: Artifact + Sync,
    {
        let pulled = self.pool.run_batch(A::KIND.label(), artifacts, |artifact| {
            stage_one(self.device, artifact)
        });
        let count = pulled.into_iter().filter(|pulled| *pulled).count();
        info!(kind = A::KIND.label(), pulled = count, total = artifacts.len(), "staged artifacts");
        count
    }
}

fn stage_one<A: Artifact>(device: &dyn Device, artifact: &A) -> bool {
    let local = artifact.local_path();
    if local.exists() {
        return false;
    }
    if let Some(parent) = local.parent() {
        if let Err(e) = fs::create_dir_all(parent) {
            warn!(path = %parent.display(), error = %e, "cannot create staging directory");
            return false;
        }
    }
    match device.pull_file(&artifact.device_path(), &local) {
        Ok(()) => true,
        Err(e) => {
            warn!(artifact = artifact.path(), error = %e, "pull failed");
            false
        }
    }
}

/// Paths reported as ELF by the device-side magic check (`<path>: 0` lines).
pub fn parse_elf_scan(output: &str) -> Vec<String> {
    output
        .lines()
        .filter_map(|line| line.split_once(": "))
        .filter(|(_, status)| status.trim() == "0")
        .map(|(path, _)| path.trim())
        .filter(|path| !path.is_empty() && !path.contains(MAGISK_MARKER))
        .map(str::to_string)
        .collect()
}

/// Container paths from `find` output, minus those matching a filter fragment.
pub fn parse_bytecode_scan(output: &str, filters: &[String]) -> Vec<String> {
    output
        .lines()
        .map(str::trim)
        .filter(|path| !path.is_empty())
        .filter(|path| !filters.iter().any(|fragment| path.contains(fragment.as_str())))
        .map(str::to_string)
        .collect()
}

/// Values of `package:<value>` lines as printed by `pm`.
pub fn parse_package_list(output: &str) -> Vec<String> {
    output
        .lines()
        .map(|line| line.trim())
        .map(|line| line.strip_prefix(PACKAGE_PREFIX).unwrap_or(line))
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .collect()
}
