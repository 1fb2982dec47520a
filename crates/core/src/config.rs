//! Run configuration.
//!
//! A run is configured from an optional YAML or JSON file (format chosen by
//! extension) with CLI flags layered on top. Every field has a default so an
//! empty file is a valid configuration.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Root directories never scanned during live discovery.
pub const DEFAULT_SKIP_DIRS: [&str; 9] = [
    "/acct",
    "/cache",
    "/sdcard",
    "/sys",
    "/dev",
    "/proc",
    "/debug_ramdisk",
    "/mnt",
    "/lost+found",
];

/// Path fragments excluding a discovered bytecode container.
pub const DEFAULT_PATH_FILTERS: [&str; 3] = ["/data/local/tmp", ".magisk", "/data/dalvik-cache"];

const DEFAULT_UNFLATTEN_STAGGER: u32 = 30;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse config {path}: {reason}")]
    Parse { path: PathBuf, reason: String },
    #[error("Unsupported config format '{0}' (expected yaml, yml or json)")]
    UnsupportedFormat(String),
}

/// Paths of the external tools a run shells out to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolPaths {
    pub adb: PathBuf,
    pub vdex_extractor: PathBuf,
    pub jadx: PathBuf,
    pub unflatten: PathBuf,
    pub dot: PathBuf,
}

impl Default for ToolPaths {
    fn default() -> Self {
        Self {
            adb: tool_from_env("REVDEP_ADB", "adb"),
            vdex_extractor: tool_from_env("REVDEP_VDEX_EXTRACTOR", "vdexExtractor"),
            jadx: tool_from_env("REVDEP_JADX", "jadx"),
            unflatten: tool_from_env("REVDEP_UNFLATTEN", "unflatten"),
            dot: tool_from_env("REVDEP_DOT", "dot"),
        }
    }
}

fn tool_from_env(var: &str, fallback: &str) -> PathBuf {
    env::var_os(var).map(PathBuf::from).unwrap_or_else(|| PathBuf::from(fallback))
}

/// Serializable configuration for one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Device path of the library whose dependents are wanted.
    pub target: Option<String>,
    /// Working directory; a `revdep_` temporary directory is created when absent.
    pub work_dir: Option<PathBuf>,
    /// Serial of the device to talk to when several are attached.
    pub device_id: Option<String>,
    /// Also resolve bytecode containers (requires the decompiler tools).
    pub include_bytecode: bool,
    /// Worker count; defaults to the available parallelism.
    pub threads: Option<usize>,
    pub skip_dirs: Vec<String>,
    pub path_filters: Vec<String>,
    pub unflatten_stagger: u32,
    pub tools: ToolPaths,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            target: None,
            work_dir: None,
            device_id: None,
            include_bytecode: false,
            threads: None,
            skip_dirs: DEFAULT_SKIP_DIRS.iter().map(|s| s.to_string()).collect(),
            path_filters: DEFAULT_PATH_FILTERS.iter().map(|s| s.to_string()).collect(),
            unflatten_stagger: DEFAULT_UNFLATTEN_STAGGER,
            tools: ToolPaths::default(),
        }
    }
}

/// Values supplied on the command line; `None`/`false` leaves the file value alone.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub target: Option<String>,
    pub work_dir: Option<PathBuf>,
    pub device_id: Option<String>,
    pub include_bytecode: bool,
    pub threads: Option<usize>,
}

impl RunConfig {
    /// Load a config file, picking the parser from the extension.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let body = fs::read_to_string(path)
            .map_err(|source| ConfigError::Io { path: path.to_path_buf(), source })?;
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or_default();
        let parse_error =
            |reason: String| ConfigError::Parse { path: path.to_path_buf(), reason };
        match ext {
            "yaml" | "yml" => {
                if body.trim().is_empty() {
                    return Ok(Self::default());
                }
                serde_yaml::from_str(&body).map_err(|e| parse_error(e.to_string()))
            }
            "json" => serde_json::from_str(&body).map_err(|e| parse_error(e.to_string())),
            other => Err(ConfigError::UnsupportedFormat(other.to_string())),
        }
    }

    /// Load from `path` if given, otherwise start from defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(p) => Self::load(p),
            None => Ok(Self::default()),
        }
    }

    /// Layer command-line values over this configuration.
    pub fn merge_cli(mut self, cli: CliOverrides) -> Self {
        if cli.target.is_some() {
            self.target = cli.target;
        }
        if cli.work_dir.is_some() {
            self.work_dir = cli.work_dir;
        }
        if cli.device_id.is_some() {
            self.device_id = cli.device_id;
        }
        if cli.include_bytecode {
            self.include_bytecode = true;
        }
        if cli.threads.is_some() {
            self.threads = cli.threads;
        }
        self
    }
}
