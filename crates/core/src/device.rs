//! Device collaborator: the three operations the engine needs from a device,
//! the read-only context snapshot, and an adb-backed implementation.
//!
//! Every process spawned for a device goes through a `ProcessRegistry`, which
//! owns the child until it has been reaped. A child whose caller bails out
//! early is killed when its guard drops, and `kill_all` reaps whatever is
//! still running when the device is torn down.

use std::collections::HashMap;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Output, Stdio};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::thread;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("Failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to collect output of {program}: {source}")]
    Output {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{command} exited with {status}: {stderr}")]
    Status { command: String, status: ExitStatus, stderr: String },
    #[error("Process was killed before it finished: {0}")]
    Killed(String),
    #[error("Device unreachable: {0}")]
    Unreachable(String),
}

/// Operations the engine needs from a device.
pub trait Device: Send + Sync {
    /// Full paths of the entries of a device directory.
    fn list_directory(&self, path: &str) -> Result<Vec<String>, DeviceError>;

    /// Run a shell command with root privileges and return its standard output.
    fn run_privileged_shell(&self, argv: &[&str]) -> Result<String, DeviceError>;

    /// Copy a device file to a local path.
    fn pull_file(&self, remote_path: &str, local_path: &Path) -> Result<(), DeviceError>;
}

/// Read-only snapshot of device properties, captured once before the parallel phase.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceContext {
    /// `ro.hardware`
    pub platform: String,
    /// `ro.product.brand`
    pub brand: String,
    /// `ro.build.fingerprint`
    pub fingerprint: String,
}

impl DeviceContext {
    pub fn new(
        platform: impl Into<String>,
        brand: impl Into<String>,
        fingerprint: impl Into<String>,
    ) -> Self {
        Self { platform: platform.into(), brand: brand.into(), fingerprint: fingerprint.into() }
    }

    pub fn capture(device: &dyn Device) -> Result<Self, DeviceError> {
        let prop = |name: &str| -> Result<String, DeviceError> {
            Ok(device.run_privileged_shell(&["getprop", name])?.trim().to_string())
        };
        let context = Self {
            platform: prop("ro.hardware")?,
            brand: prop("ro.product.brand")?,
            fingerprint: prop("ro.build.fingerprint")?,
        };
        info!(platform = %context.platform, brand = %context.brand, "captured device context");
        Ok(context)
    }
}

/// Owns every child process spawned on behalf of a device.
#[derive(Debug, Default)]
pub struct ProcessRegistry {
    next_id: AtomicU64,
    children: Mutex<HashMap<u64, Child>>,
}

/// Scoped registration of one child; kills and reaps it on drop if still registered.
struct ProcessGuard<'r> {
    registry: &'r ProcessRegistry,
    id: u64,
}

impl ProcessGuard<'_> {
    fn wait(self, program: &str) -> Result<ExitStatus, DeviceError> {
        let child = self.registry.lock().remove(&self.id);
        match child {
            Some(mut child) => child
                .wait()
                .map_err(|source| DeviceError::Output { program: program.to_string(), source }),
            None => Err(DeviceError::Killed(program.to_string())),
        }
    }
}

impl Drop for ProcessGuard<'_> {
    fn drop(&mut self) {
        let child = self.registry.lock().remove(&self.id);
        if let Some(mut child) = child {
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}

impl ProcessRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn `command`, collect its output and reap it.
    pub fn run(&self, command: &mut Command) -> Result<Output, DeviceError> {
        let program = command.get_program().to_string_lossy().to_string();
        let mut child = command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| DeviceError::Spawn { program: program.clone(), source })?;
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let guard = self.register(child);

        let stderr_reader = thread::spawn(move || {
            let mut buf = Vec::new();
            if let Some(mut pipe) = stderr {
                let _ = pipe.read_to_end(&mut buf);
            }
            buf
        });
        let mut stdout_buf = Vec::new();
        if let Some(mut pipe) = stdout {
            pipe.read_to_end(&mut stdout_buf)
                .map_err(|source| DeviceError::Output { program: program.clone(), source })?;
        }
        let stderr_buf = stderr_reader.join().unwrap_or_default();
        let status = guard.wait(&program)?;

        Ok(Output { status, stdout: stdout_buf, stderr: stderr_buf })
    }

    /// Number of children currently owned by the registry.
    pub fn live(&self) -> usize {
        self.lock().len()
    }

    /// Kill and reap every child still running.
    pub fn kill_all(&self) {
        let children: Vec<Child> = self.lock().drain().map(|(_, child)| child).collect();
        for mut child in children {
            let _ = child.kill();
            let _ = child.wait();
        }
    }

    fn register(&self, child: Child) -> ProcessGuard<'_> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.lock().insert(id, child);
        ProcessGuard { registry: self, id }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<u64, Child>> {
        self.children.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// How privileged shell commands reach root on the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Privilege {
    /// adbd already runs as root.
    Root,
    /// Wrap commands in `su -c`.
    Su,
}

/// Device reached through the `adb` command-line tool.
pub struct AdbDevice {
    adb: PathBuf,
    serial: Option<String>,
    privilege: Privilege,
    registry: ProcessRegistry,
    scratch_counter: AtomicU64,
}

impl AdbDevice {
    /// Connect to a device, verifying it is attached and detecting how to reach root.
    pub fn connect(adb: impl Into<PathBuf>, serial: Option<String>) -> Result<Self, DeviceError> {
        let mut device = Self {
            adb: adb.into(),
            serial,
            privilege: Privilege::Root,
            registry: ProcessRegistry::new(),
            scratch_counter: AtomicU64::new(0),
        };

        let state = device.adb_checked(&["get-state"])?;
        if state.trim() != "device" {
            return Err(DeviceError::Unreachable(format!("adb get-state reported '{}'", state.trim())));
        }
        device.privilege = device.detect_privilege()?;
        info!(privilege = ?device.privilege, "connected to device");
        Ok(device)
    }

    fn detect_privilege(&self) -> Result<Privilege, DeviceError> {
        if self.shell_raw(&["whoami"])?.contains("root") {
            return Ok(Privilege::Root);
        }
        if self.shell_raw(&["su", "-c", "id"])?.contains("uid=0") {
            return Ok(Privilege::Su);
        }
        // Vendor builds that allow restarting adbd as root.
        self.adb_checked(&["root"])?;
        self.adb_checked(&["wait-for-device"])?;
        if self.shell_raw(&["whoami"])?.contains("root") {
            Ok(Privilege::Root)
        } else {
            Err(DeviceError::Unreachable("no root access (adbd, su and adb root all failed)".into()))
        }
    }

    fn command(&self, args: &[&str]) -> Command {
        let mut cmd = Command::new(&self.adb);
        if let Some(serial) = &self.serial {
            cmd.args(["-s", serial.as_str()]);
        }
        cmd.args(args);
        cmd
    }

    /// Run adb and fail on a non-zero exit status.
    fn adb_checked(&self, args: &[&str]) -> Result<String, DeviceError> {
        let output = self.registry.run(&mut self.command(args))?;
        if !output.status.success() {
            return Err(DeviceError::Status {
                command: format!("adb {}", args.join(" ")),
                status: output.status,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    /// Run an unprivileged shell command and return stdout regardless of exit status.
    ///
    /// Device-side `find`/`ls` routinely exit non-zero on unreadable entries while
    /// still producing useful output.
    fn shell_raw(&self, argv: &[&str]) -> Result<String, DeviceError> {
        let mut args = vec!["shell"];
        args.extend_from_slice(argv);
        let output = self.registry.run(&mut self.command(&args))?;
        if !output.status.success() {
            debug!(
                command = %argv.join(" "),
                status = %output.status,
                stderr = %String::from_utf8_lossy(&output.stderr).trim(),
                "shell command exited unsuccessfully"
            );
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    fn scratch_dir(&self) -> String {
        let n = self.scratch_counter.fetch_add(1, Ordering::Relaxed);
        format!("/data/local/tmp/revdep_{}_{n}", std::process::id())
    }

    pub fn registry(&self) -> &ProcessRegistry {
        &self.registry
    }
}

impl Device for AdbDevice {
    fn list_directory(&self, path: &str) -> Result<Vec<String>, DeviceError> {
        let listing = self.run_privileged_shell(&["ls", path])?;
        let prefix = if path.ends_with('/') { path.to_string() } else { format!("{path}/") };
        Ok(listing.split_whitespace().map(|entry| format!("{prefix}{entry}")).collect())
    }

    fn run_privileged_shell(&self, argv: &[&str]) -> Result<String, DeviceError> {
        let joined = argv.join(" ");
        debug!(command = %joined, "privileged call");
        match self.privilege {
            Privilege::Root => self.shell_raw(&[joined.as_str()]),
            Privilege::Su => {
                let wrapped = format!("su -c {}", shell_quote(&joined));
                self.shell_raw(&[wrapped.as_str()])
            }
        }
    }

    fn pull_file(&self, remote_path: &str, local_path: &Path) -> Result<(), DeviceError> {
        let scratch = RemoteScratch { device: self, dir: self.scratch_dir() };
        let file_name = remote_path.rsplit('/').next().unwrap_or(remote_path);
        let staged = format!("{}/{}", scratch.dir, file_name);

        self.run_privileged_shell(&["mkdir", "-p", &scratch.dir])?;
        self.run_privileged_shell(&["cp", "-f", &shell_quote(remote_path), &scratch.dir])?;
        self.run_privileged_shell(&["chown", "shell:shell", &shell_quote(&staged)])?;
        let local = local_path.to_string_lossy();
        self.adb_checked(&["pull", &staged, &local])?;
        Ok(())
    }
}

impl Drop for AdbDevice {
    fn drop(&mut self) {
        self.registry.kill_all();
    }
}

/// Temporary device directory removed on every exit path of a pull.
struct RemoteScratch<'d> {
    device: &'d AdbDevice,
    dir: String,
}

impl Drop for RemoteScratch<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.device.run_privileged_shell(&["rm", "-rf", &self.dir]) {
            warn!(dir = %self.dir, error = %e, "failed to remove device scratch directory");
        }
    }
}

/// Quote a string for the device shell.
pub fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}
