use anyhow::{Context, Result};
use revdep_core::config::CliOverrides;
use revdep_core::device::AdbDevice;
use revdep_core::pipeline::DependencyFinder;

use crate::commands::{load_run_config, print_outcome, resolve_work_dir};

/// Arguments of `revdep run`.
#[derive(Debug, Clone, Default)]
pub struct RunArgs {
    pub target: Option<String>,
    pub device_id: Option<String>,
    pub work_dir: Option<String>,
    pub config: Option<String>,
    pub with_bytecode: bool,
    pub threads: Option<usize>,
}

/// Full pipeline against an attached device.
pub fn run_command(args: RunArgs) -> Result<()> {
    let config = load_run_config(args.config.as_deref())?.merge_cli(CliOverrides {
        target: args.target,
        work_dir: resolve_work_dir(args.work_dir.as_deref())?,
        device_id: args.device_id,
        include_bytecode: args.with_bytecode,
        threads: args.threads,
    });
    let finder = DependencyFinder::new(config)?;

    let device = AdbDevice::connect(&finder.config().tools.adb, finder.config().device_id.clone())
        .context("Failed to connect to device")?;
    let outcome = finder.run_with_device(&device)?;

    print_outcome(&outcome);
    Ok(())
}
