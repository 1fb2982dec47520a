use anyhow::Result;
use revdep_core::config::CliOverrides;
use revdep_core::device::DeviceContext;
use revdep_core::export::render_dot;
use revdep_core::pipeline::DependencyFinder;

use crate::commands::{load_run_config, resolve_work_dir, view_json};

/// Arguments of `revdep graph`.
#[derive(Debug, Clone, Default)]
pub struct GraphArgs {
    pub work_dir: String,
    pub target: String,
    pub platform: String,
    pub brand: String,
    pub config: Option<String>,
    pub with_bytecode: bool,
    pub threads: Option<usize>,
    pub json: bool,
}

/// Rebuild the graph from a previous run's catalogs and staged bytes, then
/// print the export view to stdout.
pub fn graph_command(args: GraphArgs) -> Result<()> {
    let config = load_run_config(args.config.as_deref())?.merge_cli(CliOverrides {
        target: Some(args.target),
        work_dir: resolve_work_dir(Some(&args.work_dir))?,
        device_id: None,
        include_bytecode: args.with_bytecode,
        threads: args.threads,
    });
    let finder = DependencyFinder::new(config)?;
    let outcome = finder.run_offline(DeviceContext::new(args.platform, args.brand, ""))?;

    if args.json {
        println!("{}", view_json(&outcome.view)?);
    } else {
        print!("{}", render_dot(&outcome.view));
    }
    Ok(())
}
