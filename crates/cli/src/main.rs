use anyhow::Result;
use clap::{ArgAction, Parser, Subcommand};
use revdep::commands::{catalog_command, graph_command, run_command, GraphArgs, RunArgs};

/// Reverse-dependency graph finder for Android shared libraries.
///
/// This CLI is a thin wrapper around `revdep-core` (exposed in code as `revdep_core`).
/// All substantive logic lives in the library so it can be tested thoroughly
/// and reused from other frontends.
#[derive(Parser, Debug)]
#[command(
    name = "revdep",
    version,
    about = "Find every on-device binary that depends on a shared library",
    long_about = None
)]
struct Cli {
    /// Increase log verbosity (-v debug, -vv trace).
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    /// Only log warnings and errors.
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Discover artifacts on a device and build the dependency graph of a target.
    ///
    /// This will:
    /// - Load persisted catalogs from the work dir, discovering missing ones on the device.
    /// - Pull every artifact not yet staged locally.
    /// - Resolve dependencies, extract the target's closure and write `deps.dot`,
    ///   `deps.json`, `deps.png` and `run.json`.
    Run {
        /// Device path of the target library (e.g. /vendor/lib64/libfoo.so).
        #[arg(long)]
        target: Option<String>,

        /// Serial of the device to use when several are attached.
        #[arg(long)]
        device_id: Option<String>,

        /// Work directory. A `revdep_` temporary directory is created if omitted.
        #[arg(long)]
        work_dir: Option<String>,

        /// YAML or JSON run configuration.
        #[arg(long)]
        config: Option<String>,

        /// Also resolve vdex/odex containers (needs vdexExtractor and jadx).
        #[arg(long, default_value_t = false)]
        with_bytecode: bool,

        /// Worker count. Defaults to the available parallelism.
        #[arg(long)]
        threads: Option<usize>,
    },

    /// Rebuild the dependency graph offline from a previous run's work dir.
    Graph {
        /// Work directory holding the catalogs and staged artifacts.
        #[arg(long)]
        work_dir: String,

        /// Device path of the target library.
        #[arg(long)]
        target: String,

        /// Hardware platform (`ro.hardware`) used by the hw_get_module heuristic.
        #[arg(long, default_value = "")]
        platform: String,

        /// Device brand (`ro.product.brand`) used by the hw_get_module heuristic.
        #[arg(long, default_value = "")]
        brand: String,

        /// YAML or JSON run configuration.
        #[arg(long)]
        config: Option<String>,

        /// Also resolve vdex/odex containers.
        #[arg(long, default_value_t = false)]
        with_bytecode: bool,

        /// Worker count. Defaults to the available parallelism.
        #[arg(long)]
        threads: Option<usize>,

        /// Print the export view as JSON instead of DOT.
        #[arg(long, default_value_t = false)]
        json: bool,
    },

    /// Summarize the persisted catalogs of a work dir.
    Catalog {
        /// Work directory holding the catalogs.
        #[arg(long, default_value = ".")]
        work_dir: String,

        /// Emit JSON instead of human-readable text.
        #[arg(long, default_value_t = false)]
        json: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = match (cli.quiet, cli.verbose) {
        (true, _) => "warn",
        (false, 0) => "info",
        (false, 1) => "debug",
        (false, _) => "trace",
    };
    revdep_core::logging::init_tracing(level);

    match cli.command {
        Command::Run { target, device_id, work_dir, config, with_bytecode, threads } => {
            run_command(RunArgs { target, device_id, work_dir, config, with_bytecode, threads })?
        }
        Command::Graph {
            work_dir,
            target,
            platform,
            brand,
            config,
            with_bytecode,
            threads,
            json,
        } => graph_command(GraphArgs {
            work_dir,
            target,
            platform,
            brand,
            config,
            with_bytecode,
            threads,
            json,
        })?,
        Command::Catalog { work_dir, json } => catalog_command(&work_dir, json)?,
    }

    Ok(())
}
