use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use dagflow::cli::{self, OutputMode, RunArgs};
use dagflow::config::EngineConfig;
use dagflow::logging;
use dagflow::workflow::SchedulingPolicy;

#[derive(Parser)]
#[command(name = "dagflow")]
#[command(about = "Run dependency-graph workflows with retries, resource budgets and scheduling policies")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Project directory holding .dagflow/config.toml (defaults to current)
    #[arg(long, global = true)]
    dir: Option<PathBuf>,

    /// Enable debug output
    #[arg(long, global = true)]
    debug: bool,

    /// Suppress normal output
    #[arg(long, global = true)]
    quiet: bool,

    /// Also write logs to this file
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a workflow file
    Run {
        /// Workflow file (.toml or .json)
        file: PathBuf,

        /// Scheduling policy: priority_based, deadline_driven, resource_aware or adaptive
        #[arg(long)]
        policy: Option<SchedulingPolicy>,

        /// Maximum nodes in flight
        #[arg(long)]
        max_parallel: Option<usize>,

        /// Set a workflow variable (key=value, value parsed as JSON when possible)
        #[arg(long = "set", value_name = "KEY=VALUE")]
        set: Vec<String>,

        /// Output format
        #[arg(long, value_enum, default_value_t = OutputMode::Console)]
        output: OutputMode,
    },

    /// Validate a workflow file without running it
    Validate {
        /// Workflow file (.toml or .json)
        file: PathBuf,
    },

    /// Show node success rates and durations from previous runs
    History {
        /// Only this node id
        #[arg(long)]
        node: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_guard = logging::init_logging(cli.debug, cli.quiet, cli.log_file.as_deref())?;
    let config = EngineConfig::load(cli.dir.as_deref())?;

    let code = match cli.command {
        Commands::Run {
            file,
            policy,
            max_parallel,
            set,
            output,
        } => {
            let mode = if cli.quiet { OutputMode::Quiet } else { output };
            let handler = cli::create_handler(mode, cli.debug);
            let args = RunArgs {
                file,
                policy,
                max_parallel,
                set,
            };
            cli::run_workflow(args, &config, handler).await?
        }

        Commands::Validate { file } => {
            let mode = if cli.quiet { OutputMode::Quiet } else { OutputMode::Console };
            let handler = cli::create_handler(mode, cli.debug);
            cli::validate_workflow(&file, &config, handler.as_ref())?
        }

        Commands::History { node } => cli::show_history(node.as_deref(), &config)?,
    };

    if code != 0 {
        // exit() skips destructors; flush the log file first
        drop(log_guard);
        std::process::exit(code);
    }
    Ok(())
}
