//! `farm`: run parameter sweeps through the four-phase pipeline on this machine.

use std::error::Error;
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use farm_core::{FarmConfig, FarmError, SweepTask};
use farm_engine::{OpResult, PlatformFactory, PlatformKind, ProcessCommand, process};
use serde_json::{Value, json};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Expand a command template over a range and run every unit
    Sweep(SweepArgs),
    /// Print the configuration resolved from FARM_* variables
    Config,
}

#[derive(Args)]
struct SweepArgs {
    /// Command template; every `*` is replaced by the sweep index
    #[arg(long)]
    command: String,

    /// Name used in logs
    #[arg(long, default_value = "sweep")]
    name: String,

    #[arg(long)]
    start: i64,

    #[arg(long)]
    end: i64,

    #[arg(long, default_value_t = 1)]
    step: i64,

    /// Platform: local or multi
    #[arg(long, env = "FARM_PLATFORM", default_value = "local")]
    platform: String,

    /// Worker pool size for the multi platform
    #[arg(long)]
    workers: Option<usize>,

    /// Program to run once every unit has finished
    #[arg(long)]
    reduce: Option<String>,

    /// Argument passed to the reduce program (repeatable)
    #[arg(long = "reduce-arg", allow_hyphen_values = true)]
    reduce_args: Vec<String>,

    /// Directory units and the reduce step run in
    #[arg(long)]
    working_dir: Option<PathBuf>,

    /// Print the expanded commands without running them
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Sweep(args) => sweep(args).await,
        Command::Config => {
            let config = FarmConfig::from_env()?;
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(())
        }
    }
}

async fn sweep(args: SweepArgs) -> Result<(), Box<dyn Error>> {
    let task = SweepTask::new(&args.name, &args.command, args.start, args.end)
        .with_increment(args.step);
    task.validate()?;

    if args.dry_run {
        for (_, line) in task.expand_commands() {
            println!("{line}");
        }
        return Ok(());
    }

    let kind: PlatformKind = args.platform.parse()?;
    let mut config = FarmConfig::from_env()?;
    if let Some(workers) = args.workers {
        config = config.with_workers(workers);
    }

    let factory = PlatformFactory::new(config);
    let mut engine = factory.create_platform_with(kind, |platform| {
        for (index, line) in task.expand_commands() {
            let mut unit = ProcessCommand::shell(line);
            if let Some(ref dir) = args.working_dir {
                unit = unit.with_working_dir(dir);
            }
            platform.enqueue_method_with(move |state| run_unit(&unit, state), json!({ "index": index }))?;
        }
        if let Some(ref program) = args.reduce {
            let mut reduce = ProcessCommand::new(program).with_args(args.reduce_args.iter().cloned());
            if let Some(ref dir) = args.working_dir {
                reduce = reduce.with_working_dir(dir);
            }
            platform.set_reduce(reduce);
        }
        Ok(())
    })?;

    tracing::info!("Running '{}' over {} unit(s) on {}", task.name, task.unit_count(), kind);
    let result = engine.execute().await?;
    if result.succeeded() {
        tracing::info!("Sweep '{}' finished", task.name);
        return Ok(());
    }

    match result.inner_error {
        Some(e) => Err(e.into()),
        None => {
            let phase = result
                .failed_phase()
                .map_or("unknown", |p| p.as_str());
            Err(FarmError::Operation(format!("sweep stopped in the {phase} phase")).into())
        }
    }
}

fn run_unit(command: &ProcessCommand, state: Value) -> OpResult {
    let index = state["index"].as_i64().unwrap_or_default();
    let output = process::run(command).map_err(|e| e.to_string())?;
    if output.success() {
        Ok(())
    } else {
        Err(format!("unit {index} exited with code {}", output.exit_code))
    }
}
