//! Forgeops - declarative host configuration engine
//!
//! Main entry point for the forgeops CLI.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use forgeops::config::{EngineConfig, DEFAULT_CONFIG_PATH};
use forgeops::loader::load_plan;
use forgeops::ops::OperationRegistry;
use forgeops::output::{format_result, should_display, Summary};
use forgeops::plan::{Action, Host};
use forgeops::runner::TaskRunner;
use forgeops::state::StateStore;

#[derive(Parser, Debug)]
#[command(
    name = "forgeops",
    version,
    about = "Converge hosts toward a declaratively described state"
)]
struct Cli {
    /// Path to a plan file (default from config)
    plan: Option<PathBuf>,

    /// Path to the engine config file
    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Location for plan state (default: plan + .state.json)
    #[arg(long)]
    state_file: Option<PathBuf>,

    /// Calculate changes without executing them
    #[arg(long)]
    dry_run: bool,

    /// Log filter (trace, debug, info, warn, error)
    #[arg(long, env = "FORGEOPS_LOG")]
    log_level: Option<String>,
}

fn main() -> ExitCode {
    match run(Cli::parse()) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{e:#}");
            ExitCode::from(1)
        }
    }
}

fn run(cli: Cli) -> Result<ExitCode> {
    let config = EngineConfig::load(&cli.config).context("configuration failed")?;

    let filter = cli
        .log_level
        .clone()
        .or_else(|| config.log_level.clone())
        .unwrap_or_else(|| "info".to_string());
    init_logging(&filter);

    let plan_path = cli.plan.clone().unwrap_or_else(|| config.plan.clone());
    let plan = load_plan(&plan_path).context("plan validation failed")?;

    let registry = OperationRegistry::with_builtins();
    let mut runner = TaskRunner::new(&plan, &registry)
        .dry_run(cli.dry_run)
        .progress(Box::new(print_progress));
    if !cli.dry_run {
        let state_path = cli
            .state_file
            .clone()
            .unwrap_or_else(|| config.state_file_for(&plan_path));
        runner = runner.state_store(StateStore::open(state_path));
    }

    let results = runner.run().context("execution failed")?;

    let verbose = matches!(filter.as_str(), "debug" | "trace");
    let mut summary = Summary::new();
    for result in &results {
        summary.add(result);
        if should_display(result, verbose) {
            println!("{}", format_result(result));
        }
    }
    println!("{}", summary.render());

    Ok(if summary.failures > 0 {
        ExitCode::from(2)
    } else {
        ExitCode::SUCCESS
    })
}

fn init_logging(filter: &str) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter));
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(env_filter)
        .init();
}

fn print_progress(host: &Host, action: &Action) {
    tracing::info!(host = %host.name, action = %action.kind, "applying");
}
