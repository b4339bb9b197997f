mod debug_report;

use bidrule::functions::{BidRequest, Granularity};
use bidrule::{AccountConfig, ConstantSeed, SeedSource, Stage, ThreadRngSource, compile_stage, process_request_at};
use clap::Parser;
use std::io::{self, IsTerminal};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

const LOG_ENV: &str = "BIDRULE_LOG";

/// Compile an account's stage rules and run them over one bid request.
#[derive(Parser, Debug)]
#[command(name = "bidrule", version)]
#[command(after_help = "Exit codes:\n  0  Success.\n  1  The rule failed at request time.\n  2  Invalid arguments or configuration.\n\nSet BIDRULE_LOG=debug (or trace) to see compilation and lookup events.")]
struct Args {
    /// Account configuration JSON.
    #[arg(long, value_name = "FILE")]
    config: PathBuf,

    /// OpenRTB bid request JSON.
    #[arg(long, value_name = "FILE")]
    request: PathBuf,

    /// Stage to compile and run.
    #[arg(long, default_value = "processed-auction-request", value_parser = parse_stage)]
    stage: Stage,

    /// Datacenter the request is processed in.
    #[arg(long, default_value = "local")]
    datacenter: String,

    /// Limit result functions to the impression with this id.
    #[arg(long, value_name = "ID")]
    imp: Option<String>,

    /// Fixed seed for weighted model group selection.
    #[arg(long)]
    seed: Option<u64>,

    /// Force ANSI color output.
    #[arg(long, conflicts_with = "no_color")]
    color: bool,

    /// Disable ANSI color output.
    #[arg(long)]
    no_color: bool,
}

fn main() -> ExitCode {
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(err) => {
            let _ = err.print();
            return if err.use_stderr() { ExitCode::from(2) } else { ExitCode::SUCCESS };
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(io::stderr)
        .init();

    let color = if args.no_color { false } else { args.color || io::stdout().is_terminal() };

    let (config, request) = match load_inputs(&args) {
        Ok(inputs) => inputs,
        Err(err) => {
            eprintln!("error: {err}");
            return ExitCode::from(2);
        }
    };

    let seeds: Arc<dyn SeedSource> = match args.seed {
        Some(seed) => Arc::new(ConstantSeed(seed)),
        None => Arc::new(ThreadRngSource),
    };

    let rule = match compile_stage(&config, args.stage, seeds) {
        Ok(rule) => rule,
        Err(err) => {
            eprintln!("error: invalid configuration: {err}");
            return ExitCode::from(2);
        }
    };

    let granularity = args.imp.clone().map_or(Granularity::Request, Granularity::Imp);
    match process_request_at(&rule, request, &args.datacenter, granularity) {
        Ok(run) => {
            debug_report::print_run(args.stage, &run, color);
            ExitCode::SUCCESS
        }
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::from(1)
        }
    }
}

fn parse_stage(value: &str) -> Result<Stage, String> {
    Stage::parse(value).ok_or_else(|| format!("unknown stage '{value}'"))
}

fn load_inputs(args: &Args) -> Result<(AccountConfig, BidRequest), String> {
    let config = AccountConfig::from_json_str(&read(&args.config)?)
        .map_err(|err| format!("{}: {err}", args.config.display()))?;
    let request = serde_json::from_str(&read(&args.request)?)
        .map_err(|err| format!("{}: malformed bid request: {err}", args.request.display()))?;
    Ok((config, request))
}

fn read(path: &Path) -> Result<String, String> {
    std::fs::read_to_string(path).map_err(|err| format!("failed to read {}: {err}", path.display()))
}
