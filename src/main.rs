use std::io;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use relcore::runner::{self, RunOptions};
use relcore::{Engine, EngineConfig, Session};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "relcore")]
#[command(about = "Run a JSON statement script against a fresh in-memory engine", long_about = None)]
struct Args {
    /// Script file: a JSON array of statements
    script: PathBuf,

    /// Config file (default: ./relcore.toml if present)
    #[arg(short = 'c', long)]
    config: Option<PathBuf>,

    /// Keep running after a failed statement
    #[arg(short = 'k', long)]
    keep_going: bool,

    /// Print the physical plan of every query as JSON
    #[arg(long)]
    explain: bool,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(io::stderr)
        .init();

    let args = Args::parse();
    match run(&args) {
        Ok(0) => ExitCode::SUCCESS,
        Ok(failed) => {
            eprintln!("{failed} statement(s) failed");
            ExitCode::FAILURE
        }
        Err(err) => {
            eprintln!("Error: {err}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: &Args) -> Result<usize, relcore::DatabaseError> {
    let config = EngineConfig::load(args.config.as_deref())?;
    let statements = runner::load_script(&args.script)?;

    let engine = Engine::new(config);
    let mut session = Session::default();
    let options = RunOptions {
        keep_going: args.keep_going,
        explain: args.explain,
    };
    let summary = runner::run_script(&engine, &mut session, &statements, options, &mut io::stdout().lock())?;
    Ok(summary.failed)
}
