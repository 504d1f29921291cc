use std::io;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use smalivm::driver::run_batch;
use smalivm::{Runtime, VmConfig};

/// Runs every smali class file listed on standard input and reports how
/// many of them failed.
#[derive(Parser, Debug)]
#[command(name = "smalivm", version, about)]
struct Args {
    /// Directory holding one source file per class
    root: PathBuf,

    /// Extension of class source files
    #[arg(long, default_value = "smali")]
    extension: String,

    /// Maximum number of nested frames
    #[arg(long, default_value_t = 32)]
    max_call_depth: usize,

    /// Instruction budget per class, unbounded when absent
    #[arg(long)]
    max_steps: Option<u64>,

    /// Recent instructions kept for failure dumps
    #[arg(long, default_value_t = 8)]
    trace_depth: usize,

    /// Backward jumps before a loop is reported as hot
    #[arg(long, default_value_t = 10_000)]
    hot_loop_threshold: usize,
}

impl From<Args> for VmConfig {
    fn from(args: Args) -> Self {
        VmConfig {
            root: args.root,
            extension: args.extension,
            max_call_depth: args.max_call_depth,
            max_steps: args.max_steps,
            trace_depth: args.trace_depth,
            hot_loop_threshold: args.hot_loop_threshold,
        }
    }
}

fn main() -> ExitCode {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();

    let args = Args::parse();
    info!("class root: {}", args.root.display());
    let mut runtime = Runtime::new(args.into());

    let stdin = io::stdin();
    let stdout = io::stdout();
    let stderr = io::stderr();
    match run_batch(&mut runtime, stdin.lock(), stdout.lock(), stderr.lock()) {
        Ok(report) => {
            // stdout carries only the recovered `field = value` lines.
            eprintln!("{report}");
            ExitCode::SUCCESS
        }
        Err(err) => {
            error!("batch aborted: {err}");
            ExitCode::FAILURE
        }
    }
}
