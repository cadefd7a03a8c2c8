//! Merle CLI.
//!
//! `merle file` runs a script; `-l` lists the compiled bytecode instead,
//! `-a` lists then runs. Exit code 0 on success, 1 on any error; errors
//! carry the source line when one is known.

use std::path::PathBuf;
use std::process;

use clap::Parser as ClapParser;

use merle_compiler::compile_file;
use merle_core::error::Result;
use merle_runtime::{disassemble, format_error, Runtime};

#[derive(ClapParser)]
#[command(name = "merle")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Merle interpreter - run or disassemble Merle scripts", long_about = None)]
struct Cli {
    /// Disassemble the script instead of running it
    #[arg(short = 'l', long = "list")]
    list: bool,

    /// Run the script (the default)
    #[arg(short = 'r', long = "run")]
    run: bool,

    /// Disassemble, then run
    #[arg(short = 'a', long = "all")]
    all: bool,

    /// Script file
    file: PathBuf,
}

fn execute(cli: &Cli) -> Result<()> {
    let routine = compile_file(&cli.file)?;
    let list = cli.list || cli.all;
    let run = cli.run || cli.all || !cli.list;

    if list {
        let name = cli
            .file
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "main".to_string());
        let stdout = std::io::stdout();
        let mut lock = stdout.lock();
        disassemble(&routine, &name, &mut lock)
            .map_err(|e| merle_core::error::runtime_error(e.to_string()))?;
    }

    if run {
        let mut runtime = Runtime::new();
        runtime.run_routine(routine)?;
    }
    Ok(())
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    if let Err(e) = execute(&cli) {
        eprintln!("{}", format_error(&e));
        process::exit(1);
    }
}
