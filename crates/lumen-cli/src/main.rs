//! Lumen command-line interface
//!
//! Runs a script file or, with no arguments, an interactive REPL.
//! Exit codes follow the sysexits convention the runtime's callers expect:
//! 0 on success, 65 for compile errors, 70 for runtime errors, 74 when the
//! script file cannot be read.

mod commands;

use clap::Parser;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "lumen", version, about = "The Lumen programming language")]
struct Cli {
    /// Script file to run; starts a REPL when omitted
    script: Option<PathBuf>,

    /// Print the compiled bytecode before running
    #[arg(long)]
    disasm: bool,

    /// Emit diagnostics as JSON on stderr
    #[arg(long)]
    json: bool,
}

fn main() {
    let cli = Cli::parse();
    let code = match cli.script {
        Some(path) => commands::run::run(&path, cli.disasm, cli.json),
        None => commands::repl::repl(),
    };
    std::process::exit(code);
}
