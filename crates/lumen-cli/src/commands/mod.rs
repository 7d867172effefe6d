//! CLI subcommands and shared diagnostics output

pub mod repl;
pub mod run;

use lumen_runtime::InterpretError;
use std::io::Write;
use termcolor::{Color, ColorChoice, ColorSpec, StandardStream, WriteColor};

/// Exit code for an interpreter failure: 65 for compile errors, 70 for
/// runtime errors.
pub fn exit_code(error: &InterpretError) -> i32 {
    match error {
        InterpretError::Compile(_) => 65,
        InterpretError::Runtime(_) => 70,
    }
}

/// Print an interpreter failure to stderr, one diagnostic (or trace line)
/// per line, with a colored `error:` prefix when stderr is a terminal.
pub fn print_error(error: &InterpretError) {
    let mut stderr = StandardStream::stderr(ColorChoice::Auto);
    let _ = stderr.set_color(ColorSpec::new().set_fg(Some(Color::Red)).set_bold(true));
    let _ = write!(stderr, "error");
    let _ = stderr.reset();
    let _ = writeln!(stderr, ": {error}");
}

/// Print an interpreter failure as JSON on stderr.
pub fn print_error_json(error: &InterpretError) {
    match error {
        InterpretError::Compile(diagnostics) => {
            for diagnostic in diagnostics {
                if let Ok(line) = serde_json::to_string(diagnostic) {
                    eprintln!("{line}");
                }
            }
        }
        InterpretError::Runtime(report) => {
            let value = serde_json::json!({
                "message": report.message,
                "trace": report.trace,
            });
            eprintln!("{value}");
        }
    }
}
