//! Run command - execute Lumen source files

use std::fs;
use std::path::Path;

use lumen_runtime::Vm;

use super::{exit_code, print_error, print_error_json};

/// Compile and execute a source file, returning the process exit code.
pub fn run(path: &Path, disasm: bool, json: bool) -> i32 {
    let source = match fs::read_to_string(path) {
        Ok(source) => source,
        Err(error) => {
            eprintln!("lumen: could not read {}: {}", path.display(), error);
            return 74;
        }
    };

    let mut vm = Vm::new();

    if disasm {
        match vm.disassemble_source(&source) {
            Ok(listing) => print!("{listing}"),
            Err(error) => {
                report(&error, json);
                return exit_code(&error);
            }
        }
    }

    match vm.interpret(&source) {
        Ok(()) => 0,
        Err(error) => {
            report(&error, json);
            exit_code(&error)
        }
    }
}

fn report(error: &lumen_runtime::InterpretError, json: bool) {
    if json {
        print_error_json(error);
    } else {
        print_error(error);
    }
}
