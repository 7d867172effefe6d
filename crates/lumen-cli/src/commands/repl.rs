//! Interactive REPL
//!
//! Evaluates one line at a time against a persistent VM, so globals,
//! classes, and functions carry over between entries. Errors are printed
//! and the session continues.

use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;

use lumen_runtime::Vm;

use super::print_error;

/// Run the interactive prompt; returns the process exit code.
pub fn repl() -> i32 {
    let mut editor = match DefaultEditor::new() {
        Ok(editor) => editor,
        Err(error) => {
            eprintln!("lumen: could not start the line editor: {error}");
            return 1;
        }
    };

    println!("Lumen {} (type 'exit' or Ctrl-D to quit)", lumen_runtime::VERSION);

    let mut vm = Vm::new();
    loop {
        match editor.readline("> ") {
            Ok(line) => {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                if trimmed == "exit" {
                    break;
                }
                let _ = editor.add_history_entry(&line);
                if let Err(error) = vm.interpret(&line) {
                    print_error(&error);
                }
            }
            Err(ReadlineError::Interrupted) => continue,
            Err(ReadlineError::Eof) => break,
            Err(error) => {
                eprintln!("lumen: {error}");
                return 1;
            }
        }
    }
    0
}
