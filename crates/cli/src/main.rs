//! lox - command-line driver for the bytecode interpreter.
//!
//! Usage:
//!   lox                 # start the REPL
//!   lox script.lox       # run a script file, then exit
//!
//! Exit codes match `clox`'s `main.c`: 0 on success, 64 for a CLI usage
//! error, 65 if the script failed to compile, 70 if it raised a runtime
//! error.

use clap::Parser as ClapParser;
use lox_runtime::VM;
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;

const EX_USAGE: u8 = 64;
const EX_DATAERR: u8 = 65;
const EX_SOFTWARE: u8 = 70;

#[derive(ClapParser)]
#[command(name = "lox")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Lox bytecode interpreter", long_about = None)]
struct Args {
    /// Script to run. Starts an interactive REPL if omitted.
    script: Option<PathBuf>,

    /// Print each instruction as it executes (mirrors clox's DEBUG_TRACE_EXECUTION).
    #[arg(long)]
    trace_execution: bool,

    /// Disassemble each compiled function (mirrors clox's DEBUG_PRINT_CODE).
    #[arg(long)]
    print_code: bool,

    /// Run a collection before every allocation (mirrors clox's DEBUG_STRESS_GC).
    #[arg(long)]
    stress_gc: bool,

    /// Log every collection's begin/end and bytes reclaimed (mirrors clox's DEBUG_LOG_GC).
    #[arg(long)]
    log_gc: bool,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(err) => {
            eprintln!("{err}");
            return ExitCode::from(EX_USAGE);
        }
    };

    let mut vm = VM::new();
    vm.trace_execution = args.trace_execution;
    vm.heap_mut().stress_gc = args.stress_gc;
    vm.heap_mut().log_gc = args.log_gc;

    match args.script {
        Some(path) => run_file(&mut vm, &path, args.print_code),
        None => run_repl(&mut vm, args.print_code),
    }
}

fn run_file(vm: &mut VM, path: &PathBuf, print_code: bool) -> ExitCode {
    let source = match fs::read_to_string(path) {
        Ok(source) => source,
        Err(err) => {
            eprintln!("Could not read file \"{}\": {err}", path.display());
            return ExitCode::from(EX_USAGE);
        }
    };

    match interpret(vm, &source, print_code) {
        Ok(()) => ExitCode::SUCCESS,
        Err(InterpretOutcome::CompileError) => ExitCode::from(EX_DATAERR),
        Err(InterpretOutcome::RuntimeError) => ExitCode::from(EX_SOFTWARE),
    }
}

fn run_repl(vm: &mut VM, print_code: bool) -> ExitCode {
    let mut editor = match DefaultEditor::new() {
        Ok(editor) => editor,
        Err(err) => {
            eprintln!("Could not start line editor: {err}");
            return ExitCode::from(EX_SOFTWARE);
        }
    };

    let history_path = dirs::home_dir().map(|home| home.join(".lox_history"));
    if let Some(path) = &history_path {
        let _ = editor.load_history(path);
    }

    loop {
        match editor.readline("> ") {
            Ok(line) => {
                if line.trim().is_empty() {
                    continue;
                }
                let _ = editor.add_history_entry(line.as_str());
                // Errors in a REPL line are reported but don't end the session.
                let _ = interpret(vm, &line, print_code);
            }
            Err(ReadlineError::Interrupted) => continue,
            Err(ReadlineError::Eof) => break,
            Err(err) => {
                eprintln!("Readline error: {err}");
                break;
            }
        }
    }

    if let Some(path) = &history_path {
        let _ = editor.save_history(path);
    }

    ExitCode::SUCCESS
}

enum InterpretOutcome {
    CompileError,
    RuntimeError,
}

fn interpret(vm: &mut VM, source: &str, print_code: bool) -> Result<(), InterpretOutcome> {
    let function = lox_compiler::compile(source, vm.heap_mut(), print_code).map_err(|errors| {
        for error in &errors.0 {
            eprintln!("{error}");
        }
        InterpretOutcome::CompileError
    })?;

    vm.run(function).map_err(|error| {
        eprintln!("{error}");
        InterpretOutcome::RuntimeError
    })
}
