//! Integration tests spawning the built `lox` binary and asserting its exit
//! codes, since `crates/cli` is bin-only and `run_file`/`interpret` are not
//! reachable from outside the crate.

use std::io::Write;
use std::process::Command;
use tempfile::NamedTempFile;

fn lox() -> Command {
    Command::new(env!("CARGO_BIN_EXE_lox"))
}

fn script_file(source: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("create temp script");
    file.write_all(source.as_bytes())
        .expect("write temp script");
    file
}

#[test]
fn missing_script_file_exits_64() {
    let output = lox()
        .arg("/nonexistent/path/does-not-exist.lox")
        .output()
        .expect("run lox");
    assert_eq!(output.status.code(), Some(64));
}

#[test]
fn more_than_one_positional_argument_exits_64() {
    let a = script_file("print 1;");
    let b = script_file("print 2;");
    let output = lox()
        .arg(a.path())
        .arg(b.path())
        .output()
        .expect("run lox");
    assert_eq!(output.status.code(), Some(64));
}

#[test]
fn compile_error_exits_65() {
    let script = script_file("var = 1;");
    let output = lox().arg(script.path()).output().expect("run lox");
    assert_eq!(output.status.code(), Some(65));
}

#[test]
fn runtime_error_exits_70() {
    let script = script_file("print 1 + \"two\";");
    let output = lox().arg(script.path()).output().expect("run lox");
    assert_eq!(output.status.code(), Some(70));
}

#[test]
fn successful_script_exits_0() {
    let script = script_file("print 1 + 2;");
    let output = lox().arg(script.path()).output().expect("run lox");
    assert_eq!(output.status.code(), Some(0));
    assert_eq!(String::from_utf8_lossy(&output.stdout).trim(), "3");
}
