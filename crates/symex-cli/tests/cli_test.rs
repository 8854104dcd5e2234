// SPDX-License-Identifier: AGPL-3.0

//! Smoke tests that spawn the compiled binary directly (`CARGO_BIN_EXE_symex`,
//! a Cargo-provided path with no extra dependency) against a JSON AST file
//! written to a temp path, exercising `run` and `query` the way a user would
//! from a shell rather than calling any internal function directly.

use std::io::Write;
use std::process::Command;

fn write_program(name: &str, json: &str) -> std::path::PathBuf {
    let path = std::env::temp_dir().join(format!("symex-cli-test-{name}-{}.json", std::process::id()));
    let mut file = std::fs::File::create(&path).expect("failed to create temp program file");
    file.write_all(json.as_bytes()).expect("failed to write temp program file");
    path
}

fn symex(args: &[&str]) -> std::process::Output {
    Command::new(env!("CARGO_BIN_EXE_symex"))
        .args(args)
        // Piped output already disables `colored`'s auto-detection in most
        // terminals, but force it so the assertions below don't have to
        // tolerate stray ANSI escapes.
        .env("NO_COLOR", "1")
        .output()
        .expect("failed to spawn symex binary")
}

#[test]
fn run_reports_one_completed_path_for_a_straight_line_program() {
    let program = write_program(
        "straight-line",
        r#"{"body": [
            {"kind": "Assign", "target": "x", "value": {"kind": "Num", "value": 1}},
            {"kind": "Assign", "target": "y", "value": {"kind": "Num", "value": 2}}
        ]}"#,
    );

    let output = symex(&["run", program.to_str().unwrap()]);
    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("1 completed"), "stdout was: {stdout}");
    assert!(stdout.contains("0 deadended"), "stdout was: {stdout}");
    assert!(stdout.contains("0 errored"), "stdout was: {stdout}");

    std::fs::remove_file(&program).ok();
}

#[test]
fn query_prints_the_return_value_bound_by_a_called_function() {
    let program = write_program(
        "call-return",
        r#"{"body": [
            {"kind": "FunctionDef", "name": "f", "params": [], "body": [
                {"kind": "Return", "value": {"kind": "Num", "value": 5}}
            ]},
            {"kind": "Assign", "target": "x", "value": {"kind": "Call", "func": {"kind": "Name", "id": "f"}, "args": []}}
        ]}"#,
    );

    let output = symex(&["query", program.to_str().unwrap(), "--var", "x", "--kind", "int"]);
    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("x = 5"), "stdout was: {stdout}");

    std::fs::remove_file(&program).ok();
}

#[test]
fn run_exits_nonzero_when_every_path_errors() {
    let program = write_program(
        "undefined-name",
        r#"{"body": [
            {"kind": "Assign", "target": "y", "value": {"kind": "Name", "id": "missing"}}
        ]}"#,
    );

    let output = symex(&["run", program.to_str().unwrap()]);
    assert!(!output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("1 errored"), "stdout was: {stdout}");

    std::fs::remove_file(&program).ok();
}
