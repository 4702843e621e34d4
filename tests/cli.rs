use std::io::Write;
use std::process::{Command, Output, Stdio};

fn monkey() -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_monkey"));
    cmd.env_remove("MONKEY_ENGINE").env_remove("RUST_LOG");
    cmd
}

fn stdout(out: &Output) -> String {
    String::from_utf8_lossy(&out.stdout).trim().to_string()
}

fn stderr(out: &Output) -> String {
    String::from_utf8_lossy(&out.stderr).to_string()
}

fn eval(args: &[&str]) -> Output {
    monkey().args(args).output().expect("failed to run monkey")
}

// --- Inline code ---

#[test]
fn inline_prints_final_value() {
    let out = eval(&["-e", "let add = fn(a, b) { a + b }; add(40, 2)"]);
    assert!(out.status.success(), "stderr: {}", stderr(&out));
    assert_eq!(stdout(&out), "42");
}

#[test]
fn inline_null_result_prints_nothing() {
    let out = eval(&["-e", "let a = 1; if (a > 1) { 10 }"]);
    assert!(out.status.success(), "stderr: {}", stderr(&out));
    assert_eq!(stdout(&out), "");
}

#[test]
fn puts_writes_to_stdout() {
    let out = eval(&["-e", r#"puts("hello", 1, [2]);"#]);
    assert!(out.status.success(), "stderr: {}", stderr(&out));
    assert_eq!(stdout(&out), "hello\n1\n[2]");
}

#[test]
fn both_engines_agree() {
    let program = "let fib = fn(n) { n < 2 ? n : fib(n - 1) + fib(n - 2) }; \
                   let counter = fn() { let n = 0; fn() { n++; n } }; \
                   let c = counter(); c(); [fib(10), c(), {\"k\": 1.5}[\"k\"]]";
    for engine in ["vm", "eval"] {
        let out = eval(&["--engine", engine, "-e", program]);
        assert!(out.status.success(), "{} stderr: {}", engine, stderr(&out));
        assert_eq!(stdout(&out), "[55, 2, 1.5]", "engine {}", engine);
    }
}

#[test]
fn engine_from_environment() {
    let out = monkey()
        .env("MONKEY_ENGINE", "eval")
        .args(["-e", "1; return 2; 3"])
        .output()
        .expect("failed to run monkey");
    // top-level return is only accepted by the tree-walking engine
    assert!(out.status.success(), "stderr: {}", stderr(&out));
    assert_eq!(stdout(&out), "2");
}

// --- Files ---

#[test]
fn runs_source_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "let xs = [1, 2, 3];").unwrap();
    writeln!(file, "let i = 0; let sum = 0;").unwrap();
    writeln!(file, "while (i < len(xs)) {{ sum = sum + xs[i]; i++; }}").unwrap();
    writeln!(file, "sum").unwrap();
    let out = monkey().arg(file.path()).output().expect("failed to run monkey");
    assert!(out.status.success(), "stderr: {}", stderr(&out));
    assert_eq!(stdout(&out), "6");
}

#[test]
fn missing_file_fails() {
    let out = eval(&["/nonexistent/definitely-missing.mk"]);
    assert!(!out.status.success());
    assert!(stderr(&out).contains("Error reading"));
}

// --- Diagnostics ---

#[test]
fn parse_errors_are_all_reported() {
    let out = eval(&["--no-color", "-e", "let = 1;\nlet y = ;"]);
    assert_eq!(out.status.code(), Some(1));
    let err = stderr(&out);
    assert!(err.contains("error[MK-P005]"), "stderr: {}", err);
    assert!(err.contains("error[MK-P001]"), "stderr: {}", err);
    assert!(err.contains("--> 2:9"), "stderr: {}", err);
}

#[test]
fn compile_error_has_snippet() {
    let out = eval(&["--no-color", "-e", "let a = 1;\nb + a"]);
    assert_eq!(out.status.code(), Some(1));
    let err = stderr(&out);
    assert!(err.contains("error[MK-C001]: undefined identifier: b"), "stderr: {}", err);
    assert!(err.contains("2 | b + a"), "stderr: {}", err);
    assert!(!err.contains("\x1b["), "unexpected color: {}", err);
}

#[test]
fn json_error_format() {
    let out = eval(&["--error-format", "json", "-e", "1 / 0"]);
    assert_eq!(out.status.code(), Some(1));
    let line = stderr(&out);
    let v: serde_json::Value = serde_json::from_str(line.trim()).expect("one JSON object");
    assert_eq!(v["code"], "MK-V004");
    assert_eq!(v["message"], "integer division by zero");
}

#[test]
fn error_value_result_fails() {
    let out = eval(&["--no-color", "-e", "1 + true"]);
    assert_eq!(out.status.code(), Some(1));
    assert!(stderr(&out).contains("error[MK-E001]: type mismatch: Integer + Boolean"));
}

#[test]
fn arity_fault_fails() {
    let out = eval(&["--no-color", "-e", "fn(a) { a }()"]);
    assert_eq!(out.status.code(), Some(1));
    assert!(stderr(&out).contains("wrong number of arguments: want=1, got=0"));
}

#[test]
fn stack_overflow_reports_and_exits() {
    let out = eval(&["--no-color", "-e", "let f = fn(n) { f(n) }; f(1);"]);
    assert_eq!(out.status.code(), Some(1));
    let err = stderr(&out);
    assert!(err.contains("error[MK-V001]: stack overflow"), "stderr: {}", err);
    assert!(!err.contains("panicked"), "stderr: {}", err);
}

#[test]
fn stack_overflow_in_repl_keeps_going() {
    let mut child = monkey()
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("failed to spawn monkey");
    child
        .stdin
        .take()
        .unwrap()
        .write_all(b"let f = fn() { f() };\nf()\n1 + 1\n")
        .unwrap();
    let out = child.wait_with_output().unwrap();
    assert!(out.status.success(), "stderr: {}", stderr(&out));
    let transcript = String::from_utf8_lossy(&out.stdout);
    assert!(transcript.contains("error[MK-V001]: stack overflow"), "transcript: {}", transcript);
    assert!(transcript.contains(">> 2\n"), "transcript: {}", transcript);
}

#[test]
fn explain_prints_long_form() {
    let out = eval(&["--explain", "mk-c002"]);
    assert!(out.status.success());
    assert!(stdout(&out).starts_with("## MK-C002: duplicate definition"));

    let out = eval(&["--explain", "MK-X999"]);
    assert!(!out.status.success());
}

// --- Inspection ---

#[test]
fn emit_ast_outputs_json() {
    let out = eval(&["--emit-ast", "-e", "let x = 1;"]);
    assert!(out.status.success(), "stderr: {}", stderr(&out));
    let v: serde_json::Value = serde_json::from_str(&stdout(&out)).expect("AST JSON");
    assert_eq!(v["statements"][0]["Let"]["name"], "x");
}

#[test]
fn disassemble_lists_instructions() {
    let out = eval(&["--disassemble", "-e", "let f = fn() { 1 }; f();"]);
    assert!(out.status.success(), "stderr: {}", stderr(&out));
    let listing = stdout(&out);
    assert!(listing.starts_with("== main ==\n0000 OpClosure 1 0"), "listing: {}", listing);
    assert!(listing.contains("OpCall 0"), "listing: {}", listing);
    assert!(listing.contains("fn<f>/0 [compiled]"), "listing: {}", listing);
    assert!(listing.contains("OpReturnValue"), "listing: {}", listing);
}

// --- REPL ---

#[test]
fn repl_over_stdin() {
    let mut child = monkey()
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("failed to spawn monkey");
    child
        .stdin
        .take()
        .unwrap()
        .write_all(b"let a = 2;\nlet double = fn(x) { x * 2 };\ndouble(a)\nmissing\n")
        .unwrap();
    let out = child.wait_with_output().unwrap();
    assert!(out.status.success(), "stderr: {}", stderr(&out));
    let transcript = String::from_utf8_lossy(&out.stdout);
    assert!(transcript.contains(">> 4\n"), "transcript: {}", transcript);
    assert!(transcript.contains("error[MK-C001]: undefined identifier: missing"), "transcript: {}", transcript);
}
