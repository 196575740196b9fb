//! End-to-end tests for the olivec binary.
//!
//! Each test writes an `olive.toml`, a program and some records into a
//! temporary directory and runs the compiled binary against them.

use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use olive_common::Pos;
use olive_syntax::build::*;
use olive_syntax::{BinaryOp, FunctionNode, OliveNode, ParameterNode, Program};
use olivec::{Config, Session};
use serde_json::{json, Value as Json};

const CONFIG: &str = r#"
[formats.run]
fields = [
  { name = "name", type = "s", signable = true },
  { name = "lane", type = "i", signable = true },
  { name = "size", type = "i" },
]

[actions.submit]
services = ["scheduler"]
parameters = [
  { name = "name", type = "s" },
  { name = "size", type = "i" },
]

[constants.limit]
type = "i"
value = 1
"#;

struct Project {
    dir: tempfile::TempDir,
}

impl Project {
    fn new(program: &Program) -> Project {
        let dir = tempfile::tempdir().expect("failed to create temp dir");
        std::fs::write(dir.path().join("olive.toml"), CONFIG).unwrap();
        std::fs::write(
            dir.path().join("program.json"),
            serde_json::to_string_pretty(program).unwrap(),
        )
        .unwrap();
        let records = json!({"run": [
            {"name": "build", "lane": 1, "size": 10},
            {"name": "test", "lane": 2, "size": 5},
            {"name": "lint", "lane": 3, "size": 1},
        ]});
        std::fs::write(dir.path().join("records.json"), records.to_string()).unwrap();
        Project { dir }
    }

    fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    fn olivec(&self, args: &[&str]) -> Output {
        Command::new(env!("CARGO_BIN_EXE_olivec"))
            .current_dir(self.dir.path())
            .args(args)
            .output()
            .expect("failed to invoke olivec")
    }
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

fn program(olives: Vec<OliveNode>) -> Program {
    Program {
        input: "run".to_string(),
        functions: vec![FunctionNode {
            pos: Pos::default(),
            name: "double".to_string(),
            parameters: vec![ParameterNode {
                name: "x".to_string(),
                ty: "i".to_string(),
            }],
            return_type: Some("i".to_string()),
            body: binary(BinaryOp::Multiply, var("x"), int(2)),
            exported: true,
        }],
        definitions: Vec::new(),
        olives,
    }
}

fn busy_lanes() -> Program {
    program(vec![olive(
        vec![where_clause(binary(BinaryOp::Greater, var("lane"), var("limit")))],
        run("submit", vec![("name", var("name")), ("size", call("double", vec![var("size")]))]),
    )])
}

// ── check ──────────────────────────────────────────────────────────────

#[test]
fn check_accepts_a_good_program() {
    let project = Project::new(&busy_lanes());
    let output = project.olivec(&["check", "program.json"]);
    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
}

#[test]
fn check_reports_diagnostics_as_json() {
    let bad = program(vec![olive(
        vec![where_clause(var("nope").at(3, 9))],
        run("submit", vec![("name", var("name")), ("size", var("size"))]),
    )]);
    let project = Project::new(&bad);
    let output = project.olivec(&["check", "program.json", "--json"]);
    assert_eq!(output.status.code(), Some(1));

    let diagnostics: Json = serde_json::from_str(&stdout(&output)).unwrap();
    let first = &diagnostics[0];
    assert_eq!(first["line"], 3);
    assert_eq!(first["column"], 9);
    assert_eq!(first["message"], "Undefined variable “nope”");
}

#[test]
fn check_renders_against_the_source() {
    let bad = program(vec![olive(
        vec![where_clause(var("nope").at(1, 7))],
        run("submit", vec![("name", var("name")), ("size", var("size"))]),
    )]);
    let project = Project::new(&bad);
    std::fs::write(project.path("busy.olive"), "Where nope\nRun submit\n").unwrap();
    let output = project.olivec(&["check", "program.json", "--source", "busy.olive"]);
    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("busy.olive"), "{stderr}");
    assert!(stderr.contains("Undefined variable “nope”"), "{stderr}");
}

// ── build ──────────────────────────────────────────────────────────────

#[test]
fn build_writes_the_text_script() {
    let project = Project::new(&busy_lanes());
    let output = project.olivec(&["build", "program.json", "--backend", "text", "-o", "out.olv"]);
    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
    let script = std::fs::read_to_string(project.path("out.olv")).unwrap();
    assert!(script.starts_with("; olive script over `run`"));
    assert!(script.contains("(define \"double\""));
}

#[test]
fn build_lists_the_stack_module() {
    let project = Project::new(&busy_lanes());
    let output = project.olivec(&["build", "program.json", "--backend", "stack"]);
    assert!(output.status.success());
    let listing = stdout(&output);
    assert!(listing.contains("olive:0"), "{listing}");
    assert!(listing.contains("double"), "{listing}");
}

#[test]
fn build_summary_names_exports_and_services() {
    let project = Project::new(&busy_lanes());
    let output = project.olivec(&["build", "program.json", "--json", "-o", "out.txt"]);
    assert!(output.status.success());
    let summary: Json = serde_json::from_str(&stdout(&output)).unwrap();
    assert_eq!(summary["backend"], "stack");
    assert_eq!(summary["olives"], 1);
    assert_eq!(summary["exports"][0]["name"], "double");
    assert_eq!(summary["required_services"], json!(["run", "scheduler"]));
}

// ── run and call ───────────────────────────────────────────────────────

#[test]
fn run_prints_one_line_per_action() {
    let project = Project::new(&busy_lanes());
    for backend in ["stack", "text"] {
        let output = project.olivec(&[
            "run",
            "program.json",
            "--input",
            "records.json",
            "--json",
            "--backend",
            backend,
        ]);
        assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
        let lines: Vec<Json> = stdout(&output)
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(
            lines,
            [
                json!({"event": "action", "action": "submit", "arguments": {"name": "test", "size": 10}}),
                json!({"event": "action", "action": "submit", "arguments": {"name": "lint", "size": 2}}),
            ],
            "{backend}"
        );
    }
}

#[test]
fn call_invokes_an_export() {
    let project = Project::new(&busy_lanes());
    let output = project.olivec(&["call", "program.json", "double", "21"]);
    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
    assert_eq!(stdout(&output).trim(), "42");

    let output = project.olivec(&["call", "program.json", "triple", "1"]);
    assert_eq!(output.status.code(), Some(2));
}

#[test]
fn missing_config_is_an_error() {
    let project = Project::new(&busy_lanes());
    let output = project.olivec(&["check", "program.json", "--config", "elsewhere.toml"]);
    assert_eq!(output.status.code(), Some(2));
    assert!(String::from_utf8_lossy(&output.stderr).contains("elsewhere.toml"));
}

// ── library ────────────────────────────────────────────────────────────

#[test]
fn sessions_run_the_same_on_both_backends() {
    let project = Project::new(&busy_lanes());
    let mut outputs = Vec::new();
    for backend in [olive_codegen::BackendKind::Stack, olive_codegen::BackendKind::Text] {
        let config = Config::from_str(CONFIG).unwrap();
        let session = Session::new(config, Some(backend)).unwrap();
        let checked = session.check(&busy_lanes()).unwrap();
        let compiled = session.compile(&checked).unwrap();
        let input = session.input(&project.path("records.json")).unwrap();
        let mut out = Vec::new();
        let (stats, events) = session.run(compiled.as_ref(), &input, &mut out, false).unwrap();
        assert_eq!(stats.len(), 1);
        assert_eq!(events, 2);
        outputs.push(String::from_utf8(out).unwrap());
    }
    assert_eq!(outputs[0], outputs[1]);
    insta::assert_snapshot!(outputs[0], @r#"
    action submit name="test" size=10
    action submit name="lint" size=2
    "#);
}

#[test]
fn unknown_input_formats_are_rejected() {
    let session = Session::new(Config::from_str(CONFIG).unwrap(), None).unwrap();
    let dir = tempfile::tempdir().unwrap();
    let path: &Path = &dir.path().join("records.json");
    std::fs::write(path, r#"{"lanes": []}"#).unwrap();
    let err = session.input(path).unwrap_err();
    assert_eq!(err.to_string(), "no input format `lanes` is configured");
}
