//! Located diagnostics for whole programs.

mod common;

use common::{check, program, registry};
use olive_common::Pos;
use olive_syntax::build::*;
use olive_syntax::{BinaryOp, ClauseNode, FunctionNode, OliveNode};
use olive_typeck::diagnostics::{render_all, to_diagnostics, to_json};

// ── Helpers ────────────────────────────────────────────────────────────

fn listing(olives: Vec<OliveNode>) -> String {
    to_diagnostics(&check(olives).errors)
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("\n")
}

const SOURCE: &str = "\
Olive
  Group By name Into total = Sum size
  Let Signable late = name
  Where total > \"big\"
  Run submit With { name = name, size = total }
";

fn broken() -> Vec<OliveNode> {
    vec![olive(
        vec![
            group_clause(vec!["name"], vec![("total", collect_sum(var("size")))]),
            ClauseNode::Let {
                pos: Pos::new(3, 3),
                arguments: vec![olive_syntax::LetArgument {
                    name: "late".to_string(),
                    value: var("name").at(3, 23),
                    signable: true,
                }],
            },
            where_clause(binary(BinaryOp::Greater, var("total"), string("big")).at(4, 9)),
        ],
        run("submit", vec![("name", var("name")), ("size", var("total"))]),
    )]
}

// ── Tests ──────────────────────────────────────────────────────────────

#[test]
fn test_listing_is_in_report_order() {
    insta::assert_snapshot!(listing(broken()), @r"
    3:23: purity error[E0301]: Cannot declare signable variable “late” after the stream has been transformed
    4:9: type error[E0213]: No operator > for integer and string
    ");
}

#[test]
fn test_failed_clause_silences_purity() {
    let olives = vec![olive(
        vec![
            where_clause(var("missing").at(2, 9)),
            let_signable("late", var("name")),
        ],
        run("submit", vec![("name", var("name")), ("size", var("size"))]),
    )];
    insta::assert_snapshot!(listing(olives), @"2:9: resolution error[E0101]: Undefined variable “missing”");
}

#[test]
fn test_json_output() {
    let result = check(broken());
    let value: serde_json::Value = serde_json::from_str(&to_json(&result.errors)).unwrap();
    let entries = value.as_array().unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0]["line"], 3);
    assert_eq!(entries[0]["column"], 23);
    assert_eq!(entries[0]["kind"], "purity");
    assert_eq!(entries[0]["code"], "E0301");
    assert_eq!(entries[1]["kind"], "type");
}

#[test]
fn test_rendered_report_points_at_source() {
    let result = check(broken());
    let out = render_all(&result.errors, SOURCE, "jobs.olive");
    assert!(out.contains("jobs.olive"), "{out}");
    assert!(out.contains("E0213"), "{out}");
    assert!(out.contains("Where total > \"big\""), "{out}");
    assert!(
        out.contains("move the Let Signable before any Group, Join or Flatten"),
        "{out}"
    );
}

#[test]
fn test_render_errors_per_error() {
    let result = check(broken());
    let reports = result.render_errors(SOURCE, "jobs.olive");
    assert_eq!(reports.len(), 2);
    assert!(reports[1].contains("No operator > for integer and string"));
}

#[test]
fn test_signature_in_function_body_is_undefined() {
    let mut source = program(vec![olive(
        vec![],
        run("submit", vec![("name", var("name")), ("size", var("size"))]),
    )]);
    source.functions.push(FunctionNode {
        pos: Pos::new(1, 1),
        name: "f".to_string(),
        parameters: Vec::new(),
        return_type: None,
        body: var("sig").at(1, 16),
        exported: false,
    });
    let result = olive_typeck::check(&source, &registry());
    let listing = to_diagnostics(&result.errors)
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("\n");
    insta::assert_snapshot!(listing, @"1:16: resolution error[E0101]: Undefined variable “sig”");
}

#[test]
fn test_signature_after_group_is_a_purity_error() {
    let olives = vec![olive(
        vec![group_clause(vec!["name"], vec![("total", collect_sum(var("size")))])],
        run(
            "submit",
            vec![("name", var("name")), ("size", var("total")), ("note", var("sig").at(3, 40))],
        ),
    )];
    insta::assert_snapshot!(listing(olives), @"3:40: purity error[E0302]: Signature “sig” cannot be used after the stream has been transformed");
}

#[test]
fn test_clean_program_has_no_diagnostics() {
    let olives = vec![olive(
        vec![],
        run("submit", vec![("name", var("name")), ("size", var("size"))]),
    )];
    assert_eq!(listing(olives), "");
    assert_eq!(to_json(&[]), "[]");
}
