//! Whole-olive checking: stages, layouts, purity and terminals.

mod common;

use std::collections::BTreeSet;

use common::{check, check_ok, messages, registry};
use olive_common::Pos;
use olive_syntax::build::*;
use olive_syntax::{
    BinaryOp, ClauseNode, DefineNode, FlattenTarget, FunctionNode, OliveNode, ParameterNode,
    Program,
};
use olive_typeck::definitions::SignatureKind;
use olive_typeck::ir::{FlattenTarget as CheckedFlatten, StageKind};
use olive_typeck::purity::PurityState;
use olive_typeck::Type;

// ── Helpers ────────────────────────────────────────────────────────────

fn submit(name: olive_syntax::ExprNode, size: olive_syntax::ExprNode) -> olive_syntax::TerminalNode {
    run("submit", vec![("name", name), ("size", size)])
}

fn errors_of(olives: Vec<OliveNode>) -> Vec<String> {
    messages(&check(olives).errors)
}

fn names(items: &[&str]) -> BTreeSet<String> {
    items.iter().map(|s| s.to_string()).collect()
}

fn layout_names(layout: &[(String, Type)]) -> Vec<&str> {
    layout.iter().map(|(n, _)| n.as_str()).collect()
}

fn flatten_files(target: FlattenTarget) -> ClauseNode {
    ClauseNode::Flatten {
        pos: Pos::new(2, 1),
        target,
        source: var("files"),
    }
}

fn join_lanes(outer: &str, inner: &str) -> ClauseNode {
    ClauseNode::Join {
        pos: Pos::default(),
        format: "lane_info".to_string(),
        outer_key: var(outer),
        inner_key: var(inner),
    }
}

// ── Purity ─────────────────────────────────────────────────────────────

#[test]
fn test_signable_after_group() {
    let errors = errors_of(vec![olive(
        vec![
            group_clause(vec!["name", "lane"], vec![("total", collect_sum(var("size")))]),
            let_signable("x", var("lane")),
        ],
        submit(var("name"), var("total")),
    )]);
    assert_eq!(
        errors,
        ["Cannot declare signable variable “x” after the stream has been transformed"]
    );
}

#[test]
fn test_signable_set_collects_reads() {
    let program = check_ok(vec![olive(
        vec![where_clause(binary(BinaryOp::Greater, var("lane"), int(0)))],
        submit(var("name"), var("size")),
    )]);
    let pipeline = &program.pipelines[0];
    assert_eq!(pipeline.signable, names(&["lane", "name"]));
    assert_eq!(
        pipeline.signable_fields(),
        vec![
            ("lane".to_string(), Type::Integer),
            ("name".to_string(), Type::String)
        ]
    );
}

#[test]
fn test_plain_fields_are_not_signable() {
    let program = check_ok(vec![olive(
        vec![],
        submit(string("fixed"), var("size")),
    )]);
    assert!(program.pipelines[0].signable.is_empty());
}

#[test]
fn test_let_signable_carries_provenance() {
    let program = check_ok(vec![olive(
        vec![let_signable("key", binary(BinaryOp::Add, var("name"), string("!")))],
        submit(var("key"), var("size")),
    )]);
    assert_eq!(program.pipelines[0].signable, names(&["name"]));
}

#[test]
fn test_signable_reads_after_group_are_ignored() {
    let program = check_ok(vec![olive(
        vec![
            where_clause(binary(BinaryOp::Less, var("size"), var("limit"))),
            group_clause(vec!["name"], vec![("total", collect_sum(var("size")))]),
        ],
        submit(var("name"), var("total")),
    )]);
    assert_eq!(program.pipelines[0].signable, names(&["name"]));
}

#[test]
fn test_purity_trace() {
    let program = check_ok(vec![olive(
        vec![
            where_clause(boolean(true)),
            let_clause(vec![("double", binary(BinaryOp::Multiply, var("size"), int(2)))]),
            group_clause(vec!["name"], vec![("total", collect_sum(var("double")))]),
        ],
        submit(var("name"), var("total")),
    )]);
    assert_eq!(
        program.pipelines[0].purity_trace,
        [
            PurityState::Pure,
            PurityState::Pure,
            PurityState::AlmostPure,
            PurityState::Transformed,
            PurityState::Transformed,
        ]
    );
}

#[test]
fn test_signature_before_and_after_transform() {
    let program = check_ok(vec![olive(
        vec![],
        run(
            "submit",
            vec![("name", var("name")), ("size", var("size")), ("note", var("sig"))],
        ),
    )]);
    assert_eq!(
        program.pipelines[0].signatures_used.get("sig"),
        Some(&SignatureKind::Sha256)
    );

    let errors = errors_of(vec![olive(
        vec![group_clause(vec!["name"], vec![("total", collect_sum(var("size")))])],
        run(
            "submit",
            vec![("name", var("name")), ("size", var("total")), ("note", var("sig"))],
        ),
    )]);
    assert_eq!(
        errors,
        ["Signature “sig” cannot be used after the stream has been transformed"]
    );
}

// ── Variables ──────────────────────────────────────────────────────────

#[test]
fn test_unused_let() {
    let errors = errors_of(vec![olive(
        vec![let_clause(vec![("extra", int(1))])],
        submit(var("name"), var("size")),
    )]);
    assert_eq!(errors, ["Variable “extra” is never used"]);
}

#[test]
fn test_duplicate_let() {
    let errors = errors_of(vec![olive(
        vec![let_clause(vec![("size", int(1))])],
        submit(var("name"), var("size")),
    )]);
    assert!(
        errors.contains(&"Variable “size” already exists".to_string()),
        "{errors:?}"
    );
}

#[test]
fn test_olives_are_independent() {
    let result = check(vec![
        olive(vec![], submit(var("name"), var("missing"))),
        olive(vec![], submit(var("name"), var("size"))),
    ]);
    assert_eq!(messages(&result.errors), ["Undefined variable “missing”"]);
    assert!(result.program.is_none());
}

// ── Group ──────────────────────────────────────────────────────────────

#[test]
fn test_group_layout_and_ok_flag() {
    let program = check_ok(vec![olive(
        vec![group_clause(
            vec!["name"],
            vec![
                ("total", collect_sum(var("size"))),
                ("top", collect_max(var("size"), None)),
            ],
        )],
        submit(var("name"), binary(BinaryOp::Add, var("top"), var("total"))),
    )]);
    let stage = &program.pipelines[0].stages[0];
    assert_eq!(layout_names(&stage.output_layout), ["name", "total", "top"]);
    let StageKind::Group { shape, .. } = &stage.kind else {
        panic!("expected a group, got {}", stage.kind.name());
    };
    assert!(shape.ok, "Max without a default can drop the group");
    assert_eq!(shape.descriptor(), "t1s");
}

#[test]
fn test_group_without_fallible_collectors() {
    let program = check_ok(vec![olive(
        vec![group_clause(
            vec!["name", "lane"],
            vec![("top", collect_max(var("size"), Some(var("limit"))))],
        )],
        submit(var("name"), var("top")),
    )]);
    let StageKind::Group { shape, .. } = &program.pipelines[0].stages[0].kind else {
        panic!("expected a group");
    };
    assert!(!shape.ok);
    assert_eq!(
        program.constants,
        vec![("limit".to_string(), Type::Integer)]
    );
}

#[test]
fn test_group_hides_ungrouped_fields() {
    let errors = errors_of(vec![olive(
        vec![group_clause(vec!["name"], vec![("total", collect_sum(var("size")))])],
        submit(var("name"), var("size")),
    )]);
    assert_eq!(errors[0], "Undefined variable “size”");
}

// ── Flatten ────────────────────────────────────────────────────────────

#[test]
fn test_wildcard_flatten_extracts_used_fields() {
    let program = check_ok(vec![olive(
        vec![flatten_files(FlattenTarget::Wildcard)],
        submit(var("name"), var("bytes")),
    )]);
    let stage = &program.pipelines[0].stages[0];
    let StageKind::Flatten {
        target: CheckedFlatten::Wildcard { used, .. },
        ..
    } = &stage.kind
    else {
        panic!("expected a wildcard flatten");
    };
    assert_eq!(used, &["bytes".to_string()]);
    assert_eq!(stage.output_layout.last().map(|(n, _)| n.as_str()), Some("bytes"));
    assert_eq!(program.pipelines[0].terminal.layout, stage.output_layout);
}

#[test]
fn test_unused_wildcard() {
    let result = check(vec![olive(
        vec![flatten_files(FlattenTarget::Wildcard)],
        submit(var("name"), var("size")),
    )]);
    assert_eq!(
        messages(&result.errors),
        ["No variables map back to this wildcard"]
    );
    assert_eq!(result.errors[0].pos(), Pos::new(2, 1));
}

#[test]
fn test_named_flatten() {
    let program = check_ok(vec![olive(
        vec![ClauseNode::Flatten {
            pos: Pos::default(),
            target: FlattenTarget::Name {
                name: "tag".to_string(),
            },
            source: var("tags"),
        }],
        submit(var("tag"), var("size")),
    )]);
    let layout = &program.pipelines[0].terminal.layout;
    assert_eq!(layout.last(), Some(&("tag".to_string(), Type::String)));
}

// ── Join ───────────────────────────────────────────────────────────────

#[test]
fn test_join_adds_inner_fields_and_services() {
    let program = check_ok(vec![olive(
        vec![join_lanes("lane", "id")],
        submit(var("owner"), var("size")),
    )]);
    let terminal = &program.pipelines[0].terminal;
    assert!(layout_names(&terminal.layout).contains(&"owner"));
    assert_eq!(
        program.required_services,
        names(&["lane_info", "run", "scheduler"])
    );
}

#[test]
fn test_join_key_types_must_match() {
    let errors = errors_of(vec![olive(
        vec![join_lanes("name", "id")],
        submit(var("owner"), var("size")),
    )]);
    assert_eq!(errors, ["Expected string, but got integer"]);
}

#[test]
fn test_join_inner_key_cannot_see_outer_record() {
    let errors = errors_of(vec![olive(
        vec![join_lanes("lane", "lane")],
        submit(var("owner"), var("size")),
    )]);
    assert_eq!(errors, ["Undefined variable “lane”"]);
}

// ── Require, Pick, Reject ──────────────────────────────────────────────

#[test]
fn test_require_unwraps_optional() {
    let lookup = dict_get(dict(vec![(int(1), int(10))]), var("lane"));
    let program = check_ok(vec![olive(
        vec![ClauseNode::Require {
            pos: Pos::default(),
            name: "quota".to_string(),
            value: lookup,
            handlers: Vec::new(),
        }],
        submit(var("name"), var("quota")),
    )]);
    let layout = &program.pipelines[0].terminal.layout;
    assert_eq!(layout.last(), Some(&("quota".to_string(), Type::Integer)));
}

#[test]
fn test_require_needs_optional() {
    let errors = errors_of(vec![olive(
        vec![ClauseNode::Require {
            pos: Pos::default(),
            name: "quota".to_string(),
            value: var("size"),
            handlers: Vec::new(),
        }],
        submit(var("name"), var("quota")),
    )]);
    assert_eq!(errors[0], "Expected an optional, but got integer");
}

#[test]
fn test_pick_score_and_keys() {
    let pick = |score, key: &str| ClauseNode::Pick {
        pos: Pos::default(),
        max: true,
        score,
        discriminators: vec![key.to_string()],
    };
    let program = check_ok(vec![olive(
        vec![pick(var("started"), "lane")],
        submit(var("name"), var("size")),
    )]);
    assert_eq!(program.pipelines[0].stages[0].kind.name(), "Pick");

    let errors = errors_of(vec![olive(
        vec![pick(var("tags"), "lane")],
        submit(var("name"), var("size")),
    )]);
    assert_eq!(errors, ["[string] values cannot be ordered"]);

    let errors = errors_of(vec![olive(
        vec![pick(var("started"), "nope")],
        submit(var("name"), var("size")),
    )]);
    assert_eq!(errors, ["Undefined variable “nope”"]);

    let errors = errors_of(vec![olive(
        vec![pick(var("started"), "limit")],
        submit(var("name"), var("size")),
    )]);
    assert_eq!(errors, ["“limit” is not a stream variable"]);
}

#[test]
fn test_reject_condition_must_be_boolean() {
    let errors = errors_of(vec![olive(
        vec![ClauseNode::Reject {
            pos: Pos::default(),
            condition: var("size"),
            handlers: Vec::new(),
        }],
        submit(var("name"), var("size")),
    )]);
    assert_eq!(errors, ["Expected a boolean, but got integer"]);
}

// ── Terminals ──────────────────────────────────────────────────────────

#[test]
fn test_missing_and_unknown_parameters() {
    let errors = errors_of(vec![olive(
        vec![],
        run("submit", vec![("name", var("name")), ("colour", string("red"))]),
    )]);
    assert_eq!(
        errors,
        [
            "“submit” has no parameter “colour”",
            "“submit” requires parameter “size”"
        ]
    );
}

#[test]
fn test_unknown_action() {
    assert_eq!(
        errors_of(vec![olive(vec![], run("launch", vec![]))]),
        ["Unknown action “launch”"]
    );
}

#[test]
fn test_parameter_types() {
    let errors = errors_of(vec![olive(vec![], submit(var("lane"), var("size")))]);
    assert_eq!(errors, ["Expected string, but got integer"]);
}

#[test]
fn test_arguments_are_sorted() {
    let program = check_ok(vec![olive(
        vec![],
        run(
            "submit",
            vec![("size", var("size")), ("note", string("n")), ("name", var("name"))],
        ),
    )]);
    let names: Vec<_> = program.pipelines[0]
        .terminal
        .arguments
        .iter()
        .map(|(n, _)| n.as_str())
        .collect();
    assert_eq!(names, ["name", "note", "size"]);
}

#[test]
fn test_alert_labels_annotations_and_ttl() {
    let program = check_ok(vec![olive(
        vec![],
        alert(
            vec![
                ("alertname", string("Stuck")),
                ("lane", interpolate(vec![Ok("lane "), Err(var("lane"))])),
            ],
            vec![("summary", var("name"))],
            int(600),
        ),
    )]);
    let terminal = &program.pipelines[0].terminal;
    assert_eq!(terminal.target(), "Alert");
    let arguments: Vec<&str> = terminal.arguments.iter().map(|(n, _)| n.as_str()).collect();
    assert_eq!(arguments, ["alertname", "lane", "summary", "ttl"]);
    assert_eq!(program.pipelines[0].signable, names(&["lane", "name"]));
}

#[test]
fn test_alert_errors() {
    let errors = errors_of(vec![olive(
        vec![],
        alert(vec![("severity", string("high"))], vec![], int(60)),
    )]);
    assert_eq!(errors, ["“Alert” requires parameter “alertname”"]);

    let errors = errors_of(vec![olive(
        vec![],
        alert(
            vec![("alertname", string("Stuck"))],
            vec![("alertname", var("name"))],
            int(60),
        ),
    )]);
    assert_eq!(errors, ["Field “alertname” is given more than once"]);

    let errors = errors_of(vec![olive(
        vec![],
        alert(vec![("alertname", var("size"))], vec![], string("soon")),
    )]);
    assert_eq!(
        errors,
        ["Expected a string, but got integer", "Expected an integer, but got string"]
    );
}

// ── Defines ────────────────────────────────────────────────────────────

fn defines_errors(definitions: Vec<DefineNode>, olives: Vec<OliveNode>) -> Vec<String> {
    let mut program = common::program(olives);
    program.definitions = definitions;
    messages(&olive_typeck::check(&program, &registry()).errors)
}

fn capped() -> DefineNode {
    define(
        "capped",
        &[("cap", "i")],
        vec![where_clause(binary(BinaryOp::Less, var("size"), var("cap")))],
    )
}

fn recent() -> DefineNode {
    define(
        "recent",
        &[],
        vec![where_clause(binary(BinaryOp::Greater, var("lane"), int(0)))],
    )
}

#[test]
fn test_call_expands_define_in_place() {
    let mut program = common::program(vec![olive(
        vec![call_clause("capped", vec![var("limit")])],
        submit(var("name"), var("cap")),
    )]);
    program.definitions = vec![capped()];
    let result = olive_typeck::check(&program, &registry());
    assert!(result.errors.is_empty(), "{:?}", messages(&result.errors));
    let pipeline = &result.program.unwrap().pipelines[0];
    let stages: Vec<&str> = pipeline.stages.iter().map(|s| s.kind.name()).collect();
    assert_eq!(stages, ["Call", "Where"]);
    assert!(matches!(
        &pipeline.stages[0].kind,
        StageKind::Call { define, parameters } if define == "capped" && parameters.len() == 1
    ));
    assert_eq!(
        pipeline.purity_trace,
        [
            PurityState::Pure,
            PurityState::Pure,
            PurityState::AlmostPure,
            PurityState::AlmostPure,
        ]
    );
}

#[test]
fn test_call_arguments_see_constants_only() {
    let errors = defines_errors(
        vec![capped()],
        vec![olive(
            vec![call_clause("capped", vec![var("size")])],
            submit(var("name"), var("size")),
        )],
    );
    assert_eq!(errors, ["Undefined variable “size”"]);
}

#[test]
fn test_call_arity_and_parameter_types() {
    let errors = defines_errors(
        vec![capped()],
        vec![olive(
            vec![call_clause("capped", vec![])],
            submit(var("name"), var("size")),
        )],
    );
    assert_eq!(errors, ["“capped” takes 1 argument(s), but 0 were given"]);

    let errors = defines_errors(
        vec![capped()],
        vec![olive(
            vec![call_clause("capped", vec![string("ten")])],
            submit(var("name"), var("size")),
        )],
    );
    assert_eq!(errors, ["Expected integer, but got string"]);
}

#[test]
fn test_call_only_before_any_change() {
    let errors = defines_errors(
        vec![recent()],
        vec![olive(
            vec![call_clause("recent", vec![]), call_clause("recent", vec![])],
            submit(var("name"), var("size")),
        )],
    );
    assert_eq!(errors, ["“Call” clause cannot be applied to a transformed stream"]);
}

#[test]
fn test_matches_tolerates_pass_through_clauses() {
    let matches = || ClauseNode::Matches {
        pos: Pos::default(),
        name: "recent".to_string(),
        arguments: Vec::new(),
    };
    let errors = defines_errors(
        vec![recent()],
        vec![olive(
            vec![
                let_clause(vec![("double", binary(BinaryOp::Multiply, var("size"), int(2)))]),
                matches(),
            ],
            submit(var("name"), var("double")),
        )],
    );
    assert!(errors.is_empty(), "{errors:?}");

    let errors = defines_errors(
        vec![recent()],
        vec![olive(
            vec![
                group_clause(vec!["name"], vec![("total", collect_sum(var("size")))]),
                matches(),
            ],
            submit(var("name"), var("total")),
        )],
    );
    assert_eq!(errors, ["“Matches” clause cannot be applied to a transformed stream"]);
}

#[test]
fn test_unknown_duplicate_and_recursive_defines() {
    let errors = defines_errors(
        vec![],
        vec![olive(
            vec![call_clause("nope", vec![])],
            submit(var("name"), var("size")),
        )],
    );
    assert_eq!(errors, ["Unknown define “nope”"]);

    let errors = defines_errors(vec![recent(), recent()], vec![]);
    assert_eq!(errors, ["Duplicate definition of “Define recent”"]);

    let looping = define("loop", &[], vec![call_clause("loop", vec![])]);
    let errors = defines_errors(
        vec![looping],
        vec![olive(
            vec![call_clause("loop", vec![])],
            submit(var("name"), var("size")),
        )],
    );
    assert_eq!(errors, ["“Define loop” includes itself"]);
}

#[test]
fn test_define_errors_are_reported_once() {
    let broken = define("broken", &[], vec![where_clause(var("nope"))]);
    let caller = || {
        olive(
            vec![call_clause("broken", vec![])],
            submit(var("name"), var("size")),
        )
    };
    let errors = defines_errors(vec![broken], vec![caller(), caller()]);
    assert_eq!(errors, ["Undefined variable “nope”"]);
}

// ── Functions ──────────────────────────────────────────────────────────

fn function(name: &str, parameters: &[(&str, &str)], body: olive_syntax::ExprNode) -> FunctionNode {
    FunctionNode {
        pos: Pos::default(),
        name: name.to_string(),
        parameters: parameters
            .iter()
            .map(|(n, t)| ParameterNode {
                name: n.to_string(),
                ty: t.to_string(),
            })
            .collect(),
        return_type: None,
        body,
        exported: true,
    }
}

#[test]
fn test_program_functions_and_exports() {
    let program = Program {
        input: "run".to_string(),
        functions: vec![
            function("double", &[("x", "i")], binary(BinaryOp::Multiply, var("x"), int(2))),
            function("quad", &[("x", "i")], call("double", vec![call("double", vec![var("x")])])),
        ],
        definitions: Vec::new(),
        olives: vec![olive(vec![], submit(var("name"), call("quad", vec![var("size")])))],
    };
    let result = olive_typeck::check(&program, &registry());
    assert!(result.is_ok(), "{:?}", messages(&result.errors));
    let checked = result.program.unwrap();
    let exported: Vec<_> = checked.exports().map(|f| f.name.as_str()).collect();
    assert_eq!(exported, ["double", "quad"]);
    assert_eq!(checked.functions[1].return_type, Type::Integer);
}

#[test]
fn test_function_bad_descriptor() {
    let program = Program {
        input: "run".to_string(),
        functions: vec![function("f", &[("x", "q")], var("x"))],
        definitions: Vec::new(),
        olives: Vec::new(),
    };
    let result = olive_typeck::check(&program, &registry());
    assert!(messages(&result.errors)[0].starts_with("Bad type “q”"));
}

#[test]
fn test_unknown_input_format() {
    let program = Program {
        input: "nope".to_string(),
        functions: Vec::new(),
        definitions: Vec::new(),
        olives: Vec::new(),
    };
    let result = olive_typeck::check(&program, &registry());
    assert_eq!(
        messages(&result.errors),
        ["Unknown input format “nope”"]
    );
}
