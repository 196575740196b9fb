//! Both backends, same programs, same events.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};

use common::*;
use olive_codegen::text::sexp::{self, Sexp};
use olive_codegen::{compile_text, BackendKind, OliveProgram};
use olive_common::Pos;
use olive_rt::plan::StagePlan;
use olive_rt::{Event, RecordingSink, RuntimeError, Value};
use olive_syntax::build::*;
use olive_syntax::{
    ArgumentNode, BinaryOp, ClauseNode, CollectNode, ExprNode, FlattenTarget,
    FunctionNode, LabelNode, MatchBindings, OliveNode, ParameterNode, RejectNode, TerminalNode,
};
use proptest::prelude::*;

// ── Helpers ────────────────────────────────────────────────────────────

fn submit(name: ExprNode, size: ExprNode) -> TerminalNode {
    run("submit", vec![("name", name), ("size", size)])
}

fn submit_note(name: ExprNode, size: ExprNode, note: ExprNode) -> TerminalNode {
    run("submit", vec![("name", name), ("size", size), ("note", note)])
}

fn single(clauses: Vec<ClauseNode>, terminal: TerminalNode) -> Vec<(String, i64, Option<String>)> {
    submissions(&agreed_events(&program(vec![olive(clauses, terminal)])))
}

fn plain(rows: &[(&str, i64)]) -> Vec<(String, i64, Option<String>)> {
    rows.iter().map(|(n, s)| (n.to_string(), *s, None)).collect()
}

fn noted(rows: &[(&str, i64, &str)]) -> Vec<(String, i64, Option<String>)> {
    rows.iter()
        .map(|(n, s, note)| (n.to_string(), *s, Some(note.to_string())))
        .collect()
}

fn double() -> FunctionNode {
    FunctionNode {
        pos: Pos::default(),
        name: "double".to_string(),
        parameters: vec![ParameterNode {
            name: "x".to_string(),
            ty: "i".to_string(),
        }],
        return_type: Some("i".to_string()),
        body: binary(BinaryOp::Multiply, var("x"), int(2)),
        exported: true,
    }
}

// ── Stages ─────────────────────────────────────────────────────────────

#[test]
fn where_and_let_read_constants() {
    let rows = single(
        vec![
            where_clause(binary(BinaryOp::Greater, var("lane"), var("limit"))),
            let_clause(vec![("doubled", binary(BinaryOp::Multiply, var("size"), int(2)))]),
        ],
        submit(var("name"), var("doubled")),
    );
    assert_eq!(rows, plain(&[("test", 10), ("lint", 2), ("test", 16)]));
}

#[test]
fn group_keeps_first_seen_order() {
    let rows = single(
        vec![group_clause(
            vec!["name", "lane"],
            vec![("total", collect_sum(var("size")))],
        )],
        submit(var("name"), var("total")),
    );
    assert_eq!(rows, plain(&[("build", 17), ("test", 13), ("lint", 1)]));
}

#[test]
fn group_drops_groups_with_an_empty_first() {
    let rows = single(
        vec![group_clause(
            vec!["lane"],
            vec![(
                "biggest",
                collect_where(
                    binary(BinaryOp::Greater, var("size"), int(6)),
                    collect_first(var("size"), None),
                ),
            )],
        )],
        submit(string("lane"), var("biggest")),
    );
    assert_eq!(rows, plain(&[("lane", 10), ("lane", 8)]));
}

#[test]
fn join_appends_inner_fields() {
    let rows = single(
        vec![ClauseNode::Join {
            pos: Pos::default(),
            format: "lane_info".to_string(),
            outer_key: var("lane"),
            inner_key: var("id"),
        }],
        submit(var("owner"), var("size")),
    );
    assert_eq!(rows, plain(&[("ann", 10), ("bo", 5), ("ann", 7), ("bo", 8)]));
}

#[test]
fn left_join_collects_missing_rows_as_empty() {
    let first_owner = default(
        for_each("o", var("owners"), collect_first(var("o"), None)),
        string("-"),
    );
    let rows = single(
        vec![ClauseNode::LeftJoin {
            pos: Pos::default(),
            format: "lane_info".to_string(),
            outer_key: var("lane"),
            inner_key: var("id"),
            collectors: vec![CollectNode {
                pos: Pos::default(),
                name: "owners".to_string(),
                collector: collect_list(var("owner")),
            }],
        }],
        submit_note(var("name"), var("size"), first_owner),
    );
    assert_eq!(
        rows,
        noted(&[
            ("build", 10, "ann"),
            ("test", 5, "bo"),
            ("build", 7, "ann"),
            ("lint", 1, "-"),
            ("test", 8, "bo"),
        ])
    );
}

#[test]
fn pick_keeps_the_latest_run_per_lane() {
    let rows = single(
        vec![ClauseNode::Pick {
            pos: Pos::default(),
            max: true,
            score: var("started"),
            discriminators: vec!["lane".to_string()],
        }],
        submit(var("name"), var("size")),
    );
    assert_eq!(rows, plain(&[("build", 7), ("test", 8), ("lint", 1)]));
}

#[test]
fn flatten_by_name_and_wildcard_agree() {
    let by_name = single(
        vec![ClauseNode::Flatten {
            pos: Pos::default(),
            target: FlattenTarget::Name {
                name: "file".to_string(),
            },
            source: var("files"),
        }],
        submit(var("name"), field(var("file"), "bytes")),
    );
    let wildcard = single(
        vec![ClauseNode::Flatten {
            pos: Pos::default(),
            target: FlattenTarget::Wildcard,
            source: var("files"),
        }],
        submit(var("name"), var("bytes")),
    );
    assert_eq!(by_name, plain(&[("build", 3), ("build", 4), ("build", 9), ("test", 1)]));
    assert_eq!(by_name, wildcard);
}

#[test]
fn require_reports_dropped_records() {
    let quota = dict_get(dict(vec![(int(1), int(10)), (int(3), int(30))]), var("lane"));
    let events = agreed_events(&program(vec![olive(
        vec![ClauseNode::Require {
            pos: Pos::default(),
            name: "quota".to_string(),
            value: quota,
            handlers: vec![RejectNode::Monitor {
                metric: "no_quota".to_string(),
                help: "runs on lanes without a quota".to_string(),
                labels: vec![LabelNode {
                    name: "job".to_string(),
                    value: var("name"),
                }],
            }],
        }],
        submit(var("name"), var("quota")),
    )]));
    let monitored = events
        .iter()
        .filter(|e| matches!(e, Event::Monitor { metric, .. } if metric == "no_quota"))
        .count();
    assert_eq!(monitored, 2);
    assert_eq!(
        submissions(&events),
        plain(&[("build", 10), ("build", 10), ("lint", 30)])
    );
}

#[test]
fn reject_dumps_what_it_drops() {
    let events = agreed_events(&program(vec![olive(
        vec![ClauseNode::Reject {
            pos: Pos::default(),
            condition: binary(BinaryOp::Equal, var("status"), tag("FAILED")),
            handlers: vec![RejectNode::Dump {
                dumper: "failures".to_string(),
                columns: vec![var("name"), var("lane")],
            }],
        }],
        submit(var("name"), var("size")),
    )]));
    assert_eq!(
        events[0],
        Event::Dump {
            dumper: "failures".to_string(),
            row: vec![Value::str("test"), Value::Int(2)],
        }
    );
    assert_eq!(submissions(&events).len(), 4);
}

#[test]
fn refill_delivers_every_row_once() {
    let events = agreed_events(&program(vec![olive(
        vec![where_clause(binary(BinaryOp::Equal, var("lane"), int(2)))],
        TerminalNode::Refill {
            pos: Pos::default(),
            refiller: "store".to_string(),
            arguments: vec![
                ArgumentNode {
                    pos: Pos::default(),
                    name: "key".to_string(),
                    value: var("name"),
                },
                ArgumentNode {
                    pos: Pos::default(),
                    name: "total".to_string(),
                    value: var("size"),
                },
            ],
        },
    )]));
    let [Event::Refill { refiller, rows }] = events.as_slice() else {
        panic!("expected a single refill, got {events:?}");
    };
    assert_eq!(refiller, "store");
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[1][1], ("total".to_string(), Value::Int(8)));
}

// ── Expressions ────────────────────────────────────────────────────────

#[test]
fn match_binds_payloads() {
    let value = match_expr(
        var("result"),
        vec![
            match_arm(
                "SOME",
                MatchBindings::Tuple {
                    names: vec!["n".to_string()],
                },
                var("n"),
            ),
            match_arm("NONE", MatchBindings::Empty, int(0)),
        ],
        None,
    );
    let rows = single(Vec::new(), submit(var("name"), value));
    assert_eq!(
        rows,
        plain(&[("build", 7), ("test", 0), ("build", 2), ("lint", 0), ("test", 11)])
    );
}

#[test]
fn match_remainder_covers_the_rest() {
    let value = match_expr(
        var("status"),
        vec![match_arm("DONE", MatchBindings::Empty, int(1))],
        Some((None, int(0))),
    );
    let rows = single(Vec::new(), submit(var("name"), value));
    let sizes: Vec<i64> = rows.iter().map(|r| r.1).collect();
    assert_eq!(sizes, [1, 0, 0, 1, 1]);
}

#[test]
fn switch_falls_back_to_otherwise() {
    let note = switch(
        var("lane"),
        vec![(int(1), string("one")), (int(2), string("two"))],
        Some(string("other")),
    );
    let rows = single(Vec::new(), submit_note(var("name"), var("size"), note));
    let notes: Vec<_> = rows.iter().map(|r| r.2.clone().unwrap()).collect();
    assert_eq!(notes, ["one", "two", "one", "other", "two"]);
}

#[test]
fn for_sums_over_a_list() {
    let lengths = for_each(
        "t",
        var("tags"),
        collect_sum(call("string_length", vec![var("t")])),
    );
    let rows = single(Vec::new(), submit(var("name"), lengths));
    let sizes: Vec<i64> = rows.iter().map(|r| r.1).collect();
    assert_eq!(sizes, [6, 4, 0, 2, 6]);
}

#[test]
fn for_max_with_a_default() {
    let biggest = for_each(
        "f",
        var("files"),
        collect_max(field(var("f"), "bytes"), Some(int(-1))),
    );
    let rows = single(Vec::new(), submit(var("name"), biggest));
    let sizes: Vec<i64> = rows.iter().map(|r| r.1).collect();
    assert_eq!(sizes, [4, -1, 9, -1, 1]);
}

#[test]
fn program_functions_are_callable_from_olives() {
    let program = with_functions(
        vec![double()],
        vec![olive(Vec::new(), submit(var("name"), call("double", vec![var("size")])))],
    );
    let sizes: Vec<i64> = submissions(&agreed_events(&program))
        .iter()
        .map(|r| r.1)
        .collect();
    assert_eq!(sizes, [20, 10, 14, 2, 16]);
}

#[test]
fn signatures_follow_signable_fields() {
    let rows = single(Vec::new(), submit_note(var("name"), var("size"), var("sig")));
    let notes: Vec<String> = rows.into_iter().map(|r| r.2.unwrap()).collect();
    assert!(notes.iter().all(|n| n.len() == 64));
    // Same name and lane.
    assert_eq!(notes[0], notes[2]);
    assert_ne!(notes[0], notes[1]);
}

#[test]
fn a_signature_is_computed_once_per_record() {
    let note = if_else(
        binary(BinaryOp::Equal, var("sig"), string("")),
        string("unsigned"),
        var("sig"),
    );
    let program = program(vec![olive(Vec::new(), submit_note(var("name"), var("size"), note))]);
    let compiled = compile_text(&program, &registry()).unwrap();
    assert_eq!(compiled.script().matches("\"signature/sha256/").count(), 1);

    let rows = submissions(&agreed_events(&program));
    let plain = single(Vec::new(), submit_note(var("name"), var("size"), var("sig")));
    assert_eq!(rows, plain);
}

#[test]
fn olives_run_in_program_order() {
    let program = program(vec![
        olive(
            vec![where_clause(binary(BinaryOp::Equal, var("lane"), int(3)))],
            submit(string("first"), var("size")),
        ),
        olive(
            vec![where_clause(binary(BinaryOp::Equal, var("lane"), int(2)))],
            submit(string("second"), var("size")),
        ),
    ]);
    let rows = submissions(&agreed_events(&program));
    assert_eq!(rows, plain(&[("first", 1), ("second", 5), ("second", 8)]));
}

// ── Defines ────────────────────────────────────────────────────────────

fn capped() -> olive_syntax::DefineNode {
    define(
        "capped",
        &[("cap", "i")],
        vec![where_clause(binary(BinaryOp::Less, var("size"), var("cap")))],
    )
}

#[test]
fn call_binds_parameters_for_the_rest_of_the_olive() {
    let program = with_definitions(
        vec![capped()],
        vec![olive(
            vec![call_clause("capped", vec![binary(BinaryOp::Add, var("limit"), int(6))])],
            submit(var("name"), var("cap")),
        )],
    );
    let rows = submissions(&agreed_events(&program));
    assert_eq!(rows, plain(&[("test", 7), ("lint", 7)]));
}

#[test]
fn nested_calls_pass_parameters_along() {
    let small = define(
        "small",
        &[("most", "i")],
        vec![call_clause("capped", vec![var("most")])],
    );
    let program = with_definitions(
        vec![capped(), small],
        vec![olive(
            vec![call_clause("small", vec![int(6)])],
            submit(var("name"), var("size")),
        )],
    );
    let rows = submissions(&agreed_events(&program));
    assert_eq!(rows, plain(&[("test", 5), ("lint", 1)]));
}

// ── Alerts and text ────────────────────────────────────────────────────

#[test]
fn alerts_carry_interpolated_labels() {
    let program = program(vec![olive(
        vec![where_clause(binary(BinaryOp::Equal, var("lane"), int(3)))],
        alert(
            vec![
                ("alertname", string("Slow")),
                (
                    "job",
                    interpolate(vec![Ok("job "), Err(var("name")), Ok("@"), Err(var("lane"))]),
                ),
            ],
            vec![("started", interpolate(vec![Err(var("started"))]))],
            int(60),
        ),
    )]);
    let pairs = |items: &[(&str, &str)]| -> Vec<(String, String)> {
        items
            .iter()
            .map(|(n, v)| (n.to_string(), v.to_string()))
            .collect()
    };
    assert_eq!(
        agreed_events(&program),
        [Event::Alert {
            labels: pairs(&[("alertname", "Slow"), ("job", "job lint@3")]),
            annotations: pairs(&[("started", "1970-01-01T00:00:50Z")]),
            ttl: 60,
        }]
    );
}

#[test]
fn regex_groups_bind_optional_strings() {
    let rest = default(
        optional_of(tuple_get(
            optional_use(regex_bind(var("name"), "b(u)(.*)")),
            1,
        )),
        string("none"),
    );
    let rows = single(vec![], submit_note(var("name"), var("size"), rest));
    assert_eq!(
        rows,
        noted(&[
            ("build", 10, "ild"),
            ("test", 5, "none"),
            ("build", 7, "ild"),
            ("lint", 1, "none"),
            ("test", 8, "none"),
        ])
    );
}

#[test]
fn tabulate_rows_are_keyed_by_position() {
    let words = tabulate(vec![("word", vec![string("zero"), string("one")])]);
    let note = default(dict_get(field(words, "word"), string("1")), string("?"));
    let rows = single(
        vec![where_clause(binary(BinaryOp::Equal, var("lane"), int(3)))],
        submit_note(var("name"), var("size"), note),
    );
    assert_eq!(rows, noted(&[("lint", 1, "one")]));
}

// ── Optional lifting ───────────────────────────────────────────────────

fn lifted_length() -> OliveNode {
    let names = dict(vec![(int(1), string("one"))]);
    let length = optional_of(call(
        "string_length",
        vec![optional_use(dict_get(names, var("lane")))],
    ));
    olive(
        vec![let_clause(vec![("length", length)])],
        submit(var("name"), default(var("length"), int(-1))),
    )
}

#[test]
fn lifted_body_only_runs_when_every_use_is_present() {
    let program = program(vec![lifted_length()]);
    for backend in BACKENDS {
        let calls = Arc::new(AtomicUsize::new(0));
        let context = context();
        let counter = Arc::clone(&calls);
        context.register("string_length", move |args| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(Value::Int(args[0].as_str()?.chars().count() as i64))
        });
        let compiled = build(&program, backend);
        let mut sink = RecordingSink::new();
        compiled.run(&context, &input(), &mut sink).unwrap();

        let sizes: Vec<i64> = submissions(&sink.events).iter().map(|r| r.1).collect();
        assert_eq!(sizes, [3, -1, 3, -1, -1], "{backend}");
        assert_eq!(calls.load(Ordering::SeqCst), 2, "{backend}");
    }
}

// ── Artifact operations ────────────────────────────────────────────────

#[test]
fn exports_can_be_called_by_name() {
    let program = with_functions(vec![double()], Vec::new());
    for backend in BACKENDS {
        let compiled = build(&program, backend);
        assert_eq!(compiled.exports().len(), 1);
        assert_eq!(compiled.exports()[0].name, "double");

        let context = context();
        let result = compiled.call_export(&context, "double", &[Value::Int(21)]).unwrap();
        assert_eq!(result, Value::Int(42));

        let unknown = compiled.call_export(&context, "triple", &[Value::Int(1)]);
        assert!(matches!(unknown, Err(RuntimeError::UnknownExport(ref n)) if n == "triple"));

        let arity = compiled.call_export(&context, "double", &[]);
        assert!(matches!(
            arity,
            Err(RuntimeError::Arity {
                expected: 1,
                found: 0,
                ..
            })
        ));
    }
}

#[test]
fn private_functions_are_not_exported() {
    let mut hidden = double();
    hidden.exported = false;
    let compiled = build(&with_functions(vec![hidden], Vec::new()), BackendKind::Stack);
    assert!(compiled.exports().is_empty());
    assert!(matches!(
        compiled.call_export(&context(), "double", &[Value::Int(1)]),
        Err(RuntimeError::UnknownExport(_))
    ));
}

#[test]
fn required_services_are_sorted_and_complete() {
    let program = program(vec![olive(
        vec![ClauseNode::Join {
            pos: Pos::default(),
            format: "lane_info".to_string(),
            outer_key: var("lane"),
            inner_key: var("id"),
        }],
        submit(var("owner"), call("string_length", vec![var("name")])),
    )]);
    for backend in BACKENDS {
        let compiled = build(&program, backend);
        assert_eq!(
            compiled.required_services(),
            ["lane_info", "run", "scheduler", "strings"]
        );
    }
}

#[test]
fn missing_constants_fail_the_run() {
    let program = program(vec![olive(
        vec![where_clause(binary(BinaryOp::Greater, var("lane"), var("limit")))],
        submit(var("name"), var("size")),
    )]);
    for backend in BACKENDS {
        let compiled = build(&program, backend);
        let mut sink = RecordingSink::new();
        let result = compiled.run(&olive_rt::RuntimeContext::with_builtins(), &input(), &mut sink);
        assert!(matches!(result, Err(RuntimeError::MissingConstant(_))), "{backend}");
    }
}

#[test]
fn rejected_programs_report_every_diagnostic() {
    let program = program(vec![olive(
        vec![where_clause(var("size"))],
        submit(var("nope"), var("size")),
    )]);
    let diagnostics = olive_codegen::compile(&program, &registry(), BackendKind::Text).unwrap_err();
    assert_eq!(diagnostics.len(), 2);
}

fn is_form(form: &Sexp, head: &str, name: &str) -> bool {
    match form {
        Sexp::List(items) => {
            items.first().and_then(Sexp::as_symbol) == Some(head)
                && items.get(1) == Some(&Sexp::string(name))
        }
        _ => false,
    }
}

fn contains_form(form: &Sexp, head: &str, name: &str) -> bool {
    is_form(form, head, name)
        || matches!(form, Sexp::List(items) if items.iter().any(|i| contains_form(i, head, name)))
}

#[test]
fn text_script_lists_what_a_simulation_must_supply() {
    let program = program(vec![olive(
        vec![where_clause(binary(BinaryOp::Greater, var("lane"), var("limit")))],
        submit(var("name"), var("size")),
    )]);
    let compiled = compile_text(&program, &registry()).unwrap();
    assert!(compiled.script().starts_with("; olive script over `run`"));
    let forms = sexp::read_all(compiled.script()).unwrap();
    assert!(forms.iter().any(|f| is_form(f, "define", "olive:0")));
    assert!(forms.iter().any(|f| contains_form(f, "constant", "limit")));

    let bindings: Vec<(String, String)> = compiled
        .fake_bindings()
        .into_iter()
        .map(|b| (b.name, b.descriptor))
        .collect();
    let expected = [
        ("files", "ao2bytes$ipath$p"),
        ("lane", "i"),
        ("name", "s"),
        ("result", "u2NONE$t0SOME$t1i"),
        ("size", "i"),
        ("started", "d"),
        ("status", "u3DONE$t0FAILED$t0RUNNING$t0"),
        ("tags", "as"),
        ("limit", "i"),
    ];
    assert_eq!(
        bindings,
        expected
            .iter()
            .map(|(n, d)| (n.to_string(), d.to_string()))
            .collect::<Vec<_>>()
    );
}

#[test]
fn text_scripts_load_back() {
    let program = program(vec![lifted_length()]);
    let compiled = compile_text(&program, &registry()).unwrap();
    let reloaded = olive_codegen::TextProgram::from_script(
        compiled.script().to_string(),
        compiled.meta().clone(),
    )
    .unwrap();
    let run = |p: &dyn OliveProgram| {
        let mut sink = RecordingSink::new();
        p.run(&context(), &input(), &mut sink).unwrap();
        sink.events
    };
    assert_eq!(run(&compiled), run(&reloaded));
}

// ── Grouping equality ──────────────────────────────────────────────────

fn grouped() -> &'static [Box<dyn OliveProgram>] {
    static PROGRAMS: OnceLock<Vec<Box<dyn OliveProgram>>> = OnceLock::new();
    PROGRAMS.get_or_init(|| {
        let program = program(vec![olive(
            vec![group_clause(
                vec!["name", "lane"],
                vec![("total", collect_sum(var("size")))],
            )],
            submit(var("name"), var("total")),
        )]);
        BACKENDS.iter().map(|&b| build(&program, b)).collect()
    })
}

/// The group stage's equality and hasher closures.
fn group_closures(compiled: &dyn OliveProgram) -> (Value, Value) {
    let closures = compiled.setup(&context(), 0).unwrap();
    let StagePlan::Group {
        equality, hasher, ..
    } = &compiled.meta().pipelines[0].plan.stages[0]
    else {
        panic!("expected a group stage");
    };
    (closures[*equality].clone(), closures[*hasher].clone())
}

proptest! {
    #[test]
    fn group_equality_ignores_collected_fields(
        a in ("[a-c]", 0i64..3, any::<i64>()),
        b in ("[a-c]", 0i64..3, any::<i64>()),
    ) {
        let record = |(name, lane, total): &(String, i64, i64)| {
            Value::tuple(vec![Value::str(name), Value::Int(*lane), Value::Int(*total)])
        };
        let (ra, rb) = (record(&a), record(&b));
        let same_key = a.0 == b.0 && a.1 == b.1;
        let mut hashes = Vec::new();
        for compiled in grouped() {
            let (equality, hasher) = group_closures(compiled.as_ref());
            let equal = equality.call(&[ra.clone(), rb.clone()]).unwrap().as_bool().unwrap();
            prop_assert_eq!(equal, same_key);
            let ha = hasher.call(&[ra.clone()]).unwrap().as_int().unwrap();
            let hb = hasher.call(&[rb.clone()]).unwrap().as_int().unwrap();
            if equal {
                prop_assert_eq!(ha, hb);
            }
            hashes.push(ha);
        }
        // Both backends hash the same way.
        prop_assert_eq!(hashes[0], hashes[1]);
    }
}
