//! Plans driven by hand-written closures.

use olive_rt::collect::CollectSpec;
use olive_rt::compare::compare_int;
use olive_rt::hash;
use olive_rt::plan::{CollectorPlan, HandlerPlan, StagePlan, TerminalPlan};
use olive_rt::{execute, Event, MemoryInput, PipelinePlan, RecordingSink, RuntimeError, Value};
use olive_typeck::tir::CollectorKind;

// ── Helpers ────────────────────────────────────────────────────────────

/// `run` records: `{lane, name, size}`.
fn runs() -> MemoryInput {
    let rows = [(1, "a", 10), (2, "b", 5), (1, "c", 7), (3, "d", 1)];
    let mut input = MemoryInput::new();
    input.insert(
        "run",
        rows.iter()
            .map(|(lane, name, size)| {
                Value::tuple(vec![Value::Int(*lane), Value::str(name), Value::Int(*size)])
            })
            .collect(),
    );
    input.insert(
        "lane_info",
        vec![
            Value::tuple(vec![Value::Int(1), Value::str("ann")]),
            Value::tuple(vec![Value::Int(2), Value::str("bo")]),
        ],
    );
    input
}

fn field(index: usize) -> Value {
    Value::native(move |args| Ok(args[0].get(index)?.clone()))
}

fn fields(indices: &'static [usize]) -> Value {
    Value::native(move |args| {
        Ok(Value::tuple(
            indices
                .iter()
                .map(|&i| args[0].get(i).cloned())
                .collect::<Result<_, _>>()?,
        ))
    })
}

fn int_compare() -> Value {
    Value::native(|args| Ok(Value::Int(compare_int(args[0].as_int()?, args[1].as_int()?))))
}

/// Equality over the first field of two records.
fn first_field_equal() -> Value {
    Value::native(|args| Ok(Value::Bool(args[0].get(0)?.as_int()? == args[1].get(0)?.as_int()?)))
}

fn first_field_hash() -> Value {
    Value::native(|args| Ok(Value::Int(hash::hash_int(args[0].get(0)?.as_int()?))))
}

fn int_equal() -> Value {
    Value::native(|args| Ok(Value::Bool(args[0].as_int()? == args[1].as_int()?)))
}

fn int_hash() -> Value {
    Value::native(|args| Ok(Value::Int(hash::hash_int(args[0].as_int()?))))
}

fn run(plan: &PipelinePlan, closures: &[Value]) -> RecordingSink {
    let mut sink = RecordingSink::new();
    execute(plan, closures, &runs(), &mut sink).unwrap();
    sink
}

fn submit(names: &[&str], arguments: usize) -> TerminalPlan {
    TerminalPlan::Run {
        action: "submit".to_string(),
        names: names.iter().map(|n| n.to_string()).collect(),
        arguments,
    }
}

fn actions(sink: &RecordingSink) -> Vec<String> {
    sink.actions()
        .map(|(_, args)| {
            args.iter()
                .map(|(n, v)| format!("{n}={v}"))
                .collect::<Vec<_>>()
                .join(" ")
        })
        .collect()
}

// ── Tests ──────────────────────────────────────────────────────────────

#[test]
fn test_where_and_run() {
    let plan = PipelinePlan {
        description: None,
        format: "run".to_string(),
        stages: vec![StagePlan::Where { condition: 0 }],
        terminal: submit(&["name"], 1),
        closures: 2,
    };
    let closures = [
        Value::native(|args| Ok(Value::Bool(args[0].get(2)?.as_int()? > 6))),
        fields(&[1]),
    ];
    assert_eq!(actions(&run(&plan, &closures)), ["name=\"a\"", "name=\"c\""]);
}

#[test]
fn test_group_sums_in_first_seen_order() {
    let plan = PipelinePlan {
        description: Some("per lane".to_string()),
        format: "run".to_string(),
        stages: vec![StagePlan::Group {
            key: 0,
            equality: 1,
            hasher: 2,
            collectors: vec![CollectorPlan {
                spec: CollectSpec::new(CollectorKind::Sum),
                value: Some(3),
                filters: Vec::new(),
                comparator: None,
                default: None,
                delimiter: None,
            }],
        }],
        terminal: submit(&["lane", "total"], 4),
        closures: 5,
    };
    let closures = [
        fields(&[0]),
        first_field_equal(),
        first_field_hash(),
        field(2),
        fields(&[0, 1]),
    ];
    assert_eq!(
        actions(&run(&plan, &closures)),
        ["lane=1 total=17", "lane=2 total=5", "lane=3 total=1"]
    );
}

#[test]
fn test_group_drops_records_whose_collector_fails() {
    let plan = PipelinePlan {
        description: None,
        format: "run".to_string(),
        stages: vec![StagePlan::Group {
            key: 0,
            equality: 1,
            hasher: 2,
            collectors: vec![CollectorPlan {
                spec: CollectSpec::new(CollectorKind::Max),
                value: Some(3),
                filters: vec![4],
                comparator: Some(5),
                default: None,
                delimiter: None,
            }],
        }],
        terminal: submit(&["lane", "biggest"], 6),
        closures: 7,
    };
    let closures = [
        fields(&[0]),
        first_field_equal(),
        first_field_hash(),
        field(2),
        Value::native(|args| Ok(Value::Bool(args[0].get(2)?.as_int()? > 4))),
        int_compare(),
        fields(&[0, 1]),
    ];
    assert_eq!(
        actions(&run(&plan, &closures)),
        ["lane=1 biggest=10", "lane=2 biggest=5"]
    );
}

#[test]
fn test_join_and_left_join() {
    let join = PipelinePlan {
        description: None,
        format: "run".to_string(),
        stages: vec![StagePlan::Join {
            format: "lane_info".to_string(),
            outer_key: 0,
            inner_key: 1,
            equality: 2,
            hasher: 3,
        }],
        terminal: submit(&["name", "owner"], 4),
        closures: 5,
    };
    let closures = [field(0), field(0), int_equal(), int_hash(), fields(&[1, 4])];
    assert_eq!(
        actions(&run(&join, &closures)),
        ["name=\"a\" owner=\"ann\"", "name=\"b\" owner=\"bo\"", "name=\"c\" owner=\"ann\""]
    );

    let left = PipelinePlan {
        description: None,
        format: "run".to_string(),
        stages: vec![StagePlan::LeftJoin {
            format: "lane_info".to_string(),
            outer_key: 0,
            inner_key: 1,
            equality: 2,
            hasher: 3,
            collectors: vec![CollectorPlan {
                spec: CollectSpec::new(CollectorKind::Count),
                value: None,
                filters: Vec::new(),
                comparator: None,
                default: None,
                delimiter: None,
            }],
        }],
        terminal: submit(&["name", "owners"], 4),
        closures: 5,
    };
    let closures = [field(0), field(0), int_equal(), int_hash(), fields(&[1, 3])];
    assert_eq!(
        actions(&run(&left, &closures)),
        [
            "name=\"a\" owners=1",
            "name=\"b\" owners=1",
            "name=\"c\" owners=1",
            "name=\"d\" owners=0"
        ]
    );
}

#[test]
fn test_pick_keeps_the_best_per_key() {
    let plan = PipelinePlan {
        description: None,
        format: "run".to_string(),
        stages: vec![StagePlan::Pick {
            max: false,
            key: 0,
            equality: 1,
            hasher: 2,
            score: 3,
            comparator: 4,
        }],
        terminal: submit(&["name"], 5),
        closures: 6,
    };
    let closures = [
        fields(&[0]),
        first_field_equal(),
        first_field_hash(),
        field(2),
        int_compare(),
        fields(&[1]),
    ];
    assert_eq!(
        actions(&run(&plan, &closures)),
        ["name=\"c\"", "name=\"b\"", "name=\"d\""]
    );
}

#[test]
fn test_require_runs_handlers_for_empty_values() {
    let plan = PipelinePlan {
        description: None,
        format: "run".to_string(),
        stages: vec![StagePlan::Require {
            value: 0,
            handlers: vec![HandlerPlan::Monitor {
                metric: "missing_owner".to_string(),
                help: "runs without an owner".to_string(),
                labels: vec!["run".to_string()],
                values: 1,
            }],
        }],
        terminal: submit(&["owner"], 2),
        closures: 3,
    };
    let closures = [
        Value::native(|args| {
            Ok(match args[0].get(0)?.as_int()? {
                1 => Value::some(Value::str("ann")),
                _ => Value::none(),
            })
        }),
        fields(&[1]),
        fields(&[3]),
    ];
    let sink = run(&plan, &closures);
    let monitor = |name: &str| Event::Monitor {
        metric: "missing_owner".to_string(),
        labels: vec![("run".to_string(), name.to_string())],
    };
    let owner = || Event::Action {
        action: "submit".to_string(),
        arguments: vec![("owner".to_string(), Value::str("ann"))],
    };
    // Stages run over the whole batch before the terminal fires.
    assert_eq!(
        sink.events,
        vec![monitor("b"), monitor("d"), owner(), owner()]
    );
}

#[test]
fn test_refill_delivers_rows_once() {
    let plan = PipelinePlan {
        description: None,
        format: "run".to_string(),
        stages: vec![StagePlan::Where { condition: 0 }],
        terminal: TerminalPlan::Refill {
            refiller: "store".to_string(),
            names: vec!["key".to_string()],
            arguments: 1,
        },
        closures: 2,
    };
    let closures = [Value::native(|_| Ok(Value::Bool(false))), fields(&[1])];
    let sink = run(&plan, &closures);
    assert_eq!(
        sink.events,
        vec![Event::Refill {
            refiller: "store".to_string(),
            rows: Vec::new(),
        }]
    );
}

#[test]
fn test_closure_count_must_match() {
    let plan = PipelinePlan {
        description: None,
        format: "run".to_string(),
        stages: Vec::new(),
        terminal: submit(&[], 0),
        closures: 1,
    };
    let mut sink = RecordingSink::new();
    let err = execute(&plan, &[], &runs(), &mut sink).unwrap_err();
    assert!(matches!(err, RuntimeError::Malformed(_)));
}
