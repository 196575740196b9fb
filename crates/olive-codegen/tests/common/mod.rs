//! Registry, input and runners shared by the integration suites.

#![allow(dead_code)]

use olive_codegen::{compile, BackendKind, OliveProgram};
use olive_rt::{Event, MemoryInput, RecordingSink, RuntimeContext, Value};
use olive_syntax::{DefineNode, FunctionNode, OliveNode, Program};
use olive_typeck::definitions::{
    ActionDefinition, ConstantDefinition, FunctionDefinition, InputField, InputFormatDefinition,
    Parameter, RefillerDefinition, SignatureDefinition, SignatureKind, StaticDefinitions,
};
use olive_typeck::Type;
use serde_json::json;

pub const BACKENDS: [BackendKind; 2] = [BackendKind::Stack, BackendKind::Text];

pub fn ty(descriptor: &str) -> Type {
    Type::parse_descriptor(descriptor).unwrap()
}

fn field(name: &str, descriptor: &str, signable: bool) -> InputField {
    InputField {
        name: name.to_string(),
        ty: ty(descriptor),
        signable,
    }
}

fn parameter(name: &str, descriptor: &str, required: bool) -> Parameter {
    Parameter {
        name: name.to_string(),
        ty: ty(descriptor),
        required,
    }
}

/// `run` records: a named job on a lane with some files.
pub fn registry() -> StaticDefinitions {
    let mut defs = StaticDefinitions::new();
    defs.add_format(InputFormatDefinition {
        name: "run".to_string(),
        fields: vec![
            field("name", "s", true),
            field("lane", "i", true),
            field("size", "i", false),
            field("files", "ao2bytes$ipath$p", false),
            field("tags", "as", false),
            field("status", "u3DONE$t0FAILED$t0RUNNING$t0", false),
            field("result", "u2NONE$t0SOME$t1i", false),
            field("started", "d", false),
        ],
    })
    .add_format(InputFormatDefinition {
        name: "lane_info".to_string(),
        fields: vec![field("id", "i", false), field("owner", "s", false)],
    })
    .add_function(FunctionDefinition {
        name: "string_length".to_string(),
        parameters: vec![Type::String],
        return_type: Type::Integer,
        services: vec!["strings".to_string()],
    })
    .add_action(ActionDefinition {
        name: "submit".to_string(),
        parameters: vec![
            parameter("name", "s", true),
            parameter("size", "i", true),
            parameter("note", "s", false),
        ],
        services: vec!["scheduler".to_string()],
    })
    .add_refiller(RefillerDefinition {
        name: "store".to_string(),
        parameters: vec![parameter("key", "s", true), parameter("total", "i", true)],
        services: Vec::new(),
    })
    .add_constant(ConstantDefinition {
        name: "limit".to_string(),
        ty: Type::Integer,
    })
    .add_signature(SignatureDefinition {
        name: "sig".to_string(),
        kind: SignatureKind::Sha256,
    })
    .add_signature(SignatureDefinition {
        name: "signed_names".to_string(),
        kind: SignatureKind::Names,
    });
    defs
}

pub fn program(olives: Vec<OliveNode>) -> Program {
    with_functions(Vec::new(), olives)
}

pub fn with_functions(functions: Vec<FunctionNode>, olives: Vec<OliveNode>) -> Program {
    Program {
        input: "run".to_string(),
        functions,
        definitions: Vec::new(),
        olives,
    }
}

pub fn with_definitions(definitions: Vec<DefineNode>, olives: Vec<OliveNode>) -> Program {
    Program {
        definitions,
        ..program(olives)
    }
}

pub fn build(program: &Program, backend: BackendKind) -> Box<dyn OliveProgram> {
    match compile(program, &registry(), backend) {
        Ok(compiled) => compiled,
        Err(diagnostics) => panic!("{backend} rejected the program: {diagnostics:?}"),
    }
}

pub fn context() -> RuntimeContext {
    let context = RuntimeContext::with_builtins();
    context.set_constant("limit", Value::Int(1));
    context
}

/// Five runs over three lanes, and owners for two of the lanes.
pub fn input() -> MemoryInput {
    let run_layout: Vec<(String, Type)> = registry_layout(&[
        ("files", "ao2bytes$ipath$p"),
        ("lane", "i"),
        ("name", "s"),
        ("result", "u2NONE$t0SOME$t1i"),
        ("size", "i"),
        ("started", "d"),
        ("status", "u3DONE$t0FAILED$t0RUNNING$t0"),
        ("tags", "as"),
    ]);
    let runs = [
        json!({
            "name": "build", "lane": 1, "size": 10, "started": 100,
            "files": [{"bytes": 3, "path": "/a/x"}, {"bytes": 4, "path": "/a/y"}],
            "tags": ["fast", "ci"],
            "status": {"type": "DONE", "contents": []},
            "result": {"type": "SOME", "contents": [7]},
        }),
        json!({
            "name": "test", "lane": 2, "size": 5, "started": 300,
            "files": [],
            "tags": ["slow"],
            "status": {"type": "FAILED", "contents": []},
            "result": {"type": "NONE", "contents": []},
        }),
        json!({
            "name": "build", "lane": 1, "size": 7, "started": 200,
            "files": [{"bytes": 9, "path": "/b/z"}],
            "tags": [],
            "status": {"type": "RUNNING", "contents": []},
            "result": {"type": "SOME", "contents": [2]},
        }),
        json!({
            "name": "lint", "lane": 3, "size": 1, "started": 50,
            "files": [],
            "tags": ["ci"],
            "status": {"type": "DONE", "contents": []},
            "result": {"type": "NONE", "contents": []},
        }),
        json!({
            "name": "test", "lane": 2, "size": 8, "started": 400,
            "files": [{"bytes": 1, "path": "/c"}],
            "tags": ["ci", "slow"],
            "status": {"type": "DONE", "contents": []},
            "result": {"type": "SOME", "contents": [11]},
        }),
    ];
    let lanes = [
        json!({"id": 1, "owner": "ann"}),
        json!({"id": 2, "owner": "bo"}),
    ];
    let mut input = MemoryInput::new();
    input.insert_json("run", &run_layout, &runs).unwrap();
    input
        .insert_json("lane_info", &registry_layout(&[("id", "i"), ("owner", "s")]), &lanes)
        .unwrap();
    input
}

fn registry_layout(fields: &[(&str, &str)]) -> Vec<(String, Type)> {
    fields
        .iter()
        .map(|(name, descriptor)| (name.to_string(), ty(descriptor)))
        .collect()
}

/// Run `program` on one backend and return what it did.
pub fn events(program: &Program, backend: BackendKind) -> Vec<Event> {
    let compiled = build(program, backend);
    let mut sink = RecordingSink::new();
    compiled.run(&context(), &input(), &mut sink).unwrap();
    sink.events
}

/// Run `program` on every backend, check they agree, and return the events.
pub fn agreed_events(program: &Program) -> Vec<Event> {
    let stack = events(program, BackendKind::Stack);
    let text = events(program, BackendKind::Text);
    assert_eq!(stack, text, "backends disagree");
    stack
}

/// `(name, size, note)` of every `submit` action.
pub fn submissions(events: &[Event]) -> Vec<(String, i64, Option<String>)> {
    events
        .iter()
        .filter_map(|e| match e {
            Event::Action { action, arguments } if action == "submit" => Some(arguments),
            _ => None,
        })
        .map(|arguments| {
            let get = |name: &str| arguments.iter().find(|(n, _)| n == name).map(|(_, v)| v);
            (
                get("name").unwrap().as_str().unwrap().to_string(),
                get("size").unwrap().as_int().unwrap(),
                get("note").and_then(|v| v.as_str().ok()).map(str::to_string),
            )
        })
        .collect()
}
