//! Registry and helpers shared by the integration suites.

#![allow(dead_code)]

use olive_syntax::{ExprNode, OliveNode, Program};
use olive_typeck::clause::format_bindings;
use olive_typeck::definitions::{
    ActionDefinition, ConstantDefinition, FunctionDefinition, InputField, InputFormatDefinition,
    Parameter, RefillerDefinition, SignatureDefinition, SignatureKind, StaticDefinitions,
};
use olive_typeck::env::{Binding, Environment, Flavour};
use olive_typeck::infer::ExprChecker;
use olive_typeck::{CompileError, Type, TypeckResult};

use std::sync::Arc;

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

/// Resolve a single expression against a `run` record.
pub fn type_of(node: ExprNode) -> (Type, Vec<CompileError>) {
    let defs = registry();
    let mut errors = Vec::new();
    let ty = {
        let mut sink = |e: CompileError| errors.push(e);
        let mut checker = ExprChecker::new(&defs, &mut sink);
        let format = olive_typeck::Definitions::input_format(&defs, "run").unwrap();
        let env = Environment::root(
            format_bindings(format, true)
                .into_iter()
                .chain([Arc::new(Binding::new("limit", Type::Integer, Flavour::Constant))]),
        );
        checker.check(&env, &node).ty
    };
    (ty, errors)
}

pub fn messages(errors: &[CompileError]) -> Vec<String> {
    errors.iter().map(ToString::to_string).collect()
}

pub fn program(olives: Vec<OliveNode>) -> Program {
    Program {
        input: "run".to_string(),
        functions: Vec::new(),
        definitions: Vec::new(),
        olives,
    }
}

pub fn check(olives: Vec<OliveNode>) -> TypeckResult {
    olive_typeck::check(&program(olives), &registry())
}

pub fn check_ok(olives: Vec<OliveNode>) -> olive_typeck::CheckedProgram {
    let result = check(olives);
    assert!(result.errors.is_empty(), "{:?}", messages(&result.errors));
    result.program.unwrap()
}
