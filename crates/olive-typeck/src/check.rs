//! Whole-program checking.
//!
//! Builds the root environment from the registry, checks program functions
//! in declaration order (each may call the ones before it), checks every
//! define on its own, then checks every olive independently against the
//! same root. Defines are expanded into the olives that call them.

use std::collections::BTreeSet;
use std::sync::Arc;

use olive_common::Pos;
use olive_syntax::{FunctionNode, Program};
use tracing::{debug, info_span};

use crate::clause::{format_bindings, format_layout, Defines, PipelineBuilder};
use crate::definitions::Definitions;
use crate::env::{Binding, Environment, Flavour};
use crate::error::CompileError;
use crate::infer::{ExprChecker, FunctionSignature};
use crate::ir::{CheckedFunction, CheckedProgram};
use crate::ty::Type;

/// Outcome of checking a program: a checked program exactly when there are
/// no errors.
#[derive(Debug)]
pub struct TypeckResult {
    pub program: Option<CheckedProgram>,
    pub errors: Vec<CompileError>,
}

impl TypeckResult {
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }

    /// Render every error against the source it was parsed from.
    pub fn render_errors(&self, source: &str, filename: &str) -> Vec<String> {
        self.errors
            .iter()
            .map(|e| crate::diagnostics::render_diagnostic(e, source, filename))
            .collect()
    }
}

/// Type-check a program against a registry, collecting every error.
pub fn check(program: &Program, defs: &dyn Definitions) -> TypeckResult {
    let mut errors = Vec::new();
    let checked = check_with_sink(program, defs, &mut |e: CompileError| errors.push(e));
    TypeckResult {
        program: checked,
        errors,
    }
}

/// Type-check a program, streaming errors to `sink` as they are found.
pub fn check_with_sink(
    program: &Program,
    defs: &dyn Definitions,
    sink: &mut dyn FnMut(CompileError),
) -> Option<CheckedProgram> {
    let _span = info_span!("typeck", input = %program.input).entered();
    let mut checker = ExprChecker::new(defs, sink);

    let Some(format) = defs.input_format(&program.input) else {
        checker.report(CompileError::UnknownDefinition {
            kind: "input format",
            name: program.input.clone(),
            pos: Pos::default(),
        });
        return None;
    };

    let constants: Vec<Arc<Binding>> = defs
        .constants()
        .into_iter()
        .map(|c| Arc::new(Binding::new(c.name.clone(), c.ty.clone(), Flavour::Constant)))
        .collect();
    let constant_env = Environment::root(constants.iter().cloned());

    let functions: Vec<_> = program
        .functions
        .iter()
        .filter_map(|f| check_function(&mut checker, &constant_env, f))
        .collect();

    let signatures = defs.signatures().into_iter().map(|s| {
        Arc::new(Binding::new(
            s.name.clone(),
            s.kind.result_type(),
            Flavour::StreamSignature,
        ))
    });
    let root = Environment::root(
        constants
            .iter()
            .cloned()
            .chain(format_bindings(format, true))
            .chain(signatures),
    );

    let mut defines = Defines::default();
    for define in &program.definitions {
        if defines.insert(define.name.as_str(), define).is_some() {
            checker.report(CompileError::DuplicateDefine {
                name: define.name.clone(),
                pos: define.pos,
            });
        }
    }
    for define in &program.definitions {
        PipelineBuilder::new(&mut checker, format, root.clone(), &defines).check_define(define);
    }

    let mut pipelines = Vec::new();
    for olive in &program.olives {
        let builder = PipelineBuilder::new(&mut checker, format, root.clone(), &defines);
        if let Some(pipeline) = builder.build(olive) {
            pipelines.push(pipeline);
        }
    }

    let errors = checker.error_count();
    debug!(
        functions = functions.len(),
        pipelines = pipelines.len(),
        errors,
        "checked program"
    );
    if errors > 0 {
        return None;
    }

    let mut required_services: BTreeSet<String> = checker.services().clone();
    required_services.insert(format.name.clone());
    Some(CheckedProgram {
        input_format: format.name.clone(),
        input_layout: format_layout(format),
        pipelines,
        functions,
        required_services,
        constants: constants
            .iter()
            .filter(|c| c.is_read())
            .map(|c| (c.name.clone(), c.ty.clone()))
            .collect(),
    })
}

fn check_function(
    checker: &mut ExprChecker<'_>,
    constants: &Environment,
    node: &FunctionNode,
) -> Option<CheckedFunction> {
    let mut parameters = Vec::new();
    let mut ok = true;
    for parameter in &node.parameters {
        match Type::parse_descriptor(&parameter.ty) {
            Ok(ty) => parameters.push((parameter.name.clone(), ty, node.pos)),
            Err(err) => {
                checker.report(CompileError::BadDescriptor {
                    descriptor: parameter.ty.clone(),
                    message: err.message,
                    pos: node.pos,
                });
                ok = false;
            }
        }
    }
    let declared = match &node.return_type {
        Some(descriptor) => match Type::parse_descriptor(descriptor) {
            Ok(ty) => Some(ty),
            Err(err) => {
                checker.report(CompileError::BadDescriptor {
                    descriptor: descriptor.clone(),
                    message: err.message,
                    pos: node.pos,
                });
                ok = false;
                None
            }
        },
        None => None,
    };

    let count = parameters.len();
    let env = checker.bind_locals(constants, parameters.clone());
    let body = checker.check(&env, &node.body);
    checker.unbind_locals(count);

    let return_type = match declared {
        Some(ty) => {
            ok &= checker.expect(&body, &ty, &ty.name());
            ty
        }
        None => body.ty.clone(),
    };
    ok &= !return_type.contains_bad();

    let parameters: Vec<(String, Type)> = parameters.into_iter().map(|(n, t, _)| (n, t)).collect();
    if ok {
        checker.define_function(
            &node.name,
            FunctionSignature {
                parameters: parameters.iter().map(|(_, t)| t.clone()).collect(),
                return_type: return_type.clone(),
            },
        );
    }
    debug!(function = %node.name, ok, "checked function");
    ok.then(|| CheckedFunction {
        name: node.name.clone(),
        parameters,
        return_type,
        body,
        exported: node.exported,
        pos: node.pos,
    })
}
