//! Code generation for olive programs.
//!
//! A program that type checked cleanly is lowered by [`lower`] through the
//! [`Backend`] trait into one of two interchangeable artifacts:
//!
//! - [`stack`]: instructions for a small stack machine
//! - [`text`]: an s-expression script run by an embedded evaluator
//!
//! Both compute comparisons, equality and hashes from the same type
//! structure, so a program groups, joins and picks identically on either.
//!
//! ## Pipeline
//!
//! ```text
//! Program -> check -> CheckedProgram -> lower -> Backend -> dyn OliveProgram
//! ```

pub mod artifact;
pub mod backend;
pub mod error;
pub mod lower;
pub mod stack;
pub mod text;

use olive_common::Diagnostic;
use olive_syntax::Program;
use olive_typeck::diagnostics::to_diagnostics;
use olive_typeck::{CheckedProgram, Definitions};
use tracing::{debug, info_span};

pub use artifact::{BackendKind, Export, OliveProgram, PipelineMeta, ProgramMeta};
pub use backend::Backend;
pub use error::InternalError;
pub use stack::{StackBackend, StackProgram};
pub use text::{FakeBinding, TextBackend, TextProgram};

/// Check `program` against `defs` and generate code for it.
///
/// Either every diagnostic the checker found is returned and nothing is
/// generated, or the artifact is returned with no diagnostics.
pub fn compile(
    program: &Program,
    defs: &dyn Definitions,
    backend: BackendKind,
) -> Result<Box<dyn OliveProgram>, Vec<Diagnostic>> {
    let _span = info_span!("compile", %backend).entered();
    let checked = check(program, defs)?;
    compile_checked(&checked, backend).map_err(|e| vec![e.to_diagnostic()])
}

/// Generate code for an already checked program.
pub fn compile_checked(
    program: &CheckedProgram,
    backend: BackendKind,
) -> Result<Box<dyn OliveProgram>, InternalError> {
    debug!(
        olives = program.pipelines.len(),
        functions = program.functions.len(),
        "generating code"
    );
    Ok(match backend {
        BackendKind::Stack => Box::new(lower::lower(StackBackend::new(), program)?),
        BackendKind::Text => Box::new(lower::lower(TextBackend::new(), program)?),
    })
}

/// Compile with the text backend, keeping access to the script.
pub fn compile_text(program: &Program, defs: &dyn Definitions) -> Result<TextProgram, Vec<Diagnostic>> {
    let _span = info_span!("compile", backend = %BackendKind::Text).entered();
    let checked = check(program, defs)?;
    lower::lower(TextBackend::new(), &checked).map_err(|e| vec![e.to_diagnostic()])
}

fn check(program: &Program, defs: &dyn Definitions) -> Result<CheckedProgram, Vec<Diagnostic>> {
    let result = olive_typeck::check(program, defs);
    if !result.errors.is_empty() {
        debug!(errors = result.errors.len(), "program rejected");
        return Err(to_diagnostics(&result.errors));
    }
    result
        .program
        .ok_or_else(|| vec![InternalError::NoProgram.to_diagnostic()])
}
