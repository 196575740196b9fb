//! The text backend.
//!
//! Programs are emitted as an s-expression script (see [`sexp`]) and run
//! by an embedded evaluator. The script is the artifact: it can be printed,
//! stored, and loaded back with [`TextProgram::from_script`].
//!
//! ```text
//! (define "olive:0" ()
//!   (tuple (closure () ($record) (order > (call "compare:i" (get 2 $record) 6)))))
//! ```

mod emit;
mod eval;
pub mod sexp;

use std::fmt;
use std::sync::Arc;

use olive_rt::{RuntimeContext, RuntimeError, Value};
use olive_typeck::tir::CompareOp;
use serde::Serialize;

pub use emit::{literal_sexp, TextBackend};
pub use eval::{Interpreter, Script};

use crate::artifact::{closures_of, BackendKind, OliveProgram, ProgramMeta};
use crate::error::InternalError;

const OPERATORS: &[(CompareOp, &str)] = &[
    (CompareOp::Equal, "="),
    (CompareOp::NotEqual, "!="),
    (CompareOp::Less, "<"),
    (CompareOp::LessEqual, "<="),
    (CompareOp::Greater, ">"),
    (CompareOp::GreaterEqual, ">="),
];

pub(crate) fn op_symbol(op: CompareOp) -> &'static str {
    OPERATORS
        .iter()
        .find(|(o, _)| *o == op)
        .map(|(_, s)| *s)
        .unwrap_or("=")
}

pub(crate) fn op_from_symbol(symbol: &str) -> Option<CompareOp> {
    OPERATORS.iter().find(|(_, s)| *s == symbol).map(|(o, _)| *o)
}

/// A name a simulation of the script has to supply a value for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FakeBinding {
    pub name: String,
    /// Type descriptor of the value.
    pub descriptor: String,
}

pub struct TextProgram {
    text: String,
    script: Arc<Script>,
    meta: ProgramMeta,
}

impl TextProgram {
    /// Compile script text produced by this backend.
    pub fn from_script(text: String, meta: ProgramMeta) -> Result<Self, InternalError> {
        let forms = sexp::read_all(&text).map_err(InternalError::Script)?;
        let script = Script::compile(&forms).map_err(InternalError::Script)?;
        Ok(TextProgram {
            text,
            script: Arc::new(script),
            meta,
        })
    }

    pub fn script(&self) -> &str {
        &self.text
    }

    /// Input fields, then constants, each once.
    pub fn fake_bindings(&self) -> Vec<FakeBinding> {
        let mut bindings: Vec<FakeBinding> = Vec::new();
        for (name, ty) in self.meta.input_layout.iter().chain(&self.meta.constants) {
            if bindings.iter().any(|b| &b.name == name) {
                continue;
            }
            bindings.push(FakeBinding {
                name: name.clone(),
                descriptor: ty.descriptor(),
            });
        }
        bindings
    }

    fn interpreter(&self, context: &RuntimeContext) -> Interpreter {
        Interpreter::new(Arc::clone(&self.script), context.clone())
    }

    fn function(&self, name: &str) -> Result<usize, RuntimeError> {
        self.script
            .function(name)
            .ok_or_else(|| RuntimeError::malformed(format!("no function `{name}`")))
    }
}

impl fmt::Debug for TextProgram {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TextProgram")
            .field("bytes", &self.text.len())
            .field("pipelines", &self.meta.pipelines.len())
            .finish()
    }
}

impl OliveProgram for TextProgram {
    fn backend(&self) -> BackendKind {
        BackendKind::Text
    }

    fn meta(&self) -> &ProgramMeta {
        &self.meta
    }

    fn setup(&self, context: &RuntimeContext, index: usize) -> Result<Vec<Value>, RuntimeError> {
        let pipeline = self
            .meta
            .pipelines
            .get(index)
            .ok_or_else(|| RuntimeError::malformed(format!("no olive {index}")))?;
        let id = self.function(&pipeline.setup)?;
        closures_of(self.interpreter(context).invoke(id, &[], &[])?)
    }

    fn invoke(
        &self,
        context: &RuntimeContext,
        name: &str,
        arguments: &[Value],
    ) -> Result<Value, RuntimeError> {
        let id = self.function(name)?;
        self.interpreter(context).invoke(id, &[], arguments)
    }
}
