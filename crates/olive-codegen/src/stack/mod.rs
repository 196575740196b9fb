//! The stack-machine backend.
//!
//! Functions compile to flat instruction lists over a value stack and a
//! vector of local slots. Closures capture by value into their first slots.
//! Comparison and hashing are driven by interned type [`Shape`]s rather
//! than generated code.

mod emit;
mod instr;
mod vm;

use std::fmt;
use std::sync::Arc;

use olive_rt::{RuntimeContext, RuntimeError, Value};

pub use emit::{literal_value, StackBackend};
pub use instr::{Function, Instr, Module, Shape};
pub use vm::Machine;

use crate::artifact::{closures_of, BackendKind, OliveProgram, ProgramMeta};

pub struct StackProgram {
    module: Arc<Module>,
    meta: ProgramMeta,
}

impl StackProgram {
    pub fn new(module: Module, meta: ProgramMeta) -> Self {
        StackProgram {
            module: Arc::new(module),
            meta,
        }
    }

    pub fn module(&self) -> &Module {
        &self.module
    }

    fn machine(&self, context: &RuntimeContext) -> Machine {
        Machine::new(Arc::clone(&self.module), context.clone())
    }

    fn function(&self, name: &str) -> Result<usize, RuntimeError> {
        self.module
            .names
            .get(name)
            .copied()
            .ok_or_else(|| RuntimeError::malformed(format!("no function `{name}`")))
    }
}

impl fmt::Debug for StackProgram {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StackProgram")
            .field("functions", &self.module.functions.len())
            .field("pipelines", &self.meta.pipelines.len())
            .finish()
    }
}

impl OliveProgram for StackProgram {
    fn backend(&self) -> BackendKind {
        BackendKind::Stack
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
        closures_of(self.machine(context).invoke(id, &[], &[])?)
    }

    fn invoke(
        &self,
        context: &RuntimeContext,
        name: &str,
        arguments: &[Value],
    ) -> Result<Value, RuntimeError> {
        let id = self.function(name)?;
        self.machine(context).invoke(id, &[], arguments)
    }
}
