//! What a successful compile hands back.
//!
//! Both backends produce an [`OliveProgram`]. The parts that do not depend
//! on how code was generated (the pipeline plans, exports, services) live in
//! [`ProgramMeta`]; a backend only has to build each olive's closures and
//! call exported functions.

use std::fmt;
use std::str::FromStr;

use olive_rt::{execute, ActionSink, InputProvider, PipelinePlan, RunStats, RuntimeContext, RuntimeError, Value};
use olive_typeck::ir::Layout;
use olive_typeck::Type;
use serde::Serialize;
use tracing::info_span;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// Instructions executed by the stack machine.
    #[default]
    Stack,
    /// An s-expression script run by the embedded evaluator.
    Text,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::Stack => write!(f, "stack"),
            BackendKind::Text => write!(f, "text"),
        }
    }
}

impl FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "stack" => Ok(BackendKind::Stack),
            "text" => Ok(BackendKind::Text),
            other => Err(format!("unknown backend `{other}`, expected `stack` or `text`")),
        }
    }
}

/// An exported program function.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Export {
    pub name: String,
    #[serde(serialize_with = "serialize_parameters")]
    pub parameters: Vec<(String, Type)>,
    #[serde(serialize_with = "serialize_type")]
    pub return_type: Type,
}

fn serialize_type<S: serde::Serializer>(ty: &Type, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&ty.descriptor())
}

fn serialize_parameters<S: serde::Serializer>(
    parameters: &[(String, Type)],
    s: S,
) -> Result<S::Ok, S::Error> {
    use serde::ser::SerializeSeq;
    let mut seq = s.serialize_seq(Some(parameters.len()))?;
    for (name, ty) in parameters {
        seq.serialize_element(&(name, ty.descriptor()))?;
    }
    seq.end()
}

/// One olive: the function that builds its closures and the plan that
/// uses them.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineMeta {
    pub setup: String,
    pub plan: PipelinePlan,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProgramMeta {
    pub input_format: String,
    pub input_layout: Layout,
    pub pipelines: Vec<PipelineMeta>,
    pub exports: Vec<Export>,
    /// Sorted.
    pub required_services: Vec<String>,
    /// Registry constants the program reads.
    pub constants: Vec<(String, Type)>,
}

/// A compiled olive program, ready to run any number of times.
pub trait OliveProgram: Send + Sync + fmt::Debug {
    fn backend(&self) -> BackendKind;

    fn meta(&self) -> &ProgramMeta;

    /// Run the setup function of pipeline `index`, building its closures.
    fn setup(&self, context: &RuntimeContext, index: usize) -> Result<Vec<Value>, RuntimeError>;

    /// Call a top-level function by name.
    fn invoke(
        &self,
        context: &RuntimeContext,
        name: &str,
        arguments: &[Value],
    ) -> Result<Value, RuntimeError>;

    /// Run every olive over `input`, in program order. Each run builds fresh
    /// closures, so constants are read as they are now.
    fn run(
        &self,
        context: &RuntimeContext,
        input: &dyn InputProvider,
        sink: &mut dyn ActionSink,
    ) -> Result<Vec<RunStats>, RuntimeError> {
        let _span = info_span!("run", backend = %self.backend()).entered();
        let mut stats = Vec::with_capacity(self.meta().pipelines.len());
        for (index, pipeline) in self.meta().pipelines.iter().enumerate() {
            let closures = self.setup(context, index)?;
            stats.push(execute(&pipeline.plan, &closures, input, sink)?);
        }
        Ok(stats)
    }

    fn required_services(&self) -> &[String] {
        &self.meta().required_services
    }

    fn exports(&self) -> &[Export] {
        &self.meta().exports
    }

    fn call_export(
        &self,
        context: &RuntimeContext,
        name: &str,
        arguments: &[Value],
    ) -> Result<Value, RuntimeError> {
        let export = self
            .exports()
            .iter()
            .find(|e| e.name == name)
            .ok_or_else(|| RuntimeError::UnknownExport(name.to_string()))?;
        if export.parameters.len() != arguments.len() {
            return Err(RuntimeError::Arity {
                name: name.to_string(),
                expected: export.parameters.len(),
                found: arguments.len(),
            });
        }
        self.invoke(context, name, arguments)
    }
}

/// Unpack the closure tuple a setup function returned.
pub(crate) fn closures_of(value: Value) -> Result<Vec<Value>, RuntimeError> {
    Ok(value.as_tuple()?.to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_names_read_back() {
        for kind in [BackendKind::Stack, BackendKind::Text] {
            assert_eq!(kind.to_string().parse::<BackendKind>(), Ok(kind));
        }
        assert!("llvm".parse::<BackendKind>().is_err());
    }

    #[test]
    fn exports_serialize_with_descriptors() {
        let export = Export {
            name: "double".to_string(),
            parameters: vec![("x".to_string(), Type::Integer)],
            return_type: Type::list(Type::Integer),
        };
        let json = serde_json::to_string(&export).unwrap();
        insta::assert_snapshot!(json, @r#"{"name":"double","parameters":[["x","i"]],"return_type":"ai"}"#);
    }
}
