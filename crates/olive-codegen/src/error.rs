use olive_common::{Diagnostic, DiagnosticKind, Pos};
use thiserror::Error;

/// The checked program and the code generator disagree.
///
/// Code generation only ever sees programs that checked cleanly, so any of
/// these is a compiler bug. It aborts the compile.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InternalError {
    #[error("no local `{0}` is in scope")]
    UnboundLocal(String),
    #[error("closing scope `{closing}` while `{innermost}` is innermost")]
    ScopeMismatch { closing: String, innermost: String },
    #[error("no function is being generated")]
    NoFunction,
    #[error("stream variable `{0}` read outside a record")]
    NoRecord(String),
    #[error("field `{0}` is not in the record layout")]
    MissingField(String),
    #[error("program function `{0}` called before it was generated")]
    UnknownFunction(String),
    #[error("{what} has unexpected type {ty}")]
    UnexpectedType { what: &'static str, ty: String },
    #[error("the checker returned neither a program nor errors")]
    NoProgram,
    #[error("define `{0}` reached a stage lowering")]
    UnexpandedDefine(String),
    #[error("generated script is malformed: {0}")]
    Script(String),
}

impl InternalError {
    pub fn unexpected(what: &'static str, ty: &olive_typeck::Type) -> Self {
        InternalError::UnexpectedType {
            what,
            ty: ty.to_string(),
        }
    }

    pub fn to_diagnostic(&self) -> Diagnostic {
        Diagnostic::new(
            Pos::default(),
            DiagnosticKind::Internal,
            "E0901",
            self.to_string(),
        )
    }
}
