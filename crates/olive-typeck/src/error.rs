//! Compile errors produced by resolution and type checking.
//!
//! Errors are collected, not thrown: the checker reports each problem through
//! a sink and keeps going, giving the failed node type [`Type::Bad`] so that
//! parents do not report a second, derived error.

use std::fmt;

use olive_common::{Diagnostic, DiagnosticKind, Pos};

use crate::env::Flavour;
use crate::ty::Type;

#[derive(Clone, Debug, PartialEq)]
pub enum CompileError {
    // ── Resolution ─────────────────────────────────────────────────────
    UndefinedVariable {
        name: String,
        pos: Pos,
    },
    DuplicateVariable {
        name: String,
        pos: Pos,
    },
    IllegalShadow {
        name: String,
        existing: Flavour,
        pos: Pos,
    },
    UnusedVariable {
        name: String,
        pos: Pos,
    },
    /// Input format, function, action or refiller missing from the registry.
    UnknownDefinition {
        kind: &'static str,
        name: String,
        pos: Pos,
    },
    UnknownParameter {
        target: String,
        name: String,
        pos: Pos,
    },
    MissingParameter {
        target: String,
        name: String,
        pos: Pos,
    },
    UnusedWildcard {
        pos: Pos,
    },
    OptionalUseOutsideBlock {
        pos: Pos,
    },
    LiftedLocal {
        name: String,
        pos: Pos,
    },
    /// A name used where only a field of the current record makes sense.
    NotStreamVariable {
        name: String,
        pos: Pos,
    },
    RecursiveDefine {
        name: String,
        pos: Pos,
    },
    DuplicateDefine {
        name: String,
        pos: Pos,
    },

    // ── Type ───────────────────────────────────────────────────────────
    Mismatch {
        expected: String,
        found: Type,
        pos: Pos,
    },
    NoSuchField {
        field: String,
        pos: Pos,
    },
    TupleIndex {
        index: usize,
        len: usize,
        pos: Pos,
    },
    ArityMismatch {
        name: String,
        expected: usize,
        found: usize,
        pos: Pos,
    },
    Incompatible {
        first: Type,
        second: Type,
        pos: Pos,
    },
    NonExhaustiveMatch {
        missing: Vec<String>,
        pos: Pos,
    },
    MissingElse {
        ty: Type,
        pos: Pos,
    },
    UnknownVariant {
        name: String,
        ty: Type,
        pos: Pos,
    },
    DuplicateCase {
        name: String,
        pos: Pos,
    },
    DuplicateField {
        name: String,
        pos: Pos,
    },
    BadAlgebraicName {
        name: String,
        pos: Pos,
    },
    BadDescriptor {
        descriptor: String,
        message: String,
        pos: Pos,
    },
    InvalidOperator {
        op: String,
        left: Type,
        right: Type,
        pos: Pos,
    },
    InvalidUnary {
        op: String,
        operand: Type,
        pos: Pos,
    },
    NotOrderable {
        ty: Type,
        pos: Pos,
    },
    /// Interpolated values must have a textual form.
    NotConvertible {
        ty: Type,
        pos: Pos,
    },
    BadRegex {
        message: String,
        pos: Pos,
    },
    NoCaptureGroups {
        pos: Pos,
    },
    /// `Tabulate` columns of different lengths.
    RaggedTabulate {
        counts: Vec<usize>,
        pos: Pos,
    },

    // ── Purity ─────────────────────────────────────────────────────────
    SignableAfterTransform {
        name: String,
        pos: Pos,
    },
    SignatureAfterTransform {
        name: String,
        pos: Pos,
    },
    /// `Call` or `Matches` once the stream no longer holds input records.
    CallAfterTransform {
        keyword: &'static str,
        pos: Pos,
    },
}

impl CompileError {
    pub fn pos(&self) -> Pos {
        match self {
            CompileError::UndefinedVariable { pos, .. }
            | CompileError::DuplicateVariable { pos, .. }
            | CompileError::IllegalShadow { pos, .. }
            | CompileError::UnusedVariable { pos, .. }
            | CompileError::UnknownDefinition { pos, .. }
            | CompileError::UnknownParameter { pos, .. }
            | CompileError::MissingParameter { pos, .. }
            | CompileError::UnusedWildcard { pos }
            | CompileError::OptionalUseOutsideBlock { pos }
            | CompileError::LiftedLocal { pos, .. }
            | CompileError::NotStreamVariable { pos, .. }
            | CompileError::RecursiveDefine { pos, .. }
            | CompileError::DuplicateDefine { pos, .. }
            | CompileError::NotConvertible { pos, .. }
            | CompileError::BadRegex { pos, .. }
            | CompileError::NoCaptureGroups { pos }
            | CompileError::RaggedTabulate { pos, .. }
            | CompileError::CallAfterTransform { pos, .. }
            | CompileError::Mismatch { pos, .. }
            | CompileError::NoSuchField { pos, .. }
            | CompileError::TupleIndex { pos, .. }
            | CompileError::ArityMismatch { pos, .. }
            | CompileError::Incompatible { pos, .. }
            | CompileError::NonExhaustiveMatch { pos, .. }
            | CompileError::MissingElse { pos, .. }
            | CompileError::UnknownVariant { pos, .. }
            | CompileError::DuplicateCase { pos, .. }
            | CompileError::DuplicateField { pos, .. }
            | CompileError::BadAlgebraicName { pos, .. }
            | CompileError::BadDescriptor { pos, .. }
            | CompileError::InvalidOperator { pos, .. }
            | CompileError::InvalidUnary { pos, .. }
            | CompileError::NotOrderable { pos, .. }
            | CompileError::SignableAfterTransform { pos, .. }
            | CompileError::SignatureAfterTransform { pos, .. } => *pos,
        }
    }

    pub fn kind(&self) -> DiagnosticKind {
        match self {
            CompileError::UndefinedVariable { .. }
            | CompileError::DuplicateVariable { .. }
            | CompileError::IllegalShadow { .. }
            | CompileError::UnusedVariable { .. }
            | CompileError::UnknownDefinition { .. }
            | CompileError::UnknownParameter { .. }
            | CompileError::MissingParameter { .. }
            | CompileError::UnusedWildcard { .. }
            | CompileError::OptionalUseOutsideBlock { .. }
            | CompileError::LiftedLocal { .. }
            | CompileError::NotStreamVariable { .. }
            | CompileError::RecursiveDefine { .. }
            | CompileError::DuplicateDefine { .. } => DiagnosticKind::Resolution,
            CompileError::SignableAfterTransform { .. }
            | CompileError::SignatureAfterTransform { .. }
            | CompileError::CallAfterTransform { .. } => DiagnosticKind::Purity,
            _ => DiagnosticKind::Type,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            CompileError::UndefinedVariable { .. } => "E0101",
            CompileError::DuplicateVariable { .. } => "E0102",
            CompileError::IllegalShadow { .. } => "E0103",
            CompileError::UnusedVariable { .. } => "E0104",
            CompileError::UnknownDefinition { .. } => "E0105",
            CompileError::UnknownParameter { .. } => "E0106",
            CompileError::MissingParameter { .. } => "E0107",
            CompileError::UnusedWildcard { .. } => "E0108",
            CompileError::OptionalUseOutsideBlock { .. } => "E0109",
            CompileError::LiftedLocal { .. } => "E0110",
            CompileError::NotStreamVariable { .. } => "E0111",
            CompileError::RecursiveDefine { .. } => "E0112",
            CompileError::DuplicateDefine { .. } => "E0113",
            CompileError::Mismatch { .. } => "E0201",
            CompileError::NoSuchField { .. } => "E0202",
            CompileError::TupleIndex { .. } => "E0203",
            CompileError::ArityMismatch { .. } => "E0204",
            CompileError::Incompatible { .. } => "E0205",
            CompileError::NonExhaustiveMatch { .. } => "E0206",
            CompileError::MissingElse { .. } => "E0207",
            CompileError::UnknownVariant { .. } => "E0208",
            CompileError::DuplicateCase { .. } => "E0209",
            CompileError::DuplicateField { .. } => "E0210",
            CompileError::BadAlgebraicName { .. } => "E0211",
            CompileError::BadDescriptor { .. } => "E0212",
            CompileError::InvalidOperator { .. } => "E0213",
            CompileError::InvalidUnary { .. } => "E0214",
            CompileError::NotOrderable { .. } => "E0215",
            CompileError::NotConvertible { .. } => "E0216",
            CompileError::BadRegex { .. } => "E0217",
            CompileError::NoCaptureGroups { .. } => "E0218",
            CompileError::RaggedTabulate { .. } => "E0219",
            CompileError::SignableAfterTransform { .. } => "E0301",
            CompileError::SignatureAfterTransform { .. } => "E0302",
            CompileError::CallAfterTransform { .. } => "E0303",
        }
    }

    pub fn to_diagnostic(&self) -> Diagnostic {
        Diagnostic::new(self.pos(), self.kind(), self.code(), self.to_string())
    }
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompileError::UndefinedVariable { name, .. } => {
                write!(f, "Undefined variable “{name}”")
            }
            CompileError::DuplicateVariable { name, .. } => {
                write!(f, "Variable “{name}” already exists")
            }
            CompileError::IllegalShadow { name, existing, .. } => {
                write!(f, "“{name}” would shadow the {existing} of the same name")
            }
            CompileError::UnusedVariable { name, .. } => {
                write!(f, "Variable “{name}” is never used")
            }
            CompileError::UnknownDefinition { kind, name, .. } => {
                write!(f, "Unknown {kind} “{name}”")
            }
            CompileError::UnknownParameter { target, name, .. } => {
                write!(f, "“{target}” has no parameter “{name}”")
            }
            CompileError::MissingParameter { target, name, .. } => {
                write!(f, "“{target}” requires parameter “{name}”")
            }
            CompileError::UnusedWildcard { .. } => {
                write!(f, "No variables map back to this wildcard")
            }
            CompileError::OptionalUseOutsideBlock { .. } => {
                write!(f, "“?” can only be used inside an optional block")
            }
            CompileError::LiftedLocal { name, .. } => write!(
                f,
                "“{name}” is bound inside the optional block and cannot be used with “?”"
            ),
            CompileError::NotStreamVariable { name, .. } => {
                write!(f, "“{name}” is not a stream variable")
            }
            CompileError::RecursiveDefine { name, .. } => {
                write!(f, "“Define {name}” includes itself")
            }
            CompileError::DuplicateDefine { name, .. } => {
                write!(f, "Duplicate definition of “Define {name}”")
            }
            CompileError::Mismatch {
                expected, found, ..
            } => write!(f, "Expected {expected}, but got {found}"),
            CompileError::NoSuchField { field, .. } => {
                write!(f, "Field “{field}” is not in object")
            }
            CompileError::TupleIndex { index, len, .. } => {
                write!(f, "Tuple has {len} elements, but element {index} was requested")
            }
            CompileError::ArityMismatch {
                name,
                expected,
                found,
                ..
            } => write!(
                f,
                "“{name}” takes {expected} argument(s), but {found} were given"
            ),
            CompileError::Incompatible { first, second, .. } => {
                write!(f, "Cannot combine {first} and {second}")
            }
            CompileError::NonExhaustiveMatch { missing, .. } => write!(
                f,
                "Match does not handle {}; add the missing cases or a Remainder",
                missing.join(", ")
            ),
            CompileError::MissingElse { ty, .. } => {
                write!(f, "Switch over {ty} requires an Else")
            }
            CompileError::UnknownVariant { name, ty, .. } => {
                write!(f, "{ty} has no variant “{name}”")
            }
            CompileError::DuplicateCase { name, .. } => {
                write!(f, "Case “{name}” is handled more than once")
            }
            CompileError::DuplicateField { name, .. } => {
                write!(f, "Field “{name}” is given more than once")
            }
            CompileError::BadAlgebraicName { name, .. } => {
                write!(f, "Algebraic name “{name}” must be upper case")
            }
            CompileError::BadDescriptor {
                descriptor,
                message,
                ..
            } => write!(f, "Bad type “{descriptor}”: {message}"),
            CompileError::InvalidOperator {
                op, left, right, ..
            } => write!(f, "No operator {op} for {left} and {right}"),
            CompileError::InvalidUnary { op, operand, .. } => {
                write!(f, "No operator {op} for {operand}")
            }
            CompileError::NotOrderable { ty, .. } => {
                write!(f, "{ty} values cannot be ordered")
            }
            CompileError::NotConvertible { ty, .. } => {
                write!(f, "Cannot convert {ty} to string in interpolation")
            }
            CompileError::BadRegex { message, .. } => {
                write!(f, "Bad regular expression: {message}")
            }
            CompileError::NoCaptureGroups { .. } => write!(f, "No capture groups found"),
            CompileError::RaggedTabulate { counts, .. } => write!(
                f,
                "Inconsistent number of items between columns: {}",
                counts
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join(", ")
            ),
            CompileError::SignableAfterTransform { name, .. } => write!(
                f,
                "Cannot declare signable variable “{name}” after the stream has been transformed"
            ),
            CompileError::SignatureAfterTransform { name, .. } => write!(
                f,
                "Signature “{name}” cannot be used after the stream has been transformed"
            ),
            CompileError::CallAfterTransform { keyword, .. } => {
                write!(f, "“{keyword}” clause cannot be applied to a transformed stream")
            }
        }
    }
}

impl std::error::Error for CompileError {}
