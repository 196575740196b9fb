//! Checked pipelines: the input to code generation.
//!
//! A [`CheckedProgram`] is produced only when the whole program resolved
//! and type-checked cleanly. Every expression it holds is a [`TypedExpr`]
//! with no [`Type::Bad`] anywhere.
//!
//! ## Record layouts
//!
//! A record travelling between stages is a tuple whose fields follow the
//! stage's [`Layout`]. Stages that only add fields (`Let`, `Require`,
//! `Flatten`, `Join`, `LeftJoin`) append to the end of their input layout;
//! `Group` starts a fresh layout of discriminators followed by collected
//! values.

use std::collections::{BTreeMap, BTreeSet};

use olive_common::Pos;

use crate::definitions::SignatureKind;
use crate::env::Environment;
use crate::purity::PurityState;
use crate::tir::{TypedCollector, TypedExpr};
use crate::ty::Type;

/// Field names and types of a record, in storage order.
pub type Layout = Vec<(String, Type)>;

/// Position of `name` in `layout`.
pub fn field_index(layout: &Layout, name: &str) -> Option<usize> {
    layout.iter().position(|(n, _)| n == name)
}

/// Record produced by `Group`, `LeftJoin` or keyed by `Pick`.
///
/// Structural equality and hashing consider the first
/// `discriminators.len()` fields only.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordShape {
    pub discriminators: Vec<(String, Type)>,
    pub collected: Vec<(String, Type)>,
    /// Whether a collector can leave the record unusable.
    pub ok: bool,
}

impl RecordShape {
    pub fn layout(&self) -> Layout {
        self.discriminators
            .iter()
            .chain(&self.collected)
            .cloned()
            .collect()
    }

    pub fn key_types(&self) -> Vec<Type> {
        self.discriminators.iter().map(|(_, t)| t.clone()).collect()
    }

    /// Descriptor of the key tuple; backends cache generated code by it.
    pub fn descriptor(&self) -> String {
        Type::Tuple(self.key_types()).descriptor()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LetBinding {
    pub name: String,
    pub value: TypedExpr,
    pub signable: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RejectHandler {
    Monitor {
        metric: String,
        help: String,
        labels: Vec<(String, TypedExpr)>,
    },
    Dump {
        dumper: String,
        columns: Vec<TypedExpr>,
    },
}

impl RejectHandler {
    pub fn expressions(&self) -> Vec<&TypedExpr> {
        match self {
            RejectHandler::Monitor { labels, .. } => labels.iter().map(|(_, e)| e).collect(),
            RejectHandler::Dump { columns, .. } => columns.iter().collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FlattenTarget {
    Name(String, Type),
    /// Element fields pulled out by later stages, in name order.
    Wildcard {
        element: BTreeMap<String, Type>,
        used: Vec<String>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum StageKind {
    Where {
        condition: TypedExpr,
    },
    Let {
        bindings: Vec<LetBinding>,
    },
    Require {
        name: String,
        value: TypedExpr,
        handlers: Vec<RejectHandler>,
    },
    Reject {
        condition: TypedExpr,
        handlers: Vec<RejectHandler>,
    },
    Flatten {
        source: TypedExpr,
        target: FlattenTarget,
    },
    Group {
        shape: RecordShape,
        /// Discriminator values, in declared order.
        discriminators: Vec<TypedExpr>,
        collectors: Vec<TypedCollector>,
    },
    Join {
        format: String,
        outer_key: TypedExpr,
        inner_key: TypedExpr,
        key_ty: Type,
        inner_layout: Layout,
    },
    LeftJoin {
        format: String,
        outer_key: TypedExpr,
        inner_key: TypedExpr,
        key_ty: Type,
        inner_layout: Layout,
        shape: RecordShape,
        collectors: Vec<TypedCollector>,
    },
    Pick {
        max: bool,
        score: TypedExpr,
        /// Fields identifying a pick group, in declared order.
        discriminators: Vec<TypedExpr>,
        shape: RecordShape,
    },
    Monitor {
        metric: String,
        help: String,
        labels: Vec<(String, TypedExpr)>,
    },
    Dump {
        dumper: String,
        columns: Vec<TypedExpr>,
    },
    /// Entry into the clauses of a define. The parameters become constants
    /// for every later stage; the define's own stages follow this one.
    Call {
        define: String,
        parameters: Vec<(String, TypedExpr)>,
    },
}

impl StageKind {
    pub fn name(&self) -> &'static str {
        match self {
            StageKind::Where { .. } => "Where",
            StageKind::Let { .. } => "Let",
            StageKind::Require { .. } => "Require",
            StageKind::Reject { .. } => "Reject",
            StageKind::Flatten { .. } => "Flatten",
            StageKind::Group { .. } => "Group",
            StageKind::Join { .. } => "Join",
            StageKind::LeftJoin { .. } => "LeftJoin",
            StageKind::Pick { .. } => "Pick",
            StageKind::Monitor { .. } => "Monitor",
            StageKind::Dump { .. } => "Dump",
            StageKind::Call { .. } => "Call",
        }
    }

    /// Layout of the records this stage emits, given its input layout.
    pub fn output_layout(&self, input: &Layout) -> Layout {
        let mut out = input.clone();
        match self {
            StageKind::Let { bindings } => {
                out.extend(bindings.iter().map(|b| (b.name.clone(), b.value.ty.clone())));
            }
            StageKind::Require { name, value, .. } => {
                let ty = match &value.ty {
                    Type::Optional(inner) => (**inner).clone(),
                    other => other.clone(),
                };
                out.push((name.clone(), ty));
            }
            StageKind::Flatten { target, .. } => match target {
                FlattenTarget::Name(name, ty) => out.push((name.clone(), ty.clone())),
                FlattenTarget::Wildcard { element, used } => {
                    out.extend(
                        used.iter()
                            .filter_map(|n| element.get(n).map(|t| (n.clone(), t.clone()))),
                    );
                }
            },
            StageKind::Group { shape, .. } => out = shape.layout(),
            StageKind::Join { inner_layout, .. } => out.extend(inner_layout.iter().cloned()),
            StageKind::LeftJoin { shape, .. } => out.extend(shape.collected.iter().cloned()),
            StageKind::Where { .. }
            | StageKind::Reject { .. }
            | StageKind::Pick { .. }
            | StageKind::Monitor { .. }
            | StageKind::Dump { .. }
            | StageKind::Call { .. } => {}
        }
        out
    }

    /// Every expression evaluated against the incoming record. For joins
    /// the inner key reads inner records instead.
    pub fn expressions(&self) -> Vec<&TypedExpr> {
        let mut out = Vec::new();
        match self {
            StageKind::Where { condition } => out.push(condition),
            StageKind::Let { bindings } => out.extend(bindings.iter().map(|b| &b.value)),
            StageKind::Require {
                value, handlers, ..
            } => {
                out.push(value);
                out.extend(handlers.iter().flat_map(|h| h.expressions()));
            }
            StageKind::Reject {
                condition,
                handlers,
            } => {
                out.push(condition);
                out.extend(handlers.iter().flat_map(|h| h.expressions()));
            }
            StageKind::Flatten { source, .. } => out.push(source),
            StageKind::Group {
                discriminators,
                collectors,
                ..
            } => {
                out.extend(discriminators);
                out.extend(collectors.iter().flat_map(|c| c.expressions()));
            }
            StageKind::Join {
                outer_key,
                inner_key,
                ..
            } => {
                out.push(outer_key);
                out.push(inner_key);
            }
            StageKind::LeftJoin {
                outer_key,
                inner_key,
                collectors,
                ..
            } => {
                out.push(outer_key);
                out.push(inner_key);
                out.extend(collectors.iter().flat_map(|c| c.expressions()));
            }
            StageKind::Pick {
                score,
                discriminators,
                ..
            } => {
                out.extend(discriminators);
                out.push(score);
            }
            StageKind::Monitor { labels, .. } => out.extend(labels.iter().map(|(_, e)| e)),
            StageKind::Dump { columns, .. } => out.extend(columns),
            StageKind::Call { parameters, .. } => out.extend(parameters.iter().map(|(_, e)| e)),
        }
        out
    }
}

/// Names closures of a stage must capture, with their types.
pub fn captured_names<'a>(expressions: impl IntoIterator<Item = &'a TypedExpr>) -> Vec<(String, Type)> {
    let mut captured = BTreeMap::new();
    for expr in expressions {
        for (name, free) in expr.free_names() {
            if free.flavour.needs_capture() {
                captured.entry(name).or_insert(free.ty);
            }
        }
    }
    captured.into_iter().collect()
}

#[derive(Debug, Clone)]
pub struct Stage {
    pub kind: StageKind,
    pub pos: Pos,
    /// Environment the stage was resolved in.
    pub input: Environment,
    /// Environment handed to the next stage.
    pub output: Environment,
    pub captured: Vec<(String, Type)>,
    pub input_layout: Layout,
    pub output_layout: Layout,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TerminalKind {
    Run { action: String },
    Refill { refiller: String },
    /// Arguments are the labels, then the annotations, then the time to
    /// live in seconds.
    Alert {
        labels: Vec<String>,
        annotations: Vec<String>,
    },
}

#[derive(Debug, Clone)]
pub struct Terminal {
    pub kind: TerminalKind,
    pub pos: Pos,
    /// Arguments sorted by parameter name.
    pub arguments: Vec<(String, TypedExpr)>,
    pub captured: Vec<(String, Type)>,
    pub layout: Layout,
}

impl TerminalKind {
    pub fn target(&self) -> &str {
        match self {
            TerminalKind::Run { action } => action,
            TerminalKind::Refill { refiller } => refiller,
            TerminalKind::Alert { .. } => "Alert",
        }
    }
}

impl Terminal {
    pub fn target(&self) -> &str {
        self.kind.target()
    }
}

#[derive(Debug, Clone)]
pub struct Pipeline {
    pub pos: Pos,
    pub description: Option<String>,
    pub format: String,
    pub stages: Vec<Stage>,
    pub terminal: Terminal,
    /// Raw input fields every signature of this pipeline covers.
    pub signable: BTreeSet<String>,
    /// Purity after each clause, starting from `Pure`.
    pub purity_trace: Vec<PurityState>,
    pub signatures_used: BTreeMap<String, SignatureKind>,
}

impl Pipeline {
    /// Signable fields with their types from the input format layout.
    pub fn signable_fields(&self) -> Layout {
        let input = self
            .stages
            .first()
            .map(|s| &s.input_layout)
            .unwrap_or(&self.terminal.layout);
        input
            .iter()
            .filter(|(name, _)| self.signable.contains(name))
            .cloned()
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CheckedFunction {
    pub name: String,
    pub parameters: Vec<(String, Type)>,
    pub return_type: Type,
    pub body: TypedExpr,
    pub exported: bool,
    pub pos: Pos,
}

#[derive(Debug, Clone)]
pub struct CheckedProgram {
    pub input_format: String,
    /// Layout of raw input records.
    pub input_layout: Layout,
    pub pipelines: Vec<Pipeline>,
    pub functions: Vec<CheckedFunction>,
    pub required_services: BTreeSet<String>,
    /// Registry constants the program reads.
    pub constants: Vec<(String, Type)>,
}

impl CheckedProgram {
    pub fn exports(&self) -> impl Iterator<Item = &CheckedFunction> {
        self.functions.iter().filter(|f| f.exported)
    }
}
