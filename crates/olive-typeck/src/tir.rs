//! Typed expression tree.
//!
//! Resolution turns each [`olive_syntax::ExprNode`] into a [`TypedExpr`]: a
//! node whose names are resolved to flavours, whose operators are resolved
//! to the operand types they apply to, and which carries its [`Type`]. Code
//! generation only ever sees this tree.

use std::collections::BTreeMap;

use olive_common::Pos;

use crate::definitions::SignatureKind;
use crate::env::Flavour;
use crate::ty::Type;

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Boolean(bool),
    Integer(i64),
    Float(f64),
    String(String),
    Date(i64),
    Path(String),
    Json(serde_json::Value),
}

/// Arithmetic resolved against operand types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArithOp {
    AddInt,
    SubInt,
    MulInt,
    DivInt,
    ModInt,
    AddFloat,
    SubFloat,
    MulFloat,
    DivFloat,
    Concat,
    /// Date plus integer seconds.
    DateAdd,
    /// Date minus integer seconds.
    DateSub,
    /// Seconds between two dates.
    DateDiff,
}

/// Comparison of two operands of the same type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompareOp {
    Equal,
    NotEqual,
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallTarget {
    /// Registry function with a native implementation.
    Native,
    /// Function defined by the program.
    Program,
}

/// Reductions available to `Group`, `LeftJoin` and `For`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CollectorKind {
    Count,
    List,
    Flatten,
    Sum,
    First,
    Max,
    Min,
    Univalued,
    LexicalConcat,
    Any,
    All,
}

impl CollectorKind {
    pub fn name(self) -> &'static str {
        match self {
            CollectorKind::Count => "count",
            CollectorKind::List => "list",
            CollectorKind::Flatten => "flatten",
            CollectorKind::Sum => "sum",
            CollectorKind::First => "first",
            CollectorKind::Max => "max",
            CollectorKind::Min => "min",
            CollectorKind::Univalued => "univalued",
            CollectorKind::LexicalConcat => "lexical-concat",
            CollectorKind::Any => "any",
            CollectorKind::All => "all",
        }
    }

    pub fn from_name(name: &str) -> Option<CollectorKind> {
        Some(match name {
            "count" => CollectorKind::Count,
            "list" => CollectorKind::List,
            "flatten" => CollectorKind::Flatten,
            "sum" => CollectorKind::Sum,
            "first" => CollectorKind::First,
            "max" => CollectorKind::Max,
            "min" => CollectorKind::Min,
            "univalued" => CollectorKind::Univalued,
            "lexical-concat" => CollectorKind::LexicalConcat,
            "any" => CollectorKind::Any,
            "all" => CollectorKind::All,
            _ => return None,
        })
    }

    /// Collectors that may find nothing to return.
    pub fn may_be_empty(self) -> bool {
        matches!(
            self,
            CollectorKind::First | CollectorKind::Max | CollectorKind::Min | CollectorKind::Univalued
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TypedCollector {
    pub kind: CollectorKind,
    /// Per-element value; absent only for `Count`.
    pub value: Option<Box<TypedExpr>>,
    /// Conditions from `Where` wrappers, all of which must hold.
    pub filters: Vec<TypedExpr>,
    pub default: Option<Box<TypedExpr>>,
    pub delimiter: Option<Box<TypedExpr>>,
    /// Type of `value`.
    pub value_ty: Type,
    /// Type of the collected result.
    pub ty: Type,
    /// Wrap the result in an optional instead of failing when empty.
    pub optional_result: bool,
}

impl TypedCollector {
    /// Whether an empty input makes the enclosing record not ok.
    pub fn can_fail(&self) -> bool {
        self.kind.may_be_empty() && self.default.is_none() && !self.optional_result
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MatchArm {
    pub variant: String,
    /// (payload index, local name) pairs.
    pub bindings: Vec<(usize, String, Type)>,
    pub body: TypedExpr,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Remainder {
    pub name: Option<String>,
    pub body: Box<TypedExpr>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TypedExpr {
    pub kind: ExprKind,
    pub ty: Type,
    pub pos: Pos,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    Literal(Literal),
    Variable {
        name: String,
        flavour: Flavour,
    },
    Signature {
        name: String,
        kind: SignatureKind,
    },
    Tuple(Vec<TypedExpr>),
    TupleGet {
        tuple: Box<TypedExpr>,
        index: usize,
    },
    /// Fields sorted by name.
    Object(Vec<(String, TypedExpr)>),
    Field {
        object: Box<TypedExpr>,
        name: String,
        /// Position among the sorted fields.
        index: usize,
    },
    List(Vec<TypedExpr>),
    Dictionary(Vec<(TypedExpr, TypedExpr)>),
    DictionaryGet {
        dictionary: Box<TypedExpr>,
        key: Box<TypedExpr>,
    },
    /// Payload in storage order (objects by sorted field name).
    Algebraic {
        tag: String,
        payload: Vec<TypedExpr>,
    },
    Arithmetic {
        op: ArithOp,
        left: Box<TypedExpr>,
        right: Box<TypedExpr>,
    },
    Negate(Box<TypedExpr>),
    Not(Box<TypedExpr>),
    Compare {
        op: CompareOp,
        operand_ty: Type,
        left: Box<TypedExpr>,
        right: Box<TypedExpr>,
    },
    /// Short-circuit `&&` (`and == true`) or `||`.
    Logical {
        and: bool,
        left: Box<TypedExpr>,
        right: Box<TypedExpr>,
    },
    If {
        condition: Box<TypedExpr>,
        then: Box<TypedExpr>,
        otherwise: Box<TypedExpr>,
    },
    Switch {
        scrutinee: Box<TypedExpr>,
        cases: Vec<(TypedExpr, TypedExpr)>,
        otherwise: Option<Box<TypedExpr>>,
    },
    Match {
        scrutinee: Box<TypedExpr>,
        arms: Vec<MatchArm>,
        remainder: Option<Remainder>,
    },
    /// Optional block: evaluates each capture, and only if all are present
    /// binds their contents and evaluates the body.
    Lift {
        captures: Vec<(String, TypedExpr)>,
        body: Box<TypedExpr>,
    },
    OptionalEmpty,
    Default {
        value: Box<TypedExpr>,
        fallback: Box<TypedExpr>,
    },
    Call {
        function: String,
        target: CallTarget,
        arguments: Vec<TypedExpr>,
    },
    For {
        name: String,
        element_ty: Type,
        source: Box<TypedExpr>,
        collector: Box<TypedCollector>,
    },
    /// Pieces joined into one string; non-string pieces are converted.
    Interpolation(Vec<TypedExpr>),
    /// Capture groups of `pattern` when it matches all of `value`.
    RegexBind {
        value: Box<TypedExpr>,
        pattern: String,
        groups: usize,
    },
}

/// A name an expression reads without binding it itself.
#[derive(Debug, Clone, PartialEq)]
pub struct FreeName {
    pub flavour: Flavour,
    pub ty: Type,
}

impl TypedExpr {
    pub fn new(kind: ExprKind, ty: Type, pos: Pos) -> Self {
        Self { kind, ty, pos }
    }

    pub fn bad(pos: Pos) -> Self {
        Self::new(ExprKind::OptionalEmpty, Type::Bad, pos)
    }

    /// Every free name, with its flavour.
    pub fn free_names(&self) -> BTreeMap<String, FreeName> {
        let mut out = BTreeMap::new();
        self.collect_free(&mut Vec::new(), &mut out);
        out
    }

    /// Whether the expression reads the current record, directly or through
    /// a signature.
    pub fn reads_stream(&self) -> bool {
        self.free_names().values().any(|n| n.flavour.is_stream())
    }

    /// Signatures referenced anywhere inside.
    pub fn signatures(&self) -> BTreeMap<String, SignatureKind> {
        let mut out = BTreeMap::new();
        self.walk(&mut |e| {
            if let ExprKind::Signature { name, kind } = &e.kind {
                out.insert(name.clone(), *kind);
            }
        });
        out
    }

    /// Pre-order traversal of this node and every sub-expression.
    pub fn walk(&self, f: &mut dyn FnMut(&TypedExpr)) {
        f(self);
        for child in self.children() {
            child.walk(f);
        }
    }

    fn children(&self) -> Vec<&TypedExpr> {
        match &self.kind {
            ExprKind::Literal(_)
            | ExprKind::Variable { .. }
            | ExprKind::Signature { .. }
            | ExprKind::OptionalEmpty => Vec::new(),
            ExprKind::Tuple(items) | ExprKind::List(items) | ExprKind::Interpolation(items) => {
                items.iter().collect()
            }
            ExprKind::Algebraic { payload, .. } => payload.iter().collect(),
            ExprKind::Call { arguments, .. } => arguments.iter().collect(),
            ExprKind::TupleGet { tuple: inner, .. }
            | ExprKind::Field { object: inner, .. }
            | ExprKind::Negate(inner)
            | ExprKind::Not(inner)
            | ExprKind::RegexBind { value: inner, .. } => vec![inner.as_ref()],
            ExprKind::Object(fields) => fields.iter().map(|(_, e)| e).collect(),
            ExprKind::Dictionary(entries) => entries.iter().flat_map(|(k, v)| [k, v]).collect(),
            ExprKind::DictionaryGet { dictionary, key } => vec![dictionary.as_ref(), key.as_ref()],
            ExprKind::Arithmetic { left, right, .. }
            | ExprKind::Compare { left, right, .. }
            | ExprKind::Logical { left, right, .. } => vec![left.as_ref(), right.as_ref()],
            ExprKind::Default { value, fallback } => vec![value.as_ref(), fallback.as_ref()],
            ExprKind::If {
                condition,
                then,
                otherwise,
            } => vec![condition.as_ref(), then.as_ref(), otherwise.as_ref()],
            ExprKind::Switch {
                scrutinee,
                cases,
                otherwise,
            } => {
                let mut out = vec![scrutinee.as_ref()];
                out.extend(cases.iter().flat_map(|(k, v)| [k, v]));
                out.extend(otherwise.as_deref());
                out
            }
            ExprKind::Match {
                scrutinee,
                arms,
                remainder,
            } => {
                let mut out = vec![scrutinee.as_ref()];
                out.extend(arms.iter().map(|a| &a.body));
                out.extend(remainder.as_ref().map(|r| r.body.as_ref()));
                out
            }
            ExprKind::Lift { captures, body } => {
                let mut out: Vec<&TypedExpr> = captures.iter().map(|(_, e)| e).collect();
                out.push(body);
                out
            }
            ExprKind::For {
                source, collector, ..
            } => {
                let mut out = vec![source.as_ref()];
                out.extend(collector.expressions());
                out
            }
        }
    }

    fn collect_free(&self, bound: &mut Vec<String>, out: &mut BTreeMap<String, FreeName>) {
        match &self.kind {
            ExprKind::Variable { name, flavour } => {
                if !bound.contains(name) {
                    out.entry(name.clone()).or_insert(FreeName {
                        flavour: *flavour,
                        ty: self.ty.clone(),
                    });
                }
            }
            ExprKind::Signature { name, .. } => {
                out.entry(name.clone()).or_insert(FreeName {
                    flavour: Flavour::StreamSignature,
                    ty: self.ty.clone(),
                });
            }
            ExprKind::Match {
                scrutinee,
                arms,
                remainder,
            } => {
                scrutinee.collect_free(bound, out);
                for arm in arms {
                    let depth = bound.len();
                    bound.extend(arm.bindings.iter().map(|(_, name, _)| name.clone()));
                    arm.body.collect_free(bound, out);
                    bound.truncate(depth);
                }
                if let Some(remainder) = remainder {
                    let depth = bound.len();
                    bound.extend(remainder.name.iter().cloned());
                    remainder.body.collect_free(bound, out);
                    bound.truncate(depth);
                }
            }
            ExprKind::Lift { captures, body } => {
                for (_, capture) in captures {
                    capture.collect_free(bound, out);
                }
                let depth = bound.len();
                bound.extend(captures.iter().map(|(name, _)| name.clone()));
                body.collect_free(bound, out);
                bound.truncate(depth);
            }
            ExprKind::For {
                name,
                source,
                collector,
                ..
            } => {
                source.collect_free(bound, out);
                // Defaults and delimiters are evaluated outside the loop.
                for e in collector.outer_expressions() {
                    e.collect_free(bound, out);
                }
                let depth = bound.len();
                bound.push(name.clone());
                for e in collector.element_expressions() {
                    e.collect_free(bound, out);
                }
                bound.truncate(depth);
            }
            _ => {
                for child in self.children() {
                    child.collect_free(bound, out);
                }
            }
        }
    }
}

impl TypedCollector {
    /// Expressions evaluated once per element.
    pub fn element_expressions(&self) -> Vec<&TypedExpr> {
        let mut out: Vec<&TypedExpr> = self.filters.iter().collect();
        out.extend(self.value.as_deref());
        out
    }

    /// Expressions evaluated once per collection.
    pub fn outer_expressions(&self) -> Vec<&TypedExpr> {
        self.default
            .as_deref()
            .into_iter()
            .chain(self.delimiter.as_deref())
            .collect()
    }

    pub fn expressions(&self) -> Vec<&TypedExpr> {
        let mut out = self.element_expressions();
        out.extend(self.outer_expressions());
        out
    }
}
