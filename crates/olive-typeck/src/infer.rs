//! Expression resolution and type checking.
//!
//! Resolution and checking are one pass: each AST node is resolved against
//! the environment of the stage it appears in and immediately assigned a
//! type. A node that fails gets [`Type::Bad`]; every rule below stays quiet
//! when an operand is already bad so a mistake is reported exactly once.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use olive_common::Pos;
use olive_syntax::{
    BinaryOp, CollectorNode, ExprNode, ExprNodeKind, InterpolationPart, MatchArmNode,
    MatchBindings, PayloadNode, RemainderNode, SwitchCase, TabulateColumn, UnaryOp,
};
use rustc_hash::{FxHashMap, FxHashSet};

use crate::definitions::{Definitions, SignatureKind};
use crate::env::{BindError, Binding, Environment, Flavour};
use crate::error::CompileError;
use crate::exhaustiveness;
use crate::tir::{
    ArithOp, CallTarget, CollectorKind, CompareOp, ExprKind, Literal, MatchArm, Remainder,
    TypedCollector, TypedExpr,
};
use crate::ty::{Type, VariantShape};
use crate::unify::unify;

/// Signature of a function defined by the program itself.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionSignature {
    pub parameters: Vec<Type>,
    pub return_type: Type,
}

struct LiftFrame {
    captures: Vec<(String, TypedExpr)>,
    /// Number of checker-bound locals when the block opened.
    locals_at_start: usize,
}

/// Resolves and type-checks expressions, reporting through a sink.
pub struct ExprChecker<'a> {
    defs: &'a dyn Definitions,
    functions: FxHashMap<String, FunctionSignature>,
    signatures: FxHashMap<String, SignatureKind>,
    sink: &'a mut dyn FnMut(CompileError),
    errors: usize,
    /// Provenance of every signable variable read since the last take.
    touched: BTreeSet<String>,
    services: BTreeSet<String>,
    lifts: Vec<LiftFrame>,
    locals: Vec<String>,
    fresh: usize,
    /// Set once the pipeline being checked has reshaped its stream.
    stream_replaced: bool,
    /// Depth of define bodies being expanded. Their clauses are checked once
    /// per call, so repeats of an error are only counted.
    defines: usize,
    repeated: FxHashSet<(Pos, String)>,
}

impl<'a> ExprChecker<'a> {
    pub fn new(defs: &'a dyn Definitions, sink: &'a mut dyn FnMut(CompileError)) -> Self {
        let signatures = defs
            .signatures()
            .into_iter()
            .map(|s| (s.name.clone(), s.kind))
            .collect();
        Self {
            defs,
            functions: FxHashMap::default(),
            signatures,
            sink,
            errors: 0,
            touched: BTreeSet::new(),
            services: BTreeSet::new(),
            lifts: Vec::new(),
            locals: Vec::new(),
            fresh: 0,
            stream_replaced: false,
            defines: 0,
            repeated: FxHashSet::default(),
        }
    }

    pub fn definitions(&self) -> &'a dyn Definitions {
        self.defs
    }

    /// Make a program function callable from later code.
    pub fn define_function(&mut self, name: &str, signature: FunctionSignature) {
        self.functions.insert(name.to_string(), signature);
    }

    pub fn set_stream_replaced(&mut self, replaced: bool) {
        self.stream_replaced = replaced;
    }

    pub fn enter_define(&mut self) {
        self.defines += 1;
    }

    pub fn leave_define(&mut self) {
        self.defines = self.defines.saturating_sub(1);
    }

    pub fn report(&mut self, error: CompileError) {
        self.errors += 1;
        if self.defines > 0 && !self.repeated.insert((error.pos(), error.to_string())) {
            return;
        }
        (self.sink)(error);
    }

    pub fn error_count(&self) -> usize {
        self.errors
    }

    /// Signable provenance read since the previous call.
    pub fn take_touched(&mut self) -> BTreeSet<String> {
        std::mem::take(&mut self.touched)
    }

    /// Services required by the registry functions called so far.
    pub fn services(&self) -> &BTreeSet<String> {
        &self.services
    }

    pub fn add_services<'s>(&mut self, services: impl IntoIterator<Item = &'s String>) {
        self.services.extend(services.into_iter().cloned());
    }

    /// Report a mismatch unless `expr` already failed. Returns whether the
    /// type was acceptable.
    pub fn expect(&mut self, expr: &TypedExpr, expected: &Type, description: &str) -> bool {
        if expr.ty.contains_bad() {
            return false;
        }
        if expected.accepts(&expr.ty) {
            return true;
        }
        self.report(CompileError::Mismatch {
            expected: description.to_string(),
            found: expr.ty.clone(),
            pos: expr.pos,
        });
        false
    }

    /// Unify, reporting when two healthy types are incompatible.
    fn unify_report(&mut self, acc: &Type, ty: &Type, pos: Pos) -> Type {
        let result = unify(acc, ty);
        if result.is_bad() && !acc.contains_bad() && !ty.contains_bad() {
            self.report(CompileError::Incompatible {
                first: acc.clone(),
                second: ty.clone(),
                pos,
            });
        }
        result
    }

    /// Bind lambda locals for the duration of a nested construct.
    /// Pair with [`ExprChecker::unbind_locals`].
    pub fn bind_locals(&mut self, env: &Environment, names: Vec<(String, Type, Pos)>) -> Environment {
        let mut bindings = Vec::new();
        for (name, ty, pos) in names {
            self.locals.push(name.clone());
            bindings.push(Arc::new(Binding::new(name, ty, Flavour::Lambda).at(pos)));
        }
        let pos = bindings.first().map(|b| b.pos).unwrap_or_default();
        match env.bind(bindings) {
            Ok(env) => env,
            Err(BindError::IllegalShadow { name, existing }) => {
                self.report(CompileError::IllegalShadow {
                    name,
                    existing,
                    pos,
                });
                env.fail(false)
            }
            Err(BindError::Duplicate { name }) => {
                self.report(CompileError::DuplicateVariable { name, pos });
                env.fail(false)
            }
        }
    }

    pub fn unbind_locals(&mut self, count: usize) {
        let keep = self.locals.len().saturating_sub(count);
        self.locals.truncate(keep);
    }

    // ── Expressions ────────────────────────────────────────────────────

    pub fn check(&mut self, env: &Environment, node: &ExprNode) -> TypedExpr {
        let pos = node.pos;
        match &node.kind {
            ExprNodeKind::Boolean { value } => literal(Literal::Boolean(*value), Type::Boolean, pos),
            ExprNodeKind::Integer { value } => literal(Literal::Integer(*value), Type::Integer, pos),
            ExprNodeKind::Float { value } => literal(Literal::Float(*value), Type::Float, pos),
            ExprNodeKind::String { value } => {
                literal(Literal::String(value.clone()), Type::String, pos)
            }
            ExprNodeKind::Date { epoch } => literal(Literal::Date(*epoch), Type::Date, pos),
            ExprNodeKind::Path { value } => literal(Literal::Path(value.clone()), Type::Path, pos),
            ExprNodeKind::Json { value } => literal(Literal::Json(value.clone()), Type::Json, pos),
            ExprNodeKind::Variable { name } => self.check_variable(env, name, pos),
            ExprNodeKind::Tuple { elements } => {
                let items: Vec<_> = elements.iter().map(|e| self.check(env, e)).collect();
                let ty = if items.iter().any(|e| e.ty.contains_bad()) {
                    Type::Bad
                } else {
                    Type::Tuple(items.iter().map(|e| e.ty.clone()).collect())
                };
                TypedExpr::new(ExprKind::Tuple(items), ty, pos)
            }
            ExprNodeKind::TupleGet { tuple, index } => self.check_tuple_get(env, tuple, *index, pos),
            ExprNodeKind::Object { fields } => {
                let fields: Vec<_> = fields
                    .iter()
                    .map(|f| (f.name.clone(), self.check(env, &f.value)))
                    .collect();
                match self.sorted_fields(fields, pos) {
                    Some(fields) => {
                        let ty = if fields.iter().any(|(_, e)| e.ty.contains_bad()) {
                            Type::Bad
                        } else {
                            Type::Object(
                                fields
                                    .iter()
                                    .map(|(n, e)| (n.clone(), e.ty.clone()))
                                    .collect(),
                            )
                        };
                        TypedExpr::new(ExprKind::Object(fields), ty, pos)
                    }
                    None => TypedExpr::bad(pos),
                }
            }
            ExprNodeKind::Field { object, field } => self.check_field(env, object, field, pos),
            ExprNodeKind::List { elements } => {
                let items: Vec<_> = elements.iter().map(|e| self.check(env, e)).collect();
                let mut element = Type::Nothing;
                for item in &items {
                    element = self.unify_report(&element, &item.ty, item.pos);
                }
                let ty = if element.is_bad() {
                    Type::Bad
                } else {
                    Type::list(element)
                };
                TypedExpr::new(ExprKind::List(items), ty, pos)
            }
            ExprNodeKind::Dictionary { entries } => {
                let mut key_ty = Type::Nothing;
                let mut value_ty = Type::Nothing;
                let mut checked = Vec::new();
                for entry in entries {
                    let k = self.check(env, &entry.key);
                    let v = self.check(env, &entry.value);
                    key_ty = self.unify_report(&key_ty, &k.ty, k.pos);
                    value_ty = self.unify_report(&value_ty, &v.ty, v.pos);
                    checked.push((k, v));
                }
                let ty = if key_ty.is_bad() || value_ty.is_bad() {
                    Type::Bad
                } else {
                    Type::map(key_ty, value_ty)
                };
                TypedExpr::new(ExprKind::Dictionary(checked), ty, pos)
            }
            ExprNodeKind::DictionaryGet { dictionary, key } => {
                let dictionary = self.check(env, dictionary);
                let key = self.check(env, key);
                let ty = match &dictionary.ty {
                    Type::Map(k, v) => {
                        if self.expect(&key, k, &k.name()) {
                            Type::optional((**v).clone())
                        } else {
                            Type::Bad
                        }
                    }
                    Type::Bad => Type::Bad,
                    other => {
                        self.report(CompileError::Mismatch {
                            expected: "a dictionary".to_string(),
                            found: other.clone(),
                            pos: dictionary.pos,
                        });
                        Type::Bad
                    }
                };
                TypedExpr::new(
                    ExprKind::DictionaryGet {
                        dictionary: Box::new(dictionary),
                        key: Box::new(key),
                    },
                    ty,
                    pos,
                )
            }
            ExprNodeKind::Algebraic { name, payload } => self.check_algebraic(env, name, payload, pos),
            ExprNodeKind::Binary { op, left, right } => {
                let left = self.check(env, left);
                let right = self.check(env, right);
                self.check_binary(*op, left, right, pos)
            }
            ExprNodeKind::Unary { op, operand } => {
                let operand = self.check(env, operand);
                let ty = operand.ty.clone();
                let valid = match op {
                    UnaryOp::Negate => matches!(ty, Type::Integer | Type::Float),
                    UnaryOp::Not => ty == Type::Boolean,
                };
                if ty.contains_bad() {
                    return TypedExpr::bad(pos);
                }
                if !valid {
                    self.report(CompileError::InvalidUnary {
                        op: op.to_string(),
                        operand: ty,
                        pos,
                    });
                    return TypedExpr::bad(pos);
                }
                let kind = match op {
                    UnaryOp::Negate => ExprKind::Negate(Box::new(operand)),
                    UnaryOp::Not => ExprKind::Not(Box::new(operand)),
                };
                TypedExpr::new(kind, ty, pos)
            }
            ExprNodeKind::If {
                condition,
                then,
                otherwise,
            } => {
                let condition = self.check(env, condition);
                self.expect(&condition, &Type::Boolean, "a boolean");
                let then = self.check(env, then);
                let otherwise = self.check(env, otherwise);
                let ty = self.unify_report(&then.ty, &otherwise.ty, otherwise.pos);
                let ty = if condition.ty.contains_bad() {
                    Type::Bad
                } else {
                    ty
                };
                TypedExpr::new(
                    ExprKind::If {
                        condition: Box::new(condition),
                        then: Box::new(then),
                        otherwise: Box::new(otherwise),
                    },
                    ty,
                    pos,
                )
            }
            ExprNodeKind::Switch {
                scrutinee,
                cases,
                otherwise,
            } => self.check_switch(env, scrutinee, cases, otherwise.as_deref(), pos),
            ExprNodeKind::Match {
                scrutinee,
                arms,
                remainder,
            } => self.check_match(env, scrutinee, arms, remainder.as_ref(), pos),
            ExprNodeKind::OptionalOf { inner } => {
                self.lifts.push(LiftFrame {
                    captures: Vec::new(),
                    locals_at_start: self.locals.len(),
                });
                let body = self.check(env, inner);
                let captures = self
                    .lifts
                    .pop()
                    .map(|frame| frame.captures)
                    .unwrap_or_default();
                let ty = if body.ty.contains_bad() || captures.iter().any(|(_, c)| c.ty.contains_bad()) {
                    Type::Bad
                } else {
                    body.ty.as_optional()
                };
                TypedExpr::new(
                    ExprKind::Lift {
                        captures,
                        body: Box::new(body),
                    },
                    ty,
                    pos,
                )
            }
            ExprNodeKind::OptionalEmpty => TypedExpr::new(
                ExprKind::OptionalEmpty,
                Type::optional(Type::Nothing),
                pos,
            ),
            ExprNodeKind::OptionalUse { inner } => self.check_optional_use(env, inner, pos),
            ExprNodeKind::Default { value, fallback } => {
                let value = self.check(env, value);
                let fallback = self.check(env, fallback);
                let ty = match &value.ty {
                    Type::Optional(inner) => self.unify_report(inner, &fallback.ty, fallback.pos),
                    Type::Bad => Type::Bad,
                    other => {
                        self.report(CompileError::Mismatch {
                            expected: "an optional".to_string(),
                            found: other.clone(),
                            pos: value.pos,
                        });
                        Type::Bad
                    }
                };
                TypedExpr::new(
                    ExprKind::Default {
                        value: Box::new(value),
                        fallback: Box::new(fallback),
                    },
                    ty,
                    pos,
                )
            }
            ExprNodeKind::Call {
                function,
                arguments,
            } => self.check_call(env, function, arguments, pos),
            ExprNodeKind::Tabulate { columns } => self.check_tabulate(env, columns, pos),
            ExprNodeKind::RegexBinding { value, pattern } => {
                let value = self.check(env, value);
                self.check_regex(value, pattern, pos)
            }
            ExprNodeKind::Interpolation { parts } => self.check_interpolation(env, parts, pos),
            ExprNodeKind::For {
                name,
                source,
                collector,
            } => {
                let source = self.check(env, source);
                let element = match &source.ty {
                    Type::List(inner) => (**inner).clone(),
                    Type::Map(k, v) => Type::Tuple(vec![(**k).clone(), (**v).clone()]),
                    Type::Bad => Type::Bad,
                    other => {
                        self.report(CompileError::Mismatch {
                            expected: "a list or dictionary".to_string(),
                            found: other.clone(),
                            pos: source.pos,
                        });
                        Type::Bad
                    }
                };
                let inner = self.bind_locals(env, vec![(name.clone(), element.clone(), pos)]);
                let collector = self.check_collector(&inner, env, collector, pos, false);
                self.unbind_locals(1);
                let ty = if element.contains_bad() {
                    Type::Bad
                } else {
                    collector.ty.clone()
                };
                TypedExpr::new(
                    ExprKind::For {
                        name: name.clone(),
                        element_ty: element,
                        source: Box::new(source),
                        collector: Box::new(collector),
                    },
                    ty,
                    pos,
                )
            }
        }
    }

    fn check_variable(&mut self, env: &Environment, name: &str, pos: Pos) -> TypedExpr {
        let Some(binding) = env.lookup(name) else {
            if self.stream_replaced && self.signatures.contains_key(name) {
                self.report(CompileError::SignatureAfterTransform {
                    name: name.to_string(),
                    pos,
                });
            } else {
                self.report(CompileError::UndefinedVariable {
                    name: name.to_string(),
                    pos,
                });
            }
            return TypedExpr::bad(pos);
        };
        binding.mark_read();
        let kind = match binding.flavour {
            Flavour::StreamSignature => match self.signatures.get(name) {
                Some(kind) => ExprKind::Signature {
                    name: name.to_string(),
                    kind: *kind,
                },
                None => ExprKind::Variable {
                    name: name.to_string(),
                    flavour: binding.flavour,
                },
            },
            flavour => {
                if flavour == Flavour::StreamSignable {
                    self.touched.extend(binding.provenance.iter().cloned());
                }
                ExprKind::Variable {
                    name: name.to_string(),
                    flavour,
                }
            }
        };
        TypedExpr::new(kind, binding.ty.clone(), pos)
    }

    fn check_tuple_get(&mut self, env: &Environment, tuple: &ExprNode, index: usize, pos: Pos) -> TypedExpr {
        let tuple = self.check(env, tuple);
        let ty = match &tuple.ty {
            Type::Tuple(elements) => match elements.get(index) {
                Some(ty) => ty.clone(),
                None => {
                    self.report(CompileError::TupleIndex {
                        index,
                        len: elements.len(),
                        pos,
                    });
                    Type::Bad
                }
            },
            Type::Bad => Type::Bad,
            other => {
                self.report(CompileError::Mismatch {
                    expected: "a tuple".to_string(),
                    found: other.clone(),
                    pos: tuple.pos,
                });
                Type::Bad
            }
        };
        TypedExpr::new(
            ExprKind::TupleGet {
                tuple: Box::new(tuple),
                index,
            },
            ty,
            pos,
        )
    }

    fn check_field(&mut self, env: &Environment, object: &ExprNode, field: &str, pos: Pos) -> TypedExpr {
        let object = self.check(env, object);
        let (ty, index) = match &object.ty {
            Type::Object(fields) => match fields.keys().position(|k| k == field) {
                Some(index) => (fields[field].clone(), index),
                None => {
                    self.report(CompileError::NoSuchField {
                        field: field.to_string(),
                        pos,
                    });
                    (Type::Bad, 0)
                }
            },
            Type::Bad => (Type::Bad, 0),
            other => {
                self.report(CompileError::Mismatch {
                    expected: "an object".to_string(),
                    found: other.clone(),
                    pos: object.pos,
                });
                (Type::Bad, 0)
            }
        };
        TypedExpr::new(
            ExprKind::Field {
                object: Box::new(object),
                name: field.to_string(),
                index,
            },
            ty,
            pos,
        )
    }

    /// Sort object fields by name, rejecting duplicates.
    fn sorted_fields(
        &mut self,
        fields: Vec<(String, TypedExpr)>,
        pos: Pos,
    ) -> Option<Vec<(String, TypedExpr)>> {
        let mut sorted: BTreeMap<String, TypedExpr> = BTreeMap::new();
        let mut ok = true;
        for (name, value) in fields {
            if sorted.contains_key(&name) {
                self.report(CompileError::DuplicateField { name, pos });
                ok = false;
            } else {
                sorted.insert(name, value);
            }
        }
        ok.then(|| sorted.into_iter().collect())
    }

    /// Pivot equal-length columns into an object of dictionaries keyed by
    /// row number.
    fn check_tabulate(&mut self, env: &Environment, columns: &[TabulateColumn], pos: Pos) -> TypedExpr {
        let counts: BTreeSet<usize> = columns.iter().map(|c| c.values.len()).collect();
        let mut ok = true;
        if counts.len() > 1 {
            self.report(CompileError::RaggedTabulate {
                counts: counts.into_iter().collect(),
                pos,
            });
            ok = false;
        }
        let mut fields = Vec::with_capacity(columns.len());
        for column in columns {
            let mut value_ty = Type::Nothing;
            let mut entries = Vec::with_capacity(column.values.len());
            for (row, value) in column.values.iter().enumerate() {
                let value = self.check(env, value);
                value_ty = self.unify_report(&value_ty, &value.ty, value.pos);
                let key = literal(Literal::String(row.to_string()), Type::String, value.pos);
                entries.push((key, value));
            }
            let ty = if value_ty.is_bad() {
                Type::Bad
            } else {
                Type::map(Type::String, value_ty)
            };
            fields.push((
                column.name.clone(),
                TypedExpr::new(ExprKind::Dictionary(entries), ty, pos),
            ));
        }
        let Some(fields) = self.sorted_fields(fields, pos) else {
            return TypedExpr::bad(pos);
        };
        if !ok || fields.iter().any(|(_, e)| e.ty.contains_bad()) {
            return TypedExpr::bad(pos);
        }
        let ty = Type::Object(fields.iter().map(|(n, e)| (n.clone(), e.ty.clone())).collect());
        TypedExpr::new(ExprKind::Object(fields), ty, pos)
    }

    fn check_regex(&mut self, value: TypedExpr, pattern: &str, pos: Pos) -> TypedExpr {
        let groups = match regex::Regex::new(pattern) {
            Ok(regex) if regex.captures_len() > 1 => Some(regex.captures_len() - 1),
            Ok(_) => {
                self.report(CompileError::NoCaptureGroups { pos });
                None
            }
            Err(err) => {
                let message = err.to_string();
                self.report(CompileError::BadRegex {
                    message: message.lines().last().unwrap_or_default().trim().to_string(),
                    pos,
                });
                None
            }
        };
        let typed = self.expect(&value, &Type::String, "a string");
        match groups {
            Some(groups) if typed => {
                let ty = Type::optional(Type::Tuple(vec![Type::optional(Type::String); groups]));
                TypedExpr::new(
                    ExprKind::RegexBind {
                        value: Box::new(value),
                        pattern: pattern.to_string(),
                        groups,
                    },
                    ty,
                    pos,
                )
            }
            _ => TypedExpr::bad(pos),
        }
    }

    fn check_interpolation(&mut self, env: &Environment, parts: &[InterpolationPart], pos: Pos) -> TypedExpr {
        let mut pieces = Vec::with_capacity(parts.len());
        let mut ok = true;
        for part in parts {
            match part {
                InterpolationPart::Text { text } => {
                    pieces.push(literal(Literal::String(text.clone()), Type::String, pos));
                }
                InterpolationPart::Expr { value } => {
                    let value = self.check(env, value);
                    if value.ty.contains_bad() {
                        ok = false;
                    } else if !is_textual(&value.ty) {
                        self.report(CompileError::NotConvertible {
                            ty: value.ty.clone(),
                            pos: value.pos,
                        });
                        ok = false;
                    }
                    pieces.push(value);
                }
            }
        }
        if !ok {
            return TypedExpr::bad(pos);
        }
        TypedExpr::new(ExprKind::Interpolation(pieces), Type::String, pos)
    }

    fn check_algebraic(&mut self, env: &Environment, name: &str, payload: &PayloadNode, pos: Pos) -> TypedExpr {
        if !is_algebraic_name(name) {
            self.report(CompileError::BadAlgebraicName {
                name: name.to_string(),
                pos,
            });
            return TypedExpr::bad(pos);
        }
        let (shape, items) = match payload {
            PayloadNode::Empty => (VariantShape::Empty, Vec::new()),
            PayloadNode::Tuple { elements } => {
                let items: Vec<_> = elements.iter().map(|e| self.check(env, e)).collect();
                (
                    VariantShape::Tuple(items.iter().map(|e| e.ty.clone()).collect()),
                    items,
                )
            }
            PayloadNode::Object { fields } => {
                let fields: Vec<_> = fields
                    .iter()
                    .map(|f| (f.name.clone(), self.check(env, &f.value)))
                    .collect();
                let Some(fields) = self.sorted_fields(fields, pos) else {
                    return TypedExpr::bad(pos);
                };
                (
                    VariantShape::Object(
                        fields
                            .iter()
                            .map(|(n, e)| (n.clone(), e.ty.clone()))
                            .collect(),
                    ),
                    fields.into_iter().map(|(_, e)| e).collect(),
                )
            }
        };
        let ty = if items.iter().any(|e| e.ty.contains_bad()) {
            Type::Bad
        } else {
            Type::Algebraic(BTreeMap::from([(name.to_string(), shape)]))
        };
        TypedExpr::new(
            ExprKind::Algebraic {
                tag: name.to_string(),
                payload: items,
            },
            ty,
            pos,
        )
    }

    fn check_binary(&mut self, op: BinaryOp, left: TypedExpr, right: TypedExpr, pos: Pos) -> TypedExpr {
        if left.ty.contains_bad() || right.ty.contains_bad() {
            return TypedExpr::bad(pos);
        }
        let invalid = |checker: &mut Self, left: &TypedExpr, right: &TypedExpr| {
            checker.report(CompileError::InvalidOperator {
                op: op.to_string(),
                left: left.ty.clone(),
                right: right.ty.clone(),
                pos,
            });
            TypedExpr::bad(pos)
        };
        match op {
            BinaryOp::And | BinaryOp::Or => {
                if left.ty != Type::Boolean || right.ty != Type::Boolean {
                    return invalid(self, &left, &right);
                }
                TypedExpr::new(
                    ExprKind::Logical {
                        and: op == BinaryOp::And,
                        left: Box::new(left),
                        right: Box::new(right),
                    },
                    Type::Boolean,
                    pos,
                )
            }
            BinaryOp::Equal | BinaryOp::NotEqual => {
                let operand_ty = unify(&left.ty, &right.ty);
                if operand_ty.is_bad() {
                    return invalid(self, &left, &right);
                }
                let op = if op == BinaryOp::Equal {
                    CompareOp::Equal
                } else {
                    CompareOp::NotEqual
                };
                compare(op, operand_ty, left, right, pos)
            }
            BinaryOp::Less | BinaryOp::LessEqual | BinaryOp::Greater | BinaryOp::GreaterEqual => {
                if left.ty != right.ty || !left.ty.is_orderable() {
                    return invalid(self, &left, &right);
                }
                let op = match op {
                    BinaryOp::Less => CompareOp::Less,
                    BinaryOp::LessEqual => CompareOp::LessEqual,
                    BinaryOp::Greater => CompareOp::Greater,
                    _ => CompareOp::GreaterEqual,
                };
                let operand_ty = left.ty.clone();
                compare(op, operand_ty, left, right, pos)
            }
            _ => match arithmetic(op, &left.ty, &right.ty) {
                Some((arith, ty)) => TypedExpr::new(
                    ExprKind::Arithmetic {
                        op: arith,
                        left: Box::new(left),
                        right: Box::new(right),
                    },
                    ty,
                    pos,
                ),
                None => invalid(self, &left, &right),
            },
        }
    }

    fn check_switch(
        &mut self,
        env: &Environment,
        scrutinee: &ExprNode,
        cases: &[SwitchCase],
        otherwise: Option<&ExprNode>,
        pos: Pos,
    ) -> TypedExpr {
        let scrutinee = self.check(env, scrutinee);
        let mut result_ty = Type::Nothing;
        let mut covered = BTreeSet::new();
        let mut checked = Vec::new();
        for case in cases {
            let value = self.check(env, &case.value);
            if !scrutinee.ty.contains_bad()
                && !value.ty.contains_bad()
                && !scrutinee.ty.accepts(&value.ty)
            {
                self.report(CompileError::Mismatch {
                    expected: scrutinee.ty.name(),
                    found: value.ty.clone(),
                    pos: value.pos,
                });
            }
            if let ExprKind::Algebraic { tag, payload } = &value.kind {
                if payload.is_empty() && !covered.insert(tag.clone()) {
                    self.report(CompileError::DuplicateCase {
                        name: tag.clone(),
                        pos: value.pos,
                    });
                }
            }
            let result = self.check(env, &case.result);
            result_ty = self.unify_report(&result_ty, &result.ty, result.pos);
            checked.push((value, result));
        }
        let otherwise = match otherwise {
            Some(node) => {
                let e = self.check(env, node);
                result_ty = self.unify_report(&result_ty, &e.ty, e.pos);
                Some(Box::new(e))
            }
            None => {
                if !scrutinee.ty.contains_bad() {
                    match exhaustiveness::switch_missing(&scrutinee.ty, &covered) {
                        None => {
                            self.report(CompileError::MissingElse {
                                ty: scrutinee.ty.clone(),
                                pos,
                            });
                            result_ty = Type::Bad;
                        }
                        Some(missing) if !missing.is_empty() => {
                            self.report(CompileError::NonExhaustiveMatch { missing, pos });
                            result_ty = Type::Bad;
                        }
                        Some(_) => {}
                    }
                }
                None
            }
        };
        let ty = if scrutinee.ty.contains_bad() {
            Type::Bad
        } else {
            result_ty
        };
        TypedExpr::new(
            ExprKind::Switch {
                scrutinee: Box::new(scrutinee),
                cases: checked,
                otherwise,
            },
            ty,
            pos,
        )
    }

    fn check_match(
        &mut self,
        env: &Environment,
        scrutinee: &ExprNode,
        arms: &[MatchArmNode],
        remainder: Option<&RemainderNode>,
        pos: Pos,
    ) -> TypedExpr {
        let scrutinee = self.check(env, scrutinee);
        let variants = match &scrutinee.ty {
            Type::Algebraic(variants) => Some(variants.clone()),
            Type::Bad => None,
            other => {
                self.report(CompileError::Mismatch {
                    expected: "an algebraic value".to_string(),
                    found: other.clone(),
                    pos: scrutinee.pos,
                });
                None
            }
        };
        let mut result_ty = Type::Nothing;
        let mut handled = BTreeSet::new();
        let mut checked = Vec::new();
        let mut failed = variants.is_none();
        for arm in arms {
            let Some(shape) = variants.as_ref().and_then(|v| v.get(&arm.variant)) else {
                if variants.is_some() {
                    self.report(CompileError::UnknownVariant {
                        name: arm.variant.clone(),
                        ty: scrutinee.ty.clone(),
                        pos: arm.pos,
                    });
                }
                failed = true;
                continue;
            };
            if !handled.insert(arm.variant.clone()) {
                self.report(CompileError::DuplicateCase {
                    name: arm.variant.clone(),
                    pos: arm.pos,
                });
                failed = true;
            }
            let Some(bindings) = self.arm_bindings(&arm.bindings, shape, arm.pos) else {
                failed = true;
                continue;
            };
            let count = bindings.len();
            let inner = self.bind_locals(
                env,
                bindings
                    .iter()
                    .map(|(_, name, ty)| (name.clone(), ty.clone(), arm.pos))
                    .collect(),
            );
            let body = self.check(&inner, &arm.body);
            self.unbind_locals(count);
            result_ty = self.unify_report(&result_ty, &body.ty, body.pos);
            checked.push(MatchArm {
                variant: arm.variant.clone(),
                bindings,
                body,
            });
        }
        let remainder = remainder.map(|r| {
            let names: Vec<_> = r
                .name
                .iter()
                .map(|n| (n.clone(), scrutinee.ty.clone(), pos))
                .collect();
            let count = names.len();
            let inner = self.bind_locals(env, names);
            let body = self.check(&inner, &r.body);
            self.unbind_locals(count);
            result_ty = self.unify_report(&result_ty, &body.ty, body.pos);
            Remainder {
                name: r.name.clone(),
                body: Box::new(body),
            }
        });
        if remainder.is_none() && !failed {
            let missing = exhaustiveness::missing_variants(&scrutinee.ty, &handled);
            if !missing.is_empty() {
                self.report(CompileError::NonExhaustiveMatch { missing, pos });
                failed = true;
            }
        }
        let ty = if failed { Type::Bad } else { result_ty };
        TypedExpr::new(
            ExprKind::Match {
                scrutinee: Box::new(scrutinee),
                arms: checked,
                remainder,
            },
            ty,
            pos,
        )
    }

    /// Resolve the names an arm binds to payload positions.
    fn arm_bindings(
        &mut self,
        bindings: &MatchBindings,
        shape: &VariantShape,
        pos: Pos,
    ) -> Option<Vec<(usize, String, Type)>> {
        match (bindings, shape) {
            (MatchBindings::Empty, VariantShape::Empty) => Some(Vec::new()),
            (MatchBindings::Tuple { names }, VariantShape::Tuple(types)) if names.len() == types.len() => {
                Some(
                    names
                        .iter()
                        .zip(types)
                        .enumerate()
                        .filter(|(_, (name, _))| name.as_str() != "_")
                        .map(|(i, (name, ty))| (i, name.clone(), ty.clone()))
                        .collect(),
                )
            }
            (MatchBindings::Object { fields }, VariantShape::Object(types)) => {
                let mut out = Vec::new();
                for binding in fields {
                    match types.keys().position(|k| *k == binding.field) {
                        Some(index) => out.push((index, binding.name.clone(), types[&binding.field].clone())),
                        None => {
                            self.report(CompileError::NoSuchField {
                                field: binding.field.clone(),
                                pos,
                            });
                            return None;
                        }
                    }
                }
                Some(out)
            }
            (_, shape) => {
                let expected = match shape {
                    VariantShape::Empty => "no payload".to_string(),
                    VariantShape::Tuple(types) => format!("a tuple payload of {}", types.len()),
                    VariantShape::Object(_) => "an object payload".to_string(),
                };
                self.report(CompileError::Mismatch {
                    expected,
                    found: Type::Algebraic(BTreeMap::from([("_".to_string(), shape.clone())])),
                    pos,
                });
                None
            }
        }
    }

    fn check_optional_use(&mut self, env: &Environment, inner: &ExprNode, pos: Pos) -> TypedExpr {
        if self.lifts.is_empty() {
            self.report(CompileError::OptionalUseOutsideBlock { pos });
            return TypedExpr::bad(pos);
        }
        let inner = self.check(env, inner);
        let ty = match &inner.ty {
            Type::Optional(t) => (**t).clone(),
            Type::Bad => return TypedExpr::bad(pos),
            other => {
                self.report(CompileError::Mismatch {
                    expected: "an optional".to_string(),
                    found: other.clone(),
                    pos: inner.pos,
                });
                return TypedExpr::bad(pos);
            }
        };
        let start = self
            .lifts
            .last()
            .map(|frame| frame.locals_at_start)
            .unwrap_or_default();
        let block_locals = &self.locals[start.min(self.locals.len())..];
        let lifted_local = inner
            .free_names()
            .into_keys()
            .find(|name| block_locals.contains(name));
        if let Some(local) = lifted_local {
            self.report(CompileError::LiftedLocal { name: local, pos });
            return TypedExpr::bad(pos);
        }
        let name = format!("$lift{}", self.fresh);
        self.fresh += 1;
        if let Some(frame) = self.lifts.last_mut() {
            frame.captures.push((name.clone(), inner));
        }
        TypedExpr::new(
            ExprKind::Variable {
                name,
                flavour: Flavour::Lambda,
            },
            ty,
            pos,
        )
    }

    fn check_call(&mut self, env: &Environment, function: &str, arguments: &[ExprNode], pos: Pos) -> TypedExpr {
        let arguments: Vec<_> = arguments.iter().map(|a| self.check(env, a)).collect();
        let (target, parameters, return_type) = if let Some(sig) = self.functions.get(function) {
            (CallTarget::Program, sig.parameters.clone(), sig.return_type.clone())
        } else if let Some(def) = self.defs.function(function) {
            self.services.extend(def.services.iter().cloned());
            (CallTarget::Native, def.parameters.clone(), def.return_type.clone())
        } else {
            self.report(CompileError::UnknownDefinition {
                kind: "function",
                name: function.to_string(),
                pos,
            });
            return TypedExpr::bad(pos);
        };
        if parameters.len() != arguments.len() {
            self.report(CompileError::ArityMismatch {
                name: function.to_string(),
                expected: parameters.len(),
                found: arguments.len(),
                pos,
            });
            return TypedExpr::bad(pos);
        }
        let mut ok = true;
        for (argument, parameter) in arguments.iter().zip(&parameters) {
            ok &= self.expect(argument, parameter, &parameter.name());
        }
        TypedExpr::new(
            ExprKind::Call {
                function: function.to_string(),
                target,
                arguments,
            },
            if ok { return_type } else { Type::Bad },
            pos,
        )
    }

    // ── Collectors ─────────────────────────────────────────────────────

    /// Check a collector. `env` sees the element (or record); `outer` is
    /// where defaults and delimiters are evaluated. In a group an empty
    /// `First`/`Max`/`Min`/`Univalued` drops the record, elsewhere it
    /// produces an optional.
    pub fn check_collector(
        &mut self,
        env: &Environment,
        outer: &Environment,
        node: &CollectorNode,
        pos: Pos,
        in_group: bool,
    ) -> TypedCollector {
        let mut filters = Vec::new();
        let mut node = node;
        let (kind, value, default, delimiter) = loop {
            break match node {
                CollectorNode::Where { condition, inner } => {
                    let condition = self.check(env, condition);
                    self.expect(&condition, &Type::Boolean, "a boolean");
                    filters.push(condition);
                    node = inner.as_ref();
                    continue;
                }
                CollectorNode::Count => (CollectorKind::Count, None, None, None),
                CollectorNode::List { value } => (CollectorKind::List, Some(value), None, None),
                CollectorNode::Flatten { value } => (CollectorKind::Flatten, Some(value), None, None),
                CollectorNode::Sum { value } => (CollectorKind::Sum, Some(value), None, None),
                CollectorNode::First { value, default } => {
                    (CollectorKind::First, Some(value), default.as_ref(), None)
                }
                CollectorNode::Max { value, default } => {
                    (CollectorKind::Max, Some(value), default.as_ref(), None)
                }
                CollectorNode::Min { value, default } => {
                    (CollectorKind::Min, Some(value), default.as_ref(), None)
                }
                CollectorNode::Univalued { value, default } => {
                    (CollectorKind::Univalued, Some(value), default.as_ref(), None)
                }
                CollectorNode::LexicalConcat { value, delimiter } => {
                    (CollectorKind::LexicalConcat, Some(value), None, Some(delimiter))
                }
                CollectorNode::Any { value } => (CollectorKind::Any, Some(value), None, None),
                CollectorNode::All { value } => (CollectorKind::All, Some(value), None, None),
            };
        };
        let value = value.map(|v| self.check(env, v));
        let value_ty = value
            .as_ref()
            .map(|v| v.ty.clone())
            .unwrap_or(Type::Integer);
        let default = default.map(|d| self.check(outer, d));
        let delimiter = delimiter.map(|d| {
            let d = self.check(outer, d);
            self.expect(&d, &Type::String, "a string");
            d
        });
        let value_pos = value.as_ref().map(|v| v.pos).unwrap_or(pos);
        let mut ty = if value_ty.contains_bad() {
            Type::Bad
        } else {
            match kind {
                CollectorKind::Count => Type::Integer,
                CollectorKind::List => Type::list(value_ty.clone()),
                CollectorKind::Flatten => match &value_ty {
                    Type::List(_) => value_ty.clone(),
                    other => {
                        self.report(CompileError::Mismatch {
                            expected: "a list".to_string(),
                            found: other.clone(),
                            pos: value_pos,
                        });
                        Type::Bad
                    }
                },
                CollectorKind::Sum => match &value_ty {
                    Type::Integer | Type::Float => value_ty.clone(),
                    other => {
                        self.report(CompileError::Mismatch {
                            expected: "an integer or float".to_string(),
                            found: other.clone(),
                            pos: value_pos,
                        });
                        Type::Bad
                    }
                },
                CollectorKind::First | CollectorKind::Univalued => value_ty.clone(),
                CollectorKind::Max | CollectorKind::Min => {
                    if value_ty.is_orderable() {
                        value_ty.clone()
                    } else {
                        self.report(CompileError::NotOrderable {
                            ty: value_ty.clone(),
                            pos: value_pos,
                        });
                        Type::Bad
                    }
                }
                CollectorKind::LexicalConcat => {
                    if value_ty == Type::String {
                        Type::String
                    } else {
                        self.report(CompileError::Mismatch {
                            expected: "a string".to_string(),
                            found: value_ty.clone(),
                            pos: value_pos,
                        });
                        Type::Bad
                    }
                }
                CollectorKind::Any | CollectorKind::All => {
                    if value_ty == Type::Boolean {
                        Type::Boolean
                    } else {
                        self.report(CompileError::Mismatch {
                            expected: "a boolean".to_string(),
                            found: value_ty.clone(),
                            pos: value_pos,
                        });
                        Type::Bad
                    }
                }
            }
        };
        let mut optional_result = false;
        if kind.may_be_empty() {
            match &default {
                Some(d) => ty = self.unify_report(&ty, &d.ty, d.pos),
                None if in_group => {}
                None => {
                    ty = ty.as_optional();
                    optional_result = true;
                }
            }
        }
        if filters.iter().any(|f| f.ty.contains_bad()) {
            ty = Type::Bad;
        }
        TypedCollector {
            kind,
            value: value.map(Box::new),
            filters,
            default: default.map(Box::new),
            delimiter: delimiter.map(Box::new),
            value_ty,
            ty,
            optional_result,
        }
    }
}

/// Types an interpolation can render.
fn is_textual(ty: &Type) -> bool {
    matches!(
        ty,
        Type::Float | Type::Integer | Type::Date | Type::Json | Type::Path | Type::String
    )
}

fn literal(value: Literal, ty: Type, pos: Pos) -> TypedExpr {
    TypedExpr::new(ExprKind::Literal(value), ty, pos)
}

fn compare(op: CompareOp, operand_ty: Type, left: TypedExpr, right: TypedExpr, pos: Pos) -> TypedExpr {
    TypedExpr::new(
        ExprKind::Compare {
            op,
            operand_ty,
            left: Box::new(left),
            right: Box::new(right),
        },
        Type::Boolean,
        pos,
    )
}

fn arithmetic(op: BinaryOp, left: &Type, right: &Type) -> Option<(ArithOp, Type)> {
    use Type::{Date, Float, Integer, String};
    Some(match (op, left, right) {
        (BinaryOp::Add, Integer, Integer) => (ArithOp::AddInt, Integer),
        (BinaryOp::Subtract, Integer, Integer) => (ArithOp::SubInt, Integer),
        (BinaryOp::Multiply, Integer, Integer) => (ArithOp::MulInt, Integer),
        (BinaryOp::Divide, Integer, Integer) => (ArithOp::DivInt, Integer),
        (BinaryOp::Modulo, Integer, Integer) => (ArithOp::ModInt, Integer),
        (BinaryOp::Add, Float, Float) => (ArithOp::AddFloat, Float),
        (BinaryOp::Subtract, Float, Float) => (ArithOp::SubFloat, Float),
        (BinaryOp::Multiply, Float, Float) => (ArithOp::MulFloat, Float),
        (BinaryOp::Divide, Float, Float) => (ArithOp::DivFloat, Float),
        (BinaryOp::Add, String, String) => (ArithOp::Concat, String),
        (BinaryOp::Add, Date, Integer) => (ArithOp::DateAdd, Date),
        (BinaryOp::Subtract, Date, Integer) => (ArithOp::DateSub, Date),
        (BinaryOp::Subtract, Date, Date) => (ArithOp::DateDiff, Integer),
        _ => return None,
    })
}

/// Algebraic tags are upper case, digits and underscores, starting with a letter.
pub fn is_algebraic_name(name: &str) -> bool {
    let mut chars = name.chars();
    chars.next().is_some_and(|c| c.is_ascii_uppercase())
        && chars.all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_')
}
