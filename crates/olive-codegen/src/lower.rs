//! Backend-independent lowering of a checked program.
//!
//! Program functions become top-level functions. Each olive becomes a setup
//! function that builds one closure per piece of per-record work and returns
//! them as a tuple, plus a [`PipelinePlan`] saying which closure each stage
//! uses. Everything goes through [`Backend`], so both backends see exactly
//! the same sequence of requests.
//!
//! ## Names inside closures
//!
//! - Stream variables are fields of the record parameter, found by position
//!   in the layout of the stage being lowered.
//! - Constants and locals are captured by value when the closure is built.
//!   At the top level of a function, constants are read from the context.
//! - A nested closure that reads the record captures it.

use std::collections::BTreeMap;

use olive_rt::collect::CollectSpec;
use olive_rt::plan::{CollectorPlan, HandlerPlan, Slot, StagePlan, TerminalPlan};
use olive_rt::{PipelinePlan, Primitive};
use olive_typeck::definitions::SignatureKind;
use olive_typeck::env::Flavour;
use olive_typeck::ir::{
    field_index, CheckedFunction, CheckedProgram, FlattenTarget, Layout, Pipeline, RejectHandler,
    Stage, StageKind, Terminal, TerminalKind,
};
use olive_typeck::tir::{
    ArithOp, CallTarget, CollectorKind, CompareOp, ExprKind, Literal, MatchArm, Remainder, TypedCollector,
    TypedExpr,
};
use olive_typeck::Type;
use tracing::{debug, debug_span};

use crate::artifact::{Export, PipelineMeta, ProgramMeta};
use crate::backend::Backend;
use crate::error::InternalError;

/// Parameter of every closure that works on one record.
pub const RECORD: &str = "$record";
/// Parameter of `Group` defaults, which receive the group key.
pub const KEY: &str = "$key";

/// Lower a whole program and let the backend package it.
pub fn lower<B: Backend>(mut backend: B, program: &CheckedProgram) -> Result<B::Output, InternalError> {
    let pipelines = {
        let mut lowerer = Lowerer {
            backend: &mut backend,
            fresh: 0,
            record: None,
            signable: Vec::new(),
        };
        for function in &program.functions {
            lowerer.function(function)?;
        }
        program
            .pipelines
            .iter()
            .enumerate()
            .map(|(index, pipeline)| lowerer.pipeline(index, pipeline))
            .collect::<Result<Vec<_>, _>>()?
    };
    let meta = ProgramMeta {
        input_format: program.input_format.clone(),
        input_layout: program.input_layout.clone(),
        pipelines,
        exports: program
            .exports()
            .map(|f| Export {
                name: f.name.clone(),
                parameters: f.parameters.clone(),
                return_type: f.return_type.clone(),
            })
            .collect(),
        required_services: program.required_services.iter().cloned().collect(),
        constants: program.constants.clone(),
    };
    backend.finish(meta)
}

struct Lowerer<'a, B: Backend> {
    backend: &'a mut B,
    fresh: usize,
    /// Layout of the record parameter visible to the code being lowered.
    record: Option<Layout>,
    /// Signable input fields of the current olive.
    signable: Layout,
}

fn signature_local(name: &str) -> String {
    format!("$signature:{name}")
}

fn push<C>(closures: &mut Vec<C>, code: C) -> Slot {
    closures.push(code);
    closures.len() - 1
}

fn collect_spec(collector: &TypedCollector) -> CollectSpec {
    CollectSpec {
        kind: collector.kind,
        float: collector.kind == CollectorKind::Sum && collector.value_ty == Type::Float,
        optional_result: collector.optional_result,
    }
}

/// Type a collector orders its values by, if it orders them at all.
fn ordered_type(collector: &TypedCollector) -> Result<Option<Type>, InternalError> {
    Ok(match collector.kind {
        CollectorKind::List | CollectorKind::Univalued | CollectorKind::Max | CollectorKind::Min => {
            Some(collector.value_ty.clone())
        }
        CollectorKind::Flatten => match &collector.value_ty {
            Type::List(inner) => Some((**inner).clone()),
            other => return Err(InternalError::unexpected("flattened value", other)),
        },
        _ => None,
    })
}

impl<'a, B: Backend> Lowerer<'a, B> {
    fn fresh(&mut self, prefix: &str) -> String {
        self.fresh += 1;
        format!("${prefix}{}", self.fresh)
    }

    // ── Functions and olives ───────────────────────────────────────────

    fn function(&mut self, function: &CheckedFunction) -> Result<(), InternalError> {
        let parameters: Vec<String> = function.parameters.iter().map(|(n, _)| n.clone()).collect();
        self.record = None;
        self.backend.begin_function(&function.name, &parameters);
        let body = self.expr(&function.body)?;
        self.backend.end_function(body)?;
        debug!(function = %function.name, "lowered function");
        Ok(())
    }

    fn pipeline(&mut self, index: usize, pipeline: &Pipeline) -> Result<PipelineMeta, InternalError> {
        let _span = debug_span!("lower_olive", index, format = %pipeline.format).entered();
        let setup = format!("olive:{index}");
        self.record = None;
        self.signable = pipeline.signable_fields();
        self.backend.begin_function(&setup, &[]);
        let mut closures = Vec::new();
        let mut stages = Vec::with_capacity(pipeline.stages.len());
        // Define parameters are locals of the setup function around every
        // closure it builds.
        let mut parameters = Vec::new();
        for stage in &pipeline.stages {
            match &stage.kind {
                StageKind::Call { define, parameters: arguments } => {
                    for (name, argument) in arguments {
                        let value = self.expr(argument)?;
                        self.backend.define_local(name);
                        parameters.push((name.clone(), value));
                    }
                    debug!(define = %define, parameters = arguments.len(), "expanded define");
                }
                _ => stages.push(self.stage(stage, &mut closures)?),
            }
        }
        let terminal = self.terminal(&pipeline.terminal, &mut closures)?;
        let count = closures.len();
        let mut body = self.backend.tuple(closures);
        while let Some((name, value)) = parameters.pop() {
            body = self.backend.bind_local(&name, value, body)?;
        }
        self.backend.end_function(body)?;
        debug!(stages = stages.len(), closures = count, "lowered olive");
        Ok(PipelineMeta {
            setup,
            plan: PipelinePlan {
                description: pipeline.description.clone(),
                format: pipeline.format.clone(),
                stages,
                terminal,
                closures: count,
            },
        })
    }

    // ── Closures ───────────────────────────────────────────────────────

    /// Build a closure around `build`. `record` is the layout of a record
    /// parameter; without one the closure reads whatever record the
    /// enclosing code reads, capturing it if needed.
    fn closure(
        &mut self,
        parameters: &[String],
        record: Option<&Layout>,
        expressions: &[&TypedExpr],
        build: impl FnOnce(&mut Self) -> Result<B::Code, InternalError>,
    ) -> Result<B::Code, InternalError> {
        let mut captured: BTreeMap<String, Flavour> = BTreeMap::new();
        let mut reads_stream = false;
        for expr in expressions {
            for (name, free) in expr.free_names() {
                reads_stream |= free.flavour.is_stream();
                if free.flavour.needs_capture() && !parameters.contains(&name) {
                    captured.entry(name).or_insert(free.flavour);
                }
            }
        }
        let mut names = Vec::with_capacity(captured.len() + 1);
        let mut values = Vec::with_capacity(captured.len() + 1);
        for (name, flavour) in captured {
            values.push(self.variable(&name, flavour)?);
            names.push(name);
        }
        if reads_stream && record.is_none() && !parameters.iter().any(|p| p == RECORD) {
            values.push(self.backend.load_named(RECORD)?);
            names.push(RECORD.to_string());
        }

        let saved = self.record.clone();
        if let Some(layout) = record {
            self.record = Some(layout.clone());
        }
        self.backend.begin_closure(parameters, &names);
        let body = self.signed(record.is_some(), expressions, build);
        self.record = saved;
        self.backend.end_closure(body?, values)
    }

    /// Run `build` with every signature the expressions read bound to a
    /// local, so each is computed once per record.
    fn signed(
        &mut self,
        per_record: bool,
        expressions: &[&TypedExpr],
        build: impl FnOnce(&mut Self) -> Result<B::Code, InternalError>,
    ) -> Result<B::Code, InternalError> {
        let mut signatures = BTreeMap::new();
        if per_record {
            for expr in expressions {
                signatures.extend(expr.signatures());
            }
        }
        let mut bound = Vec::with_capacity(signatures.len());
        for (name, kind) in signatures {
            let value = self.signature(kind)?;
            let local = signature_local(&name);
            self.backend.define_local(&local);
            bound.push((local, value));
        }
        let mut body = build(self)?;
        while let Some((local, value)) = bound.pop() {
            body = self.backend.bind_local(&local, value, body)?;
        }
        Ok(body)
    }

    fn signature(&mut self, kind: SignatureKind) -> Result<B::Code, InternalError> {
        let fields = self.signable.clone();
        let values = fields
            .iter()
            .map(|(name, _)| self.field(name))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(self.backend.primitive(Primitive::Signature { kind, fields }, values))
    }

    fn record_closure(
        &mut self,
        layout: &Layout,
        expressions: &[&TypedExpr],
        build: impl FnOnce(&mut Self) -> Result<B::Code, InternalError>,
    ) -> Result<B::Code, InternalError> {
        self.closure(&[RECORD.to_string()], Some(layout), expressions, build)
    }

    /// Slot of a closure evaluating `expr` against a record of `layout`.
    fn record_slot(
        &mut self,
        closures: &mut Vec<B::Code>,
        layout: &Layout,
        expr: &TypedExpr,
    ) -> Result<Slot, InternalError> {
        let code = self.record_closure(layout, &[expr], |l| l.expr(expr))?;
        Ok(push(closures, code))
    }

    /// Slot of a closure returning a tuple of `exprs`.
    fn tuple_slot<'e>(
        &mut self,
        closures: &mut Vec<B::Code>,
        layout: &Layout,
        exprs: impl IntoIterator<Item = &'e TypedExpr>,
    ) -> Result<Slot, InternalError> {
        let exprs: Vec<&TypedExpr> = exprs.into_iter().collect();
        let code = self.record_closure(layout, &exprs, |l| {
            let items = exprs.iter().map(|e| l.expr(e)).collect::<Result<Vec<_>, _>>()?;
            Ok(l.backend.tuple(items))
        })?;
        Ok(push(closures, code))
    }

    // ── Stages ─────────────────────────────────────────────────────────

    fn stage(&mut self, stage: &Stage, closures: &mut Vec<B::Code>) -> Result<StagePlan, InternalError> {
        let layout = &stage.input_layout;
        Ok(match &stage.kind {
            StageKind::Where { condition } => StagePlan::Where {
                condition: self.record_slot(closures, layout, condition)?,
            },
            StageKind::Let { bindings } => StagePlan::Let {
                extend: self.tuple_slot(closures, layout, bindings.iter().map(|b| &b.value))?,
            },
            StageKind::Require {
                value, handlers, ..
            } => StagePlan::Require {
                value: self.record_slot(closures, layout, value)?,
                handlers: self.handlers(closures, layout, handlers)?,
            },
            StageKind::Reject {
                condition,
                handlers,
            } => StagePlan::Reject {
                condition: self.record_slot(closures, layout, condition)?,
                handlers: self.handlers(closures, layout, handlers)?,
            },
            StageKind::Flatten { source, target } => StagePlan::Flatten {
                source: self.record_slot(closures, layout, source)?,
                extract: match target {
                    FlattenTarget::Name(..) => None,
                    FlattenTarget::Wildcard { element, used } => Some(
                        used.iter()
                            .map(|name| {
                                element
                                    .keys()
                                    .position(|k| k == name)
                                    .ok_or_else(|| InternalError::MissingField(name.clone()))
                            })
                            .collect::<Result<Vec<_>, _>>()?,
                    ),
                },
            },
            StageKind::Group {
                shape,
                discriminators,
                collectors,
            } => {
                let key = self.tuple_slot(closures, layout, discriminators)?;
                let equality = self.backend.structural_equals(shape);
                let hasher = self.backend.structural_hash_code(shape);
                StagePlan::Group {
                    key,
                    equality: push(closures, equality),
                    hasher: push(closures, hasher),
                    collectors: collectors
                        .iter()
                        .map(|c| self.collector_plan(closures, c, layout, None))
                        .collect::<Result<Vec<_>, _>>()?,
                }
            }
            StageKind::Join {
                format,
                outer_key,
                inner_key,
                key_ty,
                inner_layout,
            } => {
                let outer_key = self.record_slot(closures, layout, outer_key)?;
                let inner_key = self.record_slot(closures, inner_layout, inner_key)?;
                let equality = self.backend.equality(key_ty);
                let hasher = self.backend.hasher(key_ty);
                StagePlan::Join {
                    format: format.clone(),
                    outer_key,
                    inner_key,
                    equality: push(closures, equality),
                    hasher: push(closures, hasher),
                }
            }
            StageKind::LeftJoin {
                format,
                outer_key,
                inner_key,
                key_ty,
                inner_layout,
                collectors,
                ..
            } => {
                let outer_key = self.record_slot(closures, layout, outer_key)?;
                let inner_key = self.record_slot(closures, inner_layout, inner_key)?;
                let equality = self.backend.equality(key_ty);
                let hasher = self.backend.hasher(key_ty);
                let joined: Layout = layout.iter().chain(inner_layout).cloned().collect();
                StagePlan::LeftJoin {
                    format: format.clone(),
                    outer_key,
                    inner_key,
                    equality: push(closures, equality),
                    hasher: push(closures, hasher),
                    collectors: collectors
                        .iter()
                        .map(|c| self.collector_plan(closures, c, &joined, Some(layout)))
                        .collect::<Result<Vec<_>, _>>()?,
                }
            }
            StageKind::Pick {
                max,
                score,
                discriminators,
                shape,
            } => {
                let key = self.tuple_slot(closures, layout, discriminators)?;
                let equality = self.backend.structural_equals(shape);
                let hasher = self.backend.structural_hash_code(shape);
                let equality = push(closures, equality);
                let hasher = push(closures, hasher);
                let score_slot = self.record_slot(closures, layout, score)?;
                let comparator = self.backend.comparator(&score.ty);
                StagePlan::Pick {
                    max: *max,
                    key,
                    equality,
                    hasher,
                    score: score_slot,
                    comparator: push(closures, comparator),
                }
            }
            StageKind::Monitor {
                metric,
                help,
                labels,
            } => StagePlan::Monitor {
                metric: metric.clone(),
                help: help.clone(),
                labels: labels.iter().map(|(n, _)| n.clone()).collect(),
                values: self.tuple_slot(closures, layout, labels.iter().map(|(_, e)| e))?,
            },
            StageKind::Dump { dumper, columns } => StagePlan::Dump {
                dumper: dumper.clone(),
                columns: self.tuple_slot(closures, layout, columns)?,
            },
            StageKind::Call { define, .. } => {
                return Err(InternalError::UnexpandedDefine(define.clone()));
            }
        })
    }

    fn handlers(
        &mut self,
        closures: &mut Vec<B::Code>,
        layout: &Layout,
        handlers: &[RejectHandler],
    ) -> Result<Vec<HandlerPlan>, InternalError> {
        handlers
            .iter()
            .map(|handler| {
                Ok(match handler {
                    RejectHandler::Monitor {
                        metric,
                        help,
                        labels,
                    } => HandlerPlan::Monitor {
                        metric: metric.clone(),
                        help: help.clone(),
                        labels: labels.iter().map(|(n, _)| n.clone()).collect(),
                        values: self.tuple_slot(closures, layout, labels.iter().map(|(_, e)| e))?,
                    },
                    RejectHandler::Dump { dumper, columns } => HandlerPlan::Dump {
                        dumper: dumper.clone(),
                        columns: self.tuple_slot(closures, layout, columns)?,
                    },
                })
            })
            .collect()
    }

    /// `outer` is the layout defaults and delimiters see: the outer record
    /// of a `LeftJoin`, or nothing for a `Group`, whose defaults are given
    /// the group key and read constants only.
    fn collector_plan(
        &mut self,
        closures: &mut Vec<B::Code>,
        collector: &TypedCollector,
        layout: &Layout,
        outer: Option<&Layout>,
    ) -> Result<CollectorPlan, InternalError> {
        let value = match &collector.value {
            Some(value) => Some(self.record_slot(closures, layout, value)?),
            None => None,
        };
        let filters = collector
            .filters
            .iter()
            .map(|f| self.record_slot(closures, layout, f))
            .collect::<Result<Vec<_>, _>>()?;
        let comparator = match ordered_type(collector)? {
            Some(ty) => {
                let code = self.backend.comparator(&ty);
                Some(push(closures, code))
            }
            None => None,
        };
        let mut outer_slot = |l: &mut Self, expr: &Option<Box<TypedExpr>>| -> Result<Option<Slot>, InternalError> {
            let Some(expr) = expr.as_deref() else {
                return Ok(None);
            };
            let code = match outer {
                Some(outer) => l.record_closure(outer, &[expr], |l| l.expr(expr))?,
                None => l.closure(&[KEY.to_string()], None, &[expr], |l| l.expr(expr))?,
            };
            Ok(Some(push(closures, code)))
        };
        let default = outer_slot(self, &collector.default)?;
        let delimiter = outer_slot(self, &collector.delimiter)?;
        Ok(CollectorPlan {
            spec: collect_spec(collector),
            value,
            filters,
            comparator,
            default,
            delimiter,
        })
    }

    fn terminal(&mut self, terminal: &Terminal, closures: &mut Vec<B::Code>) -> Result<TerminalPlan, InternalError> {
        let names: Vec<String> = terminal.arguments.iter().map(|(n, _)| n.clone()).collect();
        let arguments = self.tuple_slot(
            closures,
            &terminal.layout,
            terminal.arguments.iter().map(|(_, e)| e),
        )?;
        Ok(match &terminal.kind {
            TerminalKind::Run { action } => TerminalPlan::Run {
                action: action.clone(),
                names,
                arguments,
            },
            TerminalKind::Refill { refiller } => TerminalPlan::Refill {
                refiller: refiller.clone(),
                names,
                arguments,
            },
            TerminalKind::Alert {
                labels,
                annotations,
            } => TerminalPlan::Alert {
                labels: labels.clone(),
                annotations: annotations.clone(),
                arguments,
            },
        })
    }

    // ── Expressions ────────────────────────────────────────────────────

    fn variable(&mut self, name: &str, flavour: Flavour) -> Result<B::Code, InternalError> {
        match flavour {
            Flavour::Constant if !self.backend.has_local(name) => Ok(self.backend.load_constant(name)),
            Flavour::Constant | Flavour::Lambda => self.backend.load_named(name),
            Flavour::Stream | Flavour::StreamSignable => self.field(name),
            Flavour::StreamSignature => Err(InternalError::NoRecord(name.to_string())),
        }
    }

    fn field(&mut self, name: &str) -> Result<B::Code, InternalError> {
        let layout = self
            .record
            .as_ref()
            .ok_or_else(|| InternalError::NoRecord(name.to_string()))?;
        let index =
            field_index(layout, name).ok_or_else(|| InternalError::MissingField(name.to_string()))?;
        let record = self.backend.load_named(RECORD)?;
        Ok(self.backend.tuple_get(record, index))
    }

    fn exprs(&mut self, exprs: &[TypedExpr]) -> Result<Vec<B::Code>, InternalError> {
        exprs.iter().map(|e| self.expr(e)).collect()
    }

    fn expr(&mut self, expr: &TypedExpr) -> Result<B::Code, InternalError> {
        Ok(match &expr.kind {
            ExprKind::Literal(literal) => self.backend.literal(literal),
            ExprKind::Variable { name, flavour } => self.variable(name, *flavour)?,
            ExprKind::Signature { name, kind } => {
                let local = signature_local(name);
                if self.backend.has_local(&local) {
                    self.backend.load_named(&local)?
                } else {
                    self.signature(*kind)?
                }
            }
            ExprKind::Tuple(items) => {
                let items = self.exprs(items)?;
                self.backend.tuple(items)
            }
            ExprKind::TupleGet { tuple, index } | ExprKind::Field { object: tuple, index, .. } => {
                let tuple = self.expr(tuple)?;
                self.backend.tuple_get(tuple, *index)
            }
            ExprKind::Object(fields) => {
                let values = fields
                    .iter()
                    .map(|(_, e)| self.expr(e))
                    .collect::<Result<Vec<_>, _>>()?;
                self.backend.tuple(values)
            }
            ExprKind::List(items) => {
                let Type::List(element) = &expr.ty else {
                    return Err(InternalError::unexpected("list literal", &expr.ty));
                };
                let items = self.exprs(items)?;
                let items = self.backend.tuple(items);
                let comparator = self.backend.comparator(element);
                self.backend.primitive(Primitive::MakeSet, vec![items, comparator])
            }
            ExprKind::Dictionary(entries) => {
                let Type::Map(key, _) = &expr.ty else {
                    return Err(InternalError::unexpected("dictionary literal", &expr.ty));
                };
                let mut rows = Vec::with_capacity(entries.len());
                for (k, v) in entries {
                    let row = vec![self.expr(k)?, self.expr(v)?];
                    rows.push(self.backend.tuple(row));
                }
                let rows = self.backend.tuple(rows);
                let comparator = self.backend.comparator(key);
                self.backend.primitive(Primitive::MakeDict, vec![rows, comparator])
            }
            ExprKind::DictionaryGet { dictionary, key } => {
                let Type::Map(key_ty, _) = &dictionary.ty else {
                    return Err(InternalError::unexpected("dictionary", &dictionary.ty));
                };
                let dictionary = self.expr(dictionary)?;
                let key = self.expr(key)?;
                let comparator = self.backend.comparator(key_ty);
                self.backend
                    .primitive(Primitive::DictGet, vec![dictionary, key, comparator])
            }
            ExprKind::Algebraic { tag, payload } => {
                let payload = self.exprs(payload)?;
                self.backend.algebraic(tag, payload)
            }
            ExprKind::Arithmetic { op, left, right } => {
                let operands = vec![self.expr(left)?, self.expr(right)?];
                self.backend.primitive(Primitive::Arith(*op), operands)
            }
            ExprKind::Negate(inner) => {
                let primitive = match inner.ty {
                    Type::Integer => Primitive::NegateInt,
                    Type::Float => Primitive::NegateFloat,
                    ref other => return Err(InternalError::unexpected("negated value", other)),
                };
                let inner = self.expr(inner)?;
                self.backend.primitive(primitive, vec![inner])
            }
            ExprKind::Not(inner) => {
                let inner = self.expr(inner)?;
                self.backend.not(inner)
            }
            ExprKind::Interpolation(pieces) => {
                let mut text: Option<B::Code> = None;
                for piece in pieces {
                    let mut code = self.expr(piece)?;
                    if piece.ty != Type::String {
                        code = self.backend.primitive(Primitive::ToText, vec![code]);
                    }
                    text = Some(match text {
                        Some(left) => self
                            .backend
                            .primitive(Primitive::Arith(ArithOp::Concat), vec![left, code]),
                        None => code,
                    });
                }
                match text {
                    Some(text) => text,
                    None => self.backend.literal(&Literal::String(String::new())),
                }
            }
            ExprKind::RegexBind { value, pattern, .. } => {
                let value = self.expr(value)?;
                let primitive = Primitive::RegexBind {
                    pattern: pattern.clone(),
                };
                self.backend.primitive(primitive, vec![value])
            }
            ExprKind::Compare {
                op,
                operand_ty,
                left,
                right,
            } => {
                let left = self.expr(left)?;
                let right = self.expr(right)?;
                match op {
                    CompareOp::Equal => self.backend.equal(operand_ty, left, right),
                    CompareOp::NotEqual => {
                        let equal = self.backend.equal(operand_ty, left, right);
                        self.backend.not(equal)
                    }
                    ordering => {
                        let compared = self.backend.compare(operand_ty, left, right);
                        self.backend.ordering(*ordering, compared)
                    }
                }
            }
            ExprKind::Logical { and, left, right } => {
                let left = self.expr(left)?;
                let right = self.expr(right)?;
                if *and {
                    let no = self.backend.literal(&Literal::Boolean(false));
                    self.backend.if_else(left, right, no)
                } else {
                    let yes = self.backend.literal(&Literal::Boolean(true));
                    self.backend.if_else(left, yes, right)
                }
            }
            ExprKind::If {
                condition,
                then,
                otherwise,
            } => {
                let condition = self.expr(condition)?;
                let then = self.expr(then)?;
                let otherwise = self.expr(otherwise)?;
                self.backend.if_else(condition, then, otherwise)
            }
            ExprKind::Switch {
                scrutinee,
                cases,
                otherwise,
            } => self.switch(scrutinee, cases, otherwise.as_deref())?,
            ExprKind::Match {
                scrutinee,
                arms,
                remainder,
            } => self.match_expr(scrutinee, arms, remainder.as_ref())?,
            ExprKind::Lift { captures, body } => {
                let mut values = Vec::with_capacity(captures.len());
                for (name, capture) in captures {
                    values.push((name.clone(), self.expr(capture)?));
                }
                let names: Vec<String> = captures.iter().map(|(n, _)| n.clone()).collect();
                self.backend.begin_lift(&names);
                let code = self.expr(body)?;
                let wrap = !matches!(body.ty, Type::Optional(_));
                self.backend.end_lift(values, code, wrap)?
            }
            ExprKind::OptionalEmpty => self.backend.none(),
            ExprKind::Default { value, fallback } => {
                let local = self.fresh("default");
                let value = self.expr(value)?;
                self.backend.define_local(&local);
                let test = self.backend.load_named(&local)?;
                let test = self.backend.is_present(test);
                let contents = self.backend.load_named(&local)?;
                let contents = self.backend.unwrap(contents);
                let fallback = self.expr(fallback)?;
                let chosen = self.backend.if_else(test, contents, fallback);
                self.backend.bind_local(&local, value, chosen)?
            }
            ExprKind::Call {
                function,
                target,
                arguments,
            } => {
                let arguments = self.exprs(arguments)?;
                match target {
                    CallTarget::Native => self.backend.call_native(function, arguments),
                    CallTarget::Program => self.backend.call_program(function, arguments)?,
                }
            }
            ExprKind::For {
                name,
                source,
                collector,
                ..
            } => self.for_expr(name, source, collector)?,
        })
    }

    fn switch(
        &mut self,
        scrutinee: &TypedExpr,
        cases: &[(TypedExpr, TypedExpr)],
        otherwise: Option<&TypedExpr>,
    ) -> Result<B::Code, InternalError> {
        let local = self.fresh("switch");
        let value = self.expr(scrutinee)?;
        self.backend.define_local(&local);
        // Without an `Else` the cases are exhaustive, so the last one needs
        // no test.
        let (mut chain, tested) = match otherwise {
            Some(otherwise) => (self.expr(otherwise)?, cases),
            None => match cases.split_last() {
                Some(((_, last), rest)) => (self.expr(last)?, rest),
                None => return Err(InternalError::unexpected("empty switch over", &scrutinee.ty)),
            },
        };
        for (case, result) in tested.iter().rev() {
            let current = self.backend.load_named(&local)?;
            let case = self.expr(case)?;
            let test = self.backend.equal(&scrutinee.ty, current, case);
            let result = self.expr(result)?;
            chain = self.backend.if_else(test, result, chain);
        }
        self.backend.bind_local(&local, value, chain)
    }

    fn match_expr(
        &mut self,
        scrutinee: &TypedExpr,
        arms: &[MatchArm],
        remainder: Option<&Remainder>,
    ) -> Result<B::Code, InternalError> {
        let local = self.fresh("match");
        let value = self.expr(scrutinee)?;
        self.backend.define_local(&local);
        let (mut chain, tested) = match remainder {
            Some(remainder) => (self.remainder(&local, remainder)?, arms),
            None => match arms.split_last() {
                Some((last, rest)) => (self.arm(&local, last)?, rest),
                None => return Err(InternalError::unexpected("empty match over", &scrutinee.ty)),
            },
        };
        for arm in tested.iter().rev() {
            let current = self.backend.load_named(&local)?;
            let tag = self.backend.algebraic_tag(current);
            let expected = self.backend.literal(&Literal::String(arm.variant.clone()));
            let test = self.backend.equal(&Type::String, tag, expected);
            let body = self.arm(&local, arm)?;
            chain = self.backend.if_else(test, body, chain);
        }
        self.backend.bind_local(&local, value, chain)
    }

    fn arm(&mut self, scrutinee: &str, arm: &MatchArm) -> Result<B::Code, InternalError> {
        for (_, name, _) in &arm.bindings {
            self.backend.define_local(name);
        }
        let mut body = self.expr(&arm.body)?;
        for (index, name, _) in arm.bindings.iter().rev() {
            let current = self.backend.load_named(scrutinee)?;
            let element = self.backend.algebraic_get(current, *index);
            body = self.backend.bind_local(name, element, body)?;
        }
        Ok(body)
    }

    fn remainder(&mut self, scrutinee: &str, remainder: &Remainder) -> Result<B::Code, InternalError> {
        let Some(name) = &remainder.name else {
            return self.expr(&remainder.body);
        };
        self.backend.define_local(name);
        let body = self.expr(&remainder.body)?;
        let current = self.backend.load_named(scrutinee)?;
        self.backend.bind_local(name, current, body)
    }

    fn for_expr(
        &mut self,
        name: &str,
        source: &TypedExpr,
        collector: &TypedCollector,
    ) -> Result<B::Code, InternalError> {
        let source = self.expr(source)?;
        let parameters = [name.to_string()];
        let value = match collector.value.as_deref() {
            Some(value) => self.closure(&parameters, None, &[value], |l| l.expr(value))?,
            None => self.backend.unit(),
        };
        let filters = collector
            .filters
            .iter()
            .map(|f| self.closure(&parameters, None, &[f], |l| l.expr(f)))
            .collect::<Result<Vec<_>, _>>()?;
        let filters = self.backend.tuple(filters);
        let comparator = match ordered_type(collector)? {
            Some(ty) => self.backend.comparator(&ty),
            None => self.backend.unit(),
        };
        let default = self.thunk(collector.default.as_deref())?;
        let delimiter = self.thunk(collector.delimiter.as_deref())?;
        Ok(self.backend.primitive(
            Primitive::Collect(collect_spec(collector)),
            vec![source, value, filters, comparator, default, delimiter],
        ))
    }

    /// A zero-argument closure, or unit when there is nothing to evaluate.
    fn thunk(&mut self, expr: Option<&TypedExpr>) -> Result<B::Code, InternalError> {
        match expr {
            Some(expr) => self.closure(&[], None, &[expr], |l| l.expr(expr)),
            None => Ok(self.backend.unit()),
        }
    }
}
