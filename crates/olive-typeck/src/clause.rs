//! Stage-by-stage checking of one olive.
//!
//! Each clause is resolved against the environment its predecessor produced
//! and yields a [`Stage`] plus the environment for the next clause. Purity
//! advances after every clause: a clause that reported anything drives the
//! pipeline to [`PurityState::Bad`], which silences further purity errors.
//!
//! Record layouts are computed last, once every stage is known, because a
//! `Flatten *` stage only learns which element fields it must extract from
//! the stages that follow it.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use olive_common::Pos;
use olive_syntax::{
    ArgumentNode, ClauseNode, CollectNode, DefineNode, ExprNode, ExprNodeKind,
    FlattenTarget as FlattenNode, LabelNode, OliveNode, ParameterNode, RejectNode, TerminalNode,
};
use parking_lot::Mutex;
use rustc_hash::{FxHashMap, FxHashSet};
use tracing::{debug, trace};

use crate::definitions::{InputFormatDefinition, Parameter};
use crate::env::{BindError, Binding, Environment, Flavour, UndefinedVariableProvider};
use crate::error::CompileError;
use crate::infer::ExprChecker;
use crate::ir::{
    captured_names, FlattenTarget, Layout, LetBinding, Pipeline, RecordShape, RejectHandler, Stage,
    StageKind, Terminal, TerminalKind,
};
use crate::purity::{ClauseEffect, PurityState, PurityTracker};
use crate::tir::{ExprKind, TypedCollector, TypedExpr};
use crate::ty::Type;

/// Hands out fields of a flattened element object on first reference.
struct WildcardProvider {
    element: BTreeMap<String, Type>,
    provided: Mutex<BTreeMap<String, Arc<Binding>>>,
    pos: Pos,
}

impl UndefinedVariableProvider for WildcardProvider {
    fn provide(&self, name: &str) -> Option<Arc<Binding>> {
        let ty = self.element.get(name)?;
        let mut provided = self.provided.lock();
        let binding = provided
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Binding::new(name, ty.clone(), Flavour::Stream).at(self.pos)));
        Some(binding.clone())
    }

    fn provided(&self) -> Vec<Arc<Binding>> {
        self.provided.lock().values().cloned().collect()
    }
}

/// Input record layout of a format: fields sorted by name.
pub fn format_layout(format: &InputFormatDefinition) -> Layout {
    format
        .sorted_fields()
        .into_iter()
        .map(|f| (f.name.clone(), f.ty.clone()))
        .collect()
}

/// Stream bindings for the fields of `format`.
pub fn format_bindings(format: &InputFormatDefinition, signable: bool) -> Vec<Arc<Binding>> {
    format
        .sorted_fields()
        .into_iter()
        .map(|f| {
            let flavour = if signable && f.signable {
                Flavour::StreamSignable
            } else {
                Flavour::Stream
            };
            Arc::new(Binding::new(f.name.clone(), f.ty.clone(), flavour))
        })
        .collect()
}

/// Defines of a program by name.
pub type Defines<'p> = FxHashMap<&'p str, &'p DefineNode>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CallStyle {
    Call,
    Matches,
}

impl CallStyle {
    fn keyword(self) -> &'static str {
        match self {
            CallStyle::Call => "Call",
            CallStyle::Matches => "Matches",
        }
    }
}

struct PendingStage {
    kind: StageKind,
    pos: Pos,
    input: Environment,
    output: Environment,
}

pub struct PipelineBuilder<'c, 'a> {
    checker: &'c mut ExprChecker<'a>,
    format: &'a InputFormatDefinition,
    /// Constants only; the base for environments of joined formats.
    constants: Environment,
    env: Environment,
    purity: PurityTracker,
    stages: Vec<PendingStage>,
    /// Bindings that must be read by some later stage.
    created: Vec<Arc<Binding>>,
    wildcards: Vec<(usize, Arc<WildcardProvider>)>,
    /// Signable provenance a clause read outside the checker's own tracking.
    touched: BTreeSet<String>,
    defines: &'c Defines<'c>,
    /// Defines being expanded, innermost last.
    calling: Vec<String>,
}

impl<'c, 'a> PipelineBuilder<'c, 'a> {
    pub fn new(
        checker: &'c mut ExprChecker<'a>,
        format: &'a InputFormatDefinition,
        root: Environment,
        defines: &'c Defines<'c>,
    ) -> Self {
        let constants = root.replace_stream([], true);
        Self {
            checker,
            format,
            constants,
            env: root,
            purity: PurityTracker::new(),
            stages: Vec::new(),
            created: Vec::new(),
            wildcards: Vec::new(),
            touched: BTreeSet::new(),
            defines,
            calling: Vec::new(),
        }
    }

    /// Check a define on its own, starting from the raw input stream.
    /// Returns whether nothing was reported.
    pub fn check_define(mut self, define: &DefineNode) -> bool {
        let start = self.checker.error_count();
        self.checker.set_stream_replaced(false);
        self.checker.enter_define();
        let input = self.env.clone();
        let bindings: Vec<_> = define
            .parameters
            .iter()
            .filter_map(|p| self.parameter(&input, p, define.pos))
            .collect();
        match input.bind(bindings) {
            Ok(env) => self.env = env,
            Err(err) => self.report_bind(err, define.pos),
        }
        self.calling.push(define.name.clone());
        for clause in &define.clauses {
            self.clause(clause);
        }
        self.checker.leave_define();
        self.checker.set_stream_replaced(false);
        let ok = self.checker.error_count() == start;
        debug!(define = %define.name, stages = self.stages.len(), ok, "checked define");
        ok
    }

    /// Check the whole olive. Returns `None` when anything was reported.
    pub fn build(mut self, olive: &OliveNode) -> Option<Pipeline> {
        let start = self.checker.error_count();
        self.checker.set_stream_replaced(false);
        for clause in &olive.clauses {
            self.clause(clause);
        }
        let terminal = self.terminal(&olive.terminal);
        self.checker.set_stream_replaced(false);
        self.check_unused();
        let ok = self.checker.error_count() == start;
        debug!(
            pos = %olive.pos,
            stages = self.stages.len(),
            purity = ?self.purity.state(),
            ok,
            "checked olive"
        );
        if !ok {
            return None;
        }
        let terminal = terminal?;
        Some(self.finish(olive, terminal))
    }

    fn clause(&mut self, clause: &ClauseNode) {
        match clause {
            ClauseNode::Call {
                name,
                arguments,
                pos,
            } => return self.call(CallStyle::Call, name, arguments, *pos),
            ClauseNode::Matches {
                name,
                arguments,
                pos,
            } => return self.call(CallStyle::Matches, name, arguments, *pos),
            _ => {}
        }
        let before = self.checker.error_count();
        self.checker.take_touched();
        let input = self.env.clone();
        let (kind, output, effect) = match clause {
            ClauseNode::Where { condition, .. } => {
                let condition = self.condition(&input, condition);
                (StageKind::Where { condition }, input.clone(), ClauseEffect::Filter)
            }
            ClauseNode::Let { arguments, pos } => self.let_clause(&input, arguments, *pos),
            ClauseNode::Require {
                name,
                value,
                handlers,
                pos,
            } => {
                let value = self.checker.check(&input, value);
                let ty = match &value.ty {
                    Type::Optional(inner) => (**inner).clone(),
                    Type::Bad => Type::Bad,
                    other => {
                        self.checker.report(CompileError::Mismatch {
                            expected: "an optional".to_string(),
                            found: other.clone(),
                            pos: value.pos,
                        });
                        Type::Bad
                    }
                };
                let handlers = self.handlers(&input, handlers);
                let binding = Arc::new(Binding::new(name.clone(), ty, Flavour::Stream).at(*pos));
                self.created.push(binding.clone());
                let output = self.extend(&input, vec![binding], *pos);
                (
                    StageKind::Require {
                        name: name.clone(),
                        value,
                        handlers,
                    },
                    output,
                    ClauseEffect::PassThrough,
                )
            }
            ClauseNode::Reject {
                condition,
                handlers,
                ..
            } => {
                let condition = self.condition(&input, condition);
                let handlers = self.handlers(&input, handlers);
                (
                    StageKind::Reject {
                        condition,
                        handlers,
                    },
                    input.clone(),
                    ClauseEffect::Filter,
                )
            }
            ClauseNode::Flatten {
                target,
                source,
                pos,
            } => self.flatten(&input, target, source, *pos),
            ClauseNode::Group {
                discriminators,
                collectors,
                pos,
            } => {
                let mut keys = Vec::new();
                let mut fields = Vec::new();
                for discriminator in discriminators {
                    let node = discriminator
                        .value
                        .clone()
                        .unwrap_or_else(|| variable(&discriminator.name, discriminator.pos));
                    let value = self.checker.check(&input, &node);
                    fields.push((discriminator.name.clone(), value.ty.clone(), discriminator.pos));
                    keys.push(value);
                }
                let outer = self.constants.clone();
                let (collectors, collected) = self.collectors(&input, &outer, collectors);
                let shape = RecordShape {
                    discriminators: fields
                        .iter()
                        .map(|(n, t, _)| (n.clone(), t.clone()))
                        .collect(),
                    collected: collected
                        .iter()
                        .map(|(n, t, _)| (n.clone(), t.clone()))
                        .collect(),
                    ok: collectors.iter().any(TypedCollector::can_fail),
                };
                let created_from = fields.len();
                fields.extend(collected);
                let (output, bindings) = self.reshape(&input, Vec::new(), fields, *pos);
                self.created.extend(bindings.into_iter().skip(created_from));
                (
                    StageKind::Group {
                        shape,
                        discriminators: keys,
                        collectors,
                    },
                    output,
                    ClauseEffect::Transform,
                )
            }
            ClauseNode::Join {
                format,
                outer_key,
                inner_key,
                pos,
            } => {
                let (outer_key, inner_key, key_ty, inner) =
                    self.join_keys(&input, format, outer_key, inner_key, *pos);
                let inner_layout = inner.map(format_layout).unwrap_or_default();
                let carried = downgraded(&input);
                let fields = inner_layout
                    .iter()
                    .map(|(n, t)| (n.clone(), t.clone(), *pos))
                    .collect();
                let (output, _) = self.reshape(&input, carried, fields, *pos);
                (
                    StageKind::Join {
                        format: format.clone(),
                        outer_key,
                        inner_key,
                        key_ty,
                        inner_layout,
                    },
                    output,
                    ClauseEffect::Transform,
                )
            }
            ClauseNode::LeftJoin {
                format,
                outer_key,
                inner_key,
                collectors,
                pos,
            } => {
                let (outer_key, inner_key, key_ty, inner) =
                    self.join_keys(&input, format, outer_key, inner_key, *pos);
                let inner_layout = inner.map(format_layout).unwrap_or_default();
                let joined = match &inner {
                    Some(inner) => {
                        let (joined, _) = self.reshape(
                            &input,
                            downgraded(&input),
                            inner_layout
                                .iter()
                                .map(|(n, t)| (n.clone(), t.clone(), *pos))
                                .collect(),
                            *pos,
                        );
                        trace!(format = %inner.name, "left join scope");
                        joined
                    }
                    None => input.fail(false),
                };
                let (collectors, collected) = self.collectors(&joined, &input, collectors);
                let shape = RecordShape {
                    discriminators: Vec::new(),
                    collected: collected
                        .iter()
                        .map(|(n, t, _)| (n.clone(), t.clone()))
                        .collect(),
                    ok: collectors.iter().any(TypedCollector::can_fail),
                };
                let (output, bindings) = self.reshape(&input, downgraded(&input), collected, *pos);
                let carried = bindings.len().saturating_sub(shape.collected.len());
                self.created.extend(bindings.into_iter().skip(carried));
                (
                    StageKind::LeftJoin {
                        format: format.clone(),
                        outer_key,
                        inner_key,
                        key_ty,
                        inner_layout,
                        shape,
                        collectors,
                    },
                    output,
                    ClauseEffect::Transform,
                )
            }
            ClauseNode::Pick {
                max,
                score,
                discriminators,
                pos,
            } => {
                let mut keys = Vec::new();
                for name in discriminators {
                    let key = self.checker.check(&input, &variable(name, *pos));
                    if let ExprKind::Variable { flavour, .. } = &key.kind {
                        if !flavour.is_stream() {
                            self.checker.report(CompileError::NotStreamVariable {
                                name: name.clone(),
                                pos: *pos,
                            });
                        }
                    }
                    keys.push(key);
                }
                let score = self.checker.check(&input, score);
                if !score.ty.contains_bad() && !score.ty.is_orderable() {
                    self.checker.report(CompileError::NotOrderable {
                        ty: score.ty.clone(),
                        pos: score.pos,
                    });
                }
                let shape = RecordShape {
                    discriminators: discriminators
                        .iter()
                        .cloned()
                        .zip(keys.iter().map(|k| k.ty.clone()))
                        .collect(),
                    collected: Vec::new(),
                    ok: false,
                };
                (
                    StageKind::Pick {
                        max: *max,
                        score,
                        discriminators: keys,
                        shape,
                    },
                    input.clone(),
                    ClauseEffect::Filter,
                )
            }
            ClauseNode::Monitor {
                metric,
                help,
                labels,
                ..
            } => {
                let labels = self.labels(&input, labels);
                (
                    StageKind::Monitor {
                        metric: metric.clone(),
                        help: help.clone(),
                        labels,
                    },
                    input.clone(),
                    ClauseEffect::Filter,
                )
            }
            ClauseNode::Dump {
                dumper, columns, ..
            } => {
                let columns = columns.iter().map(|c| self.checker.check(&input, c)).collect();
                (
                    StageKind::Dump {
                        dumper: dumper.clone(),
                        columns,
                    },
                    input.clone(),
                    ClauseEffect::Filter,
                )
            }
            ClauseNode::Call { .. } | ClauseNode::Matches { .. } => {
                unreachable!("Call and Matches are dispatched above")
            }
        };
        let mut touched = self.checker.take_touched();
        touched.append(&mut self.touched);
        let failed = self.checker.error_count() > before;
        if failed {
            self.purity.fail();
        } else {
            self.purity.apply(effect, touched);
        }
        trace!(stage = kind.name(), purity = ?self.purity.state(), failed, "clause");
        self.env = output.fail(!failed);
        self.stages.push(PendingStage {
            kind,
            pos: clause.pos(),
            input,
            output: self.env.clone(),
        });
    }

    /// Expand a define in place. Its parameters stay visible as constants
    /// for the rest of the olive.
    fn call(&mut self, style: CallStyle, name: &str, arguments: &[ExprNode], pos: Pos) {
        let before = self.checker.error_count();
        self.checker.take_touched();
        let input = self.env.clone();
        let state = self.purity.state();
        if state == PurityState::Transformed
            || (style == CallStyle::Call && state == PurityState::AlmostPure)
        {
            self.checker.report(CompileError::CallAfterTransform {
                keyword: style.keyword(),
                pos,
            });
        }
        self.checker.enter_define();
        let constants = input.replace_stream([], true);
        let values: Vec<TypedExpr> = arguments
            .iter()
            .map(|a| self.checker.check(&constants, a))
            .collect();
        let defines = self.defines;
        let define = match defines.get(name).copied() {
            None => {
                self.checker.report(CompileError::UnknownDefinition {
                    kind: "define",
                    name: name.to_string(),
                    pos,
                });
                None
            }
            Some(_) if self.calling.iter().any(|c| c == name) => {
                self.checker.report(CompileError::RecursiveDefine {
                    name: name.to_string(),
                    pos,
                });
                None
            }
            Some(define) => Some(define),
        };

        let mut parameters = Vec::new();
        let mut bindings: Vec<Arc<Binding>> = Vec::new();
        if let Some(define) = define {
            if define.parameters.len() != values.len() {
                self.checker.report(CompileError::ArityMismatch {
                    name: name.to_string(),
                    expected: define.parameters.len(),
                    found: values.len(),
                    pos,
                });
            }
            let mut values = values.into_iter();
            for parameter in &define.parameters {
                let value = values.next();
                if bindings.iter().any(|b| b.name == parameter.name) {
                    self.checker.report(CompileError::DuplicateVariable {
                        name: parameter.name.clone(),
                        pos: define.pos,
                    });
                    continue;
                }
                let Some(binding) = self.parameter(&input, parameter, define.pos) else {
                    continue;
                };
                if let Some(value) = value {
                    self.checker.expect(&value, &binding.ty, &binding.ty.name());
                    parameters.push((parameter.name.clone(), value));
                }
                bindings.push(binding);
            }
        }
        let output = match input.bind(bindings) {
            Ok(env) => env,
            Err(err) => {
                self.report_bind(err, pos);
                input.fail(false)
            }
        };
        let failed = self.checker.error_count() > before;
        if failed {
            self.purity.fail();
        } else {
            self.purity.apply(ClauseEffect::Filter, Vec::<String>::new());
        }
        self.env = output.fail(!failed);
        self.stages.push(PendingStage {
            kind: StageKind::Call {
                define: name.to_string(),
                parameters,
            },
            pos,
            input,
            output: self.env.clone(),
        });

        // Failed calls are not expanded.
        if let Some(define) = define.filter(|_| !failed) {
            self.calling.push(name.to_string());
            let mark = self.created.len();
            for clause in &define.clauses {
                self.clause(clause);
            }
            // The caller may ignore what the define creates.
            self.created.truncate(mark);
            self.calling.pop();
            if style == CallStyle::Call {
                self.purity.raise(PurityState::AlmostPure);
            }
        }
        self.checker.leave_define();
        trace!(define = name, keyword = style.keyword(), purity = ?self.purity.state(), failed, "call");
    }

    /// A define parameter as a constant binding, unless its type is
    /// malformed or its name is taken.
    fn parameter(
        &mut self,
        env: &Environment,
        parameter: &ParameterNode,
        pos: Pos,
    ) -> Option<Arc<Binding>> {
        let ty = match Type::parse_descriptor(&parameter.ty) {
            Ok(ty) => ty,
            Err(err) => {
                self.checker.report(CompileError::BadDescriptor {
                    descriptor: parameter.ty.clone(),
                    message: err.message,
                    pos,
                });
                return None;
            }
        };
        if env.contains(&parameter.name) {
            match env.lookup(&parameter.name).map(|b| b.flavour) {
                Some(Flavour::Constant) | None => {
                    self.checker.report(CompileError::DuplicateVariable {
                        name: parameter.name.clone(),
                        pos,
                    })
                }
                Some(existing) => self.report_bind(
                    BindError::IllegalShadow {
                        name: parameter.name.clone(),
                        existing,
                    },
                    pos,
                ),
            }
            return None;
        }
        Some(Arc::new(
            Binding::new(parameter.name.clone(), ty, Flavour::Constant).at(pos),
        ))
    }

    fn condition(&mut self, env: &Environment, node: &ExprNode) -> TypedExpr {
        let condition = self.checker.check(env, node);
        self.checker.expect(&condition, &Type::Boolean, "a boolean");
        condition
    }

    fn let_clause(
        &mut self,
        input: &Environment,
        arguments: &[olive_syntax::LetArgument],
        pos: Pos,
    ) -> (StageKind, Environment, ClauseEffect) {
        let mut bindings = Vec::new();
        let mut targets = Vec::new();
        let mut touched = BTreeSet::new();
        for argument in arguments {
            let value = self.checker.check(input, &argument.value);
            let provenance = self.checker.take_touched();
            let flavour = if argument.signable {
                if let Err(state) = self.purity.register_signable(provenance.iter().cloned()) {
                    if state == PurityState::Transformed {
                        self.checker.report(CompileError::SignableAfterTransform {
                            name: argument.name.clone(),
                            pos: argument.value.pos,
                        });
                    }
                }
                Flavour::StreamSignable
            } else {
                Flavour::Stream
            };
            let binding = Binding::new(argument.name.clone(), value.ty.clone(), flavour)
                .at(argument.value.pos)
                .with_provenance(if argument.signable {
                    provenance.clone()
                } else {
                    BTreeSet::new()
                });
            let binding = Arc::new(binding);
            if !argument.signable {
                self.created.push(binding.clone());
            }
            targets.push(binding);
            touched.extend(provenance);
            bindings.push(LetBinding {
                name: argument.name.clone(),
                value,
                signable: argument.signable,
            });
        }
        self.touched.extend(touched);
        let output = self.extend(input, targets, pos);
        (StageKind::Let { bindings }, output, ClauseEffect::PassThrough)
    }

    fn flatten(
        &mut self,
        input: &Environment,
        target: &FlattenNode,
        source: &ExprNode,
        pos: Pos,
    ) -> (StageKind, Environment, ClauseEffect) {
        let source = self.checker.check(input, source);
        let element = match &source.ty {
            Type::List(inner) => (**inner).clone(),
            Type::Bad => Type::Bad,
            other => {
                self.checker.report(CompileError::Mismatch {
                    expected: "a list".to_string(),
                    found: other.clone(),
                    pos: source.pos,
                });
                Type::Bad
            }
        };
        match target {
            FlattenNode::Name { name } => {
                let fields = vec![(name.clone(), element.clone(), pos)];
                let (output, _) = self.reshape(input, downgraded(input), fields, pos);
                (
                    StageKind::Flatten {
                        source,
                        target: FlattenTarget::Name(name.clone(), element),
                    },
                    output,
                    ClauseEffect::Transform,
                )
            }
            FlattenNode::Wildcard => {
                let fields = match &element {
                    Type::Object(fields) => fields.clone(),
                    Type::Bad => BTreeMap::new(),
                    other => {
                        self.checker.report(CompileError::Mismatch {
                            expected: "a list of objects".to_string(),
                            found: Type::list(other.clone()),
                            pos: source.pos,
                        });
                        BTreeMap::new()
                    }
                };
                let provider = Arc::new(WildcardProvider {
                    element: fields.clone(),
                    provided: Mutex::new(BTreeMap::new()),
                    pos,
                });
                self.wildcards.push((self.stages.len(), provider.clone()));
                let output = input
                    .replace_stream(downgraded(input), true)
                    .with_provider(provider);
                (
                    StageKind::Flatten {
                        source,
                        target: FlattenTarget::Wildcard {
                            element: fields,
                            used: Vec::new(),
                        },
                    },
                    output,
                    ClauseEffect::Transform,
                )
            }
        }
    }

    /// Resolve both keys of a join; the inner key sees only the inner format.
    fn join_keys(
        &mut self,
        input: &Environment,
        format: &str,
        outer_key: &ExprNode,
        inner_key: &ExprNode,
        pos: Pos,
    ) -> (TypedExpr, TypedExpr, Type, Option<&'a InputFormatDefinition>) {
        let outer_key = self.checker.check(input, outer_key);
        let defs = self.checker.definitions();
        let Some(inner) = defs.input_format(format) else {
            self.checker.report(CompileError::UnknownDefinition {
                kind: "input format",
                name: format.to_string(),
                pos,
            });
            return (outer_key, TypedExpr::bad(pos), Type::Bad, None);
        };
        self.checker.add_services([&inner.name]);
        let inner_env = self
            .constants
            .replace_stream(format_bindings(inner, false), true);
        let inner_key = self.checker.check(&inner_env, inner_key);
        let key_ty = if outer_key.ty.contains_bad() || inner_key.ty.contains_bad() {
            Type::Bad
        } else if outer_key.ty.same(&inner_key.ty) {
            crate::unify::unify(&outer_key.ty, &inner_key.ty)
        } else {
            self.checker.report(CompileError::Mismatch {
                expected: outer_key.ty.name(),
                found: inner_key.ty.clone(),
                pos: inner_key.pos,
            });
            Type::Bad
        };
        (outer_key, inner_key, key_ty, Some(inner))
    }

    fn collectors(
        &mut self,
        env: &Environment,
        outer: &Environment,
        nodes: &[CollectNode],
    ) -> (Vec<TypedCollector>, Vec<(String, Type, Pos)>) {
        let mut collectors = Vec::new();
        let mut fields = Vec::new();
        for node in nodes {
            let collector = self
                .checker
                .check_collector(env, outer, &node.collector, node.pos, true);
            fields.push((node.name.clone(), collector.ty.clone(), node.pos));
            collectors.push(collector);
        }
        (collectors, fields)
    }

    fn labels(&mut self, env: &Environment, labels: &[LabelNode]) -> Vec<(String, TypedExpr)> {
        labels
            .iter()
            .map(|label| {
                let value = self.checker.check(env, &label.value);
                self.checker.expect(&value, &Type::String, "a string");
                (label.name.clone(), value)
            })
            .collect()
    }

    fn handlers(&mut self, env: &Environment, handlers: &[RejectNode]) -> Vec<RejectHandler> {
        handlers
            .iter()
            .map(|handler| match handler {
                RejectNode::Monitor {
                    metric,
                    help,
                    labels,
                } => RejectHandler::Monitor {
                    metric: metric.clone(),
                    help: help.clone(),
                    labels: self.labels(env, labels),
                },
                RejectNode::Dump { dumper, columns } => RejectHandler::Dump {
                    dumper: dumper.clone(),
                    columns: columns.iter().map(|c| self.checker.check(env, c)).collect(),
                },
            })
            .collect()
    }

    /// Add fields next to the existing ones.
    fn extend(&mut self, env: &Environment, targets: Vec<Arc<Binding>>, pos: Pos) -> Environment {
        match env.extend_stream(targets) {
            Ok(env) => env,
            Err(err) => {
                self.report_bind(err, pos);
                env.fail(false)
            }
        }
    }

    /// Replace the record with `carried` plus new `fields`. Returns the new
    /// environment and every binding in it, carried ones first.
    fn reshape(
        &mut self,
        env: &Environment,
        carried: Vec<Arc<Binding>>,
        fields: Vec<(String, Type, Pos)>,
        pos: Pos,
    ) -> (Environment, Vec<Arc<Binding>>) {
        let mut names: FxHashSet<String> = carried.iter().map(|b| b.name.clone()).collect();
        let mut bindings = carried;
        let mut ok = true;
        for (name, ty, field_pos) in fields {
            if !names.insert(name.clone()) {
                self.checker.report(CompileError::DuplicateVariable {
                    name,
                    pos: field_pos,
                });
                ok = false;
                continue;
            }
            if let Some(existing) = self.constants.lookup(&name) {
                self.report_bind(
                    BindError::IllegalShadow {
                        name,
                        existing: existing.flavour,
                    },
                    field_pos,
                );
                ok = false;
                continue;
            }
            bindings.push(Arc::new(Binding::new(name, ty, Flavour::Stream).at(field_pos)));
        }
        trace!(%pos, fields = bindings.len(), "reshape record");
        self.checker.set_stream_replaced(true);
        (env.replace_stream(bindings.clone(), ok), bindings)
    }

    fn report_bind(&mut self, err: BindError, pos: Pos) {
        let error = match err {
            BindError::Duplicate { name } => CompileError::DuplicateVariable { name, pos },
            BindError::IllegalShadow { name, existing } => CompileError::IllegalShadow {
                name,
                existing,
                pos,
            },
        };
        self.checker.report(error);
    }

    fn terminal(&mut self, node: &TerminalNode) -> Option<TerminalParts> {
        let before = self.checker.error_count();
        self.checker.take_touched();
        let env = self.env.clone();
        let (kind, pos, arguments, parameters, services) = match node {
            TerminalNode::Run {
                pos,
                action,
                arguments,
            } => {
                let defs = self.checker.definitions();
                let definition = defs.action(action);
                if definition.is_none() {
                    self.checker.report(CompileError::UnknownDefinition {
                        kind: "action",
                        name: action.clone(),
                        pos: *pos,
                    });
                }
                (
                    TerminalKind::Run {
                        action: action.clone(),
                    },
                    *pos,
                    arguments,
                    definition.map(|d| d.parameters.as_slice()),
                    definition.map(|d| d.services.as_slice()).unwrap_or_default(),
                )
            }
            TerminalNode::Alert {
                pos,
                labels,
                annotations,
                ttl,
            } => return self.alert(&env, before, labels, annotations, ttl, *pos),
            TerminalNode::Refill {
                pos,
                refiller,
                arguments,
            } => {
                let defs = self.checker.definitions();
                let definition = defs.refiller(refiller);
                if definition.is_none() {
                    self.checker.report(CompileError::UnknownDefinition {
                        kind: "refiller",
                        name: refiller.clone(),
                        pos: *pos,
                    });
                }
                (
                    TerminalKind::Refill {
                        refiller: refiller.clone(),
                    },
                    *pos,
                    arguments,
                    definition.map(|d| d.parameters.as_slice()),
                    definition.map(|d| d.services.as_slice()).unwrap_or_default(),
                )
            }
        };
        self.checker.add_services(services);
        let target = kind.target().to_string();
        let arguments = self.arguments(&env, &target, arguments, parameters, pos);
        self.close_terminal(
            before,
            TerminalParts {
                kind,
                pos,
                arguments,
            },
        )
    }

    fn close_terminal(&mut self, before: usize, parts: TerminalParts) -> Option<TerminalParts> {
        let touched = self.checker.take_touched();
        if self.checker.error_count() > before {
            self.purity.fail();
            return None;
        }
        self.purity.apply(ClauseEffect::Filter, touched);
        Some(parts)
    }

    /// Labels and annotations are strings keyed by name across both lists;
    /// one label must be `alertname`. The time to live is in seconds.
    fn alert(
        &mut self,
        env: &Environment,
        before: usize,
        labels: &[ArgumentNode],
        annotations: &[ArgumentNode],
        ttl: &ExprNode,
        pos: Pos,
    ) -> Option<TerminalParts> {
        let labels = self.arguments(env, "Alert", labels, None, pos);
        let annotations = self.arguments(env, "Alert", annotations, None, pos);
        for (_, value) in labels.iter().chain(&annotations) {
            self.checker.expect(value, &Type::String, "a string");
        }
        for (name, value) in &annotations {
            if labels.iter().any(|(label, _)| label == name) {
                self.checker.report(CompileError::DuplicateField {
                    name: name.clone(),
                    pos: value.pos,
                });
            }
        }
        if !labels.iter().any(|(name, _)| name == "alertname") {
            self.checker.report(CompileError::MissingParameter {
                target: "Alert".to_string(),
                name: "alertname".to_string(),
                pos,
            });
        }
        let ttl = self.checker.check(env, ttl);
        self.checker.expect(&ttl, &Type::Integer, "an integer");
        let kind = TerminalKind::Alert {
            labels: labels.iter().map(|(n, _)| n.clone()).collect(),
            annotations: annotations.iter().map(|(n, _)| n.clone()).collect(),
        };
        let mut arguments = labels;
        arguments.extend(annotations);
        arguments.push(("ttl".to_string(), ttl));
        self.close_terminal(
            before,
            TerminalParts {
                kind,
                pos,
                arguments,
            },
        )
    }

    fn arguments(
        &mut self,
        env: &Environment,
        target: &str,
        arguments: &[ArgumentNode],
        parameters: Option<&[Parameter]>,
        pos: Pos,
    ) -> Vec<(String, TypedExpr)> {
        let mut checked = BTreeMap::new();
        for argument in arguments {
            let value = self.checker.check(env, &argument.value);
            if checked.contains_key(&argument.name) {
                self.checker.report(CompileError::DuplicateField {
                    name: argument.name.clone(),
                    pos: argument.pos,
                });
                continue;
            }
            if let Some(parameters) = parameters {
                match parameters.iter().find(|p| p.name == argument.name) {
                    Some(parameter) => {
                        self.checker.expect(&value, &parameter.ty, &parameter.ty.name());
                    }
                    None => self.checker.report(CompileError::UnknownParameter {
                        target: target.to_string(),
                        name: argument.name.clone(),
                        pos: argument.pos,
                    }),
                }
            }
            checked.insert(argument.name.clone(), value);
        }
        for parameter in parameters.unwrap_or_default() {
            if parameter.required && !checked.contains_key(&parameter.name) {
                self.checker.report(CompileError::MissingParameter {
                    target: target.to_string(),
                    name: parameter.name.clone(),
                    pos,
                });
            }
        }
        checked.into_iter().collect()
    }

    fn check_unused(&mut self) {
        let unused: Vec<_> = self
            .created
            .iter()
            .filter(|b| !b.is_read())
            .map(|b| (b.name.clone(), b.pos))
            .collect();
        for (name, pos) in unused {
            self.checker.report(CompileError::UnusedVariable { name, pos });
        }
        let wildcards: Vec<_> = self
            .wildcards
            .iter()
            .filter(|(_, p)| p.provided().is_empty())
            .map(|(_, p)| p.pos)
            .collect();
        for pos in wildcards {
            self.checker.report(CompileError::UnusedWildcard { pos });
        }
    }

    fn finish(mut self, olive: &OliveNode, terminal: TerminalParts) -> Pipeline {
        for (index, provider) in &self.wildcards {
            let used: Vec<String> = provider.provided.lock().keys().cloned().collect();
            if let Some(PendingStage {
                kind:
                    StageKind::Flatten {
                        target: FlattenTarget::Wildcard { used: slot, .. },
                        ..
                    },
                ..
            }) = self.stages.get_mut(*index)
            {
                *slot = used;
            }
        }
        let mut layout = format_layout(self.format);
        let mut stages = Vec::with_capacity(self.stages.len());
        for pending in self.stages {
            let output_layout = pending.kind.output_layout(&layout);
            let captured = captured_names(pending.kind.expressions());
            stages.push(Stage {
                kind: pending.kind,
                pos: pending.pos,
                input: pending.input,
                output: pending.output,
                captured,
                input_layout: layout,
                output_layout: output_layout.clone(),
            });
            layout = output_layout;
        }
        let mut signatures_used = BTreeMap::new();
        for stage in &stages {
            for expr in stage.kind.expressions() {
                signatures_used.extend(expr.signatures());
            }
        }
        for (_, expr) in &terminal.arguments {
            signatures_used.extend(expr.signatures());
        }
        let captured = captured_names(terminal.arguments.iter().map(|(_, e)| e));
        Pipeline {
            pos: olive.pos,
            description: olive.description.clone(),
            format: self.format.name.clone(),
            stages,
            terminal: Terminal {
                kind: terminal.kind,
                pos: terminal.pos,
                arguments: terminal.arguments,
                captured,
                layout,
            },
            signable: self.purity.signable().clone(),
            purity_trace: self.purity.history().to_vec(),
            signatures_used,
        }
    }
}

struct TerminalParts {
    kind: TerminalKind,
    pos: Pos,
    arguments: Vec<(String, TypedExpr)>,
}

/// Current record fields carried across a reshaping stage.
fn downgraded(env: &Environment) -> Vec<Arc<Binding>> {
    env.stream_bindings()
        .iter()
        .map(|b| Arc::new(Binding::downgrade(b)))
        .collect()
}

fn variable(name: &str, pos: Pos) -> ExprNode {
    ExprNode::new(
        pos,
        ExprNodeKind::Variable {
            name: name.to_string(),
        },
    )
}
