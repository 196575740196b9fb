//! Terse constructors for syntax trees.
//!
//! Nodes are created at the default position; chain [`ExprNode::at`] when a
//! test needs to assert on a diagnostic location.

use olive_common::Pos;

use crate::ast::*;

fn node(kind: ExprNodeKind) -> ExprNode {
    ExprNode::new(Pos::default(), kind)
}

pub fn boolean(value: bool) -> ExprNode {
    node(ExprNodeKind::Boolean { value })
}

pub fn int(value: i64) -> ExprNode {
    node(ExprNodeKind::Integer { value })
}

pub fn float(value: f64) -> ExprNode {
    node(ExprNodeKind::Float { value })
}

pub fn string(value: &str) -> ExprNode {
    node(ExprNodeKind::String {
        value: value.to_string(),
    })
}

pub fn date(epoch: i64) -> ExprNode {
    node(ExprNodeKind::Date { epoch })
}

pub fn path(value: &str) -> ExprNode {
    node(ExprNodeKind::Path {
        value: value.to_string(),
    })
}

pub fn json(value: serde_json::Value) -> ExprNode {
    node(ExprNodeKind::Json { value })
}

pub fn var(name: &str) -> ExprNode {
    node(ExprNodeKind::Variable {
        name: name.to_string(),
    })
}

pub fn tuple(elements: Vec<ExprNode>) -> ExprNode {
    node(ExprNodeKind::Tuple { elements })
}

pub fn tuple_get(tuple: ExprNode, index: usize) -> ExprNode {
    node(ExprNodeKind::TupleGet {
        tuple: Box::new(tuple),
        index,
    })
}

pub fn object(fields: Vec<(&str, ExprNode)>) -> ExprNode {
    node(ExprNodeKind::Object {
        fields: fields
            .into_iter()
            .map(|(name, value)| FieldNode {
                name: name.to_string(),
                value,
            })
            .collect(),
    })
}

pub fn field(object: ExprNode, field: &str) -> ExprNode {
    node(ExprNodeKind::Field {
        object: Box::new(object),
        field: field.to_string(),
    })
}

pub fn list(elements: Vec<ExprNode>) -> ExprNode {
    node(ExprNodeKind::List { elements })
}

pub fn dict(entries: Vec<(ExprNode, ExprNode)>) -> ExprNode {
    node(ExprNodeKind::Dictionary {
        entries: entries
            .into_iter()
            .map(|(key, value)| EntryNode { key, value })
            .collect(),
    })
}

pub fn dict_get(dictionary: ExprNode, key: ExprNode) -> ExprNode {
    node(ExprNodeKind::DictionaryGet {
        dictionary: Box::new(dictionary),
        key: Box::new(key),
    })
}

/// An algebraic value with no payload, e.g. `RED`.
pub fn tag(name: &str) -> ExprNode {
    node(ExprNodeKind::Algebraic {
        name: name.to_string(),
        payload: PayloadNode::Empty,
    })
}

pub fn tag_tuple(name: &str, elements: Vec<ExprNode>) -> ExprNode {
    node(ExprNodeKind::Algebraic {
        name: name.to_string(),
        payload: PayloadNode::Tuple { elements },
    })
}

pub fn tag_object(name: &str, fields: Vec<(&str, ExprNode)>) -> ExprNode {
    node(ExprNodeKind::Algebraic {
        name: name.to_string(),
        payload: PayloadNode::Object {
            fields: fields
                .into_iter()
                .map(|(name, value)| FieldNode {
                    name: name.to_string(),
                    value,
                })
                .collect(),
        },
    })
}

pub fn binary(op: BinaryOp, left: ExprNode, right: ExprNode) -> ExprNode {
    node(ExprNodeKind::Binary {
        op,
        left: Box::new(left),
        right: Box::new(right),
    })
}

pub fn unary(op: UnaryOp, operand: ExprNode) -> ExprNode {
    node(ExprNodeKind::Unary {
        op,
        operand: Box::new(operand),
    })
}

pub fn if_else(condition: ExprNode, then: ExprNode, otherwise: ExprNode) -> ExprNode {
    node(ExprNodeKind::If {
        condition: Box::new(condition),
        then: Box::new(then),
        otherwise: Box::new(otherwise),
    })
}

pub fn switch(
    scrutinee: ExprNode,
    cases: Vec<(ExprNode, ExprNode)>,
    otherwise: Option<ExprNode>,
) -> ExprNode {
    node(ExprNodeKind::Switch {
        scrutinee: Box::new(scrutinee),
        cases: cases
            .into_iter()
            .map(|(value, result)| SwitchCase { value, result })
            .collect(),
        otherwise: otherwise.map(Box::new),
    })
}

pub fn match_arm(variant: &str, bindings: MatchBindings, body: ExprNode) -> MatchArmNode {
    MatchArmNode {
        pos: Pos::default(),
        variant: variant.to_string(),
        bindings,
        body,
    }
}

pub fn match_expr(
    scrutinee: ExprNode,
    arms: Vec<MatchArmNode>,
    remainder: Option<(Option<&str>, ExprNode)>,
) -> ExprNode {
    node(ExprNodeKind::Match {
        scrutinee: Box::new(scrutinee),
        arms,
        remainder: remainder.map(|(name, body)| RemainderNode {
            name: name.map(str::to_string),
            body: Box::new(body),
        }),
    })
}

pub fn optional_of(inner: ExprNode) -> ExprNode {
    node(ExprNodeKind::OptionalOf {
        inner: Box::new(inner),
    })
}

pub fn optional_empty() -> ExprNode {
    node(ExprNodeKind::OptionalEmpty)
}

pub fn optional_use(inner: ExprNode) -> ExprNode {
    node(ExprNodeKind::OptionalUse {
        inner: Box::new(inner),
    })
}

pub fn default(value: ExprNode, fallback: ExprNode) -> ExprNode {
    node(ExprNodeKind::Default {
        value: Box::new(value),
        fallback: Box::new(fallback),
    })
}

pub fn call(function: &str, arguments: Vec<ExprNode>) -> ExprNode {
    node(ExprNodeKind::Call {
        function: function.to_string(),
        arguments,
    })
}

pub fn for_each(name: &str, source: ExprNode, collector: CollectorNode) -> ExprNode {
    node(ExprNodeKind::For {
        name: name.to_string(),
        source: Box::new(source),
        collector,
    })
}

pub fn tabulate(columns: Vec<(&str, Vec<ExprNode>)>) -> ExprNode {
    node(ExprNodeKind::Tabulate {
        columns: columns
            .into_iter()
            .map(|(name, values)| TabulateColumn {
                name: name.to_string(),
                values,
            })
            .collect(),
    })
}

pub fn regex_bind(value: ExprNode, pattern: &str) -> ExprNode {
    node(ExprNodeKind::RegexBinding {
        value: Box::new(value),
        pattern: pattern.to_string(),
    })
}

/// Text and expressions alternate; `Err` pieces are expressions.
pub fn interpolate(parts: Vec<Result<&str, ExprNode>>) -> ExprNode {
    node(ExprNodeKind::Interpolation {
        parts: parts
            .into_iter()
            .map(|part| match part {
                Ok(text) => InterpolationPart::Text {
                    text: text.to_string(),
                },
                Err(value) => InterpolationPart::Expr { value },
            })
            .collect(),
    })
}

// ── Collectors ─────────────────────────────────────────────────────────

pub fn collect_list(value: ExprNode) -> CollectorNode {
    CollectorNode::List {
        value: Box::new(value),
    }
}

pub fn collect_first(value: ExprNode, default: Option<ExprNode>) -> CollectorNode {
    CollectorNode::First {
        value: Box::new(value),
        default: default.map(Box::new),
    }
}

pub fn collect_max(value: ExprNode, default: Option<ExprNode>) -> CollectorNode {
    CollectorNode::Max {
        value: Box::new(value),
        default: default.map(Box::new),
    }
}

pub fn collect_sum(value: ExprNode) -> CollectorNode {
    CollectorNode::Sum {
        value: Box::new(value),
    }
}

pub fn collect_where(condition: ExprNode, inner: CollectorNode) -> CollectorNode {
    CollectorNode::Where {
        condition: Box::new(condition),
        inner: Box::new(inner),
    }
}

// ── Clauses ────────────────────────────────────────────────────────────

pub fn where_clause(condition: ExprNode) -> ClauseNode {
    ClauseNode::Where {
        pos: Pos::default(),
        condition,
    }
}

pub fn let_clause(arguments: Vec<(&str, ExprNode)>) -> ClauseNode {
    ClauseNode::Let {
        pos: Pos::default(),
        arguments: arguments
            .into_iter()
            .map(|(name, value)| LetArgument {
                name: name.to_string(),
                value,
                signable: false,
            })
            .collect(),
    }
}

pub fn let_signable(name: &str, value: ExprNode) -> ClauseNode {
    ClauseNode::Let {
        pos: Pos::default(),
        arguments: vec![LetArgument {
            name: name.to_string(),
            value,
            signable: true,
        }],
    }
}

pub fn group_clause(discriminators: Vec<&str>, collectors: Vec<(&str, CollectorNode)>) -> ClauseNode {
    ClauseNode::Group {
        pos: Pos::default(),
        discriminators: discriminators
            .into_iter()
            .map(|name| DiscriminatorNode {
                pos: Pos::default(),
                name: name.to_string(),
                value: None,
            })
            .collect(),
        collectors: collectors
            .into_iter()
            .map(|(name, collector)| CollectNode {
                pos: Pos::default(),
                name: name.to_string(),
                collector,
            })
            .collect(),
    }
}

pub fn call_clause(name: &str, arguments: Vec<ExprNode>) -> ClauseNode {
    ClauseNode::Call {
        pos: Pos::default(),
        name: name.to_string(),
        arguments,
    }
}

pub fn define(name: &str, parameters: &[(&str, &str)], clauses: Vec<ClauseNode>) -> DefineNode {
    DefineNode {
        pos: Pos::default(),
        name: name.to_string(),
        parameters: parameters
            .iter()
            .map(|(name, ty)| ParameterNode {
                name: name.to_string(),
                ty: ty.to_string(),
            })
            .collect(),
        clauses,
    }
}

fn arguments(arguments: Vec<(&str, ExprNode)>) -> Vec<ArgumentNode> {
    arguments
        .into_iter()
        .map(|(name, value)| ArgumentNode {
            pos: Pos::default(),
            name: name.to_string(),
            value,
        })
        .collect()
}

pub fn alert(
    labels: Vec<(&str, ExprNode)>,
    annotations: Vec<(&str, ExprNode)>,
    ttl: ExprNode,
) -> TerminalNode {
    TerminalNode::Alert {
        pos: Pos::default(),
        labels: arguments(labels),
        annotations: arguments(annotations),
        ttl: Box::new(ttl),
    }
}

pub fn run(action: &str, arguments: Vec<(&str, ExprNode)>) -> TerminalNode {
    TerminalNode::Run {
        pos: Pos::default(),
        action: action.to_string(),
        arguments: self::arguments(arguments),
    }
}

pub fn olive(clauses: Vec<ClauseNode>, terminal: TerminalNode) -> OliveNode {
    OliveNode {
        pos: Pos::default(),
        description: None,
        clauses,
        terminal,
    }
}
