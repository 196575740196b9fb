use std::fmt;

use olive_common::Pos;
use serde::{Deserialize, Serialize};

// ── Programs ───────────────────────────────────────────────────────────

/// A complete olive program: one input format, helper functions, pipelines.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Program {
    /// Name of the input format every olive reads.
    pub input: String,
    #[serde(default)]
    pub functions: Vec<FunctionNode>,
    /// Reusable clause sequences for `Call` and `Matches`.
    #[serde(default)]
    pub definitions: Vec<DefineNode>,
    #[serde(default)]
    pub olives: Vec<OliveNode>,
}

/// A program-level function. Parameter and return types are descriptors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionNode {
    #[serde(default)]
    pub pos: Pos,
    pub name: String,
    #[serde(default)]
    pub parameters: Vec<ParameterNode>,
    #[serde(default)]
    pub return_type: Option<String>,
    pub body: ExprNode,
    #[serde(default)]
    pub exported: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterNode {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: String,
}

/// One pipeline: clauses applied in order, then a terminal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OliveNode {
    #[serde(default)]
    pub pos: Pos,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub clauses: Vec<ClauseNode>,
    pub terminal: TerminalNode,
}

/// `Define name(parameters) clauses`: a pipeline prefix with no terminal.
///
/// Parameters are constants inside the clauses; the stream a call leaves
/// behind is whatever the clauses produce.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DefineNode {
    #[serde(default)]
    pub pos: Pos,
    pub name: String,
    #[serde(default)]
    pub parameters: Vec<ParameterNode>,
    #[serde(default)]
    pub clauses: Vec<ClauseNode>,
}

// ── Clauses ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "clause")]
pub enum ClauseNode {
    Where {
        #[serde(default)]
        pos: Pos,
        condition: ExprNode,
    },
    Let {
        #[serde(default)]
        pos: Pos,
        arguments: Vec<LetArgument>,
    },
    Require {
        #[serde(default)]
        pos: Pos,
        name: String,
        value: ExprNode,
        #[serde(default)]
        handlers: Vec<RejectNode>,
    },
    Reject {
        #[serde(default)]
        pos: Pos,
        condition: ExprNode,
        #[serde(default)]
        handlers: Vec<RejectNode>,
    },
    Flatten {
        #[serde(default)]
        pos: Pos,
        target: FlattenTarget,
        source: ExprNode,
    },
    Group {
        #[serde(default)]
        pos: Pos,
        discriminators: Vec<DiscriminatorNode>,
        collectors: Vec<CollectNode>,
    },
    Join {
        #[serde(default)]
        pos: Pos,
        format: String,
        outer_key: ExprNode,
        inner_key: ExprNode,
    },
    LeftJoin {
        #[serde(default)]
        pos: Pos,
        format: String,
        outer_key: ExprNode,
        inner_key: ExprNode,
        collectors: Vec<CollectNode>,
    },
    Pick {
        #[serde(default)]
        pos: Pos,
        max: bool,
        score: ExprNode,
        discriminators: Vec<String>,
    },
    Monitor {
        #[serde(default)]
        pos: Pos,
        metric: String,
        #[serde(default)]
        help: String,
        #[serde(default)]
        labels: Vec<LabelNode>,
    },
    Dump {
        #[serde(default)]
        pos: Pos,
        dumper: String,
        columns: Vec<ExprNode>,
    },
    /// Splice in the clauses of a `Define`.
    Call {
        #[serde(default)]
        pos: Pos,
        name: String,
        #[serde(default)]
        arguments: Vec<ExprNode>,
    },
    /// Older spelling of `Call`; a define without `Group` leaves the stream
    /// pure.
    Matches {
        #[serde(default)]
        pos: Pos,
        name: String,
        #[serde(default)]
        arguments: Vec<ExprNode>,
    },
}

impl ClauseNode {
    pub fn pos(&self) -> Pos {
        match self {
            Self::Where { pos, .. }
            | Self::Let { pos, .. }
            | Self::Require { pos, .. }
            | Self::Reject { pos, .. }
            | Self::Flatten { pos, .. }
            | Self::Group { pos, .. }
            | Self::Join { pos, .. }
            | Self::LeftJoin { pos, .. }
            | Self::Pick { pos, .. }
            | Self::Monitor { pos, .. }
            | Self::Dump { pos, .. }
            | Self::Call { pos, .. }
            | Self::Matches { pos, .. } => *pos,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LetArgument {
    pub name: String,
    pub value: ExprNode,
    /// `Let Signable name = ...`: the value joins the signature provenance.
    #[serde(default)]
    pub signable: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "target")]
pub enum FlattenTarget {
    Name { name: String },
    /// `Flatten * In ...`: fields of the element object are bound on demand.
    Wildcard,
}

/// `By name` or `By name = expr`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscriminatorNode {
    #[serde(default)]
    pub pos: Pos,
    pub name: String,
    #[serde(default)]
    pub value: Option<ExprNode>,
}

/// `name = collector` inside a `Group` or `LeftJoin`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectNode {
    #[serde(default)]
    pub pos: Pos,
    pub name: String,
    pub collector: CollectorNode,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabelNode {
    pub name: String,
    pub value: ExprNode,
}

/// Side effects run when `Require` or `Reject` drops a record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "handler")]
pub enum RejectNode {
    Monitor {
        metric: String,
        #[serde(default)]
        help: String,
        #[serde(default)]
        labels: Vec<LabelNode>,
    },
    Dump {
        dumper: String,
        columns: Vec<ExprNode>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "terminal")]
pub enum TerminalNode {
    Run {
        #[serde(default)]
        pos: Pos,
        action: String,
        #[serde(default)]
        arguments: Vec<ArgumentNode>,
    },
    Refill {
        #[serde(default)]
        pos: Pos,
        refiller: String,
        #[serde(default)]
        arguments: Vec<ArgumentNode>,
    },
    /// Raise an alert per record. Every label and annotation is a string;
    /// `ttl` is in seconds.
    Alert {
        #[serde(default)]
        pos: Pos,
        labels: Vec<ArgumentNode>,
        #[serde(default)]
        annotations: Vec<ArgumentNode>,
        ttl: Box<ExprNode>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArgumentNode {
    #[serde(default)]
    pub pos: Pos,
    pub name: String,
    pub value: ExprNode,
}

// ── Collectors ─────────────────────────────────────────────────────────

/// Reduction over a group of records (or the elements of a `For`).
///
/// `First`, `Max`, `Min` and `Univalued` can come up empty. Without a
/// `default`, a group drops the record and a `For` yields an optional.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "collector")]
pub enum CollectorNode {
    Count,
    List {
        value: Box<ExprNode>,
    },
    Flatten {
        value: Box<ExprNode>,
    },
    Sum {
        value: Box<ExprNode>,
    },
    First {
        value: Box<ExprNode>,
        #[serde(default)]
        default: Option<Box<ExprNode>>,
    },
    Max {
        value: Box<ExprNode>,
        #[serde(default)]
        default: Option<Box<ExprNode>>,
    },
    Min {
        value: Box<ExprNode>,
        #[serde(default)]
        default: Option<Box<ExprNode>>,
    },
    Univalued {
        value: Box<ExprNode>,
        #[serde(default)]
        default: Option<Box<ExprNode>>,
    },
    LexicalConcat {
        value: Box<ExprNode>,
        delimiter: Box<ExprNode>,
    },
    Any {
        value: Box<ExprNode>,
    },
    All {
        value: Box<ExprNode>,
    },
    Where {
        condition: Box<ExprNode>,
        inner: Box<CollectorNode>,
    },
}

// ── Expressions ────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExprNode {
    #[serde(default)]
    pub pos: Pos,
    #[serde(flatten)]
    pub kind: ExprNodeKind,
}

impl ExprNode {
    pub fn new(pos: Pos, kind: ExprNodeKind) -> Self {
        Self { pos, kind }
    }

    /// Re-position a node; handy when building trees by hand.
    pub fn at(mut self, line: u32, column: u32) -> Self {
        self.pos = Pos::new(line, column);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "expr")]
pub enum ExprNodeKind {
    Boolean {
        value: bool,
    },
    Integer {
        value: i64,
    },
    Float {
        value: f64,
    },
    String {
        value: String,
    },
    /// Seconds since the Unix epoch.
    Date {
        epoch: i64,
    },
    Path {
        value: String,
    },
    Json {
        value: serde_json::Value,
    },
    Variable {
        name: String,
    },
    Tuple {
        elements: Vec<ExprNode>,
    },
    TupleGet {
        tuple: Box<ExprNode>,
        index: usize,
    },
    Object {
        fields: Vec<FieldNode>,
    },
    Field {
        object: Box<ExprNode>,
        field: String,
    },
    List {
        elements: Vec<ExprNode>,
    },
    Dictionary {
        entries: Vec<EntryNode>,
    },
    DictionaryGet {
        dictionary: Box<ExprNode>,
        key: Box<ExprNode>,
    },
    Algebraic {
        name: String,
        payload: PayloadNode,
    },
    Binary {
        op: BinaryOp,
        left: Box<ExprNode>,
        right: Box<ExprNode>,
    },
    Unary {
        op: UnaryOp,
        operand: Box<ExprNode>,
    },
    If {
        condition: Box<ExprNode>,
        then: Box<ExprNode>,
        otherwise: Box<ExprNode>,
    },
    Switch {
        scrutinee: Box<ExprNode>,
        cases: Vec<SwitchCase>,
        #[serde(default)]
        otherwise: Option<Box<ExprNode>>,
    },
    Match {
        scrutinee: Box<ExprNode>,
        arms: Vec<MatchArmNode>,
        #[serde(default)]
        remainder: Option<RemainderNode>,
    },
    /// `` `expr` ``: every `expr?` inside must be present or the result is empty.
    OptionalOf {
        inner: Box<ExprNode>,
    },
    OptionalEmpty,
    OptionalUse {
        inner: Box<ExprNode>,
    },
    Default {
        value: Box<ExprNode>,
        fallback: Box<ExprNode>,
    },
    Call {
        function: String,
        #[serde(default)]
        arguments: Vec<ExprNode>,
    },
    For {
        name: String,
        source: Box<ExprNode>,
        collector: CollectorNode,
    },
    /// Columns of equal length, pivoted into an object of dictionaries
    /// keyed by row number.
    Tabulate {
        columns: Vec<TabulateColumn>,
    },
    /// `value ~ /pattern/`: the capture groups if the whole string matches.
    RegexBinding {
        value: Box<ExprNode>,
        pattern: String,
    },
    /// `"text {expr} text"`
    Interpolation {
        parts: Vec<InterpolationPart>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TabulateColumn {
    pub name: String,
    pub values: Vec<ExprNode>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "part")]
pub enum InterpolationPart {
    Text { text: String },
    Expr { value: ExprNode },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldNode {
    pub name: String,
    pub value: ExprNode,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryNode {
    pub key: ExprNode,
    pub value: ExprNode,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "shape")]
pub enum PayloadNode {
    Empty,
    Tuple { elements: Vec<ExprNode> },
    Object { fields: Vec<FieldNode> },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SwitchCase {
    pub value: ExprNode,
    pub result: ExprNode,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchArmNode {
    #[serde(default)]
    pub pos: Pos,
    pub variant: String,
    pub bindings: MatchBindings,
    pub body: ExprNode,
}

/// How a match arm takes apart the payload. `_` discards a position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "shape")]
pub enum MatchBindings {
    Empty,
    Tuple { names: Vec<String> },
    Object { fields: Vec<FieldBinding> },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldBinding {
    pub field: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemainderNode {
    #[serde(default)]
    pub name: Option<String>,
    pub body: Box<ExprNode>,
}

// ── Operators ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BinaryOp {
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulo,
    Equal,
    NotEqual,
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
    And,
    Or,
}

impl BinaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            Self::Add => "+",
            Self::Subtract => "-",
            Self::Multiply => "*",
            Self::Divide => "/",
            Self::Modulo => "%",
            Self::Equal => "==",
            Self::NotEqual => "!=",
            Self::Less => "<",
            Self::LessEqual => "<=",
            Self::Greater => ">",
            Self::GreaterEqual => ">=",
            Self::And => "&&",
            Self::Or => "||",
        }
    }

    pub fn is_ordering(self) -> bool {
        matches!(
            self,
            Self::Less | Self::LessEqual | Self::Greater | Self::GreaterEqual
        )
    }
}

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UnaryOp {
    Negate,
    Not,
}

impl fmt::Display for UnaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Negate => f.write_str("-"),
            Self::Not => f.write_str("!"),
        }
    }
}
