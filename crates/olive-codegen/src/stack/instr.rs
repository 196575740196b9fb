//! Instructions and type shapes of the stack machine.

use std::fmt;
use std::sync::Arc;

use olive_rt::{Primitive, Value};
use olive_typeck::tir::CompareOp;
use rustc_hash::FxHashMap;

/// Index into [`Module::shapes`].
pub type ShapeId = usize;

/// Index into [`Module::functions`].
pub type FunctionId = usize;

#[derive(Debug, Clone)]
pub enum Instr {
    Push(Value),
    Load(usize),
    Store(usize),
    /// Read a registry constant.
    Constant(Arc<str>),
    /// Pop `n` values into a tuple.
    Tuple(usize),
    TupleGet(usize),
    /// Pop `n` payload values into an algebraic value.
    Algebraic(Arc<str>, usize),
    Tag,
    Payload(usize),
    Some,
    None,
    IsPresent,
    Unwrap,
    Not,
    /// Pop a comparison result and push whether it satisfies the operator.
    Order(CompareOp),
    /// Skip forward.
    Jump(usize),
    /// Pop a boolean and skip forward if it is false.
    JumpUnless(usize),
    CallNative(Arc<str>, usize),
    CallFunction(FunctionId, usize),
    Primitive(Box<Primitive>, usize),
    /// Pop `n` captured values and push a closure over the function.
    Closure(FunctionId, usize),
    Compare(ShapeId),
    Equal(ShapeId),
    Hash(ShapeId),
    Comparator(ShapeId),
    Equality(ShapeId),
    Hasher(ShapeId),
}

/// What the machine needs to know about a type to order and hash its
/// values.
#[derive(Debug, Clone, PartialEq)]
pub enum Shape {
    /// `nothing`: every value is equal.
    Opaque,
    Bool,
    /// Integers and dates.
    Int,
    Float,
    /// Strings and paths.
    Str,
    Json,
    List(ShapeId),
    Map(ShapeId, ShapeId),
    /// Tuples, objects and records.
    Fields(Vec<ShapeId>),
    Optional(ShapeId),
    Algebraic(Vec<(Arc<str>, Vec<ShapeId>)>),
}

#[derive(Debug, Clone)]
pub struct Function {
    pub name: String,
    pub captures: usize,
    pub parameters: usize,
    /// Captures, then parameters, then locals.
    pub slots: usize,
    pub code: Vec<Instr>,
}

/// Everything one compile produced.
#[derive(Debug, Default)]
pub struct Module {
    pub functions: Vec<Function>,
    pub shapes: Vec<Shape>,
    /// Top-level functions by name.
    pub names: FxHashMap<String, FunctionId>,
}

impl fmt::Display for Instr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Instr::Push(value) => write!(f, "push {value}"),
            Instr::Load(slot) => write!(f, "load {slot}"),
            Instr::Store(slot) => write!(f, "store {slot}"),
            Instr::Constant(name) => write!(f, "constant {name}"),
            Instr::Tuple(n) => write!(f, "tuple {n}"),
            Instr::TupleGet(i) => write!(f, "get {i}"),
            Instr::Algebraic(tag, n) => write!(f, "variant {tag} {n}"),
            Instr::Tag => write!(f, "tag"),
            Instr::Payload(i) => write!(f, "payload {i}"),
            Instr::Some => write!(f, "some"),
            Instr::None => write!(f, "none"),
            Instr::IsPresent => write!(f, "present"),
            Instr::Unwrap => write!(f, "unwrap"),
            Instr::Not => write!(f, "not"),
            Instr::Order(op) => write!(f, "order {op:?}"),
            Instr::Jump(n) => write!(f, "jump +{n}"),
            Instr::JumpUnless(n) => write!(f, "jump-unless +{n}"),
            Instr::CallNative(name, n) => write!(f, "native {name} {n}"),
            Instr::CallFunction(id, n) => write!(f, "call #{id} {n}"),
            Instr::Primitive(p, n) => write!(f, "prim {p} {n}"),
            Instr::Closure(id, n) => write!(f, "closure #{id} {n}"),
            Instr::Compare(s) => write!(f, "compare %{s}"),
            Instr::Equal(s) => write!(f, "equal %{s}"),
            Instr::Hash(s) => write!(f, "hash %{s}"),
            Instr::Comparator(s) => write!(f, "comparator %{s}"),
            Instr::Equality(s) => write!(f, "equality %{s}"),
            Instr::Hasher(s) => write!(f, "hasher %{s}"),
        }
    }
}

/// Listing of every shape and function, for `olivec build`.
impl fmt::Display for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (id, shape) in self.shapes.iter().enumerate() {
            writeln!(f, "%{id} = {shape:?}")?;
        }
        for (id, function) in self.functions.iter().enumerate() {
            writeln!(
                f,
                "\n#{id} {} (captures {}, parameters {}, slots {}):",
                function.name, function.captures, function.parameters, function.slots
            )?;
            for (pc, instr) in function.code.iter().enumerate() {
                writeln!(f, "  {pc:4}  {instr}")?;
            }
        }
        Ok(())
    }
}
