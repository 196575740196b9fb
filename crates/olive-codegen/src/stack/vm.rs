//! The stack machine.

use std::fmt;
use std::sync::Arc;

use olive_rt::compare::{
    compare_bool, compare_float, compare_int, compare_json, compare_lists, compare_maps,
    compare_str, hash_list, hash_map, holds,
};
use olive_rt::{hash, Callable, RuntimeContext, RuntimeError, Value};
use tracing::trace;

use super::instr::{Function, FunctionId, Instr, Module, Shape, ShapeId};

/// A module bound to the context it reads constants and natives from.
#[derive(Clone)]
pub struct Machine {
    module: Arc<Module>,
    context: RuntimeContext,
}

#[derive(Debug, Clone, Copy)]
enum ShapeOp {
    Compare,
    Equal,
    Hash,
}

/// A closure built by a `Closure` instruction.
struct VmClosure {
    machine: Machine,
    function: FunctionId,
    captures: Vec<Value>,
}

/// A comparator, equality or hasher over one shape.
struct ShapeClosure {
    machine: Machine,
    op: ShapeOp,
    shape: ShapeId,
}

fn pop(stack: &mut Vec<Value>) -> Result<Value, RuntimeError> {
    stack
        .pop()
        .ok_or_else(|| RuntimeError::malformed("stack underflow"))
}

fn pop_n(stack: &mut Vec<Value>, n: usize) -> Result<Vec<Value>, RuntimeError> {
    let start = stack
        .len()
        .checked_sub(n)
        .ok_or_else(|| RuntimeError::malformed("stack underflow"))?;
    Ok(stack.split_off(start))
}

impl Machine {
    pub fn new(module: Arc<Module>, context: RuntimeContext) -> Self {
        Machine { module, context }
    }

    fn function(&self, id: FunctionId) -> Result<&Function, RuntimeError> {
        self.module
            .functions
            .get(id)
            .ok_or_else(|| RuntimeError::malformed(format!("no function #{id}")))
    }

    fn shape(&self, id: ShapeId) -> Result<&Shape, RuntimeError> {
        self.module
            .shapes
            .get(id)
            .ok_or_else(|| RuntimeError::malformed(format!("no shape %{id}")))
    }

    pub fn invoke(
        &self,
        id: FunctionId,
        captures: &[Value],
        arguments: &[Value],
    ) -> Result<Value, RuntimeError> {
        let function = self.function(id)?;
        if arguments.len() != function.parameters {
            return Err(RuntimeError::Arity {
                name: function.name.clone(),
                expected: function.parameters,
                found: arguments.len(),
            });
        }
        if captures.len() != function.captures {
            return Err(RuntimeError::malformed(format!(
                "{} captures {} values, given {}",
                function.name,
                function.captures,
                captures.len()
            )));
        }
        let mut slots = Vec::with_capacity(function.slots);
        slots.extend_from_slice(captures);
        slots.extend_from_slice(arguments);
        slots.resize(function.slots, Value::Unit);
        self.execute(function, slots)
    }

    fn execute(&self, function: &Function, mut slots: Vec<Value>) -> Result<Value, RuntimeError> {
        let mut stack: Vec<Value> = Vec::with_capacity(8);
        let mut pc = 0;
        while let Some(instr) = function.code.get(pc) {
            pc += 1;
            match instr {
                Instr::Push(value) => stack.push(value.clone()),
                Instr::Load(slot) => {
                    let value = slots
                        .get(*slot)
                        .ok_or_else(|| RuntimeError::malformed(format!("no slot {slot}")))?;
                    stack.push(value.clone());
                }
                Instr::Store(slot) => {
                    let value = pop(&mut stack)?;
                    *slots
                        .get_mut(*slot)
                        .ok_or_else(|| RuntimeError::malformed(format!("no slot {slot}")))? = value;
                }
                Instr::Constant(name) => stack.push(self.context.constant(name)?),
                Instr::Tuple(n) => {
                    let items = pop_n(&mut stack, *n)?;
                    stack.push(Value::tuple(items));
                }
                Instr::TupleGet(index) => {
                    let tuple = pop(&mut stack)?;
                    stack.push(tuple.get(*index)?.clone());
                }
                Instr::Algebraic(tag, n) => {
                    let payload = pop_n(&mut stack, *n)?;
                    stack.push(Value::Algebraic(tag.clone(), payload.into()));
                }
                Instr::Tag => {
                    let value = pop(&mut stack)?;
                    let (tag, _) = value.as_algebraic()?;
                    stack.push(Value::str(tag));
                }
                Instr::Payload(index) => {
                    let value = pop(&mut stack)?;
                    let (_, payload) = value.as_algebraic()?;
                    let element = payload.get(*index).ok_or(RuntimeError::Index {
                        index: *index,
                        len: payload.len(),
                    })?;
                    stack.push(element.clone());
                }
                Instr::Some => {
                    let value = pop(&mut stack)?;
                    stack.push(Value::some(value));
                }
                Instr::None => stack.push(Value::none()),
                Instr::IsPresent => {
                    let value = pop(&mut stack)?;
                    stack.push(Value::Bool(value.as_optional()?.is_some()));
                }
                Instr::Unwrap => {
                    let value = pop(&mut stack)?;
                    let inner = value.as_optional()?.ok_or(RuntimeError::EmptyOptional)?;
                    stack.push(inner.clone());
                }
                Instr::Not => {
                    let value = pop(&mut stack)?;
                    stack.push(Value::Bool(!value.as_bool()?));
                }
                Instr::Order(op) => {
                    let compared = pop(&mut stack)?;
                    stack.push(Value::Bool(holds(*op, compared.as_int()?)));
                }
                Instr::Jump(n) => pc += n,
                Instr::JumpUnless(n) => {
                    if !pop(&mut stack)?.as_bool()? {
                        pc += n;
                    }
                }
                Instr::CallNative(name, n) => {
                    let arguments = pop_n(&mut stack, *n)?;
                    stack.push(self.context.call_native(name, &arguments)?);
                }
                Instr::CallFunction(id, n) => {
                    let arguments = pop_n(&mut stack, *n)?;
                    stack.push(self.invoke(*id, &[], &arguments)?);
                }
                Instr::Primitive(primitive, n) => {
                    let arguments = pop_n(&mut stack, *n)?;
                    stack.push(primitive.apply(&arguments)?);
                }
                Instr::Closure(id, n) => {
                    let captures = pop_n(&mut stack, *n)?;
                    stack.push(Value::closure(VmClosure {
                        machine: self.clone(),
                        function: *id,
                        captures,
                    }));
                }
                Instr::Compare(shape) => {
                    let right = pop(&mut stack)?;
                    let left = pop(&mut stack)?;
                    stack.push(Value::Int(self.compare(*shape, &left, &right)?));
                }
                Instr::Equal(shape) => {
                    let right = pop(&mut stack)?;
                    let left = pop(&mut stack)?;
                    stack.push(Value::Bool(self.compare(*shape, &left, &right)? == 0));
                }
                Instr::Hash(shape) => {
                    let value = pop(&mut stack)?;
                    stack.push(Value::Int(self.hash(*shape, &value)?));
                }
                Instr::Comparator(shape) => stack.push(self.shape_closure(ShapeOp::Compare, *shape)),
                Instr::Equality(shape) => stack.push(self.shape_closure(ShapeOp::Equal, *shape)),
                Instr::Hasher(shape) => stack.push(self.shape_closure(ShapeOp::Hash, *shape)),
            }
        }
        let result = pop(&mut stack)?;
        if !stack.is_empty() {
            trace!(function = %function.name, left = stack.len(), "values left on the stack");
        }
        Ok(result)
    }

    fn shape_closure(&self, op: ShapeOp, shape: ShapeId) -> Value {
        Value::closure(ShapeClosure {
            machine: self.clone(),
            op,
            shape,
        })
    }

    pub fn compare(&self, shape: ShapeId, a: &Value, b: &Value) -> Result<i64, RuntimeError> {
        Ok(match self.shape(shape)? {
            Shape::Opaque => 0,
            Shape::Bool => compare_bool(a.as_bool()?, b.as_bool()?),
            Shape::Int => compare_int(a.as_int()?, b.as_int()?),
            Shape::Float => compare_float(a.as_float()?, b.as_float()?),
            Shape::Str => compare_str(a.as_str()?, b.as_str()?),
            Shape::Json => compare_json(a.as_json()?, b.as_json()?),
            Shape::List(element) => {
                let comparator = self.shape_closure(ShapeOp::Compare, *element);
                compare_lists(a.as_list()?, b.as_list()?, &comparator)?
            }
            Shape::Map(key, value) => {
                let keys = self.shape_closure(ShapeOp::Compare, *key);
                let values = self.shape_closure(ShapeOp::Compare, *value);
                compare_maps(a.as_map()?, b.as_map()?, &keys, &values)?
            }
            Shape::Fields(fields) => self.compare_fields(fields, a.as_tuple()?, b.as_tuple()?)?,
            Shape::Optional(inner) => match (a.as_optional()?, b.as_optional()?) {
                (None, None) => 0,
                (None, Some(_)) => -1,
                (Some(_), None) => 1,
                (Some(x), Some(y)) => self.compare(*inner, x, y)?,
            },
            Shape::Algebraic(variants) => {
                let (a_tag, a_payload) = a.as_algebraic()?;
                let (b_tag, b_payload) = b.as_algebraic()?;
                let c = compare_str(a_tag, b_tag);
                if c != 0 {
                    return Ok(c);
                }
                let fields = variant(variants, a_tag)?;
                self.compare_fields(fields, a_payload, b_payload)?
            }
        })
    }

    fn compare_fields(&self, fields: &[ShapeId], a: &[Value], b: &[Value]) -> Result<i64, RuntimeError> {
        for ((shape, x), y) in fields.iter().zip(a).zip(b) {
            let c = self.compare(*shape, x, y)?;
            if c != 0 {
                return Ok(c);
            }
        }
        Ok(0)
    }

    pub fn hash(&self, shape: ShapeId, value: &Value) -> Result<i64, RuntimeError> {
        Ok(match self.shape(shape)? {
            Shape::Opaque => hash::seed(),
            Shape::Bool => hash::hash_bool(value.as_bool()?),
            Shape::Int => hash::hash_int(value.as_int()?),
            Shape::Float => hash::hash_float(value.as_float()?),
            Shape::Str => hash::hash_str(value.as_str()?),
            Shape::Json => hash::hash_json(value.as_json()?),
            Shape::List(element) => {
                hash_list(value.as_list()?, &self.shape_closure(ShapeOp::Hash, *element))?
            }
            Shape::Map(key, val) => hash_map(
                value.as_map()?,
                &self.shape_closure(ShapeOp::Hash, *key),
                &self.shape_closure(ShapeOp::Hash, *val),
            )?,
            Shape::Fields(fields) => self.hash_fields(hash::seed(), fields, value.as_tuple()?)?,
            Shape::Optional(inner) => match value.as_optional()? {
                None => hash::hash_bool(false),
                Some(x) => hash::combine(hash::hash_bool(true), self.hash(*inner, x)?),
            },
            Shape::Algebraic(variants) => {
                let (tag, payload) = value.as_algebraic()?;
                self.hash_fields(hash::hash_str(tag), variant(variants, tag)?, payload)?
            }
        })
    }

    fn hash_fields(&self, seed: i64, fields: &[ShapeId], values: &[Value]) -> Result<i64, RuntimeError> {
        let mut h = seed;
        for (shape, value) in fields.iter().zip(values) {
            h = hash::combine(h, self.hash(*shape, value)?);
        }
        Ok(h)
    }
}

fn variant<'a>(variants: &'a [(Arc<str>, Vec<ShapeId>)], tag: &str) -> Result<&'a [ShapeId], RuntimeError> {
    variants
        .iter()
        .find(|(t, _)| &**t == tag)
        .map(|(_, fields)| fields.as_slice())
        .ok_or_else(|| RuntimeError::malformed(format!("no variant {tag}")))
}

impl fmt::Debug for Machine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Machine")
            .field("functions", &self.module.functions.len())
            .finish_non_exhaustive()
    }
}

impl fmt::Debug for VmClosure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.machine.function(self.function) {
            Ok(function) => write!(f, "<{}>", function.name),
            Err(_) => write!(f, "<#{}>", self.function),
        }
    }
}

impl Callable for VmClosure {
    fn call(&self, args: &[Value]) -> Result<Value, RuntimeError> {
        self.machine.invoke(self.function, &self.captures, args)
    }
}

impl fmt::Debug for ShapeClosure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{:?} %{}>", self.op, self.shape)
    }
}

impl Callable for ShapeClosure {
    fn call(&self, args: &[Value]) -> Result<Value, RuntimeError> {
        let arg = |i: usize| {
            args.get(i)
                .ok_or_else(|| RuntimeError::malformed(format!("{:?} needs {} arguments", self.op, i + 1)))
        };
        Ok(match self.op {
            ShapeOp::Compare => Value::Int(self.machine.compare(self.shape, arg(0)?, arg(1)?)?),
            ShapeOp::Equal => Value::Bool(self.machine.compare(self.shape, arg(0)?, arg(1)?)? == 0),
            ShapeOp::Hash => Value::Int(self.machine.hash(self.shape, arg(0)?)?),
        })
    }
}
