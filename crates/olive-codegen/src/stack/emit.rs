//! Code generation for the stack machine.

use std::sync::Arc;

use olive_rt::{Primitive, Value};
use olive_typeck::ir::RecordShape;
use olive_typeck::tir::{CompareOp, Literal};
use olive_typeck::Type;
use rustc_hash::FxHashMap;
use tracing::trace;

use super::instr::{Function, FunctionId, Instr, Module, Shape, ShapeId};
use super::StackProgram;
use crate::artifact::ProgramMeta;
use crate::backend::Backend;
use crate::error::InternalError;

/// A function whose body is still being generated.
struct Frame {
    id: FunctionId,
    name: String,
    /// Innermost last.
    scopes: Vec<(String, usize)>,
    next_slot: usize,
    captures: usize,
    parameters: usize,
}

#[derive(Default)]
pub struct StackBackend {
    functions: Vec<Option<Function>>,
    names: FxHashMap<String, FunctionId>,
    frames: Vec<Frame>,
    shapes: Vec<Shape>,
    shape_ids: FxHashMap<String, ShapeId>,
}

pub fn literal_value(literal: &Literal) -> Value {
    match literal {
        Literal::Boolean(b) => Value::Bool(*b),
        Literal::Integer(i) => Value::Int(*i),
        Literal::Float(x) => Value::Float(*x),
        Literal::String(s) => Value::str(s),
        Literal::Date(d) => Value::Date(*d),
        Literal::Path(p) => Value::path(p),
        Literal::Json(j) => Value::json(j.clone()),
    }
}

fn concat(parts: impl IntoIterator<Item = Vec<Instr>>) -> Vec<Instr> {
    parts.into_iter().flatten().collect()
}

impl StackBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn frame(&mut self) -> Result<&mut Frame, InternalError> {
        self.frames.last_mut().ok_or(InternalError::NoFunction)
    }

    fn open(&mut self, name: String, captures: &[String], parameters: &[String]) -> FunctionId {
        let id = self.functions.len();
        self.functions.push(None);
        trace!(id, %name, "begin function");
        let scopes: Vec<(String, usize)> = captures
            .iter()
            .chain(parameters)
            .enumerate()
            .map(|(slot, n)| (n.clone(), slot))
            .collect();
        self.frames.push(Frame {
            id,
            name,
            next_slot: scopes.len(),
            scopes,
            captures: captures.len(),
            parameters: parameters.len(),
        });
        id
    }

    fn close(&mut self, body: Vec<Instr>) -> Result<FunctionId, InternalError> {
        let frame = self.frames.pop().ok_or(InternalError::NoFunction)?;
        self.functions[frame.id] = Some(Function {
            name: frame.name,
            captures: frame.captures,
            parameters: frame.parameters,
            slots: frame.next_slot,
            code: body,
        });
        Ok(frame.id)
    }

    /// Intern the shape of `ty`, and of every type inside it.
    fn shape(&mut self, ty: &Type) -> ShapeId {
        let descriptor = ty.descriptor();
        if let Some(&id) = self.shape_ids.get(&descriptor) {
            return id;
        }
        let shape = match ty {
            Type::Bad | Type::Nothing => Shape::Opaque,
            Type::Boolean => Shape::Bool,
            Type::Integer | Type::Date => Shape::Int,
            Type::Float => Shape::Float,
            Type::String | Type::Path => Shape::Str,
            Type::Json => Shape::Json,
            Type::List(inner) => Shape::List(self.shape(inner)),
            Type::Map(k, v) => Shape::Map(self.shape(k), self.shape(v)),
            Type::Tuple(items) => Shape::Fields(items.iter().map(|t| self.shape(t)).collect()),
            Type::Object(fields) => Shape::Fields(fields.values().map(|t| self.shape(t)).collect()),
            Type::Optional(inner) => Shape::Optional(self.shape(inner)),
            Type::Algebraic(variants) => Shape::Algebraic(
                variants
                    .iter()
                    .map(|(tag, variant)| {
                        let elements = variant.elements().into_iter().map(|t| self.shape(t)).collect();
                        (Arc::from(tag.as_str()), elements)
                    })
                    .collect(),
            ),
        };
        let id = self.shapes.len();
        self.shapes.push(shape);
        self.shape_ids.insert(descriptor, id);
        id
    }

    fn key_shape(&mut self, shape: &RecordShape) -> ShapeId {
        self.shape(&Type::Tuple(shape.key_types()))
    }
}

impl Backend for StackBackend {
    type Code = Vec<Instr>;
    type Output = StackProgram;

    fn define_local(&mut self, name: &str) {
        if let Ok(frame) = self.frame() {
            let slot = frame.next_slot;
            frame.next_slot += 1;
            frame.scopes.push((name.to_string(), slot));
        }
    }

    fn bind_local(
        &mut self,
        name: &str,
        value: Vec<Instr>,
        body: Vec<Instr>,
    ) -> Result<Vec<Instr>, InternalError> {
        let frame = self.frame()?;
        let (innermost, slot) = frame.scopes.pop().ok_or_else(|| InternalError::UnboundLocal(name.to_string()))?;
        if innermost != name {
            return Err(InternalError::ScopeMismatch {
                closing: name.to_string(),
                innermost,
            });
        }
        Ok(concat([value, vec![Instr::Store(slot)], body]))
    }

    fn has_local(&self, name: &str) -> bool {
        self.frames
            .last()
            .is_some_and(|f| f.scopes.iter().any(|(n, _)| n == name))
    }

    fn load_named(&mut self, name: &str) -> Result<Vec<Instr>, InternalError> {
        let frame = self.frame()?;
        let slot = frame
            .scopes
            .iter()
            .rev()
            .find(|(n, _)| n == name)
            .map(|(_, slot)| *slot)
            .ok_or_else(|| InternalError::UnboundLocal(name.to_string()))?;
        Ok(vec![Instr::Load(slot)])
    }

    fn load_constant(&mut self, name: &str) -> Vec<Instr> {
        vec![Instr::Constant(Arc::from(name))]
    }

    fn begin_function(&mut self, name: &str, parameters: &[String]) {
        let id = self.open(name.to_string(), &[], parameters);
        self.names.insert(name.to_string(), id);
    }

    fn end_function(&mut self, body: Vec<Instr>) -> Result<(), InternalError> {
        self.close(body).map(|_| ())
    }

    fn begin_closure(&mut self, parameters: &[String], captures: &[String]) {
        let outer = self.frames.last().map(|f| f.name.as_str()).unwrap_or_default();
        let name = format!("{outer}#{}", self.functions.len());
        self.open(name, captures, parameters);
    }

    fn end_closure(
        &mut self,
        body: Vec<Instr>,
        captures: Vec<Vec<Instr>>,
    ) -> Result<Vec<Instr>, InternalError> {
        let count = captures.len();
        let id = self.close(body)?;
        Ok(concat([concat(captures), vec![Instr::Closure(id, count)]]))
    }

    fn compare(&mut self, ty: &Type, left: Vec<Instr>, right: Vec<Instr>) -> Vec<Instr> {
        let shape = self.shape(ty);
        concat([left, right, vec![Instr::Compare(shape)]])
    }

    fn equal(&mut self, ty: &Type, left: Vec<Instr>, right: Vec<Instr>) -> Vec<Instr> {
        let shape = self.shape(ty);
        concat([left, right, vec![Instr::Equal(shape)]])
    }

    fn hash(&mut self, ty: &Type, value: Vec<Instr>) -> Vec<Instr> {
        let shape = self.shape(ty);
        concat([value, vec![Instr::Hash(shape)]])
    }

    fn comparator(&mut self, ty: &Type) -> Vec<Instr> {
        vec![Instr::Comparator(self.shape(ty))]
    }

    fn equality(&mut self, ty: &Type) -> Vec<Instr> {
        vec![Instr::Equality(self.shape(ty))]
    }

    fn hasher(&mut self, ty: &Type) -> Vec<Instr> {
        vec![Instr::Hasher(self.shape(ty))]
    }

    // Field-wise order stops at the last key type, so records with
    // collected fields after the key compare and hash by the key alone.
    fn structural_equals(&mut self, shape: &RecordShape) -> Vec<Instr> {
        vec![Instr::Equality(self.key_shape(shape))]
    }

    fn structural_hash_code(&mut self, shape: &RecordShape) -> Vec<Instr> {
        vec![Instr::Hasher(self.key_shape(shape))]
    }

    fn unit(&mut self) -> Vec<Instr> {
        vec![Instr::Push(Value::Unit)]
    }

    fn literal(&mut self, literal: &Literal) -> Vec<Instr> {
        vec![Instr::Push(literal_value(literal))]
    }

    fn tuple(&mut self, items: Vec<Vec<Instr>>) -> Vec<Instr> {
        let count = items.len();
        concat([concat(items), vec![Instr::Tuple(count)]])
    }

    fn tuple_get(&mut self, tuple: Vec<Instr>, index: usize) -> Vec<Instr> {
        concat([tuple, vec![Instr::TupleGet(index)]])
    }

    fn algebraic(&mut self, tag: &str, payload: Vec<Vec<Instr>>) -> Vec<Instr> {
        let count = payload.len();
        concat([concat(payload), vec![Instr::Algebraic(Arc::from(tag), count)]])
    }

    fn algebraic_tag(&mut self, value: Vec<Instr>) -> Vec<Instr> {
        concat([value, vec![Instr::Tag]])
    }

    fn algebraic_get(&mut self, value: Vec<Instr>, index: usize) -> Vec<Instr> {
        concat([value, vec![Instr::Payload(index)]])
    }

    fn some(&mut self, value: Vec<Instr>) -> Vec<Instr> {
        concat([value, vec![Instr::Some]])
    }

    fn none(&mut self) -> Vec<Instr> {
        vec![Instr::None]
    }

    fn is_present(&mut self, value: Vec<Instr>) -> Vec<Instr> {
        concat([value, vec![Instr::IsPresent]])
    }

    fn unwrap(&mut self, value: Vec<Instr>) -> Vec<Instr> {
        concat([value, vec![Instr::Unwrap]])
    }

    fn not(&mut self, value: Vec<Instr>) -> Vec<Instr> {
        concat([value, vec![Instr::Not]])
    }

    fn ordering(&mut self, op: CompareOp, compared: Vec<Instr>) -> Vec<Instr> {
        concat([compared, vec![Instr::Order(op)]])
    }

    fn if_else(
        &mut self,
        condition: Vec<Instr>,
        then: Vec<Instr>,
        otherwise: Vec<Instr>,
    ) -> Vec<Instr> {
        concat([
            condition,
            vec![Instr::JumpUnless(then.len() + 1)],
            then,
            vec![Instr::Jump(otherwise.len())],
            otherwise,
        ])
    }

    fn call_native(&mut self, name: &str, arguments: Vec<Vec<Instr>>) -> Vec<Instr> {
        let count = arguments.len();
        concat([concat(arguments), vec![Instr::CallNative(Arc::from(name), count)]])
    }

    fn call_program(
        &mut self,
        name: &str,
        arguments: Vec<Vec<Instr>>,
    ) -> Result<Vec<Instr>, InternalError> {
        let id = *self
            .names
            .get(name)
            .ok_or_else(|| InternalError::UnknownFunction(name.to_string()))?;
        let count = arguments.len();
        Ok(concat([concat(arguments), vec![Instr::CallFunction(id, count)]]))
    }

    fn primitive(&mut self, primitive: Primitive, arguments: Vec<Vec<Instr>>) -> Vec<Instr> {
        let count = arguments.len();
        concat([concat(arguments), vec![Instr::Primitive(Box::new(primitive), count)]])
    }

    fn finish(self, meta: ProgramMeta) -> Result<StackProgram, InternalError> {
        if let Some(frame) = self.frames.last() {
            return Err(InternalError::ScopeMismatch {
                closing: "program".to_string(),
                innermost: frame.name.clone(),
            });
        }
        let functions = self
            .functions
            .into_iter()
            .collect::<Option<Vec<_>>>()
            .ok_or(InternalError::NoFunction)?;
        let module = Module {
            functions,
            shapes: self.shapes,
            names: self.names,
        };
        Ok(StackProgram::new(module, meta))
    }
}
