//! Runtime values.
//!
//! Every value a compiled program touches is a [`Value`]. Records, tuples
//! and objects share the `Tuple` representation (objects keep their fields
//! in sorted name order), lists are kept sorted and de-duplicated by the
//! comparator the backend generated for their element type, and maps are
//! kept sorted by key.
//!
//! Values are cheap to clone: every aggregate is reference counted.

use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

use crate::error::RuntimeError;

/// Something a compiled program can call: a closure built by a backend, a
/// comparator, or a native function.
pub trait Callable: Send + Sync + fmt::Debug {
    fn call(&self, args: &[Value]) -> Result<Value, RuntimeError>;
}

#[derive(Clone, Debug)]
pub enum Value {
    Unit,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(Arc<str>),
    /// Seconds since the Unix epoch.
    Date(i64),
    Path(Arc<str>),
    Json(Arc<serde_json::Value>),
    List(Arc<[Value]>),
    Map(Arc<[(Value, Value)]>),
    Tuple(Arc<[Value]>),
    Optional(Option<Box<Value>>),
    Algebraic(Arc<str>, Arc<[Value]>),
    Closure(Arc<dyn Callable>),
}

impl Value {
    pub fn str(s: &str) -> Value {
        Value::Str(Arc::from(s))
    }

    pub fn path(s: &str) -> Value {
        Value::Path(Arc::from(s))
    }

    pub fn tuple(items: Vec<Value>) -> Value {
        Value::Tuple(items.into())
    }

    pub fn some(value: Value) -> Value {
        Value::Optional(Some(Box::new(value)))
    }

    pub fn none() -> Value {
        Value::Optional(None)
    }

    pub fn json(value: serde_json::Value) -> Value {
        Value::Json(Arc::new(value))
    }

    pub fn algebraic(tag: &str, payload: Vec<Value>) -> Value {
        Value::Algebraic(Arc::from(tag), payload.into())
    }

    pub fn closure(callable: impl Callable + 'static) -> Value {
        Value::Closure(Arc::new(callable))
    }

    /// Wrap a Rust function as a closure value.
    pub fn native<F>(f: F) -> Value
    where
        F: Fn(&[Value]) -> Result<Value, RuntimeError> + Send + Sync + 'static,
    {
        Value::closure(NativeCallable(f))
    }

    /// Name of the value's representation, for error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Unit => "unit",
            Value::Bool(_) => "boolean",
            Value::Int(_) => "integer",
            Value::Float(_) => "float",
            Value::Str(_) => "string",
            Value::Date(_) => "date",
            Value::Path(_) => "path",
            Value::Json(_) => "json",
            Value::List(_) => "list",
            Value::Map(_) => "map",
            Value::Tuple(_) => "tuple",
            Value::Optional(_) => "optional",
            Value::Algebraic(..) => "algebraic",
            Value::Closure(_) => "closure",
        }
    }

    fn wrong(&self, expected: &'static str) -> RuntimeError {
        RuntimeError::WrongValue {
            expected,
            found: self.kind(),
        }
    }

    pub fn as_bool(&self) -> Result<bool, RuntimeError> {
        match self {
            Value::Bool(b) => Ok(*b),
            other => Err(other.wrong("boolean")),
        }
    }

    /// Integers and dates share a representation.
    pub fn as_int(&self) -> Result<i64, RuntimeError> {
        match self {
            Value::Int(i) | Value::Date(i) => Ok(*i),
            other => Err(other.wrong("integer")),
        }
    }

    pub fn as_float(&self) -> Result<f64, RuntimeError> {
        match self {
            Value::Float(f) => Ok(*f),
            other => Err(other.wrong("float")),
        }
    }

    /// Strings and paths share a representation.
    pub fn as_str(&self) -> Result<&str, RuntimeError> {
        match self {
            Value::Str(s) | Value::Path(s) => Ok(s),
            other => Err(other.wrong("string")),
        }
    }

    pub fn as_json(&self) -> Result<&serde_json::Value, RuntimeError> {
        match self {
            Value::Json(j) => Ok(j),
            other => Err(other.wrong("json")),
        }
    }

    pub fn as_list(&self) -> Result<&[Value], RuntimeError> {
        match self {
            Value::List(items) => Ok(items),
            other => Err(other.wrong("list")),
        }
    }

    pub fn as_map(&self) -> Result<&[(Value, Value)], RuntimeError> {
        match self {
            Value::Map(entries) => Ok(entries),
            other => Err(other.wrong("map")),
        }
    }

    pub fn as_tuple(&self) -> Result<&[Value], RuntimeError> {
        match self {
            Value::Tuple(items) => Ok(items),
            other => Err(other.wrong("tuple")),
        }
    }

    pub fn as_optional(&self) -> Result<Option<&Value>, RuntimeError> {
        match self {
            Value::Optional(inner) => Ok(inner.as_deref()),
            other => Err(other.wrong("optional")),
        }
    }

    pub fn as_algebraic(&self) -> Result<(&str, &[Value]), RuntimeError> {
        match self {
            Value::Algebraic(tag, payload) => Ok((tag, payload)),
            other => Err(other.wrong("algebraic")),
        }
    }

    pub fn as_closure(&self) -> Result<&Arc<dyn Callable>, RuntimeError> {
        match self {
            Value::Closure(f) => Ok(f),
            other => Err(other.wrong("closure")),
        }
    }

    /// Element `index` of a tuple.
    pub fn get(&self, index: usize) -> Result<&Value, RuntimeError> {
        let items = self.as_tuple()?;
        items.get(index).ok_or(RuntimeError::Index {
            index,
            len: items.len(),
        })
    }

    /// Call a closure value.
    pub fn call(&self, args: &[Value]) -> Result<Value, RuntimeError> {
        self.as_closure()?.call(args)
    }
}

/// Structural equality for tests and diagnostics. Closures are equal only
/// to themselves; floats follow the total order programs use.
impl PartialEq for Value {
    fn eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Unit, Value::Unit) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) | (Value::Date(a), Value::Date(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a.total_cmp(b) == Ordering::Equal,
            (Value::Str(a), Value::Str(b)) | (Value::Path(a), Value::Path(b)) => a == b,
            (Value::Json(a), Value::Json(b)) => a == b,
            (Value::List(a), Value::List(b)) | (Value::Tuple(a), Value::Tuple(b)) => a == b,
            (Value::Map(a), Value::Map(b)) => a == b,
            (Value::Optional(a), Value::Optional(b)) => a == b,
            (Value::Algebraic(at, ap), Value::Algebraic(bt, bp)) => at == bt && ap == bp,
            (Value::Closure(a), Value::Closure(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn join<T>(
            f: &mut fmt::Formatter<'_>,
            items: &[T],
            each: impl Fn(&mut fmt::Formatter<'_>, &T) -> fmt::Result,
        ) -> fmt::Result {
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                each(f, item)?;
            }
            Ok(())
        }

        match self {
            Value::Unit => write!(f, "()"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(x) => write!(f, "{x:?}"),
            Value::Str(s) => write!(f, "{s:?}"),
            Value::Date(d) => write!(f, "Date {d}"),
            Value::Path(p) => write!(f, "'{p}'"),
            Value::Json(j) => write!(f, "{j}"),
            Value::List(items) => {
                write!(f, "[")?;
                join(f, items, |f, v| write!(f, "{v}"))?;
                write!(f, "]")
            }
            Value::Map(entries) => {
                write!(f, "Dict {{")?;
                join(f, entries, |f, (k, v)| write!(f, "{k} = {v}"))?;
                write!(f, "}}")
            }
            Value::Tuple(items) => {
                write!(f, "{{")?;
                join(f, items, |f, v| write!(f, "{v}"))?;
                write!(f, "}}")
            }
            Value::Optional(None) => write!(f, "``"),
            Value::Optional(Some(inner)) => write!(f, "`{inner}`"),
            Value::Algebraic(tag, payload) if payload.is_empty() => write!(f, "{tag}"),
            Value::Algebraic(tag, payload) => {
                write!(f, "{tag} {{")?;
                join(f, payload, |f, v| write!(f, "{v}"))?;
                write!(f, "}}")
            }
            Value::Closure(_) => write!(f, "<closure>"),
        }
    }
}

/// A plain Rust function usable as a closure value.
pub struct NativeCallable<F>(pub F);

impl<F> fmt::Debug for NativeCallable<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NativeCallable")
    }
}

impl<F> Callable for NativeCallable<F>
where
    F: Fn(&[Value]) -> Result<Value, RuntimeError> + Send + Sync,
{
    fn call(&self, args: &[Value]) -> Result<Value, RuntimeError> {
        (self.0)(args)
    }
}
