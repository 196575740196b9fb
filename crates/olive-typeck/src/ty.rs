//! Type representation for olive programs.
//!
//! Types are purely structural: there are no named types, no type variables
//! and no subtyping beyond the `Nothing` wildcard. Every value a pipeline can
//! carry is described by a `Type`, and every failed expression has type
//! [`Type::Bad`], which absorbs whatever it touches so a single mistake is
//! reported once.

use std::collections::BTreeMap;
use std::fmt;

/// A structural olive type.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Type {
    /// The type of a failed expression. Never `same` as anything.
    Bad,
    /// The element type of empty collections and the payload of `` ` ` ``.
    Nothing,
    Boolean,
    Integer,
    Float,
    String,
    Date,
    Path,
    Json,
    /// Sorted, de-duplicated collection.
    List(Box<Type>),
    Map(Box<Type>, Box<Type>),
    Tuple(Vec<Type>),
    /// Named fields; the map keeps them in sorted order.
    Object(BTreeMap<String, Type>),
    Optional(Box<Type>),
    /// Tagged union of variants; an algebraic value carries exactly one.
    Algebraic(BTreeMap<String, VariantShape>),
}

/// The payload carried by one algebraic variant.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum VariantShape {
    Empty,
    Tuple(Vec<Type>),
    Object(BTreeMap<String, Type>),
}

impl VariantShape {
    /// Payload element types in storage order (objects by sorted field name).
    pub fn elements(&self) -> Vec<&Type> {
        match self {
            VariantShape::Empty => Vec::new(),
            VariantShape::Tuple(elements) => elements.iter().collect(),
            VariantShape::Object(fields) => fields.values().collect(),
        }
    }

    pub fn same(&self, other: &VariantShape) -> bool {
        match (self, other) {
            (VariantShape::Empty, VariantShape::Empty) => true,
            (VariantShape::Tuple(a), VariantShape::Tuple(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(a, b)| a.same(b))
            }
            (VariantShape::Object(a), VariantShape::Object(b)) => same_fields(a, b),
            _ => false,
        }
    }
}

fn same_fields(a: &BTreeMap<String, Type>, b: &BTreeMap<String, Type>) -> bool {
    a.len() == b.len()
        && a
            .iter()
            .zip(b)
            .all(|((an, at), (bn, bt))| an == bn && at.same(bt))
}

impl Type {
    pub fn list(inner: Type) -> Type {
        Type::List(Box::new(inner))
    }

    pub fn map(key: Type, value: Type) -> Type {
        Type::Map(Box::new(key), Box::new(value))
    }

    pub fn optional(inner: Type) -> Type {
        Type::Optional(Box::new(inner))
    }

    pub fn object<'a>(fields: impl IntoIterator<Item = (&'a str, Type)>) -> Type {
        Type::Object(
            fields
                .into_iter()
                .map(|(name, ty)| (name.to_string(), ty))
                .collect(),
        )
    }

    /// An algebraic type with a single payload-free variant.
    pub fn tag(name: &str) -> Type {
        Type::Algebraic(BTreeMap::from([(name.to_string(), VariantShape::Empty)]))
    }

    pub fn is_bad(&self) -> bool {
        matches!(self, Type::Bad)
    }

    /// Whether any part of this type failed.
    pub fn contains_bad(&self) -> bool {
        match self {
            Type::Bad => true,
            Type::List(inner) | Type::Optional(inner) => inner.contains_bad(),
            Type::Map(k, v) => k.contains_bad() || v.contains_bad(),
            Type::Tuple(elements) => elements.iter().any(Type::contains_bad),
            Type::Object(fields) => fields.values().any(Type::contains_bad),
            Type::Algebraic(variants) => variants
                .values()
                .any(|shape| shape.elements().into_iter().any(Type::contains_bad)),
            _ => false,
        }
    }

    /// Structural equality. `Bad` is never the same as anything, and
    /// `Nothing` stands in for any non-bad type.
    pub fn same(&self, other: &Type) -> bool {
        match (self, other) {
            (Type::Bad, _) | (_, Type::Bad) => false,
            (Type::Nothing, _) | (_, Type::Nothing) => true,
            (Type::Boolean, Type::Boolean)
            | (Type::Integer, Type::Integer)
            | (Type::Float, Type::Float)
            | (Type::String, Type::String)
            | (Type::Date, Type::Date)
            | (Type::Path, Type::Path)
            | (Type::Json, Type::Json) => true,
            (Type::List(a), Type::List(b)) | (Type::Optional(a), Type::Optional(b)) => a.same(b),
            (Type::Map(ak, av), Type::Map(bk, bv)) => ak.same(bk) && av.same(bv),
            (Type::Tuple(a), Type::Tuple(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(a, b)| a.same(b))
            }
            (Type::Object(a), Type::Object(b)) => same_fields(a, b),
            (Type::Algebraic(a), Type::Algebraic(b)) => {
                a.len() == b.len()
                    && a
                        .iter()
                        .zip(b)
                        .all(|((an, ashape), (bn, bshape))| an == bn && ashape.same(bshape))
            }
            _ => false,
        }
    }

    /// Whether a value of `other` may be used where `self` is expected.
    ///
    /// Identical to [`Type::same`] except that an algebraic type accepts any
    /// subset of its variants.
    pub fn accepts(&self, other: &Type) -> bool {
        match (self, other) {
            (Type::Algebraic(expected), Type::Algebraic(found)) => found.iter().all(|(name, shape)| {
                expected
                    .get(name)
                    .is_some_and(|expected_shape| expected_shape.same(shape))
            }),
            (Type::List(a), Type::List(b)) | (Type::Optional(a), Type::Optional(b)) => a.accepts(b),
            (Type::Map(ak, av), Type::Map(bk, bv)) => ak.accepts(bk) && av.accepts(bv),
            (Type::Tuple(a), Type::Tuple(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(a, b)| a.accepts(b))
            }
            (Type::Object(a), Type::Object(b)) => {
                a.len() == b.len()
                    && a
                        .iter()
                        .zip(b)
                        .all(|((an, at), (bn, bt))| an == bn && at.accepts(bt))
            }
            _ => self.same(other),
        }
    }

    /// Wrap in an optional unless already optional (or bad).
    pub fn as_optional(&self) -> Type {
        match self {
            Type::Bad | Type::Optional(_) => self.clone(),
            _ => Type::optional(self.clone()),
        }
    }

    /// Types the ordering operators and `Max`/`Min` accept.
    pub fn is_orderable(&self) -> bool {
        matches!(
            self,
            Type::Integer | Type::Float | Type::Date | Type::String
        )
    }

    /// Human-readable name used in diagnostics.
    pub fn name(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Bad => write!(f, "bad"),
            Type::Nothing => write!(f, "nothing"),
            Type::Boolean => write!(f, "boolean"),
            Type::Integer => write!(f, "integer"),
            Type::Float => write!(f, "float"),
            Type::String => write!(f, "string"),
            Type::Date => write!(f, "date"),
            Type::Path => write!(f, "path"),
            Type::Json => write!(f, "json"),
            Type::List(inner) => write!(f, "[{inner}]"),
            Type::Map(k, v) => write!(f, "{k} -> {v}"),
            Type::Optional(inner) => write!(f, "{inner}?"),
            Type::Tuple(elements) => {
                write!(f, "{{")?;
                for (i, e) in elements.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{e}")?;
                }
                write!(f, "}}")
            }
            Type::Object(fields) => write_object(f, fields),
            Type::Algebraic(variants) => {
                for (i, (name, shape)) in variants.iter().enumerate() {
                    if i > 0 {
                        write!(f, " | ")?;
                    }
                    write!(f, "{name}")?;
                    match shape {
                        VariantShape::Empty => {}
                        VariantShape::Tuple(elements) => {
                            write!(f, " {{")?;
                            for (i, e) in elements.iter().enumerate() {
                                if i > 0 {
                                    write!(f, ", ")?;
                                }
                                write!(f, "{e}")?;
                            }
                            write!(f, "}}")?;
                        }
                        VariantShape::Object(fields) => {
                            write!(f, " ")?;
                            write_object(f, fields)?;
                        }
                    }
                }
                Ok(())
            }
        }
    }
}

fn write_object(f: &mut fmt::Formatter<'_>, fields: &BTreeMap<String, Type>) -> fmt::Result {
    if fields.is_empty() {
        return write!(f, "{{}}");
    }
    write!(f, "{{ ")?;
    for (i, (name, ty)) in fields.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{name} = {ty}")?;
    }
    write!(f, " }}")
}
