//! Runtime operations both backends call instead of generating them.
//!
//! A [`Primitive`] is named by a short textual form (what the text backend
//! writes into its scripts) and applied to already evaluated arguments.
//! Keeping these operations in one place is what lets two independently
//! generated programs agree on arithmetic, collections and signatures.

use std::fmt;
use std::str::FromStr;

use olive_typeck::definitions::SignatureKind;
use olive_typeck::tir::{ArithOp, CollectorKind};
use olive_typeck::Type;

use crate::collect::{settle, Accumulator, CollectSpec};
use crate::collections::{dict_get, dict_rows, make_dict, make_set};
use crate::compare::{
    compare_bool, compare_float, compare_int, compare_json, compare_lists, compare_maps,
    compare_str, hash_list, hash_map,
};
use crate::error::RuntimeError;
use crate::hash;
use crate::signature;
use crate::text;
use crate::value::Value;

#[derive(Debug, Clone, PartialEq)]
pub enum Primitive {
    CompareBool,
    CompareInt,
    CompareFloat,
    CompareStr,
    CompareJson,
    /// `[a, b, element comparator]`
    CompareLists,
    /// `[a, b, key comparator, value comparator]`
    CompareMaps,
    HashBool,
    HashInt,
    HashFloat,
    HashStr,
    HashJson,
    /// `[items, element hasher]`
    HashList,
    /// `[entries, key hasher, value hasher]`
    HashMap,
    HashSeed,
    HashCombine,
    /// `[tuple of elements, comparator]`
    MakeSet,
    /// `[tuple of {key, value} tuples, key comparator]`
    MakeDict,
    /// `[dictionary, key, key comparator]`
    DictGet,
    Arith(ArithOp),
    NegateInt,
    NegateFloat,
    /// `[source, value, filters, comparator, default, delimiter]`; see
    /// [`collect`].
    Collect(CollectSpec),
    /// The values of the signable fields, in field order.
    Signature {
        kind: SignatureKind,
        fields: Vec<(String, Type)>,
    },
    /// Render a value for string interpolation.
    ToText,
    /// `[string]`: match the whole string against the pattern.
    RegexBind { pattern: String },
}

const ARITH: &[(ArithOp, &str)] = &[
    (ArithOp::AddInt, "add-int"),
    (ArithOp::SubInt, "sub-int"),
    (ArithOp::MulInt, "mul-int"),
    (ArithOp::DivInt, "div-int"),
    (ArithOp::ModInt, "mod-int"),
    (ArithOp::AddFloat, "add-float"),
    (ArithOp::SubFloat, "sub-float"),
    (ArithOp::MulFloat, "mul-float"),
    (ArithOp::DivFloat, "div-float"),
    (ArithOp::Concat, "concat"),
    (ArithOp::DateAdd, "date-add"),
    (ArithOp::DateSub, "date-sub"),
    (ArithOp::DateDiff, "date-diff"),
];

const SIMPLE: &[(&str, Primitive)] = &[
    ("compare-bool", Primitive::CompareBool),
    ("compare-int", Primitive::CompareInt),
    ("compare-float", Primitive::CompareFloat),
    ("compare-str", Primitive::CompareStr),
    ("compare-json", Primitive::CompareJson),
    ("compare-lists", Primitive::CompareLists),
    ("compare-maps", Primitive::CompareMaps),
    ("hash-bool", Primitive::HashBool),
    ("hash-int", Primitive::HashInt),
    ("hash-float", Primitive::HashFloat),
    ("hash-str", Primitive::HashStr),
    ("hash-json", Primitive::HashJson),
    ("hash-list", Primitive::HashList),
    ("hash-map", Primitive::HashMap),
    ("hash-seed", Primitive::HashSeed),
    ("hash-combine", Primitive::HashCombine),
    ("make-set", Primitive::MakeSet),
    ("make-dict", Primitive::MakeDict),
    ("dict-get", Primitive::DictGet),
    ("negate-int", Primitive::NegateInt),
    ("negate-float", Primitive::NegateFloat),
    ("to-text", Primitive::ToText),
];

impl fmt::Display for Primitive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Primitive::Arith(op) => {
                let name = ARITH
                    .iter()
                    .find(|(o, _)| o == op)
                    .map(|(_, n)| *n)
                    .unwrap_or("?");
                write!(f, "{name}")
            }
            Primitive::Collect(spec) => {
                write!(f, "collect/{}", spec.kind.name())?;
                if spec.float {
                    write!(f, "/float")?;
                }
                if spec.optional_result {
                    write!(f, "/optional")?;
                }
                Ok(())
            }
            Primitive::Signature { kind, fields } => write!(
                f,
                "signature/{}/{}",
                kind.name(),
                Type::Object(fields.iter().cloned().collect()).descriptor()
            ),
            Primitive::RegexBind { pattern } => write!(f, "regex/{pattern}"),
            simple => {
                let name = SIMPLE
                    .iter()
                    .find(|(_, p)| p == simple)
                    .map(|(n, _)| *n)
                    .unwrap_or("?");
                write!(f, "{name}")
            }
        }
    }
}

impl FromStr for Primitive {
    type Err = RuntimeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let unknown = || RuntimeError::malformed(format!("unknown primitive `{s}`"));
        if let Some(rest) = s.strip_prefix("collect/") {
            let mut parts = rest.split('/');
            let kind = parts
                .next()
                .and_then(CollectorKind::from_name)
                .ok_or_else(unknown)?;
            let mut spec = CollectSpec::new(kind);
            for flag in parts {
                match flag {
                    "float" => spec.float = true,
                    "optional" => spec.optional_result = true,
                    _ => return Err(unknown()),
                }
            }
            return Ok(Primitive::Collect(spec));
        }
        if let Some(rest) = s.strip_prefix("signature/") {
            let (kind, descriptor) = rest.split_once('/').ok_or_else(unknown)?;
            let kind = SignatureKind::from_name(kind).ok_or_else(unknown)?;
            let Ok(Type::Object(fields)) = Type::parse_descriptor(descriptor) else {
                return Err(unknown());
            };
            return Ok(Primitive::Signature {
                kind,
                fields: fields.into_iter().collect(),
            });
        }
        if let Some(pattern) = s.strip_prefix("regex/") {
            return Ok(Primitive::RegexBind {
                pattern: pattern.to_string(),
            });
        }
        if let Some((op, _)) = ARITH.iter().find(|(_, n)| *n == s) {
            return Ok(Primitive::Arith(*op));
        }
        SIMPLE
            .iter()
            .find(|(n, _)| *n == s)
            .map(|(_, p)| p.clone())
            .ok_or_else(unknown)
    }
}

fn arg(args: &[Value], index: usize) -> Result<&Value, RuntimeError> {
    args.get(index).ok_or_else(|| {
        RuntimeError::malformed(format!("primitive given {} arguments, needs {}", args.len(), index + 1))
    })
}

impl Primitive {
    pub fn apply(&self, args: &[Value]) -> Result<Value, RuntimeError> {
        let a = |i| arg(args, i);
        Ok(match self {
            Primitive::CompareBool => Value::Int(compare_bool(a(0)?.as_bool()?, a(1)?.as_bool()?)),
            Primitive::CompareInt => Value::Int(compare_int(a(0)?.as_int()?, a(1)?.as_int()?)),
            Primitive::CompareFloat => {
                Value::Int(compare_float(a(0)?.as_float()?, a(1)?.as_float()?))
            }
            Primitive::CompareStr => Value::Int(compare_str(a(0)?.as_str()?, a(1)?.as_str()?)),
            Primitive::CompareJson => Value::Int(compare_json(a(0)?.as_json()?, a(1)?.as_json()?)),
            Primitive::CompareLists => {
                Value::Int(compare_lists(a(0)?.as_list()?, a(1)?.as_list()?, a(2)?)?)
            }
            Primitive::CompareMaps => {
                Value::Int(compare_maps(a(0)?.as_map()?, a(1)?.as_map()?, a(2)?, a(3)?)?)
            }
            Primitive::HashBool => Value::Int(hash::hash_bool(a(0)?.as_bool()?)),
            Primitive::HashInt => Value::Int(hash::hash_int(a(0)?.as_int()?)),
            Primitive::HashFloat => Value::Int(hash::hash_float(a(0)?.as_float()?)),
            Primitive::HashStr => Value::Int(hash::hash_str(a(0)?.as_str()?)),
            Primitive::HashJson => Value::Int(hash::hash_json(a(0)?.as_json()?)),
            Primitive::HashList => Value::Int(hash_list(a(0)?.as_list()?, a(1)?)?),
            Primitive::HashMap => Value::Int(hash_map(a(0)?.as_map()?, a(1)?, a(2)?)?),
            Primitive::HashSeed => Value::Int(hash::seed()),
            Primitive::HashCombine => Value::Int(hash::combine(a(0)?.as_int()?, a(1)?.as_int()?)),
            Primitive::MakeSet => make_set(a(0)?.as_tuple()?.to_vec(), a(1)?)?,
            Primitive::MakeDict => {
                let entries = a(0)?
                    .as_tuple()?
                    .iter()
                    .map(|entry| Ok((entry.get(0)?.clone(), entry.get(1)?.clone())))
                    .collect::<Result<Vec<_>, RuntimeError>>()?;
                make_dict(entries, a(1)?)?
            }
            Primitive::DictGet => dict_get(a(0)?.as_map()?, a(1)?, a(2)?)?,
            Primitive::Arith(op) => arithmetic(*op, a(0)?, a(1)?)?,
            Primitive::NegateInt => Value::Int(a(0)?.as_int()?.wrapping_neg()),
            Primitive::NegateFloat => Value::Float(-a(0)?.as_float()?),
            Primitive::Collect(spec) => {
                let result = collect(*spec, a(0)?, a(1)?, a(2)?, a(3)?, a(4)?, a(5)?)?;
                result.ok_or_else(|| {
                    RuntimeError::malformed(format!("{} collector produced no value", spec.kind.name()))
                })?
            }
            Primitive::Signature { kind, fields } => signature::compute(*kind, fields, args)?,
            Primitive::ToText => text::to_text(a(0)?)?,
            Primitive::RegexBind { pattern } => text::regex_bind(pattern, a(0)?.as_str()?)?,
        })
    }
}

pub fn arithmetic(op: ArithOp, left: &Value, right: &Value) -> Result<Value, RuntimeError> {
    Ok(match op {
        ArithOp::AddInt => Value::Int(left.as_int()?.wrapping_add(right.as_int()?)),
        ArithOp::SubInt => Value::Int(left.as_int()?.wrapping_sub(right.as_int()?)),
        ArithOp::MulInt => Value::Int(left.as_int()?.wrapping_mul(right.as_int()?)),
        ArithOp::DivInt => match right.as_int()? {
            0 => return Err(RuntimeError::DivideByZero),
            r => Value::Int(left.as_int()?.wrapping_div(r)),
        },
        ArithOp::ModInt => match right.as_int()? {
            0 => return Err(RuntimeError::DivideByZero),
            r => Value::Int(left.as_int()?.wrapping_rem(r)),
        },
        ArithOp::AddFloat => Value::Float(left.as_float()? + right.as_float()?),
        ArithOp::SubFloat => Value::Float(left.as_float()? - right.as_float()?),
        ArithOp::MulFloat => Value::Float(left.as_float()? * right.as_float()?),
        ArithOp::DivFloat => Value::Float(left.as_float()? / right.as_float()?),
        ArithOp::Concat => {
            let mut s = left.as_str()?.to_string();
            s.push_str(right.as_str()?);
            Value::str(&s)
        }
        ArithOp::DateAdd => Value::Date(left.as_int()?.wrapping_add(right.as_int()?)),
        ArithOp::DateSub => Value::Date(left.as_int()?.wrapping_sub(right.as_int()?)),
        ArithOp::DateDiff => Value::Int(left.as_int()?.wrapping_sub(right.as_int()?)),
    })
}

fn optional_closure(value: &Value) -> Option<&Value> {
    match value {
        Value::Unit => None,
        other => Some(other),
    }
}

/// Run a collector over the elements of a list (or the `{key, value}` rows
/// of a dictionary). `value` maps an element to what is collected (`Unit`
/// for `Count`), `filters` is a tuple of predicates, and `default` and
/// `delimiter` are zero-argument closures or `Unit`. `None` means an empty
/// collector without a default or optional wrapping.
pub fn collect(
    spec: CollectSpec,
    source: &Value,
    value: &Value,
    filters: &Value,
    comparator: &Value,
    default: &Value,
    delimiter: &Value,
) -> Result<Option<Value>, RuntimeError> {
    let rows;
    let elements: &[Value] = match source {
        Value::Map(entries) => {
            rows = dict_rows(entries);
            &rows
        }
        other => other.as_list()?,
    };
    let filters = filters.as_tuple()?;
    let comparator = optional_closure(comparator);
    let mut accumulator = Accumulator::new(spec);
    'elements: for element in elements {
        let args = std::slice::from_ref(element);
        for filter in filters {
            if !filter.call(args)?.as_bool()? {
                continue 'elements;
            }
        }
        let collected = match optional_closure(value) {
            Some(f) => f.call(args)?,
            None => Value::Unit,
        };
        accumulator.push(collected, comparator)?;
    }
    let delimiter = match optional_closure(delimiter) {
        Some(f) => Some(f.call(&[])?.as_str()?.to_string()),
        None => None,
    };
    let result = accumulator.finish(comparator, delimiter.as_deref())?;
    settle(spec, result, || {
        optional_closure(default).map(|f| f.call(&[])).transpose()
    })
}
