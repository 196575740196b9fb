//! The total order and hash over values of a known type.
//!
//! Generated code never calls into this module: each backend derives its
//! own comparators from the type. This is the order values arriving from
//! outside the program (JSON input, constants) are normalised with, and it
//! must agree with what the backends generate.

use std::cmp::Ordering;

use olive_typeck::Type;

use crate::compare::{compare_bool, compare_float, compare_int, compare_json, compare_str, to_ordering};
use crate::error::RuntimeError;
use crate::hash;
use crate::value::Value;

pub fn compare(ty: &Type, a: &Value, b: &Value) -> Result<i64, RuntimeError> {
    Ok(match ty {
        Type::Boolean => compare_bool(a.as_bool()?, b.as_bool()?),
        Type::Integer | Type::Date => compare_int(a.as_int()?, b.as_int()?),
        Type::Float => compare_float(a.as_float()?, b.as_float()?),
        Type::String | Type::Path => compare_str(a.as_str()?, b.as_str()?),
        Type::Json => compare_json(a.as_json()?, b.as_json()?),
        Type::List(inner) => {
            let (a, b) = (a.as_list()?, b.as_list()?);
            for (x, y) in a.iter().zip(b) {
                let c = compare(inner, x, y)?;
                if c != 0 {
                    return Ok(c);
                }
            }
            compare_int(a.len() as i64, b.len() as i64)
        }
        Type::Map(k, v) => {
            let (a, b) = (a.as_map()?, b.as_map()?);
            for ((ak, av), (bk, bv)) in a.iter().zip(b) {
                let c = compare(k, ak, bk)?;
                if c != 0 {
                    return Ok(c);
                }
                let c = compare(v, av, bv)?;
                if c != 0 {
                    return Ok(c);
                }
            }
            compare_int(a.len() as i64, b.len() as i64)
        }
        Type::Tuple(types) => compare_fields(types.iter(), a.as_tuple()?, b.as_tuple()?)?,
        Type::Object(fields) => compare_fields(fields.values(), a.as_tuple()?, b.as_tuple()?)?,
        Type::Optional(inner) => match (a.as_optional()?, b.as_optional()?) {
            (None, None) => 0,
            (None, Some(_)) => -1,
            (Some(_), None) => 1,
            (Some(x), Some(y)) => compare(inner, x, y)?,
        },
        Type::Algebraic(variants) => {
            let (at, ap) = a.as_algebraic()?;
            let (bt, bp) = b.as_algebraic()?;
            let c = compare_str(at, bt);
            if c != 0 {
                return Ok(c);
            }
            let shape = variants
                .get(at)
                .ok_or_else(|| RuntimeError::malformed(format!("{ty} has no variant {at}")))?;
            compare_fields(shape.elements().into_iter(), ap, bp)?
        }
        Type::Bad | Type::Nothing => 0,
    })
}

fn compare_fields<'a>(
    types: impl Iterator<Item = &'a Type>,
    a: &[Value],
    b: &[Value],
) -> Result<i64, RuntimeError> {
    for ((t, x), y) in types.zip(a).zip(b) {
        let c = compare(t, x, y)?;
        if c != 0 {
            return Ok(c);
        }
    }
    Ok(0)
}

pub fn hash_value(ty: &Type, v: &Value) -> Result<i64, RuntimeError> {
    Ok(match ty {
        Type::Boolean => hash::hash_bool(v.as_bool()?),
        Type::Integer | Type::Date => hash::hash_int(v.as_int()?),
        Type::Float => hash::hash_float(v.as_float()?),
        Type::String | Type::Path => hash::hash_str(v.as_str()?),
        Type::Json => hash::hash_json(v.as_json()?),
        Type::List(inner) => {
            let mut h = hash::seed();
            for item in v.as_list()? {
                h = hash::combine(h, hash_value(inner, item)?);
            }
            h
        }
        Type::Map(k, val) => {
            let mut h = hash::seed();
            for (key, value) in v.as_map()? {
                h = hash::combine(h, hash_value(k, key)?);
                h = hash::combine(h, hash_value(val, value)?);
            }
            h
        }
        Type::Tuple(types) => hash_fields(hash::seed(), types.iter(), v.as_tuple()?)?,
        Type::Object(fields) => hash_fields(hash::seed(), fields.values(), v.as_tuple()?)?,
        Type::Optional(inner) => match v.as_optional()? {
            None => hash::hash_bool(false),
            Some(x) => hash::combine(hash::hash_bool(true), hash_value(inner, x)?),
        },
        Type::Algebraic(variants) => {
            let (tag, payload) = v.as_algebraic()?;
            let shape = variants
                .get(tag)
                .ok_or_else(|| RuntimeError::malformed(format!("{ty} has no variant {tag}")))?;
            hash_fields(hash::hash_str(tag), shape.elements().into_iter(), payload)?
        }
        Type::Bad | Type::Nothing => hash::seed(),
    })
}

fn hash_fields<'a>(
    seed: i64,
    types: impl Iterator<Item = &'a Type>,
    values: &[Value],
) -> Result<i64, RuntimeError> {
    let mut h = seed;
    for (t, v) in types.zip(values) {
        h = hash::combine(h, hash_value(t, v)?);
    }
    Ok(h)
}

fn ordering(ty: &Type, a: &Value, b: &Value, failure: &mut Option<RuntimeError>) -> Ordering {
    if failure.is_some() {
        return Ordering::Equal;
    }
    match compare(ty, a, b) {
        Ok(c) => to_ordering(c),
        Err(e) => {
            *failure = Some(e);
            Ordering::Equal
        }
    }
}

/// Sort and de-duplicate list elements of type `ty`.
pub fn sorted_set(mut items: Vec<Value>, ty: &Type) -> Result<Value, RuntimeError> {
    let mut failure = None;
    items.sort_by(|a, b| ordering(ty, a, b, &mut failure));
    items.dedup_by(|a, b| ordering(ty, a, b, &mut failure) == Ordering::Equal);
    match failure {
        Some(e) => Err(e),
        None => Ok(Value::List(items.into())),
    }
}

/// Sort dictionary entries by key; later duplicates win.
pub fn sorted_dict(mut entries: Vec<(Value, Value)>, key: &Type) -> Result<Value, RuntimeError> {
    let mut failure = None;
    entries.sort_by(|a, b| ordering(key, &a.0, &b.0, &mut failure));
    let mut out: Vec<(Value, Value)> = Vec::with_capacity(entries.len());
    for entry in entries {
        let duplicate = out
            .last()
            .is_some_and(|last| ordering(key, &last.0, &entry.0, &mut failure) == Ordering::Equal);
        if !duplicate {
            out.push(entry);
        } else if let Some(last) = out.last_mut() {
            *last = entry;
        }
    }
    match failure {
        Some(e) => Err(e),
        None => Ok(Value::Map(out.into())),
    }
}
